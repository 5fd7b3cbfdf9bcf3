use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config YAML file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging for internal details
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// User for console lines without a `user:` prefix
    #[arg(long, default_value = "console")]
    pub user: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the loaded configuration
    Show,
    /// Validate the configuration and locate the AI tool
    Check,
    /// Handle a single message and print the response
    Ask(AskArgs),
}

#[derive(Args, Debug)]
pub struct AskArgs {
    /// User the message is sent as
    #[arg(long, default_value = "console")]
    pub user: String,

    /// Message text
    #[arg(required = true, trailing_var_arg = true)]
    pub text: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_mode() {
        let cli = Cli::parse_from(["agent-gateway", "--config", "gw.yaml", "-d"]);
        assert_eq!(cli.config, Some(PathBuf::from("gw.yaml")));
        assert!(cli.debug);
        assert_eq!(cli.user, "console");
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::parse_from(["agent-gateway", "ask", "--user", "alice", "what", "is", "rust?"]);
        match cli.command {
            Some(Commands::Ask(args)) => {
                assert_eq!(args.user, "alice");
                assert_eq!(args.text.join(" "), "what is rust?");
            }
            other => panic!("expected ask, got {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["agent-gateway", "check", "--config", "x.yaml"]);
        assert!(matches!(cli.command, Some(Commands::Check)));
        assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
    }
}
