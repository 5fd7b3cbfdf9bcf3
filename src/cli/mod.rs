mod args;
mod helpers;

pub use args::{AskArgs, Cli, Commands};
pub use helpers::{describe_config, parse_console_line, ConsoleInput};
