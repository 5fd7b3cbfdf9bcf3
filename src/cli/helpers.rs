use agent_gateway::config::GatewayConfig;
use std::fmt::Write;
use std::path::Path;

/// One line typed into the console chat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Message { user: String, text: String },
    /// `/cancel` aborts everything the user has waiting or running
    Cancel { user: String },
    Quit,
}

/// Parse `user: text`, falling back to `default_user` when the line has no
/// user prefix. Blank lines yield `None`.
pub fn parse_console_line(line: &str, default_user: &str) -> Option<ConsoleInput> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == "/quit" || line == "/exit" {
        return Some(ConsoleInput::Quit);
    }

    let (user, text) = match line.split_once(": ") {
        Some((user, text)) if is_user_id(user) && !text.trim().is_empty() => {
            (user.to_string(), text.trim().to_string())
        }
        _ => (default_user.to_string(), line.to_string()),
    };

    if text == "/cancel" {
        return Some(ConsoleInput::Cancel { user });
    }
    Some(ConsoleInput::Message { user, text })
}

fn is_user_id(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
}

/// Human-readable summary printed by `show`.
pub fn describe_config(config: &GatewayConfig, path: &Path) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(out, "Config file: {}", path.display());

    let _ = writeln!(out, "\nTool:");
    match &config.tool.path {
        Some(path) => {
            let _ = writeln!(out, "  path: {}", path.display());
        }
        None => {
            let _ = writeln!(out, "  search names: {}", config.tool.search_names.join(", "));
        }
    }
    let _ = writeln!(out, "  model: {}", config.tool.model);
    let _ = writeln!(out, "  args: {}", config.tool.args.join(" "));
    let _ = writeln!(out, "  prompt via: {:?}", config.tool.prompt_via);
    let _ = writeln!(out, "  timeout: {:?} (kill grace {:?})", config.tool.timeout, config.tool.kill_grace);

    let security = &config.security;
    let _ = writeln!(out, "\nSecurity:");
    let _ = writeln!(
        out,
        "  allowed users: {}",
        if security.allowed_users.is_empty() {
            "everyone".to_string()
        } else {
            security.allowed_users.join(", ")
        }
    );
    let _ = writeln!(out, "  admins: {}", security.admins.join(", "));
    let _ = writeln!(
        out,
        "  admin bypass: rate limit {}, content filter {}",
        security.admin_bypass.rate_limit, security.admin_bypass.content_filter
    );
    let _ = writeln!(
        out,
        "  content filter: {} ({} keywords, {} rules)",
        if security.content_filter.enabled { "on" } else { "off" },
        security.content_filter.blocked_keywords.len(),
        security.content_filter.rules.len()
    );
    let _ = writeln!(out, "  command whitelist: {:?}", security.command_whitelist);
    let _ = writeln!(out, "  command blacklist: {:?}", security.command_blacklist);

    let _ = writeln!(out, "\nRate limit:");
    if !config.rate_limit.enabled {
        let _ = writeln!(out, "  disabled");
    }
    for limit in &config.rate_limit.limits {
        let _ = writeln!(out, "  {} requests per {:?}", limit.max_requests, limit.window);
    }

    let c = &config.concurrency;
    let _ = writeln!(out, "\nConcurrency:");
    let _ = writeln!(out, "  pool size: {}", c.pool_size);
    let _ = writeln!(out, "  per user: {}", c.per_user);
    let _ = writeln!(out, "  queue timeout: {:?}", c.queue_timeout);
    let _ = writeln!(out, "  supersede in-flight: {}", c.supersede_in_flight);

    let caps = &config.capabilities;
    let _ = writeln!(out, "\nCapabilities:");
    let _ = writeln!(out, "  doc-gen: {}", caps.doc_gen);
    let _ = writeln!(out, "  web-research: {}", caps.web_research);
    let _ = writeln!(out, "  code-dev: {}", caps.code_dev);
    let _ = writeln!(
        out,
        "  code execution: {}",
        if config.code_execution.enabled { "enabled" } else { "disabled" }
    );
    for (language, argv) in &config.code_execution.runtimes {
        let _ = writeln!(out, "    {}: {}", language, argv.join(" "));
    }
    for (language, argv) in &config.code_execution.compilers {
        let _ = writeln!(out, "    {} (build): {}", language, argv.join(" "));
    }
    if config.web.search_command.is_empty() {
        let _ = writeln!(out, "  web search: not configured");
    } else {
        let _ = writeln!(out, "  web search: {}", config.web.search_command.join(" "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefixed_and_plain_lines() {
        assert_eq!(
            parse_console_line("alice: hello there", "console"),
            Some(ConsoleInput::Message {
                user: "alice".to_string(),
                text: "hello there".to_string()
            })
        );
        assert_eq!(
            parse_console_line("what time is it: now?", "console"),
            Some(ConsoleInput::Message {
                user: "console".to_string(),
                text: "what time is it: now?".to_string()
            })
        );
        assert_eq!(
            parse_console_line("$ ls -la", "bob"),
            Some(ConsoleInput::Message {
                user: "bob".to_string(),
                text: "$ ls -la".to_string()
            })
        );
        assert_eq!(parse_console_line("   ", "console"), None);
    }

    #[test]
    fn test_control_lines() {
        assert_eq!(
            parse_console_line("alice: /cancel", "console"),
            Some(ConsoleInput::Cancel {
                user: "alice".to_string()
            })
        );
        assert_eq!(parse_console_line("/quit", "console"), Some(ConsoleInput::Quit));
    }

    #[test]
    fn test_describe_config_mentions_sections() {
        let config = GatewayConfig::default();
        let text = describe_config(&config, Path::new("config.yaml"));
        assert!(text.contains("allowed users: everyone"));
        assert!(text.contains("pool size: 4"));
        assert!(text.contains("web search: not configured"));
    }
}
