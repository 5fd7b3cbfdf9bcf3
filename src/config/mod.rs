pub mod helper;
pub mod sections;
pub mod security;

pub use sections::{
    AnalysisSection, CapabilitiesSection, CodeExecutionSection, ConcurrencySection,
    DocumentsSection, HistorySection, LimitConfig, LoggingSection, ProgressSection, PromptVia,
    RateLimitSection, ToolSection, WebSection,
};
pub use security::{AdminBypass, ContentFilterSection, ContentRuleConfig, SecuritySection};

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "config.yaml";
const APP_DIR: &str = "agent-gateway";

// YAML structure for the complete gateway configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub tool: ToolSection,
    #[serde(default)]
    pub security: SecuritySection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub concurrency: ConcurrencySection,
    #[serde(default)]
    pub capabilities: CapabilitiesSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub documents: DocumentsSection,
    #[serde(default)]
    pub web: WebSection,
    #[serde(default)]
    pub code_execution: CodeExecutionSection,
    #[serde(default)]
    pub progress: ProgressSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl GatewayConfig {
    /// Parse and validate YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty file means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: GatewayConfig =
            serde_yaml::from_str(content).with_context(|| "Failed to parse YAML config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.concurrency.pool_size > 0,
            "concurrency.pool_size must be at least 1"
        );
        ensure!(
            self.concurrency.per_user > 0,
            "concurrency.per_user must be at least 1"
        );
        ensure!(
            !self.tool.search_names.is_empty() || self.tool.path.is_some(),
            "tool.search_names must not be empty when tool.path is unset"
        );
        ensure!(
            self.history.context_turns <= self.history.max_turns,
            "history.context_turns ({}) exceeds history.max_turns ({})",
            self.history.context_turns,
            self.history.max_turns
        );
        Ok(())
    }
}

/// Load the configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig> {
    let (config, _) = load_config_with_source(path)?;
    Ok(config)
}

/// Load the configuration and also return the raw file text, which the
/// policy snapshot fingerprints.
pub fn load_config_with_source(path: &Path) -> Result<(GatewayConfig, String)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = GatewayConfig::from_yaml(&content)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok((config, content))
}

/// `config.yaml` in the working directory, else the per-user config dir.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(DEFAULT_CONFIG_FILE))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = GatewayConfig::from_yaml("tool:\n  model: opus\n").unwrap();
        assert_eq!(config.tool.model, "opus");
        assert_eq!(config.tool.timeout, Duration::from_secs(120));
        assert_eq!(config.concurrency.pool_size, 4);
        assert_eq!(config.concurrency.per_user, 1);
        assert_eq!(config.rate_limit.limits.len(), 2);
        assert_eq!(config.history.max_turns, 20);
        assert!(config.security.allowed_users.is_empty());
        assert!(config
            .security
            .command_blacklist
            .contains(&"rm -rf".to_string()));
        assert!(!config.code_execution.enabled);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = GatewayConfig::from_yaml("   \n").unwrap();
        assert_eq!(config.tool.search_names, vec!["claude", "claude-code"]);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_durations_and_limits_parse() {
        let yaml = r#"
tool:
  timeout: "5m"
  kill_grace: "250ms"
  prompt_via: arg
rate_limit:
  limits:
    - max_requests: 2
      window: "60s"
    - max_requests: 0
      window: "1h"
concurrency:
  queue_timeout: "2s"
  supersede_in_flight: true
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.tool.timeout, Duration::from_secs(300));
        assert_eq!(config.tool.kill_grace, Duration::from_millis(250));
        assert_eq!(config.tool.prompt_via, PromptVia::Arg);
        assert_eq!(config.rate_limit.limits[0].max_requests, 2);
        assert_eq!(config.rate_limit.limits[1].max_requests, 0);
        assert_eq!(config.concurrency.queue_timeout, Duration::from_secs(2));
        assert!(config.concurrency.supersede_in_flight);
    }

    #[test]
    fn test_code_execution_compilers() {
        let config = GatewayConfig::from_yaml("code_execution:\n  enabled: true\n").unwrap();
        assert_eq!(config.code_execution.compilers["cpp"][0], "g++");
        assert_eq!(config.code_execution.runtimes["java"], vec!["java"]);

        let yaml = r#"
code_execution:
  enabled: true
  compilers:
    cpp: ["clang++", "-o", "{binary}", "{source}"]
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.code_execution.compilers.len(), 1);
        assert_eq!(config.code_execution.compilers["cpp"][0], "clang++");
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let err = GatewayConfig::from_yaml("tool:\n  timeout: forever\n").unwrap_err();
        assert!(format!("{err:#}").contains("Duration must end with"));
    }

    #[test]
    fn test_zero_pool_is_rejected() {
        let err = GatewayConfig::from_yaml("concurrency:\n  pool_size: 0\n").unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
security:
  allowed_users: ["alice"]
  admins: ["root"]
  admin_bypass:
    rate_limit: true
  command_whitelist: ["ls", "cat"]
  content_filter:
    blocked_keywords: ["secret plans"]
"#
        )
        .unwrap();

        let (config, source) = load_config_with_source(file.path()).unwrap();
        assert_eq!(config.security.allowed_users, vec!["alice"]);
        assert!(config.security.admin_bypass.rate_limit);
        assert!(!config.security.admin_bypass.content_filter);
        assert_eq!(config.security.command_whitelist.len(), 2);
        assert!(source.contains("secret plans"));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/gateway.yaml")).unwrap_err();
        assert!(err
            .to_string()
            .contains("Failed to read config file: /nonexistent/gateway.yaml"));
    }
}
