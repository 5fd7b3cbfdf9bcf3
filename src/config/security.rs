use serde::Deserialize;

// YAML structure for the hot-reloadable security policy
#[derive(Debug, Deserialize, Clone)]
pub struct SecuritySection {
    /// Users allowed to talk to the assistant. Empty admits everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// Admins are always allowed and may bypass gates per `admin_bypass`.
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub admin_bypass: AdminBypass,
    #[serde(default)]
    pub content_filter: ContentFilterSection,
    #[serde(default)]
    pub command_whitelist: Vec<String>,
    #[serde(default = "default_command_blacklist")]
    pub command_blacklist: Vec<String>,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            allowed_users: Vec::new(),
            admins: Vec::new(),
            admin_bypass: AdminBypass::default(),
            content_filter: ContentFilterSection::default(),
            command_whitelist: Vec::new(),
            command_blacklist: default_command_blacklist(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct AdminBypass {
    #[serde(default)]
    pub rate_limit: bool,
    #[serde(default)]
    pub content_filter: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentFilterSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Shorthand: each keyword becomes a case-insensitive rule.
    #[serde(default)]
    pub blocked_keywords: Vec<String>,
    #[serde(default)]
    pub rules: Vec<ContentRuleConfig>,
}

impl Default for ContentFilterSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            blocked_keywords: Vec::new(),
            rules: Vec::new(),
        }
    }
}

// One ordered deny rule; exactly one of `keyword` / `pattern` must be set
#[derive(Debug, Deserialize, Clone)]
pub struct ContentRuleConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_command_blacklist() -> Vec<String> {
    [
        "rm -rf",
        "mkfs",
        "dd",
        "shutdown",
        "reboot",
        "halt",
        "chmod -R 777",
        ":(){",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
