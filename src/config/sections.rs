use crate::config::helper::deserialize_duration;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// How the prompt reaches the AI tool.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptVia {
    #[default]
    Stdin,
    Arg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolSection {
    /// Explicit executable path; when unset the search order is used.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_search_names")]
    pub search_names: Vec<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Arguments passed before the prompt; `{model}` is substituted.
    #[serde(default = "default_tool_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub prompt_via: PromptVia,
    #[serde(default = "default_tool_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    #[serde(default = "default_kill_grace", deserialize_with = "deserialize_duration")]
    pub kill_grace: Duration,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for ToolSection {
    fn default() -> Self {
        Self {
            path: None,
            search_names: default_search_names(),
            model: default_model(),
            args: default_tool_args(),
            prompt_via: PromptVia::default(),
            timeout: default_tool_timeout(),
            kill_grace: default_kill_grace(),
            working_dir: default_working_dir(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_limits")]
    pub limits: Vec<LimitConfig>,
    #[serde(default = "default_max_tracked_users")]
    pub max_tracked_users: usize,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            limits: default_limits(),
            max_tracked_users: default_max_tracked_users(),
        }
    }
}

// Signed on purpose: zero or negative values are accepted and disabled with a warning
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LimitConfig {
    pub max_requests: i64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub window: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConcurrencySection {
    /// Simultaneous subprocesses across all users.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Simultaneous requests per user; 1 serializes a user's requests FIFO.
    #[serde(default = "default_per_user")]
    pub per_user: usize,
    #[serde(default = "default_queue_timeout", deserialize_with = "deserialize_duration")]
    pub queue_timeout: Duration,
    /// A new message from a user cancels that user's in-flight request.
    #[serde(default)]
    pub supersede_in_flight: bool,
}

impl Default for ConcurrencySection {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            per_user: default_per_user(),
            queue_timeout: default_queue_timeout(),
            supersede_in_flight: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CapabilitiesSection {
    #[serde(default = "default_true")]
    pub doc_gen: bool,
    #[serde(default = "default_true")]
    pub web_research: bool,
    #[serde(default = "default_true")]
    pub code_dev: bool,
}

impl Default for CapabilitiesSection {
    fn default() -> Self {
        Self {
            doc_gen: true,
            web_research: true,
            code_dev: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistorySection {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            context_turns: default_context_turns(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AnalysisSection {
    /// Ask the AI tool to classify requests before falling back to keywords.
    #[serde(default)]
    pub use_tool: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsSection {
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Executable used for docx/pdf output.
    #[serde(default = "default_pandoc")]
    pub pandoc: String,
    #[serde(default = "default_render_timeout", deserialize_with = "deserialize_duration")]
    pub render_timeout: Duration,
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for DocumentsSection {
    fn default() -> Self {
        Self {
            output_dir: None,
            pandoc: default_pandoc(),
            render_timeout: default_render_timeout(),
            title: default_title(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSection {
    /// Search command argv; `{query}` and `{limit}` are substituted.
    #[serde(default)]
    pub search_command: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            search_command: Vec::new(),
            max_results: default_max_results(),
            timeout: default_search_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CodeExecutionSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_exec_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    #[serde(default)]
    pub sandbox_dir: Option<PathBuf>,
    /// Interpreter argv per language; the script path is appended.
    #[serde(default = "default_runtimes")]
    pub runtimes: BTreeMap<String, Vec<String>>,
    /// Build step per language, run before the binary it produces. Takes
    /// precedence over `runtimes`. `{source}` and `{binary}` are substituted.
    #[serde(default = "default_compilers")]
    pub compilers: BTreeMap<String, Vec<String>>,
    /// Command used to install a missing runtime; the package name is appended.
    #[serde(default)]
    pub install_command: Vec<String>,
}

impl Default for CodeExecutionSection {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: default_exec_timeout(),
            sandbox_dir: None,
            runtimes: default_runtimes(),
            compilers: default_compilers(),
            install_command: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProgressSection {
    /// Message sent before a request is dispatched; empty disables it.
    #[serde(default = "default_notice")]
    pub notice: String,
    /// Forward streamed tool output lines to the transport.
    #[serde(default)]
    pub forward_output: bool,
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            notice: default_notice(),
            forward_output: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_search_names() -> Vec<String> {
    vec!["claude".to_string(), "claude-code".to_string()]
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_tool_args() -> Vec<String> {
    ["-p", "--output-format", "json", "--model", "{model}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_kill_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_limits() -> Vec<LimitConfig> {
    vec![
        LimitConfig {
            max_requests: 30,
            window: Duration::from_secs(60),
        },
        LimitConfig {
            max_requests: 200,
            window: Duration::from_secs(3600),
        },
    ]
}

fn default_max_tracked_users() -> usize {
    10_000
}

fn default_pool_size() -> usize {
    4
}

fn default_per_user() -> usize {
    1
}

fn default_queue_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_turns() -> usize {
    20
}

fn default_context_turns() -> usize {
    5
}

fn default_pandoc() -> String {
    "pandoc".to_string()
}

fn default_render_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_title() -> String {
    "AI_Generated_Document".to_string()
}

fn default_max_results() -> usize {
    5
}

fn default_search_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_exec_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_runtimes() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        ("python".to_string(), vec!["python3".to_string()]),
        ("javascript".to_string(), vec!["node".to_string()]),
        ("go".to_string(), vec!["go".to_string(), "run".to_string()]),
        // Single-file source launcher, no separate javac step
        ("java".to_string(), vec!["java".to_string()]),
    ])
}

fn default_compilers() -> BTreeMap<String, Vec<String>> {
    let template = |argv: &[&str]| -> Vec<String> { argv.iter().map(|s| s.to_string()).collect() };
    BTreeMap::from([
        ("cpp".to_string(), template(&["g++", "-O2", "-o", "{binary}", "{source}"])),
        ("c".to_string(), template(&["cc", "-O2", "-o", "{binary}", "{source}"])),
        ("rust".to_string(), template(&["rustc", "-O", "-o", "{binary}", "{source}"])),
    ])
}

fn default_notice() -> String {
    "Got it, working on your request...".to_string()
}

fn default_level() -> String {
    "warn".to_string()
}
