use crate::collab::{SearchHit, Searcher};
use crate::config::WebSection;
use crate::error::GatewayError;
use crate::process::{run_supervised, ProcessInvocation, RunOptions};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Runs an external search command that prints JSON hits.
///
/// The argv template may contain `{query}` and `{limit}`. Accepted output is
/// either an array of hits or an object with a `results` array; each hit
/// needs a `url` (or `link`/`href`) and may carry `title` and
/// `snippet` (or `body`/`description`).
#[derive(Debug, Clone)]
pub struct CommandSearcher {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandSearcher {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    pub fn build_argv(&self, query: &str, limit: usize) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{query}", query)
                    .replace("{limit}", &limit.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl Searcher for CommandSearcher {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, GatewayError> {
        let argv = self.build_argv(query, limit);
        let Some((program, args)) = argv.split_first() else {
            return Err(GatewayError::SearchFailed("search command is empty".to_string()));
        };

        let mut invocation =
            ProcessInvocation::new(program, args.to_vec(), std::env::temp_dir(), self.timeout);
        let options = RunOptions {
            grace: Duration::from_secs(1),
            ..Default::default()
        };
        let report = run_supervised(&mut invocation, options)
            .await
            .map_err(|e| GatewayError::SearchFailed(e.to_string()))?;
        let stdout = report
            .into_result(&invocation.name(), self.timeout)
            .map_err(|e| GatewayError::SearchFailed(e.to_string()))?;

        let mut hits = parse_hits(&stdout)?;
        hits.truncate(limit);
        tracing::debug!("🔎 {} hits for '{}'", hits.len(), crate::logging::log_preview(query));
        Ok(hits)
    }
}

/// Parse the JSON printed by a search command.
pub fn parse_hits(stdout: &str) -> Result<Vec<SearchHit>, GatewayError> {
    let value: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| GatewayError::SearchFailed(format!("invalid search output: {}", e)))?;

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("results") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(GatewayError::SearchFailed(
                    "search output has no results array".to_string(),
                ))
            }
        },
        _ => {
            return Err(GatewayError::SearchFailed(
                "search output is not a list".to_string(),
            ))
        }
    };

    Ok(items
        .iter()
        .filter_map(|item| {
            let url = field(item, &["url", "link", "href"])?;
            Some(SearchHit {
                title: field(item, &["title", "name"]).unwrap_or_else(|| url.clone()),
                snippet: field(item, &["snippet", "body", "description"]).unwrap_or_default(),
                url,
            })
        })
        .collect())
}

fn field(item: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| item.get(*name).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
}

/// Used when no search command is configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledSearcher;

#[async_trait]
impl Searcher for DisabledSearcher {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>, GatewayError> {
        Err(GatewayError::SearchFailed(
            "web search is not configured".to_string(),
        ))
    }
}

/// Searcher for the `web` config section.
pub fn searcher_from_section(section: &WebSection) -> Arc<dyn Searcher> {
    if section.search_command.is_empty() {
        Arc::new(DisabledSearcher)
    } else {
        Arc::new(CommandSearcher::new(
            section.search_command.clone(),
            section.timeout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hits_accepts_both_shapes() {
        let array = r#"[{"title":"A","url":"https://a.test","snippet":"first"}]"#;
        let hits = parse_hits(array).unwrap();
        assert_eq!(
            hits,
            vec![SearchHit {
                title: "A".to_string(),
                url: "https://a.test".to_string(),
                snippet: "first".to_string()
            }]
        );

        let object = r#"{"results":[{"href":"https://b.test","body":"second"},{"title":"no url"}]}"#;
        let hits = parse_hits(object).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "https://b.test");
        assert_eq!(hits[0].snippet, "second");
    }

    #[test]
    fn test_parse_hits_rejects_garbage() {
        assert!(parse_hits("not json").is_err());
        assert!(parse_hits(r#"{"items": []}"#).is_err());
        assert!(parse_hits("42").is_err());
    }

    #[test]
    fn test_argv_template() {
        let searcher = CommandSearcher::new(
            vec!["ddgs".to_string(), "--max={limit}".to_string(), "{query}".to_string()],
            Duration::from_secs(5),
        );
        assert_eq!(
            searcher.build_argv("rust async", 3),
            vec!["ddgs", "--max=3", "rust async"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_searcher_runs_command() {
        let script = r#"echo '[{"title":"T1","url":"https://1.test"},{"title":"T2","url":"https://2.test"}]'"#;
        let searcher = CommandSearcher::new(
            vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            Duration::from_secs(5),
        );
        let hits = searcher.search("anything", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "T1");
    }

    #[tokio::test]
    async fn test_disabled_searcher() {
        let err = DisabledSearcher.search("q", 5).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
