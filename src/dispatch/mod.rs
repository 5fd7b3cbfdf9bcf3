//! Capability pipelines behind the gates.
//!
//! [`CapabilityDispatcher::dispatch`] turns a classified request into exactly
//! one [`Response`]. Each pipeline keeps whatever it already computed when a
//! later step fails.

pub mod classify;
pub mod extract;
pub mod sandbox;

mod code_dev;
mod doc_gen;
mod web_research;

pub use sandbox::{CodeSandbox, ExecutionReport};
pub use web_research::is_safe_url;

use crate::collab::{Renderer, Searcher};
use crate::config::{CapabilitiesSection, GatewayConfig};
use crate::error::GatewayError;
use crate::gate::PolicySnapshot;
use crate::logging::log_preview;
use crate::process::{InvokeOptions, ToolInvoker, ToolOutput};
use crate::types::{Classification, ConversationTurn, Intent, Request, Response};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Everything a pipeline needs to know about the request beyond its text.
#[derive(Clone)]
pub struct DispatchContext {
    pub policy: Arc<PolicySnapshot>,
    /// Most recent turns, oldest first, already cut to the context size.
    pub history: Vec<ConversationTurn>,
    pub cancel: CancellationToken,
    /// Status notices for the user.
    pub progress: Option<UnboundedSender<String>>,
    /// Also stream the tool's own output lines to `progress`.
    pub forward_output: bool,
}

impl DispatchContext {
    pub fn new(policy: Arc<PolicySnapshot>) -> Self {
        Self {
            policy,
            history: Vec::new(),
            cancel: CancellationToken::new(),
            progress: None,
            forward_output: false,
        }
    }

    fn notify(&self, line: impl Into<String>) {
        if let Some(progress) = &self.progress {
            // The receiver goes away once the response has been sent
            let _ = progress.send(line.into());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    pub capabilities: CapabilitiesSection,
    pub system_prompt: Option<String>,
    pub document_title: String,
    pub documents_dir: Option<PathBuf>,
    pub web_max_results: usize,
}

impl DispatchSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            capabilities: config.capabilities.clone(),
            system_prompt: config.tool.system_prompt.clone(),
            document_title: config.documents.title.clone(),
            documents_dir: config.documents.output_dir.clone(),
            web_max_results: config.web.max_results,
        }
    }
}

pub struct CapabilityDispatcher {
    tool: Arc<dyn ToolInvoker>,
    renderer: Arc<dyn Renderer>,
    searcher: Arc<dyn Searcher>,
    sandbox: Option<CodeSandbox>,
    settings: DispatchSettings,
}

impl CapabilityDispatcher {
    pub fn new(
        tool: Arc<dyn ToolInvoker>,
        renderer: Arc<dyn Renderer>,
        searcher: Arc<dyn Searcher>,
        sandbox: Option<CodeSandbox>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            tool,
            renderer,
            searcher,
            sandbox,
            settings,
        }
    }

    pub fn tool(&self) -> Arc<dyn ToolInvoker> {
        self.tool.clone()
    }

    pub fn sandbox(&self) -> Option<&CodeSandbox> {
        self.sandbox.as_ref()
    }

    /// The intent actually served: disabled capabilities fall back to
    /// generic.
    pub fn effective_intent(&self, intent: Intent) -> Intent {
        let enabled = match intent {
            Intent::DocGen => self.settings.capabilities.doc_gen,
            Intent::WebResearch => self.settings.capabilities.web_research,
            Intent::CodeDev => self.settings.capabilities.code_dev,
            Intent::Generic => true,
        };
        if enabled {
            intent
        } else {
            info!("ℹ️  Capability {} is disabled, using the generic pipeline", intent);
            Intent::Generic
        }
    }

    pub async fn dispatch(
        &self,
        classification: &Classification,
        request: &Request,
        ctx: &DispatchContext,
    ) -> Response {
        let intent = self.effective_intent(classification.intent);
        debug!("🧭 Request {} -> {}", request.id, intent);
        let params = &classification.params;

        match intent {
            Intent::DocGen => self.generate_document(request, params, ctx).await,
            Intent::WebResearch => self.research(request, params, ctx).await,
            Intent::CodeDev => self.develop(request, params, ctx).await,
            Intent::Generic => self.chat(request, ctx).await,
        }
    }

    async fn chat(&self, request: &Request, ctx: &DispatchContext) -> Response {
        let prompt = self.build_prompt(&request.text, &ctx.history);
        match self.ask(&prompt, ctx).await {
            Ok(output) => Response::ok_text(request.id, output.text),
            Err(e) => Response::from_error(request.id, &e),
        }
    }

    /// System prompt, then recent history, then the task.
    pub fn build_prompt(&self, body: &str, history: &[ConversationTurn]) -> String {
        let mut prompt = String::new();
        if let Some(system) = self.settings.system_prompt.as_deref() {
            if !system.trim().is_empty() {
                prompt.push_str(system.trim());
                prompt.push_str("\n\n");
            }
        }
        if !history.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for turn in history {
                prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
            }
            prompt.push('\n');
        }
        prompt.push_str(body);
        prompt
    }

    async fn ask(&self, prompt: &str, ctx: &DispatchContext) -> Result<ToolOutput, GatewayError> {
        debug!("Asking tool: {}", log_preview(prompt));
        let options = InvokeOptions {
            cancel: ctx.cancel.clone(),
            progress: if ctx.forward_output {
                ctx.progress.clone()
            } else {
                None
            },
            ..Default::default()
        };
        self.tool.invoke(prompt, options).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Doubles shared by the pipeline tests.

    use super::*;
    use crate::collab::SearchHit;
    use crate::config::SecuritySection;
    use crate::types::DocFormat;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replies from a queue and records every prompt.
    #[derive(Default)]
    pub struct ScriptedTool {
        pub replies: Mutex<Vec<Result<String, GatewayError>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedTool {
        pub fn replying(replies: Vec<Result<String, GatewayError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::default(),
            })
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolInvoker for ScriptedTool {
        async fn invoke(&self, prompt: &str, _options: InvokeOptions) -> Result<ToolOutput, GatewayError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.is_empty() {
                Ok("default reply".to_string())
            } else {
                replies.remove(0)
            };
            reply.map(|text| ToolOutput {
                raw: text.clone(),
                text,
                elapsed: Duration::from_millis(1),
            })
        }
    }

    pub struct FakeRenderer {
        pub fail: bool,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn render(&self, content: &str, format: DocFormat) -> Result<Bytes, GatewayError> {
            if self.fail {
                Err(GatewayError::RenderFailed {
                    format,
                    reason: "renderer offline".to_string(),
                })
            } else {
                Ok(Bytes::from(content.to_string()))
            }
        }
    }

    pub struct FakeSearcher {
        pub hits: Result<Vec<SearchHit>, String>,
    }

    #[async_trait]
    impl Searcher for FakeSearcher {
        async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchHit>, GatewayError> {
            match &self.hits {
                Ok(hits) => Ok(hits.iter().take(limit).cloned().collect()),
                Err(reason) => Err(GatewayError::SearchFailed(reason.clone())),
            }
        }
    }

    pub fn hit(title: &str, url: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: url.to_string(),
            snippet: format!("about {}", title),
        }
    }

    pub fn context(blacklist: &[&str]) -> DispatchContext {
        let security = SecuritySection {
            command_blacklist: blacklist.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let policy = PolicySnapshot::compile(&security, "test").unwrap();
        DispatchContext::new(Arc::new(policy))
    }

    pub fn dispatcher(
        tool: Arc<ScriptedTool>,
        renderer_fails: bool,
        hits: Result<Vec<SearchHit>, String>,
        sandbox: Option<CodeSandbox>,
    ) -> CapabilityDispatcher {
        CapabilityDispatcher::new(
            tool,
            Arc::new(FakeRenderer {
                fail: renderer_fails,
            }),
            Arc::new(FakeSearcher { hits }),
            sandbox,
            DispatchSettings {
                capabilities: CapabilitiesSection::default(),
                system_prompt: None,
                document_title: "Doc".to_string(),
                documents_dir: None,
                web_max_results: 5,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::types::{IntentParams, ResponseStatus};

    #[tokio::test]
    async fn test_generic_returns_output_as_is() {
        let tool = ScriptedTool::replying(vec![Ok("Hello there".to_string())]);
        let d = dispatcher(tool.clone(), false, Ok(vec![]), None);
        let request = Request::new("u1", "hi");
        let response = d
            .dispatch(&Classification::generic(), &request, &context(&[]))
            .await;
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.payload.text(), "Hello there");
        assert_eq!(response.request_id, request.id);
    }

    #[tokio::test]
    async fn test_disabled_capability_uses_generic() {
        let tool = ScriptedTool::replying(vec![Ok("plain answer".to_string())]);
        let mut d = dispatcher(tool.clone(), false, Ok(vec![]), None);
        d.settings.capabilities.web_research = false;
        let classification = Classification {
            intent: Intent::WebResearch,
            params: IntentParams::default(),
        };
        let response = d
            .dispatch(&classification, &Request::new("u1", "search rust"), &context(&[]))
            .await;
        assert_eq!(response.payload.text(), "plain answer");
        assert_eq!(tool.prompts(), vec!["search rust".to_string()]);
    }

    #[tokio::test]
    async fn test_tool_failure_maps_to_status() {
        let tool = ScriptedTool::replying(vec![Err(GatewayError::ProcessTimeout {
            what: "claude".to_string(),
            timeout: std::time::Duration::from_secs(1),
            partial: "half an answer".to_string(),
        })]);
        let d = dispatcher(tool, false, Ok(vec![]), None);
        let response = d
            .dispatch(&Classification::generic(), &Request::new("u1", "hi"), &context(&[]))
            .await;
        assert_eq!(response.status, ResponseStatus::Timeout);
        assert!(response.payload.text().contains("half an answer"));
    }

    #[test]
    fn test_build_prompt_includes_system_and_history() {
        let tool = ScriptedTool::replying(vec![]);
        let mut d = dispatcher(tool, false, Ok(vec![]), None);
        d.settings.system_prompt = Some("You are helpful.".to_string());
        let history = vec![
            ConversationTurn::user("what is 2+2"),
            ConversationTurn::assistant("4"),
        ];
        let prompt = d.build_prompt("and times 3?", &history);
        assert_eq!(
            prompt,
            "You are helpful.\n\nConversation so far:\nuser: what is 2+2\nassistant: 4\n\nand times 3?"
        );
    }
}
