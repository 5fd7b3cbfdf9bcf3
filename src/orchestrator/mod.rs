//! Request entry point.
//!
//! Gate order is fixed: access, rate limit, content filter, then the command
//! guard for direct commands. A request stopped by a gate gets its response
//! without any subprocess being spawned. Requests that pass wait in their
//! user's lane and are then classified and dispatched.

pub mod history;
pub mod lanes;

pub use history::ConversationHistory;
pub use lanes::{LaneTicket, UserLanes};

use crate::collab::{
    searcher_from_section, ChatTransport, CommandInstaller, DocumentRenderer,
};
use crate::config::GatewayConfig;
use crate::dispatch::classify::{self, analysis_prompt, params_for, parse_tool_analysis};
use crate::dispatch::{CapabilityDispatcher, CodeSandbox, DispatchContext, DispatchSettings};
use crate::error::GatewayError;
use crate::gate::{CommandDecision, PolicySnapshot, PolicyStore, RateDecision, RateLimiter, ScanResult};
use crate::logging::log_preview;
use crate::process::{InvokeOptions, ProcessClient, ProcessPool};
use crate::types::{Classification, ConversationTurn, Request, Response};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub analysis_use_tool: bool,
    pub notice: String,
    pub forward_output: bool,
    pub context_turns: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            analysis_use_tool: config.analysis.use_tool,
            notice: config.progress.notice.clone(),
            forward_output: config.progress.forward_output,
            context_turns: config.history.context_turns,
        }
    }
}

/// Pre-built components, for callers that wire their own collaborators.
pub struct OrchestratorParts {
    pub policy: Arc<PolicyStore>,
    pub limiter: RateLimiter,
    pub dispatcher: CapabilityDispatcher,
    pub transport: Arc<dyn ChatTransport>,
    pub lanes: UserLanes,
    pub history: ConversationHistory,
    pub settings: OrchestratorSettings,
}

pub struct Orchestrator {
    policy: Arc<PolicyStore>,
    limiter: RateLimiter,
    dispatcher: CapabilityDispatcher,
    transport: Arc<dyn ChatTransport>,
    lanes: Arc<UserLanes>,
    history: ConversationHistory,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            policy: parts.policy,
            limiter: parts.limiter,
            dispatcher: parts.dispatcher,
            transport: parts.transport,
            lanes: Arc::new(parts.lanes),
            history: parts.history,
            settings: parts.settings,
        }
    }

    /// Wire the production components. Fails when the policy does not
    /// compile or the AI tool cannot be found.
    pub fn from_config(
        config: &GatewayConfig,
        source: &str,
        transport: Arc<dyn ChatTransport>,
    ) -> Result<Self> {
        let snapshot = PolicySnapshot::compile(&config.security, source)?;
        let pool = ProcessPool::from_section(&config.concurrency);
        let client = ProcessClient::locate(config.tool.clone(), pool.clone())
            .with_context(|| "Failed to locate the AI tool")?;

        let installer = Arc::new(CommandInstaller::new(
            config.code_execution.install_command.clone(),
            INSTALL_TIMEOUT,
        ));
        let sandbox = CodeSandbox::from_section(&config.code_execution, pool, installer);
        let dispatcher = CapabilityDispatcher::new(
            Arc::new(client),
            Arc::new(DocumentRenderer::from_section(&config.documents)),
            searcher_from_section(&config.web),
            sandbox,
            DispatchSettings::from_config(config),
        );

        info!(
            "🚀 Gateway ready (policy {}, pool {}, {} per user)",
            snapshot.short_fingerprint(),
            config.concurrency.pool_size,
            config.concurrency.per_user
        );
        Ok(Self::new(OrchestratorParts {
            policy: Arc::new(PolicyStore::new(snapshot)),
            limiter: RateLimiter::from_section(&config.rate_limit),
            dispatcher,
            transport,
            lanes: UserLanes::from_section(&config.concurrency),
            history: ConversationHistory::from_section(&config.history),
            settings: OrchestratorSettings::from_config(config),
        }))
    }

    /// Store shared with the hot reloader.
    pub fn policy_store(&self) -> Arc<PolicyStore> {
        self.policy.clone()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn receive(&self, user: &str, text: &str) -> Request {
        let request = Request::new(user, text);
        debug!("📨 {} from {}: {}", request.id, user, log_preview(text));
        request
    }

    /// Receive, handle and send. Returns the response that was sent.
    pub async fn process(&self, user: &str, text: &str) -> Response {
        let request = self.receive(user, text);
        let response = self.handle(&request).await;
        if let Err(e) = self.transport.send(user, &response.payload).await {
            error!("❌ Failed to deliver response {} to {}: {:#}", request.id, user, e);
        }
        response
    }

    /// Cancel everything `user` has waiting or running.
    pub fn cancel(&self, user: &str) -> usize {
        let cancelled = self.lanes.cancel(user);
        if cancelled > 0 {
            info!("🛑 Cancelled {} request(s) of {}", cancelled, user);
        }
        cancelled
    }

    /// Produce the single response owed to `request`.
    pub async fn handle(&self, request: &Request) -> Response {
        let policy = self.policy.current().await;

        if let Err(e) = self.check_gates(request, &policy) {
            info!("🚫 Request {} from {} stopped at the gate: {}", request.id, request.user, e);
            return Response::from_error(request.id, &e);
        }

        let ticket = match self.lanes.enter(&request.user, request.id).await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!("⚠️  Request {} from {} not admitted: {}", request.id, request.user, e);
                return Response::from_error(request.id, &e);
            }
        };

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<String>();
        let forwarder = {
            let transport = self.transport.clone();
            let user = request.user.clone();
            tokio::spawn(async move {
                while let Some(line) = progress_rx.recv().await {
                    if let Err(e) = transport.progress(&user, &line).await {
                        debug!("Progress line for {} not delivered: {}", user, e);
                    }
                }
            })
        };

        if !self.settings.notice.trim().is_empty() {
            let _ = progress_tx.send(self.settings.notice.clone());
        }

        let ctx = DispatchContext {
            policy,
            history: self.history.recent(&request.user, self.settings.context_turns),
            cancel: ticket.cancel_token(),
            progress: Some(progress_tx),
            forward_output: self.settings.forward_output,
        };

        let classification = self.classify(request, &ctx).await;
        info!("🧭 Request {} from {} classified as {}", request.id, request.user, classification.intent);
        let response = self.dispatcher.dispatch(&classification, request, &ctx).await;
        drop(ctx);
        drop(ticket);

        // Deliver pending progress lines before the final answer
        if let Err(e) = forwarder.await {
            debug!("Progress forwarder ended abnormally: {}", e);
        }

        if response.is_ok() {
            self.history.record(&request.user, ConversationTurn::user(request.text.clone()));
            self.history.record(
                &request.user,
                ConversationTurn::assistant(response.payload.text().to_string()),
            );
        }
        info!(
            "📤 Request {} from {} finished: {}",
            request.id, request.user, response.status
        );
        response
    }

    fn check_gates(&self, request: &Request, policy: &PolicySnapshot) -> Result<(), GatewayError> {
        let user = &request.user;
        if !policy.access.is_allowed(user) {
            return Err(GatewayError::Unauthorized { user: user.clone() });
        }

        if policy.access.bypasses_rate_limit(user) {
            debug!("Admin {} bypasses the rate limiter", user);
        } else if let RateDecision::Deny { reason } = self.limiter.check(user) {
            return Err(GatewayError::RateLimited { reason });
        }

        if policy.access.bypasses_content_filter(user) {
            debug!("Admin {} bypasses the content filter", user);
        } else if let ScanResult::Flagged { rule_id, reason } = policy.content_filter.scan(&request.text) {
            return Err(GatewayError::ContentRejected { rule_id, reason });
        }

        if let Some(command) = classify::direct_command(&request.text) {
            if let CommandDecision::Reject { reason } = policy.command_guard.authorize(&command) {
                return Err(GatewayError::CommandRejected { command, reason });
            }
        }
        Ok(())
    }

    async fn classify(&self, request: &Request, ctx: &DispatchContext) -> Classification {
        let keywords = classify::classify(&request.text);
        if !self.settings.analysis_use_tool || keywords.params.command.is_some() {
            return keywords;
        }

        let options = InvokeOptions {
            cancel: ctx.cancel.clone(),
            ..Default::default()
        };
        match self
            .dispatcher
            .tool()
            .invoke(&analysis_prompt(&request.text), options)
            .await
        {
            Ok(output) => match parse_tool_analysis(&output.text) {
                Some(intent) => Classification {
                    intent,
                    params: params_for(intent, &request.text),
                },
                None => {
                    debug!("Tool analysis unreadable, using keywords: {}", log_preview(&output.text));
                    keywords
                }
            },
            Err(e) => {
                warn!("⚠️  Tool analysis failed, using keywords: {}", e);
                keywords
            }
        }
    }
}
