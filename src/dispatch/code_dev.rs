use super::extract::{
    code_blocks, command_candidates, embedded_commands, shell_commands, string_literals, CodeBlock,
    EmbeddedCommand,
};
use super::sandbox::{CodeSandbox, ExecutionReport};
use super::{CapabilityDispatcher, DispatchContext};
use crate::error::GatewayError;
use crate::gate::{CommandDecision, PolicySnapshot, ScanResult};
use crate::types::{IntentParams, Request, Response};
use tracing::{info, warn};

impl CapabilityDispatcher {
    pub(super) async fn develop(
        &self,
        request: &Request,
        params: &IntentParams,
        ctx: &DispatchContext,
    ) -> Response {
        if let Some(command) = &params.command {
            return self.run_direct(request, command, ctx).await;
        }

        let language = params
            .language
            .as_deref()
            .map(|language| format!(" in {}", language))
            .unwrap_or_default();
        let body = format!(
            "Write code{} for the request below. Put the code in fenced code blocks tagged \
             with their language, and put any shell commands needed to run it in a ```bash \
             block. Keep explanations short.\n\nRequest: {}",
            language, request.text
        );
        let prompt = self.build_prompt(&body, &ctx.history);

        let answer = match self.ask(&prompt, ctx).await {
            Ok(output) => output.text,
            Err(e) => return Response::from_error(request.id, &e),
        };

        let blocks = code_blocks(&answer);
        if let Err(e) = vet_generated_code(&answer, &blocks, &ctx.policy) {
            return Response::from_error(request.id, &e);
        }

        let Some(sandbox) = &self.sandbox else {
            return Response::ok_text(request.id, answer);
        };

        // An answer without fences may itself be the program
        let blocks = if blocks.is_empty() && !answer.trim().is_empty() {
            let whole = CodeBlock {
                language: None,
                code: answer.clone(),
            };
            if let Err(e) = vet_block(&whole, &ctx.policy) {
                return Response::from_error(request.id, &e);
            }
            vec![whole]
        } else {
            blocks
        };
        let Some(runnable) = blocks.iter().find(|block| is_runnable(sandbox, block)) else {
            info!("No runnable block in generated code for request {}", request.id);
            return Response::ok_text(request.id, answer);
        };

        ctx.notify("Running the generated code...");
        match execute_block(sandbox, runnable, &ctx.policy, ctx).await {
            Ok(report) => Response::ok_text(request.id, with_execution(&answer, &report)),
            Err(e) => {
                warn!("⚠️  Generated code failed: {}", e);
                Response::from_error_with_context(request.id, &e, &answer)
            }
        }
    }

    async fn run_direct(&self, request: &Request, command: &str, ctx: &DispatchContext) -> Response {
        let Some(sandbox) = &self.sandbox else {
            return Response::from_error(
                request.id,
                &GatewayError::CommandRejected {
                    command: command.to_string(),
                    reason: "command execution is disabled".to_string(),
                },
            );
        };
        if let CommandDecision::Reject { reason } = ctx.policy.command_guard.authorize(command) {
            return Response::from_error(
                request.id,
                &GatewayError::CommandRejected {
                    command: command.to_string(),
                    reason,
                },
            );
        }

        match sandbox
            .run_command(command, &ctx.policy.command_guard, &ctx.cancel)
            .await
        {
            Ok(report) => {
                let output = report.stdout.trim_end();
                let output = if output.is_empty() { "(no output)" } else { output };
                Response::ok_text(request.id, format!("$ {}\n{}", command, output))
            }
            Err(e) => Response::from_error(request.id, &e),
        }
    }
}

/// Every command candidate must pass the command guard, and so must every
/// block. Nothing runs otherwise.
fn vet_generated_code(
    answer: &str,
    blocks: &[CodeBlock],
    policy: &PolicySnapshot,
) -> Result<(), GatewayError> {
    for candidate in command_candidates(answer) {
        authorize_line(&candidate, policy)?;
    }
    blocks.iter().try_for_each(|block| vet_block(block, policy))
}

/// Shell blocks are checked line by line. Scripts in other languages get
/// the commands they spawn authorized, every string literal checked against
/// the blacklist, and the content filter.
fn vet_block(block: &CodeBlock, policy: &PolicySnapshot) -> Result<(), GatewayError> {
    if block.is_shell() {
        return shell_commands(&block.code)
            .iter()
            .try_for_each(|line| authorize_line(line, policy));
    }

    let guard = &policy.command_guard;
    for embedded in embedded_commands(&block.code) {
        let decision = match &embedded {
            EmbeddedCommand::Line(line) => guard.authorize(line),
            EmbeddedCommand::Argv(argv) => guard.authorize_argv(argv),
        };
        if let CommandDecision::Reject { reason } = decision {
            return Err(GatewayError::CommandRejected {
                command: embedded.display(),
                reason,
            });
        }
    }
    for literal in string_literals(&block.code) {
        if let Some(reason) = guard.blacklisted(&literal) {
            return Err(GatewayError::CommandRejected {
                command: literal,
                reason,
            });
        }
    }

    if let ScanResult::Flagged { rule_id, reason } = policy.content_filter.scan(&block.code) {
        return Err(GatewayError::ContentRejected {
            rule_id,
            reason: format!("generated code {}", reason),
        });
    }
    Ok(())
}

fn authorize_line(command: &str, policy: &PolicySnapshot) -> Result<(), GatewayError> {
    match policy.command_guard.authorize(command) {
        CommandDecision::Permit => Ok(()),
        CommandDecision::Reject { reason } => Err(GatewayError::CommandRejected {
            command: command.to_string(),
            reason,
        }),
    }
}

fn is_runnable(sandbox: &CodeSandbox, block: &CodeBlock) -> bool {
    block.is_shell() || sandbox.supports(block.resolved_language())
}

/// Shell blocks always go through [`CodeSandbox::run_commands`], one
/// authorized command at a time.
async fn execute_block(
    sandbox: &CodeSandbox,
    block: &CodeBlock,
    policy: &PolicySnapshot,
    ctx: &DispatchContext,
) -> Result<ExecutionReport, GatewayError> {
    if block.is_shell() {
        let lines = shell_commands(&block.code);
        return sandbox
            .run_commands(&lines, &policy.command_guard, &ctx.cancel)
            .await;
    }
    sandbox
        .run_script(block.resolved_language(), &block.code, &policy.command_guard, &ctx.cancel)
        .await
}

fn with_execution(answer: &str, report: &ExecutionReport) -> String {
    let output = report.stdout.trim_end();
    let output = if output.is_empty() { "(no output)" } else { output };
    format!(
        "{}\n\nExecution output ({}, {:.1}s):\n```\n{}\n```",
        answer.trim_end(),
        report.language,
        report.elapsed.as_secs_f64(),
        output
    )
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{Classification, Intent, ResponseStatus};
    use tokio_test::assert_ok;

    fn code_request(command: Option<&str>) -> Classification {
        Classification {
            intent: Intent::CodeDev,
            params: IntentParams {
                command: command.map(str::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_vet_rejects_blacklisted_candidate() {
        let policy = context(&["rm -rf"]).policy;
        let answer = "Clean up with:\n```bash\nls\nsudo rm -fr /var/tmp/cache\n```";
        let err = vet_generated_code(answer, &code_blocks(answer), &policy).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandRejected);
        assert!(err.to_string().contains("rm -fr"));
    }

    #[test]
    fn test_vet_scans_scripts_with_content_filter() {
        let mut security = crate::config::SecuritySection::default();
        security.content_filter.blocked_keywords = vec!["shutil.rmtree".to_string()];
        let policy = PolicySnapshot::compile(&security, "test").unwrap();
        let answer = "```python\nimport shutil\nshutil.rmtree('/')\n```";
        let err = vet_generated_code(answer, &code_blocks(answer), &policy).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContentRejected);
    }

    #[test]
    fn test_vet_authorizes_commands_spawned_by_scripts() {
        let policy = context(&["rm -rf"]).policy;
        let answers = [
            "```python\nimport os\nos.system(\"rm -rf /\")\n```",
            "```py\nimport subprocess\nsubprocess.run([\"rm\", \"-rf\", \"/\"])\n```",
            "```javascript\nconst { execSync } = require('child_process');\nexecSync('rm -rf /');\n```",
            "```go\npackage main\nfunc main() { exec.Command(\"sh\", \"-c\", \"rm -rf /\").Run() }\n```",
            // Literal assigned first and passed by name
            "```python\nimport os\ntarget = \"rm -rf /home\"\nos.system(target)\n```",
        ];
        for answer in answers {
            let err = vet_generated_code(answer, &code_blocks(answer), &policy).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CommandRejected, "{answer}");
        }

        let harmless = "```python\nimport subprocess\nsubprocess.run([\"ls\", \"-la\"])\nprint('done')\n```";
        assert_ok!(vet_generated_code(harmless, &code_blocks(harmless), &policy));
    }

    #[test]
    fn test_vet_checks_untagged_shell_blocks() {
        let policy = context(&["rm -rf"]).policy;
        let answer = "```\n#!/bin/sh\nrm -rf /srv/data\n```";
        let err = vet_generated_code(answer, &code_blocks(answer), &policy).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandRejected);
    }

    #[tokio::test]
    async fn test_rejected_code_is_not_returned() {
        let tool = ScriptedTool::replying(vec![Ok("```sh\nrm -rf /\n```".to_string())]);
        let d = dispatcher(tool, false, Ok(vec![]), None);
        let response = d
            .dispatch(&code_request(None), &Request::new("u1", "wipe disk"), &context(&["rm -rf"]))
            .await;
        assert_eq!(response.status, ResponseStatus::Denied);
        assert!(!response.payload.text().contains("rm -rf /\n"));
    }

    #[tokio::test]
    async fn test_code_returned_when_execution_disabled() {
        let answer = "```python\nprint('hi')\n```";
        let tool = ScriptedTool::replying(vec![Ok(answer.to_string())]);
        let d = dispatcher(tool, false, Ok(vec![]), None);
        let response = d
            .dispatch(&code_request(None), &Request::new("u1", "hello world"), &context(&[]))
            .await;
        assert!(response.is_ok());
        assert_eq!(response.payload.text(), answer);
    }

    #[tokio::test]
    async fn test_direct_command_needs_execution_enabled() {
        let tool = ScriptedTool::replying(vec![]);
        let d = dispatcher(tool.clone(), false, Ok(vec![]), None);
        let response = d
            .dispatch(&code_request(Some("ls")), &Request::new("u1", "$ ls"), &context(&[]))
            .await;
        assert_eq!(response.status, ResponseStatus::Denied);
        assert!(tool.prompts().is_empty());
    }

    #[cfg(unix)]
    mod execution {
        use super::*;
        use crate::collab::CommandInstaller;
        use crate::process::ProcessPool;
        use std::collections::BTreeMap;
        use std::sync::Arc;
        use std::time::Duration;

        fn sandbox(dir: &std::path::Path) -> CodeSandbox {
            CodeSandbox::new(
                dir.to_path_buf(),
                Duration::from_secs(5),
                BTreeMap::from([("shell".to_string(), vec!["sh".to_string()])]),
                ProcessPool::new(2, Duration::from_secs(5)),
                Arc::new(CommandInstaller::default()),
            )
        }

        #[tokio::test]
        async fn test_generated_shell_block_runs() {
            let dir = tempfile::tempdir().unwrap();
            let answer = "Try this:\n```bash\necho generated\n```";
            let tool = ScriptedTool::replying(vec![Ok(answer.to_string())]);
            let d = dispatcher(tool, false, Ok(vec![]), Some(sandbox(dir.path())));
            let response = d
                .dispatch(&code_request(None), &Request::new("u1", "say hi"), &context(&[]))
                .await;
            assert!(response.is_ok());
            let text = response.payload.text();
            assert!(text.starts_with("Try this:"));
            assert!(text.contains("Execution output (shell"));
            assert!(text.contains("generated"));
        }

        #[tokio::test]
        async fn test_failed_execution_keeps_code() {
            let dir = tempfile::tempdir().unwrap();
            let answer = "```bash\nls /definitely/not/here\n```";
            let tool = ScriptedTool::replying(vec![Ok(answer.to_string())]);
            let d = dispatcher(tool, false, Ok(vec![]), Some(sandbox(dir.path())));
            let response = d
                .dispatch(&code_request(None), &Request::new("u1", "list"), &context(&[]))
                .await;
            assert_eq!(response.status, ResponseStatus::Error);
            assert!(response.payload.text().contains("ls /definitely/not/here"));
        }

        #[tokio::test]
        async fn test_untagged_shebang_block_is_authorized_before_running() {
            let dir = tempfile::tempdir().unwrap();
            let victim = tempfile::tempdir().unwrap();
            std::fs::write(victim.path().join("keep.txt"), "data").unwrap();
            let answer = format!(
                "```\n#!/bin/sh\nrm -rf {}\necho wiped\n```",
                victim.path().display()
            );
            let tool = ScriptedTool::replying(vec![Ok(answer)]);
            let d = dispatcher(tool, false, Ok(vec![]), Some(sandbox(dir.path())));
            let response = d
                .dispatch(&code_request(None), &Request::new("u1", "clean up"), &context(&["rm -rf"]))
                .await;
            assert_eq!(response.status, ResponseStatus::Denied);
            assert!(victim.path().join("keep.txt").exists());
        }

        #[tokio::test]
        async fn test_untagged_shebang_block_runs_line_by_line() {
            let dir = tempfile::tempdir().unwrap();
            let answer = "```\n#!/bin/sh\necho first\necho second\n```";
            let tool = ScriptedTool::replying(vec![Ok(answer.to_string())]);
            let d = dispatcher(tool, false, Ok(vec![]), Some(sandbox(dir.path())));
            let response = d
                .dispatch(&code_request(None), &Request::new("u1", "say hi"), &context(&[]))
                .await;
            assert!(response.is_ok());
            let text = response.payload.text();
            assert!(text.contains("Execution output (shell"));
            assert!(text.contains("first"));
            assert!(text.contains("second"));
        }

        #[tokio::test]
        async fn test_direct_command_runs() {
            let dir = tempfile::tempdir().unwrap();
            let tool = ScriptedTool::replying(vec![]);
            let d = dispatcher(tool.clone(), false, Ok(vec![]), Some(sandbox(dir.path())));
            let response = d
                .dispatch(
                    &code_request(Some("echo direct")),
                    &Request::new("u1", "$ echo direct"),
                    &context(&[]),
                )
                .await;
            assert!(response.is_ok());
            assert_eq!(response.payload.text(), "$ echo direct\ndirect");
            assert!(tool.prompts().is_empty());
        }

        #[tokio::test]
        async fn test_direct_command_is_authorized() {
            let dir = tempfile::tempdir().unwrap();
            let tool = ScriptedTool::replying(vec![]);
            let d = dispatcher(tool, false, Ok(vec![]), Some(sandbox(dir.path())));
            let response = d
                .dispatch(
                    &code_request(Some("rm -rf /")),
                    &Request::new("u1", "$ rm -rf /"),
                    &context(&["rm -rf"]),
                )
                .await;
            assert_eq!(response.status, ResponseStatus::Denied);
        }
    }
}
