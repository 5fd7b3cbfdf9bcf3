use super::{CapabilityDispatcher, DispatchContext};
use crate::logging::preview;
use crate::types::{DocFormat, IntentParams, Payload, Request, Response};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const PREVIEW_CHARS: usize = 500;

impl CapabilityDispatcher {
    pub(super) async fn generate_document(
        &self,
        request: &Request,
        params: &IntentParams,
        ctx: &DispatchContext,
    ) -> Response {
        let format = params.format.unwrap_or(DocFormat::Markdown);
        let body = format!(
            "Write the document requested below in Markdown. Use headings, lists and tables \
             where they help, and reply with the document only.\n\nRequest: {}",
            request.text
        );
        let prompt = self.build_prompt(&body, &ctx.history);

        let content = match self.ask(&prompt, ctx).await {
            Ok(output) => output.text,
            Err(e) => return Response::from_error(request.id, &e),
        };

        ctx.notify(format!("Rendering {} document...", format));
        let bytes = match self.renderer.render(&content, format).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("⚠️  {}; replying with text instead", e);
                return Response::ok_text(
                    request.id,
                    format!(
                        "{}\n\n(The {} file could not be produced: {}. The content is included above as text.)",
                        content.trim(),
                        format,
                        e
                    ),
                );
            }
        };

        let file_name = document_file_name(&self.settings.document_title, format, SystemTime::now());
        if let Some(dir) = &self.settings.documents_dir {
            let path = dir.join(&file_name);
            let written = match tokio::fs::create_dir_all(dir).await {
                Ok(()) => tokio::fs::write(&path, &bytes).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => info!("💾 Saved document to {}", path.display()),
                Err(e) => warn!("Failed to save {}: {}", path.display(), e),
            }
        }

        Response::ok(
            request.id,
            Payload::File {
                bytes,
                format,
                caption: format!(
                    "Document generated ({}).\n\nPreview:\n{}",
                    format,
                    preview(content.trim(), PREVIEW_CHARS)
                ),
                file_name,
            },
        )
    }
}

/// `<title>_<unix seconds>.<ext>` with the title reduced to file-name-safe
/// characters.
pub fn document_file_name(title: &str, format: DocFormat, now: SystemTime) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "document".to_string() } else { stem };
    let timestamp = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{}_{}.{}", stem, timestamp, format.extension())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::types::{Classification, Intent, ResponseStatus};
    use std::time::Duration;

    fn doc_request(format: DocFormat) -> Classification {
        Classification {
            intent: Intent::DocGen,
            params: IntentParams {
                format: Some(format),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_document_file_name() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(
            document_file_name("AI Generated/Doc", DocFormat::Pdf, now),
            "AI_Generated_Doc_1700000000.pdf"
        );
        assert_eq!(
            document_file_name("  ", DocFormat::Markdown, now),
            "document_1700000000.md"
        );
    }

    #[tokio::test]
    async fn test_rendered_document_is_a_file() {
        let tool = ScriptedTool::replying(vec![Ok("# Title\n\nBody".to_string())]);
        let d = dispatcher(tool, false, Ok(vec![]), None);
        let response = d
            .dispatch(&doc_request(DocFormat::Html), &Request::new("u1", "write a doc"), &context(&[]))
            .await;
        assert!(response.is_ok());
        match response.payload {
            Payload::File {
                format,
                file_name,
                caption,
                ..
            } => {
                assert_eq!(format, DocFormat::Html);
                assert!(file_name.starts_with("Doc_"));
                assert!(file_name.ends_with(".html"));
                assert!(caption.contains("# Title"));
            }
            other => panic!("expected a file, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_render_failure_degrades_to_text() {
        let tool = ScriptedTool::replying(vec![Ok("Quarterly numbers".to_string())]);
        let d = dispatcher(tool, true, Ok(vec![]), None);
        let response = d
            .dispatch(&doc_request(DocFormat::Pdf), &Request::new("u1", "a pdf report"), &context(&[]))
            .await;
        assert_eq!(response.status, ResponseStatus::Ok);
        assert!(matches!(response.payload, Payload::Text(_)));
        assert!(response.payload.text().starts_with("Quarterly numbers"));
        assert!(response.payload.text().contains("pdf"));
    }

    #[tokio::test]
    async fn test_document_is_saved_to_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ScriptedTool::replying(vec![Ok("saved body".to_string())]);
        let mut d = dispatcher(tool, false, Ok(vec![]), None);
        d.settings.documents_dir = Some(dir.path().join("docs"));
        let response = d
            .dispatch(&doc_request(DocFormat::Markdown), &Request::new("u1", "doc"), &context(&[]))
            .await;
        assert!(response.is_ok());
        let saved: Vec<_> = std::fs::read_dir(dir.path().join("docs")).unwrap().collect();
        assert_eq!(saved.len(), 1);
    }
}
