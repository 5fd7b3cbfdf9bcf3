use super::{CapabilityDispatcher, DispatchContext};
use crate::collab::SearchHit;
use crate::logging::preview;
use crate::types::{IntentParams, Request, Response};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

const MAX_ANSWER_CHARS: usize = 2000;

impl CapabilityDispatcher {
    pub(super) async fn research(
        &self,
        request: &Request,
        params: &IntentParams,
        ctx: &DispatchContext,
    ) -> Response {
        let query = params
            .query
            .clone()
            .unwrap_or_else(|| request.text.trim().to_string());
        ctx.notify(format!("Searching the web for: {}", query));

        let hits = match self.searcher.search(&query, self.settings.web_max_results).await {
            Ok(hits) => {
                let total = hits.len();
                let safe: Vec<SearchHit> = hits.into_iter().filter(|hit| is_safe_url(&hit.url)).collect();
                if safe.len() < total {
                    debug!("Dropped {} unsafe search results", total - safe.len());
                }
                Ok(safe)
            }
            Err(e) => {
                warn!("⚠️  {}", e);
                Err(e)
            }
        };

        match hits {
            Ok(hits) if !hits.is_empty() => self.synthesize(request, &hits, ctx).await,
            Ok(_) => {
                self.answer_without_sources(request, "the search returned no usable results", ctx)
                    .await
            }
            Err(e) => self.answer_without_sources(request, &e.to_string(), ctx).await,
        }
    }

    async fn synthesize(&self, request: &Request, hits: &[SearchHit], ctx: &DispatchContext) -> Response {
        let body = format!(
            "Answer the user's question based on these search results. Refer to sources \
             by their number.\n\nQuestion: {}\n\nSearch results:\n{}",
            request.text,
            numbered_results(hits)
        );
        let prompt = self.build_prompt(&body, &ctx.history);

        match self.ask(&prompt, ctx).await {
            Ok(output) => Response::ok_text(
                request.id,
                format!(
                    "{}\n\n{}",
                    preview(output.text.trim(), MAX_ANSWER_CHARS),
                    sources_list(hits)
                ),
            ),
            // The snippets are still useful on their own
            Err(e) => Response::from_error_with_context(request.id, &e, &snippet_list(hits)),
        }
    }

    async fn answer_without_sources(&self, request: &Request, why: &str, ctx: &DispatchContext) -> Response {
        let prompt = self.build_prompt(&request.text, &ctx.history);
        match self.ask(&prompt, ctx).await {
            Ok(output) => Response::ok_text(
                request.id,
                format!(
                    "{}\n\n(Web search was unavailable: {}. This answer has no sources.)",
                    preview(output.text.trim(), MAX_ANSWER_CHARS),
                    why
                ),
            ),
            Err(e) => Response::from_error(request.id, &e),
        }
    }
}

fn numbered_results(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {}\n{}\n{}", i + 1, hit.title, hit.url, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn sources_list(hits: &[SearchHit]) -> String {
    let mut list = String::from("Sources:");
    for hit in hits {
        list.push_str(&format!("\n- [{}]({})", hit.title, hit.url));
    }
    list
}

fn snippet_list(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| format!("- {} ({}): {}", hit.title, hit.url, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Only public http(s) URLs may be shown to users or fed to the tool.
pub fn is_safe_url(url: &str) -> bool {
    let Some((scheme, rest)) = url.trim().split_once("://") else {
        return false;
    };
    if !matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https") {
        return false;
    }

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    let host = if let Some(bracketed) = host_port.strip_prefix('[') {
        match bracketed.split_once(']') {
            Some((host, _)) => host,
            None => return false,
        }
    } else {
        host_port.split(':').next().unwrap_or_default()
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    if host.is_empty() || host == "localhost" || host.ends_with(".localhost") {
        return false;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_public_v4(ip),
        Ok(IpAddr::V6(ip)) => is_public_v6(ip),
        Err(_) => true,
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let shared = a == 100 && (64..128).contains(&b);
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || shared)
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(v4);
    }
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
}
