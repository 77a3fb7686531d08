//! Traced outbound HTTP requests.
//!
//! Wraps a GET in an "HTTP Request" section so handler-issued calls show
//! up in the dump tree: a URL block closed with status metadata, plus a
//! section-info carrying the response headers and body. Runs under the
//! shared `Http-Requests` timer.

use axum::body::Bytes;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};

use crate::trace::format::{escape_html, header_dump};
use crate::trace::node::BlockOptions;
use crate::trace::tree::TraceSession;

/// Perform a GET and record it under `parent` in the dump tree.
/// Returns the response status and collected body.
pub async fn traced_get(
    session: &TraceSession,
    url: &str,
    parent: usize,
) -> anyhow::Result<(StatusCode, Bytes)> {
    let s_request = session.start_section("HTTP Request", parent);
    let url_html = format!(
        "<pre class=\"code\"><a href=\"{url}\" target=\"_blank\">{}</a></pre>",
        escape_html(url)
    );
    let url_block = session.start_block(
        "URL",
        &url_html,
        &BlockOptions {
            parent: s_request,
            ..Default::default()
        },
    );

    session.start_timer("Http-Requests");
    let fetched = fetch(url).await;
    session.stop_timer("Http-Requests");
    let (status, headers, body) = fetched?;

    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    session.end_block(
        url_block,
        &BlockOptions {
            is_error: status.as_u16() >= 400,
            footer: vec![
                ("Status".to_string(), status.as_u16().to_string()),
                ("Content-type".to_string(), content_type),
                ("Content-length".to_string(), content_length),
            ],
            ..Default::default()
        },
    )?;

    let s_info = session.start_section_info(s_request);
    session.add_block(
        "Response-Header",
        &header_dump(&headers),
        &BlockOptions {
            parent: s_info,
            ..Default::default()
        },
    );
    session.add_block(
        "Response-Body",
        &format!(
            "<pre class=\"code\">{}</pre>",
            escape_html(std::str::from_utf8(&body).unwrap_or_default())
        ),
        &BlockOptions {
            parent: s_info,
            ..Default::default()
        },
    );
    session.end_section_info(s_info)?;
    session.end_section(s_request)?;

    Ok((status, body))
}

async fn fetch(url: &str) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
    let response = reqwest::get(url).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    Ok((status, headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Network-free check: a refused connection surfaces as an error and
    // leaves the session usable.
    #[tokio::test]
    async fn test_traced_get_propagates_connect_error() {
        let session = TraceSession::new(true, "");
        let result = traced_get(&session, "http://127.0.0.1:1/unreachable", 0).await;
        assert!(result.is_err());
        // The URL block stayed open; close_all still produces well-formed
        // output.
        session.close_all();
        let html = session.render();
        assert_eq!(
            html.matches("{\"cmd\": 1").count(),
            html.matches("{\"cmd\": 2}").count()
        );
    }

    #[tokio::test]
    async fn test_traced_get_is_noop_when_inactive() {
        let session = TraceSession::new(false, "");
        let result = traced_get(&session, "http://127.0.0.1:1/unreachable", 0).await;
        assert!(result.is_err());
        assert_eq!(session.render(), "");
    }
}
