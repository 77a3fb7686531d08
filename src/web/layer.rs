//! Execution coordinator: the axum middleware that drives a trace session.
//!
//! For untraced requests the middleware forwards to the handler with no
//! extra concurrency. For traced requests the handler runs on a background
//! task against a buffered response; the originating task waits on a
//! one-shot completion signal (fired by normal completion or by a
//! breakpoint halt) and answers with the rendered trace instead of the
//! handler's real output. The handler is never cancelled: after a halt it
//! keeps running, but every further tree mutation is a silent no-op and
//! its buffered output is discarded.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::oneshot;

use crate::config::TraceConfig;
use crate::trace::format::{header_dump, pretty_json};
use crate::trace::node::BlockOptions;
use crate::trace::tree::TraceSession;

/// Extractor handing instrumented handlers the current trace session.
///
/// Falls back to a shared disabled session when the middleware is not
/// installed, so instrumentation degrades to no-ops instead of failing.
#[derive(Clone)]
pub struct Trace(pub Arc<TraceSession>);

impl std::ops::Deref for Trace {
    type Target = TraceSession;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Trace
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Arc<TraceSession>>()
            .cloned()
            .map(Trace)
            .unwrap_or_else(|| Trace(TraceSession::disabled())))
    }
}

/// Middleware fn; install with
/// `axum::middleware::from_fn_with_state(config, trace_layer)`.
pub async fn trace_layer(
    State(config): State<TraceConfig>,
    mut req: Request,
    next: Next,
) -> Response {
    let active = req.headers().contains_key(config.header.as_str());
    let breakpoint = query_param(req.uri(), &config.param);
    let session = Arc::new(TraceSession::new(active, &breakpoint));
    req.extensions_mut().insert(session.clone());

    if !session.is_active() {
        return next.run(req).await;
    }

    tracing::debug!(breakpoint = %breakpoint, "tracing request");
    let (tx, rx) = oneshot::channel();
    session.set_notifier(tx);
    tokio::spawn(run_traced(session.clone(), req, next));

    // Satisfied by handler completion or by a breakpoint halt, whichever
    // comes first. A handler that never returns hangs the request; there
    // is deliberately no timeout.
    let _ = rx.await;

    (
        [(header::CONTENT_TYPE, "text/html")],
        session.render(),
    )
        .into_response()
}

/// Background task for one traced request: record request metadata, run
/// the handler against a buffered response, record the response and the
/// timing summary, signal completion.
async fn run_traced(session: Arc<TraceSession>, req: Request, next: Next) {
    let request_headers = req.headers().clone();

    let s_request = session.start_section("Request", 0);
    session.add_block(
        "Headers",
        &header_dump(&request_headers),
        &BlockOptions {
            parent: s_request,
            id: "RequestHeaders".to_string(),
            ..Default::default()
        },
    );
    close_section(&session, s_request);

    // Placeholder the handler's own instrumentation nests under.
    let s_app = session.start_section("Application", 0);
    close_section(&session, s_app);

    session.start_timer("total");
    let response = next.run(req).await;
    session.stop_timer("total");

    // Buffer the real response; it is never transmitted.
    let (parts, body) = response.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();

    let mut times = serde_json::Map::new();
    for result in session.durations() {
        times.insert(
            result.name,
            serde_json::Value::String(format!("{:?}", result.total)),
        );
    }
    let times_json = serde_json::Value::Object(times).to_string();

    let status = parts.status;
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let s_response = session.start_section("Response", 0);
    let s_info = session.start_section_info(s_response);
    session.add_block(
        "Headers",
        &header_dump(&parts.headers),
        &BlockOptions {
            parent: s_info,
            id: "ResponseHeaders".to_string(),
            ..Default::default()
        },
    );
    close_section_info(&session, s_info);

    let body_html = if content_type.starts_with("application/json") {
        pretty_json(std::str::from_utf8(&body).unwrap_or_default())
    } else {
        String::new()
    };
    session.add_block(
        "Body",
        &body_html,
        &BlockOptions {
            parent: s_response,
            id: "ResponseBody".to_string(),
            is_error: status.as_u16() < 200 || status.as_u16() >= 400,
            footer: vec![
                ("HTTP Code".to_string(), status.as_u16().to_string()),
                ("Content-type".to_string(), content_type),
            ],
        },
    );
    close_section(&session, s_response);

    session.add_block(
        "Execution times",
        &pretty_json(&times_json),
        &BlockOptions {
            id: "ExecutionTimes".to_string(),
            ..Default::default()
        },
    );

    session.notify_done();
}

fn close_section(session: &TraceSession, index: usize) {
    if let Err(err) = session.end_section(index) {
        tracing::warn!(error = %err, index, "failed to close trace section");
    }
}

fn close_section_info(session: &TraceSession, index: usize) {
    if let Err(err) = session.end_section_info(index) {
        tracing::warn!(error = %err, index, "failed to close trace section info");
    }
}

fn query_param(uri: &Uri, name: &str) -> String {
    uri.query()
        .unwrap_or_default()
        .split('&')
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then(|| urlencoding::decode(value).unwrap_or_default().into_owned())
        })
        .unwrap_or_default()
}
