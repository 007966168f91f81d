//! Request context module
//!
//! The per-request value handed to route handlers: the inbound request
//! with its body already collected, paired with a buffered response slot
//! that the `json`/`text`/`status` helpers write through.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::fmt;

use super::response::log_build_error;
use crate::logger;

/// Request context encapsulating one in-flight request
///
/// Created by the router immediately before a handler runs and consumed
/// right after it returns; never shared across requests. The response slot
/// accepts exactly one write: the first of `json`, `text`, or `status`
/// wins, and later writes are logged and ignored. A handler that never
/// writes yields the transport default of 200 with an empty body.
pub struct RequestContext {
    /// The inbound request, body collected into memory
    pub request: Request<Bytes>,
    response: Option<Response<Full<Bytes>>>,
}

impl RequestContext {
    /// Wrap a collected request
    pub fn new(request: Request<Bytes>) -> Self {
        Self {
            request,
            response: None,
        }
    }

    /// Write a JSON response: content type, status line, serialized payload
    ///
    /// The payload is serialized before the response is finalized, so a
    /// failing serializer downgrades the write to a plain-text 500 instead
    /// of a half-built response.
    pub fn json<T>(&mut self, status: StatusCode, payload: &T)
    where
        T: Serialize + ?Sized,
    {
        if self.already_written("json") {
            return;
        }
        match serde_json::to_vec(payload) {
            Ok(body) => {
                let response = Response::builder()
                    .status(status)
                    .header("Content-Type", "application/json")
                    .body(Full::new(Bytes::from(body)))
                    .unwrap_or_else(|e| {
                        log_build_error("JSON", &e);
                        Response::new(Full::new(Bytes::new()))
                    });
                self.response = Some(response);
            }
            Err(e) => {
                logger::log_error(&format!(
                    "Failed to encode JSON response for {}: {e}",
                    self.request.uri().path()
                ));
                self.response = Some(plain_text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error encoding JSON response",
                ));
            }
        }
    }

    /// Write a plain-text response with the formatted string body
    ///
    /// Accepts anything displayable, so both string literals and
    /// `format_args!` work at the call site.
    pub fn text(&mut self, status: StatusCode, body: impl fmt::Display) {
        if self.already_written("text") {
            return;
        }
        self.response = Some(plain_text_response(status, &body.to_string()));
    }

    /// Write the status line with no body
    pub fn status(&mut self, status: StatusCode) {
        if self.already_written("status") {
            return;
        }
        let response = Response::builder()
            .status(status)
            .body(Full::new(Bytes::new()))
            .unwrap_or_else(|e| {
                log_build_error("status-only", &e);
                Response::new(Full::new(Bytes::new()))
            });
        self.response = Some(response);
    }

    /// Consume the context, yielding the finished response
    pub fn into_response(self) -> Response<Full<Bytes>> {
        self.response
            .unwrap_or_else(|| Response::new(Full::new(Bytes::new())))
    }

    /// First write wins; report and drop any later write
    fn already_written(&self, helper: &str) -> bool {
        if self.response.is_some() {
            logger::log_warning(&format!(
                "Superfluous {helper} write for {} {} ignored, response already finalized",
                self.request.method(),
                self.request.uri().path()
            ));
            true
        } else {
            false
        }
    }
}

/// Build plain-text response body with the canonical text content type
fn plain_text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|e| {
            log_build_error("text", &e);
            Response::new(Full::new(Bytes::new()))
        })
}
