//! HTTP helpers for the booking functions.

use std::collections::BTreeMap;

use lambda_http::http::Method;
use lambda_http::{Body, Request, RequestExt, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// Status and optional JSON body produced by a handler.
///
/// Failures carry no body: callers only ever see the status code.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Option<Value>,
}

impl Reply {
    /// Reply without a body.
    pub fn empty(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Reply with `data` serialized as the JSON body.
    pub fn json<T: Serialize>(status: u16, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(body) => Self {
                status,
                body: Some(body),
            },
            Err(e) => {
                error!("Failed to serialize response body: {}", e);
                Self::empty(500)
            }
        }
    }

    /// Convert into a runtime response.
    pub fn into_response(self) -> Result<Response<Body>, lambda_http::Error> {
        let builder = Response::builder().status(self.status);
        let response = match self.body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body)?))?,
            None => builder.body(Body::Empty)?,
        };
        Ok(response)
    }
}

/// The parts of an inbound request the handlers look at.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRequest {
    pub method: Method,
    /// Decoded body; `None` when the request has no body.
    pub body: Option<Value>,
    pub query: BTreeMap<String, String>,
}

impl FunctionRequest {
    pub fn from_request(event: &Request) -> Self {
        let query = event
            .query_string_parameters_ref()
            .map(|params| {
                let mut query = BTreeMap::new();
                for (key, value) in params.iter() {
                    query.entry(key.to_string()).or_insert_with(|| value.to_string());
                }
                query
            })
            .unwrap_or_default();

        Self {
            method: event.method().clone(),
            body: decode_body(event.body()),
            query,
        }
    }
}

/// JSON bodies decode to their value, anything else is kept as text.
pub fn decode_body(body: &Body) -> Option<Value> {
    let bytes: &[u8] = body.as_ref();
    if bytes.is_empty() {
        return None;
    }

    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}
