//! Response wrapper written by valves
//!
//! Valves write into a [`ServletResponse`]; once the unit finishes, its
//! content is copied onto the outgoing HTTP response.

use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;

use super::error::{AppError, AppResult};

/// Standard content types
pub mod content_type {
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const APPLICATION_JSON: &str = "application/json";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Still being written by the pipeline
    Initial,
    /// Handed back to the hosting server
    Dispatch,
}

#[derive(Debug, Clone)]
pub struct ServletResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    state: ResponseState,
}

impl Default for ServletResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl ServletResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            state: ResponseState::Initial,
        }
    }

    /// Plain-text error response carrying a diagnostic message
    pub fn failure(status: StatusCode, message: &str) -> Self {
        let mut resp = Self::new();
        resp.status = status;
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type::TEXT_PLAIN),
        );
        resp.body.extend_from_slice(message.as_bytes());
        resp
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn insert_header(&mut self, name: &str, value: &str) -> AppResult<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::Validation(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::Validation(format!("Invalid header value '{value}': {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    pub fn set_body(&mut self, body: &[u8]) {
        self.body.clear();
        self.body.extend_from_slice(body);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replace the body with a JSON document
    pub fn write_json<T: Serialize>(&mut self, status: StatusCode, data: &T) -> AppResult<()> {
        let json = serde_json::to_vec(data)?;
        self.status = status;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type::APPLICATION_JSON),
        );
        self.set_body(&json);
        Ok(())
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    pub fn set_state(&mut self, state: ResponseState) {
        self.state = state;
    }

    /// Copy status, headers and body onto the outgoing HTTP response
    pub fn copy_to_http_response(&self, response: &mut http::Response<Bytes>) {
        *response.status_mut() = self.status;
        for (name, value) in &self.headers {
            response.headers_mut().append(name.clone(), value.clone());
        }
        *response.body_mut() = Bytes::copy_from_slice(&self.body);
    }

    pub fn into_http_response(self) -> http::Response<Bytes> {
        let mut response = http::Response::new(Bytes::new());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        *response.body_mut() = self.body.freeze();
        response
    }
}
