//! Normalized failure type for every fleet request.
//!
//! HTTP statuses the console understands are mirrored one-to-one; transport
//! failures that never produced a response get synthetic codes above 600.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResourceErrorCode {
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    Timeout = 408,
    Conflict = 409,
    UnprocessableEntity = 422,
    TooManyRequests = 429,
    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
    NetworkError = 700,
    RequestAborted = 800,
    ConnectionReset = 900,
    Unknown = 999,
}

impl ResourceErrorCode {
    pub const ALL: [Self; 17] = [
        Self::BadRequest,
        Self::Unauthorized,
        Self::Forbidden,
        Self::NotFound,
        Self::Timeout,
        Self::Conflict,
        Self::UnprocessableEntity,
        Self::TooManyRequests,
        Self::InternalServerError,
        Self::NotImplemented,
        Self::BadGateway,
        Self::ServiceUnavailable,
        Self::GatewayTimeout,
        Self::NetworkError,
        Self::RequestAborted,
        Self::ConnectionReset,
        Self::Unknown,
    ];

    /// Look up a known code; `None` for anything outside the closed set.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_u16() == code)
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "NotFound",
            Self::Timeout => "Timeout",
            Self::Conflict => "Conflict",
            Self::UnprocessableEntity => "UnprocessableEntity",
            Self::TooManyRequests => "TooManyRequests",
            Self::InternalServerError => "InternalServerError",
            Self::NotImplemented => "NotImplemented",
            Self::BadGateway => "BadGateway",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::GatewayTimeout => "GatewayTimeout",
            Self::NetworkError => "NetworkError",
            Self::RequestAborted => "RequestAborted",
            Self::ConnectionReset => "ConnectionReset",
            Self::Unknown => "Unknown",
        }
    }
}

impl core::fmt::Display for ResourceErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ResourceError {
    pub code: ResourceErrorCode,
    pub message: String,
    pub reason: Option<String>,
}

impl ResourceError {
    /// Error whose message defaults to the code name.
    #[must_use]
    pub fn new(code: ResourceErrorCode) -> Self {
        Self {
            code,
            message: code.name().to_string(),
            reason: None,
        }
    }

    #[must_use]
    pub fn with_message(code: ResourceErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code,
            message: if message.is_empty() {
                code.name().to_string()
            } else {
                message
            },
            reason: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    /// Map a numeric status onto the closed set, falling back to `Unknown`
    /// with a message naming the unexpected code.
    #[must_use]
    pub fn from_status(code: u16, message: Option<&str>, reason: Option<String>) -> Self {
        ResourceErrorCode::from_code(code).map_or_else(
            || {
                Self::with_message(
                    ResourceErrorCode::Unknown,
                    message.map_or_else(|| format!("Unknown error code: {code}"), str::to_string),
                )
                .with_reason(reason.clone())
            },
            |known| Self::with_message(known, message.unwrap_or_default()).with_reason(reason.clone()),
        )
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.code == ResourceErrorCode::RequestAborted
    }
}

/// Kubernetes `Status` object as returned in error bodies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct K8sStatus {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub code: Option<u16>,
    pub message: Option<String>,
    pub reason: Option<String>,
}

impl K8sStatus {
    /// A `Status` body that is not `Success`, if `body` is one.
    #[must_use]
    pub fn failure(body: &serde_json::Value) -> Option<Self> {
        if body.get("kind").and_then(serde_json::Value::as_str) != Some("Status") {
            return None;
        }
        let status: Self = serde_json::from_value(body.clone()).ok()?;
        (status.status.as_deref() != Some("Success")).then_some(status)
    }
}

impl From<kube::Error> for ResourceError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => Self::from_status(
                response.code,
                Some(response.message.as_str()),
                Some(response.reason).filter(|r| !r.is_empty()),
            ),
            kube::Error::HyperError(e) => Self::with_message(ResourceErrorCode::NetworkError, e.to_string()),
            kube::Error::SerdeError(e) => Self::with_message(ResourceErrorCode::BadRequest, e.to_string()),
            other => Self::with_message(ResourceErrorCode::Unknown, other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_message(ResourceErrorCode::BadRequest, err.to_string())
    }
}
