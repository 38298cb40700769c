//! Installer error types.

use std::fmt;
use std::io;

/// Installer error codes.
pub mod codes {
    pub const NPM_REGISTRY_ERROR: &str = "NPM_REGISTRY_ERROR";
    pub const NPM_FETCH_FAILED: &str = "NPM_FETCH_FAILED";
    pub const NPM_FETCH_TIMEOUT: &str = "NPM_FETCH_TIMEOUT";
    pub const NPM_WIRE_INVALID: &str = "NPM_WIRE_INVALID";
    pub const NPM_PACKAGE_JSON_INVALID: &str = "NPM_PACKAGE_JSON_INVALID";
    pub const NPM_CACHE_ERROR: &str = "NPM_CACHE_ERROR";
    pub const NPM_INTERNAL: &str = "NPM_INTERNAL";
}

/// Installer error carrying a stable code and a human-readable message.
#[derive(Debug)]
pub struct NpmError {
    code: &'static str,
    message: String,
}

impl NpmError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_REGISTRY_ERROR, msg)
    }

    pub fn fetch_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_FETCH_FAILED, msg)
    }

    #[must_use]
    pub fn timeout(name: &str, version: &str) -> Self {
        Self::new(
            codes::NPM_FETCH_TIMEOUT,
            format!("Timed out fetching {name}@{version}"),
        )
    }

    pub fn wire_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_WIRE_INVALID, msg)
    }

    pub fn package_json_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_PACKAGE_JSON_INVALID, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_INTERNAL, msg)
    }
}

impl fmt::Display for NpmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for NpmError {}

impl From<io::Error> for NpmError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::NPM_CACHE_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for NpmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(codes::NPM_FETCH_TIMEOUT, format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(codes::NPM_REGISTRY_ERROR, format!("Connection failed: {e}"))
        } else {
            Self::new(codes::NPM_FETCH_FAILED, e.to_string())
        }
    }
}

impl From<serde_json::Error> for NpmError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::NPM_PACKAGE_JSON_INVALID, format!("Invalid JSON: {e}"))
    }
}
