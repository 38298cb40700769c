//! Contract for the hosted build engine.
//!
//! Workers drive an external WebAssembly bundler through this trait. The
//! pool crate supplies the production implementation; tests substitute their
//! own to exercise dispatch without a compiled module.

pub mod fmt;

use esbox_proto::{BuildOptions, Diagnostic, OutputFile, RawFiles, TransformOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Raw transform output as returned by the engine, before stderr merging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransform {
    pub code: String,
    #[serde(default)]
    pub map: Option<String>,
    #[serde(default)]
    pub mangle_cache: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub legal_comments: Option<String>,
    #[serde(default)]
    pub warnings: Vec<Diagnostic>,
    #[serde(default)]
    pub stderr: String,
}

/// Raw build output as returned by the engine, before stderr merging and
/// outdir stripping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBuild {
    pub output_files: Vec<OutputFile>,
    #[serde(default)]
    pub metafile: Option<String>,
    #[serde(default)]
    pub mangle_cache: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub warnings: Vec<Diagnostic>,
    #[serde(default)]
    pub stderr: String,
}

/// Engine failure modes.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Structured compile diagnostics. Delivered to callers as a successful
    /// result carrying merged stderr, never as a protocol failure.
    #[error("engine reported {} error(s)", errors.len())]
    Diagnostics {
        errors: Vec<Diagnostic>,
        warnings: Vec<Diagnostic>,
    },

    /// Non-diagnostic failure: instantiation, ABI mismatch, trap.
    #[error("engine failure: {0}")]
    Failure(String),
}

impl EngineError {
    /// Fold this error into `(errors, warnings)` diagnostic lists, wrapping
    /// a non-diagnostic failure as a bare `{text}` entry.
    #[must_use]
    pub fn into_diagnostics(self) -> (Vec<Diagnostic>, Vec<Diagnostic>) {
        match self {
            Self::Diagnostics { errors, warnings } => (errors, warnings),
            Self::Failure(text) => (vec![Diagnostic::bare(text)], Vec::new()),
        }
    }
}

/// The build engine hosted by each worker.
pub trait Engine: Send {
    /// Compile a single source text.
    fn transform(
        &mut self,
        input: &str,
        options: &TransformOptions,
    ) -> Result<RawTransform, EngineError>;

    /// Bundle a project snapshot.
    fn build(&mut self, files: &RawFiles, options: &BuildOptions) -> Result<RawBuild, EngineError>;
}

/// Creates one engine instance per worker from the fetched artifact.
pub trait EngineFactory: Send + Sync {
    fn create(&self, version: &str, wasm: &[u8]) -> Result<Box<dyn Engine>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_wraps_as_bare_diagnostic() {
        let err = EngineError::Failure("module trapped".to_string());
        let (errors, warnings) = err.into_diagnostics();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text, "module trapped");
        assert!(errors[0].location.is_none());
        assert!(warnings.is_empty());
    }
}
