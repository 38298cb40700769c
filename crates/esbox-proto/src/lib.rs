#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Frame and payload types for esbox worker IPC.
//!
//! This crate defines the request/reply/progress types exchanged between the
//! pool dispatcher and its worker tasks, plus the serialisable file-system
//! operation table used to mirror a worker-side FS into the shared FS.
//!
//! ## Framing
//! Every request carries a correlation id; every reply carries the same id
//! and a status. `resolve` and `reject` are terminal: the dispatcher frees
//! the correlation slot when it routes one. `progress` frames are
//! non-terminal and are delivered to the submitting task's progress sink in
//! post order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Protocol schema version. Bump when changing message format.
pub const PROTO_SCHEMA_VERSION: u32 = 1;

/// Error codes for protocol-level failures.
///
/// Engine diagnostics are *not* protocol errors: they travel inside a
/// `resolve` payload. Rejects are reserved for harness failures.
pub mod codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

    // Pool lifecycle
    pub const POOL_BOOTSTRAP_FAILED: &str = "POOL_BOOTSTRAP_FAILED";
    pub const POOL_RELOAD: &str = "POOL_RELOAD";
    pub const POOL_QUEUE_TIMEOUT: &str = "POOL_QUEUE_TIMEOUT";
    pub const POOL_WORKER_LOST: &str = "POOL_WORKER_LOST";

    // Worker setup
    pub const WORKER_SETUP_FAILED: &str = "WORKER_SETUP_FAILED";
    pub const ENGINE_VERSION_UNSUPPORTED: &str = "ENGINE_VERSION_UNSUPPORTED";
    pub const ENGINE_FETCH_FAILED: &str = "ENGINE_FETCH_FAILED";

    // Install forwarded through the worker
    pub const NPM_INSTALL_FAILED: &str = "NPM_INSTALL_FAILED";
}

/// Reason attached to tasks rejected by a pool reload.
pub const RELOAD_ABORT_REASON: &str = "Task aborted due to reload";

/// A project snapshot: normalised virtual path to file text.
pub type RawFiles = BTreeMap<String, String>;

/// One file record in the virtual file system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File text. Binary payloads are decoded to text before insertion.
    pub contents: String,
    /// Marks a build entry point.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_entry: bool,
    /// Marks a JS entry point (HTML projects keep both flags).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_js_entry: bool,
}

impl FileRecord {
    #[must_use]
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            is_entry: false,
            is_js_entry: false,
        }
    }
}

/// Serialisable file-system operation table.
///
/// Wire tags carry the `fs__` prefix so a remote twin can re-expose the
/// operation set under the same mangled names it was called with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum FsOp {
    #[serde(rename = "fs__write_file")]
    WriteFile { path: String, contents: String },
    #[serde(rename = "fs__append_file")]
    AppendFile { path: String, contents: String },
    #[serde(rename = "fs__delete_file")]
    DeleteFile { path: String },
    #[serde(rename = "fs__set_files")]
    SetFiles { files: BTreeMap<String, FileRecord> },
    #[serde(rename = "fs__rmdir")]
    Rmdir { path: String },
    #[serde(rename = "fs__chdir")]
    Chdir { path: String },
}

/// Single-file transform options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Loader to parse the input with (e.g. `jsx`, `tsx`).
    pub loader: Option<String>,
    pub target: String,
    pub format: String,
    pub sourcemap: bool,
    pub minify: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            loader: None,
            target: "chrome67".to_string(),
            format: "esm".to_string(),
            sourcemap: true,
            minify: false,
        }
    }
}

/// Project bundle options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOptions {
    pub entry_points: Vec<String>,
    /// Output directory inside the worker FS. The dispatcher pins this to
    /// `/dist/` and strips it from returned paths.
    pub outdir: Option<String>,
    pub target: String,
    pub format: String,
    pub splitting: bool,
    pub bundle: bool,
    pub sourcemap: bool,
    pub minify: bool,
    pub metafile: bool,
    /// Extension to loader mapping.
    pub loader: BTreeMap<String, String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            entry_points: Vec::new(),
            outdir: None,
            target: "chrome67".to_string(),
            format: "esm".to_string(),
            splitting: true,
            bundle: true,
            sourcemap: true,
            minify: false,
            metafile: false,
            loader: default_loader_map(),
        }
    }
}

/// The default extension → loader mapping applied to bundles.
#[must_use]
pub fn default_loader_map() -> BTreeMap<String, String> {
    [
        (".js", "jsx"),
        (".jsx", "jsx"),
        (".ts", "tsx"),
        (".tsx", "tsx"),
        (".css", "css"),
        (".json", "json"),
        (".svg", "dataurl"),
        (".png", "dataurl"),
        (".jpg", "dataurl"),
        (".gif", "dataurl"),
    ]
    .into_iter()
    .map(|(ext, loader)| (ext.to_string(), loader.to_string()))
    .collect()
}

/// A request dispatched to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Compile a single source text.
    Transform {
        input: String,
        options: TransformOptions,
    },

    /// Bundle a project from a path → text snapshot.
    Build {
        files: RawFiles,
        options: BuildOptions,
    },

    /// Run the dependency installer against a snapshot.
    NpmInstall {
        files: RawFiles,
        registry_base_url: String,
        /// Working directory for `package.json` lookup (default `/app`).
        cwd: Option<String>,
        /// Caller-supplied dependency overrides merged over the manifest.
        dependencies: BTreeMap<String, String>,
    },
}

/// Source location attached to an engine diagnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub line_text: String,
}

/// One engine error or warning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<DiagnosticLocation>,
}

impl Diagnostic {
    /// Wrap a bare message (used for non-diagnostic engine exceptions).
    #[must_use]
    pub fn bare(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
        }
    }
}

/// Successful single-file transform payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformOutput {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mangle_cache: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_comments: Option<String>,
    pub stderr: String,
    pub duration_ms: u64,
}

/// One emitted output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    /// Path relative to the output directory (outdir prefix stripped).
    pub path: String,
    pub text: String,
}

/// Successful bundle payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOutput {
    pub output_files: Vec<OutputFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metafile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mangle_cache: Option<BTreeMap<String, serde_json::Value>>,
    pub duration_ms: u64,
    pub stderr: String,
}

/// Successful install payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallOutput {
    /// The resolved dependency set, empty when the fingerprint was unchanged.
    pub dependencies: BTreeMap<String, String>,
    pub duration_ms: u64,
}

/// Engine diagnostics delivered as a successful task result.
///
/// `stdout` is the JSON rendering `{"errors": […], "warnings": […]}`;
/// `stderr` is the merged, colourised text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticsOutput {
    pub stderr: String,
    pub stdout: String,
}

/// Terminal payload of a resolved task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerOutput {
    Transform(TransformOutput),
    Build(BuildOutput),
    NpmInstall(InstallOutput),
    /// Compile/bundle errors and warnings; not a protocol failure.
    Diagnostics(DiagnosticsOutput),
}

/// Progress severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressLevel {
    Info,
    Error,
}

/// A non-terminal progress record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub level: ProgressLevel,
    pub message: String,
}

impl ProgressMessage {
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: ProgressLevel::Info,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: ProgressLevel::Error,
            message: message.into(),
        }
    }
}

/// Structured protocol error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Status of a reply frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Terminal success (which may carry engine diagnostics).
    Resolve(WorkerOutput),
    /// Terminal harness failure.
    Reject(ErrorInfo),
    /// Non-terminal progress record.
    Progress(ProgressMessage),
}

impl TaskStatus {
    /// True for `resolve` and `reject`; false for `progress`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// A correlated request frame (dispatcher → worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: Uuid,
    pub request: WorkerRequest,
}

/// A correlated reply frame (worker → dispatcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub id: Uuid,
    pub status: TaskStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_op_wire_tags_are_mangled() {
        let op = FsOp::WriteFile {
            path: "app/x".to_string(),
            contents: "1".to_string(),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(r#""op":"fs__write_file""#));
    }

    #[test]
    fn test_status_terminality() {
        assert!(TaskStatus::Resolve(WorkerOutput::Transform(TransformOutput::default())).is_terminal());
        assert!(TaskStatus::Reject(ErrorInfo::new(codes::INTERNAL_ERROR, "x")).is_terminal());
        assert!(!TaskStatus::Progress(ProgressMessage::info("fetching")).is_terminal());
    }

    #[test]
    fn test_reply_frame_round_trip() {
        let frame = ReplyFrame {
            id: Uuid::new_v4(),
            status: TaskStatus::Progress(ProgressMessage::error("boom")),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ReplyFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, frame.id);
        match back.status {
            TaskStatus::Progress(msg) => {
                assert_eq!(msg.level, ProgressLevel::Error);
                assert_eq!(msg.message, "boom");
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[test]
    fn test_default_build_options() {
        let opts = BuildOptions::default();
        assert_eq!(opts.target, "chrome67");
        assert_eq!(opts.format, "esm");
        assert!(opts.splitting);
        assert!(opts.bundle);
        assert!(opts.sourcemap);
        assert!(!opts.minify);
        assert_eq!(opts.loader.get(".ts").map(String::as_str), Some("tsx"));
    }

    #[test]
    fn test_file_record_flag_defaults() {
        let record: FileRecord = serde_json::from_str(r#"{"contents":"x"}"#).unwrap();
        assert!(!record.is_entry);
        assert!(!record.is_js_entry);
    }
}
