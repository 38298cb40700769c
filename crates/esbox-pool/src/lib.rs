#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

//! Engine worker pool for esbox.
//!
//! The pool fetches the engine's WASM artifact, warms a fixed set of worker
//! tasks each hosting one engine instance, and multiplexes correlated
//! request/reply/progress frames between submitters and workers. Reload
//! swaps the engine generation at runtime, rejecting every pending task.
//!
//! ## Protocol
//! See `esbox-proto` for frame types. `resolve`/`reject` are terminal and
//! free the correlation slot; `progress` frames stream to the submitter's
//! sink. Late frames whose id is no longer registered are dropped.

pub mod artifact;
mod error;
mod facade;
pub mod pool;
pub mod wasm;
mod worker;

pub use error::PoolError;
pub use facade::{init, Esbox, InitOptions, InstallRequest};
pub use pool::{pool_size, Pool, PoolConfig, DEFAULT_QUEUE_TIMEOUT};
pub use wasm::{WasmEngine, WasmEngineFactory};
pub use worker::OUTDIR;
