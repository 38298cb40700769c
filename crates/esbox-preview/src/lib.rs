#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

//! HTTP preview server.
//!
//! Serves uploaded project artifacts to preview clients, replacing the
//! browser-era request interceptor with a real HTTP endpoint. Uploads land
//! in an in-memory per-project store plus a persistent per-project disk
//! cache, so previews survive a server restart.
//!
//! Routing, in order:
//! 1. When a preview suffix is configured and the request `Host` ends with
//!    it, the project id is the host prefix and the file path is the URL
//!    path; served from memory only.
//! 2. `/__build/{project}/{file…}` (default `index.html`) serves from
//!    memory, falling back to the persistent cache.

pub mod mime;
mod routes;
mod state;

pub use routes::router;
pub use state::{PreviewConfig, PreviewState};

use std::io;
use std::sync::Arc;

/// Serve previews on an already-bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<PreviewState>,
) -> io::Result<()> {
    axum::serve(listener, router(state)).await
}
