use super::snapshot_dir;
use esbox_preview::{serve, PreviewConfig, PreviewState};
use miette::{IntoDiagnostic, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub async fn run(dir: &Path, port: u16, project: &str, suffix: Option<String>) -> Result<()> {
    let files = snapshot_dir(dir, "")?;

    let state = Arc::new(PreviewState::new(PreviewConfig {
        suffix,
        cache_root: None,
    }));
    state.upload(project, files);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .into_diagnostic()?;
    let addr = listener.local_addr().into_diagnostic()?;
    info!("serving previews at http://{addr}/__build/{project}/");

    serve(listener, state).await.into_diagnostic()
}
