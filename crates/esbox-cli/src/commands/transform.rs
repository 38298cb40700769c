use esbox_pool::{init, InitOptions};
use esbox_proto::{TransformOptions, WorkerOutput};
use esbox_util::diskio::read_to_string_lossy;
use miette::{miette, IntoDiagnostic, Result};
use std::path::Path;
use tracing::info;

pub async fn run(file: &Path, loader: Option<String>, engine_version: &str) -> Result<()> {
    let input = read_to_string_lossy(file).into_diagnostic()?;

    let esbox = init(InitOptions {
        engine_version: engine_version.to_string(),
        ..InitOptions::default()
    })
    .await
    .into_diagnostic()?;

    let options = TransformOptions {
        loader,
        ..TransformOptions::default()
    };
    let output = esbox.transform(input, options).await.into_diagnostic()?;

    match output {
        WorkerOutput::Transform(result) => {
            if !result.stderr.is_empty() {
                eprintln!("{}", result.stderr);
            }
            info!(duration_ms = result.duration_ms, "transform finished");
            println!("{}", result.code);
            Ok(())
        }
        WorkerOutput::Diagnostics(diag) => {
            eprintln!("{}", diag.stderr);
            Err(miette!("transform failed: {}", diag.stdout))
        }
        other => Err(miette!("unexpected worker output: {other:?}")),
    }
}
