#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;

use clap::Parser;
use esbox_pool::artifact::DEFAULT_ENGINE_VERSION;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "esbox")]
#[command(author, version, about = "In-process bundling with npm installs and previews", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted logs (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Compile a single source file through the engine
    Transform {
        /// The file to transform
        file: PathBuf,

        /// Loader to parse the input with (e.g. jsx, tsx)
        #[arg(long)]
        loader: Option<String>,

        /// Engine version to host
        #[arg(long, env = "ESBOX_ENGINE_VERSION", default_value = DEFAULT_ENGINE_VERSION)]
        engine_version: String,
    },

    /// Bundle a project directory
    Bundle {
        /// Project root
        dir: PathBuf,

        /// Entry point, relative to the project root
        #[arg(long, default_value = "index.js")]
        entry: String,

        /// Where to write emitted files
        #[arg(short, long, default_value = "dist")]
        outdir: PathBuf,

        /// Engine version to host
        #[arg(long, env = "ESBOX_ENGINE_VERSION", default_value = DEFAULT_ENGINE_VERSION)]
        engine_version: String,
    },

    /// Install dependencies from the registry CDN into node_modules
    Install {
        /// Project root containing package.json
        dir: PathBuf,

        /// Registry base URL
        #[arg(long, env = "ESBOX_REGISTRY_URL")]
        registry: String,

        /// Engine version to host
        #[arg(long, env = "ESBOX_ENGINE_VERSION", default_value = DEFAULT_ENGINE_VERSION)]
        engine_version: String,
    },

    /// Serve a directory of build artifacts for preview
    Preview {
        /// Directory of files to serve
        dir: PathBuf,

        /// Port to listen on (0 picks one)
        #[arg(long, default_value_t = 8787)]
        port: u16,

        /// Project identifier in preview URLs
        #[arg(long, default_value = "app")]
        project: String,

        /// Hostname suffix to intercept as <project>.<suffix>
        #[arg(long, env = "ESBOX_PREVIEW_SUFFIX")]
        suffix: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Version => {
            println!("esbox {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Transform {
            file,
            loader,
            engine_version,
        } => commands::transform::run(&file, loader, &engine_version).await,
        Commands::Bundle {
            dir,
            entry,
            outdir,
            engine_version,
        } => commands::bundle::run(&dir, &entry, &outdir, &engine_version).await,
        Commands::Install {
            dir,
            registry,
            engine_version,
        } => commands::install::run(&dir, &registry, &engine_version).await,
        Commands::Preview {
            dir,
            port,
            project,
            suffix,
        } => commands::preview::run(&dir, port, &project, suffix).await,
    }
}
