#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod cache;
pub mod engine;
pub mod npm;
pub mod paths;
pub mod progress;
pub mod vfs;

pub use engine::{Engine, EngineError, EngineFactory, RawBuild, RawTransform};
pub use npm::{InstallOptions, NpmError, NpmInstaller, ResolveOutcome};
pub use progress::{null_progress, ProgressSink};
pub use vfs::{ChannelMirror, FsMirror, MemFs, SharedFs};
