//! Write-through mirroring to an out-of-thread FS twin.
//!
//! The mirror is a capability, not a subclass: it receives the serialised
//! operation table ([`FsOp`]) after each local mutation and re-applies it
//! wherever the twin lives.

use super::MemFs;
use esbox_proto::FsOp;
use tokio::sync::mpsc;

/// Receives every mutation applied to the owning [`MemFs`].
pub trait FsMirror: Send + Sync {
    fn apply(&self, op: FsOp);
}

/// Mirror that forwards operations over an unbounded channel.
///
/// The receiving side replays frames onto the twin FS with [`apply_op`].
/// A closed receiver drops frames silently; mirroring is best-effort.
pub struct ChannelMirror {
    tx: mpsc::UnboundedSender<FsOp>,
}

impl ChannelMirror {
    /// Create a mirror plus the receiver for its operation stream.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FsOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FsMirror for ChannelMirror {
    fn apply(&self, op: FsOp) {
        let _ = self.tx.send(op);
    }
}

/// Replay one mirrored operation onto `fs`.
pub fn apply_op(fs: &mut MemFs, op: FsOp) {
    match op {
        FsOp::WriteFile { path, contents } => fs.write_file(&path, &contents),
        FsOp::AppendFile { path, contents } => fs.append_file(&path, &contents),
        FsOp::DeleteFile { path } => fs.delete_file(&path),
        FsOp::SetFiles { files } => fs.set_files(files),
        FsOp::Rmdir { path } => fs.rmdir(&path),
        FsOp::Chdir { path } => fs.chdir(&path),
    }
}
