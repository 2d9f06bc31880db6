mod renderer;

pub use renderer::MaskRenderer;

use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("masks for frame {0} differ in size")]
    SizeMismatch(usize),
}

/// Receives a call after each rendered frame.
pub trait ProgressSink {
    fn frame_done(&mut self, done: usize, total: usize);
}

/// Writes `Export NN%|` lines, but only for clips longer than `min_frames`.
pub struct ExportProgress<W: Write> {
    out: W,
    min_frames: usize,
}

impl<W: Write> ExportProgress<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            min_frames: 100,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProgressSink for ExportProgress<W> {
    fn frame_done(&mut self, done: usize, total: usize) {
        if total <= self.min_frames {
            return;
        }
        let percent = done * 100 / total;
        // progress is advisory; a closed stderr must not abort the render
        if writeln!(self.out, "Export {}%|", percent)
            .and_then(|_| self.out.flush())
            .is_err()
        {
            tracing::debug!("Dropped progress line at {}%", percent);
        }
    }
}
