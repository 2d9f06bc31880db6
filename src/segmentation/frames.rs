use anyhow::{bail, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Frame images of one clip, ordered by the numeric value of their file stem.
///
/// Position in this list is the frame index used by the protocol and the engine.
#[derive(Debug, Clone)]
pub struct FrameSet {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl FrameSet {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame folder {}", dir.display()))?;

        let mut numbered: Vec<(u64, PathBuf)> = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to list frame folder {}", dir.display()))?
                .path();

            let is_frame = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_frame {
                continue;
            }

            match path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(number) => numbered.push((number, path)),
                None => tracing::warn!("Skipping non-numeric frame file {}", path.display()),
            }
        }

        if numbered.is_empty() {
            bail!("No frame images found in {}", dir.display());
        }

        numbered.sort_by_key(|(number, _)| *number);
        tracing::info!("Found {} frames in {}", numbered.len(), dir.display());

        Ok(Self {
            dir: dir.to_path_buf(),
            paths: numbered.into_iter().map(|(_, path)| path).collect(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    /// Decode the frame at `index` as RGB.
    pub fn load(&self, index: usize) -> Result<RgbImage> {
        let path = self
            .path(index)
            .with_context(|| format!("Frame {} out of range ({} frames)", index, self.len()))?;

        let _span = tracing::debug_span!("load_frame", index).entered();
        let image = image::open(path)
            .with_context(|| format!("Failed to read frame {}", path.display()))?;
        Ok(image.to_rgb8())
    }
}
