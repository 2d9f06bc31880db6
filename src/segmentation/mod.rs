mod frames;
mod preprocess;
mod sam2;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use frames::FrameSet;
pub use sam2::Sam2OnnxEngine;
pub use types::{
    BoxCoords, ImagePredictor, Label, Mask, ObjectId, Point, Prompt, SegmentationEngine,
    VideoPredictor,
};

use crate::config::EngineConfig;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Create the default segmentation engine (SAM2 over ONNX Runtime)
pub fn create_default_engine(
    model_path: &Path,
    config: EngineConfig,
) -> Result<Arc<dyn SegmentationEngine>> {
    let engine = Sam2OnnxEngine::new(model_path, config)?;
    Ok(Arc::new(engine))
}
