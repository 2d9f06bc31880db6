use super::frames::FrameSet;
use super::preprocess::{Preprocessor, PromptTensors};
use super::types::{
    BoxCoords, ImagePredictor, Mask, ObjectId, Prediction, Prompt, PropagatedFrame,
    SegmentationEngine, VideoPredictor,
};
use crate::config::{Device, EngineConfig};
use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{Array1, Array4, Axis, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, ExecutionProviderDispatch, TensorRTExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// SAM2 exported as two ONNX graphs: an image encoder and a prompt/mask decoder.
///
/// Sessions are only built when a handle is requested, so constructing the
/// engine is cheap and startup only validates the model paths.
pub struct Sam2OnnxEngine {
    encoder: PathBuf,
    decoder: PathBuf,
    config: EngineConfig,
}

impl Sam2OnnxEngine {
    pub fn new<P: AsRef<Path>>(encoder: P, config: EngineConfig) -> Result<Self> {
        let encoder = encoder.as_ref().to_path_buf();
        let decoder = match &config.decoder {
            Some(path) => path.clone(),
            None => encoder.with_file_name("decoder.onnx"),
        };

        for path in [&encoder, &decoder] {
            if !path.is_file() {
                bail!("Model file {} does not exist", path.display());
            }
        }

        tracing::info!(
            "SAM2 encoder {}, decoder {}, device {:?}",
            encoder.display(),
            decoder.display(),
            config.device
        );

        Ok(Self {
            encoder,
            decoder,
            config,
        })
    }

    fn load_model(&self) -> Result<Sam2Model> {
        let encoder = build_session(&self.encoder, self.config.device, self.config.intra_threads)?;
        let decoder = build_session(&self.decoder, self.config.device, self.config.intra_threads)?;

        Ok(Sam2Model {
            encoder,
            decoder,
            preprocessor: Preprocessor::new(self.config.image_size),
            image_size: self.config.image_size,
            threshold: self.config.mask_threshold,
        })
    }
}

impl SegmentationEngine for Sam2OnnxEngine {
    fn image_predictor(&self) -> Result<Box<dyn ImagePredictor>> {
        tracing::info!("Loading SAM2 image predictor");
        let model = self.load_model()?;
        Ok(Box::new(Sam2ImagePredictor { model }))
    }

    fn init_video_state(
        &self,
        frames: &FrameSet,
        offload: bool,
    ) -> Result<Box<dyn VideoPredictor>> {
        tracing::info!("Loading SAM2 video state for {}", frames.dir().display());
        let model = self.load_model()?;

        let frames = if offload {
            tracing::info!("Offloading video frames: decoding on demand during propagation");
            FrameSource::OnDisk(frames.clone())
        } else {
            let images = (0..frames.len())
                .map(|index| frames.load(index))
                .collect::<Result<Vec<_>>>()?;
            FrameSource::Resident(images)
        };
        tracing::info!("Video state ready ({} frames)", frames.len());

        Ok(Box::new(Sam2VideoPredictor {
            model,
            frames,
            prompts: BTreeMap::new(),
            propagated: false,
        }))
    }
}

fn build_session(path: &Path, device: Device, threads: usize) -> Result<Session> {
    let providers: Vec<ExecutionProviderDispatch> = match device {
        Device::Cpu => Vec::new(),
        Device::Auto => vec![CUDAExecutionProvider::default().build()],
        Device::Cuda => vec![CUDAExecutionProvider::default().build().error_on_failure()],
        Device::Tensorrt => vec![
            TensorRTExecutionProvider::default().build().error_on_failure(),
            CUDAExecutionProvider::default().build(),
        ],
    };

    let session = Session::builder()?
        .with_execution_providers(providers)?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads)?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load model from {}", path.display()))?;

    tracing::debug!("Loaded {}", path.display());
    Ok(session)
}

/// Encoder outputs for one image.
struct Embeddings {
    image: Array4<f32>,      // [1, 256, 64, 64]
    high_res_0: Array4<f32>, // [1, 32, 256, 256]
    high_res_1: Array4<f32>, // [1, 64, 128, 128]
}

struct Sam2Model {
    encoder: Session,
    decoder: Session,
    preprocessor: Preprocessor,
    image_size: u32,
    threshold: f32,
}

impl Sam2Model {
    fn embed(&mut self, image: &RgbImage) -> Result<Embeddings> {
        let _span = tracing::debug_span!("encode").entered();

        let input = Tensor::from_array(self.preprocessor.preprocess(image))?;
        let outputs = self
            .encoder
            .run(ort::inputs!["input" => input])
            .context("Failed to run encoder")?;

        let extract = |name: &str| -> Result<Array4<f32>> {
            Ok(outputs[name]
                .try_extract_array::<f32>()?
                .to_owned()
                .into_dimensionality::<Ix4>()?)
        };

        Ok(Embeddings {
            image: extract("image_embeddings")?,
            high_res_0: extract("high_res_features_0")?,
            high_res_1: extract("high_res_features_1")?,
        })
    }

    fn decode(
        &mut self,
        embeddings: &Embeddings,
        prompt: &Prompt,
        width: u32,
        height: u32,
    ) -> Result<Prediction> {
        let _span = tracing::debug_span!("decode").entered();

        let PromptTensors { coords, labels } =
            self.preprocessor.prompt_tensors(prompt, width, height);
        let low_res = (self.image_size / 4) as usize;

        let outputs = self
            .decoder
            .run(ort::inputs![
                "image_embeddings" => Tensor::from_array(embeddings.image.clone())?,
                "high_res_features_0" => Tensor::from_array(embeddings.high_res_0.clone())?,
                "high_res_features_1" => Tensor::from_array(embeddings.high_res_1.clone())?,
                "point_coords" => Tensor::from_array(coords)?,
                "point_labels" => Tensor::from_array(labels)?,
                "mask_input" => Tensor::from_array(Array4::<f32>::zeros((1, 1, low_res, low_res)))?,
                "has_mask_input" => Tensor::from_array(Array1::<f32>::from_vec(vec![0.0]))?,
                "orig_im_size" => Tensor::from_array(Array1::<i64>::from_vec(vec![height as i64, width as i64]))?,
            ])
            .context("Failed to run decoder")?;

        let masks = outputs["masks"]
            .try_extract_array::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix4>()?;
        let scores: Vec<f32> = outputs["iou_predictions"]
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();

        let (_, candidates, mask_h, mask_w) = masks.dim();
        if (mask_w, mask_h) != (width as usize, height as usize) {
            bail!(
                "Decoder returned {}x{} masks for a {}x{} frame",
                mask_w,
                mask_h,
                width,
                height
            );
        }

        let (best, score) = scores
            .iter()
            .copied()
            .enumerate()
            .take(candidates)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .context("Decoder returned no mask candidates")?;

        let logits: Vec<f32> = masks
            .index_axis(Axis(0), 0)
            .index_axis(Axis(0), best)
            .iter()
            .copied()
            .collect();

        Ok(Prediction {
            mask: Mask::from_logits(width, height, &logits, self.threshold),
            score,
        })
    }

    fn predict(&mut self, image: &RgbImage, prompt: &Prompt) -> Result<Prediction> {
        let (width, height) = image.dimensions();
        if prompt.is_empty() {
            return Ok(Prediction {
                mask: Mask::empty(width, height),
                score: 0.0,
            });
        }
        let embeddings = self.embed(image)?;
        self.decode(&embeddings, prompt, width, height)
    }
}

struct Sam2ImagePredictor {
    model: Sam2Model,
}

impl ImagePredictor for Sam2ImagePredictor {
    fn predict(&mut self, image: &RgbImage, prompt: &Prompt) -> Result<Prediction> {
        let prediction = self.model.predict(image, prompt)?;
        tracing::debug!(
            "Preview mask: {} pixels, score {:.3}",
            prediction.mask.area(),
            prediction.score
        );
        Ok(prediction)
    }
}

enum FrameSource {
    Resident(Vec<RgbImage>),
    OnDisk(FrameSet),
}

impl FrameSource {
    fn len(&self) -> usize {
        match self {
            FrameSource::Resident(images) => images.len(),
            FrameSource::OnDisk(frames) => frames.len(),
        }
    }

    fn frame(&self, index: usize) -> Result<Cow<'_, RgbImage>> {
        match self {
            FrameSource::Resident(images) => images
                .get(index)
                .map(Cow::Borrowed)
                .with_context(|| format!("Frame {} out of range", index)),
            FrameSource::OnDisk(frames) => frames.load(index).map(Cow::Owned),
        }
    }
}

struct Sam2VideoPredictor {
    model: Sam2Model,
    frames: FrameSource,
    prompts: BTreeMap<ObjectId, BTreeMap<usize, Prompt>>,
    propagated: bool,
}

impl VideoPredictor for Sam2VideoPredictor {
    fn add_annotation(&mut self, frame: usize, object: ObjectId, prompt: &Prompt) -> Result<()> {
        if frame >= self.frames.len() {
            bail!(
                "Annotation on frame {} but the clip has {} frames",
                frame,
                self.frames.len()
            );
        }
        tracing::debug!("Object {} annotated on frame {}", object, frame);
        self.prompts
            .entry(object)
            .or_default()
            .insert(frame, prompt.clone());
        Ok(())
    }

    fn propagate(&mut self) -> Result<Box<dyn Iterator<Item = Result<PropagatedFrame>> + '_>> {
        if self.propagated {
            bail!("Propagation has already been consumed");
        }
        self.propagated = true;

        let Sam2VideoPredictor {
            model,
            frames,
            prompts,
            ..
        } = self;

        Ok(Box::new(Propagation {
            model,
            frames,
            prompts,
            carried: BTreeMap::new(),
            next: 0,
            done: false,
        }))
    }
}

/// Walks the clip forward, prompting each frame with its own annotations or,
/// failing that, the box around the object's previous mask.
struct Propagation<'a> {
    model: &'a mut Sam2Model,
    frames: &'a FrameSource,
    prompts: &'a BTreeMap<ObjectId, BTreeMap<usize, Prompt>>,
    carried: BTreeMap<ObjectId, Option<BoxCoords>>,
    next: usize,
    done: bool,
}

impl Propagation<'_> {
    fn step(&mut self, index: usize) -> Result<PropagatedFrame> {
        let mut work: Vec<(ObjectId, Option<Prompt>)> = Vec::new();
        for (object, annotated) in self.prompts {
            match annotated.keys().next() {
                Some(&first) if index >= first => {}
                _ => continue,
            }
            let prompt = match annotated.get(&index) {
                Some(prompt) => Some(prompt.clone()),
                None => self
                    .carried
                    .get(object)
                    .copied()
                    .flatten()
                    .map(Prompt::from_box),
            };
            work.push((*object, prompt));
        }

        let mut masks = BTreeMap::new();
        if work.is_empty() {
            return Ok(PropagatedFrame { index, masks });
        }

        let image = self.frames.frame(index)?;
        let (width, height) = image.dimensions();
        let embeddings = if work
            .iter()
            .any(|(_, p)| p.as_ref().is_some_and(|p| !p.is_empty()))
        {
            Some(self.model.embed(&image)?)
        } else {
            None
        };

        for (object, prompt) in work {
            let mask = match (&embeddings, prompt) {
                (Some(embeddings), Some(prompt)) if !prompt.is_empty() => {
                    self.model.decode(embeddings, &prompt, width, height)?.mask
                }
                _ => Mask::empty(width, height),
            };
            if mask.is_empty() {
                tracing::debug!("Object {} lost on frame {}", object, index);
            }
            self.carried.insert(object, mask.bounding_box());
            masks.insert(object, mask);
        }

        Ok(PropagatedFrame { index, masks })
    }
}

impl Iterator for Propagation<'_> {
    type Item = Result<PropagatedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next >= self.frames.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let result = self.step(index);
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_files_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = dir.path().join("encoder.onnx");
        assert!(Sam2OnnxEngine::new(&encoder, EngineConfig::default()).is_err());

        std::fs::write(&encoder, b"stub").unwrap();
        let err = Sam2OnnxEngine::new(&encoder, EngineConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("decoder.onnx"));
    }

    #[test]
    fn resident_frames_are_borrowed() {
        let source = FrameSource::Resident(vec![RgbImage::new(2, 2)]);
        assert!(matches!(source.frame(0).unwrap(), Cow::Borrowed(_)));
        assert!(source.frame(1).is_err());
    }
}
