//! Scripted engine for exercising the session without model files.

use super::frames::FrameSet;
use super::types::{
    ImagePredictor, Label, Mask, ObjectId, Prediction, Prompt, PropagatedFrame,
    SegmentationEngine, VideoPredictor,
};
use anyhow::{bail, Result};
use image::RgbImage;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// What the fake engine was asked to do.
#[derive(Debug, Default)]
pub struct Probe {
    pub image_predictors: AtomicUsize,
    pub predictions: AtomicUsize,
    pub video_inits: AtomicUsize,
    pub propagations: AtomicUsize,
    pub annotations: Mutex<Vec<(usize, ObjectId, Prompt)>>,
}

impl Probe {
    pub fn annotated_frames(&self) -> Vec<usize> {
        self.annotations
            .lock()
            .unwrap()
            .iter()
            .map(|(frame, _, _)| *frame)
            .collect()
    }
}

/// Holds video initialisation until opened.
#[derive(Debug, Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn open(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Failures {
    pub image_predictor: bool,
    pub predict: bool,
    pub init: bool,
    pub propagate_at: Option<usize>,
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    pub probe: Arc<Probe>,
    pub gate: Option<Gate>,
    pub failures: Failures,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose video state only becomes ready once the gate opens.
    pub fn gated() -> (Self, Gate) {
        let gate = Gate::default();
        let engine = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (engine, gate)
    }
}

/// A filled square of radius 2 around every include point, plus the box.
pub fn paint(width: u32, height: u32, prompt: &Prompt) -> Mask {
    Mask::from_fn(width, height, |x, y| {
        let (x, y) = (x as i32, y as i32);
        let near_point = prompt
            .points
            .iter()
            .zip(&prompt.labels)
            .any(|(p, l)| *l == Label::Include && (p.x - x).abs() <= 2 && (p.y - y).abs() <= 2);
        let in_box = prompt
            .bbox
            .is_some_and(|b| x >= b.x0 && x <= b.x1 && y >= b.y0 && y <= b.y1);
        near_point || in_box
    })
}

impl SegmentationEngine for FakeEngine {
    fn image_predictor(&self) -> Result<Box<dyn ImagePredictor>> {
        if self.failures.image_predictor {
            bail!("model weights unavailable");
        }
        self.probe.image_predictors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeImagePredictor {
            probe: self.probe.clone(),
            fail: self.failures.predict,
        }))
    }

    fn init_video_state(
        &self,
        frames: &FrameSet,
        _offload: bool,
    ) -> Result<Box<dyn VideoPredictor>> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        self.probe.video_inits.fetch_add(1, Ordering::SeqCst);
        if self.failures.init {
            bail!("out of memory while loading frames");
        }
        let (width, height) = frames.load(0)?.dimensions();
        Ok(Box::new(FakeVideoPredictor {
            probe: self.probe.clone(),
            frames: frames.len(),
            width,
            height,
            prompts: BTreeMap::new(),
            fail_at: self.failures.propagate_at,
        }))
    }
}

struct FakeImagePredictor {
    probe: Arc<Probe>,
    fail: bool,
}

impl ImagePredictor for FakeImagePredictor {
    fn predict(&mut self, image: &RgbImage, prompt: &Prompt) -> Result<Prediction> {
        if self.fail {
            bail!("prediction failed");
        }
        self.probe.predictions.fetch_add(1, Ordering::SeqCst);
        let (width, height) = image.dimensions();
        Ok(Prediction {
            mask: paint(width, height, prompt),
            score: 0.9,
        })
    }
}

struct FakeVideoPredictor {
    probe: Arc<Probe>,
    frames: usize,
    width: u32,
    height: u32,
    prompts: BTreeMap<ObjectId, BTreeMap<usize, Prompt>>,
    fail_at: Option<usize>,
}

impl VideoPredictor for FakeVideoPredictor {
    fn add_annotation(&mut self, frame: usize, object: ObjectId, prompt: &Prompt) -> Result<()> {
        self.probe
            .annotations
            .lock()
            .unwrap()
            .push((frame, object, prompt.clone()));
        self.prompts
            .entry(object)
            .or_default()
            .insert(frame, prompt.clone());
        Ok(())
    }

    fn propagate(&mut self) -> Result<Box<dyn Iterator<Item = Result<PropagatedFrame>> + '_>> {
        self.probe.propagations.fetch_add(1, Ordering::SeqCst);
        let (width, height, fail_at) = (self.width, self.height, self.fail_at);
        let prompts = &self.prompts;

        Ok(Box::new((0..self.frames).map(move |index| {
            if fail_at == Some(index) {
                bail!("propagation failed on frame {}", index);
            }
            let masks = prompts
                .iter()
                .filter_map(|(object, annotated)| {
                    // the last annotation at or before this frame wins
                    annotated
                        .range(..=index)
                        .next_back()
                        .map(|(_, prompt)| (*object, paint(width, height, prompt)))
                })
                .collect();
            Ok(PropagatedFrame { index, masks })
        })))
    }
}

/// Write `count` black frames named `00000.jpg`, `00001.jpg`, ...
pub fn write_frames(dir: &std::path::Path, count: usize, width: u32, height: u32) {
    for index in 0..count {
        RgbImage::new(width, height)
            .save(dir.join(format!("{:05}.jpg", index)))
            .unwrap();
    }
}
