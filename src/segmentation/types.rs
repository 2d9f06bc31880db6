use anyhow::Result;
use image::RgbImage;
use std::collections::BTreeMap;
use std::fmt;

use super::frames::FrameSet;

/// Caller-assigned object identifier, stable for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// The protocol only ever annotates a single object.
    pub const DEFAULT: ObjectId = ObjectId(1);
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pixel position in the original frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box given by two corners, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxCoords {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl From<[i32; 4]> for BoxCoords {
    fn from([x0, y0, x1, y1]: [i32; 4]) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// Whether a point marks the object or the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Exclude,
    Include,
}

impl Label {
    pub fn value(self) -> i32 {
        match self {
            Label::Exclude => 0,
            Label::Include => 1,
        }
    }
}

impl TryFrom<i32> for Label {
    type Error = i32;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Label::Exclude),
            1 => Ok(Label::Include),
            other => Err(other),
        }
    }
}

/// Annotations for one object on one frame.
///
/// `labels` is index-aligned with `points`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    pub points: Vec<Point>,
    pub labels: Vec<Label>,
    pub bbox: Option<BoxCoords>,
}

impl Prompt {
    pub fn from_box(bbox: BoxCoords) -> Self {
        Self {
            points: Vec::new(),
            labels: Vec::new(),
            bbox: Some(bbox),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.bbox.is_none()
    }
}

/// Boolean per-pixel object membership, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; (width * height) as usize],
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> bool,
    {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Build a mask from raw logits, keeping pixels above `threshold`.
    pub fn from_logits(width: u32, height: u32, logits: &[f32], threshold: f32) -> Self {
        Self {
            width,
            height,
            data: logits.iter().map(|&v| v > threshold).collect(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[(y * self.width + x) as usize]
    }

    pub fn area(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&v| v)
    }

    /// Tight bounding box around the set pixels, corners inclusive.
    pub fn bounding_box(&self) -> Option<BoxCoords> {
        let mut bounds: Option<BoxCoords> = None;
        for y in 0..self.height {
            for x in 0..self.width {
                if !self.get(x, y) {
                    continue;
                }
                let (x, y) = (x as i32, y as i32);
                bounds = Some(match bounds {
                    None => BoxCoords {
                        x0: x,
                        y0: y,
                        x1: x,
                        y1: y,
                    },
                    Some(b) => BoxCoords {
                        x0: b.x0.min(x),
                        y0: b.y0.min(y),
                        x1: b.x1.max(x),
                        y1: b.y1.max(y),
                    },
                });
            }
        }
        bounds
    }
}

/// Single-frame prediction result.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub mask: Mask,
    pub score: f32,
}

/// Masks produced by propagation for one frame.
#[derive(Debug, Clone)]
pub struct PropagatedFrame {
    pub index: usize,
    pub masks: BTreeMap<ObjectId, Mask>,
}

/// Factory for engine handles.
///
/// Shared with the background loader thread, hence `Send + Sync`.
pub trait SegmentationEngine: Send + Sync {
    /// Create the handle that answers single-image predictions.
    fn image_predictor(&self) -> Result<Box<dyn ImagePredictor>>;

    /// Prepare video state for the given frames. May take a long time.
    ///
    /// With `offload` set, frame data is kept out of memory and paged in
    /// on demand.
    fn init_video_state(&self, frames: &FrameSet, offload: bool)
        -> Result<Box<dyn VideoPredictor>>;
}

/// Handle for single-frame predictions.
pub trait ImagePredictor {
    /// Predict a mask for `image`. An empty prompt gives an engine-defined result.
    fn predict(&mut self, image: &RgbImage, prompt: &Prompt) -> Result<Prediction>;
}

/// Handle holding loaded video state.
pub trait VideoPredictor: Send {
    /// Register one object's annotations for one frame.
    fn add_annotation(&mut self, frame: usize, object: ObjectId, prompt: &Prompt) -> Result<()>;

    /// Produce masks for every frame in increasing index order.
    ///
    /// The sequence can be consumed once; a second call is an error.
    fn propagate(&mut self) -> Result<Box<dyn Iterator<Item = Result<PropagatedFrame>> + '_>>;
}
