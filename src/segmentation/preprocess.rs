use image::{imageops, RgbImage};
use ndarray::{Array2, Array3, Array4};

use super::types::Prompt;

// SAM prompt-encoder labels
const LABEL_PADDING: f32 = -1.0;
const LABEL_BOX_TOP_LEFT: f32 = 2.0;
const LABEL_BOX_BOTTOM_RIGHT: f32 = 3.0;

/// Converts frames and prompts into the square model input space.
pub struct Preprocessor {
    size: u32,
}

/// Decoder prompt tensors: coordinates `[1, N, 2]` and labels `[1, N]`.
pub struct PromptTensors {
    pub coords: Array3<f32>,
    pub labels: Array2<f32>,
}

impl Preprocessor {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    /// Resize to the model's square input and lay out as normalized NCHW.
    ///
    /// Returns: Array4<f32> with shape [1, 3, size, size]
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.size, self.size) {
            imageops::resize(image, self.size, self.size, imageops::FilterType::Triangle)
        } else {
            image.clone()
        };

        let side = self.size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        tensor
    }

    /// Scale prompt coordinates from a `width`x`height` frame into model space.
    ///
    /// A box becomes two corner points. Without a box a padding point is
    /// appended, as the decoder expects.
    pub fn prompt_tensors(&self, prompt: &Prompt, width: u32, height: u32) -> PromptTensors {
        let sx = self.size as f32 / width as f32;
        let sy = self.size as f32 / height as f32;

        let mut coords: Vec<[f32; 2]> = Vec::with_capacity(prompt.points.len() + 2);
        let mut labels: Vec<f32> = Vec::with_capacity(prompt.points.len() + 2);

        for (point, label) in prompt.points.iter().zip(&prompt.labels) {
            coords.push([point.x as f32 * sx, point.y as f32 * sy]);
            labels.push(label.value() as f32);
        }

        match prompt.bbox {
            Some(b) => {
                coords.push([b.x0 as f32 * sx, b.y0 as f32 * sy]);
                labels.push(LABEL_BOX_TOP_LEFT);
                coords.push([b.x1 as f32 * sx, b.y1 as f32 * sy]);
                labels.push(LABEL_BOX_BOTTOM_RIGHT);
            }
            None => {
                coords.push([0.0, 0.0]);
                labels.push(LABEL_PADDING);
            }
        }

        let n = labels.len();
        let coords = Array3::from_shape_fn((1, n, 2), |(_, i, c)| coords[i][c]);
        let labels = Array2::from_shape_fn((1, n), |(_, i)| labels[i]);

        PromptTensors { coords, labels }
    }
}
