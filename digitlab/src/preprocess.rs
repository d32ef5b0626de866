//! Conversion of drawn input into the 28×28 format the network reads.

use image::{imageops, DynamicImage, GrayImage, Luma, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{IMAGE_LEN, IMAGE_SIZE},
    LabError,
};

/// One 28×28 grayscale image, row-major, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample(Vec<f32>);

impl Sample {
    pub fn new(pixels: Vec<f32>) -> Result<Self, LabError> {
        if pixels.len() != IMAGE_LEN {
            return Err(LabError::InvalidConfig(format!(
                "a sample has {} pixels, received {}",
                IMAGE_LEN,
                pixels.len()
            )));
        }
        if let Some(p) = pixels.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(LabError::InvalidConfig(format!(
                "pixel {} is outside [0, 1]",
                p
            )));
        }
        Ok(Self(pixels))
    }

    pub fn blank() -> Self {
        Self(vec![0.0; IMAGE_LEN])
    }

    pub fn pixels(&self) -> &[f32] {
        &self.0
    }

    /// Pixel at row `y`, column `x`, or `None` outside the image.
    pub fn get(&self, y: usize, x: usize) -> Option<f32> {
        if y >= IMAGE_SIZE || x >= IMAGE_SIZE {
            return None;
        }
        self.0.get(y * IMAGE_SIZE + x).copied()
    }

    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|p| *p == 0.0)
    }

    /// Shifts the image so its center of mass sits on the middle pixel,
    /// the way MNIST digits are framed. Pixels shifted out are dropped.
    pub fn centered(&self) -> Sample {
        let mut mass = 0.0;
        let (mut sum_x, mut sum_y) = (0.0, 0.0);
        for (i, p) in self.0.iter().enumerate() {
            sum_x += (i % IMAGE_SIZE) as f32 * p;
            sum_y += (i / IMAGE_SIZE) as f32 * p;
            mass += p;
        }
        if mass <= 0.0 {
            return self.clone();
        }

        let middle = (IMAGE_SIZE / 2) as f32;
        let dx = (middle - sum_x / mass).round() as isize;
        let dy = (middle - sum_y / mass).round() as isize;

        let mut shifted = vec![0.0; IMAGE_LEN];
        for (i, p) in self.0.iter().enumerate() {
            let x = (i % IMAGE_SIZE) as isize + dx;
            let y = (i / IMAGE_SIZE) as isize + dy;
            if (0..IMAGE_SIZE as isize).contains(&x) && (0..IMAGE_SIZE as isize).contains(&y) {
                shifted[y as usize * IMAGE_SIZE + x as usize] = *p;
            }
        }
        Sample(shifted)
    }
}

impl From<Sample> for Vec<f32> {
    fn from(value: Sample) -> Self {
        value.0
    }
}

/// Converts an RGBA drawing (`width × height × 4` bytes, bright strokes on a
/// dark or transparent background) into a sample: luminance weighted by
/// alpha, resized to 28×28 with a triangle (bilinear) filter.
pub fn canvas_to_sample(rgba: &[u8], width: usize, height: usize) -> Result<Sample, LabError> {
    if width == 0 || height == 0 {
        return Err(LabError::InvalidConfig("the canvas is empty".to_owned()));
    }
    if rgba.len() != width * height * 4 {
        return Err(LabError::InvalidConfig(format!(
            "a {}x{} RGBA canvas has {} bytes, received {}",
            width,
            height,
            width * height * 4,
            rgba.len()
        )));
    }

    let canvas = RgbaImage::from_raw(width as u32, height as u32, rgba.to_vec()).ok_or_else(|| {
        LabError::InvalidConfig(format!("could not read a {}x{} canvas", width, height))
    })?;
    let luma_alpha = DynamicImage::ImageRgba8(canvas).to_luma_alpha8();
    let gray = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let [l, a] = luma_alpha.get_pixel(x, y).0;
        Luma([((l as u16 * a as u16 + 127) / 255) as u8])
    });

    let resized = imageops::resize(
        &gray,
        IMAGE_SIZE as u32,
        IMAGE_SIZE as u32,
        imageops::FilterType::Triangle,
    );
    Sample::new(resized.pixels().map(|p| p.0[0] as f32 / 255.0).collect())
}
