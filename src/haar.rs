use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use crate::error::Error;

pub const NUM_PIXELS: usize = 128;
pub const NUM_PIXELS_SQUARED: usize = NUM_PIXELS * NUM_PIXELS;
pub const NUM_COEFS: usize = 40;
pub const NUM_CHANNELS: usize = 3;

/// Number of weight bins; positions beyond the 5th row/column share the last one.
pub const NUM_BINS: usize = 6;

// Kept at four digits so signatures stay comparable with stored ones.
#[allow(clippy::approx_constant)]
const HAAR_SCALE: f64 = 0.7071;

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Per-channel (Y, I, Q) average intensity.
    pub averages: [f64; NUM_CHANNELS],
    /// Signed positions of the retained coefficients, sorted ascending.
    pub coefficients: [[i32; NUM_COEFS]; NUM_CHANNELS],
}

impl Signature {
    /// Compute the fingerprint of a decoded image.
    pub fn from_image(img: &DynamicImage) -> Signature {
        let resized = img.resize_exact(NUM_PIXELS as u32, NUM_PIXELS as u32, FilterType::Triangle);
        Signature::from_rgb(&resized.to_rgb8())
    }

    /// Compute the fingerprint of an RGB buffer that is already 128x128.
    /// Larger or smaller buffers are rescaled first.
    pub fn from_rgb(img: &RgbImage) -> Signature {
        if img.width() as usize != NUM_PIXELS || img.height() as usize != NUM_PIXELS {
            return Signature::from_image(&DynamicImage::ImageRgb8(img.clone()));
        }

        let mut y = vec![0.0; NUM_PIXELS_SQUARED];
        let mut i = vec![0.0; NUM_PIXELS_SQUARED];
        let mut q = vec![0.0; NUM_PIXELS_SQUARED];

        for (idx, pixel) in img.pixels().enumerate() {
            let [r, g, b] = pixel.0.map(f64::from);
            y[idx] = 0.299 * r + 0.587 * g + 0.114 * b;
            i[idx] = 0.596 * r - 0.275 * g - 0.321 * b;
            q[idx] = 0.212 * r - 0.523 * g + 0.311 * b;
        }

        let mut averages = [0.0; NUM_CHANNELS];
        let mut coefficients = [[0; NUM_COEFS]; NUM_CHANNELS];

        for (channel, data) in [&mut y, &mut i, &mut q].into_iter().enumerate() {
            haar_2d(data);
            data[0] /= 256.0 * 128.0;
            averages[channel] = data[0];
            coefficients[channel] = largest_coefficients(data);
        }

        Signature {
            averages,
            coefficients,
        }
    }

    /// Check that every coefficient addresses a real, non-average position.
    pub fn validate(&self) -> Result<(), String> {
        for (channel, coefs) in self.coefficients.iter().enumerate() {
            for &c in coefs {
                let pos = c.unsigned_abs() as usize;
                if pos == 0 || pos >= NUM_PIXELS_SQUARED {
                    return Err(format!("coefficient {c} out of range in channel {channel}"));
                }
            }
        }
        if self.averages.iter().any(|a| !a.is_finite()) {
            return Err("non-finite channel average".to_string());
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Compute the fingerprint of a decoded image.
pub fn compute_signature(img: &DynamicImage) -> Signature {
    Signature::from_image(img)
}

fn haar_2d(a: &mut [f64]) {
    let mut temp = [0.0; NUM_PIXELS / 2];

    for row in a.chunks_exact_mut(NUM_PIXELS) {
        haar_1d(row, &mut temp);
    }

    let mut column = [0.0; NUM_PIXELS];
    for col in 0..NUM_PIXELS {
        for (row, value) in column.iter_mut().enumerate() {
            *value = a[row * NUM_PIXELS + col];
        }
        haar_1d(&mut column, &mut temp);
        for (row, value) in column.iter().enumerate() {
            a[row * NUM_PIXELS + col] = *value;
        }
    }
}

/// Full decomposition of one row or column. Sums move to the front,
/// scaled differences to the back half of each level.
fn haar_1d(data: &mut [f64], temp: &mut [f64]) {
    let mut c = 1.0;
    let mut h = data.len();
    while h > 1 {
        let h1 = h / 2;
        c *= HAAR_SCALE;
        for k in 0..h1 {
            let (a, b) = (data[2 * k], data[2 * k + 1]);
            temp[k] = (a - b) * c;
            data[k] = a + b;
        }
        data[h1..h].copy_from_slice(&temp[..h1]);
        h = h1;
    }
    data[0] *= c;
}

fn largest_coefficients(data: &[f64]) -> [i32; NUM_COEFS] {
    // Position 0 holds the average and never takes part.
    let mut positions: Vec<usize> = (1..NUM_PIXELS_SQUARED).collect();
    positions.select_nth_unstable_by(NUM_COEFS - 1, |a, b| {
        data[*b].abs().total_cmp(&data[*a].abs()).then(a.cmp(b))
    });

    let mut coefs = [0; NUM_COEFS];
    for (slot, &pos) in coefs.iter_mut().zip(&positions[..NUM_COEFS]) {
        let pos = pos as i32;
        *slot = if data[pos as usize] > 0.0 { pos } else { -pos };
    }
    coefs.sort_unstable();
    coefs
}

/// Weight profile: photographs or hand-painted sketches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SketchType {
    #[default]
    Scanned,
    Painted,
}

impl fmt::Display for SketchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SketchType::Scanned => write!(f, "scanned"),
            SketchType::Painted => write!(f, "painted"),
        }
    }
}

impl FromStr for SketchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scanned" => Ok(SketchType::Scanned),
            "painted" => Ok(SketchType::Painted),
            other => Err(Error::InvalidArgument(format!("unknown sketch type: {other}"))),
        }
    }
}

/// Constant weights per bin and channel. Bin 0 also weighs the averages.
#[derive(Debug)]
pub struct Weights {
    table: [[f64; NUM_CHANNELS]; NUM_BINS],
}

static SCANNED_WEIGHTS: Weights = Weights {
    table: [
        [5.00, 19.21, 34.37],
        [0.83, 1.26, 0.36],
        [1.01, 0.44, 0.45],
        [0.52, 0.53, 0.14],
        [0.47, 0.28, 0.18],
        [0.30, 0.14, 0.27],
    ],
};

static PAINTED_WEIGHTS: Weights = Weights {
    table: [
        [4.04, 15.14, 22.62],
        [0.78, 0.92, 0.40],
        [0.46, 0.53, 0.63],
        [0.42, 0.26, 0.25],
        [0.41, 0.14, 0.15],
        [0.32, 0.07, 0.38],
    ],
};

impl Weights {
    pub fn get(sketch: SketchType) -> &'static Weights {
        match sketch {
            SketchType::Scanned => &SCANNED_WEIGHTS,
            SketchType::Painted => &PAINTED_WEIGHTS,
        }
    }

    pub fn for_average(&self, channel: usize) -> f64 {
        self.table[0][channel]
    }

    pub fn weight(&self, bin: usize, channel: usize) -> f64 {
        self.table[bin][channel]
    }

    /// Weight of a signed coefficient position in one channel.
    pub fn for_coefficient(&self, coefficient: i32, channel: usize) -> f64 {
        self.weight(weight_bin(coefficient), channel)
    }
}

/// Bin of a signed coefficient position: the larger of its row and column,
/// capped at the last bin.
pub fn weight_bin(coefficient: i32) -> usize {
    let pos = coefficient.unsigned_abs() as usize;
    (pos / NUM_PIXELS).max(pos % NUM_PIXELS).min(NUM_BINS - 1)
}
