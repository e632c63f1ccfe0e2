//! Shared data model: detector images, reference arrays, peak lists, and
//! the per-frame record passed from worker to collector.

use serde::{Deserialize, Serialize};

/// A 2D numeric array in "slab" layout: ASICs tiled into an
/// `(nasics_y*asic_ny) x (nasics_x*asic_nx)` rectangle. `shape` is
/// `(ss_len, fs_len)` — slow-scan rows, fast-scan columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorImage {
    pub data: Vec<f32>,
    pub shape: (usize, usize),
}

impl DetectorImage {
    pub fn new(data: Vec<f32>, shape: (usize, usize)) -> Self {
        debug_assert_eq!(data.len(), shape.0 * shape.1);
        Self { data, shape }
    }

    pub fn filled(shape: (usize, usize), value: f32) -> Self {
        Self {
            data: vec![value; shape.0 * shape.1],
            shape,
        }
    }

    #[inline]
    pub fn get(&self, ss: usize, fs: usize) -> f32 {
        self.data[ss * self.shape.1 + fs]
    }

    #[inline]
    pub fn set(&mut self, ss: usize, fs: usize, value: f32) {
        self.data[ss * self.shape.1 + fs] = value;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An 8-bit mask of the same shape as a `DetectorImage`. A value of 0
/// means "ignore in peak search".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadPixelMap {
    pub data: Vec<u8>,
    pub shape: (usize, usize),
}

impl BadPixelMap {
    pub fn new(data: Vec<u8>, shape: (usize, usize)) -> Self {
        Self { data, shape }
    }

    pub fn all_good(shape: (usize, usize)) -> Self {
        Self {
            data: vec![1; shape.0 * shape.1],
            shape,
        }
    }

    #[inline]
    pub fn is_good(&self, ss: usize, fs: usize) -> bool {
        self.data[ss * self.shape.1 + fs] != 0
    }
}

/// A 32-bit float array of the same shape as a `DetectorImage`; element
/// `(ss, fs)` is the pixel's distance from the detector center, in pixel
/// units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiusMap {
    pub data: Vec<f32>,
    pub shape: (usize, usize),
}

impl RadiusMap {
    pub fn new(data: Vec<f32>, shape: (usize, usize)) -> Self {
        Self { data, shape }
    }

    #[inline]
    pub fn get(&self, ss: usize, fs: usize) -> f32 {
        self.data[ss * self.shape.1 + fs]
    }
}

/// Parallel arrays of peak coordinates and integrated intensity, in scan
/// order. Kept as three parallel vectors rather than a struct-of-structs
/// so the wire representation (object of arrays) is a direct field copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakList {
    pub fs: Vec<f32>,
    pub ss: Vec<f32>,
    pub intensity: Vec<f32>,
}

impl PeakList {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn num_peaks(&self) -> usize {
        self.fs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fs.is_empty()
    }

    pub fn clear(&mut self) {
        self.fs.clear();
        self.ss.clear();
        self.intensity.clear();
    }
}

/// The per-frame reduction sent from a worker to the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    /// Seconds since epoch.
    pub timestamp: f64,
    pub frame_is_hit: bool,
    pub frame_is_saturated: bool,
    /// Filled in by the collector from the rolling windows; 0.0 until then.
    #[serde(default)]
    pub hit_rate: f32,
    #[serde(default)]
    pub saturation_rate: f32,
    pub beam_energy: f32,
    pub detector_distance: f32,
    pub native_data_shape: (usize, usize),
    #[serde(default)]
    pub geometry_is_optimized: bool,
    pub peak_list: PeakList,
    /// Present only on sampled frames (see worker frame-sampling policy).
    #[serde(default)]
    pub detector_data: Option<DetectorImage>,
}

/// A sentinel emitted exactly once by every worker before it finalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationToken {
    pub worker_rank: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_image_indexing() {
        let mut img = DetectorImage::filled((2, 3), 0.0);
        img.set(1, 2, 7.5);
        assert_eq!(img.get(1, 2), 7.5);
        assert_eq!(img.len(), 6);
    }

    #[test]
    fn test_processed_record_round_trip() {
        let record = ProcessedRecord {
            timestamp: 123.456,
            frame_is_hit: true,
            frame_is_saturated: false,
            hit_rate: 0.5,
            saturation_rate: 0.0,
            beam_energy: 9500.0,
            detector_distance: 120.0,
            native_data_shape: (64, 64),
            geometry_is_optimized: true,
            peak_list: PeakList {
                fs: vec![32.1],
                ss: vec![31.9],
                intensity: vec![45000.0],
            },
            detector_data: None,
        };

        let bytes = rmp_serde::to_vec_named(&record).expect("serialize");
        let decoded: ProcessedRecord = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(record, decoded);
    }
}
