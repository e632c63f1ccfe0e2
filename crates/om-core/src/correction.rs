//! C1: dark/gain/mask correction.
//!
//! `apply(data) = (data * mask - dark) * gain`, applied as a single fused
//! elementwise pass over precomputed arrays.

use crate::data::DetectorImage;
use common::{OmError, OmResult};

/// Precomputed correction arrays. Absent dark is treated as all-zeros,
/// absent mask as all-ones, absent gain as all-ones.
pub struct Correction {
    mask: Vec<f32>,
    dark: Vec<f32>,
    gain: Vec<f32>,
    shape: (usize, usize),
}

impl Correction {
    /// Build a `Correction` from optional precomputed arrays. The caller is
    /// responsible for the load-time (filename, hdf5_path) presence check;
    /// this constructor only verifies the arrays agree in shape.
    pub fn new(
        shape: (usize, usize),
        mask: Option<Vec<u8>>,
        dark: Option<Vec<f32>>,
        gain: Option<Vec<f32>>,
    ) -> OmResult<Self> {
        let len = shape.0 * shape.1;

        let mask = match mask {
            Some(m) => {
                if m.len() != len {
                    return Err(OmError::ReferenceArrayIo(format!(
                        "mask array length {} does not match frame shape {:?}",
                        m.len(),
                        shape
                    )));
                }
                m.into_iter().map(|v| if v != 0 { 1.0 } else { 0.0 }).collect()
            }
            None => vec![1.0; len],
        };

        let dark = match dark {
            Some(d) => {
                if d.len() != len {
                    return Err(OmError::ReferenceArrayIo(format!(
                        "dark array length {} does not match frame shape {:?}",
                        d.len(),
                        shape
                    )));
                }
                d
            }
            None => vec![0.0; len],
        };

        let gain = match gain {
            Some(g) => {
                if g.len() != len {
                    return Err(OmError::ReferenceArrayIo(format!(
                        "gain array length {} does not match frame shape {:?}",
                        g.len(),
                        shape
                    )));
                }
                g
            }
            None => vec![1.0; len],
        };

        Ok(Self {
            mask,
            dark,
            gain,
            shape,
        })
    }

    /// Apply `(data * mask - dark) * gain` in place, in that exact order.
    pub fn apply(&self, data: &mut DetectorImage) -> OmResult<()> {
        if data.shape != self.shape {
            return Err(OmError::DataExtraction(format!(
                "frame shape {:?} does not match correction arrays shape {:?}",
                data.shape, self.shape
            )));
        }

        for ((value, mask), (dark, gain)) in data
            .data
            .iter_mut()
            .zip(self.mask.iter())
            .zip(self.dark.iter().zip(self.gain.iter()))
        {
            *value = (*value * mask - dark) * gain;
        }

        Ok(())
    }
}
