//! HDF5-backed loading of the dark/mask/gain/bad-pixel reference arrays
//! named by the `[Correction]` and `[Peakfinder8PeakDetection]`
//! configuration groups, grounded on the teacher repository's own
//! optional `hdf5-metno` dependency (`daq-storage`'s `storage_hdf5`
//! feature) for the same "read one named dataset out of an HDF5 file"
//! shape.
//!
//! Geometry parsing and visual pixel-map construction remain a non-goal
//! (spec.md §1): the `RadiusMap` is not loaded here — callers are expected
//! to supply it precomputed, e.g. from a geometry-adapter crate this
//! workspace does not implement.

use common::{OmError, OmResult};

/// Read a 2D dataset of `f32` at `hdf5_path` inside the HDF5 file at
/// `filename`. Used for dark and gain maps.
#[cfg(feature = "hdf5-io")]
pub fn load_f32_dataset(filename: &str, hdf5_path: &str) -> OmResult<(Vec<f32>, (usize, usize))> {
    let file = hdf5::File::open(filename)
        .map_err(|e| OmError::ReferenceArrayIo(format!("failed to open {filename}: {e}")))?;
    let dataset = file.dataset(hdf5_path).map_err(|e| {
        OmError::ReferenceArrayIo(format!("failed to open dataset {hdf5_path} in {filename}: {e}"))
    })?;
    let array: ndarray::Array2<f32> = dataset.read_2d().map_err(|e| {
        OmError::ReferenceArrayIo(format!("failed to read dataset {hdf5_path} in {filename}: {e}"))
    })?;
    let shape = (array.shape()[0], array.shape()[1]);
    Ok((array.into_raw_vec(), shape))
}

/// Read a 2D dataset of `u8` at `hdf5_path` inside the HDF5 file at
/// `filename`. Used for mask and bad-pixel maps.
#[cfg(feature = "hdf5-io")]
pub fn load_u8_dataset(filename: &str, hdf5_path: &str) -> OmResult<(Vec<u8>, (usize, usize))> {
    let file = hdf5::File::open(filename)
        .map_err(|e| OmError::ReferenceArrayIo(format!("failed to open {filename}: {e}")))?;
    let dataset = file.dataset(hdf5_path).map_err(|e| {
        OmError::ReferenceArrayIo(format!("failed to open dataset {hdf5_path} in {filename}: {e}"))
    })?;
    let array: ndarray::Array2<u8> = dataset.read_2d().map_err(|e| {
        OmError::ReferenceArrayIo(format!("failed to read dataset {hdf5_path} in {filename}: {e}"))
    })?;
    let shape = (array.shape()[0], array.shape()[1]);
    Ok((array.into_raw_vec(), shape))
}
