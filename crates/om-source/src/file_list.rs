//! File-list `EventSource`, grounded on the canonical
//! `onda/data_retrieval_layer/event_sources/onda_files.py`: the source
//! string names a newline-delimited list of file paths; `initialize` is a
//! no-op (no registration handshake for plain files); each worker reads
//! the list independently and slices it by `partition_bounds`.
//!
//! Decoding a facility-specific file format (CBF, the Jungfrau/psana HDF5
//! layouts, ...) is itself a facility-adapter concern (spec.md §1
//! non-goals) and is not implemented here. What this adapter *does* read
//! is a minimal, facility-agnostic raw frame format: each listed file is
//! exactly `shape.0 * shape.1` little-endian `f32` values in ss-major
//! order, the flattest possible on-disk encoding of a `DetectorImage` and
//! the one format this core can decode without delegating to a real
//! facility adapter. A file of the wrong size is a per-frame data
//! extraction error (skipped, not fatal), not silently ignored.

use std::any::Any;
use std::fs;
use std::time::SystemTime;

use common::{OmError, OmResult};
use om_core::DetectorImage;

use crate::event_source::{partition_bounds, Event, EventSource, ExtractedField, SourceParams};

pub struct FileEvent {
    pub full_path: String,
    pub file_creation_time: SystemTime,
    pub shape: (usize, usize),
}

impl Event for FileEvent {
    fn open(&mut self) -> OmResult<()> {
        Ok(())
    }

    fn close(&mut self) -> OmResult<()> {
        Ok(())
    }

    fn num_frames(&self) -> usize {
        1
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reads a newline-delimited file list, where each named file is a raw
/// `shape.0 * shape.1` little-endian `f32` frame (see module docs).
pub struct FileListSource {
    shape: (usize, usize),
}

impl FileListSource {
    pub fn new(shape: (usize, usize)) -> Self {
        Self { shape }
    }
}

impl EventSource for FileListSource {
    fn initialize(
        &mut self,
        _source_string: &str,
        _pool_size: usize,
        _params: &SourceParams,
    ) -> OmResult<()> {
        Ok(())
    }

    fn iterate(
        &mut self,
        source_string: &str,
        node_rank: usize,
        pool_size: usize,
        _params: &SourceParams,
    ) -> OmResult<Box<dyn Iterator<Item = Box<dyn Event>> + Send>> {
        let contents = fs::read_to_string(source_string).map_err(|e| {
            OmError::Dependency(format!("error reading the {source_string} source file: {e}"))
        })?;

        let paths: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let (start, end) = partition_bounds(paths.len(), node_rank, pool_size);
        let shape = self.shape;

        let events = paths[start..end].to_vec().into_iter().map(move |full_path| {
            let file_creation_time = fs::metadata(&full_path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            Box::new(FileEvent {
                full_path,
                file_creation_time,
                shape,
            }) as Box<dyn Event>
        });

        Ok(Box::new(events))
    }
}

/// Timestamp extractor for the file-list adapter: file modification time
/// as a first approximation when the file format carries no embedded
/// timestamp, mirroring `onda_files.py`'s `file_creation_time` fallback.
pub fn timestamp_fn(event: &dyn Event, _frame_offset: i64) -> OmResult<ExtractedField> {
    let file_event = event
        .as_any()
        .downcast_ref::<FileEvent>()
        .expect("timestamp_fn registered against a non-file event source");
    let seconds = file_event
        .file_creation_time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(ExtractedField::Float(seconds))
}

/// Raw-frame `detector_data` extractor: reads `full_path` as
/// `shape.0 * shape.1` little-endian `f32` values. A file whose size
/// doesn't match the configured shape is a data extraction error, so the
/// frame is skipped rather than the whole worker failing.
pub fn detector_data_fn(event: &dyn Event, _frame_offset: i64) -> OmResult<ExtractedField> {
    let file_event = event
        .as_any()
        .downcast_ref::<FileEvent>()
        .expect("detector_data_fn registered against a non-file event source");

    let bytes = fs::read(&file_event.full_path).map_err(|e| {
        OmError::DataExtraction(format!(
            "failed to read '{}': {e}",
            file_event.full_path
        ))
    })?;

    let (ss_len, fs_len) = file_event.shape;
    let expected_len = ss_len * fs_len * std::mem::size_of::<f32>();
    if bytes.len() != expected_len {
        return Err(OmError::DataExtraction(format!(
            "'{}' is {} bytes, expected {} for a {}x{} raw f32 frame",
            file_event.full_path,
            bytes.len(),
            expected_len,
            ss_len,
            fs_len
        )));
    }

    let data = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok(ExtractedField::Image(DetectorImage::new(
        data,
        file_event.shape,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_iterate_partitions_file_list_across_workers() {
        let dir = std::env::temp_dir().join(format!("om-filelist-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let list_path = dir.join("files.lst");
        let mut f = fs::File::create(&list_path).unwrap();
        for i in 0..7 {
            let data_path = dir.join(format!("frame_{i}.h5"));
            fs::write(&data_path, b"x").unwrap();
            writeln!(f, "{}", data_path.display()).unwrap();
        }

        let mut source = FileListSource::new((2, 2));
        let params = SourceParams::default();
        let list_str = list_path.to_str().unwrap();

        let mut total = 0;
        for rank in 1..4 {
            let events: Vec<_> = source.iterate(list_str, rank, 4, &params).unwrap().collect();
            total += events.len();
        }
        assert_eq!(total, 7);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_dependency_error() {
        let mut source = FileListSource::new((2, 2));
        let params = SourceParams::default();
        let err = source
            .iterate("/nonexistent/path/does-not-exist.lst", 1, 2, &params)
            .unwrap_err();
        assert!(matches!(err, OmError::Dependency(_)));
    }

    #[test]
    fn test_detector_data_fn_reads_raw_f32_frame() {
        let dir = std::env::temp_dir().join(format!("om-filelist-raw-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let data_path = dir.join("frame.raw");
        let values: [f32; 4] = [1.0, 2.0, 3.0, 4.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(&data_path, &bytes).unwrap();

        let mut event = FileEvent {
            full_path: data_path.to_str().unwrap().to_string(),
            file_creation_time: SystemTime::UNIX_EPOCH,
            shape: (2, 2),
        };
        event.open().unwrap();

        let extracted = detector_data_fn(&event, -1).unwrap();
        match extracted {
            ExtractedField::Image(img) => assert_eq!(img.data, vec![1.0, 2.0, 3.0, 4.0]),
            other => panic!("expected an Image field, got {other:?}"),
        }

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_detector_data_fn_rejects_wrong_size_file() {
        let dir = std::env::temp_dir().join(format!("om-filelist-badsize-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let data_path = dir.join("frame.raw");
        fs::write(&data_path, b"too short").unwrap();

        let mut event = FileEvent {
            full_path: data_path.to_str().unwrap().to_string(),
            file_creation_time: SystemTime::UNIX_EPOCH,
            shape: (2, 2),
        };
        event.open().unwrap();

        let err = detector_data_fn(&event, -1).unwrap_err();
        assert!(matches!(err, OmError::DataExtraction(_)));

        fs::remove_dir_all(&dir).ok();
    }
}
