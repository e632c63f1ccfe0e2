//! In-process synthetic `EventSource` used by tests and the `demos/`
//! example. Generates a fixed number of single-frame events per worker,
//! optionally injecting a Bragg-like spot into a subset of frames so the
//! peakfinder has something to find without a real detector.
//!
//! Backs the CLI's `mock:<n>` source convenience mode: development use the
//! facility-adapter non-goal (spec.md §1) explicitly allows a core-only
//! implementation to supply, since it has no dependency on psana/HiDRA/
//! Karabo.

use std::any::Any;

use common::OmResult;
use om_core::DetectorImage;

use crate::event_source::{partition_bounds, Event, EventSource, ExtractedField, SourceParams};

/// One synthetic detector readout: flat background, with an optional
/// 3x3 spot injected at `(cy, cx)`.
pub struct MockEvent {
    shape: (usize, usize),
    spot: Option<(usize, usize)>,
    frame_count: usize,
    opened: bool,
    closed: bool,
}

impl MockEvent {
    pub fn new(shape: (usize, usize), spot: Option<(usize, usize)>, frame_count: usize) -> Self {
        Self {
            shape,
            spot,
            frame_count,
            opened: false,
            closed: false,
        }
    }

    /// Render the synthetic frame: background of 100.0, with a 5000.0
    /// 3x3 spot if one was configured.
    pub fn render(&self) -> DetectorImage {
        let mut img = DetectorImage::filled(self.shape, 100.0);
        if let Some((cy, cx)) = self.spot {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let ss = (cy as i64 + dy).clamp(0, self.shape.0 as i64 - 1) as usize;
                    let fs = (cx as i64 + dx).clamp(0, self.shape.1 as i64 - 1) as usize;
                    img.set(ss, fs, 5000.0);
                }
            }
        }
        img
    }
}

impl Event for MockEvent {
    fn open(&mut self) -> OmResult<()> {
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) -> OmResult<()> {
        self.closed = true;
        Ok(())
    }

    fn num_frames(&self) -> usize {
        self.frame_count
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parameters controlling the synthetic stream: how many events this
/// source yields in total (before per-worker partitioning), the frame
/// shape, and how often a Bragg-like spot is injected.
#[derive(Debug, Clone)]
pub struct MockSourceConfig {
    pub num_events: usize,
    pub shape: (usize, usize),
    /// Every `hit_every`-th event (1-indexed) gets a spot; 0 disables spots.
    pub hit_every: usize,
}

impl Default for MockSourceConfig {
    fn default() -> Self {
        Self {
            num_events: 100,
            shape: (64, 64),
            hit_every: 10,
        }
    }
}

pub struct MockSource {
    config: MockSourceConfig,
}

impl MockSource {
    pub fn new(config: MockSourceConfig) -> Self {
        Self { config }
    }
}

impl EventSource for MockSource {
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
        _source_string: &str,
        node_rank: usize,
        pool_size: usize,
        _params: &SourceParams,
    ) -> OmResult<Box<dyn Iterator<Item = Box<dyn Event>> + Send>> {
        let (start, end) = partition_bounds(self.config.num_events, node_rank, pool_size);
        let shape = self.config.shape;
        let hit_every = self.config.hit_every;

        let events = (start..end).map(move |i| {
            let spot = if hit_every > 0 && (i + 1) % hit_every == 0 {
                Some((shape.0 / 2, shape.1 / 2))
            } else {
                None
            };
            Box::new(MockEvent::new(shape, spot, 1)) as Box<dyn Event>
        });

        Ok(Box::new(events))
    }
}

/// Extractor callbacks for `MockEvent`: every name `required_data` can name
/// for this adapter.
pub fn timestamp_fn(_event: &dyn Event, _frame_offset: i64) -> OmResult<ExtractedField> {
    Ok(ExtractedField::Float(common::now().timestamp() as f64))
}

pub fn beam_energy_fn(_event: &dyn Event, _frame_offset: i64) -> OmResult<ExtractedField> {
    Ok(ExtractedField::Float(9500.0))
}

pub fn detector_distance_fn(_event: &dyn Event, _frame_offset: i64) -> OmResult<ExtractedField> {
    Ok(ExtractedField::Float(120.0))
}

pub fn detector_data_fn(event: &dyn Event, _frame_offset: i64) -> OmResult<ExtractedField> {
    let mock = event
        .as_any()
        .downcast_ref::<MockEvent>()
        .expect("detector_data_fn registered against a non-mock event source");
    Ok(ExtractedField::Image(mock.render()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterate_partitions_events_across_workers() {
        let config = MockSourceConfig {
            num_events: 10,
            ..Default::default()
        };
        let mut source = MockSource::new(config);
        let params = SourceParams::default();
        source.initialize("mock:10", 4, &params).unwrap();

        let mut total = 0;
        for rank in 1..4 {
            let events: Vec<_> = source.iterate("mock:10", rank, 4, &params).unwrap().collect();
            total += events.len();
        }
        assert_eq!(total, 10);
    }

    #[test]
    fn test_hit_every_injects_spot() {
        let config = MockSourceConfig {
            num_events: 3,
            hit_every: 1,
            ..Default::default()
        };
        let mut source = MockSource::new(config);
        let params = SourceParams::default();
        let events: Vec<_> = source.iterate("mock:3", 1, 2, &params).unwrap().collect();
        assert_eq!(events.len(), 3);
        let mock = events[0].as_any().downcast_ref::<MockEvent>().unwrap();
        assert!(mock.spot.is_some());
    }
}
