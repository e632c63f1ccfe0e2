//! C7: Extractor — a name-to-function table resolved once at worker
//! startup against the active facility adapter.

use std::collections::HashMap;

use common::{OmError, OmResult};

use crate::event_source::{Event, ExtractedField};

pub type ExtractFn = Box<dyn Fn(&dyn Event, i64) -> OmResult<ExtractedField> + Send + Sync>;

/// Holds the callbacks registered for a given adapter, plus the set of
/// names that `required_data` demands be present.
#[derive(Default)]
pub struct Extractor {
    functions: HashMap<String, ExtractFn>,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, f: ExtractFn) {
        self.functions.insert(name.into(), f);
    }

    /// Verify every name in `required` resolves. Called once at worker
    /// startup; an unresolved name is a fatal missing-function error.
    pub fn resolve(&self, required: &[String]) -> OmResult<()> {
        for name in required {
            if !self.functions.contains_key(name) {
                return Err(OmError::MissingFunction(name.clone()));
            }
        }
        Ok(())
    }

    /// Run every required callback against `event` at `frame_offset`. If
    /// any callback fails the whole frame is skipped: the caller logs the
    /// error with the frame identifier and moves on to the next frame.
    pub fn extract(
        &self,
        event: &dyn Event,
        frame_offset: i64,
        required: &[String],
    ) -> OmResult<HashMap<String, ExtractedField>> {
        let mut out = HashMap::with_capacity(required.len());
        for name in required {
            let f = self
                .functions
                .get(name)
                .expect("resolve() must be called before extract()");
            let value = f(event, frame_offset).map_err(|e| {
                OmError::DataExtraction(format!("extractor '{name}' failed at frame {frame_offset}: {e}"))
            })?;
            out.insert(name.clone(), value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEvent;

    #[test]
    fn test_missing_required_function_is_fatal() {
        let extractor = Extractor::new();
        let required = vec!["timestamp".to_string()];
        let err = extractor.resolve(&required).unwrap_err();
        assert!(matches!(err, OmError::MissingFunction(_)));
    }

    #[test]
    fn test_failing_callback_skips_whole_frame() {
        let mut extractor = Extractor::new();
        extractor.register("timestamp", Box::new(|_event, _offset| {
            Err(OmError::DataExtraction("synthetic failure".into()))
        }));
        let event = MockEvent::new((4, 4), None, 1);
        let required = vec!["timestamp".to_string()];
        let err = extractor.extract(&event, -1, &required).unwrap_err();
        assert!(matches!(err, OmError::DataExtraction(_)));
    }
}
