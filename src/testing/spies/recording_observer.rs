use crate::training::notification::{EventKind, TrainEvent, TrainObserver};

/// Records every event kind it is shown and the RMS error of each finished
/// epoch.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Vec<EventKind>,
    epoch_rms: Vec<f64>,
}

impl RecordingObserver {
    pub fn events(&self) -> &[EventKind] {
        &self.events
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|k| **k == kind).count()
    }

    pub fn epoch_rms(&self) -> &[f64] {
        &self.epoch_rms
    }
}

impl TrainObserver for RecordingObserver {
    fn notify(&mut self, event: &TrainEvent<'_>) -> bool {
        self.events.push(event.kind());
        if let TrainEvent::EpochEnd(info) = event {
            self.epoch_rms.push(info.rms_error);
        }
        true
    }
}
