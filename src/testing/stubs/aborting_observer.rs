use crate::training::notification::{EventKind, TrainEvent, TrainObserver};

/// Returns false on the `nth` (1-based) event of `kind`.
#[derive(Debug)]
pub struct AbortingObserver {
    kind: EventKind,
    nth: usize,
    seen: Vec<EventKind>,
}

impl AbortingObserver {
    pub fn new(kind: EventKind, nth: usize) -> Self {
        Self {
            kind,
            nth,
            seen: Vec::new(),
        }
    }

    pub fn seen(&self) -> &[EventKind] {
        &self.seen
    }
}

impl TrainObserver for AbortingObserver {
    fn notify(&mut self, event: &TrainEvent<'_>) -> bool {
        let kind = event.kind();
        self.seen.push(kind);
        kind != self.kind || self.seen.iter().filter(|k| **k == kind).count() != self.nth
    }
}
