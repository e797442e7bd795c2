mod generators;
mod spies {
    pub mod recording_observer;
}
mod stubs {
    pub mod aborting_observer;
    pub mod vec_sample_stream;
}

pub use generators::{abs_samples, noisy_samples};
pub use spies::recording_observer::RecordingObserver;
pub use stubs::aborting_observer::AbortingObserver;
pub use stubs::vec_sample_stream::VecSampleStream;
