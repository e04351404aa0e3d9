pub mod progress;

pub use progress::{IterationEvent, ProgressSink};
