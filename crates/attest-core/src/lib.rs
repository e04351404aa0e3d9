//! Incremental answer verification with a persistent answer cache.
//!
//! Candidate answers come from an [`providers::AnswerGenerator`], are submitted in batches
//! to an external [`providers::Verifier`], and the verifier's feedback is folded back
//! into an [`storage::AnswerStore`] so confirmed answers are never regenerated.

pub mod config;
pub mod engine;
pub mod errors;
pub mod feedback;
pub mod model;
pub mod providers;
pub mod report;
pub mod storage;

pub use config::EngineConfig;
pub use engine::{Orchestrator, RejectionSummary, RunReport, RunStatus};
pub use errors::{EngineError, GenerationError, StorageError, TransportError};
pub use feedback::{FeedbackInterpreter, Outcome};
pub use model::{Batch, IdNormalizer, Question};
pub use storage::AnswerStore;
