pub mod rows;
pub mod schema;
pub mod store;

pub use rows::{RunRow, SubmissionRow, WriteOutcome};
pub use store::AnswerStore;
