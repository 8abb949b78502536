//! Domain models for the triage pipeline

mod priority;
mod record;

pub use priority::{ClassificationResult, Priority};
pub use record::{CONTENT_PREVIEW_CHARS, ClassifiedRecord, ProviderId};
