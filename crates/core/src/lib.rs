//! Transport-agnostic building blocks of the CodePrep assistant relay: the
//! streamed record type, its line decoder, the generation backend seam and
//! the prompt topic filter.

pub mod decoder;
pub mod generation;
pub mod record;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod topic;

pub use decoder::RecordDecoder;
pub use generation::{
    ChunkStream, GenerationBackend, GenerationError, GenerationRequest, OllamaClient,
    SamplingOptions,
};
pub use record::StreamRecord;
pub use topic::TopicFilter;
