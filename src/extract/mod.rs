//! Knowledge extraction: service client, schema boundary, concurrent
//! engine, and cross-chunk deduplication.

pub mod dedup;
pub mod engine;
pub mod schema;
pub mod service;

pub use dedup::{
    CanonicalKnowledgeSet, ExtractedEntity, ExtractedRelationship, KeyMoment, KnowledgeBuilder,
};
pub use engine::{ExtractionEngine, ExtractionOutcome};
pub use schema::ChunkExtraction;
pub use service::{Extractor, HttpExtractor, MockExtraction, MockExtractor};
