//! Schema validation at the extraction service boundary.
//!
//! The LLM returns dynamically-shaped JSON. It is validated against the
//! fixed schema here, at the single boundary, and converted into typed
//! records immediately; malformed payloads are quarantined here rather
//! than propagating loosely-typed data inward.

use crate::error::{LongwaveError, Result};
use crate::extract::dedup::{ExtractedEntity, ExtractedRelationship, KeyMoment};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    relationships: Vec<RawRelationship>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    key_moments: Vec<RawKeyMoment>,
    #[serde(default)]
    sentiment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    confidence: f64,
    #[serde(default)]
    evidence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    subject: String,
    predicate: String,
    object: String,
    confidence: f64,
    #[serde(default)]
    evidence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawKeyMoment {
    description: String,
    #[serde(default)]
    timestamp_secs: Option<f64>,
}

/// One chunk's validated extraction results.
#[derive(Debug, Clone, Default)]
pub struct ChunkExtraction {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
    pub topics: Vec<String>,
    pub key_moments: Vec<KeyMoment>,
    pub sentiment: Option<String>,
    /// Records dropped for violating field-level constraints.
    pub quarantined: usize,
}

/// Validate a raw service response for one chunk.
///
/// A payload that does not match the schema at the top level is a
/// [`LongwaveError::SchemaViolation`] (retryable as an extraction-call
/// failure). Individual records with empty identities or out-of-range
/// confidence are dropped and counted, not propagated.
pub fn validate(payload: &serde_json::Value, source_chunk: usize) -> Result<ChunkExtraction> {
    let raw: RawPayload =
        serde_json::from_value(payload.clone()).map_err(|e| LongwaveError::SchemaViolation {
            message: format!("chunk {source_chunk}: {e}"),
        })?;

    let mut out = ChunkExtraction::default();

    for entity in raw.entities {
        if entity.name.trim().is_empty()
            || entity.kind.trim().is_empty()
            || !(0.0..=1.0).contains(&entity.confidence)
        {
            out.quarantined += 1;
            continue;
        }
        out.entities.push(ExtractedEntity {
            name: entity.name,
            kind: entity.kind,
            confidence: entity.confidence,
            evidence: entity.evidence,
            source_chunk,
        });
    }

    for rel in raw.relationships {
        if rel.subject.trim().is_empty()
            || rel.predicate.trim().is_empty()
            || rel.object.trim().is_empty()
            || !(0.0..=1.0).contains(&rel.confidence)
        {
            out.quarantined += 1;
            continue;
        }
        out.relationships.push(ExtractedRelationship {
            subject: rel.subject,
            predicate: rel.predicate,
            object: rel.object,
            confidence: rel.confidence,
            evidence: rel.evidence,
            source_chunk,
        });
    }

    for moment in raw.key_moments {
        if moment.description.trim().is_empty() {
            out.quarantined += 1;
            continue;
        }
        out.key_moments.push(KeyMoment {
            description: moment.description,
            timestamp_secs: moment.timestamp_secs,
        });
    }

    out.topics = raw
        .topics
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .collect();
    out.sentiment = raw.sentiment.filter(|s| !s.trim().is_empty());

    if out.quarantined > 0 {
        warn!(
            chunk = source_chunk,
            quarantined = out.quarantined,
            "dropped malformed extraction records at service boundary"
        );
    }

    Ok(out)
}
