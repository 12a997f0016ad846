//! Cross-chunk deduplication into one canonical knowledge set.
//!
//! Extraction calls complete concurrently and out of order, so the merge
//! must be commutative and associative: per canonicalization key, keep the
//! highest-confidence representative, breaking ties by the earliest source
//! chunk. Objects under the confidence floors never enter the set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An extracted entity, typed at the service boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    /// Entity type, e.g. "PERSON", "ORGANIZATION".
    pub kind: String,
    pub confidence: f64,
    pub evidence: Option<String>,
    pub source_chunk: usize,
}

/// An extracted subject-predicate-object relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    pub evidence: Option<String>,
    pub source_chunk: usize,
}

/// A notable moment, only extracted for single-chunk transcripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMoment {
    pub description: String,
    /// Seconds into the recording, when the service reports one.
    pub timestamp_secs: Option<f64>,
}

/// The sole durable artifact of a run, handed to the export layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalKnowledgeSet {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
    /// Whole-document fields; empty unless the transcript fit one chunk.
    pub topics: Vec<String>,
    pub key_moments: Vec<KeyMoment>,
    pub sentiment: Option<String>,
}

/// Canonicalization: case- and whitespace-insensitive identity.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn entity_key(entity: &ExtractedEntity) -> (String, String) {
    (normalize(&entity.name), normalize(&entity.kind))
}

fn relationship_key(rel: &ExtractedRelationship) -> (String, String, String) {
    (
        normalize(&rel.subject),
        normalize(&rel.predicate),
        normalize(&rel.object),
    )
}

/// Incremental, order-insensitive builder for the canonical set.
///
/// Keyed on BTreeMaps so `finalize` output is identical for any arrival
/// order of the same per-chunk results.
#[derive(Debug)]
pub struct KnowledgeBuilder {
    entity_floor: f64,
    relationship_floor: f64,
    entities: BTreeMap<(String, String), ExtractedEntity>,
    relationships: BTreeMap<(String, String, String), ExtractedRelationship>,
    topics: Vec<String>,
    key_moments: Vec<KeyMoment>,
    sentiment: Option<String>,
}

impl KnowledgeBuilder {
    pub fn new(entity_floor: f64, relationship_floor: f64) -> Self {
        Self {
            entity_floor,
            relationship_floor,
            entities: BTreeMap::new(),
            relationships: BTreeMap::new(),
            topics: Vec::new(),
            key_moments: Vec::new(),
            sentiment: None,
        }
    }

    /// Merge one chunk's results. Commutative and associative with respect
    /// to other chunks' merges.
    pub fn merge(
        &mut self,
        entities: Vec<ExtractedEntity>,
        relationships: Vec<ExtractedRelationship>,
    ) {
        for entity in entities {
            if entity.confidence < self.entity_floor {
                continue;
            }
            let key = entity_key(&entity);
            match self.entities.get(&key) {
                Some(existing) if !beats(entity.confidence, entity.source_chunk, existing.confidence, existing.source_chunk) => {}
                _ => {
                    self.entities.insert(key, entity);
                }
            }
        }

        for rel in relationships {
            if rel.confidence < self.relationship_floor {
                continue;
            }
            let key = relationship_key(&rel);
            match self.relationships.get(&key) {
                Some(existing) if !beats(rel.confidence, rel.source_chunk, existing.confidence, existing.source_chunk) => {}
                _ => {
                    self.relationships.insert(key, rel);
                }
            }
        }
    }

    /// Attach whole-document fields (single-chunk transcripts only).
    pub fn set_document_fields(
        &mut self,
        topics: Vec<String>,
        key_moments: Vec<KeyMoment>,
        sentiment: Option<String>,
    ) {
        self.topics = topics;
        self.key_moments = key_moments;
        self.sentiment = sentiment;
    }

    /// Finalize once every chunk has reported (success or permanent failure).
    pub fn finalize(self) -> CanonicalKnowledgeSet {
        CanonicalKnowledgeSet {
            entities: self.entities.into_values().collect(),
            relationships: self.relationships.into_values().collect(),
            topics: self.topics,
            key_moments: self.key_moments,
            sentiment: self.sentiment,
        }
    }
}

/// Deterministic replacement rule: higher confidence wins; equal confidence
/// resolves to the earlier source chunk regardless of arrival order.
fn beats(
    confidence: f64,
    source_chunk: usize,
    incumbent_confidence: f64,
    incumbent_chunk: usize,
) -> bool {
    confidence > incumbent_confidence
        || (confidence == incumbent_confidence && source_chunk < incumbent_chunk)
}
