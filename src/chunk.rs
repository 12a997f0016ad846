//! Chunk planner: splits unbounded recordings into bounded, ordered units.
//!
//! Audio-side planning covers the timeline with gap-free, non-overlapping
//! chunks under the speech model's hard per-call ceiling, snapping split
//! points to detected pauses. Text-side planning batches whole utterances
//! by segment count for the context-limited extraction service.

use crate::config::ChunkingConfig;
use crate::error::{LongwaveError, Result};
use crate::types::{AudioChunk, Segment, TextChunk, TimeSpan};

/// Plan audio chunks covering `[0, duration_secs)`.
///
/// Activates only when the recording exceeds the speech ceiling; shorter
/// input yields exactly one chunk. Each split lands at the detected pause
/// nearest to the budget boundary within `pause_tolerance_secs`, falling
/// back to a hard cut at the boundary itself.
pub fn plan_audio_chunks(
    duration_secs: f64,
    pauses: &[TimeSpan],
    config: &ChunkingConfig,
) -> Vec<AudioChunk> {
    if duration_secs <= 0.0 {
        return Vec::new();
    }

    let ceiling = config.speech_ceiling_secs;
    if duration_secs <= ceiling {
        return vec![AudioChunk {
            index: 0,
            span: TimeSpan::new(0.0, duration_secs),
        }];
    }

    let mut chunks = Vec::new();
    let mut cursor = 0.0_f64;

    while duration_secs - cursor > ceiling {
        let boundary = cursor + ceiling;
        let split = best_split_point(pauses, cursor, boundary, config.pause_tolerance_secs)
            .unwrap_or(boundary);

        chunks.push(AudioChunk {
            index: chunks.len(),
            span: TimeSpan::new(cursor, split),
        });
        cursor = split;
    }

    chunks.push(AudioChunk {
        index: chunks.len(),
        span: TimeSpan::new(cursor, duration_secs),
    });

    chunks
}

/// Pause midpoint nearest `boundary` within `[boundary - tolerance, boundary]`,
/// strictly after `cursor` so every chunk keeps positive duration.
fn best_split_point(
    pauses: &[TimeSpan],
    cursor: f64,
    boundary: f64,
    tolerance: f64,
) -> Option<f64> {
    pauses
        .iter()
        .map(|pause| pause.midpoint())
        .filter(|&mid| mid > cursor && mid <= boundary && boundary - mid <= tolerance)
        .min_by(|a, b| {
            let da = boundary - a;
            let db = boundary - b;
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Group refined segments into ordered text chunks by segment count.
///
/// Whole utterances are never split. A single utterance whose text alone
/// exceeds `max_utterance_chars` cannot fit any chunk and is a fatal
/// configuration error; uncontrolled truncation is never applied.
pub fn plan_text_chunks(segments: &[Segment], config: &ChunkingConfig) -> Result<Vec<TextChunk>> {
    for segment in segments {
        if segment.text.len() > config.max_utterance_chars {
            return Err(LongwaveError::UnsplittableInput {
                message: format!(
                    "utterance at {:.1}s is {} chars, exceeding the {}-char context ceiling",
                    segment.span.start,
                    segment.text.len(),
                    config.max_utterance_chars
                ),
            });
        }
    }

    let chunks = segments
        .chunks(config.segments_per_text_chunk)
        .enumerate()
        .map(|(index, batch)| TextChunk {
            index,
            first_segment: index * config.segments_per_text_chunk,
            segment_count: batch.len(),
            text: render_transcript(batch),
        })
        .collect();

    Ok(chunks)
}

/// Speaker-prefixed transcript lines, preserving whole-utterance context.
fn render_transcript(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        let speaker = segment.speaker_id.as_deref().unwrap_or("UNKNOWN");
        out.push_str(&format!(
            "[{:.1}s] {}: {}\n",
            segment.span.start, speaker, segment.text
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeSpan;

    fn config() -> ChunkingConfig {
        ChunkingConfig {
            speech_ceiling_secs: 600.0,
            pause_tolerance_secs: 30.0,
            segments_per_text_chunk: 10,
            max_utterance_chars: 500,
            ..ChunkingConfig::default()
        }
    }

    fn segment(start: f64, end: f64, speaker: &str, text: &str) -> Segment {
        Segment {
            span: TimeSpan::new(start, end),
            text: text.to_string(),
            speaker_id: Some(speaker.to_string()),
            word_confidence: 0.9,
            source_chunk: 0,
        }
    }

    fn assert_exact_cover(chunks: &[AudioChunk], duration: f64) {
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].span.start, 0.0);
        assert_eq!(chunks.last().unwrap().span.end, duration);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].span.end, pair[1].span.start, "gap or overlap");
            assert!(pair[0].index < pair[1].index, "index order != time order");
        }
        for chunk in chunks {
            assert!(chunk.span.duration() > 0.0);
        }
    }

    #[test]
    fn test_short_input_yields_one_chunk() {
        // 10 minutes exactly at the ceiling → no chunking
        let chunks = plan_audio_chunks(600.0, &[], &config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].span, TimeSpan::new(0.0, 600.0));
    }

    #[test]
    fn test_long_input_covers_exactly_without_pauses() {
        let chunks = plan_audio_chunks(1500.0, &[], &config());
        assert_eq!(chunks.len(), 3);
        assert_exact_cover(&chunks, 1500.0);
        // Hard cuts at the boundaries
        assert_eq!(chunks[0].span.end, 600.0);
        assert_eq!(chunks[1].span.end, 1200.0);
    }

    #[test]
    fn test_split_snaps_to_nearby_pause() {
        let pauses = vec![TimeSpan::new(584.0, 586.0)]; // midpoint 585, 15s before boundary
        let chunks = plan_audio_chunks(1100.0, &pauses, &config());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].span.end, 585.0);
        assert_exact_cover(&chunks, 1100.0);
    }

    #[test]
    fn test_pause_outside_tolerance_falls_back_to_hard_cut() {
        let pauses = vec![TimeSpan::new(500.0, 502.0)]; // midpoint 501, 99s before boundary
        let chunks = plan_audio_chunks(1100.0, &pauses, &config());
        assert_eq!(chunks[0].span.end, 600.0);
        assert_exact_cover(&chunks, 1100.0);
    }

    #[test]
    fn test_nearest_pause_wins() {
        let pauses = vec![
            TimeSpan::new(574.0, 576.0), // midpoint 575
            TimeSpan::new(589.0, 591.0), // midpoint 590, closer to boundary
        ];
        let chunks = plan_audio_chunks(1100.0, &pauses, &config());
        assert_eq!(chunks[0].span.end, 590.0);
    }

    #[test]
    fn test_many_chunks_preserve_order_and_cover() {
        // 90 minutes with a pause every 100s
        let pauses: Vec<TimeSpan> = (1..54)
            .map(|i| TimeSpan::new(i as f64 * 100.0 - 0.5, i as f64 * 100.0 + 0.5))
            .collect();
        let chunks = plan_audio_chunks(5400.0, &pauses, &config());
        assert!(chunks.len() >= 9);
        assert_exact_cover(&chunks, 5400.0);
    }

    #[test]
    fn test_zero_duration_yields_no_chunks() {
        assert!(plan_audio_chunks(0.0, &[], &config()).is_empty());
    }

    #[test]
    fn test_text_chunks_batch_by_segment_count() {
        let segments: Vec<Segment> = (0..25)
            .map(|i| segment(i as f64, i as f64 + 0.9, "SPEAKER_00", "hello there"))
            .collect();

        let chunks = plan_text_chunks(&segments, &config()).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].segment_count, 10);
        assert_eq!(chunks[1].segment_count, 10);
        assert_eq!(chunks[2].segment_count, 5);
        assert_eq!(chunks[2].first_segment, 20);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_text_chunks_single_batch_under_budget() {
        let segments: Vec<Segment> = (0..5)
            .map(|i| segment(i as f64, i as f64 + 0.9, "SPEAKER_00", "hi"))
            .collect();

        let chunks = plan_text_chunks(&segments, &config()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].segment_count, 5);
    }

    #[test]
    fn test_oversized_utterance_is_fatal_not_truncated() {
        let long_text = "x".repeat(501);
        let segments = vec![segment(0.0, 5.0, "SPEAKER_00", &long_text)];

        let err = plan_text_chunks(&segments, &config()).unwrap_err();
        assert!(matches!(err, LongwaveError::UnsplittableInput { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_transcript_rendering_includes_speakers() {
        let segments = vec![
            segment(0.0, 1.0, "SPEAKER_00", "hello"),
            Segment {
                span: TimeSpan::new(1.0, 2.0),
                text: "hi".to_string(),
                speaker_id: None,
                word_confidence: 0.9,
                source_chunk: 0,
            },
        ];
        let chunks = plan_text_chunks(&segments, &config()).unwrap();
        assert!(chunks[0].text.contains("SPEAKER_00: hello"));
        assert!(chunks[0].text.contains("UNKNOWN: hi"));
    }

    #[test]
    fn test_empty_segments_yield_no_text_chunks() {
        let chunks = plan_text_chunks(&[], &config()).unwrap();
        assert!(chunks.is_empty());
    }
}
