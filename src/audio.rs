//! Audio ingestion: WAV decoding and pause detection.
//!
//! Recordings arrive as WAV bytes from object storage. Arbitrary sample
//! rates and channel counts are normalized to 16kHz mono, and an RMS-based
//! energy scan produces the pause list the audio-side chunk planner snaps
//! split points to.

use crate::defaults::SAMPLE_RATE;
use crate::error::{LongwaveError, Result};
use crate::types::TimeSpan;
use std::io::Cursor;

/// Decoded recording, normalized to 16kHz mono PCM.
#[derive(Debug, Clone)]
pub struct Recording {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Recording {
    /// Decode WAV bytes, downmixing stereo and resampling to 16kHz.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let mut wav_reader =
            hound::WavReader::new(Cursor::new(bytes)).map_err(|e| LongwaveError::AudioDecode {
                message: format!("Failed to parse WAV data: {}", e),
            })?;

        let spec = wav_reader.spec();
        let source_rate = spec.sample_rate;
        let source_channels = spec.channels;

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| LongwaveError::AudioDecode {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        // Convert to mono if stereo
        let mono_samples = if source_channels == 2 {
            raw_samples
                .chunks_exact(2)
                .map(|chunk| {
                    let left = chunk[0] as i32;
                    let right = chunk[1] as i32;
                    ((left + right) / 2) as i16
                })
                .collect()
        } else {
            raw_samples
        };

        let samples = if source_rate != SAMPLE_RATE {
            resample(&mono_samples, source_rate, SAMPLE_RATE)
        } else {
            mono_samples
        };

        if samples.is_empty() {
            return Err(LongwaveError::AudioDecode {
                message: "WAV data contains no samples".to_string(),
            });
        }

        Ok(Self {
            samples,
            sample_rate: SAMPLE_RATE,
        })
    }

    /// Total duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Samples covering `span`, clamped to the recording length.
    pub fn slice(&self, span: TimeSpan) -> &[i16] {
        let start = (span.start * self.sample_rate as f64) as usize;
        let end = ((span.end * self.sample_rate as f64) as usize).min(self.samples.len());
        &self.samples[start.min(end)..end]
    }
}

/// Scan the recording for low-energy stretches usable as split points.
///
/// Consecutive analysis windows with RMS below `rms_threshold` are coalesced;
/// stretches of at least `min_pause_ms` are reported as pauses.
pub fn detect_pauses(
    recording: &Recording,
    rms_threshold: f32,
    min_pause_ms: u32,
    window_ms: u32,
) -> Vec<TimeSpan> {
    let window = (recording.sample_rate as u64 * window_ms as u64 / 1000) as usize;
    if window == 0 || recording.samples.is_empty() {
        return Vec::new();
    }

    let window_secs = window as f64 / recording.sample_rate as f64;
    let min_pause_secs = min_pause_ms as f64 / 1000.0;

    let mut pauses = Vec::new();
    let mut quiet_start: Option<f64> = None;

    for (i, chunk) in recording.samples.chunks(window).enumerate() {
        let t = i as f64 * window_secs;
        let quiet = calculate_rms(chunk) < rms_threshold;

        match (quiet, quiet_start) {
            (true, None) => quiet_start = Some(t),
            (false, Some(start)) => {
                if t - start >= min_pause_secs {
                    pauses.push(TimeSpan::new(start, t));
                }
                quiet_start = None;
            }
            _ => {}
        }
    }

    // Trailing quiet stretch counts too
    if let Some(start) = quiet_start {
        let end = recording.duration_secs();
        if end - start >= min_pause_secs {
            pauses.push(TimeSpan::new(start, end));
        }
    }

    pauses
}

/// Root-mean-square energy of the samples, normalized to `[0, 1]`.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 * ratio;
            let idx = src_pos as usize;
            if idx + 1 < samples.len() {
                let frac = src_pos - idx as f64;
                let a = samples[idx] as f64;
                let b = samples[idx + 1] as f64;
                (a + (b - a) * frac) as i16
            } else {
                samples[idx.min(samples.len() - 1)]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut buffer, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        buffer.into_inner()
    }

    /// Alternating loud/quiet signal: `pattern` lists (amplitude, seconds).
    fn synth(pattern: &[(i16, f64)]) -> Vec<i16> {
        let mut samples = Vec::new();
        for &(amplitude, secs) in pattern {
            let n = (secs * SAMPLE_RATE as f64) as usize;
            for i in 0..n {
                // Square-ish wave so RMS tracks amplitude
                let s = if i % 2 == 0 { amplitude } else { -amplitude };
                samples.push(s);
            }
        }
        samples
    }

    #[test]
    fn test_decode_mono_wav() {
        let samples = vec![100i16; 16000];
        let bytes = wav_bytes(&samples, 16000, 1);

        let recording = Recording::from_wav_bytes(&bytes).unwrap();
        assert_eq!(recording.samples.len(), 16000);
        assert_eq!(recording.sample_rate, 16000);
        assert!((recording.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_stereo_downmixes() {
        // Left 200, right 400 → mono 300
        let mut samples = Vec::new();
        for _ in 0..1000 {
            samples.push(200i16);
            samples.push(400i16);
        }
        let bytes = wav_bytes(&samples, 16000, 2);

        let recording = Recording::from_wav_bytes(&bytes).unwrap();
        assert_eq!(recording.samples.len(), 1000);
        assert!(recording.samples.iter().all(|&s| s == 300));
    }

    #[test]
    fn test_decode_resamples_to_16k() {
        let samples = vec![50i16; 48000];
        let bytes = wav_bytes(&samples, 48000, 1);

        let recording = Recording::from_wav_bytes(&bytes).unwrap();
        assert_eq!(recording.sample_rate, 16000);
        assert!((recording.duration_secs() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Recording::from_wav_bytes(b"not a wav file").is_err());
    }

    #[test]
    fn test_decode_rejects_empty_wav() {
        let bytes = wav_bytes(&[], 16000, 1);
        assert!(Recording::from_wav_bytes(&bytes).is_err());
    }

    #[test]
    fn test_slice_clamps_to_length() {
        let recording = Recording {
            samples: vec![0i16; 16000],
            sample_rate: 16000,
        };
        let slice = recording.slice(TimeSpan::new(0.5, 2.0));
        assert_eq!(slice.len(), 8000);
    }

    #[test]
    fn test_rms_of_silence_is_zero() {
        assert_eq!(calculate_rms(&vec![0i16; 100]), 0.0);
        assert_eq!(calculate_rms(&[]), 0.0);
    }

    #[test]
    fn test_detect_pauses_finds_quiet_gap() {
        // 2s loud, 1s quiet, 2s loud
        let samples = synth(&[(8000, 2.0), (0, 1.0), (8000, 2.0)]);
        let recording = Recording {
            samples,
            sample_rate: SAMPLE_RATE,
        };

        let pauses = detect_pauses(&recording, 0.02, 400, 100);
        assert_eq!(pauses.len(), 1);
        assert!((pauses[0].start - 2.0).abs() < 0.2);
        assert!((pauses[0].end - 3.0).abs() < 0.2);
    }

    #[test]
    fn test_detect_pauses_ignores_short_gaps() {
        // 200ms of quiet is under the 400ms minimum
        let samples = synth(&[(8000, 1.0), (0, 0.2), (8000, 1.0)]);
        let recording = Recording {
            samples,
            sample_rate: SAMPLE_RATE,
        };

        let pauses = detect_pauses(&recording, 0.02, 400, 100);
        assert!(pauses.is_empty());
    }

    #[test]
    fn test_detect_pauses_reports_trailing_silence() {
        let samples = synth(&[(8000, 1.0), (0, 1.0)]);
        let recording = Recording {
            samples,
            sample_rate: SAMPLE_RATE,
        };

        let pauses = detect_pauses(&recording, 0.02, 400, 100);
        assert_eq!(pauses.len(), 1);
        assert!((pauses[0].end - 2.0).abs() < 0.2);
    }
}
