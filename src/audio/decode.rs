//! Audio decoding using symphonia
//!
//! Decodes a track to mono f32 samples at its native sample rate for
//! waveform analysis. Corrupt frames are skipped rather than failing the file.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::WaveformError;

/// Decoded mono PCM
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode an audio file, downmixing all channels to mono
pub fn decode_mono(path: &Path) -> Result<DecodedAudio, WaveformError> {
    let decode_err = |reason: String| WaveformError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| decode_err(format!("Failed to open file: {}", e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension() {
        hint.with_extension(&ext.to_string_lossy());
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_err(format!("Failed to detect audio format: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_err("No audio track found".to_string()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate.unwrap_or(44100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(format!("Failed to create decoder: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_err(format!("Failed to read packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::trace!("Skipping corrupted frame in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(decode_err(format!("Decode error: {}", e))),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        let channels = spec.channels.count().max(1);

        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
        });
        if buf.capacity() < decoded.capacity() * channels {
            *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        }
        buf.copy_interleaved_ref(decoded);

        samples.extend(
            buf.samples()
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    if samples.is_empty() {
        return Err(WaveformError::Empty {
            path: path.to_path_buf(),
        });
    }

    log::debug!(
        "Decoded {}: {} samples @ {}Hz",
        path.display(),
        samples.len(),
        sample_rate
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::write_silent_mp3;
    use tempfile::TempDir;

    #[test]
    fn test_decode_nonexistent_file() {
        let result = decode_mono(Path::new("/nonexistent/file.mp3"));
        assert!(matches!(result, Err(WaveformError::Decode { .. })));
    }

    #[test]
    fn test_decode_non_audio_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.mp3");
        std::fs::write(&path, b"these are not audio frames").unwrap();

        assert!(decode_mono(&path).is_err());
    }

    #[test]
    fn test_decode_silent_fixture() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("silence.mp3");
        write_silent_mp3(&path, 40);

        let audio = decode_mono(&path).unwrap();
        assert_eq!(audio.sample_rate, 44100);
        assert!(!audio.samples.is_empty());
        assert!(audio.samples.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_duration_secs() {
        let audio = DecodedAudio {
            samples: vec![0.0; 22050],
            sample_rate: 44100,
        };
        assert!((audio.duration_secs() - 0.5).abs() < f64::EPSILON);
    }
}
