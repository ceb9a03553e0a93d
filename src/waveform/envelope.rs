//! Three-band amplitude envelope for visual waveform review
//!
//! The whole track is run through an STFT and the mean level of the bass,
//! mid and high bands is taken per frame on a dB scale relative to the
//! loudest bin in the track, clipped at -80 dB and normalized to 0.0..=1.0.
//! A fixed number of evenly spaced frames become the display columns, so the
//! column count never changes the levels.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::audio::DecodedAudio;

/// FFT window size (~46ms at 44.1kHz)
pub const N_FFT: usize = 2048;

/// Hop between candidate frames
pub const HOP_LENGTH: usize = 512;

/// Floor of the dB scale
const TOP_DB: f32 = 80.0;

const BASS_HZ: (f32, f32) = (20.0, 500.0);
const MID_HZ: (f32, f32) = (500.0, 2000.0);
const HIGH_HZ: (f32, f32) = (2000.0, 20000.0);

/// Band levels for one column, each 0.0 (silent) to 1.0 (loudest)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BandLevels {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
}

/// A computed envelope. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformEnvelope {
    pub columns: Vec<BandLevels>,
    pub duration_secs: f64,
    pub sample_rate: u32,
}

impl WaveformEnvelope {
    /// Peak of the three bands per column, reduced to `width` buckets by max
    pub fn overview(&self, width: usize) -> Vec<f32> {
        if width == 0 || self.columns.is_empty() {
            return Vec::new();
        }
        let per_bucket = self.columns.len().div_ceil(width);
        self.columns
            .chunks(per_bucket)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|c| c.bass.max(c.mid).max(c.high))
                    .fold(0.0, f32::max)
            })
            .collect()
    }
}

/// Build an envelope with `columns` points from decoded audio
pub fn compute_envelope(audio: &DecodedAudio, columns: usize) -> WaveformEnvelope {
    let frame_count = if audio.samples.len() > N_FFT {
        (audio.samples.len() - N_FFT) / HOP_LENGTH + 1
    } else {
        1
    };

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(N_FFT);
    let window = hann_window(N_FFT);

    let bin_hz = audio.sample_rate as f32 / N_FFT as f32;
    let bands = [
        band_bins(BASS_HZ, bin_hz),
        band_bins(MID_HZ, bin_hz),
        band_bins(HIGH_HZ, bin_hz),
    ];

    // Every frame is analysed so the dB reference is the loudest bin in the
    // whole track, not just in the frames picked as columns
    let mut frame_means: Vec<[f32; 3]> = Vec::with_capacity(frame_count);
    let mut reference = 0.0f32;

    for frame in 0..frame_count {
        let spectrum = magnitude_spectrum(&audio.samples, frame * HOP_LENGTH, &window, &fft);
        reference = spectrum.iter().copied().fold(reference, f32::max);

        let mut means = [0.0f32; 3];
        for (slot, range) in means.iter_mut().zip(&bands) {
            *slot = match range {
                Some((lo, hi)) => {
                    let bins = &spectrum[*lo..=*hi];
                    bins.iter().sum::<f32>() / bins.len() as f32
                }
                None => 0.0,
            };
        }
        frame_means.push(means);
    }

    let columns = (0..columns)
        .map(|column| {
            let [bass, mid, high] = frame_means[frame_for_column(column, columns, frame_count)];
            BandLevels {
                bass: scale_level(bass, reference),
                mid: scale_level(mid, reference),
                high: scale_level(high, reference),
            }
        })
        .collect();

    WaveformEnvelope {
        columns,
        duration_secs: audio.duration_secs(),
        sample_rate: audio.sample_rate,
    }
}

/// Evenly spread `columns` picks over `frame_count` frames (first and last included)
fn frame_for_column(column: usize, columns: usize, frame_count: usize) -> usize {
    if columns <= 1 || frame_count <= 1 {
        return 0;
    }
    column * (frame_count - 1) / (columns - 1)
}

fn magnitude_spectrum(
    samples: &[f32],
    start: usize,
    window: &[f32],
    fft: &Arc<dyn Fft<f32>>,
) -> Vec<f32> {
    let mut buffer: Vec<Complex<f32>> = window
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let s = samples.get(start + i).copied().unwrap_or(0.0);
            Complex::new(s * w, 0.0)
        })
        .collect();

    fft.process(&mut buffer);

    buffer[..=N_FFT / 2].iter().map(|c| c.norm()).collect()
}

/// Inclusive bin range for a frequency band, None if the band is above Nyquist
fn band_bins((lo_hz, hi_hz): (f32, f32), bin_hz: f32) -> Option<(usize, usize)> {
    if bin_hz <= 0.0 {
        return None;
    }
    let nyquist_bin = N_FFT / 2;
    let lo = (lo_hz / bin_hz).ceil() as usize;
    let hi = ((hi_hz / bin_hz).floor() as usize).min(nyquist_bin);
    (lo <= hi).then_some((lo, hi))
}

/// Amplitude to dB relative to `reference`, clipped at -TOP_DB, mapped to 0..=1
fn scale_level(magnitude: f32, reference: f32) -> f32 {
    if reference <= 0.0 || magnitude <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * (magnitude / reference).log10();
    ((db + TOP_DB) / TOP_DB).clamp(0.0, 1.0)
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / size as f32;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}
