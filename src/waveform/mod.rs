//! Waveform analysis: envelope computation, caching and background prefetch

pub mod cache;
pub mod envelope;
pub mod pipeline;

pub use cache::EnvelopeCache;
pub use envelope::{compute_envelope, WaveformEnvelope};
pub use pipeline::{
    DecodingAnalyzer, EnvelopeAnalyzer, PipelineConfig, WaveformPipeline, WaveformStatus,
};
