// Audio module - file detection, tag codec, and decoding for analysis

pub mod decode;
pub mod detection;
pub mod metadata;

pub use decode::{decode_mono, DecodedAudio};
pub use detection::is_audio_file;
pub use metadata::{
    FieldChange, Id3Codec, MetadataCodec, RatingField, TagFields, TagLayout, TagUpdate,
};
