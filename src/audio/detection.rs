use std::path::Path;

/// Check if a file is an auditable track based on its extension
///
/// Only MP3 with ID3v2 tags is supported, so everything else is ignored.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}
