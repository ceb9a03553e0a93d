//! Resume marker stored in each file's own tag
//!
//! A decided track carries a user-text frame with the configured marker
//! value. The scan consults it to keep decided tracks out of the queue.

use std::path::Path;
use std::sync::Arc;

use super::ResumeMarker;
use crate::audio::{MetadataCodec, RatingField, TagFields, TagUpdate};
use crate::error::{ScanError, TagWriteError};

pub struct ResumeStateManager {
    codec: Arc<dyn MetadataCodec>,
    marker_value: String,
}

impl ResumeStateManager {
    pub fn new(codec: Arc<dyn MetadataCodec>, marker_value: impl Into<String>) -> Self {
        Self {
            codec,
            marker_value: marker_value.into(),
        }
    }

    /// Whether a raw marker frame value counts as decided
    ///
    /// Surrounding whitespace and ASCII case are ignored, so markers written
    /// by other tools still match.
    fn is_marker(&self, value: Option<&str>) -> bool {
        value.is_some_and(|v| v.trim().eq_ignore_ascii_case(self.marker_value.trim()))
    }

    /// Interpret already-read tag fields
    ///
    /// A marker without a valid rating is treated as unseen: the decision
    /// that wrote it never completed.
    pub fn classify(&self, path: &Path, fields: &TagFields) -> ResumeMarker {
        if !self.is_marker(fields.marker.as_deref()) {
            return ResumeMarker::Unseen;
        }

        match &fields.rating {
            RatingField::Valid(_) => ResumeMarker::Decided,
            RatingField::Missing => {
                log::warn!(
                    "{} is marked decided but has no rating; reviewing again",
                    path.display()
                );
                ResumeMarker::Unseen
            }
            RatingField::Corrupt(raw) => {
                log::warn!(
                    "{} is marked decided but its rating {:?} is invalid; reviewing again",
                    path.display(),
                    raw
                );
                ResumeMarker::Unseen
            }
        }
    }

    pub fn is_decided(&self, path: &Path) -> Result<bool, ScanError> {
        let fields = self.codec.read(path)?;
        Ok(self.classify(path, &fields) == ResumeMarker::Decided)
    }

    /// Write the marker and confirm it reads back. Safe to repeat.
    pub fn mark_decided(&self, path: &Path) -> Result<(), TagWriteError> {
        let current = self.read_for_write(path)?;
        if !self.is_marker(current.marker.as_deref()) {
            self.codec
                .write(path, &TagUpdate::marker(self.marker_value.clone()))?;
        }

        let written = self.read_for_write(path)?;
        if !self.is_marker(written.marker.as_deref()) {
            return Err(TagWriteError::Verify {
                path: path.to_path_buf(),
                reason: format!(
                    "marker reads back as {:?}, expected {:?}",
                    written.marker, self.marker_value
                ),
            });
        }

        log::debug!("Marked decided: {}", path.display());
        Ok(())
    }

    /// Remove the marker so the next scan picks the track up again
    pub fn clear(&self, path: &Path) -> Result<bool, TagWriteError> {
        let current = self.read_for_write(path)?;
        if current.marker.is_none() {
            return Ok(false);
        }
        self.codec.write(path, &TagUpdate::clear_marker())?;
        log::info!("Cleared resume marker on {}", path.display());
        Ok(true)
    }

    fn read_for_write(&self, path: &Path) -> Result<TagFields, TagWriteError> {
        self.codec.read(path).map_err(|e| TagWriteError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
