//! Tag codec for MP3 files
//!
//! Reads and writes the fields the audit cares about through the file's
//! ID3v2 tag. The rating is kept twice: in a popularimeter (POPM) frame for
//! the configured email, which other players read, and in a user-text (TXXX)
//! frame. The resume marker is a TXXX frame too. Every other frame in the
//! tag, including POPM frames of other emails, is carried over untouched.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use lofty::id3::v2::{Frame, FrameFlags, FrameId, FrameValue, Id3v2Tag, Popularimeter};
use lofty::mpeg::MpegFile;
use lofty::{Accessor, AudioFile, ParseOptions, TagExt};

use crate::core::Rating;
use crate::error::{ScanError, TagWriteError};

const POPM_ID: &str = "POPM";

/// Names of the frames used for audit state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagLayout {
    /// TXXX description holding the star rating ("RATING")
    pub rating_tag: String,
    /// TXXX description holding the resume marker
    pub marker_tag: String,
    /// Owner email of the POPM frame holding the rating
    pub popm_email: String,
}

impl Default for TagLayout {
    fn default() -> Self {
        Self {
            rating_tag: "RATING".to_string(),
            marker_tag: "AUDIT_DECIDED".to_string(),
            popm_email: "changeme@pulzwave.com".to_string(),
        }
    }
}

/// POPM byte (1..=255) for a star rating
pub fn to_popm_rating(rating: Rating) -> u8 {
    (u32::from(rating.stars()) * 255 / u32::from(Rating::MAX)) as u8
}

/// Star rating for a POPM byte, rounded to the nearest star. 0 means unrated.
pub fn from_popm_rating(value: u8) -> Option<Rating> {
    if value == 0 {
        return None;
    }
    let stars = (u32::from(value) * u32::from(Rating::MAX) + 127) / 255;
    Rating::new(stars.clamp(1, u32::from(Rating::MAX)) as u8)
}

/// State of the rating frame as found in a file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RatingField {
    #[default]
    Missing,
    Valid(Rating),
    /// Present but not a number in 1..=5
    Corrupt(String),
}

impl RatingField {
    pub fn rating(&self) -> Option<Rating> {
        match self {
            RatingField::Valid(r) => Some(*r),
            _ => None,
        }
    }

    fn from_text(text: Option<&str>) -> Self {
        match text {
            None => RatingField::Missing,
            Some(t) => match Rating::parse(t) {
                Some(r) => RatingField::Valid(r),
                None => RatingField::Corrupt(t.to_string()),
            },
        }
    }
}

/// Fields read from a file's tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFields {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub rating: RatingField,
    /// Raw resume marker value, if the frame exists
    pub marker: Option<String>,
}

/// Change to apply to one field during a partial write
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldChange<T> {
    #[default]
    Unchanged,
    Set(T),
    Clear,
}

/// A partial tag write. Unchanged fields are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagUpdate {
    pub rating: FieldChange<Rating>,
    pub marker: FieldChange<String>,
}

impl TagUpdate {
    pub fn rating(rating: Rating) -> Self {
        Self {
            rating: FieldChange::Set(rating),
            ..Default::default()
        }
    }

    /// Put the rating back to what it was (or remove it if it was absent)
    pub fn restore_rating(previous: Option<Rating>) -> Self {
        Self {
            rating: match previous {
                Some(r) => FieldChange::Set(r),
                None => FieldChange::Clear,
            },
            ..Default::default()
        }
    }

    pub fn marker(value: impl Into<String>) -> Self {
        Self {
            marker: FieldChange::Set(value.into()),
            ..Default::default()
        }
    }

    pub fn clear_marker() -> Self {
        Self {
            marker: FieldChange::Clear,
            ..Default::default()
        }
    }
}

/// Read/write access to a file's embedded metadata
pub trait MetadataCodec: Send + Sync {
    fn read(&self, path: &Path) -> Result<TagFields, ScanError>;

    /// Apply a partial update. Must be durable once it returns Ok.
    fn write(&self, path: &Path, update: &TagUpdate) -> Result<(), TagWriteError>;
}

/// `MetadataCodec` backed by lofty's ID3v2 support
#[derive(Debug, Clone, Default)]
pub struct Id3Codec {
    layout: TagLayout,
}

impl Id3Codec {
    pub fn new(layout: TagLayout) -> Self {
        Self { layout }
    }

    /// POPM first, then the TXXX frame
    fn read_rating(&self, tag: &Id3v2Tag) -> RatingField {
        if let Some(rating) =
            popularimeter(tag, &self.layout.popm_email).and_then(|p| from_popm_rating(p.rating))
        {
            return RatingField::Valid(rating);
        }
        RatingField::from_text(tag.get_user_text(&self.layout.rating_tag))
    }

    fn set_popm(&self, tag: &mut Id3v2Tag, rating: Rating, path: &Path) -> Result<(), TagWriteError> {
        let counter = popularimeter(tag, &self.layout.popm_email)
            .map(|p| p.counter)
            .unwrap_or(0);
        let frame = Frame::new(
            POPM_ID,
            FrameValue::Popularimeter(Popularimeter {
                email: self.layout.popm_email.clone(),
                rating: to_popm_rating(rating),
                counter,
            }),
            FrameFlags::default(),
        )
        .map_err(|e| TagWriteError::Save {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        // Replaces the POPM frame with the same email, if any
        tag.insert(frame);
        Ok(())
    }

    /// Drop this layout's POPM frame, keeping those of other emails
    fn remove_popm(&self, tag: &mut Id3v2Tag) {
        let email = &self.layout.popm_email;
        let others: Vec<Frame<'static>> = tag
            .remove(&FrameId::Valid(Cow::Borrowed(POPM_ID)))
            .filter(|frame| {
                !matches!(frame.content(), FrameValue::Popularimeter(p) if &p.email == email)
            })
            .collect();
        for frame in others {
            tag.insert(frame);
        }
    }
}

fn popularimeter<'t>(tag: &'t Id3v2Tag, email: &str) -> Option<&'t Popularimeter> {
    tag.into_iter().find_map(|frame| match frame.content() {
        FrameValue::Popularimeter(p) if p.email == email => Some(p),
        _ => None,
    })
}

fn read_mpeg(path: &Path) -> Result<MpegFile, ScanError> {
    let mut file = File::open(path).map_err(|e| ScanError::Unreadable {
        path: path.to_path_buf(),
        source: e,
    })?;

    MpegFile::read_from(&mut file, ParseOptions::new().read_properties(false)).map_err(|e| {
        ScanError::CorruptTag {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}

fn non_empty(value: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl MetadataCodec for Id3Codec {
    fn read(&self, path: &Path) -> Result<TagFields, ScanError> {
        let mpeg = read_mpeg(path)?;

        let Some(tag) = mpeg.id3v2() else {
            log::debug!("No ID3v2 tag in {}", path.display());
            return Ok(TagFields::default());
        };

        Ok(TagFields {
            title: non_empty(tag.title()),
            artist: non_empty(tag.artist()),
            genre: non_empty(tag.genre()),
            year: tag.year(),
            rating: self.read_rating(tag),
            marker: tag
                .get_user_text(&self.layout.marker_tag)
                .map(|v| v.to_string()),
        })
    }

    fn write(&self, path: &Path, update: &TagUpdate) -> Result<(), TagWriteError> {
        let mpeg = read_mpeg(path).map_err(|e| TagWriteError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // Start from the existing tag so unrelated frames survive the write
        let mut tag: Id3v2Tag = mpeg.id3v2().cloned().unwrap_or_default();
        drop(mpeg);

        match &update.rating {
            FieldChange::Unchanged => {}
            FieldChange::Set(rating) => {
                tag.insert_user_text(self.layout.rating_tag.clone(), rating.to_string());
                self.set_popm(&mut tag, *rating, path)?;
            }
            FieldChange::Clear => {
                tag.remove_user_text(&self.layout.rating_tag);
                self.remove_popm(&mut tag);
            }
        }

        match &update.marker {
            FieldChange::Unchanged => {}
            FieldChange::Set(value) => {
                tag.insert_user_text(self.layout.marker_tag.clone(), value.clone());
            }
            FieldChange::Clear => {
                tag.remove_user_text(&self.layout.marker_tag);
            }
        }

        tag.save_to_path(path).map_err(|e| TagWriteError::Save {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        File::open(path)
            .and_then(|f| f.sync_all())
            .map_err(|e| TagWriteError::Sync {
                path: path.to_path_buf(),
                source: e,
            })?;

        log::debug!("Tag updated: {} ({:?})", path.display(), update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{write_silent_mp3, write_tagged_mp3, FixtureTags};
    use tempfile::TempDir;

    const OTHER_EMAIL: &str = "player@example.com";

    /// POPM frames in the file as (email, rating)
    fn popm_frames(path: &Path) -> Vec<(String, u8)> {
        let mut file = File::open(path).unwrap();
        let mpeg = MpegFile::read_from(&mut file, ParseOptions::new()).unwrap();
        let Some(tag) = mpeg.id3v2() else {
            return Vec::new();
        };
        let mut frames: Vec<(String, u8)> = tag
            .into_iter()
            .filter_map(|frame| match frame.content() {
                FrameValue::Popularimeter(p) => Some((p.email.clone(), p.rating)),
                _ => None,
            })
            .collect();
        frames.sort();
        frames
    }

    #[test]
    fn test_read_untagged_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.mp3");
        write_silent_mp3(&path, 8);

        let fields = Id3Codec::default().read(&path).unwrap();
        assert_eq!(fields, TagFields::default());
    }

    #[test]
    fn test_read_nonexistent_file_is_unreadable() {
        let result = Id3Codec::default().read(Path::new("/nonexistent/file.mp3"));
        assert!(matches!(result, Err(ScanError::Unreadable { .. })));
    }

    #[test]
    fn test_rating_write_preserves_other_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tagged.mp3");
        write_tagged_mp3(
            &path,
            &FixtureTags {
                title: Some("Night Drive"),
                artist: Some("Someone"),
                genre: Some("House"),
                year: Some(2020),
                ..Default::default()
            },
        );

        let codec = Id3Codec::default();
        codec
            .write(&path, &TagUpdate::rating(Rating::new(4).unwrap()))
            .unwrap();

        let fields = codec.read(&path).unwrap();
        assert_eq!(fields.rating, RatingField::Valid(Rating::new(4).unwrap()));
        assert_eq!(fields.title.as_deref(), Some("Night Drive"));
        assert_eq!(fields.artist.as_deref(), Some("Someone"));
        assert_eq!(fields.genre.as_deref(), Some("House"));
        assert_eq!(fields.year, Some(2020));
        assert_eq!(fields.marker, None);
    }

    #[test]
    fn test_restore_rating_clears_when_previously_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tagged.mp3");
        write_tagged_mp3(&path, &FixtureTags::default());

        let codec = Id3Codec::default();
        codec
            .write(&path, &TagUpdate::rating(Rating::new(2).unwrap()))
            .unwrap();
        codec.write(&path, &TagUpdate::restore_rating(None)).unwrap();

        assert_eq!(codec.read(&path).unwrap().rating, RatingField::Missing);
    }

    #[test]
    fn test_corrupt_rating_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tagged.mp3");
        write_tagged_mp3(
            &path,
            &FixtureTags {
                raw_rating: Some("eleven"),
                ..Default::default()
            },
        );

        let fields = Id3Codec::default().read(&path).unwrap();
        assert_eq!(fields.rating, RatingField::Corrupt("eleven".to_string()));
        assert_eq!(fields.rating.rating(), None);
    }

    #[test]
    fn test_marker_set_and_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tagged.mp3");
        write_tagged_mp3(&path, &FixtureTags::default());

        let codec = Id3Codec::default();
        codec.write(&path, &TagUpdate::marker("true")).unwrap();
        assert_eq!(codec.read(&path).unwrap().marker.as_deref(), Some("true"));

        codec.write(&path, &TagUpdate::clear_marker()).unwrap();
        assert_eq!(codec.read(&path).unwrap().marker, None);
    }

    #[test]
    fn test_custom_layout_uses_its_own_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tagged.mp3");
        write_tagged_mp3(&path, &FixtureTags::default());

        let custom = Id3Codec::new(TagLayout {
            rating_tag: "STARS".to_string(),
            marker_tag: "REVIEWED".to_string(),
            ..Default::default()
        });
        custom.write(&path, &TagUpdate::marker("true")).unwrap();

        // The default layout does not see a marker written under another name
        assert_eq!(Id3Codec::default().read(&path).unwrap().marker, None);
        assert_eq!(custom.read(&path).unwrap().marker.as_deref(), Some("true"));
    }

    #[test]
    fn test_write_nonexistent_file_fails() {
        let result =
            Id3Codec::default().write(Path::new("/nonexistent/file.mp3"), &TagUpdate::marker("true"));
        assert!(matches!(result, Err(TagWriteError::Open { .. })));
    }

    #[test]
    fn test_popm_rating_conversion() {
        let stars: Vec<u8> = (1..=5).map(|n| to_popm_rating(Rating::new(n).unwrap())).collect();
        assert_eq!(stars, vec![51, 102, 153, 204, 255]);
        assert_eq!(from_popm_rating(204), Rating::new(4));
        assert_eq!(from_popm_rating(1), Rating::new(1));
        assert_eq!(from_popm_rating(0), None);
    }

    #[test]
    fn test_popm_only_rating_is_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("popm.mp3");
        write_tagged_mp3(
            &path,
            &FixtureTags {
                popm: Some(("changeme@pulzwave.com", 204)),
                ..Default::default()
            },
        );

        let fields = Id3Codec::default().read(&path).unwrap();
        assert_eq!(fields.rating, RatingField::Valid(Rating::new(4).unwrap()));
    }

    #[test]
    fn test_popm_wins_over_txxx() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("both.mp3");
        write_tagged_mp3(
            &path,
            &FixtureTags {
                raw_rating: Some("2"),
                popm: Some(("changeme@pulzwave.com", 255)),
                ..Default::default()
            },
        );

        let fields = Id3Codec::default().read(&path).unwrap();
        assert_eq!(fields.rating, RatingField::Valid(Rating::new(5).unwrap()));
    }

    #[test]
    fn test_popm_of_other_email_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.mp3");
        write_tagged_mp3(
            &path,
            &FixtureTags {
                popm: Some((OTHER_EMAIL, 255)),
                ..Default::default()
            },
        );

        assert_eq!(Id3Codec::default().read(&path).unwrap().rating, RatingField::Missing);
    }

    #[test]
    fn test_rating_write_sets_and_clears_own_popm() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rated.mp3");
        write_tagged_mp3(
            &path,
            &FixtureTags {
                popm: Some((OTHER_EMAIL, 51)),
                ..Default::default()
            },
        );

        let codec = Id3Codec::default();
        codec
            .write(&path, &TagUpdate::rating(Rating::new(2).unwrap()))
            .unwrap();
        assert_eq!(
            popm_frames(&path),
            vec![
                ("changeme@pulzwave.com".to_string(), 102),
                (OTHER_EMAIL.to_string(), 51)
            ]
        );

        codec
            .write(&path, &TagUpdate::rating(Rating::new(5).unwrap()))
            .unwrap();
        assert_eq!(popm_frames(&path)[0], ("changeme@pulzwave.com".to_string(), 255));

        // Rolling back to "no rating" removes only our frame
        codec.write(&path, &TagUpdate::restore_rating(None)).unwrap();
        assert_eq!(popm_frames(&path), vec![(OTHER_EMAIL.to_string(), 51)]);
        assert_eq!(codec.read(&path).unwrap().rating, RatingField::Missing);
    }
}
