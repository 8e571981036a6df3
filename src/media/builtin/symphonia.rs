use std::{fs::File, sync::LazyLock};

use camino::Utf8Path;
use chrono::Datelike;
use regex::Regex;
use symphonia::core::{
    codecs::CODEC_TYPE_NULL,
    errors::Error,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::{MetadataOptions, StandardTagKey, Tag, Value},
    probe::Hint,
};

use crate::media::{
    errors::ExtractError,
    metadata::Metadata,
    traits::{MetadataReader, has_extension},
};

static POSITION_IN_SET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)/(\d+)").expect("invalid position-in-set regex"));
static VINYL_TRACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([A-Z])(\d+)$").expect("invalid vinyl track regex"));

const SUPPORTED_EXTENSIONS: &[&str] = &["ogg", "aac", "flac", "wav", "mp3", "m4a", "aiff", "opus"];

/// Reads tags and duration with Symphonia's probe. Nothing is decoded.
#[derive(Debug, Default)]
pub struct SymphoniaReader;

fn number(value: &Value) -> Option<u64> {
    match value {
        Value::String(v) => v.trim().parse().ok(),
        Value::UnsignedInt(v) => Some(*v),
        Value::SignedInt(v) => u64::try_from(*v).ok(),
        _ => None,
    }
}

fn break_tags(metadata: &mut Metadata, tags: &[Tag]) {
    for tag in tags {
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => metadata.name = Some(tag.value.to_string()),
            Some(StandardTagKey::Artist) => metadata.artist = Some(tag.value.to_string()),
            Some(StandardTagKey::AlbumArtist) => {
                metadata.album_artist = Some(tag.value.to_string())
            }
            Some(StandardTagKey::Album) => metadata.album = Some(tag.value.to_string()),
            Some(StandardTagKey::Composer) => metadata.composer = Some(tag.value.to_string()),
            Some(StandardTagKey::Genre) => metadata.genre = Some(tag.value.to_string()),
            Some(StandardTagKey::Date) => {
                let raw = tag.value.to_string();
                if let Ok(year) = raw.trim().parse::<i32>() {
                    metadata.year = Some(year);
                } else if let Ok(date) = dateparser::parse(&raw) {
                    metadata.year = Some(date.year());
                }
            }
            Some(StandardTagKey::TrackNumber) => match &tag.value {
                Value::String(v) => {
                    // vinyl style numbers: the side letter becomes the disc
                    if let Some(captures) = VINYL_TRACK.captures(v) {
                        if let Some(side) = captures
                            .get(1)
                            .and_then(|s| s.as_str().to_ascii_uppercase().chars().next())
                        {
                            metadata.disc_current = Some((side as u64) - ('A' as u64) + 1);
                            metadata.vinyl_numbering = true;
                        }
                        metadata.track_current =
                            captures.get(2).and_then(|t| t.as_str().parse().ok());
                    // ID3 style "3/12"
                    } else if let Some(captures) = POSITION_IN_SET.captures(v) {
                        metadata.track_current =
                            captures.get(1).and_then(|t| t.as_str().parse().ok());
                        metadata.track_max = captures.get(2).and_then(|t| t.as_str().parse().ok());
                    } else {
                        metadata.track_current = v.trim().parse().ok();
                    }
                }
                other => metadata.track_current = number(other),
            },
            Some(StandardTagKey::TrackTotal) => metadata.track_max = number(&tag.value),
            Some(StandardTagKey::DiscNumber) => match &tag.value {
                Value::String(v) => {
                    if let Some(captures) = POSITION_IN_SET.captures(v) {
                        metadata.disc_current =
                            captures.get(1).and_then(|d| d.as_str().parse().ok());
                        metadata.disc_max = captures.get(2).and_then(|d| d.as_str().parse().ok());
                    } else {
                        metadata.disc_current = v.trim().parse().ok();
                    }
                }
                other => metadata.disc_current = number(other),
            },
            Some(StandardTagKey::DiscTotal) => metadata.disc_max = number(&tag.value),
            _ => (),
        }
    }
}

impl From<Error> for ExtractError {
    fn from(error: Error) -> Self {
        match error {
            Error::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                ExtractError::FileCorrupt
            }
            Error::IoError(e) => ExtractError::Io(e),
            Error::DecodeError(_) => ExtractError::FileCorrupt,
            Error::Unsupported(_) => ExtractError::UnsupportedFormat,
            other => ExtractError::Unknown(other.to_string()),
        }
    }
}

impl MetadataReader for SymphoniaReader {
    fn accepts(&self, path: &Utf8Path) -> bool {
        has_extension(path, SUPPORTED_EXTENSIONS)
    }

    fn extract(&mut self, path: &Utf8Path) -> Result<Metadata, ExtractError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(ext);
        }

        let mut probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let mut metadata = Metadata::default();

        // tags found ahead of the container (ID3v2 on MP3, mostly)
        if let Some(revision) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            break_tags(&mut metadata, revision.tags());
        }

        if let Some(revision) = probed.format.metadata().current() {
            break_tags(&mut metadata, revision.tags());
        }

        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(ExtractError::NothingToRead)?;

        if let Some(frames) = track.codec_params.n_frames
            && let Some(tb) = track.codec_params.time_base
        {
            metadata.duration_secs = Some(tb.calc_time(frames).seconds);
        }

        Ok(metadata)
    }
}
