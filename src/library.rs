use crate::config;
use crate::error::{Error, Result};
use crate::model::Track;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use walkdir::WalkDir;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub found: usize,
    pub truncated: bool,
}

/// Ordered, bounded list of stations. The index is the station number.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tracks: Vec<Track>,
}

impl Catalog {
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn scan(root: &Path, limit: usize) -> (Self, ScanOutcome) {
        let mut tracks = Vec::new();
        let mut truncated = false;

        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_audio(path) {
                continue;
            }
            if tracks.len() == limit {
                truncated = true;
                break;
            }
            tracks.push(Track::new(config::normalize_path(path)));
        }

        tracing::info!(
            root = %root.display(),
            found = tracks.len(),
            truncated,
            "station scan finished"
        );
        let outcome = ScanOutcome {
            found: tracks.len(),
            truncated,
        };
        (Self { tracks }, outcome)
    }

    /// Replaces the whole list with a fresh scan of `root`.
    pub fn rescan(&mut self, root: &Path, limit: usize) -> ScanOutcome {
        let (fresh, outcome) = Self::scan(root, limit);
        *self = fresh;
        outcome
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Track> {
        self.tracks.get(index).ok_or(Error::IndexOutOfRange {
            index,
            count: self.tracks.len(),
        })
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn next_index(&self, current: usize) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        Some(if current + 1 >= self.tracks.len() {
            0
        } else {
            current + 1
        })
    }

    pub fn previous_index(&self, current: usize) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        Some(if current == 0 || current >= self.tracks.len() {
            self.tracks.len() - 1
        } else {
            current - 1
        })
    }
}

pub fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Embedded title tag, if any.
pub fn read_title(path: &Path) -> Option<String> {
    let stripped = config::strip_windows_verbatim_prefix(path);
    symphonia_title(&stripped)
        .or_else(|| lofty_title(&stripped))
        .filter(|title| !title.trim().is_empty())
}

/// Duration as reported by container headers.
pub fn probe_duration(path: &Path) -> Option<Duration> {
    let stripped = config::strip_windows_verbatim_prefix(path);
    let tagged = Probe::open(&stripped).ok()?.read().ok()?;
    Some(tagged.properties().duration()).filter(|duration| !duration.is_zero())
}

fn symphonia_title(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let mut probed = get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;

    if let Some(title) = probed
        .metadata
        .get()
        .as_ref()
        .and_then(|metadata| metadata.current().and_then(|rev| title_tag(rev.tags())))
    {
        return Some(title);
    }

    let metadata = probed.format.metadata();
    let revision = metadata.current()?;
    title_tag(revision.tags())
}

fn title_tag(tags: &[Tag]) -> Option<String> {
    tags.iter()
        .find(|tag| {
            tag.std_key == Some(StandardTagKey::TrackTitle) || tag.key.eq_ignore_ascii_case("title")
        })
        .map(|tag| tag.value.to_string().trim().to_string())
        .filter(|value| !value.is_empty())
}

fn lofty_title(path: &Path) -> Option<String> {
    let tagged = Probe::open(path).ok()?.read().ok()?;
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;
    tag.title().map(|title| title.trim().to_string())
}
