// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The in-memory model of a sample library and the pipeline that builds it
//! from a `floe.lua` script.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::FloeError;
use crate::playsync::CancelHandle;
use crate::script::{self, SandboxSettings};

pub mod file_reader;
pub mod postprocess;
pub mod scanner;

pub use file_reader::{FileReader, PathError, RelativePath};
pub use postprocess::{FileIssue, FileIssueKind};

/// The newest library minor version this build understands.
pub const MAX_SUPPORTED_MINOR_VERSION: u32 = 1;

/// The file name the scanner looks for in library folders.
pub const LIBRARY_SCRIPT_NAME: &str = "floe.lua";

/// A half-open `[start, end)` span of MIDI-style values: keys, velocities or
/// timbre positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRange {
    pub start: u8,
    pub end: u8,
}

impl ValueRange {
    pub const fn new(start: u8, end: u8) -> ValueRange {
        ValueRange { start, end }
    }

    #[inline]
    pub fn contains(&self, value: u8) -> bool {
        value >= self.start && value < self.end
    }

    pub fn overlaps(&self, other: &ValueRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn len(&self) -> u8 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// How a library was packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LibraryFormat {
    /// A folder with a `floe.lua` script.
    #[default]
    Script,
    /// A legacy single-file bundle. Only the tag exists here; reading bundles is not supported.
    Bundle,
}

/// Libraries are identified by author and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryId {
    pub author: String,
    pub name: String,
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.author, self.name)
    }
}

/// The descriptive fields a script passes to `floe.new_library`.
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub name: String,
    pub tagline: String,
    pub author: String,
    pub minor_version: u32,
    pub url: Option<String>,
    pub description: Option<String>,
    pub icon_image_path: Option<RelativePath>,
    pub background_image_path: Option<RelativePath>,
}

impl Default for LibraryInfo {
    fn default() -> Self {
        LibraryInfo {
            name: String::new(),
            tagline: String::new(),
            author: String::new(),
            minor_version: 1,
            url: None,
            description: None,
            icon_image_path: None,
            background_image_path: None,
        }
    }
}

/// A sample library: metadata plus its instruments and impulse responses.
/// Built once by the interpreter and then shared immutably.
#[derive(Debug, Clone)]
pub struct Library {
    pub info: LibraryInfo,
    pub script_path: PathBuf,
    pub file_reader: FileReader,
    pub format: LibraryFormat,
    instruments: Vec<Instrument>,
    irs: Vec<ImpulseResponse>,
}

/// Returned when inserting a second instrument or IR under an existing name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} name \"{name}\" is already used in this library")]
pub struct DuplicateName {
    pub kind: &'static str,
    pub name: String,
}

impl Library {
    /// Creates an empty library whose file reader is rooted at the script's folder.
    pub fn new(info: LibraryInfo, script_path: &Path) -> Library {
        let root = script_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Library {
            info,
            script_path: script_path.to_path_buf(),
            file_reader: FileReader::new(root),
            format: LibraryFormat::Script,
            instruments: Vec::new(),
            irs: Vec::new(),
        }
    }

    pub fn id(&self) -> LibraryId {
        LibraryId {
            author: self.info.author.clone(),
            name: self.info.name.clone(),
        }
    }

    /// The folder the script lives in.
    pub fn root(&self) -> &Path {
        self.file_reader.root()
    }

    /// Instruments in insertion order.
    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn instrument(&self, name: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.name == name)
    }

    pub fn instrument_index(&self, name: &str) -> Option<usize> {
        self.instruments.iter().position(|i| i.name == name)
    }

    /// Adds an instrument, refusing duplicate names. Returns its index.
    pub fn add_instrument(&mut self, instrument: Instrument) -> Result<usize, DuplicateName> {
        if self.instrument(&instrument.name).is_some() {
            return Err(DuplicateName {
                kind: "instrument",
                name: instrument.name,
            });
        }
        self.instruments.push(instrument);
        Ok(self.instruments.len() - 1)
    }

    pub(crate) fn instrument_mut(&mut self, index: usize) -> Option<&mut Instrument> {
        self.instruments.get_mut(index)
    }

    pub(crate) fn instruments_mut(&mut self) -> &mut [Instrument] {
        &mut self.instruments
    }

    /// Impulse responses in insertion order.
    pub fn irs(&self) -> &[ImpulseResponse] {
        &self.irs
    }

    pub fn ir(&self, name: &str) -> Option<&ImpulseResponse> {
        self.irs.iter().find(|ir| ir.name == name)
    }

    /// Adds an impulse response, refusing duplicate names.
    pub fn add_ir(&mut self, ir: ImpulseResponse) -> Result<usize, DuplicateName> {
        if self.ir(&ir.name).is_some() {
            return Err(DuplicateName {
                kind: "impulse response",
                name: ir.name,
            });
        }
        self.irs.push(ir);
        Ok(self.irs.len() - 1)
    }
}

/// A playable instrument: a named, ordered collection of regions.
#[derive(Debug, Clone, Default)]
pub struct Instrument {
    pub name: String,
    /// Slash-separated folder path used to group instruments in a browser.
    pub folders: Option<String>,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    /// Audio used to draw the instrument's waveform; defaults to the first region's file.
    pub waveform_audio_path: Option<RelativePath>,
    pub regions: Vec<Region>,
    /// The highest round-robin index of any region, or 0.
    pub max_round_robin_index: u32,
}

/// An impulse response usable by the convolution reverb.
#[derive(Debug, Clone, Default)]
pub struct ImpulseResponse {
    pub name: String,
    pub path: RelativePath,
}

/// One sample mapping within an instrument.
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub file: RegionFile,
    pub trigger: TriggerCriteria,
    pub options: RegionOptions,
}

/// The audio file a region plays and how it loops.
#[derive(Debug, Clone)]
pub struct RegionFile {
    pub path: RelativePath,
    pub root_key: u8,
    pub sample_loop: Option<SampleLoop>,
}

impl Default for RegionFile {
    fn default() -> Self {
        RegionFile {
            path: RelativePath::default(),
            root_key: 60,
            sample_loop: None,
        }
    }
}

/// Loop points as written in the script. Negative indices count back from the
/// end of the file: -1 is the frame count, -2 the frame before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleLoop {
    pub start_frame: i64,
    /// Exclusive.
    pub end_frame: i64,
    pub crossfade_frames: u32,
    pub ping_pong: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerEvent {
    #[default]
    NoteOn,
    NoteOff,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::NoteOn => "note_on",
            TriggerEvent::NoteOff => "note_off",
        }
    }
}

/// Conditions under which a region sounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCriteria {
    pub event: TriggerEvent,
    pub key_range: ValueRange,
    pub velocity_range: ValueRange,
    pub round_robin_index: Option<u32>,
}

impl Default for TriggerCriteria {
    fn default() -> Self {
        TriggerCriteria {
            event: TriggerEvent::NoteOn,
            key_range: ValueRange::new(60, 64),
            velocity_range: ValueRange::new(0, 100),
            round_robin_index: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionOptions {
    pub timbre_crossfade_region: Option<ValueRange>,
    pub auto_map_key_range_group: Option<String>,
    pub feather_overlapping_velocity_regions: bool,
}

/// The result of interpreting one library script.
#[derive(Debug, Clone)]
pub struct LibraryLoad {
    pub library: Arc<Library>,
    /// Referenced files that are missing or unreadable. These never fail the load.
    pub file_issues: Vec<FileIssue>,
}

/// Interprets a library script and builds the shared library model: sandboxed
/// evaluation, version check, post-processing and the referenced-file report.
pub fn read_library(
    script_path: &Path,
    settings: &SandboxSettings,
    cancel: Option<&CancelHandle>,
) -> Result<LibraryLoad, FloeError> {
    let script = std::fs::read(script_path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            FloeError::NotFound {
                what: "library script",
                name: script_path.display().to_string(),
            }
        } else {
            FloeError::io(script_path, source)
        }
    })?;

    let mut library = script::evaluate_with(&script, script_path, settings, cancel)?;

    if library.info.minor_version > MAX_SUPPORTED_MINOR_VERSION {
        return Err(FloeError::VersionTooOld {
            library: library.id().to_string(),
            declared: library.info.minor_version,
            supported: MAX_SUPPORTED_MINOR_VERSION,
        });
    }

    postprocess::postprocess(&mut library)?;
    let file_issues = postprocess::check_referenced_files(&library);
    for issue in &file_issues {
        warn!(library = %library.id(), path = %issue.path, issue = %issue.kind, "Referenced file problem");
    }

    info!(
        library = %library.id(),
        instruments = library.instruments().len(),
        irs = library.irs().len(),
        "Library loaded"
    );

    Ok(LibraryLoad {
        library: Arc::new(library),
        file_issues,
    })
}
