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

//! Sample loading for instruments.
//!
//! Decodes every region of an instrument into memory up front, so that voices
//! never touch the filesystem. Runs on worker threads.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use super::decoder::{AudioData, DecodeError};
use super::store::SampleStore;
use super::streamer::{resolve_loop, ResolvedLoop};
use crate::error::FloeError;
use crate::library::{Instrument, Library, Region};
use crate::playsync::CancelHandle;

/// A region whose audio is decoded and whose loop is known to be valid.
#[derive(Debug, Clone)]
pub struct PlayableRegion {
    pub audio: Arc<AudioData>,
    pub sample_loop: Option<ResolvedLoop>,
}

/// An instrument ready for the audio thread. Regions that failed to load are
/// `None` and never start voices.
pub struct LoadedInstrument {
    library: Arc<Library>,
    index: usize,
    regions: Vec<Option<PlayableRegion>>,
}

impl LoadedInstrument {
    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    pub fn instrument(&self) -> &Instrument {
        &self.library.instruments()[self.index]
    }

    pub fn name(&self) -> &str {
        &self.instrument().name
    }

    #[inline]
    pub fn region(&self, index: usize) -> Option<&PlayableRegion> {
        self.regions.get(index).and_then(Option::as_ref)
    }

    pub fn playable_count(&self) -> usize {
        self.regions.iter().filter(|r| r.is_some()).count()
    }

    pub fn memory_usage(&self) -> usize {
        self.regions
            .iter()
            .flatten()
            .map(|r| r.audio.memory_size())
            .sum()
    }
}

impl fmt::Debug for LoadedInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedInstrument")
            .field("library", &self.library.id().to_string())
            .field("instrument", &self.name())
            .field("regions", &self.regions.len())
            .field("playable", &self.playable_count())
            .finish()
    }
}

/// Loads instruments and impulse responses through a shared sample store.
#[derive(Debug, Clone)]
pub struct InstrumentLoader {
    store: Arc<SampleStore>,
}

impl InstrumentLoader {
    pub fn new(store: Arc<SampleStore>) -> InstrumentLoader {
        InstrumentLoader { store }
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    /// Decodes all regions of `name`. Individual regions that cannot be loaded
    /// are logged and left unplayable; only cancellation fails the whole load.
    pub fn load(
        &self,
        library: &Arc<Library>,
        name: &str,
        cancel: Option<&CancelHandle>,
    ) -> Result<LoadedInstrument, FloeError> {
        let index = library
            .instrument_index(name)
            .ok_or_else(|| FloeError::NotFound {
                what: "instrument",
                name: name.to_string(),
            })?;
        let instrument = &library.instruments()[index];

        info!(
            library = %library.id(),
            instrument = name,
            regions = instrument.regions.len(),
            "Loading instrument"
        );
        let regions = instrument
            .regions
            .par_iter()
            .map(|region| self.load_region(library, region, cancel))
            .collect::<Result<Vec<_>, FloeError>>()?;

        let loaded = LoadedInstrument {
            library: library.clone(),
            index,
            regions,
        };
        info!(
            instrument = name,
            playable = loaded.playable_count(),
            memory_kb = loaded.memory_usage() / 1024,
            "Instrument loaded"
        );
        Ok(loaded)
    }

    fn load_region(
        &self,
        library: &Library,
        region: &Region,
        cancel: Option<&CancelHandle>,
    ) -> Result<Option<PlayableRegion>, FloeError> {
        let path = match library.file_reader.resolve_relative(&region.file.path) {
            Ok(path) => path,
            Err(e) => {
                warn!(path = %region.file.path, err = %e, "Region path cannot be resolved");
                return Ok(None);
            }
        };
        let audio = match self.store.get_or_decode(&path, cancel) {
            Ok(audio) => audio,
            Err(e @ DecodeError::Cancelled(_)) => return Err(e.into()),
            Err(e) => {
                warn!(path = ?path, err = %e, "Region audio failed to decode; region is unplayable");
                return Ok(None);
            }
        };
        let sample_loop = match region.file.sample_loop {
            Some(sample_loop) => match resolve_loop(&sample_loop, audio.frame_count()) {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    warn!(path = ?path, err = %e, "Region loop is invalid; region is unplayable");
                    return Ok(None);
                }
            },
            None => None,
        };
        Ok(Some(PlayableRegion { audio, sample_loop }))
    }

    /// Decodes the impulse response called `name`.
    pub fn load_impulse_response(
        &self,
        library: &Library,
        name: &str,
        cancel: Option<&CancelHandle>,
    ) -> Result<Arc<AudioData>, FloeError> {
        let ir = library.ir(name).ok_or_else(|| FloeError::NotFound {
            what: "impulse response",
            name: name.to_string(),
        })?;
        let path: PathBuf = library
            .file_reader
            .resolve_relative(&ir.path)
            .map_err(|e| FloeError::InvalidFileFormat {
                path: library.script_path.clone(),
                message: e.to_string(),
            })?;
        info!(library = %library.id(), ir = name, "Loading impulse response");
        Ok(self.store.get_or_decode(&path, cancel)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::library::read_library;
    use crate::script::SandboxSettings;
    use crate::testutil::{sine, write_library, write_wav};

    fn library(dir: &std::path::Path) -> Arc<Library> {
        write_wav(&dir.join("a.wav"), &[sine(440.0, 44100, 1000, 0.5)], 44100).expect("wav");
        write_wav(&dir.join("short.wav"), &[vec![0.1; 100]], 44100).expect("wav");
        write_wav(&dir.join("room.wav"), &[vec![1.0, 0.5, 0.25]], 44100).expect("wav");
        let script = write_library(
            dir,
            r#"
            local lib = floe.new_library({ name = "L", tagline = "t", author = "me" })
            local inst = floe.new_instrument(lib, { name = "Keys" })
            floe.add_region(inst, {
                file = { path = "a.wav", root_key = 60, loop = { start_frame = 100, end_frame = -1 } },
            })
            floe.add_region(inst, { file = { path = "missing.wav", root_key = 62 } })
            floe.add_region(inst, {
                file = { path = "short.wav", root_key = 64, loop = { start_frame = 10, end_frame = 500 } },
            })
            floe.add_ir(lib, { name = "Room", path = "room.wav" })
            return lib
            "#,
        );
        read_library(&script, &SandboxSettings::default(), None)
            .expect("library")
            .library
    }

    #[test]
    fn test_load_marks_bad_regions_unplayable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = library(dir.path());
        let loader = InstrumentLoader::new(Arc::new(SampleStore::new()));

        let loaded = loader.load(&library, "Keys", None).expect("load");
        assert_eq!(loaded.name(), "Keys");
        assert_eq!(loaded.playable_count(), 1);
        let region = loaded.region(0).expect("playable");
        assert_eq!(
            region.sample_loop,
            Some(ResolvedLoop {
                start: 100,
                end: 1000,
                crossfade: 0,
                ping_pong: false
            })
        );
        assert!(loaded.region(1).is_none());
        assert!(loaded.region(2).is_none());
        assert!(loaded.region(3).is_none());
    }

    #[test]
    fn test_loads_share_buffers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = library(dir.path());
        let store = Arc::new(SampleStore::new());
        let loader = InstrumentLoader::new(store.clone());

        let first = loader.load(&library, "Keys", None).expect("load");
        let second = loader.load(&library, "Keys", None).expect("load");
        assert!(Arc::ptr_eq(
            &first.region(0).expect("region").audio,
            &second.region(0).expect("region").audio
        ));

        drop(first);
        drop(second);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn test_buffers_shared_only_within_a_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = library(dir.path());
        let store = Arc::new(SampleStore::new());
        let first = InstrumentLoader::new(store.clone()).load(&library, "Keys", None).expect("load");
        let second = InstrumentLoader::new(store).load(&library, "Keys", None).expect("load");
        let other = InstrumentLoader::new(Arc::new(SampleStore::new()))
            .load(&library, "Keys", None)
            .expect("load");

        let audio = |loaded: &LoadedInstrument| loaded.region(0).expect("region").audio.clone();
        assert!(Arc::ptr_eq(&audio(&first), &audio(&second)));
        assert!(!Arc::ptr_eq(&audio(&first), &audio(&other)));
    }

    #[test]
    fn test_missing_instrument() {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = library(dir.path());
        let loader = InstrumentLoader::new(Arc::new(SampleStore::new()));
        let err = loader.load(&library, "Nope", None).unwrap_err();
        assert_eq!(err.code().to_string(), "CM-1");
    }

    #[test]
    fn test_cancelled_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = library(dir.path());
        let loader = InstrumentLoader::new(Arc::new(SampleStore::new()));
        let cancel = CancelHandle::new();
        cancel.cancel();
        let err = loader.load(&library, "Keys", Some(&cancel)).unwrap_err();
        assert!(matches!(err, FloeError::Decode(DecodeError::Cancelled(_))));
    }

    #[test]
    fn test_impulse_response() {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = library(dir.path());
        let loader = InstrumentLoader::new(Arc::new(SampleStore::new()));
        let ir = loader
            .load_impulse_response(&library, "Room", None)
            .expect("ir");
        assert_eq!(ir.frame_count(), 3);
        assert!(loader.load_impulse_response(&library, "Hall", None).is_err());
    }
}
