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

//! A map from absolute path to decoded audio, shared by every loader that
//! holds the same store. Separate stores never share buffers.
//!
//! The store only holds weak references. Loaded instruments and voices hold the
//! strong ones, so a buffer is freed as soon as nothing plays or references it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::decoder::{decode_file, AudioData, DecodeError};
use crate::playsync::CancelHandle;

#[derive(Default)]
pub struct SampleStore {
    entries: RwLock<HashMap<PathBuf, Weak<AudioData>>>,
}

impl SampleStore {
    pub fn new() -> SampleStore {
        SampleStore::default()
    }

    /// Returns the buffer for `path` if some holder still keeps it alive.
    pub fn get(&self, path: &Path) -> Option<Arc<AudioData>> {
        self.entries.read().get(path).and_then(Weak::upgrade)
    }

    /// Returns the cached buffer or decodes the file. Decoding happens outside
    /// the lock; if two workers race, the first insert wins.
    pub fn get_or_decode(
        &self,
        path: &Path,
        cancel: Option<&CancelHandle>,
    ) -> Result<Arc<AudioData>, DecodeError> {
        if let Some(audio) = self.get(path) {
            debug!(path = ?path, "Using cached sample");
            return Ok(audio);
        }

        info!(path = ?path, "Loading sample into memory");
        let audio = decode_file(path, cancel)?;
        info!(
            path = ?path,
            channels = audio.channels(),
            sample_rate = audio.sample_rate(),
            duration_ms = audio.duration().as_millis() as u64,
            memory_kb = audio.memory_size() / 1024,
            "Sample loaded"
        );
        Ok(self.insert(path, audio))
    }

    /// Publishes a decoded buffer, returning whichever buffer ends up stored.
    pub fn insert(&self, path: &Path, audio: AudioData) -> Arc<AudioData> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(path).and_then(Weak::upgrade) {
            return existing;
        }
        let audio = Arc::new(audio);
        entries.insert(path.to_path_buf(), Arc::downgrade(&audio));
        audio
    }

    /// Drops entries whose buffers have been freed. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, weak| weak.strong_count() > 0);
        before - entries.len()
    }

    /// Number of buffers currently alive.
    pub fn live_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Bytes held by live buffers.
    pub fn memory_usage(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .map(|audio| audio.memory_size())
            .sum()
    }
}

impl std::fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleStore")
            .field("live_samples", &self.live_count())
            .field("total_memory_kb", &(self.memory_usage() / 1024))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{sine, write_wav};

    #[test]
    fn test_cache_shares_buffers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.wav");
        write_wav(&path, &[sine(220.0, 48000, 480, 0.5)], 48000).expect("write");

        let store = SampleStore::new();
        let first = store.get_or_decode(&path, None).expect("decode");
        let second = store.get_or_decode(&path, None).expect("decode");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.live_count(), 1);
        assert_eq!(store.memory_usage(), 480 * 4);
    }

    #[test]
    fn test_buffers_freed_with_last_holder() {
        let store = SampleStore::new();
        let path = Path::new("/virtual/a.wav");
        let audio = store.insert(path, AudioData::new(vec![0.0; 16], 1, 48000));
        assert!(store.get(path).is_some());

        drop(audio);
        assert!(store.get(path).is_none());
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.purge(), 1);
        assert_eq!(store.purge(), 0);
    }

    #[test]
    fn test_first_insert_wins() {
        let store = SampleStore::new();
        let path = Path::new("/virtual/a.wav");
        let first = store.insert(path, AudioData::new(vec![1.0], 1, 48000));
        let second = store.insert(path, AudioData::new(vec![2.0], 1, 48000));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.samples(), &[1.0]);
    }
}
