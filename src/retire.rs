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

//! Hands shared data released on the audio thread back to the main thread, so
//! that freeing it never happens inside the audio callback.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::effects::convolution::Convolver;
use crate::samples::{AudioData, LoadedInstrument};

/// Something the audio thread has let go of.
pub enum Retired {
    Audio(Arc<AudioData>),
    Instrument(Arc<LoadedInstrument>),
    Convolver(Box<Convolver>),
}

impl fmt::Debug for Retired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retired::Audio(audio) => write!(f, "Audio({} frames)", audio.frame_count()),
            Retired::Instrument(instrument) => write!(f, "Instrument({})", instrument.name()),
            Retired::Convolver(_) => write!(f, "Convolver"),
        }
    }
}

/// Creates the audio-thread sender and the main-thread bin.
pub fn retire_channel(capacity: usize) -> (Retirer, RetireBin) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let overflow = Arc::new(AtomicU64::new(0));
    (
        Retirer {
            tx,
            overflow: overflow.clone(),
        },
        RetireBin { rx, overflow },
    )
}

/// Audio-thread end of the retire channel. Never blocks.
#[derive(Clone)]
pub struct Retirer {
    tx: Sender<Retired>,
    overflow: Arc<AtomicU64>,
}

impl Retirer {
    /// Queues `item` for release on the main thread. If the channel is full the
    /// item is dropped in place and the overflow counter is bumped.
    #[inline]
    pub fn retire(&self, item: Retired) {
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn retire_audio(&self, audio: Arc<AudioData>) {
        self.retire(Retired::Audio(audio));
    }
}

impl fmt::Debug for Retirer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retirer")
            .field("queued", &self.tx.len())
            .field("overflow", &self.overflow.load(Ordering::Relaxed))
            .finish()
    }
}

/// Main-thread end of the retire channel.
pub struct RetireBin {
    rx: Receiver<Retired>,
    overflow: Arc<AtomicU64>,
}

impl RetireBin {
    /// Drops everything queued so far and returns how many items were freed.
    pub fn collect(&self) -> usize {
        let mut freed = 0;
        for item in self.rx.try_iter() {
            debug!(item = ?item, "Releasing retired item");
            drop(item);
            freed += 1;
        }
        let overflow = self.overflow.swap(0, Ordering::Relaxed);
        if overflow > 0 {
            warn!(overflow, "Retire channel overflowed; items were freed on the audio thread");
        }
        freed
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for RetireBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetireBin")
            .field("pending", &self.rx.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn audio() -> Arc<AudioData> {
        Arc::new(AudioData::new(vec![0.0; 8], 1, 44100))
    }

    #[test]
    fn test_collect_frees_on_main_thread() {
        let (retirer, bin) = retire_channel(4);
        let data = audio();
        let weak = Arc::downgrade(&data);
        retirer.retire_audio(data);
        assert!(weak.upgrade().is_some());
        assert_eq!(bin.pending(), 1);
        assert_eq!(bin.collect(), 1);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_overflow_is_counted() {
        let (retirer, bin) = retire_channel(1);
        retirer.retire_audio(audio());
        retirer.retire_audio(audio());
        assert_eq!(bin.overflow_count(), 1);
        assert_eq!(bin.collect(), 1);
        assert_eq!(bin.overflow_count(), 0);
    }
}
