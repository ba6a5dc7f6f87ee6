// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Audio playback engine
//!
//! Drives CD-DA playback for PLAY AUDIO / PAUSE RESUME / STOP. One
//! playback thread exists per playing engine; `pause` and `stop` flip
//! the shared status and join it. The thread walks the play range one
//! sector at a time, pushing raw frames into a [`PcmSink`]; the sink's
//! `write` provides the timing, and a sink without timing makes the
//! thread sleep one sector period (1/75 s) per sector itself.
//!
//! Status and current position are plain atomics so that status reads
//! (READ SUBCHANNEL, MECHANISM STATUS) never need the device mutex.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::disc::{Disc, SectorMode};
use crate::core::error::DaemonError;

pub mod sink;

pub use sink::{NullSink, PcmSink};

#[cfg(feature = "audio")]
pub use sink::CpalSink;

/// Audio status codes as reported in READ SUBCHANNEL headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AudioStatus {
    /// Play operation in progress
    Playing = 0x11,
    /// Play operation paused
    Paused = 0x12,
    /// Play operation successfully completed
    Completed = 0x13,
    /// Play operation stopped due to an error
    Error = 0x14,
    /// No current audio status to return
    NoStatus = 0x15,
}

impl AudioStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0x11 => AudioStatus::Playing,
            0x12 => AudioStatus::Paused,
            0x13 => AudioStatus::Completed,
            0x14 => AudioStatus::Error,
            _ => AudioStatus::NoStatus,
        }
    }

    /// Short name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            AudioStatus::Playing => "playing",
            AudioStatus::Paused => "paused",
            AudioStatus::Completed => "completed",
            AudioStatus::Error => "error",
            AudioStatus::NoStatus => "no-status",
        }
    }
}

/// Creates a fresh sink for each playback run
///
/// The sink itself is built inside the playback thread, so it does not
/// have to be `Send`; only the factory is shared.
pub type SinkFactory = Arc<dyn Fn() -> Box<dyn PcmSink> + Send + Sync>;

/// Resolve an audio driver name to a sink factory
///
/// `"null"` always exists; `"cpal"` (and `"default"`) select the real
/// backend when the `audio` feature is built in. Unknown names return
/// `None` so the caller can pick its own fallback.
pub fn sink_factory(driver: &str) -> Option<SinkFactory> {
    match driver {
        "null" => Some(Arc::new(|| Box::new(NullSink) as Box<dyn PcmSink>)),
        #[cfg(feature = "audio")]
        "cpal" | "default" => Some(Arc::new(|| Box::new(CpalSink::new()) as Box<dyn PcmSink>)),
        _ => None,
    }
}

/// State shared between the engine handle and the playback thread
struct Shared {
    status: AtomicU8,
    current: AtomicI32,
    end: AtomicI32,
}

/// CD audio playback engine, one per device
pub struct AudioEngine {
    shared: Arc<Shared>,
    disc: Mutex<Option<Arc<Disc>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    factory: SinkFactory,
}

impl AudioEngine {
    /// Create an engine that plays into sinks from `factory`
    pub fn new(factory: SinkFactory) -> Self {
        Self {
            shared: Arc::new(Shared {
                status: AtomicU8::new(AudioStatus::NoStatus as u8),
                current: AtomicI32::new(0),
                end: AtomicI32::new(0),
            }),
            disc: Mutex::new(None),
            thread: Mutex::new(None),
            factory,
        }
    }

    /// Engine that discards all audio
    pub fn with_null_sink() -> Self {
        Self::new(Arc::new(|| Box::new(NullSink) as Box<dyn PcmSink>))
    }

    /// Current playback status
    pub fn status(&self) -> AudioStatus {
        AudioStatus::from_u8(self.shared.status.load(Ordering::Acquire))
    }

    /// Sector the playback loop will play next
    pub fn current_lba(&self) -> i32 {
        self.shared.current.load(Ordering::Acquire)
    }

    /// Start playing `[begin, end]` on `disc`
    ///
    /// Rejected while playing or paused; a completed or failed run is
    /// reaped first.
    pub fn start(&self, begin: i32, end: i32, disc: Arc<Disc>) -> Result<(), DaemonError> {
        let status = self.status();
        if matches!(status, AudioStatus::Playing | AudioStatus::Paused) {
            log::warn!("audio start while {}", status.name());
            return Err(DaemonError::InvalidAudioState {
                operation: "start",
                status: status.name(),
            });
        }
        self.join_thread();

        log::debug!("starting audio playback {begin}..={end}");
        *self.disc.lock().unwrap() = Some(disc);
        self.shared.current.store(begin, Ordering::Release);
        self.shared.end.store(end, Ordering::Release);
        self.spawn_playback();
        Ok(())
    }

    /// Resume from a pause
    pub fn resume(&self) -> Result<(), DaemonError> {
        let status = self.status();
        if status != AudioStatus::Paused {
            log::warn!("audio resume while {}", status.name());
            return Err(DaemonError::InvalidAudioState {
                operation: "resume",
                status: status.name(),
            });
        }
        self.join_thread();

        log::debug!("resuming audio playback at {}", self.current_lba());
        self.spawn_playback();
        Ok(())
    }

    /// Pause playback, keeping the position and the disc reference
    pub fn pause(&self) -> Result<(), DaemonError> {
        // Compare-exchange so a playback thread finishing at the same
        // moment cannot have its Completed/Error status overwritten
        if let Err(actual) = self.shared.status.compare_exchange(
            AudioStatus::Playing as u8,
            AudioStatus::Paused as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            let status = AudioStatus::from_u8(actual);
            log::warn!("audio pause while {}", status.name());
            return Err(DaemonError::InvalidAudioState {
                operation: "pause",
                status: status.name(),
            });
        }

        self.join_thread();
        log::debug!("audio paused at {}", self.current_lba());
        Ok(())
    }

    /// Stop playback and release the disc reference
    pub fn stop(&self) -> Result<(), DaemonError> {
        let status = self.status();
        if status == AudioStatus::NoStatus {
            return Err(DaemonError::InvalidAudioState {
                operation: "stop",
                status: status.name(),
            });
        }

        self.shared
            .status
            .store(AudioStatus::NoStatus as u8, Ordering::Release);
        self.join_thread();
        *self.disc.lock().unwrap() = None;
        log::debug!("audio stopped");
        Ok(())
    }

    /// Spawn the playback thread for the current range
    fn spawn_playback(&self) {
        let shared = Arc::clone(&self.shared);
        let disc = self
            .disc
            .lock()
            .unwrap()
            .clone()
            .expect("playback without a disc");
        let factory = Arc::clone(&self.factory);

        shared
            .status
            .store(AudioStatus::Playing as u8, Ordering::Release);

        let handle = std::thread::spawn(move || {
            playback_loop(&shared, &disc, factory);
        });
        *self.thread.lock().unwrap() = Some(handle);
    }

    /// Reap a finished or signalled playback thread
    fn join_thread(&self) {
        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("audio playback thread panicked");
                self.shared
                    .status
                    .store(AudioStatus::Error as u8, Ordering::Release);
            }
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        // Force playback to stop before the engine goes away
        self.shared
            .status
            .store(AudioStatus::NoStatus as u8, Ordering::Release);
        self.join_thread();
    }
}

/// Body of the playback thread
fn playback_loop(shared: &Shared, disc: &Disc, factory: SinkFactory) {
    let mut sink = factory();
    if let Err(e) = sink.open() {
        log::warn!("failed to open audio sink: {e}");
        shared
            .status
            .store(AudioStatus::Error as u8, Ordering::Release);
        return;
    }

    log::trace!("playback thread start");

    loop {
        // Interruptible: pause/stop flip the status and we bail out
        if AudioStatus::from_u8(shared.status.load(Ordering::Acquire)) != AudioStatus::Playing {
            log::trace!("playback thread interrupted");
            break;
        }

        let current = shared.current.load(Ordering::Acquire);
        if current > shared.end.load(Ordering::Acquire) {
            log::trace!("playback thread reached the end");
            shared
                .status
                .store(AudioStatus::Completed as u8, Ordering::Release);
            break;
        }

        let sector = match disc.sector_at(current) {
            Ok(sector) => sector,
            Err(e) => {
                log::warn!("failed to get sector {current}: {e}");
                shared
                    .status
                    .store(AudioStatus::Error as u8, Ordering::Release);
                break;
            }
        };

        // Covers both a non-audio sector and the range running off the
        // end of an audio track into data
        if sector.mode() != SectorMode::Audio {
            log::warn!("non-audio sector at {current} during playback");
            shared
                .status
                .store(AudioStatus::Error as u8, Ordering::Release);
            break;
        }

        if let Err(e) = sink.write(sector.raw()) {
            log::warn!("playback write failed: {e}");
            shared
                .status
                .store(AudioStatus::Error as u8, Ordering::Release);
            break;
        }

        if !sink.provides_timing() {
            // One sector is 1/75th of a second
            std::thread::sleep(Duration::from_micros(1_000_000 / 75));
        }

        shared.current.store(current + 1, Ordering::Release);
    }

    sink.close();
    log::trace!("playback thread end");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::disc::{
        MediumType, NullFragment, Session, SessionType, Track, TrackFlags, LEAD_PREGAP,
    };
    use crate::core::error::SinkError;
    use std::sync::atomic::AtomicU32;

    /// Sink that counts sectors and provides fake instant timing
    struct CountingSink {
        written: Arc<AtomicU32>,
        fail_after: Option<u32>,
    }

    impl PcmSink for CountingSink {
        fn open(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn write(&mut self, frames: &[u8]) -> Result<(), SinkError> {
            assert_eq!(frames.len(), 2352);
            let n = self.written.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(limit) = self.fail_after {
                if n > limit {
                    return Err(SinkError::Write("simulated failure".into()));
                }
            }
            Ok(())
        }

        fn close(&mut self) {}

        fn provides_timing(&self) -> bool {
            true
        }
    }

    fn audio_disc(sectors: u32) -> Arc<Disc> {
        let mut track = Track::new(SectorMode::Audio, TrackFlags::empty());
        track.pregap = LEAD_PREGAP;
        track.push_fragment(Box::new(NullFragment::new(LEAD_PREGAP, 2352)));
        track.push_fragment(Box::new(NullFragment::new(sectors, 2352)));
        let session = Session::new(SessionType::CdDa, vec![track]);
        Arc::new(Disc::new(MediumType::Cd, vec![session], vec![]).unwrap())
    }

    fn counting_engine(fail_after: Option<u32>) -> (AudioEngine, Arc<AtomicU32>) {
        let written = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&written);
        let engine = AudioEngine::new(Arc::new(move || {
            Box::new(CountingSink {
                written: Arc::clone(&counter),
                fail_after,
            }) as Box<dyn PcmSink>
        }));
        (engine, written)
    }

    fn wait_until_done(engine: &AudioEngine) {
        for _ in 0..500 {
            if engine.status() != AudioStatus::Playing {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("playback did not settle");
    }

    #[test]
    fn test_initial_status() {
        let engine = AudioEngine::with_null_sink();
        assert_eq!(engine.status(), AudioStatus::NoStatus);
    }

    #[test]
    fn test_play_visits_every_sector() {
        let (engine, written) = counting_engine(None);
        engine.start(0, 74, audio_disc(75)).unwrap();
        wait_until_done(&engine);

        assert_eq!(engine.status(), AudioStatus::Completed);
        assert_eq!(written.load(Ordering::SeqCst), 75);
        assert_eq!(engine.current_lba(), 75);
    }

    #[test]
    fn test_start_while_playing_rejected() {
        let engine = AudioEngine::with_null_sink();
        let disc = audio_disc(750);
        engine.start(0, 749, Arc::clone(&disc)).unwrap();

        let err = engine.start(0, 10, disc).unwrap_err();
        assert!(matches!(err, DaemonError::InvalidAudioState { .. }));
        engine.stop().unwrap();
    }

    #[test]
    fn test_pause_and_resume() {
        let engine = AudioEngine::with_null_sink();
        engine.start(0, 749, audio_disc(750)).unwrap();

        engine.pause().unwrap();
        assert_eq!(engine.status(), AudioStatus::Paused);
        let position = engine.current_lba();

        engine.resume().unwrap();
        assert_eq!(engine.status(), AudioStatus::Playing);
        assert!(engine.current_lba() >= position);

        engine.stop().unwrap();
        assert_eq!(engine.status(), AudioStatus::NoStatus);
    }

    #[test]
    fn test_resume_requires_pause() {
        let engine = AudioEngine::with_null_sink();
        assert!(matches!(
            engine.resume(),
            Err(DaemonError::InvalidAudioState { .. })
        ));
    }

    #[test]
    fn test_stop_requires_activity() {
        let engine = AudioEngine::with_null_sink();
        assert!(matches!(
            engine.stop(),
            Err(DaemonError::InvalidAudioState { .. })
        ));
    }

    #[test]
    fn test_sink_failure_sets_error() {
        let (engine, _written) = counting_engine(Some(3));
        engine.start(0, 74, audio_disc(75)).unwrap();
        wait_until_done(&engine);

        assert_eq!(engine.status(), AudioStatus::Error);
        // Stop from the error state releases the disc reference
        engine.stop().unwrap();
        assert_eq!(engine.status(), AudioStatus::NoStatus);
    }

    #[test]
    fn test_non_audio_sector_sets_error() {
        let mut audio = Track::new(SectorMode::Audio, TrackFlags::empty());
        audio.pregap = LEAD_PREGAP;
        audio.push_fragment(Box::new(NullFragment::new(LEAD_PREGAP + 10, 2352)));
        let mut data = Track::new(SectorMode::Mode1, TrackFlags::empty());
        data.push_fragment(Box::new(NullFragment::new(10, 2048)));
        let session = Session::new(SessionType::CdDa, vec![audio, data]);
        let disc = Arc::new(Disc::new(MediumType::Cd, vec![session], vec![]).unwrap());

        let (engine, written) = counting_engine(None);
        engine.start(5, 15, disc).unwrap();
        wait_until_done(&engine);

        assert_eq!(engine.status(), AudioStatus::Error);
        assert_eq!(written.load(Ordering::SeqCst), 5);
    }
}
