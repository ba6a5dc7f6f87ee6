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

//! PCM output sinks
//!
//! The audio engine pushes raw CD-DA frames (44100 Hz, 16-bit stereo,
//! little-endian) into a [`PcmSink`]. The sink's `write` provides the
//! playback timing: it should return roughly when the frames have been
//! played. A sink that cannot provide timing reports so, and the
//! engine paces itself at one sector per 1/75 s instead.

use crate::core::error::SinkError;

/// Playback output for raw CD-DA frames
///
/// The fixed format is 44100 Hz, 2 channels, 16-bit little-endian.
/// Sinks are created per playback run and used from the playback
/// thread only.
pub trait PcmSink {
    /// Open the output device
    fn open(&mut self) -> Result<(), SinkError>;

    /// Write one block of frames (one 2352-byte sector per call)
    fn write(&mut self, frames: &[u8]) -> Result<(), SinkError>;

    /// Close the output device
    fn close(&mut self);

    /// Whether `write` blocks until the frames have been played
    fn provides_timing(&self) -> bool;
}

/// Sink that discards everything
///
/// Used when no audio hardware is wanted; reports that it provides no
/// timing, so the engine sleeps one sector period per write.
#[derive(Debug, Default)]
pub struct NullSink;

impl PcmSink for NullSink {
    fn open(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn write(&mut self, _frames: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) {}

    fn provides_timing(&self) -> bool {
        false
    }
}

#[cfg(feature = "audio")]
pub use cpal_sink::CpalSink;

#[cfg(feature = "audio")]
mod cpal_sink {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use super::PcmSink;
    use crate::core::error::SinkError;

    /// Frames per sector (2352 bytes / 4 bytes per stereo frame)
    const FRAMES_PER_SECTOR: usize = 588;

    /// Queue high-water mark: about four sectors of audio
    const QUEUE_LIMIT: usize = FRAMES_PER_SECTOR * 4;

    /// Real audio output through cpal
    ///
    /// Keeps a queue of stereo samples drained by the output stream
    /// callback. `write` blocks while the queue is above the
    /// high-water mark, which is what paces the playback loop.
    pub struct CpalSink {
        stream: Option<cpal::Stream>,
        queue: Arc<Mutex<VecDeque<(i16, i16)>>>,
    }

    impl CpalSink {
        /// Create an unopened sink
        pub fn new() -> Self {
            Self {
                stream: None,
                queue: Arc::new(Mutex::new(VecDeque::new())),
            }
        }
    }

    impl Default for CpalSink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PcmSink for CpalSink {
        fn open(&mut self) -> Result<(), SinkError> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| SinkError::Open("no audio output device available".into()))?;

            let config = device
                .default_output_config()
                .map_err(|e| SinkError::Open(e.to_string()))?;
            let sample_rate = config.sample_rate().0;
            let channels = config.channels();

            if channels != 2 {
                return Err(SinkError::Open(format!(
                    "stereo output required, device offers {channels} channels"
                )));
            }
            if sample_rate != 44_100 {
                log::warn!(
                    "audio device runs at {} Hz (expected 44100); playback will drift",
                    sample_rate
                );
            }

            log::info!(
                "audio output on '{}' at {} Hz",
                device.name().unwrap_or_else(|_| "unknown".into()),
                sample_rate
            );

            let queue = Arc::clone(&self.queue);
            let stream = device
                .build_output_stream(
                    &config.into(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut queue = queue.lock().unwrap();
                        for frame in data.chunks_mut(2) {
                            if let Some((left, right)) = queue.pop_front() {
                                frame[0] = f32::from(left) / 32768.0;
                                frame[1] = f32::from(right) / 32768.0;
                            } else {
                                frame[0] = 0.0;
                                frame[1] = 0.0;
                            }
                        }
                    },
                    |err| log::error!("audio stream error: {err}"),
                    None,
                )
                .map_err(|e| SinkError::Open(e.to_string()))?;

            stream.play().map_err(|e| SinkError::Open(e.to_string()))?;
            self.stream = Some(stream);
            Ok(())
        }

        fn write(&mut self, frames: &[u8]) -> Result<(), SinkError> {
            if self.stream.is_none() {
                return Err(SinkError::Write("sink is not open".into()));
            }

            {
                let mut queue = self.queue.lock().unwrap();
                for sample in frames.chunks_exact(4) {
                    let left = i16::from_le_bytes([sample[0], sample[1]]);
                    let right = i16::from_le_bytes([sample[2], sample[3]]);
                    queue.push_back((left, right));
                }
            }

            // Block while the queue is full; this is the pacing source
            loop {
                let backlog = self.queue.lock().unwrap().len();
                if backlog <= QUEUE_LIMIT {
                    break;
                }
                std::thread::sleep(Duration::from_millis(2));
            }

            Ok(())
        }

        fn close(&mut self) {
            self.stream = None;
            self.queue.lock().unwrap().clear();
        }

        fn provides_timing(&self) -> bool {
            true
        }
    }
}
