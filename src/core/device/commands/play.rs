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

//! Audio playback commands
//!
//! PLAY AUDIO(10), PLAY AUDIO(12), PLAY AUDIO MSF, PAUSE/RESUME and
//! STOP PLAY/SCAN translate onto the audio engine. The play range is
//! validated against the layout first: every track it touches must be
//! an audio track.

use super::{asc, be16, be32, CheckCondition, CmdResult, Command};
use crate::core::device::DeviceState;
use crate::core::disc::{lba_of_msf, SectorMode};
use crate::core::error::DaemonError;

impl DeviceState {
    /// Validate the range and hand it to the audio engine
    fn start_audio(&mut self, begin: i32, end: i32) -> CmdResult {
        let disc = self.require_disc()?;

        if end < begin {
            return Err(CheckCondition::invalid_field());
        }
        if u64::from(end.max(0) as u32) >= u64::from(disc.capacity()) {
            return Err(CheckCondition::illegal_request(asc::LBA_OUT_OF_RANGE));
        }

        // The whole range must lie on audio tracks
        for session in &disc.sessions {
            for track in &session.tracks {
                let overlaps = begin < track.end() && end >= track.base;
                if overlaps && track.mode != SectorMode::Audio {
                    return Err(CheckCondition::illegal_request(
                        asc::ILLEGAL_MODE_FOR_THIS_TRACK,
                    ));
                }
            }
        }

        self.audio
            .start(begin, end, disc)
            .map_err(audio_state_error)
    }

    /// PLAY AUDIO(10) (45h)
    pub(super) fn cmd_play_audio_10(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let lba = be32(&cdb, 2);
        let length = u32::from(be16(&cdb, 7));
        log::trace!(
            "device {}: PLAY AUDIO(10) lba {lba}, {length} sector(s)",
            self.number
        );

        if length == 0 {
            return Ok(());
        }
        // FFFFFFFFh means "from the current position"
        let begin = if lba == 0xFFFF_FFFF {
            self.current_address()
        } else {
            lba as i32
        };
        self.start_audio(begin, begin + length as i32 - 1)
    }

    /// PLAY AUDIO(12) (A5h)
    pub(super) fn cmd_play_audio_12(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let lba = be32(&cdb, 2);
        let length = be32(&cdb, 6);
        log::trace!(
            "device {}: PLAY AUDIO(12) lba {lba}, {length} sector(s)",
            self.number
        );

        if length == 0 {
            return Ok(());
        }
        let begin = if lba == 0xFFFF_FFFF {
            self.current_address()
        } else {
            lba as i32
        };
        self.start_audio(begin, begin + length as i32 - 1)
    }

    /// PLAY AUDIO MSF (47h)
    pub(super) fn cmd_play_audio_msf(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let begin = if cdb[3] == 0xFF && cdb[4] == 0xFF && cdb[5] == 0xFF {
            self.current_address()
        } else {
            lba_of_msf(cdb[3], cdb[4], cdb[5])
        };
        let end = lba_of_msf(cdb[6], cdb[7], cdb[8]);
        log::trace!(
            "device {}: PLAY AUDIO MSF {begin}..={end}",
            self.number
        );

        self.start_audio(begin, end)
    }

    /// PAUSE/RESUME (4Bh)
    pub(super) fn cmd_pause_resume(&mut self, cmd: &mut Command) -> CmdResult {
        let resume = cmd.cdb()[8] & 0x01 != 0;
        log::trace!(
            "device {}: {}",
            self.number,
            if resume { "RESUME" } else { "PAUSE" }
        );

        let result = if resume {
            self.audio.resume()
        } else {
            self.audio.pause()
        };
        result.map_err(audio_state_error)
    }

    /// STOP PLAY/SCAN (4Eh)
    pub(super) fn cmd_stop_play_scan(&mut self, _cmd: &mut Command) -> CmdResult {
        log::trace!("device {}: STOP PLAY/SCAN", self.number);

        // Stopping an idle drive is not an error on the wire
        match self.audio.stop() {
            Ok(()) | Err(DaemonError::InvalidAudioState { .. }) => Ok(()),
            Err(_) => Err(CheckCondition::new(
                super::sense_key::HARDWARE_ERROR,
                0x0000,
            )),
        }
    }
}

/// Engine state errors surface as COMMAND SEQUENCE ERROR
fn audio_state_error(error: DaemonError) -> CheckCondition {
    match error {
        DaemonError::InvalidAudioState { .. } => {
            CheckCondition::illegal_request(asc::COMMAND_SEQUENCE_ERROR)
        }
        _ => CheckCondition::medium_error(),
    }
}
