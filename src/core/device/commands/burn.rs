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

//! Recording commands
//!
//! SEND CUE SHEET, WRITE(10), CLOSE TRACK/SESSION and SYNCHRONIZE
//! CACHE, mapped onto the sequential-write bookkeeping in
//! [`crate::core::device::recording`].

use super::{asc, be16, be24, be32, CheckCondition, CmdResult, Command};
use crate::core::device::recording::WriteError;
use crate::core::device::DeviceState;

impl DeviceState {
    /// SEND CUE SHEET (5Dh)
    pub(super) fn cmd_send_cue_sheet(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let sheet_size = be24(&cdb, 6) as usize;
        log::trace!("device {}: SEND CUE SHEET ({sheet_size} bytes)", self.number);

        let input = cmd.input();
        if input.len() < sheet_size {
            return Err(CheckCondition::illegal_request(
                asc::INVALID_FIELD_IN_PARAMETER_LIST,
            ));
        }

        self.recording
            .parse_cue_sheet(&input[..sheet_size])
            .map_err(|reason| {
                log::warn!("device {}: cue sheet rejected: {reason}", self.number);
                CheckCondition::illegal_request(asc::INVALID_FIELD_IN_PARAMETER_LIST)
            })
    }

    /// WRITE(10) (2Ah)
    pub(super) fn cmd_write(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let lba = be32(&cdb, 2) as i32;
        let count = u32::from(be16(&cdb, 7));
        log::trace!("device {}: WRITE(10) lba {lba}, {count} sector(s)", self.number);

        if count == 0 {
            return Ok(());
        }

        let input = cmd.input().to_vec();
        self.recording
            .write(lba, count, &input)
            .map_err(|error| match error {
                WriteError::NotArmed | WriteError::SessionClosed => {
                    CheckCondition::illegal_request(asc::COMMAND_SEQUENCE_ERROR)
                }
                WriteError::NotSequential { expected, got } => {
                    log::debug!(
                        "device {}: non-sequential write (expected {expected}, got {got})",
                        self.number
                    );
                    CheckCondition::illegal_request(asc::INVALID_ADDRESS_FOR_WRITE)
                }
                WriteError::Io(e) => {
                    log::warn!("device {}: image writer failed: {e}", self.number);
                    CheckCondition::medium_error()
                }
            })
    }

    /// CLOSE TRACK/SESSION (5Bh)
    pub(super) fn cmd_close_track_session(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let close_function = cdb[2] & 0x07;
        let track = be16(&cdb, 4);
        log::trace!(
            "device {}: CLOSE TRACK/SESSION (function {close_function}, track {track})",
            self.number
        );

        if !self.recording.armed() {
            return Err(CheckCondition::illegal_request(asc::COMMAND_SEQUENCE_ERROR));
        }

        let result = match close_function {
            1 => self.recording.close_track(track as u8),
            2 => self.recording.close_session(),
            _ => return Err(CheckCondition::invalid_field()),
        };
        result.map_err(|e| {
            log::warn!("device {}: close failed: {e}", self.number);
            CheckCondition::medium_error()
        })
    }

    /// SYNCHRONIZE CACHE (35h)
    ///
    /// Nothing is ever buffered; succeeding is all the host needs.
    pub(super) fn cmd_synchronize_cache(&mut self, _cmd: &mut Command) -> CmdResult {
        log::trace!("device {}: SYNCHRONIZE CACHE", self.number);
        Ok(())
    }
}
