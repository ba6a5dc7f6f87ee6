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

//! MMC-3 command interpreter
//!
//! `execute_command` is the single entry point: it runs the
//! precondition chain (pending unit attention, medium presence), then
//! dispatches on the CDB opcode to one handler per command. Handlers
//! return `Result<(), CheckCondition>`; a failure is converted into
//! latched sense data, copied into the response payload, and reported
//! as SCSI status CHECK CONDITION.
//!
//! Handlers are grouped by concern:
//!
//! | module    | commands |
//! |-----------|----------|
//! | `probe`   | INQUIRY, TEST UNIT READY, REQUEST SENSE, GET CONFIGURATION, GET EVENT/STATUS, MECHANISM STATUS |
//! | `mode`    | MODE SENSE(6/10), MODE SELECT(6/10) |
//! | `read`    | READ CAPACITY, READ(10/12), READ CD, READ SUBCHANNEL |
//! | `toc`     | READ TOC/PMA/ATIP, READ DISC INFORMATION, READ TRACK INFORMATION, READ DVD STRUCTURE |
//! | `control` | START STOP UNIT, PREVENT ALLOW MEDIUM REMOVAL, SET CD SPEED, REPORT KEY, SEND KEY |
//! | `play`    | PLAY AUDIO(10/12/MSF), PAUSE/RESUME, STOP PLAY/SCAN |
//! | `burn`    | SEND CUE SHEET, WRITE(10), CLOSE TRACK/SESSION, SYNCHRONIZE CACHE |

use super::{DeviceState, SenseData};

mod burn;
mod control;
mod mode;
mod play;
mod probe;
mod read;
mod toc;

/// SCSI command opcodes handled by the dispatcher
pub mod opcode {
    /// Test if the logical unit is ready
    pub const TEST_UNIT_READY: u8 = 0x00;
    /// Request sense data from the previous command
    pub const REQUEST_SENSE: u8 = 0x03;
    /// Return device identification
    pub const INQUIRY: u8 = 0x12;
    /// Set mode parameters (6-byte)
    pub const MODE_SELECT_6: u8 = 0x15;
    /// Return mode parameters (6-byte)
    pub const MODE_SENSE_6: u8 = 0x1A;
    /// Start/stop unit, load/eject
    pub const START_STOP_UNIT: u8 = 0x1B;
    /// Prevent/allow medium removal
    pub const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
    /// Return logical block address capacity
    pub const READ_CAPACITY: u8 = 0x25;
    /// Read data from medium (10-byte)
    pub const READ_10: u8 = 0x28;
    /// Write data to medium (10-byte)
    pub const WRITE_10: u8 = 0x2A;
    /// Flush write cache
    pub const SYNCHRONIZE_CACHE: u8 = 0x35;
    /// Read subchannel data
    pub const READ_SUBCHANNEL: u8 = 0x42;
    /// Read table of contents
    pub const READ_TOC_PMA_ATIP: u8 = 0x43;
    /// Play audio (10-byte, LBA addressing)
    pub const PLAY_AUDIO_10: u8 = 0x45;
    /// Get configuration (features and profiles)
    pub const GET_CONFIGURATION: u8 = 0x46;
    /// Play audio (MSF addressing)
    pub const PLAY_AUDIO_MSF: u8 = 0x47;
    /// Get event/status notification
    pub const GET_EVENT_STATUS_NOTIFICATION: u8 = 0x4A;
    /// Pause or resume audio playback
    pub const PAUSE_RESUME: u8 = 0x4B;
    /// Stop audio playback
    pub const STOP_PLAY_SCAN: u8 = 0x4E;
    /// Read disc information
    pub const READ_DISC_INFORMATION: u8 = 0x51;
    /// Read track information
    pub const READ_TRACK_INFORMATION: u8 = 0x52;
    /// Close track or session
    pub const CLOSE_TRACK_SESSION: u8 = 0x5B;
    /// Send SAO cue sheet
    pub const SEND_CUE_SHEET: u8 = 0x5D;
    /// Set mode parameters (10-byte)
    pub const MODE_SELECT_10: u8 = 0x55;
    /// Return mode parameters (10-byte)
    pub const MODE_SENSE_10: u8 = 0x5A;
    /// Send key (CSS handshake)
    pub const SEND_KEY: u8 = 0xA3;
    /// Report key (CSS handshake)
    pub const REPORT_KEY: u8 = 0xA4;
    /// Play audio (12-byte, LBA addressing)
    pub const PLAY_AUDIO_12: u8 = 0xA5;
    /// Read data from medium (12-byte)
    pub const READ_12: u8 = 0xA8;
    /// Read DVD structure
    pub const READ_DVD_STRUCTURE: u8 = 0xAD;
    /// Set CD read speed
    pub const SET_CD_SPEED: u8 = 0xBB;
    /// Mechanism status
    pub const MECHANISM_STATUS: u8 = 0xBD;
    /// Read CD with full field selection
    pub const READ_CD: u8 = 0xBE;
}

/// SCSI status codes
pub mod status {
    /// Command completed successfully
    pub const GOOD: u32 = 0x00;
    /// Check condition, sense data available
    pub const CHECK_CONDITION: u32 = 0x02;
    /// Device busy
    pub const BUSY: u32 = 0x08;
}

/// Sense key codes
pub mod sense_key {
    /// No error
    pub const NO_SENSE: u8 = 0x00;
    /// Device not ready
    pub const NOT_READY: u8 = 0x02;
    /// Medium error
    pub const MEDIUM_ERROR: u8 = 0x03;
    /// Hardware error
    pub const HARDWARE_ERROR: u8 = 0x04;
    /// Illegal request
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    /// Unit attention (media changed, reset)
    pub const UNIT_ATTENTION: u8 = 0x06;
    /// Aborted command
    pub const ABORTED_COMMAND: u8 = 0x0B;
}

/// Combined ASC/ASCQ words
pub mod asc {
    /// Unrecovered read error
    pub const UNRECOVERED_READ_ERROR: u16 = 0x1100;
    /// Invalid command operation code
    pub const INVALID_COMMAND_OPERATION_CODE: u16 = 0x2000;
    /// Logical block address out of range
    pub const LBA_OUT_OF_RANGE: u16 = 0x2100;
    /// Invalid address for write
    pub const INVALID_ADDRESS_FOR_WRITE: u16 = 0x2102;
    /// Invalid field in CDB
    pub const INVALID_FIELD_IN_CDB: u16 = 0x2400;
    /// Invalid field in parameter list
    pub const INVALID_FIELD_IN_PARAMETER_LIST: u16 = 0x2600;
    /// Not ready to ready change, medium may have changed
    pub const MEDIUM_MAY_HAVE_CHANGED: u16 = 0x2800;
    /// Power on, reset or bus device reset occurred
    pub const POWER_ON_RESET: u16 = 0x2900;
    /// Command sequence error
    pub const COMMAND_SEQUENCE_ERROR: u16 = 0x2C00;
    /// Cannot read medium, incompatible format
    pub const CANNOT_READ_MEDIUM: u16 = 0x3002;
    /// Medium not present
    pub const MEDIUM_NOT_PRESENT: u16 = 0x3A00;
    /// Medium removal prevented
    pub const MEDIUM_REMOVAL_PREVENTED: u16 = 0x5302;
    /// Illegal mode for this track
    pub const ILLEGAL_MODE_FOR_THIS_TRACK: u16 = 0x6400;
}

/// A command failure on its way to becoming sense data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckCondition {
    /// Sense key
    pub key: u8,
    /// Combined ASC/ASCQ
    pub asc_ascq: u16,
    /// Incorrect length indicator
    pub ili: bool,
    /// Command-specific information
    pub cmd_info: u32,
}

impl CheckCondition {
    /// Generic constructor
    pub fn new(key: u8, asc_ascq: u16) -> Self {
        Self {
            key,
            asc_ascq,
            ili: false,
            cmd_info: 0,
        }
    }

    /// ILLEGAL REQUEST with the given ASC/ASCQ
    pub fn illegal_request(asc_ascq: u16) -> Self {
        Self::new(sense_key::ILLEGAL_REQUEST, asc_ascq)
    }

    /// ILLEGAL REQUEST / INVALID FIELD IN CDB
    pub fn invalid_field() -> Self {
        Self::illegal_request(asc::INVALID_FIELD_IN_CDB)
    }

    /// NOT READY / MEDIUM NOT PRESENT
    pub fn not_ready() -> Self {
        Self::new(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT)
    }

    /// MEDIUM ERROR / UNRECOVERED READ ERROR
    pub fn medium_error() -> Self {
        Self::new(sense_key::MEDIUM_ERROR, asc::UNRECOVERED_READ_ERROR)
    }
}

/// Handler result type
pub type CmdResult = Result<(), CheckCondition>;

/// One in-flight command: the CDB plus the transport's data buffers
///
/// The response is appended through [`Command::write`], which clamps
/// to the output buffer so oversized allocation lengths can never
/// overrun the transport frame.
pub struct Command<'a> {
    cdb: [u8; 12],
    input: &'a [u8],
    output: &'a mut [u8],
    out_len: usize,
}

impl<'a> Command<'a> {
    /// Wrap a CDB (zero-padded to 12 bytes) and the data buffers
    pub fn new(cdb: &[u8], input: &'a [u8], output: &'a mut [u8]) -> Self {
        let mut padded = [0u8; 12];
        let len = cdb.len().min(12);
        padded[..len].copy_from_slice(&cdb[..len]);
        Self {
            cdb: padded,
            input,
            output,
            out_len: 0,
        }
    }

    /// The zero-padded CDB
    pub fn cdb(&self) -> &[u8; 12] {
        &self.cdb
    }

    /// Outgoing data sent by the initiator (WRITE, MODE SELECT, ...)
    pub fn input(&self) -> &[u8] {
        self.input
    }

    /// Bytes of response payload produced so far
    pub fn out_len(&self) -> usize {
        self.out_len
    }

    /// Append response bytes, clamped to the output buffer
    pub fn write(&mut self, data: &[u8]) {
        let space = self.output.len().saturating_sub(self.out_len);
        let len = data.len().min(space);
        if len < data.len() {
            log::trace!("response truncated from {} to {len} bytes", data.len());
        }
        self.output[self.out_len..self.out_len + len].copy_from_slice(&data[..len]);
        self.out_len += len;
    }

    /// Append response bytes, additionally clamped to `alloc` total
    pub fn write_clamped(&mut self, data: &[u8], alloc: usize) {
        let len = data.len().min(alloc.saturating_sub(self.out_len));
        let chunk = &data[..len];
        self.write(chunk);
    }

    /// Replace the whole response payload (sense on CHECK CONDITION)
    fn overwrite(&mut self, data: &[u8]) {
        self.out_len = 0;
        self.write(data);
    }
}

/// Whether an opcode can run without a medium present
fn runs_without_medium(op: u8) -> bool {
    matches!(
        op,
        opcode::TEST_UNIT_READY
            | opcode::REQUEST_SENSE
            | opcode::INQUIRY
            | opcode::MODE_SELECT_6
            | opcode::MODE_SENSE_6
            | opcode::START_STOP_UNIT
            | opcode::PREVENT_ALLOW_MEDIUM_REMOVAL
            | opcode::SYNCHRONIZE_CACHE
            | opcode::GET_CONFIGURATION
            | opcode::GET_EVENT_STATUS_NOTIFICATION
            | opcode::CLOSE_TRACK_SESSION
            | opcode::SEND_CUE_SHEET
            | opcode::WRITE_10
            | opcode::MODE_SELECT_10
            | opcode::MODE_SENSE_10
            | opcode::READ_DVD_STRUCTURE
            | opcode::MECHANISM_STATUS
    )
}

impl DeviceState {
    /// Execute one SCSI command
    ///
    /// Returns the SCSI status byte. On CHECK CONDITION the response
    /// payload is the fixed-format sense data, and the same sense is
    /// latched for a following REQUEST SENSE.
    pub fn execute_command(&mut self, cmd: &mut Command) -> u32 {
        let op = cmd.cdb()[0];
        log::debug!("device {}: command {op:02X}h", self.number);

        // A pending unit attention preempts everything except the two
        // commands defined to bypass it
        if op != opcode::INQUIRY && op != opcode::REQUEST_SENSE {
            if let Some(asc_ascq) = self.take_unit_attention() {
                log::debug!("device {}: reporting unit attention", self.number);
                return self.fail(cmd, CheckCondition::new(sense_key::UNIT_ATTENTION, asc_ascq));
            }
        }

        // Disc and track information also answer for a blank medium
        // armed by a cue sheet
        let recording_probe = self.recording.armed()
            && matches!(
                op,
                opcode::READ_DISC_INFORMATION | opcode::READ_TRACK_INFORMATION
            );
        if !self.loaded() && !runs_without_medium(op) && !recording_probe {
            return self.fail(cmd, CheckCondition::not_ready());
        }

        let result = match op {
            opcode::TEST_UNIT_READY => self.cmd_test_unit_ready(cmd),
            opcode::REQUEST_SENSE => self.cmd_request_sense(cmd),
            opcode::INQUIRY => self.cmd_inquiry(cmd),
            opcode::MODE_SELECT_6 => self.cmd_mode_select(cmd, false),
            opcode::MODE_SELECT_10 => self.cmd_mode_select(cmd, true),
            opcode::MODE_SENSE_6 => self.cmd_mode_sense(cmd, false),
            opcode::MODE_SENSE_10 => self.cmd_mode_sense(cmd, true),
            opcode::START_STOP_UNIT => self.cmd_start_stop_unit(cmd),
            opcode::PREVENT_ALLOW_MEDIUM_REMOVAL => self.cmd_prevent_allow(cmd),
            opcode::READ_CAPACITY => self.cmd_read_capacity(cmd),
            opcode::READ_10 => self.cmd_read(cmd, false),
            opcode::READ_12 => self.cmd_read(cmd, true),
            opcode::READ_CD => self.cmd_read_cd(cmd),
            opcode::READ_SUBCHANNEL => self.cmd_read_subchannel(cmd),
            opcode::READ_TOC_PMA_ATIP => self.cmd_read_toc(cmd),
            opcode::GET_CONFIGURATION => self.cmd_get_configuration(cmd),
            opcode::GET_EVENT_STATUS_NOTIFICATION => self.cmd_get_event_status(cmd),
            opcode::READ_DISC_INFORMATION => self.cmd_read_disc_information(cmd),
            opcode::READ_TRACK_INFORMATION => self.cmd_read_track_information(cmd),
            opcode::READ_DVD_STRUCTURE => self.cmd_read_dvd_structure(cmd),
            opcode::MECHANISM_STATUS => self.cmd_mechanism_status(cmd),
            opcode::SET_CD_SPEED => self.cmd_set_cd_speed(cmd),
            opcode::REPORT_KEY => self.cmd_report_key(cmd),
            opcode::SEND_KEY => self.cmd_send_key(cmd),
            opcode::PLAY_AUDIO_10 => self.cmd_play_audio_10(cmd),
            opcode::PLAY_AUDIO_12 => self.cmd_play_audio_12(cmd),
            opcode::PLAY_AUDIO_MSF => self.cmd_play_audio_msf(cmd),
            opcode::PAUSE_RESUME => self.cmd_pause_resume(cmd),
            opcode::STOP_PLAY_SCAN => self.cmd_stop_play_scan(cmd),
            opcode::SEND_CUE_SHEET => self.cmd_send_cue_sheet(cmd),
            opcode::WRITE_10 => self.cmd_write(cmd),
            opcode::CLOSE_TRACK_SESSION => self.cmd_close_track_session(cmd),
            opcode::SYNCHRONIZE_CACHE => self.cmd_synchronize_cache(cmd),
            _ => {
                log::warn!("device {}: unknown command {op:02X}h", self.number);
                Err(CheckCondition::illegal_request(
                    asc::INVALID_COMMAND_OPERATION_CODE,
                ))
            }
        };

        match result {
            Ok(()) => {
                self.delay_finalize();
                status::GOOD
            }
            Err(condition) => self.fail(cmd, condition),
        }
    }

    /// Latch sense, place it in the response, report CHECK CONDITION
    fn fail(&mut self, cmd: &mut Command, condition: CheckCondition) -> u32 {
        log::debug!(
            "device {}: CHECK CONDITION key {:02X}h asc/ascq {:04X}h",
            self.number,
            condition.key,
            condition.asc_ascq
        );

        let mut sense = SenseData::new(condition.key, condition.asc_ascq);
        sense.ili = condition.ili;
        sense.cmd_info = condition.cmd_info;

        cmd.overwrite(&sense.to_bytes());
        self.set_sense(sense);
        status::CHECK_CONDITION
    }
}

/// 16-bit big-endian field
pub(super) fn be16(cdb: &[u8; 12], index: usize) -> u16 {
    u16::from_be_bytes([cdb[index], cdb[index + 1]])
}

/// 24-bit big-endian field
pub(super) fn be24(cdb: &[u8; 12], index: usize) -> u32 {
    u32::from_be_bytes([0, cdb[index], cdb[index + 1], cdb[index + 2]])
}

/// 32-bit big-endian field
pub(super) fn be32(cdb: &[u8; 12], index: usize) -> u32 {
    u32::from_be_bytes([cdb[index], cdb[index + 1], cdb[index + 2], cdb[index + 3]])
}
