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

//! Data read commands
//!
//! READ CAPACITY, READ(10), READ(12), READ CD and READ SUBCHANNEL.
//! Range checks happen before any byte is produced: a read that is
//! partially out of range transfers nothing.

use std::sync::Arc;

use super::{asc, be16, be24, be32, CheckCondition, CmdResult, Command};
use crate::core::device::DeviceState;
use crate::core::disc::{
    C2Selection, Disc, MainChannelSelection, SectorError, SectorMode, SubchannelSelection,
};

impl DeviceState {
    /// The loaded disc (medium presence was checked by the dispatcher)
    pub(super) fn require_disc(&self) -> Result<Arc<Disc>, CheckCondition> {
        self.disc().cloned().ok_or_else(CheckCondition::not_ready)
    }

    /// Check `[lba, lba+count)` against the addressable range
    fn check_range(disc: &Disc, lba: u32, count: u32) -> Result<(), CheckCondition> {
        let capacity = u64::from(disc.capacity());
        if u64::from(lba) + u64::from(count) > capacity {
            return Err(CheckCondition::illegal_request(asc::LBA_OUT_OF_RANGE));
        }
        Ok(())
    }

    /// Map a sector synthesis failure onto sense data
    fn sector_error(error: SectorError) -> CheckCondition {
        match error {
            SectorError::NoSector(_) => CheckCondition::illegal_request(asc::LBA_OUT_OF_RANGE),
            SectorError::IllegalField => CheckCondition::invalid_field(),
            SectorError::Parser(_) => CheckCondition::medium_error(),
        }
    }

    /// READ CAPACITY (25h)
    pub(super) fn cmd_read_capacity(&mut self, cmd: &mut Command) -> CmdResult {
        let disc = self.require_disc()?;
        log::trace!("device {}: READ CAPACITY", self.number);

        let mut data = [0u8; 8];
        data[0..4].copy_from_slice(&(disc.capacity().saturating_sub(1)).to_be_bytes());
        data[4..8].copy_from_slice(&2048u32.to_be_bytes());
        cmd.write(&data);
        Ok(())
    }

    /// READ(10) (28h) and READ(12) (A8h)
    pub(super) fn cmd_read(&mut self, cmd: &mut Command, twelve_byte: bool) -> CmdResult {
        let cdb = *cmd.cdb();
        let lba = be32(&cdb, 2);
        let count = if twelve_byte {
            be32(&cdb, 6)
        } else {
            u32::from(be16(&cdb, 7))
        };
        log::trace!(
            "device {}: READ({}) lba {lba}, {count} sector(s)",
            self.number,
            if twelve_byte { 12 } else { 10 }
        );

        let disc = self.require_disc()?;
        if count == 0 {
            return Ok(());
        }
        Self::check_range(&disc, lba, count)?;
        self.delay_begin(lba as i32, count);

        for i in 0..count {
            let sector = disc
                .sector_at(lba as i32 + i as i32)
                .map_err(Self::sector_error)?;

            // Only the 2048-byte data modes are readable through READ
            if !matches!(sector.mode(), SectorMode::Mode1 | SectorMode::Mode2Form1) {
                return Err(CheckCondition::illegal_request(
                    asc::ILLEGAL_MODE_FOR_THIS_TRACK,
                ));
            }
            cmd.write(sector.user_data());
        }
        Ok(())
    }

    /// READ CD (BEh)
    pub(super) fn cmd_read_cd(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let sector_type = (cdb[1] >> 2) & 0x07;
        let lba = be32(&cdb, 2);
        let count = be24(&cdb, 6);
        log::trace!(
            "device {}: READ CD lba {lba}, {count} sector(s), type {sector_type}, fields {:02X}h, sub {:02X}h",
            self.number,
            cdb[9],
            cdb[10]
        );

        let expected_mode = match sector_type {
            0 => None,
            1 => Some(SectorMode::Audio),
            2 => Some(SectorMode::Mode1),
            3 => Some(SectorMode::Mode2),
            4 => Some(SectorMode::Mode2Form1),
            5 => Some(SectorMode::Mode2Form2),
            _ => return Err(CheckCondition::invalid_field()),
        };

        let main = MainChannelSelection::from_bits_truncate(cdb[9]);
        let c2 = match (cdb[9] >> 1) & 0x03 {
            0 => C2Selection::None,
            1 => C2Selection::ErrorBits,
            2 => C2Selection::BlockErrorByte,
            _ => return Err(CheckCondition::invalid_field()),
        };
        let sub = match cdb[10] & 0x07 {
            0 => SubchannelSelection::None,
            1 => SubchannelSelection::RawPw,
            2 => SubchannelSelection::Q,
            _ => return Err(CheckCondition::invalid_field()),
        };

        let disc = self.require_disc()?;
        if count == 0 {
            return Ok(());
        }
        Self::check_range(&disc, lba, count)?;
        self.delay_begin(lba as i32, count);

        // Assemble into the device cache, then copy out in one go
        let mut payload = std::mem::take(&mut self.cache);
        payload.clear();
        let result = (|| {
            for i in 0..count {
                let sector = disc
                    .sector_at(lba as i32 + i as i32)
                    .map_err(Self::sector_error)?;

                // A non-zero sector type must match the track's data mode
                if let Some(expected) = expected_mode {
                    let matches_mode = sector.mode() == expected
                        || (expected == SectorMode::Mode2
                            && sector.mode() == SectorMode::Mode2Mixed);
                    if !matches_mode {
                        return Err(CheckCondition::illegal_request(
                            asc::ILLEGAL_MODE_FOR_THIS_TRACK,
                        ));
                    }
                }

                sector
                    .extract(main, c2, sub, &mut payload)
                    .map_err(Self::sector_error)?;
            }
            Ok(())
        })();

        if result.is_ok() {
            cmd.write(&payload);
        }
        self.cache = payload;
        result
    }

    /// READ SUBCHANNEL (42h)
    pub(super) fn cmd_read_subchannel(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let msf = cdb[1] & 0x02 != 0;
        let subq = cdb[2] & 0x40 != 0;
        let format = cdb[3];
        let track_number = cdb[6];
        let alloc = usize::from(be16(&cdb, 7));
        log::trace!(
            "device {}: READ SUBCHANNEL (format {format:02X}h, subq {subq}, alloc {alloc})",
            self.number
        );

        let audio_status = self.audio.status() as u8;
        let disc = self.require_disc()?;

        let mut data = vec![0u8; 4];
        data[1] = audio_status;

        if subq {
            match format {
                0x01 => {
                    // Current position: follow the playback point while
                    // audio is active, the last read otherwise
                    let position = match self.audio.status() {
                        crate::core::audio::AudioStatus::Playing
                        | crate::core::audio::AudioStatus::Paused => self.audio.current_lba(),
                        _ => self.current_address(),
                    };
                    let track = disc.track_of(position);

                    data.push(0x01);
                    data.push(track.map(|t| 0x10 | t.control()).unwrap_or(0));
                    data.push(track.map(|t| t.number).unwrap_or(0));
                    data.push(track.map(|t| t.index_at(position)).unwrap_or(0));
                    data.extend_from_slice(&encode_address(position, msf));
                    let relative = track.map(|t| position - t.start()).unwrap_or(0);
                    data.extend_from_slice(&encode_address(relative, msf));
                }
                0x02 => {
                    // Media catalog number: none encoded on our discs
                    data.push(0x02);
                    data.extend_from_slice(&[0u8; 3]);
                    data.extend_from_slice(&[0u8; 16]);
                }
                0x03 => {
                    let track = disc
                        .track_by_number(track_number)
                        .ok_or_else(CheckCondition::invalid_field)?;

                    data.push(0x03);
                    data.push(0x10 | track.control());
                    data.push(track.number);
                    data.push(0);
                    let mut isrc_field = [0u8; 16];
                    if let Some(isrc) = &track.isrc {
                        isrc_field[0] = 0x80; // TCVal
                        let bytes = isrc.as_bytes();
                        let len = bytes.len().min(12);
                        isrc_field[1..1 + len].copy_from_slice(&bytes[..len]);
                    }
                    data.extend_from_slice(&isrc_field);
                }
                _ => return Err(CheckCondition::invalid_field()),
            }
        }

        // Patch the data length (bytes after the 4-byte header)
        let body_len = (data.len() - 4) as u16;
        data[2..4].copy_from_slice(&body_len.to_be_bytes());

        cmd.write_clamped(&data, alloc);
        Ok(())
    }
}

/// Encode an address as MSF (00 M S F) or big-endian LBA
fn encode_address(lba: i32, msf: bool) -> [u8; 4] {
    if msf {
        let (m, s, f) = crate::core::disc::msf_of_lba(lba);
        [0, m, s, f]
    } else {
        lba.to_be_bytes()
    }
}
