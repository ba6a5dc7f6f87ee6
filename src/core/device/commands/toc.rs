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

//! Layout query commands
//!
//! READ TOC/PMA/ATIP (formats 0, 1, 2 and 4), READ DISC INFORMATION,
//! READ TRACK INFORMATION and READ DVD STRUCTURE. Disc and track
//! information answer from the loaded disc, or from the recording
//! state when a cue sheet armed a blank medium.

use super::{asc, be16, be32, CheckCondition, CmdResult, Command};
use crate::core::device::DeviceState;
use crate::core::disc::{msf_of_lba, MediumType, SectorMode};

/// Encode an address as MSF (00 M S F) or big-endian LBA
fn encode_address(lba: i32, msf: bool) -> [u8; 4] {
    if msf {
        let (m, s, f) = msf_of_lba(lba);
        [0, m, s, f]
    } else {
        lba.to_be_bytes()
    }
}

impl DeviceState {
    /// READ TOC/PMA/ATIP (43h)
    pub(super) fn cmd_read_toc(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let msf = cdb[1] & 0x02 != 0;
        let format = cdb[2] & 0x0F;
        let number = cdb[6];
        let alloc = usize::from(be16(&cdb, 7));
        log::trace!(
            "device {}: READ TOC (format {format}, msf {msf}, number {number}, alloc {alloc})",
            self.number
        );

        let disc = self.require_disc()?;

        let data = match format {
            0 => {
                let toc = disc.toc();
                if number != 0 && number != 0xAA && number > toc.last_track {
                    return Err(CheckCondition::invalid_field());
                }

                let mut body = Vec::new();
                if number != 0xAA {
                    for entry in toc.entries.iter().filter(|e| e.track >= number) {
                        body.push(0);
                        body.push(entry.adr_control);
                        body.push(entry.track);
                        body.push(0);
                        body.extend_from_slice(&encode_address(entry.start, msf));
                    }
                }
                // Lead-out pseudo-track closes the list
                body.push(0);
                body.push(0x14);
                body.push(0xAA);
                body.push(0);
                body.extend_from_slice(&encode_address(toc.leadout, msf));

                let mut data = Vec::with_capacity(4 + body.len());
                data.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
                data.push(toc.first_track);
                data.push(toc.last_track);
                data.extend_from_slice(&body);
                data
            }
            1 => {
                // Session info: first track of the last session
                let last = disc.sessions.last().expect("disc has sessions");
                let first_track = &last.tracks[0];

                let mut data = Vec::with_capacity(12);
                data.extend_from_slice(&10u16.to_be_bytes());
                data.push(disc.sessions[0].number);
                data.push(last.number);
                data.push(0);
                data.push(0x10 | first_track.control());
                data.push(first_track.number);
                data.push(0);
                data.extend_from_slice(&encode_address(first_track.start(), msf));
                data
            }
            2 => {
                if disc.medium != MediumType::Cd {
                    return Err(CheckCondition::illegal_request(asc::CANNOT_READ_MEDIUM));
                }
                self.full_toc(&disc)
            }
            4 => {
                if disc.medium != MediumType::Cd {
                    return Err(CheckCondition::illegal_request(asc::CANNOT_READ_MEDIUM));
                }

                // ATIP stub: lead-in start and last possible lead-out
                let mut data = vec![0u8; 28];
                data[0..2].copy_from_slice(&26u16.to_be_bytes());
                data[8] = 97;
                data[9] = 15;
                data[10] = 5;
                data[12] = 74;
                data[13] = 30;
                data[14] = 0;
                data
            }
            _ => return Err(CheckCondition::invalid_field()),
        };

        cmd.write_clamped(&data, alloc);
        Ok(())
    }

    /// Format 2: full TOC with A0/A1/A2 points per session
    fn full_toc(&self, disc: &crate::core::disc::Disc) -> Vec<u8> {
        fn point_at(session: u8, adr_ctl: u8, point: u8, address: i32) -> [u8; 11] {
            let (m, s, f) = msf_of_lba(address);
            [session, adr_ctl, 0, point, 0, 0, 0, 0, m, s, f]
        }

        let mut body = Vec::new();
        for session in &disc.sessions {
            let first = &session.tracks[0];
            let last_track = session.tracks.last().expect("session has tracks");
            let ctl = 0x10 | last_track.control();

            // A0: first track number, disc type in PSEC
            body.extend_from_slice(&[
                session.number,
                0x10 | first.control(),
                0,
                0xA0,
                0,
                0,
                0,
                0,
                session.first_track_number,
                session.session_type as u8,
                0,
            ]);
            // A1: last track number
            body.extend_from_slice(&[
                session.number,
                ctl,
                0,
                0xA1,
                0,
                0,
                0,
                0,
                session.last_track_number(),
                0,
                0,
            ]);
            // A2: lead-out start
            body.extend_from_slice(&point_at(session.number, ctl, 0xA2, session.leadout_start()));

            for track in &session.tracks {
                body.extend_from_slice(&point_at(
                    session.number,
                    0x10 | track.control(),
                    track.number,
                    track.start(),
                ));
            }
        }

        let first_session = disc.sessions[0].number;
        let last_session = disc.sessions.last().expect("disc has sessions").number;

        let mut data = Vec::with_capacity(4 + body.len());
        data.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
        data.push(first_session);
        data.push(last_session);
        data.extend_from_slice(&body);
        data
    }

    /// READ DISC INFORMATION (51h)
    pub(super) fn cmd_read_disc_information(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let alloc = usize::from(be16(&cdb, 7));
        log::trace!("device {}: READ DISC INFORMATION (alloc {alloc})", self.number);

        let mut data = vec![0u8; 34];
        data[0..2].copy_from_slice(&32u16.to_be_bytes());
        data[7] = 0x20; // unrestricted use disc

        if let Some(disc) = self.disc().cloned() {
            let last = disc.sessions.last().expect("disc has sessions");

            data[2] = 0x0E; // last session complete, disc finalized
            data[3] = 1;
            data[4] = disc.sessions.len() as u8;
            data[5] = last.first_track_number;
            data[6] = last.last_track_number();
            data[8] = disc.sessions[0].session_type as u8;
            // Last possible lead-out start
            let (m, s, f) = msf_of_lba(last.leadout_start());
            data[20] = 0;
            data[21] = m;
            data[22] = s;
            data[23] = f;
        } else if self.recording.armed() {
            // Blank medium armed by a cue sheet
            let closed = self.recording.session_closed();
            data[2] = if closed { 0x0E } else { 0x05 };
            data[3] = 1;
            data[4] = 1;
            data[5] = self
                .recording
                .tracks()
                .first()
                .map(|t| t.number)
                .unwrap_or(1);
            data[6] = self
                .recording
                .tracks()
                .last()
                .map(|t| t.number)
                .unwrap_or(1);
        } else {
            return Err(CheckCondition::not_ready());
        }

        cmd.write_clamped(&data, alloc);
        Ok(())
    }

    /// READ TRACK INFORMATION (52h)
    pub(super) fn cmd_read_track_information(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let address_type = cdb[1] & 0x03;
        let number = be32(&cdb, 2);
        let alloc = usize::from(be16(&cdb, 7));
        log::trace!(
            "device {}: READ TRACK INFORMATION (type {address_type}, number {number}, alloc {alloc})",
            self.number
        );

        let mut data = vec![0u8; 36];
        data[0..2].copy_from_slice(&34u16.to_be_bytes());

        if let Some(disc) = self.disc().cloned() {
            let track = match address_type {
                0 => disc.track_of(number as i32),
                1 => disc.track_by_number(number as u8),
                2 => disc
                    .sessions
                    .iter()
                    .find(|s| u32::from(s.number) == number)
                    .map(|s| &s.tracks[0]),
                _ => return Err(CheckCondition::invalid_field()),
            }
            .ok_or_else(CheckCondition::invalid_field)?;

            let session = disc
                .session_of(track.start())
                .map(|s| s.number)
                .unwrap_or(1);

            data[2] = track.number;
            data[3] = session;
            data[5] = track.control();
            data[6] = match track.mode {
                SectorMode::Audio => 0x00,
                SectorMode::Mode1 => 0x01,
                _ => 0x02,
            };
            data[8..12].copy_from_slice(&track.start().to_be_bytes());
            data[24..28].copy_from_slice(&track.length().to_be_bytes());
        } else if self.recording.armed() {
            let track = match address_type {
                1 => self.recording.track(number as u8),
                _ => self.recording.tracks().first(),
            }
            .ok_or_else(CheckCondition::invalid_field)?;

            data[2] = track.number;
            data[3] = 1;
            data[5] = (track.ctl_adr >> 4) & 0x0F;
            data[6] = 0x40 | 0x01; // blank track, data mode 1
            data[7] = 0x01; // next writable address valid
            data[8..12].copy_from_slice(&track.start.to_be_bytes());
            data[12..16].copy_from_slice(
                &self.recording.next_writable_address().to_be_bytes(),
            );
        } else {
            return Err(CheckCondition::not_ready());
        }

        cmd.write_clamped(&data, alloc);
        Ok(())
    }

    /// READ DVD STRUCTURE (ADh)
    pub(super) fn cmd_read_dvd_structure(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let format = cdb[7];
        let alloc = usize::from(be16(&cdb, 8));
        log::trace!(
            "device {}: READ DVD STRUCTURE (format {format:02X}h, alloc {alloc})",
            self.number
        );

        // The structure list carries no media-dependent data
        if format == 0xFF {
            let mut data = Vec::new();
            data.extend_from_slice(&[0, 0, 0, 0]);
            for (code, len) in [(0x00u8, 2052u16), (0x01, 8), (0x04, 2052), (0xFF, 0)] {
                data.push(code);
                data.push(0x40); // readable
                data.extend_from_slice(&len.to_be_bytes());
            }
            let body = (data.len() - 2) as u16;
            data[0..2].copy_from_slice(&body.to_be_bytes());
            cmd.write_clamped(&data, alloc);
            return Ok(());
        }

        let disc = self.require_disc()?;
        if disc.medium != MediumType::Dvd {
            return Err(CheckCondition::illegal_request(asc::CANNOT_READ_MEDIUM));
        }

        let data = match format {
            0x00 => {
                // Physical format: single-layer DVD-ROM
                let mut data = vec![0u8; 4 + 2048];
                data[0..2].copy_from_slice(&2050u16.to_be_bytes());
                data[4] = 0x01; // book type DVD-ROM, part version 1
                data[5] = 0x0F; // 120 mm, maximum rate not specified
                data[6] = 0x01; // one layer, embossed
                data[7] = 0x10; // density
                let start_psn = 0x0003_0000u32;
                let end_psn = start_psn + disc.capacity();
                data[8..12].copy_from_slice(&start_psn.to_be_bytes());
                data[12..16].copy_from_slice(&end_psn.to_be_bytes());
                data
            }
            0x01 => {
                // Copyright: CSS present, all regions allowed
                let mut data = vec![0u8; 8];
                data[0..2].copy_from_slice(&6u16.to_be_bytes());
                data[4] = 0x01; // CSS/CPPM
                data[5] = 0x00; // region mask
                data
            }
            0x04 => {
                // Manufacturing information: zeros
                let mut data = vec![0u8; 4 + 2048];
                data[0..2].copy_from_slice(&2050u16.to_be_bytes());
                data
            }
            _ => return Err(CheckCondition::invalid_field()),
        };

        cmd.write_clamped(&data, alloc);
        Ok(())
    }
}
