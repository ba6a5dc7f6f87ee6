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

//! Drive control commands
//!
//! START STOP UNIT (including eject and host-side reload),
//! PREVENT ALLOW MEDIUM REMOVAL, SET CD SPEED, and the CSS handshake
//! pair REPORT KEY / SEND KEY. The handshake returns a fixed agreement
//! that satisfies a CSS capability probe without carrying real keys.

use super::{asc, be16, CheckCondition, CmdResult, Command};
use crate::core::device::DeviceState;

impl DeviceState {
    /// START STOP UNIT (1Bh)
    pub(super) fn cmd_start_stop_unit(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let start = cdb[4] & 0x01 != 0;
        let loej = cdb[4] & 0x02 != 0;
        let power_condition = cdb[4] >> 4;
        log::trace!(
            "device {}: START STOP UNIT (start {start}, loej {loej}, power {power_condition})",
            self.number
        );

        // A power condition field overrides start/loej entirely; the
        // state is tracked in mode page 0x1A
        if power_condition != 0 {
            if power_condition > 0x03 {
                return Err(CheckCondition::invalid_field());
            }
            let page = self.mode_pages.get_mut(0x1A).expect("page 0x1A exists");
            page.current_mut()[3] = match power_condition {
                0x02 => 0x02, // idle
                0x03 => 0x01, // standby
                _ => 0x00,    // active
            };
            log::debug!("device {}: power condition {power_condition}", self.number);
            return Ok(());
        }

        if loej {
            if !start {
                // Eject; the disc stays queued for a later reload
                if self.loaded() && self.locked() {
                    return Err(CheckCondition::illegal_request(
                        asc::MEDIUM_REMOVAL_PREVENTED,
                    ));
                }
                self.remove_disc(false, true)
                    .map_err(|_| CheckCondition::illegal_request(asc::MEDIUM_REMOVAL_PREVENTED))?;
            } else if !self.loaded() {
                // Load whatever an earlier eject left queued
                if self.has_queued_disc() {
                    self.reload_queued_disc().map_err(|_| {
                        CheckCondition::new(super::sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT)
                    })?;
                } else {
                    return Err(CheckCondition::new(
                        super::sense_key::NOT_READY,
                        asc::MEDIUM_NOT_PRESENT,
                    ));
                }
            }
        }

        Ok(())
    }

    /// PREVENT ALLOW MEDIUM REMOVAL (1Eh)
    pub(super) fn cmd_prevent_allow(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        if cdb[4] & 0xFC != 0 {
            return Err(CheckCondition::invalid_field());
        }

        // Persistent prevent (bit 1) is treated like the plain one
        let prevent = cdb[4] & 0x03 != 0;
        self.set_locked(prevent);
        Ok(())
    }

    /// SET CD SPEED (BBh)
    pub(super) fn cmd_set_cd_speed(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let read_speed = be16(&cdb, 2);
        log::trace!("device {}: SET CD SPEED ({read_speed} kB/s)", self.number);

        if read_speed == 0 {
            return Err(CheckCondition::invalid_field());
        }

        // 0xFFFF selects the drive maximum
        let page = self.mode_pages.get_mut(0x2A).expect("page 0x2A exists");
        let max_speed = u16::from_be_bytes([
            page.bytes(super::super::PageVariant::Current)[8],
            page.bytes(super::super::PageVariant::Current)[9],
        ]);
        let effective = if read_speed == 0xFFFF {
            max_speed
        } else {
            read_speed.min(max_speed)
        };

        let current = page.current_mut();
        current[14..16].copy_from_slice(&effective.to_be_bytes());
        log::debug!("device {}: read speed set to {effective} kB/s", self.number);
        Ok(())
    }

    /// REPORT KEY (A4h)
    pub(super) fn cmd_report_key(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let key_format = cdb[10] & 0x3F;
        let agid = cdb[10] >> 6;
        let alloc = usize::from(be16(&cdb, 8));
        log::trace!(
            "device {}: REPORT KEY (format {key_format:02X}h, agid {agid}, alloc {alloc})",
            self.number
        );

        let data: Vec<u8> = match key_format {
            0x00 => {
                // Grant AGID 0; that is all a capability probe needs
                let mut data = vec![0u8; 8];
                data[0..2].copy_from_slice(&6u16.to_be_bytes());
                data[7] = 0x00; // AGID 0 in the top bits
                data
            }
            0x08 => {
                // RPC state: no region scheme enforced
                let mut data = vec![0u8; 8];
                data[0..2].copy_from_slice(&6u16.to_be_bytes());
                data[4] = 0x00; // type code: none, vendor resets available
                data[5] = 0xFF; // region mask: no region restricted
                data[6] = 0x00; // RPC scheme: none
                data
            }
            _ => return Err(CheckCondition::invalid_field()),
        };

        cmd.write_clamped(&data, alloc);
        Ok(())
    }

    /// SEND KEY (A3h)
    pub(super) fn cmd_send_key(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let key_format = cdb[10] & 0x3F;
        log::trace!("device {}: SEND KEY (format {key_format:02X}h)", self.number);

        // Accept challenge material and AGID invalidation without
        // examining the payload; the emulated handshake always agrees
        match key_format {
            0x01 | 0x03 | 0x06 | 0x3F => Ok(()),
            _ => Err(CheckCondition::invalid_field()),
        }
    }
}
