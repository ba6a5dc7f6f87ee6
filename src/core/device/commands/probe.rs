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

//! Probe and status commands
//!
//! The commands a host uses to discover and monitor the drive:
//! INQUIRY, TEST UNIT READY, REQUEST SENSE, GET CONFIGURATION,
//! GET EVENT/STATUS NOTIFICATION and MECHANISM STATUS.

use super::{be16, CheckCondition, CmdResult, Command};
use crate::core::audio::AudioStatus;
use crate::core::device::{DeviceState, SenseData};

/// Standard INQUIRY response size
const INQUIRY_SIZE: usize = 96;

/// Copy a string into a fixed-width, space-padded field
fn padded(dest: &mut [u8], src: &str) {
    dest.fill(b' ');
    let bytes = src.as_bytes();
    let len = bytes.len().min(dest.len());
    dest[..len].copy_from_slice(&bytes[..len]);
}

impl DeviceState {
    /// TEST UNIT READY (00h)
    pub(super) fn cmd_test_unit_ready(&mut self, _cmd: &mut Command) -> CmdResult {
        log::trace!("device {}: TEST UNIT READY", self.number);
        if !self.loaded() {
            return Err(CheckCondition::not_ready());
        }
        Ok(())
    }

    /// REQUEST SENSE (03h)
    ///
    /// Returns the latched sense exactly once; a second call reports
    /// NO SENSE.
    pub(super) fn cmd_request_sense(&mut self, cmd: &mut Command) -> CmdResult {
        let alloc = usize::from(cmd.cdb()[4]);
        log::trace!("device {}: REQUEST SENSE (alloc {alloc})", self.number);

        let sense = self
            .take_sense()
            .unwrap_or_else(|| SenseData::new(super::sense_key::NO_SENSE, 0x0000));
        cmd.write_clamped(&sense.to_bytes(), alloc);
        Ok(())
    }

    /// INQUIRY (12h)
    pub(super) fn cmd_inquiry(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let evpd = cdb[1] & 0x01 != 0;
        let page = cdb[2];
        let alloc = usize::from(be16(&cdb, 3));
        log::trace!(
            "device {}: INQUIRY (evpd {evpd}, page {page:02X}h, alloc {alloc})",
            self.number
        );

        if cdb[1] & 0xFE != 0 {
            return Err(CheckCondition::invalid_field());
        }

        if evpd {
            return self.inquiry_vpd_page(cmd, page, alloc);
        }
        if page != 0 {
            // Page code without EVPD is reserved
            return Err(CheckCondition::invalid_field());
        }

        let mut data = [0u8; INQUIRY_SIZE];
        data[0] = 0x05; // peripheral qualifier 0, CD/DVD device
        data[1] = 0x80; // removable medium
        data[2] = 0x00; // no standard claimed
        data[3] = 0x02; // response data format 2
        data[4] = (INQUIRY_SIZE - 5) as u8;
        padded(&mut data[8..16], &self.id_vendor);
        padded(&mut data[16..32], &self.id_product);
        padded(&mut data[32..36], &self.id_revision);
        padded(&mut data[36..56], &self.id_vendor_specific);

        cmd.write_clamped(&data, alloc);
        Ok(())
    }

    /// EVPD pages 00h (list), 80h (serial number), 83h (device id)
    fn inquiry_vpd_page(&mut self, cmd: &mut Command, page: u8, alloc: usize) -> CmdResult {
        let serial = format!("VD{:010}", self.number);

        let data: Vec<u8> = match page {
            0x00 => vec![0x05, 0x00, 0x00, 0x03, 0x00, 0x80, 0x83],
            0x80 => {
                let mut data = vec![0x05, 0x80, 0x00, serial.len() as u8];
                data.extend_from_slice(serial.as_bytes());
                data
            }
            0x83 => {
                // One T10 vendor-id designator: vendor, product, serial
                let mut ident = Vec::new();
                let mut vendor = [0u8; 8];
                padded(&mut vendor, &self.id_vendor);
                ident.extend_from_slice(&vendor);
                let mut product = [0u8; 16];
                padded(&mut product, &self.id_product);
                ident.extend_from_slice(&product);
                ident.extend_from_slice(serial.as_bytes());

                let mut data = vec![0x05, 0x83, 0x00, (ident.len() + 4) as u8];
                data.extend_from_slice(&[0x02, 0x01, 0x00, ident.len() as u8]);
                data.extend_from_slice(&ident);
                data
            }
            _ => return Err(CheckCondition::invalid_field()),
        };

        cmd.write_clamped(&data, alloc);
        Ok(())
    }

    /// GET CONFIGURATION (46h)
    pub(super) fn cmd_get_configuration(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let rt = cdb[1] & 0x03;
        let start = be16(&cdb, 2);
        let alloc = usize::from(be16(&cdb, 7));
        log::trace!(
            "device {}: GET CONFIGURATION (rt {rt}, start {start:04X}h, alloc {alloc})",
            self.number
        );

        if rt == 3 {
            return Err(CheckCondition::invalid_field());
        }

        let mut body = Vec::new();
        for feature in self.features.descriptors(start, rt) {
            body.extend_from_slice(&feature.to_bytes());
        }

        let mut header = [0u8; 8];
        // Data length counts everything after the length field itself
        header[0..4].copy_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        header[6..8].copy_from_slice(&(self.features.profile() as u16).to_be_bytes());

        cmd.write_clamped(&header, alloc);
        cmd.write_clamped(&body, alloc);
        Ok(())
    }

    /// GET EVENT/STATUS NOTIFICATION (4Ah)
    pub(super) fn cmd_get_event_status(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let polled = cdb[1] & 0x01 != 0;
        let class_request = cdb[4];
        let alloc = usize::from(be16(&cdb, 7));
        log::trace!(
            "device {}: GET EVENT/STATUS (classes {class_request:02X}h, alloc {alloc})",
            self.number
        );

        // Asynchronous operation is not supported
        if !polled {
            return Err(CheckCondition::invalid_field());
        }

        // Only the media class (bit 4) is implemented
        if class_request & 0x10 == 0 {
            let header = [0x00, 0x02, 0x80, 0x10]; // NEA, no class
            cmd.write_clamped(&header, alloc);
            return Ok(());
        }

        let event_code = self.take_media_event().unwrap_or(0x00);
        let media_status = if self.loaded() { 0x02 } else { 0x00 };

        let mut data = [0u8; 8];
        data[0..2].copy_from_slice(&6u16.to_be_bytes());
        data[2] = 0x04; // media class
        data[3] = 0x10; // supported classes: media
        data[4] = event_code;
        data[5] = media_status;

        cmd.write_clamped(&data, alloc);
        Ok(())
    }

    /// MECHANISM STATUS (BDh)
    pub(super) fn cmd_mechanism_status(&mut self, cmd: &mut Command) -> CmdResult {
        let cdb = *cmd.cdb();
        let alloc = usize::from(be16(&cdb, 8));
        log::trace!("device {}: MECHANISM STATUS (alloc {alloc})", self.number);

        let mut data = [0u8; 8];
        // Non-changer: fault 0, changer state 0, slot 0
        if self.audio.status() == AudioStatus::Playing {
            data[1] |= 0x20; // mechanism state: playing
        }
        let lba = self.current_address().max(0) as u32;
        data[2..5].copy_from_slice(&lba.to_be_bytes()[1..4]);

        cmd.write_clamped(&data, alloc);
        Ok(())
    }
}
