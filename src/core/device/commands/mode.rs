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

//! MODE SENSE and MODE SELECT
//!
//! Both come in 6- and 10-byte flavors that differ only in header
//! layout and field widths; one handler serves each pair. Pages are
//! reported in ascending code order, block descriptors are never
//! used, and the medium type byte follows the loaded medium (00h for
//! CD, 01h for DVD).

use super::{asc, be16, CheckCondition, CmdResult, Command};
use crate::core::device::mode_pages::PageVariant;
use crate::core::device::DeviceState;
use crate::core::disc::MediumType;

/// Page code requesting every page
const ALL_PAGES: u8 = 0x3F;

impl DeviceState {
    /// MODE SENSE (1Ah / 5Ah)
    pub(super) fn cmd_mode_sense(&mut self, cmd: &mut Command, ten_byte: bool) -> CmdResult {
        let cdb = *cmd.cdb();
        let pc = cdb[2] >> 6;
        let page_code = cdb[2] & 0x3F;
        let alloc = if ten_byte {
            usize::from(be16(&cdb, 7))
        } else {
            usize::from(cdb[4])
        };
        log::trace!(
            "device {}: MODE SENSE({}) (pc {pc}, page {page_code:02X}h, alloc {alloc})",
            self.number,
            if ten_byte { 10 } else { 6 }
        );

        // Saved values are not implemented; MMC allows reporting them
        // as current
        let variant = match pc {
            0 | 3 => PageVariant::Current,
            1 => PageVariant::Changeable,
            _ => PageVariant::Default,
        };

        let mut body = Vec::new();
        let mut found = false;
        for page in self.mode_pages.iter() {
            if page_code == ALL_PAGES || page.code == page_code {
                // The changeable-values page keeps its code and length
                // header; only the body bytes are the bit mask
                if variant == PageVariant::Changeable {
                    body.extend_from_slice(&page.bytes(PageVariant::Default)[..2]);
                    body.extend_from_slice(&page.bytes(variant)[2..]);
                } else {
                    body.extend_from_slice(page.bytes(variant));
                }
                found = true;
            }
        }
        if !found {
            return Err(CheckCondition::invalid_field());
        }

        let medium_type = match self.disc().map(|d| d.medium) {
            Some(MediumType::Dvd) | Some(MediumType::Bd) => 0x01,
            _ => 0x00,
        };

        // Header: mode data length excludes the length field itself;
        // write-protect off, no block descriptors
        if ten_byte {
            let mut header = [0u8; 8];
            header[0..2].copy_from_slice(&((body.len() + 6) as u16).to_be_bytes());
            header[2] = medium_type;
            cmd.write_clamped(&header, alloc);
        } else {
            let header = [(body.len() + 3) as u8, medium_type, 0x00, 0x00];
            cmd.write_clamped(&header, alloc);
        }
        cmd.write_clamped(&body, alloc);
        Ok(())
    }

    /// MODE SELECT (15h / 55h)
    pub(super) fn cmd_mode_select(&mut self, cmd: &mut Command, ten_byte: bool) -> CmdResult {
        let cdb = *cmd.cdb();
        let pf = cdb[1] & 0x10 != 0;
        let list_len = if ten_byte {
            usize::from(be16(&cdb, 7))
        } else {
            usize::from(cdb[4])
        };
        log::trace!(
            "device {}: MODE SELECT({}) ({list_len} bytes)",
            self.number,
            if ten_byte { 10 } else { 6 }
        );

        // Only the page format is supported
        if !pf {
            return Err(CheckCondition::invalid_field());
        }

        let data = cmd.input();
        if data.len() < list_len {
            return Err(CheckCondition::illegal_request(
                asc::INVALID_FIELD_IN_PARAMETER_LIST,
            ));
        }
        let data = &data[..list_len];

        let header_len = if ten_byte { 8 } else { 4 };
        if data.len() < header_len {
            return Err(CheckCondition::illegal_request(
                asc::INVALID_FIELD_IN_PARAMETER_LIST,
            ));
        }

        // Block descriptors are not supported
        let bd_len = if ten_byte {
            usize::from(u16::from_be_bytes([data[6], data[7]]))
        } else {
            usize::from(data[3])
        };
        if bd_len != 0 {
            return Err(CheckCondition::illegal_request(
                asc::INVALID_FIELD_IN_PARAMETER_LIST,
            ));
        }

        let mut rest = &data[header_len..];
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(CheckCondition::illegal_request(
                    asc::INVALID_FIELD_IN_PARAMETER_LIST,
                ));
            }

            let code = rest[0] & 0x3F;
            let page_len = usize::from(rest[1]) + 2;
            if rest.len() < page_len {
                return Err(CheckCondition::illegal_request(
                    asc::INVALID_FIELD_IN_PARAMETER_LIST,
                ));
            }

            let page = self.mode_pages.get_mut(code).ok_or_else(|| {
                CheckCondition::illegal_request(asc::INVALID_FIELD_IN_PARAMETER_LIST)
            })?;
            if !page.apply(&rest[..page_len]) {
                log::debug!("device {}: MODE SELECT rejected for page {code:02X}h", self.number);
                return Err(CheckCondition::illegal_request(
                    asc::INVALID_FIELD_IN_PARAMETER_LIST,
                ));
            }
            log::debug!("device {}: mode page {code:02X}h updated", self.number);

            rest = &rest[page_len..];
        }

        Ok(())
    }
}
