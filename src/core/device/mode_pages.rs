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

//! Mode page store
//!
//! Each page keeps three parallel byte buffers: the current values,
//! the power-on defaults, and a mask of changeable bits. MODE SENSE
//! serves current, changeable or default values by the PC field;
//! MODE SELECT merges the proposed bytes through the mask and runs the
//! page validator. All pages are flat big-endian byte buffers; bit
//! fields are accessed with plain masks, never through packed structs.
//!
//! Byte 0 of every stored page is the page code, byte 1 the page
//! length (bytes after byte 1), matching the wire format exactly.

use std::collections::BTreeMap;

/// Which of the three page variants to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVariant {
    /// Live values
    Current,
    /// Power-on values
    Default,
    /// Changeable-bit mask
    Changeable,
}

/// Validates a proposed page image before MODE SELECT commits it
type Validator = fn(&[u8]) -> bool;

/// One mode page: current/default/mask plus an optional validator
pub struct ModePage {
    /// Page code (byte 0 of the stored image)
    pub code: u8,
    current: Vec<u8>,
    default: Vec<u8>,
    mask: Vec<u8>,
    validator: Option<Validator>,
}

impl ModePage {
    fn new(code: u8, default: Vec<u8>, mask: Vec<u8>, validator: Option<Validator>) -> Self {
        debug_assert_eq!(default.len(), mask.len());
        debug_assert_eq!(default[0] & 0x3F, code);
        debug_assert_eq!(default[1] as usize, default.len() - 2);
        Self {
            code,
            current: default.clone(),
            default,
            mask,
            validator,
        }
    }

    /// Page size in bytes (header included)
    pub fn size(&self) -> usize {
        self.default.len()
    }

    /// One of the three page images
    pub fn bytes(&self, variant: PageVariant) -> &[u8] {
        match variant {
            PageVariant::Current => &self.current,
            PageVariant::Default => &self.default,
            PageVariant::Changeable => &self.mask,
        }
    }

    /// Mutable access to the current image (internal updates such as
    /// SET CD SPEED bypass the changeable mask)
    pub fn current_mut(&mut self) -> &mut [u8] {
        &mut self.current
    }

    /// Apply a MODE SELECT image to the current values
    ///
    /// The proposal must match the stored page in code and length,
    /// must not change any bit outside the mask, and must pass the
    /// validator. Returns `false` on any violation.
    pub fn apply(&mut self, proposed: &[u8]) -> bool {
        if proposed.len() != self.size() {
            return false;
        }
        if proposed[0] & 0x3F != self.code || proposed[1] != self.default[1] {
            return false;
        }

        // Bits outside the mask must be proposed unchanged
        for ((&new, &cur), &mask) in proposed
            .iter()
            .zip(self.current.iter())
            .zip(self.mask.iter())
            .skip(2)
        {
            if (new & !mask) != (cur & !mask) {
                return false;
            }
        }

        let mut merged = self.current.clone();
        for ((slot, &new), &mask) in merged.iter_mut().zip(proposed.iter()).zip(self.mask.iter())
        {
            *slot = (*slot & !mask) | (new & mask);
        }

        if let Some(validate) = self.validator {
            if !validate(&merged) {
                return false;
            }
        }

        self.current = merged;
        true
    }
}

/// All mode pages of one device, keyed and iterated by page code
pub struct ModePageStore {
    pages: BTreeMap<u8, ModePage>,
}

impl ModePageStore {
    /// Build the page set of an emulated CD/DVD-ROM drive
    pub fn new() -> Self {
        let mut pages = BTreeMap::new();
        let mut add = |page: ModePage| {
            pages.insert(page.code, page);
        };

        // 0x01 Read/Write Error Recovery: read retry count is the only
        // field the host may change besides the recovery bits
        add(ModePage::new(
            0x01,
            vec![0x01, 0x0A, 0x00, 0x01, 0, 0, 0, 0, 0x00, 0x00, 0x00, 0x00],
            vec![0x00, 0x00, 0x07, 0xFF, 0, 0, 0, 0, 0x00, 0x00, 0x00, 0x00],
            None,
        ));

        // 0x0D CD Device Parameters: seconds per minute and frames per
        // second are fixed by the format
        add(ModePage::new(
            0x0D,
            vec![0x0D, 0x06, 0x00, 0x00, 0x00, 0x3C, 0x00, 0x4B],
            vec![0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x00],
            None,
        ));

        // 0x0E CD Audio Control: ports 0/1 routed to channels 1/2 at
        // full volume
        add(ModePage::new(
            0x0E,
            vec![
                0x0E, 0x0E, 0x04, 0x00, 0, 0, 0, 0, 0x01, 0xFF, 0x02, 0xFF, 0x00, 0x00, 0x00,
                0x00,
            ],
            vec![
                0x00, 0x00, 0x06, 0x00, 0, 0, 0, 0, 0x0F, 0xFF, 0x0F, 0xFF, 0x00, 0x00, 0x00,
                0x00,
            ],
            Some(validate_audio_control),
        ));

        // 0x1A Power Condition
        add(ModePage::new(
            0x1A,
            vec![0x1A, 0x0A, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0],
            vec![
                0x00, 0x00, 0x00, 0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            ],
            None,
        ));

        // 0x2A CD/DVD Capabilities and Mechanical Status: read-only
        // for the host; SET CD SPEED updates the speed fields
        // internally
        add(ModePage::new(
            0x2A,
            vec![
                0x2A, 0x1E, // code, length
                0x3F, // reads CD-R/RW, method 2, DVD-ROM/R/RAM
                0x00, // writes nothing
                0x71, // audio play, multisession, mode 2 form 1 and 2
                0x67, // CD-DA commands and accurate streaming, R-W, ISRC, UPC
                0x29, // tray loader, eject, lock
                0x03, // separate volume and mute
                0x1B, 0x90, // max read speed 7056 kB/s (40x)
                0x01, 0x00, // 256 volume levels
                0x02, 0x00, // 512 kB buffer
                0x1B, 0x90, // current read speed
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00,
            ],
            vec![0x00; 32],
            None,
        ));

        Self { pages }
    }

    /// Page by code
    pub fn get(&self, code: u8) -> Option<&ModePage> {
        self.pages.get(&code)
    }

    /// Mutable page by code
    pub fn get_mut(&mut self, code: u8) -> Option<&mut ModePage> {
        self.pages.get_mut(&code)
    }

    /// All pages in ascending code order
    pub fn iter(&self) -> impl Iterator<Item = &ModePage> {
        self.pages.values()
    }
}

impl Default for ModePageStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio control page: output port channel selections must be one of
/// the defined routing values
fn validate_audio_control(page: &[u8]) -> bool {
    [page[8] & 0x0F, page[10] & 0x0F]
        .into_iter()
        .all(|sel| matches!(sel, 0 | 1 | 2 | 4 | 8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_has_all_pages() {
        let store = ModePageStore::new();
        let codes: Vec<u8> = store.iter().map(|p| p.code).collect();
        assert_eq!(codes, vec![0x01, 0x0D, 0x0E, 0x1A, 0x2A]);
    }

    #[test]
    fn test_page_sizes_match_mmc() {
        let store = ModePageStore::new();
        assert_eq!(store.get(0x01).unwrap().size(), 12);
        assert_eq!(store.get(0x0D).unwrap().size(), 8);
        assert_eq!(store.get(0x0E).unwrap().size(), 16);
        assert_eq!(store.get(0x1A).unwrap().size(), 12);
        assert_eq!(store.get(0x2A).unwrap().size(), 32);
    }

    #[test]
    fn test_apply_respects_mask() {
        let mut store = ModePageStore::new();
        let page = store.get_mut(0x01).unwrap();

        // Change the read retry count, a masked field
        let mut proposed = page.bytes(PageVariant::Current).to_vec();
        proposed[3] = 0x05;
        assert!(page.apply(&proposed));
        assert_eq!(page.bytes(PageVariant::Current)[3], 0x05);
    }

    #[test]
    fn test_apply_rejects_unchangeable_bits() {
        let mut store = ModePageStore::new();
        let page = store.get_mut(0x0D).unwrap();

        // Frames per second is not changeable
        let mut proposed = page.bytes(PageVariant::Current).to_vec();
        proposed[7] = 0x50;
        assert!(!page.apply(&proposed));
        assert_eq!(page.bytes(PageVariant::Current)[7], 0x4B);
    }

    #[test]
    fn test_apply_rejects_wrong_length() {
        let mut store = ModePageStore::new();
        let page = store.get_mut(0x01).unwrap();

        let mut proposed = page.bytes(PageVariant::Current).to_vec();
        proposed[1] = 0x08;
        proposed.truncate(10);
        assert!(!page.apply(&proposed));
    }

    #[test]
    fn test_validator_rejects_bad_routing() {
        let mut store = ModePageStore::new();
        let page = store.get_mut(0x0E).unwrap();

        let mut proposed = page.bytes(PageVariant::Current).to_vec();
        proposed[8] = 0x03; // not a defined routing value
        assert!(!page.apply(&proposed));
    }

    #[test]
    fn test_select_then_sense_roundtrip() {
        let mut store = ModePageStore::new();
        let page = store.get_mut(0x0E).unwrap();

        let old = page.bytes(PageVariant::Current).to_vec();
        let mask = page.bytes(PageVariant::Changeable).to_vec();
        let mut written = old.clone();
        written[9] = 0x20; // port 0 volume
        written[11] = 0x40; // port 1 volume
        assert!(page.apply(&written));

        let sensed = page.bytes(PageVariant::Current);
        for i in 2..old.len() {
            assert_eq!(sensed[i], (old[i] & !mask[i]) | (written[i] & mask[i]));
        }
    }

    #[test]
    fn test_defaults_survive_select() {
        let mut store = ModePageStore::new();
        let page = store.get_mut(0x01).unwrap();

        let mut proposed = page.bytes(PageVariant::Current).to_vec();
        proposed[3] = 0x20;
        assert!(page.apply(&proposed));
        assert_eq!(page.bytes(PageVariant::Default)[3], 0x01);
    }
}
