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

//! Feature and profile table
//!
//! GET CONFIGURATION reports the drive's capabilities as a list of
//! feature descriptors. Every feature carries a persistent bit and a
//! current bit: persistent features are always current, the rest
//! become current only when the active profile includes them. A
//! profile change clears all non-persistent current bits and sets the
//! ones belonging to the new profile.

use std::collections::BTreeMap;

/// MMC profile numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Profile {
    /// No medium present
    None = 0x0000,
    /// CD-ROM medium
    CdRom = 0x0008,
    /// DVD-ROM medium
    DvdRom = 0x0010,
}

/// Features current under the CD-ROM profile
const CDROM_FEATURES: &[u16] = &[
    0x0010, // Random Readable
    0x001D, // Multi-read
    0x001E, // CD Read
    0x0103, // CD External Audio Play
    0x0107, // Real Time Streaming
];

/// Features current under the DVD-ROM profile
const DVDROM_FEATURES: &[u16] = &[
    0x0010, // Random Readable
    0x001F, // DVD Read
    0x0106, // DVD CSS
    0x0107, // Real Time Streaming
];

/// One feature descriptor
#[derive(Debug, Clone)]
pub struct Feature {
    /// 16-bit feature code
    pub code: u16,
    /// Descriptor version field
    pub version: u8,
    /// Always current, independent of profile
    pub persistent: bool,
    /// Currently active
    pub current: bool,
    /// Payload bytes following the 4-byte descriptor header
    pub data: Vec<u8>,
}

impl Feature {
    fn new(code: u16, version: u8, persistent: bool, data: Vec<u8>) -> Self {
        Self {
            code,
            version,
            persistent,
            current: persistent,
            data,
        }
    }

    /// Serialize the descriptor (header plus payload)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.data.len());
        bytes.extend_from_slice(&self.code.to_be_bytes());
        bytes.push((self.version << 2) | (u8::from(self.persistent) << 1) | u8::from(self.current));
        bytes.push(self.data.len() as u8);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// The device's feature list plus the active profile
pub struct FeatureSet {
    features: BTreeMap<u16, Feature>,
    profile: Profile,
}

impl FeatureSet {
    /// Build the feature list of an emulated CD/DVD-ROM drive
    pub fn new() -> Self {
        let mut features = BTreeMap::new();
        let mut add = |f: Feature| {
            features.insert(f.code, f);
        };

        // 0x0000 Profile List: both profiles we can morph between; the
        // per-profile current bits live in the payload and are kept in
        // sync by set_profile
        add(Feature::new(
            0x0000,
            0x00,
            true,
            vec![
                0x00, 0x08, 0x00, 0x00, // CD-ROM profile, not current
                0x00, 0x10, 0x00, 0x00, // DVD-ROM profile, not current
            ],
        ));

        // 0x0001 Core: ATAPI physical interface
        add(Feature::new(0x0001, 0x02, true, vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00]));

        // 0x0002 Morphing: synchronous reporting only
        add(Feature::new(0x0002, 0x01, true, vec![0x00, 0x00, 0x00, 0x00]));

        // 0x0003 Removable Medium: tray loader, eject and lock
        add(Feature::new(0x0003, 0x00, true, vec![0x29, 0x00, 0x00, 0x00]));

        // 0x0010 Random Readable: 2048-byte blocks, blocking 1, page 1 present
        add(Feature::new(
            0x0010,
            0x00,
            false,
            vec![0x00, 0x00, 0x08, 0x00, 0x00, 0x01, 0x01, 0x00],
        ));

        // 0x001D Multi-read
        add(Feature::new(0x001D, 0x00, false, Vec::new()));

        // 0x001E CD Read: C2 pointers and CD-Text
        add(Feature::new(0x001E, 0x02, false, vec![0x03, 0x00, 0x00, 0x00]));

        // 0x001F DVD Read: DVD Multi 1.1, dual-layer DVD-R
        add(Feature::new(0x001F, 0x01, false, vec![0x01, 0x00, 0x01, 0x00]));

        // 0x0100 Power Management
        add(Feature::new(0x0100, 0x00, true, Vec::new()));

        // 0x0103 CD External Audio Play: separate volume/mute, scan,
        // 256 volume levels
        add(Feature::new(0x0103, 0x00, false, vec![0x07, 0x00, 0x01, 0x00]));

        // 0x0106 DVD CSS: CSS version 1
        add(Feature::new(0x0106, 0x00, false, vec![0x00, 0x00, 0x00, 0x01]));

        // 0x0107 Real Time Streaming: READ BUFFER CAPACITY and
        // SET CD SPEED
        add(Feature::new(0x0107, 0x03, false, vec![0x09, 0x00, 0x00, 0x00]));

        Self {
            features,
            profile: Profile::None,
        }
    }

    /// Active profile
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Feature by code
    pub fn get(&self, code: u16) -> Option<&Feature> {
        self.features.get(&code)
    }

    /// Switch profiles, recomputing every current bit
    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;

        // Non-persistent features drop their current bit first
        for feature in self.features.values_mut() {
            feature.current = feature.persistent;
        }

        let active: &[u16] = match profile {
            Profile::None => &[],
            Profile::CdRom => CDROM_FEATURES,
            Profile::DvdRom => DVDROM_FEATURES,
        };
        for &code in active {
            match self.features.get_mut(&code) {
                Some(feature) => feature.current = true,
                None => log::warn!("profile feature 0x{code:04X} not in the feature list"),
            }
        }

        // Mirror the selection into the Profile List payload
        if let Some(list) = self.features.get_mut(&0x0000) {
            list.data[2] = u8::from(profile == Profile::CdRom);
            list.data[6] = u8::from(profile == Profile::DvdRom);
        }

        log::debug!("profile switched to {profile:?}");
    }

    /// Features at or above `start`, filtered by the GET CONFIGURATION
    /// RT field (0 = all, 1 = current only, 2 = exactly `start`)
    pub fn descriptors(&self, start: u16, rt: u8) -> Vec<&Feature> {
        match rt {
            2 => self.features.get(&start).into_iter().collect(),
            1 => self
                .features
                .range(start..)
                .map(|(_, f)| f)
                .filter(|f| f.current)
                .collect(),
            _ => self.features.range(start..).map(|(_, f)| f).collect(),
        }
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_list_is_sorted() {
        let set = FeatureSet::new();
        let codes: Vec<u16> = set.descriptors(0, 0).iter().map(|f| f.code).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        assert_eq!(codes, sorted);
        assert_eq!(codes.len(), 12);
    }

    #[test]
    fn test_persistent_features_always_current() {
        let mut set = FeatureSet::new();
        set.set_profile(Profile::None);

        for code in [0x0000, 0x0001, 0x0002, 0x0003, 0x0100] {
            assert!(set.get(code).unwrap().current, "0x{code:04X}");
        }
        assert!(!set.get(0x001E).unwrap().current);
        assert!(!set.get(0x001F).unwrap().current);
    }

    #[test]
    fn test_cdrom_profile_selection() {
        let mut set = FeatureSet::new();
        set.set_profile(Profile::CdRom);

        assert!(set.get(0x001E).unwrap().current);
        assert!(set.get(0x0103).unwrap().current);
        assert!(!set.get(0x001F).unwrap().current);
        assert!(!set.get(0x0106).unwrap().current);

        let list = set.get(0x0000).unwrap();
        assert_eq!(list.data[2], 1); // CD-ROM current
        assert_eq!(list.data[6], 0); // DVD-ROM not current
    }

    #[test]
    fn test_dvdrom_profile_selection() {
        let mut set = FeatureSet::new();
        set.set_profile(Profile::CdRom);
        set.set_profile(Profile::DvdRom);

        assert!(!set.get(0x001E).unwrap().current);
        assert!(set.get(0x001F).unwrap().current);
        assert!(set.get(0x0106).unwrap().current);

        let list = set.get(0x0000).unwrap();
        assert_eq!(list.data[2], 0);
        assert_eq!(list.data[6], 1);
    }

    #[test]
    fn test_descriptor_serialization() {
        let mut set = FeatureSet::new();
        set.set_profile(Profile::CdRom);

        let bytes = set.get(0x001E).unwrap().to_bytes();
        assert_eq!(&bytes[0..2], &[0x00, 0x1E]);
        // Version 2, not persistent, current
        assert_eq!(bytes[2], (0x02 << 2) | 0x01);
        assert_eq!(bytes[3], 4);
        assert_eq!(bytes.len(), 8);
    }

    #[test]
    fn test_rt_filtering() {
        let mut set = FeatureSet::new();
        set.set_profile(Profile::None);

        let all = set.descriptors(0, 0).len();
        let current = set.descriptors(0, 1).len();
        assert!(current < all);

        let one = set.descriptors(0x001E, 2);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].code, 0x001E);
        assert!(set.descriptors(0x4000, 2).is_empty());
    }

    #[test]
    fn test_descriptors_from_start_code() {
        let set = FeatureSet::new();
        let from_core = set.descriptors(0x0001, 0);
        assert_eq!(from_core[0].code, 0x0001);
        assert_eq!(from_core.len(), 11);
    }
}
