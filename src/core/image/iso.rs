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

//! ISO image parser
//!
//! A plain ISO file is a single Mode-1 data track stored as bare
//! 2048-byte user data. The medium class is inferred from the sector
//! count: anything beyond what fits on an 80-minute CD is presented as
//! a DVD-ROM.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::disc::{
    BinaryFragment, Disc, MediumType, NullFragment, SectorMode, Session, SessionType,
    SubchannelFormat, Track, TrackFlags, LEAD_PREGAP,
};
use crate::core::error::ParserError;

/// Sector count of an 80-minute CD, the CD/DVD classification boundary
const CD_MAX_SECTORS: u64 = 360_000;

/// Parser for plain ISO (2048 bytes/sector) images
pub struct IsoParser;

impl super::ImageParser for IsoParser {
    fn name(&self) -> &'static str {
        "iso"
    }

    fn can_handle(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("iso")
        )
    }

    fn parse(&self, paths: &[PathBuf]) -> Result<Disc, ParserError> {
        let path = &paths[0];
        let file = Arc::new(File::open(path)?);
        let size = file.metadata()?.len();

        if size == 0 || size % 2048 != 0 {
            return Err(ParserError::Malformed(format!(
                "{}: size {} is not a multiple of 2048",
                path.display(),
                size
            )));
        }

        let sectors = size / 2048;
        let medium = if sectors > CD_MAX_SECTORS {
            MediumType::Dvd
        } else {
            MediumType::Cd
        };

        let mut track = Track::new(SectorMode::Mode1, TrackFlags::empty());
        if medium == MediumType::Cd {
            // The 2-second lead pregap is never stored in an ISO
            track.pregap = LEAD_PREGAP;
            track.push_fragment(Box::new(NullFragment::new(LEAD_PREGAP, 2048)));
        }
        track.push_fragment(Box::new(BinaryFragment::new(
            file,
            0,
            sectors as u32,
            2048,
            0,
            SubchannelFormat::None,
        )?));

        log::debug!(
            "{}: {} sectors, presenting as {:?}",
            path.display(),
            sectors,
            medium
        );

        let session = Session::new(SessionType::CdDa, vec![track]);
        Disc::new(medium, vec![session], vec![path.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::ImageParser;
    use std::io::Write;

    fn iso_file(sectors: usize) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new()
            .suffix(".iso")
            .tempfile()
            .expect("tempfile");
        file.write_all(&vec![0u8; sectors * 2048]).expect("write");
        file.into_temp_path()
    }

    #[test]
    fn test_can_handle_by_extension() {
        assert!(IsoParser.can_handle(Path::new("image.iso")));
        assert!(IsoParser.can_handle(Path::new("image.ISO")));
        assert!(!IsoParser.can_handle(Path::new("image.cue")));
    }

    #[test]
    fn test_parse_iso() {
        let path = iso_file(600);
        let disc = IsoParser.parse(&[path.to_path_buf()]).expect("parse");

        assert_eq!(disc.medium, MediumType::Cd);
        assert_eq!(disc.capacity(), 600);
        assert_eq!(disc.first_track().mode, SectorMode::Mode1);
        assert_eq!(disc.first_track().start(), 0);
    }

    #[test]
    fn test_parse_rejects_odd_size() {
        let mut file = tempfile::Builder::new()
            .suffix(".iso")
            .tempfile()
            .expect("tempfile");
        file.write_all(&[0u8; 1000]).expect("write");
        let path = file.into_temp_path();

        assert!(IsoParser.parse(&[path.to_path_buf()]).is_err());
    }
}
