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

//! Sector synthesis
//!
//! A [`Sector`] is a view assembled from whatever bytes a fragment
//! stores, completed with synthesized ranges so that any READ CD field
//! selection can be served in the exact raw layout a drive would
//! return. Images store anything from bare 2048-byte user data up to
//! full 2352-byte raw sectors with interleaved subchannel; the missing
//! pieces (sync pattern, header, subheader, Q subchannel, optionally
//! the EDC) are generated here.
//!
//! Raw Mode-1 layout for reference:
//!
//! ```text
//! offset  size  field
//!      0    12  sync (00 FF*10 00)
//!     12     4  header (MSF in BCD + mode byte)
//!     16  2048  user data
//!   2064     4  EDC
//!   2068     8  intermediate (zero)
//!   2076   172  P parity
//!   2248   104  Q parity
//! ```

use bitflags::bitflags;
use thiserror::Error;

use super::{dec_to_bcd, msf_of_lba};
use crate::core::error::ParserError;

/// Raw sector size in bytes
pub const RAW_SECTOR_SIZE: usize = 2352;

/// PW subchannel size in bytes
pub const SUBCHANNEL_SIZE: usize = 96;

bitflags! {
    /// READ CD main-channel field selection (CDB byte 9, bits 7..3)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MainChannelSelection: u8 {
        /// 12-byte sync pattern
        const SYNC = 1 << 7;
        /// 8-byte Mode-2 subheader
        const SUBHEADER = 1 << 6;
        /// 4-byte sector header
        const HEADER = 1 << 5;
        /// User data (size depends on sector mode)
        const USER_DATA = 1 << 4;
        /// EDC/ECC trailer
        const EDC_ECC = 1 << 3;
    }
}

/// READ CD C2 error information selection (CDB byte 9, bits 2..1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C2Selection {
    /// No C2 information
    None,
    /// 294 bytes of C2 error bits
    ErrorBits,
    /// Block error byte, pad byte, then the 294 error-bit bytes
    BlockErrorByte,
}

/// READ CD subchannel selection (CDB byte 10, bits 2..0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubchannelSelection {
    /// No subchannel data
    None,
    /// 96 bytes of raw interleaved PW
    RawPw,
    /// 16-byte formatted Q
    Q,
}

/// Sector data mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorMode {
    /// CD-DA audio, 2352 bytes of samples
    Audio,
    /// Mode 0, 2336 bytes of zeros
    Mode0,
    /// Mode 1, 2048 bytes of data with EDC/ECC
    Mode1,
    /// Mode 2 formless, 2336 bytes of data
    Mode2,
    /// Mode 2 Form 1, subheader + 2048 bytes with EDC/ECC
    Mode2Form1,
    /// Mode 2 Form 2, subheader + 2324 bytes
    Mode2Form2,
    /// Mode 2 with mixed forms, treated as 2336 bytes after the header
    Mode2Mixed,
}

impl SectorMode {
    /// Header mode byte (offset 15 of a raw sector)
    pub fn header_byte(self) -> u8 {
        match self {
            SectorMode::Audio => 0x00,
            SectorMode::Mode0 => 0x00,
            SectorMode::Mode1 => 0x01,
            SectorMode::Mode2
            | SectorMode::Mode2Form1
            | SectorMode::Mode2Form2
            | SectorMode::Mode2Mixed => 0x02,
        }
    }

    /// Offset and length of the user data area within the raw layout
    pub fn user_data_range(self) -> (usize, usize) {
        match self {
            SectorMode::Audio => (0, 2352),
            SectorMode::Mode0 => (16, 2336),
            SectorMode::Mode1 => (16, 2048),
            SectorMode::Mode2 | SectorMode::Mode2Mixed => (16, 2336),
            SectorMode::Mode2Form1 => (24, 2048),
            SectorMode::Mode2Form2 => (24, 2324),
        }
    }

    /// Offset and length of the EDC/ECC area, if the mode has one
    pub fn edc_ecc_range(self) -> Option<(usize, usize)> {
        match self {
            SectorMode::Mode1 => Some((2064, 288)),
            SectorMode::Mode2Form1 => Some((2072, 280)),
            SectorMode::Mode2Form2 => Some((2348, 4)),
            _ => None,
        }
    }

    /// Whether the mode carries a Mode-2 subheader
    pub fn has_subheader(self) -> bool {
        matches!(
            self,
            SectorMode::Mode2Form1 | SectorMode::Mode2Form2 | SectorMode::Mode2Mixed
        )
    }
}

/// Sector extraction errors
#[derive(Debug, Error)]
pub enum SectorError {
    /// The address is outside every track of the disc
    #[error("no sector at address {0}")]
    NoSector(i32),

    /// The requested fields conflict with the sector's mode
    #[error("requested fields conflict with the sector mode")]
    IllegalField,

    /// The backing image could not be read
    #[error(transparent)]
    Parser(#[from] ParserError),
}

/// One synthesized sector
///
/// Holds the full 2352-byte raw layout (stored bytes in place,
/// synthesized bytes filled in) plus the 96-byte PW subchannel.
pub struct Sector {
    lba: i32,
    mode: SectorMode,
    data: [u8; RAW_SECTOR_SIZE],
    subchannel: [u8; SUBCHANNEL_SIZE],
    has_stored_subchannel: bool,
}

/// Inputs the Q subchannel synthesis needs from the owning track
#[derive(Debug, Clone, Copy)]
pub struct QContext {
    /// Track number (1-99)
    pub track_number: u8,
    /// Index containing this sector (0 in the pregap)
    pub index_number: u8,
    /// Address relative to the track start; negative inside the pregap
    pub relative_lba: i32,
    /// Q control nibble derived from the track flags
    pub control: u8,
}

impl Sector {
    /// Assemble a sector from the bytes a fragment stores
    ///
    /// `stored` is the fragment's main-channel data for this sector
    /// (its length decides which ranges are already present).
    /// `stored_sub` is the 96-byte interleaved PW if the fragment
    /// carries one. `regenerate_edc` computes a real Mode-1 EDC instead
    /// of leaving the trailer zeroed.
    pub fn assemble(
        lba: i32,
        mode: SectorMode,
        stored: &[u8],
        stored_sub: Option<&[u8; SUBCHANNEL_SIZE]>,
        q: QContext,
        regenerate_edc: bool,
    ) -> Result<Self, SectorError> {
        let mut data = [0u8; RAW_SECTOR_SIZE];

        // Place the stored bytes into the canonical layout
        match stored.len() {
            0 => {}
            RAW_SECTOR_SIZE => data.copy_from_slice(stored),
            2336 => data[16..16 + 2336].copy_from_slice(stored),
            2048 => {
                let offset = if mode == SectorMode::Mode2Form1 { 24 } else { 16 };
                data[offset..offset + 2048].copy_from_slice(stored);
            }
            2324 => data[24..24 + 2324].copy_from_slice(stored),
            len => {
                return Err(SectorError::Parser(ParserError::Malformed(format!(
                    "unsupported stored sector size {len}"
                ))));
            }
        }

        let full_raw = stored.len() == RAW_SECTOR_SIZE;

        if mode != SectorMode::Audio {
            // Sync pattern and header are only stored in full raw dumps
            if !full_raw {
                data[0] = 0x00;
                data[1..11].fill(0xFF);
                data[11] = 0x00;

                let (m, s, f) = msf_of_lba(lba);
                data[12] = dec_to_bcd(m);
                data[13] = dec_to_bcd(s);
                data[14] = dec_to_bcd(f);
                data[15] = mode.header_byte();
            }

            // Default subheader when the image stores bare user data
            if mode.has_subheader() && (stored.len() == 2048 || stored.len() == 2324) {
                let submode = if mode == SectorMode::Mode2Form2 { 0x28 } else { 0x08 };
                for half in data[16..24].chunks_exact_mut(4) {
                    half.copy_from_slice(&[0x00, 0x00, submode, 0x00]);
                }
            }

            if regenerate_edc && mode == SectorMode::Mode1 && !full_raw {
                let edc = edc_checksum(&data[0..2064]);
                data[2064..2068].copy_from_slice(&edc.to_le_bytes());
            }
        }

        let mut subchannel = [0u8; SUBCHANNEL_SIZE];
        let has_stored_subchannel = match stored_sub {
            Some(sub) => {
                subchannel.copy_from_slice(sub);
                true
            }
            None => {
                let q_bytes = synthesize_q(lba, q);
                interleave_q(&q_bytes, &mut subchannel);
                false
            }
        };

        Ok(Self {
            lba,
            mode,
            data,
            subchannel,
            has_stored_subchannel,
        })
    }

    /// Sector address
    pub fn lba(&self) -> i32 {
        self.lba
    }

    /// Sector mode
    pub fn mode(&self) -> SectorMode {
        self.mode
    }

    /// Full 2352-byte raw layout
    pub fn raw(&self) -> &[u8; RAW_SECTOR_SIZE] {
        &self.data
    }

    /// User data area only (2048 bytes for Mode 1 / Mode 2 Form 1)
    pub fn user_data(&self) -> &[u8] {
        let (offset, len) = self.mode.user_data_range();
        &self.data[offset..offset + len]
    }

    /// Append the requested byte ranges to `out` in canonical order
    ///
    /// Order: sync, header, subheader, user data, EDC/ECC, C2 block,
    /// subchannel. A request that conflicts with the sector mode (for
    /// example SYNC on an audio sector) fails with
    /// [`SectorError::IllegalField`]; the dispatcher turns that into
    /// ILLEGAL REQUEST / INVALID FIELD IN CDB.
    pub fn extract(
        &self,
        main: MainChannelSelection,
        c2: C2Selection,
        sub: SubchannelSelection,
        out: &mut Vec<u8>,
    ) -> Result<(), SectorError> {
        // Audio sectors have no framing; only whole-sector reads and
        // subchannel requests are meaningful. Data modes tolerate
        // selections of ranges they lack (the classic F8h full-raw
        // read sets SUBHEADER on Mode 1 too): an absent range simply
        // contributes no bytes.
        if self.mode == SectorMode::Audio
            && main.intersects(
                MainChannelSelection::SYNC
                    | MainChannelSelection::HEADER
                    | MainChannelSelection::SUBHEADER
                    | MainChannelSelection::EDC_ECC,
            )
        {
            return Err(SectorError::IllegalField);
        }

        if main.contains(MainChannelSelection::SYNC) {
            out.extend_from_slice(&self.data[0..12]);
        }
        if main.contains(MainChannelSelection::HEADER) {
            out.extend_from_slice(&self.data[12..16]);
        }
        if main.contains(MainChannelSelection::SUBHEADER) && self.mode.has_subheader() {
            out.extend_from_slice(&self.data[16..24]);
        }
        if main.contains(MainChannelSelection::USER_DATA) {
            let (offset, len) = self.mode.user_data_range();
            out.extend_from_slice(&self.data[offset..offset + len]);
        }
        if main.contains(MainChannelSelection::EDC_ECC) {
            if let Some((offset, len)) = self.mode.edc_ecc_range() {
                out.extend_from_slice(&self.data[offset..offset + len]);
            }
        }

        // C2 information is always reported clean
        match c2 {
            C2Selection::None => {}
            C2Selection::ErrorBits => out.extend_from_slice(&[0u8; 294]),
            C2Selection::BlockErrorByte => out.extend_from_slice(&[0u8; 296]),
        }

        match sub {
            SubchannelSelection::None => {}
            SubchannelSelection::RawPw => out.extend_from_slice(&self.subchannel),
            SubchannelSelection::Q => {
                let mut q = [0u8; 16];
                deinterleave_q(&self.subchannel, &mut q);
                out.extend_from_slice(&q);
            }
        }

        Ok(())
    }

    /// Whether the PW subchannel came from the image (vs. synthesis)
    pub fn has_stored_subchannel(&self) -> bool {
        self.has_stored_subchannel
    }

    /// Formatted Q subchannel (12 significant bytes of the 16 returned)
    pub fn q_subchannel(&self) -> [u8; 12] {
        let mut q16 = [0u8; 16];
        deinterleave_q(&self.subchannel, &mut q16);
        let mut q = [0u8; 12];
        q.copy_from_slice(&q16[..12]);
        q
    }
}

/// Build the 12-byte mode-1 Q subchannel for a sector
fn synthesize_q(lba: i32, ctx: QContext) -> [u8; 12] {
    let mut q = [0u8; 12];

    // Control nibble in the high bits, ADR 1 (position) in the low bits
    q[0] = (ctx.control << 4) | 0x01;
    q[1] = dec_to_bcd(ctx.track_number);
    q[2] = dec_to_bcd(ctx.index_number);

    // Relative address counts down through the pregap
    let rel = ctx.relative_lba.unsigned_abs() as i32;
    let (m, s, f) = msf_of_relative(rel);
    q[3] = dec_to_bcd(m);
    q[4] = dec_to_bcd(s);
    q[5] = dec_to_bcd(f);
    q[6] = 0x00;

    let (am, asec, af) = msf_of_lba(lba);
    q[7] = dec_to_bcd(am);
    q[8] = dec_to_bcd(asec);
    q[9] = dec_to_bcd(af);

    let crc = q_crc(&q[0..10]);
    q[10] = (crc >> 8) as u8;
    q[11] = (crc & 0xFF) as u8;

    q
}

/// Split a non-negative sector count into an MSF triple
fn msf_of_relative(sectors: i32) -> (u8, u8, u8) {
    let m = (sectors / (60 * 75)) as u8;
    let s = ((sectors / 75) % 60) as u8;
    let f = (sectors % 75) as u8;
    (m, s, f)
}

/// CRC-16/CCITT over the Q data bytes, complemented per ECMA-130
pub fn q_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    !crc
}

/// 32-bit EDC over `data`, LSB-first polynomial 0xD8018001
pub fn edc_checksum(data: &[u8]) -> u32 {
    let mut edc: u32 = 0;
    for &byte in data {
        edc ^= u32::from(byte);
        for _ in 0..8 {
            edc = if edc & 1 != 0 {
                (edc >> 1) ^ 0xD801_8001
            } else {
                edc >> 1
            };
        }
    }
    edc
}

/// Scatter 12 Q bytes into bit 6 of a 96-byte interleaved PW block
pub(crate) fn interleave_q(q: &[u8; 12], pw: &mut [u8; SUBCHANNEL_SIZE]) {
    for (i, slot) in pw.iter_mut().enumerate() {
        let bit = (q[i / 8] >> (7 - (i % 8))) & 0x01;
        *slot |= bit << 6;
    }
}

/// Collect bit 6 of an interleaved PW block into a 16-byte Q buffer
fn deinterleave_q(pw: &[u8; SUBCHANNEL_SIZE], q: &mut [u8; 16]) {
    for (i, slot) in pw.iter().enumerate() {
        let bit = (slot >> 6) & 0x01;
        q[i / 8] |= bit << (7 - (i % 8));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q_context() -> QContext {
        QContext {
            track_number: 1,
            index_number: 1,
            relative_lba: 0,
            control: 0x04,
        }
    }

    fn mode1_sector(lba: i32) -> Sector {
        let stored = vec![0x5Au8; 2048];
        Sector::assemble(lba, SectorMode::Mode1, &stored, None, q_context(), false)
            .expect("sector")
    }

    #[test]
    fn test_sync_and_header_synthesis() {
        let sector = mode1_sector(0);
        let raw = sector.raw();

        assert_eq!(raw[0], 0x00);
        assert!(raw[1..11].iter().all(|&b| b == 0xFF));
        assert_eq!(raw[11], 0x00);

        // LBA 0 is MSF 00:02:00
        assert_eq!(raw[12], 0x00);
        assert_eq!(raw[13], 0x02);
        assert_eq!(raw[14], 0x00);
        assert_eq!(raw[15], 0x01);
    }

    #[test]
    fn test_mode1_full_read_length() {
        let sector = mode1_sector(16);
        let mut out = Vec::new();
        sector
            .extract(
                MainChannelSelection::SYNC
                    | MainChannelSelection::HEADER
                    | MainChannelSelection::USER_DATA
                    | MainChannelSelection::EDC_ECC,
                C2Selection::None,
                SubchannelSelection::None,
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), RAW_SECTOR_SIZE);
    }

    #[test]
    fn test_user_data_only() {
        let sector = mode1_sector(100);
        let mut out = Vec::new();
        sector
            .extract(
                MainChannelSelection::USER_DATA,
                C2Selection::None,
                SubchannelSelection::None,
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), 2048);
        assert!(out.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_audio_rejects_sync() {
        let stored = vec![0u8; 2352];
        let sector =
            Sector::assemble(0, SectorMode::Audio, &stored, None, q_context(), false).unwrap();
        let mut out = Vec::new();
        let err = sector
            .extract(
                MainChannelSelection::SYNC | MainChannelSelection::USER_DATA,
                C2Selection::None,
                SubchannelSelection::None,
                &mut out,
            )
            .unwrap_err();
        assert!(matches!(err, SectorError::IllegalField));
    }

    #[test]
    fn test_mode1_subheader_contributes_nothing() {
        let sector = mode1_sector(0);
        let mut out = Vec::new();
        sector
            .extract(
                MainChannelSelection::SUBHEADER,
                C2Selection::None,
                SubchannelSelection::None,
                &mut out,
            )
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_mode1_full_raw_f8_selection() {
        // F8h: sync + header + subheader + data + EDC/ECC; Mode 1 has
        // no subheader, so the result is still one raw sector
        let sector = mode1_sector(0);
        let mut out = Vec::new();
        sector
            .extract(
                MainChannelSelection::from_bits_truncate(0xF8),
                C2Selection::None,
                SubchannelSelection::None,
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), RAW_SECTOR_SIZE);
    }

    #[test]
    fn test_form1_subheader_default() {
        let stored = vec![0u8; 2048];
        let sector =
            Sector::assemble(0, SectorMode::Mode2Form1, &stored, None, q_context(), false)
                .unwrap();
        assert_eq!(&sector.raw()[16..24], &[0, 0, 0x08, 0, 0, 0, 0x08, 0]);
    }

    #[test]
    fn test_c2_lengths() {
        let sector = mode1_sector(0);

        let mut out = Vec::new();
        sector
            .extract(
                MainChannelSelection::empty(),
                C2Selection::ErrorBits,
                SubchannelSelection::None,
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), 294);

        out.clear();
        sector
            .extract(
                MainChannelSelection::empty(),
                C2Selection::BlockErrorByte,
                SubchannelSelection::None,
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), 296);
    }

    #[test]
    fn test_q_subchannel_contents() {
        let sector = mode1_sector(0);
        let q = sector.q_subchannel();

        // ADR 1, control = data track
        assert_eq!(q[0], 0x41);
        assert_eq!(q[1], 0x01);
        assert_eq!(q[2], 0x01);
        // Absolute MSF 00:02:00
        assert_eq!(q[7], 0x00);
        assert_eq!(q[8], 0x02);
        assert_eq!(q[9], 0x00);

        let crc = q_crc(&q[0..10]);
        assert_eq!(q[10], (crc >> 8) as u8);
        assert_eq!(q[11], (crc & 0xFF) as u8);
    }

    #[test]
    fn test_q_roundtrip_through_pw() {
        let sector = mode1_sector(4500);
        let mut out = Vec::new();
        sector
            .extract(
                MainChannelSelection::empty(),
                C2Selection::None,
                SubchannelSelection::Q,
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..12], &sector.q_subchannel());
    }

    #[test]
    fn test_edc_regeneration() {
        let stored = vec![0x11u8; 2048];
        let plain =
            Sector::assemble(0, SectorMode::Mode1, &stored, None, q_context(), false).unwrap();
        let regen =
            Sector::assemble(0, SectorMode::Mode1, &stored, None, q_context(), true).unwrap();

        assert_eq!(&plain.raw()[2064..2068], &[0, 0, 0, 0]);
        let expected = edc_checksum(&regen.raw()[0..2064]);
        assert_eq!(&regen.raw()[2064..2068], &expected.to_le_bytes());
    }

    #[test]
    fn test_edc_known_value() {
        // EDC of all zeros must be zero (polynomial division of zero)
        assert_eq!(edc_checksum(&[0u8; 2064]), 0);
    }

    #[test]
    fn test_stored_pw_passthrough() {
        let stored = vec![0u8; 2352];
        let mut pw = [0u8; SUBCHANNEL_SIZE];
        pw[0] = 0xC0;
        let sector = Sector::assemble(
            0,
            SectorMode::Audio,
            &stored,
            Some(&pw),
            q_context(),
            false,
        )
        .unwrap();

        let mut out = Vec::new();
        sector
            .extract(
                MainChannelSelection::empty(),
                C2Selection::None,
                SubchannelSelection::RawPw,
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), SUBCHANNEL_SIZE);
        assert_eq!(out[0], 0xC0);
        assert!(sector.has_stored_subchannel());
    }
}
