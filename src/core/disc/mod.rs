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

//! Disc image model
//!
//! A disc is an ordered list of sessions; a session is an ordered list
//! of tracks; a track is an ordered list of fragments plus addressing
//! metadata. Parsers build this model, the device consumes it. Once a
//! disc is handed to a device it is immutable; load and unload swap the
//! whole `Arc<Disc>`.
//!
//! Address arithmetic treats the disc start sector as a signed origin:
//! CD discs start at −150 so that LBA 0 lines up with MSF 00:02:00,
//! DVD and BD discs start at 0.

use std::path::PathBuf;

use bitflags::bitflags;

pub mod fragment;
pub mod sector;
#[cfg(test)]
mod tests;

pub use fragment::{AudioFragment, BinaryFragment, Fragment, NullFragment, SubchannelFormat};
pub use sector::{
    C2Selection, MainChannelSelection, Sector, SectorError, SectorMode, SubchannelSelection,
};

use crate::core::error::ParserError;
use sector::{QContext, SUBCHANNEL_SIZE};

/// Number of sectors in the implicit pregap before the first track
pub const LEAD_PREGAP: u32 = 150;

/// Physical medium class of a loaded disc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumType {
    /// Compact Disc (CD-DA, CD-ROM, CD-ROM XA)
    Cd,
    /// DVD-ROM
    Dvd,
    /// Blu-ray disc
    Bd,
}

impl MediumType {
    /// Signed origin of the disc layout
    pub fn start_sector(self) -> i32 {
        match self {
            MediumType::Cd => -(LEAD_PREGAP as i32),
            MediumType::Dvd | MediumType::Bd => 0,
        }
    }
}

/// Session format as reported by READ TOC and READ DISC INFORMATION
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    /// Audio or plain data CD
    CdDa = 0x00,
    /// CD-I
    CdI = 0x10,
    /// CD-ROM XA
    CdXa = 0x20,
}

bitflags! {
    /// Track attribute flags carried into the Q subchannel control nibble
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TrackFlags: u8 {
        /// Audio with pre-emphasis
        const PRE_EMPHASIS = 1 << 0;
        /// Digital copy permitted
        const COPY_PERMITTED = 1 << 1;
        /// Four-channel audio
        const FOUR_CHANNEL = 1 << 2;
    }
}

/// An additional index point inside a track (index numbers 2 and up)
#[derive(Debug, Clone, Copy)]
pub struct TrackIndex {
    /// Index number
    pub number: u8,
    /// Absolute disc address of the index point
    pub address: i32,
}

/// One track: fragments plus addressing metadata
///
/// `base` and `number` are assigned when the track is laid out by
/// [`Disc::new`]; parsers leave them at zero.
pub struct Track {
    /// Track number (1-99), assigned at layout
    pub number: u8,
    /// Sector mode of the track's data
    pub mode: SectorMode,
    /// Control-nibble attribute flags
    pub flags: TrackFlags,
    /// ISRC, if the image declares one
    pub isrc: Option<String>,
    /// Index points beyond index 1, absolute, strictly increasing
    pub indices: Vec<TrackIndex>,
    /// Sectors before index 1 (index 0 area)
    pub pregap: u32,
    /// Absolute address of the first fragment sector, assigned at layout
    pub base: i32,
    fragments: Vec<Box<dyn Fragment>>,
    length: u32,
}

impl Track {
    /// Create an empty track of the given mode
    pub fn new(mode: SectorMode, flags: TrackFlags) -> Self {
        Self {
            number: 0,
            mode,
            flags,
            isrc: None,
            indices: Vec::new(),
            pregap: 0,
            base: 0,
            fragments: Vec::new(),
            length: 0,
        }
    }

    /// Append a fragment; track length grows by the fragment length
    pub fn push_fragment(&mut self, fragment: Box<dyn Fragment>) {
        self.length += fragment.length();
        self.fragments.push(fragment);
    }

    /// Total length in sectors (pregap included)
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Absolute address of index 1 (the track start reported in the TOC)
    pub fn start(&self) -> i32 {
        self.base + self.pregap as i32
    }

    /// Absolute address one past the last sector
    pub fn end(&self) -> i32 {
        self.base + self.length as i32
    }

    /// Whether the absolute address falls inside this track
    pub fn contains(&self, lba: i32) -> bool {
        lba >= self.base && lba < self.end()
    }

    /// Q control nibble for this track
    pub fn control(&self) -> u8 {
        let mut control = 0u8;
        if self.mode != SectorMode::Audio {
            control |= 0x04;
        }
        if self.flags.contains(TrackFlags::COPY_PERMITTED) {
            control |= 0x02;
        }
        if self.flags.contains(TrackFlags::PRE_EMPHASIS) {
            control |= 0x01;
        }
        if self.flags.contains(TrackFlags::FOUR_CHANNEL) {
            control |= 0x08;
        }
        control
    }

    /// Index number containing the absolute address
    pub fn index_at(&self, lba: i32) -> u8 {
        if lba < self.start() {
            return 0;
        }
        let mut index = 1;
        for point in &self.indices {
            if lba >= point.address {
                index = point.number;
            }
        }
        index
    }

    /// Fragment covering the track-relative sector, with its local index
    fn fragment_at(&self, mut offset: u32) -> Option<(&dyn Fragment, u32)> {
        for fragment in &self.fragments {
            if offset < fragment.length() {
                return Some((fragment.as_ref(), offset));
            }
            offset -= fragment.length();
        }
        None
    }
}

/// One session: tracks plus lead-in/lead-out bookkeeping
pub struct Session {
    /// Session number (1-based), assigned at layout
    pub number: u8,
    /// Session format
    pub session_type: SessionType,
    /// Number of the session's first track, assigned at layout
    pub first_track_number: u8,
    /// Lead-in length in sectors (not part of the addressable layout)
    pub leadin_length: u32,
    /// Lead-out length in sectors
    pub leadout_length: u32,
    /// Raw CD-Text block, if the image carries one
    pub cd_text: Option<Vec<u8>>,
    /// Tracks, in layout order, non-empty
    pub tracks: Vec<Track>,
    leadout_start: i32,
}

impl Session {
    /// Standard lead-out length of a first session
    pub const LEADOUT_FIRST: u32 = 6750;
    /// Standard lead-out length of subsequent sessions
    pub const LEADOUT_LATER: u32 = 2250;

    /// Create a session around a list of tracks
    pub fn new(session_type: SessionType, tracks: Vec<Track>) -> Self {
        Self {
            number: 0,
            session_type,
            first_track_number: 0,
            leadin_length: 4500,
            leadout_length: Self::LEADOUT_FIRST,
            cd_text: None,
            tracks,
            leadout_start: 0,
        }
    }

    /// Absolute address where the lead-out begins
    pub fn leadout_start(&self) -> i32 {
        self.leadout_start
    }

    /// Number of the session's last track
    pub fn last_track_number(&self) -> u8 {
        self.first_track_number + self.tracks.len() as u8 - 1
    }
}

/// One entry of the table of contents
#[derive(Debug, Clone, Copy)]
pub struct TocEntry {
    /// Track number
    pub track: u8,
    /// ADR (high nibble) and control (low nibble)
    pub adr_control: u8,
    /// Absolute start address of the track (index 1)
    pub start: i32,
}

/// Summary table of contents across all sessions
pub struct Toc {
    /// First track number on the disc
    pub first_track: u8,
    /// Last track number on the disc
    pub last_track: u8,
    /// Per-track descriptors in ascending track order
    pub entries: Vec<TocEntry>,
    /// Lead-out address of the last session
    pub leadout: i32,
}

/// A complete, immutable disc image
pub struct Disc {
    /// Medium class
    pub medium: MediumType,
    /// Signed layout origin
    pub start_sector: i32,
    /// Sessions in layout order, non-empty
    pub sessions: Vec<Session>,
    /// Files the image was loaded from
    pub filenames: Vec<PathBuf>,
    /// Fail sector reads that hit a truncated image instead of
    /// zero-filling (policy knob, default off)
    pub strict_reads: bool,
    /// Regenerate the Mode-1 EDC instead of returning zeros
    pub regenerate_edc: bool,
    length: u32,
}

impl Disc {
    /// Lay out sessions into a disc
    ///
    /// Assigns track numbers, session numbers and absolute addresses.
    /// Sessions and tracks are placed contiguously starting at the
    /// medium's start sector; each session is followed by its lead-out.
    pub fn new(
        medium: MediumType,
        mut sessions: Vec<Session>,
        filenames: Vec<PathBuf>,
    ) -> Result<Self, ParserError> {
        if sessions.is_empty() || sessions.iter().any(|s| s.tracks.is_empty()) {
            return Err(ParserError::Malformed(
                "a disc needs at least one session with at least one track".into(),
            ));
        }

        let start_sector = medium.start_sector();
        let mut cursor = start_sector;
        let mut track_number = 1u8;

        for (si, session) in sessions.iter_mut().enumerate() {
            session.number = si as u8 + 1;
            session.first_track_number = track_number;
            if si > 0 {
                session.leadout_length = Session::LEADOUT_LATER;
            }

            for track in &mut session.tracks {
                track.number = track_number;
                track.base = cursor;
                cursor += track.length as i32;
                track_number += 1;
            }

            session.leadout_start = cursor;
            cursor += session.leadout_length as i32;
        }

        let length = (cursor - start_sector) as u32;

        log::info!(
            "laid out disc: {} session(s), {} track(s), {} sectors",
            sessions.len(),
            track_number - 1,
            length
        );

        Ok(Self {
            medium,
            start_sector,
            sessions,
            filenames,
            strict_reads: false,
            regenerate_edc: false,
            length,
        })
    }

    /// Total layout length in sectors (tracks plus lead-outs)
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Addressable capacity: the lead-out address of the last session
    ///
    /// READ CAPACITY reports `capacity() - 1` as the last LBA.
    pub fn capacity(&self) -> u32 {
        let session = self.sessions.last().expect("disc has sessions");
        session.leadout_start().max(0) as u32
    }

    /// Session containing the absolute address
    pub fn session_of(&self, lba: i32) -> Option<&Session> {
        self.sessions.iter().find(|session| {
            session
                .tracks
                .first()
                .map(|first| lba >= first.base && lba < session.leadout_start())
                .unwrap_or(false)
        })
    }

    /// Track containing the absolute address
    pub fn track_of(&self, lba: i32) -> Option<&Track> {
        self.sessions
            .iter()
            .flat_map(|session| session.tracks.iter())
            .find(|track| track.contains(lba))
    }

    /// Track by number
    pub fn track_by_number(&self, number: u8) -> Option<&Track> {
        self.sessions
            .iter()
            .flat_map(|session| session.tracks.iter())
            .find(|track| track.number == number)
    }

    /// First track of the disc
    pub fn first_track(&self) -> &Track {
        &self.sessions[0].tracks[0]
    }

    /// Number of tracks across all sessions
    pub fn track_count(&self) -> usize {
        self.sessions.iter().map(|s| s.tracks.len()).sum()
    }

    /// Build the summary table of contents
    pub fn toc(&self) -> Toc {
        let mut entries = Vec::with_capacity(self.track_count());
        for session in &self.sessions {
            for track in &session.tracks {
                entries.push(TocEntry {
                    track: track.number,
                    adr_control: 0x10 | track.control(),
                    start: track.start(),
                });
            }
        }

        let last_session = self.sessions.last().expect("disc has sessions");
        Toc {
            first_track: entries.first().map(|e| e.track).unwrap_or(1),
            last_track: entries.last().map(|e| e.track).unwrap_or(1),
            entries,
            leadout: last_session.leadout_start(),
        }
    }

    /// Synthesize the sector at an absolute address
    ///
    /// Fails with [`SectorError::NoSector`] outside every track, and
    /// with a parser error if the image cannot be read (or is
    /// truncated while `strict_reads` is set).
    pub fn sector_at(&self, lba: i32) -> Result<Sector, SectorError> {
        let track = self.track_of(lba).ok_or(SectorError::NoSector(lba))?;

        let offset = (lba - track.base) as u32;
        let (fragment, index) = track
            .fragment_at(offset)
            .ok_or(SectorError::NoSector(lba))?;

        let mut stored = vec![0u8; fragment.main_sector_size()];
        let read = fragment.read_main(index, &mut stored)?;
        if self.strict_reads && read < stored.len() {
            return Err(SectorError::Parser(ParserError::Malformed(format!(
                "truncated sector at LBA {lba}: {read} of {} bytes stored",
                stored.len()
            ))));
        }

        let mut pw = [0u8; SUBCHANNEL_SIZE];
        let stored_sub = match fragment.subchannel_format() {
            SubchannelFormat::None => None,
            SubchannelFormat::Pw96 => {
                fragment.read_subchannel(index, &mut pw)?;
                Some(&pw)
            }
            SubchannelFormat::Q16 => {
                let mut q16 = [0u8; 16];
                fragment.read_subchannel(index, &mut q16)?;
                let mut q = [0u8; 12];
                q.copy_from_slice(&q16[..12]);
                sector::interleave_q(&q, &mut pw);
                Some(&pw)
            }
        };

        let q = QContext {
            track_number: track.number,
            index_number: track.index_at(lba),
            relative_lba: lba - track.start(),
            control: track.control(),
        };

        Sector::assemble(lba, track.mode, &stored, stored_sub, q, self.regenerate_edc)
    }
}

/// Convert BCD (Binary-Coded Decimal) to decimal
#[inline]
pub fn bcd_to_dec(bcd: u8) -> u8 {
    (bcd >> 4) * 10 + (bcd & 0x0F)
}

/// Convert decimal to BCD (Binary-Coded Decimal)
#[inline]
pub fn dec_to_bcd(dec: u8) -> u8 {
    ((dec / 10) << 4) | (dec % 10)
}

/// Absolute MSF triple of an LBA (the +150 pregap offset applied)
pub fn msf_of_lba(lba: i32) -> (u8, u8, u8) {
    let total = lba + 150;
    let m = (total / (60 * 75)) as u8;
    let s = ((total / 75) % 60) as u8;
    let f = (total % 75) as u8;
    (m, s, f)
}

/// LBA of an absolute MSF triple
pub fn lba_of_msf(m: u8, s: u8, f: u8) -> i32 {
    (i32::from(m) * 60 + i32::from(s)) * 75 + i32::from(f) - 150
}
