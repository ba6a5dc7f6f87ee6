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

//! Recording emulation
//!
//! Enough session-at-once bookkeeping to satisfy burner tools that
//! probe a blank recordable medium: SEND CUE SHEET parses the SAO cue
//! into a synthetic track layout, WRITE commands must arrive strictly
//! at the next writable address, and CLOSE TRACK/SESSION maintain the
//! open-track state that READ DISC INFORMATION and READ TRACK
//! INFORMATION report. Written payloads go to an optional
//! [`ImageWriter`]; without one they are discarded.

use crate::core::disc::lba_of_msf;

/// Destination for recorded sectors
pub trait ImageWriter: Send {
    /// Store one written sector
    fn write_sector(&mut self, lba: i32, data: &[u8]) -> std::io::Result<()>;

    /// A track was closed
    fn close_track(&mut self, track: u8) -> std::io::Result<()>;

    /// The session was closed
    fn close_session(&mut self) -> std::io::Result<()>;
}

/// One track described by a SAO cue sheet
#[derive(Debug, Clone)]
pub struct CueSheetTrack {
    /// Track number
    pub number: u8,
    /// CTL/ADR byte from the cue sheet
    pub ctl_adr: u8,
    /// Data form byte from the cue sheet
    pub data_form: u8,
    /// Start of the pregap (index 0), if the sheet declares one
    pub pregap_start: Option<i32>,
    /// Start of the track data (index 1)
    pub start: i32,
}

/// Sequential-write bookkeeping for one emulated blank medium
pub struct RecordingState {
    tracks: Vec<CueSheetTrack>,
    armed: bool,
    next_writable_address: i32,
    written_sectors: u32,
    open_track: Option<u8>,
    session_closed: bool,
    writer: Option<Box<dyn ImageWriter>>,
}

impl RecordingState {
    /// Fresh state: nothing armed, nothing written
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            armed: false,
            next_writable_address: 0,
            written_sectors: 0,
            open_track: None,
            session_closed: false,
            writer: None,
        }
    }

    /// Attach a destination for written sectors
    pub fn set_writer(&mut self, writer: Box<dyn ImageWriter>) {
        self.writer = Some(writer);
    }

    /// Whether a cue sheet has armed the recorder
    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Address the next WRITE must start at
    pub fn next_writable_address(&self) -> i32 {
        self.next_writable_address
    }

    /// Sectors written since the cue sheet was accepted
    pub fn written_sectors(&self) -> u32 {
        self.written_sectors
    }

    /// Track currently open for writing
    pub fn open_track(&self) -> Option<u8> {
        self.open_track
    }

    /// Whether CLOSE SESSION has been processed
    pub fn session_closed(&self) -> bool {
        self.session_closed
    }

    /// Tracks declared by the cue sheet
    pub fn tracks(&self) -> &[CueSheetTrack] {
        &self.tracks
    }

    /// Track descriptor by number
    pub fn track(&self, number: u8) -> Option<&CueSheetTrack> {
        self.tracks.iter().find(|t| t.number == number)
    }

    /// Parse a SAO cue sheet (8-byte entries) and arm the recorder
    ///
    /// Entry layout: CTL/ADR, track number, index, data form, SCMS,
    /// then the MSF address. Track number 0 marks lead-in entries,
    /// 0xAA the lead-out.
    pub fn parse_cue_sheet(&mut self, sheet: &[u8]) -> Result<(), String> {
        if sheet.is_empty() || sheet.len() % 8 != 0 {
            return Err(format!("cue sheet size {} is not a multiple of 8", sheet.len()));
        }

        let mut tracks: Vec<CueSheetTrack> = Vec::new();

        for entry in sheet.chunks_exact(8) {
            let ctl_adr = entry[0];
            let tno = entry[1];
            let index = entry[2];
            let data_form = entry[3];
            let lba = lba_of_msf(entry[5], entry[6], entry[7]);

            match tno {
                0x00 | 0xAA => {} // lead-in / lead-out markers
                1..=99 => {
                    let track = match tracks.iter_mut().find(|t| t.number == tno) {
                        Some(track) => track,
                        None => {
                            tracks.push(CueSheetTrack {
                                number: tno,
                                ctl_adr,
                                data_form,
                                pregap_start: None,
                                start: 0,
                            });
                            tracks.last_mut().unwrap()
                        }
                    };
                    match index {
                        0 => track.pregap_start = Some(lba),
                        1 => track.start = lba,
                        _ => {}
                    }
                }
                other => return Err(format!("invalid track number {other} in cue sheet")),
            }
        }

        if tracks.is_empty() {
            return Err("cue sheet declares no tracks".into());
        }
        tracks.sort_by_key(|t| t.number);

        let first_write = tracks[0].pregap_start.unwrap_or(tracks[0].start);
        let first_track = tracks[0].number;
        let count = tracks.len();

        self.tracks = tracks;
        self.armed = true;
        self.session_closed = false;
        self.written_sectors = 0;
        self.next_writable_address = first_write;
        self.open_track = Some(first_track);

        log::debug!(
            "cue sheet accepted: {count} track(s), first writable address {}",
            self.next_writable_address
        );
        Ok(())
    }

    /// Record a sequential write of `count` sectors starting at `lba`
    ///
    /// `data` carries the sector payloads and is forwarded to the
    /// writer when one is attached. Writes must arrive exactly at the
    /// next writable address.
    pub fn write(&mut self, lba: i32, count: u32, data: &[u8]) -> Result<(), WriteError> {
        if !self.armed {
            return Err(WriteError::NotArmed);
        }
        if self.session_closed {
            return Err(WriteError::SessionClosed);
        }
        if lba != self.next_writable_address {
            return Err(WriteError::NotSequential {
                expected: self.next_writable_address,
                got: lba,
            });
        }

        if let Some(writer) = self.writer.as_mut() {
            let sector_size = if count > 0 { data.len() / count as usize } else { 0 };
            for (i, sector) in data.chunks_exact(sector_size.max(1)).take(count as usize).enumerate()
            {
                writer
                    .write_sector(lba + i as i32, sector)
                    .map_err(WriteError::Io)?;
            }
        }

        // Track which cue-sheet track the write position has reached
        self.next_writable_address += count as i32;
        self.written_sectors += count;
        self.open_track = self
            .tracks
            .iter()
            .rev()
            .find(|t| self.next_writable_address >= t.pregap_start.unwrap_or(t.start))
            .map(|t| t.number);

        Ok(())
    }

    /// Close the given track (0 means the open track)
    pub fn close_track(&mut self, number: u8) -> std::io::Result<()> {
        let number = if number == 0 {
            self.open_track.unwrap_or(0)
        } else {
            number
        };

        log::debug!("closing track {number}");
        if let Some(writer) = self.writer.as_mut() {
            writer.close_track(number)?;
        }
        if self.open_track == Some(number) {
            self.open_track = self
                .tracks
                .iter()
                .find(|t| t.number > number)
                .map(|t| t.number);
        }
        Ok(())
    }

    /// Close the session; further writes are rejected
    pub fn close_session(&mut self) -> std::io::Result<()> {
        log::debug!("closing session after {} written sectors", self.written_sectors);
        if let Some(writer) = self.writer.as_mut() {
            writer.close_session()?;
        }
        self.session_closed = true;
        self.open_track = None;
        Ok(())
    }

    /// Drop all recording state (medium removed)
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.armed = false;
        self.next_writable_address = 0;
        self.written_sectors = 0;
        self.open_track = None;
        self.session_closed = false;
    }
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Failure modes of a sequential write
#[derive(Debug)]
pub enum WriteError {
    /// No cue sheet has been accepted
    NotArmed,
    /// The session is already closed
    SessionClosed,
    /// The write does not start at the next writable address
    NotSequential {
        /// Address the recorder expected
        expected: i32,
        /// Address the command carried
        got: i32,
    },
    /// The attached writer failed
    Io(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal SAO cue sheet: lead-in, one data track, lead-out
    fn simple_cue_sheet() -> Vec<u8> {
        let mut sheet = Vec::new();
        // Lead-in
        sheet.extend_from_slice(&[0x41, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        // Track 1 pregap at 00:00:00 (LBA -150)
        sheet.extend_from_slice(&[0x41, 0x01, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00]);
        // Track 1 data at 00:02:00 (LBA 0)
        sheet.extend_from_slice(&[0x41, 0x01, 0x01, 0x10, 0x00, 0x00, 0x02, 0x00]);
        // Lead-out at 00:30:00
        sheet.extend_from_slice(&[0x41, 0xAA, 0x01, 0x00, 0x00, 0x00, 0x1E, 0x00]);
        sheet
    }

    #[test]
    fn test_parse_cue_sheet() {
        let mut state = RecordingState::new();
        state.parse_cue_sheet(&simple_cue_sheet()).unwrap();

        assert!(state.armed());
        assert_eq!(state.tracks().len(), 1);
        assert_eq!(state.tracks()[0].number, 1);
        assert_eq!(state.tracks()[0].pregap_start, Some(-150));
        assert_eq!(state.tracks()[0].start, 0);
        assert_eq!(state.next_writable_address(), -150);
        assert_eq!(state.open_track(), Some(1));
    }

    #[test]
    fn test_parse_rejects_ragged_sheet() {
        let mut state = RecordingState::new();
        assert!(state.parse_cue_sheet(&[0x41, 0x01, 0x01]).is_err());
        assert!(state.parse_cue_sheet(&[]).is_err());
        assert!(!state.armed());
    }

    #[test]
    fn test_sequential_writes() {
        let mut state = RecordingState::new();
        state.parse_cue_sheet(&simple_cue_sheet()).unwrap();

        let data = vec![0u8; 2048 * 10];
        state.write(-150, 10, &data).unwrap();
        assert_eq!(state.next_writable_address(), -140);
        assert_eq!(state.written_sectors(), 10);

        // Out-of-order write is rejected and advances nothing
        assert!(matches!(
            state.write(0, 1, &data[..2048]),
            Err(WriteError::NotSequential { expected: -140, got: 0 })
        ));
        assert_eq!(state.written_sectors(), 10);
    }

    #[test]
    fn test_write_requires_cue_sheet() {
        let mut state = RecordingState::new();
        assert!(matches!(
            state.write(0, 1, &[0u8; 2048]),
            Err(WriteError::NotArmed)
        ));
    }

    #[test]
    fn test_close_session_stops_writes() {
        let mut state = RecordingState::new();
        state.parse_cue_sheet(&simple_cue_sheet()).unwrap();

        state.write(-150, 150, &vec![0u8; 2048 * 150]).unwrap();
        state.close_track(0).unwrap();
        state.close_session().unwrap();

        assert!(state.session_closed());
        assert!(matches!(
            state.write(0, 1, &[0u8; 2048]),
            Err(WriteError::SessionClosed)
        ));
    }

    #[test]
    fn test_writer_receives_sectors() {
        use std::sync::{Arc, Mutex};

        #[derive(Default)]
        struct Recorder {
            sectors: Arc<Mutex<Vec<i32>>>,
            closed: Arc<Mutex<bool>>,
        }

        impl ImageWriter for Recorder {
            fn write_sector(&mut self, lba: i32, _data: &[u8]) -> std::io::Result<()> {
                self.sectors.lock().unwrap().push(lba);
                Ok(())
            }
            fn close_track(&mut self, _track: u8) -> std::io::Result<()> {
                Ok(())
            }
            fn close_session(&mut self) -> std::io::Result<()> {
                *self.closed.lock().unwrap() = true;
                Ok(())
            }
        }

        let sectors = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(false));

        let mut state = RecordingState::new();
        state.parse_cue_sheet(&simple_cue_sheet()).unwrap();
        state.set_writer(Box::new(Recorder {
            sectors: Arc::clone(&sectors),
            closed: Arc::clone(&closed),
        }));

        state.write(-150, 3, &vec![0u8; 2048 * 3]).unwrap();
        state.close_session().unwrap();

        assert_eq!(*sectors.lock().unwrap(), vec![-150, -149, -148]);
        assert!(*closed.lock().unwrap());
    }
}
