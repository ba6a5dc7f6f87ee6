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

//! CUE/BIN image parser
//!
//! Parses the FILE/TRACK/INDEX/PREGAP/FLAGS/ISRC subset of the cue
//! sheet format. Track extents within the data file are computed from
//! the INDEX addresses: a track's stored data runs from its earliest
//! index to the next track's earliest index (or end of file for the
//! last track). INDEX 00 marks the stored part of the pregap; a PREGAP
//! directive adds a zero-filled fragment in front of it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::disc::{
    AudioFragment, BinaryFragment, Disc, MediumType, NullFragment, SectorMode, Session,
    SessionType, SubchannelFormat, Track, TrackFlags, LEAD_PREGAP,
};
use crate::core::error::ParserError;

/// One TRACK block while scanning the cue sheet
struct CueTrack {
    mode: SectorMode,
    sector_size: usize,
    flags: TrackFlags,
    isrc: Option<String>,
    pregap_sectors: u32,
    index0: Option<u32>,
    index1: Option<u32>,
}

impl CueTrack {
    /// File-relative sector where this track's stored data begins
    fn file_start(&self) -> u32 {
        self.index0.or(self.index1).unwrap_or(0)
    }
}

/// Parser for CUE sheets with BIN data files
pub struct CueParser;

impl super::ImageParser for CueParser {
    fn name(&self) -> &'static str {
        "cue"
    }

    fn can_handle(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("cue")
        )
    }

    fn parse(&self, paths: &[PathBuf]) -> Result<Disc, ParserError> {
        let cue_path = &paths[0];
        let cue_data = std::fs::read_to_string(cue_path)?;

        let bin_path = bin_path_from_cue(cue_path, &cue_data)?;
        let file = Arc::new(File::open(&bin_path)?);
        let size = file.metadata()?.len();

        let parsed = parse_tracks(&cue_data)?;
        let sector_size = parsed[0].sector_size;

        // All tracks of one BIN share the stored sector size
        if parsed.iter().any(|t| t.sector_size != sector_size) {
            return Err(ParserError::Malformed(
                "mixed stored sector sizes in one data file".into(),
            ));
        }

        let file_sectors = (size / sector_size as u64) as u32;
        build_disc(cue_path, &bin_path, file, &parsed, file_sectors)
    }
}

/// Resolve the FILE directive against the cue sheet's directory
fn bin_path_from_cue(cue_path: &Path, cue_data: &str) -> Result<PathBuf, ParserError> {
    for line in cue_data.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("FILE") {
            let name = rest
                .split('"')
                .nth(1)
                .ok_or_else(|| ParserError::Malformed("unquoted FILE directive".into()))?;
            let path = match cue_path.parent() {
                Some(parent) => parent.join(name),
                None => PathBuf::from(name),
            };
            return Ok(path);
        }
    }

    Err(ParserError::Malformed(
        "no FILE directive found in cue sheet".into(),
    ))
}

/// Scan the cue sheet into per-track descriptors
fn parse_tracks(cue_data: &str) -> Result<Vec<CueTrack>, ParserError> {
    let mut tracks: Vec<CueTrack> = Vec::new();

    for line in cue_data.lines() {
        let line = line.trim();
        let mut words = line.split_whitespace();

        match words.next() {
            Some("TRACK") => {
                let _number = words.next();
                let type_str = words
                    .next()
                    .ok_or_else(|| ParserError::Malformed("TRACK without a type".into()))?;
                let (mode, sector_size) = parse_track_type(type_str)?;
                tracks.push(CueTrack {
                    mode,
                    sector_size,
                    flags: TrackFlags::empty(),
                    isrc: None,
                    pregap_sectors: 0,
                    index0: None,
                    index1: None,
                });
            }
            Some("INDEX") => {
                let track = tracks
                    .last_mut()
                    .ok_or_else(|| ParserError::Malformed("INDEX before any TRACK".into()))?;
                let number: u8 = words
                    .next()
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| ParserError::Malformed("bad INDEX number".into()))?;
                let address = parse_msf(words.next().unwrap_or(""))?;
                match number {
                    0 => track.index0 = Some(address),
                    1 => track.index1 = Some(address),
                    _ => {} // higher indices are ignored by this parser
                }
            }
            Some("PREGAP") => {
                let track = tracks
                    .last_mut()
                    .ok_or_else(|| ParserError::Malformed("PREGAP before any TRACK".into()))?;
                track.pregap_sectors = parse_msf(words.next().unwrap_or(""))?;
            }
            Some("FLAGS") => {
                if let Some(track) = tracks.last_mut() {
                    for flag in words {
                        match flag {
                            "DCP" => track.flags |= TrackFlags::COPY_PERMITTED,
                            "4CH" => track.flags |= TrackFlags::FOUR_CHANNEL,
                            "PRE" => track.flags |= TrackFlags::PRE_EMPHASIS,
                            _ => {}
                        }
                    }
                }
            }
            Some("ISRC") => {
                if let Some(track) = tracks.last_mut() {
                    track.isrc = words.next().map(str::to_owned);
                }
            }
            _ => {}
        }
    }

    if tracks.is_empty() {
        return Err(ParserError::Malformed("cue sheet declares no tracks".into()));
    }
    Ok(tracks)
}

/// Assemble the disc from scanned track descriptors
fn build_disc(
    cue_path: &Path,
    bin_path: &Path,
    file: Arc<File>,
    parsed: &[CueTrack],
    file_sectors: u32,
) -> Result<Disc, ParserError> {
    let mut tracks = Vec::with_capacity(parsed.len());
    let all_audio = parsed.iter().all(|t| t.mode == SectorMode::Audio);
    let any_mode2 = parsed.iter().any(|t| {
        matches!(
            t.mode,
            SectorMode::Mode2 | SectorMode::Mode2Form1 | SectorMode::Mode2Form2 | SectorMode::Mode2Mixed
        )
    });

    for (i, entry) in parsed.iter().enumerate() {
        let file_start = entry.file_start();
        let file_end = parsed
            .get(i + 1)
            .map(|next| next.file_start())
            .unwrap_or(file_sectors);
        if file_end < file_start {
            return Err(ParserError::Malformed(format!(
                "track {} starts after the following track",
                i + 1
            )));
        }
        let stored_len = file_end - file_start;

        let mut track = Track::new(entry.mode, entry.flags);
        track.isrc = entry.isrc.clone();

        // Zero-filled pregap pieces come first: the implicit 2-second
        // lead gap for track 1, then any PREGAP directive.
        let mut pregap = 0u32;
        if i == 0 {
            track.push_fragment(Box::new(NullFragment::new(LEAD_PREGAP, entry.sector_size)));
            pregap += LEAD_PREGAP;
        }
        if entry.pregap_sectors > 0 {
            track.push_fragment(Box::new(NullFragment::new(
                entry.pregap_sectors,
                entry.sector_size,
            )));
            pregap += entry.pregap_sectors;
        }

        // Stored pregap (INDEX 00 .. INDEX 01) is part of this track
        if let (Some(i0), Some(i1)) = (entry.index0, entry.index1) {
            pregap += i1.saturating_sub(i0);
        }

        if stored_len > 0 {
            let offset = u64::from(file_start) * entry.sector_size as u64;
            let fragment: Box<dyn crate::core::disc::Fragment> =
                if entry.mode == SectorMode::Audio {
                    Box::new(AudioFragment::new(
                        Arc::clone(&file),
                        offset,
                        stored_len,
                        0,
                        SubchannelFormat::None,
                        false,
                    )?)
                } else {
                    Box::new(BinaryFragment::new(
                        Arc::clone(&file),
                        offset,
                        stored_len,
                        entry.sector_size,
                        0,
                        SubchannelFormat::None,
                    )?)
                };
            track.push_fragment(fragment);
        }

        track.pregap = pregap;
        tracks.push(track);
    }

    let session_type = if all_audio {
        SessionType::CdDa
    } else if any_mode2 {
        SessionType::CdXa
    } else {
        SessionType::CdDa
    };

    log::debug!(
        "{}: {} track(s) over {} ({} sectors)",
        cue_path.display(),
        tracks.len(),
        bin_path.display(),
        file_sectors
    );

    let session = Session::new(session_type, tracks);
    Disc::new(
        MediumType::Cd,
        vec![session],
        vec![cue_path.to_path_buf(), bin_path.to_path_buf()],
    )
}

/// Map a cue TRACK type to a sector mode and stored sector size
fn parse_track_type(s: &str) -> Result<(SectorMode, usize), ParserError> {
    match s {
        "AUDIO" => Ok((SectorMode::Audio, 2352)),
        "MODE1/2048" => Ok((SectorMode::Mode1, 2048)),
        "MODE1/2352" => Ok((SectorMode::Mode1, 2352)),
        "MODE2/2336" => Ok((SectorMode::Mode2, 2336)),
        "MODE2/2352" => Ok((SectorMode::Mode2Mixed, 2352)),
        other => Err(ParserError::Malformed(format!(
            "unsupported track type '{other}'"
        ))),
    }
}

/// Parse an MM:SS:FF cue address into a sector count
fn parse_msf(msf: &str) -> Result<u32, ParserError> {
    let parts: Vec<&str> = msf.split(':').collect();
    if parts.len() != 3 {
        return Err(ParserError::Malformed(format!("invalid MSF '{msf}'")));
    }

    let minute: u32 = parts[0]
        .parse()
        .map_err(|_| ParserError::Malformed(format!("invalid minute in '{msf}'")))?;
    let second: u32 = parts[1]
        .parse()
        .map_err(|_| ParserError::Malformed(format!("invalid second in '{msf}'")))?;
    let frame: u32 = parts[2]
        .parse()
        .map_err(|_| ParserError::Malformed(format!("invalid frame in '{msf}'")))?;

    Ok((minute * 60 + second) * 75 + frame)
}
