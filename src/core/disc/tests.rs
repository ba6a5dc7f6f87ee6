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

//! Tests for the disc model

use proptest::prelude::*;

use super::*;

/// Single-session Mode-1 disc backed by zero fragments
fn data_disc(sectors: u32) -> Disc {
    let mut track = Track::new(SectorMode::Mode1, TrackFlags::empty());
    track.pregap = LEAD_PREGAP;
    track.push_fragment(Box::new(NullFragment::new(LEAD_PREGAP, 2048)));
    track.push_fragment(Box::new(NullFragment::new(sectors, 2048)));

    let session = Session::new(SessionType::CdDa, vec![track]);
    Disc::new(MediumType::Cd, vec![session], vec![]).expect("disc")
}

/// Disc with one audio and one data track
fn mixed_disc(audio_sectors: u32, data_sectors: u32) -> Disc {
    let mut audio = Track::new(SectorMode::Audio, TrackFlags::COPY_PERMITTED);
    audio.pregap = LEAD_PREGAP;
    audio.push_fragment(Box::new(NullFragment::new(LEAD_PREGAP, 2352)));
    audio.push_fragment(Box::new(NullFragment::new(audio_sectors, 2352)));

    let mut data = Track::new(SectorMode::Mode1, TrackFlags::empty());
    data.push_fragment(Box::new(NullFragment::new(data_sectors, 2048)));

    let session = Session::new(SessionType::CdDa, vec![audio, data]);
    Disc::new(MediumType::Cd, vec![session], vec![]).expect("disc")
}

#[test]
fn test_layout_single_track() {
    let disc = data_disc(600);

    assert_eq!(disc.start_sector, -150);
    assert_eq!(disc.capacity(), 600);

    let track = disc.first_track();
    assert_eq!(track.number, 1);
    assert_eq!(track.base, -150);
    assert_eq!(track.start(), 0);
    assert_eq!(track.end(), 600);
}

#[test]
fn test_layout_rejects_empty_disc() {
    assert!(Disc::new(MediumType::Cd, vec![], vec![]).is_err());

    let session = Session::new(SessionType::CdDa, vec![]);
    assert!(Disc::new(MediumType::Cd, vec![session], vec![]).is_err());
}

#[test]
fn test_toc_single_track() {
    let disc = data_disc(600);
    let toc = disc.toc();

    assert_eq!(toc.first_track, 1);
    assert_eq!(toc.last_track, 1);
    assert_eq!(toc.entries.len(), 1);
    assert_eq!(toc.entries[0].start, 0);
    assert_eq!(toc.entries[0].adr_control, 0x14);
    assert_eq!(toc.leadout, 600);
}

#[test]
fn test_toc_mixed_disc() {
    let disc = mixed_disc(1000, 500);
    let toc = disc.toc();

    assert_eq!(toc.first_track, 1);
    assert_eq!(toc.last_track, 2);
    // Audio track: ADR 1, copy permitted
    assert_eq!(toc.entries[0].adr_control, 0x12);
    assert_eq!(toc.entries[0].start, 0);
    // Data track follows the audio track directly
    assert_eq!(toc.entries[1].adr_control, 0x14);
    assert_eq!(toc.entries[1].start, 1000);
    assert_eq!(toc.leadout, 1500);
}

#[test]
fn test_track_of_and_session_of() {
    let disc = mixed_disc(1000, 500);

    assert_eq!(disc.track_of(0).unwrap().number, 1);
    assert_eq!(disc.track_of(999).unwrap().number, 1);
    assert_eq!(disc.track_of(1000).unwrap().number, 2);
    assert_eq!(disc.track_of(1499).unwrap().number, 2);
    assert!(disc.track_of(1500).is_none());

    let session = disc.session_of(500).unwrap();
    assert_eq!(session.number, 1);
    assert_eq!(session.first_track_number, 1);
}

#[test]
fn test_first_track_of_session_invariant() {
    let disc = mixed_disc(300, 300);
    for session in &disc.sessions {
        let first = &session.tracks[0];
        assert_eq!(
            disc.track_of(first.start()).unwrap().number,
            session.first_track_number
        );
    }
}

#[test]
fn test_multi_session_layout() {
    let mut t1 = Track::new(SectorMode::Mode1, TrackFlags::empty());
    t1.pregap = LEAD_PREGAP;
    t1.push_fragment(Box::new(NullFragment::new(LEAD_PREGAP + 300, 2048)));

    let mut t2 = Track::new(SectorMode::Mode1, TrackFlags::empty());
    t2.push_fragment(Box::new(NullFragment::new(200, 2048)));

    let s1 = Session::new(SessionType::CdDa, vec![t1]);
    let s2 = Session::new(SessionType::CdXa, vec![t2]);
    let disc = Disc::new(MediumType::Cd, vec![s1, s2], vec![]).expect("disc");

    assert_eq!(disc.sessions[0].number, 1);
    assert_eq!(disc.sessions[1].number, 2);
    assert_eq!(disc.sessions[1].first_track_number, 2);

    // Second session starts after the first session's lead-out
    let t2 = disc.track_by_number(2).unwrap();
    assert_eq!(t2.base, 300 + Session::LEADOUT_FIRST as i32);

    // Total length = tracks + both lead-outs
    assert_eq!(
        disc.length(),
        LEAD_PREGAP + 300 + 200 + Session::LEADOUT_FIRST + Session::LEADOUT_LATER
    );
}

#[test]
fn test_sector_at_pregap_and_bounds() {
    let disc = data_disc(600);

    // Implicit pregap is addressable from inside the model
    let sector = disc.sector_at(-150).unwrap();
    assert_eq!(sector.mode(), SectorMode::Mode1);

    assert!(disc.sector_at(0).is_ok());
    assert!(disc.sector_at(599).is_ok());
    assert!(matches!(
        disc.sector_at(600),
        Err(SectorError::NoSector(600))
    ));
}

#[test]
fn test_sector_q_reflects_track() {
    let disc = mixed_disc(1000, 500);

    let q = disc.sector_at(1000).unwrap().q_subchannel();
    assert_eq!(q[0], 0x41); // data track, ADR 1
    assert_eq!(q[1], 0x02); // track 2
    assert_eq!(q[2], 0x01); // index 1
    assert_eq!(q[3], 0x00); // relative 00:00:00
    assert_eq!(q[4], 0x00);
    assert_eq!(q[5], 0x00);
}

#[test]
fn test_index_at() {
    let mut track = Track::new(SectorMode::Audio, TrackFlags::empty());
    track.pregap = LEAD_PREGAP;
    track.push_fragment(Box::new(NullFragment::new(LEAD_PREGAP + 1000, 2352)));
    track.indices.push(TrackIndex {
        number: 2,
        address: 500,
    });

    let session = Session::new(SessionType::CdDa, vec![track]);
    let disc = Disc::new(MediumType::Cd, vec![session], vec![]).expect("disc");
    let track = disc.first_track();

    assert_eq!(track.index_at(-10), 0);
    assert_eq!(track.index_at(0), 1);
    assert_eq!(track.index_at(499), 1);
    assert_eq!(track.index_at(500), 2);
}

#[test]
fn test_dvd_layout_starts_at_zero() {
    let mut track = Track::new(SectorMode::Mode1, TrackFlags::empty());
    track.push_fragment(Box::new(NullFragment::new(600, 2048)));

    let session = Session::new(SessionType::CdDa, vec![track]);
    let disc = Disc::new(MediumType::Dvd, vec![session], vec![]).expect("disc");

    assert_eq!(disc.start_sector, 0);
    assert_eq!(disc.first_track().base, 0);
    assert_eq!(disc.capacity(), 600);
}

#[test]
fn test_msf_conversions() {
    assert_eq!(msf_of_lba(0), (0, 2, 0));
    assert_eq!(msf_of_lba(-150), (0, 0, 0));
    assert_eq!(lba_of_msf(0, 2, 0), 0);
    assert_eq!(lba_of_msf(1, 0, 0), 4350);
    assert_eq!(bcd_to_dec(dec_to_bcd(59)), 59);
}

proptest! {
    /// Every address inside the capacity yields a sector whose user
    /// data has the length prescribed by the track mode.
    #[test]
    fn prop_every_lba_synthesizes(sectors in 1u32..2000) {
        let disc = data_disc(sectors);
        for lba in [0, (sectors as i32 - 1) / 2, sectors as i32 - 1] {
            let sector = disc.sector_at(lba).unwrap();
            let mut out = Vec::new();
            sector
                .extract(
                    MainChannelSelection::USER_DATA,
                    C2Selection::None,
                    SubchannelSelection::None,
                    &mut out,
                )
                .unwrap();
            prop_assert_eq!(out.len(), 2048);
        }
    }

    /// MSF and LBA conversions are inverse within the CD address range.
    #[test]
    fn prop_msf_lba_roundtrip(lba in -150i32..400_000) {
        let (m, s, f) = msf_of_lba(lba);
        prop_assert_eq!(lba_of_msf(m, s, f), lba);
    }

    /// Track boundaries partition the layout: each address belongs to
    /// exactly one track.
    #[test]
    fn prop_tracks_partition(audio in 1u32..1000, data in 1u32..1000) {
        let disc = mixed_disc(audio, data);
        let boundary = audio as i32;
        prop_assert_eq!(disc.track_of(boundary - 1).unwrap().number, 1);
        prop_assert_eq!(disc.track_of(boundary).unwrap().number, 2);
    }
}
