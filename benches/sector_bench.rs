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

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use vdrive::core::disc::sector::{edc_checksum, q_crc};
use vdrive::core::disc::{
    C2Selection, Disc, MainChannelSelection, MediumType, NullFragment, SectorMode, Session,
    SessionType, SubchannelSelection, Track, TrackFlags, LEAD_PREGAP,
};

fn bench_disc(sectors: u32) -> Disc {
    let mut track = Track::new(SectorMode::Mode1, TrackFlags::empty());
    track.pregap = LEAD_PREGAP;
    track.push_fragment(Box::new(NullFragment::new(LEAD_PREGAP, 2048)));
    track.push_fragment(Box::new(NullFragment::new(sectors, 2048)));
    let session = Session::new(SessionType::CdDa, vec![track]);
    Disc::new(MediumType::Cd, vec![session], vec![]).unwrap()
}

fn sector_synthesis_benchmark(c: &mut Criterion) {
    let disc = bench_disc(10_000);

    c.bench_function("sector_user_data", |b| {
        let mut out = Vec::with_capacity(2048);
        b.iter(|| {
            let sector = disc.sector_at(black_box(5000)).unwrap();
            out.clear();
            sector
                .extract(
                    MainChannelSelection::USER_DATA,
                    C2Selection::None,
                    SubchannelSelection::None,
                    &mut out,
                )
                .unwrap();
            black_box(out.len());
        });
    });

    c.bench_function("sector_full_raw_with_subchannel", |b| {
        let mut out = Vec::with_capacity(2352 + 96);
        b.iter(|| {
            let sector = disc.sector_at(black_box(5000)).unwrap();
            out.clear();
            sector
                .extract(
                    MainChannelSelection::SYNC
                        | MainChannelSelection::HEADER
                        | MainChannelSelection::USER_DATA
                        | MainChannelSelection::EDC_ECC,
                    C2Selection::None,
                    SubchannelSelection::RawPw,
                    &mut out,
                )
                .unwrap();
            black_box(out.len());
        });
    });
}

fn checksum_benchmark(c: &mut Criterion) {
    c.bench_function("q_crc", |b| {
        let q = [0x41u8, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00];
        b.iter(|| black_box(q_crc(black_box(&q))));
    });

    c.bench_function("edc_2064", |b| {
        let data = vec![0x5Au8; 2064];
        b.iter(|| black_box(edc_checksum(black_box(&data))));
    });
}

criterion_group!(benches, sector_synthesis_benchmark, checksum_benchmark);
criterion_main!(benches);
