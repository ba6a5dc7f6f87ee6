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

//! End-to-end tests: daemon → device → parser → command interpreter
//!
//! These drive a real image file on disk through the public API, the
//! way the RPC facade and the kernel transport do.

use std::io::Write;
use std::path::PathBuf;

use vdrive::core::daemon::{Daemon, DaemonConfig};
use vdrive::core::device::Device;

/// Write an ISO image of `sectors` zero sectors, tagged per sector
fn write_iso(sectors: usize) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("image.iso");
    let mut file = std::fs::File::create(&path).expect("create iso");
    for i in 0..sectors {
        let mut sector = vec![0u8; 2048];
        sector[0] = (i & 0xFF) as u8;
        sector[1] = ((i >> 8) & 0xFF) as u8;
        file.write_all(&sector).expect("write sector");
    }
    (dir, path)
}

/// Run one command against the device and return status plus payload
fn exec(device: &Device, cdb: &[u8]) -> (u32, Vec<u8>) {
    let mut out = vec![0u8; 64 * 1024];
    let (status, len) = device.execute(cdb, &[], &mut out);
    (status, out[..len].to_vec())
}

#[test]
fn test_load_probe_read_unload() {
    let (_dir, iso) = write_iso(600);

    let daemon = Daemon::new(DaemonConfig::default());
    let device = daemon.device(0).expect("device 0");

    // Load through the parser registry
    device.load(&[iso.clone()]).expect("load");
    let (loaded, files) = device.status();
    assert!(loaded);
    assert_eq!(files, vec![iso.display().to_string()]);

    // Loading again fails and leaves the disc alone
    assert!(device.load(&[iso]).is_err());

    // Consume the pending unit attention
    let (status, _) = exec(device, &[0x00, 0, 0, 0, 0, 0]);
    assert_eq!(status, 2);

    // READ CAPACITY sees all 600 sectors
    let (status, data) = exec(device, &[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(status, 0);
    assert_eq!(u32::from_be_bytes(data[0..4].try_into().unwrap()), 599);

    // READ(10) returns the stored bytes
    let (status, data) = exec(device, &[0x28, 0, 0, 0, 0, 123, 0, 0, 2, 0]);
    assert_eq!(status, 0);
    assert_eq!(data.len(), 2 * 2048);
    assert_eq!(data[0], 123);
    assert_eq!(data[2048], 124);

    // Unload; the next read reports no medium
    device.unload(false).expect("unload");
    let (loaded, files) = device.status();
    assert!(!loaded);
    assert!(files.is_empty());

    let (status, data) = exec(device, &[0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0]);
    assert_eq!(status, 2);
    assert_eq!(data[2] & 0x0F, 0x02);
    assert_eq!(data[12], 0x3A);
}

#[test]
fn test_cue_bin_image_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bin_path = dir.path().join("game.bin");
    std::fs::write(&bin_path, vec![0u8; 300 * 2352]).expect("bin");
    let cue_path = dir.path().join("game.cue");
    std::fs::write(
        &cue_path,
        "FILE \"game.bin\" BINARY\n  TRACK 01 MODE1/2352\n    INDEX 01 00:00:00\n",
    )
    .expect("cue");

    let daemon = Daemon::new(DaemonConfig::default());
    let device = daemon.device(0).expect("device 0");
    device.load(&[cue_path]).expect("load");

    let (status, _) = exec(device, &[0x00, 0, 0, 0, 0, 0]);
    assert_eq!(status, 2); // unit attention

    // Raw READ CD over the full sector layout
    let mut cdb = [0u8; 12];
    cdb[0] = 0xBE;
    cdb[8] = 1;
    cdb[9] = 0xF8;
    let (status, data) = exec(device, &cdb);
    assert_eq!(status, 0);
    assert_eq!(data.len(), 2352);
}

#[test]
fn test_unsupported_image_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("image.xyz");
    std::fs::write(&path, b"not an image").expect("write");

    let daemon = Daemon::new(DaemonConfig::default());
    let device = daemon.device(0).expect("device 0");

    assert!(device.load(&[path]).is_err());
    let (loaded, _) = device.status();
    assert!(!loaded);
}

#[test]
fn test_per_device_isolation() {
    let (_dir, iso) = write_iso(100);

    let config = DaemonConfig {
        num_devices: 2,
        ..Default::default()
    };
    let daemon = Daemon::new(config);

    daemon.device(0).unwrap().load(&[iso]).expect("load");

    let (loaded, _) = daemon.device(0).unwrap().status();
    assert!(loaded);
    let (loaded, _) = daemon.device(1).unwrap().status();
    assert!(!loaded);
}
