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

//! Userspace side of the VHBA control device
//!
//! The kernel writes one request frame per SCSI command to the control
//! device and reads one response frame back. Frames are little-endian
//! C structs; the request header is followed by the outgoing payload
//! for write-direction commands, the response header by the response
//! payload. Request and response share one buffer, which is safe here
//! because the request payload is copied out before the first response
//! byte is produced.
//!
//! The I/O loop polls with a one-second tick so the shutdown flag is
//! observed promptly; thirty silent ticks raise the device-inactive
//! event for the supervisor.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use super::{Command, DeviceEvent, DeviceState};

/// CDB bytes carried in a request frame
pub const MAX_COMMAND_SIZE: usize = 16;

/// Request header size on the wire (C struct layout, padding included)
pub const REQUEST_HEADER_SIZE: usize = 32;

/// Response header size on the wire
pub const RESPONSE_HEADER_SIZE: usize = 12;

/// Largest sense payload the buffer reserves room for
const MAX_SENSE: usize = 256;

/// Kernel-side transfer limit in 512-byte sectors
const MAX_SECTORS: usize = 256;

/// Seconds of silence before the watchdog reports inactivity
const WATCHDOG_SECS: u32 = 30;

/// Round a byte count up to 512-byte sectors
const fn to_sectors(len: usize) -> usize {
    len.div_ceil(512)
}

/// Size of the shared request/response buffer
pub const fn buffer_size() -> usize {
    512 * (MAX_SECTORS + to_sectors(MAX_SENSE + RESPONSE_HEADER_SIZE))
}

/// One request frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VhbaRequest {
    /// Opaque tag, echoed in the response
    pub tag: u32,
    /// Logical unit number
    pub lun: u32,
    /// Command descriptor block, zero-padded
    pub cdb: [u8; MAX_COMMAND_SIZE],
    /// Valid CDB bytes (6, 10, 12 or 16)
    pub cdb_len: u8,
    /// Payload bytes that follow (data-out), or the transfer size
    /// expected back (data-in)
    pub data_len: u32,
}

impl VhbaRequest {
    /// Parse a request header from the start of `buf`
    ///
    /// Returns `None` for frames shorter than the header; the caller
    /// logs and keeps the loop running, matching the kernel's retry
    /// behavior.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return None;
        }

        let mut cdb = [0u8; MAX_COMMAND_SIZE];
        cdb.copy_from_slice(&buf[8..24]);

        Some(Self {
            tag: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            lun: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            cdb,
            cdb_len: buf[24],
            // Three bytes of struct padding sit between cdb_len and
            // data_len
            data_len: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        })
    }

    /// Serialize the header into the start of `buf` (tests and tools)
    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.tag.to_le_bytes());
        buf[4..8].copy_from_slice(&self.lun.to_le_bytes());
        buf[8..24].copy_from_slice(&self.cdb);
        buf[24] = self.cdb_len;
        buf[25..28].fill(0);
        buf[28..32].copy_from_slice(&self.data_len.to_le_bytes());
    }
}

/// One response frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VhbaResponse {
    /// Tag copied from the request
    pub tag: u32,
    /// SCSI status byte
    pub status: u32,
    /// Payload bytes that follow
    pub data_len: u32,
}

impl VhbaResponse {
    /// Serialize the header into the start of `buf`
    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.tag.to_le_bytes());
        buf[4..8].copy_from_slice(&self.status.to_le_bytes());
        buf[8..12].copy_from_slice(&self.data_len.to_le_bytes());
    }

    /// Parse a response header (tests and tools)
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < RESPONSE_HEADER_SIZE {
            return None;
        }
        Some(Self {
            tag: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            status: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            data_len: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        })
    }
}

/// Start the per-device I/O thread
pub(crate) fn spawn_io_thread(
    number: u32,
    file: File,
    state: Arc<Mutex<DeviceState>>,
    shutdown: Arc<AtomicBool>,
    events: Sender<DeviceEvent>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("vdrive-io-{number}"))
        .spawn(move || io_loop(number, file, state, shutdown, events))
        .expect("failed to spawn I/O thread")
}

/// Request/response loop over the control device
fn io_loop(
    number: u32,
    mut file: File,
    state: Arc<Mutex<DeviceState>>,
    shutdown: Arc<AtomicBool>,
    events: Sender<DeviceEvent>,
) {
    let mut buf = vec![0u8; buffer_size()];
    let mut idle_ticks = 0u32;

    log::debug!("device {number}: I/O loop running");

    while !shutdown.load(Ordering::Acquire) {
        let ready = {
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
            poll(&mut fds, PollTimeout::from(1000u16))
        };

        match ready {
            Ok(0) => {
                idle_ticks += 1;
                if idle_ticks >= WATCHDOG_SECS {
                    idle_ticks = 0;
                    log::debug!("device {number}: inactive for {WATCHDOG_SECS} s");
                    let _ = events.send(DeviceEvent::Inactive { device: number });
                }
                continue;
            }
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => {
                log::error!("device {number}: poll on control device failed: {e}");
                break;
            }
        }

        let read = match file.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("device {number}: failed to read request: {e}");
                continue;
            }
        };
        idle_ticks = 0;

        let Some(request) = VhbaRequest::parse(&buf[..read]) else {
            log::warn!(
                "device {number}: short frame ({read} bytes; at least {REQUEST_HEADER_SIZE} required)"
            );
            continue;
        };
        log::trace!(
            "device {number}: request tag {}, cmd {:02X}h, data len {}",
            request.tag,
            request.cdb[0],
            request.data_len
        );

        // Copy the outgoing payload before the response overwrites the
        // shared buffer
        let in_end = REQUEST_HEADER_SIZE
            + (request.data_len as usize).min(read.saturating_sub(REQUEST_HEADER_SIZE));
        let data_in = buf[REQUEST_HEADER_SIZE..in_end].to_vec();

        // The response area covers the requested transfer, plus room
        // for sense data even on commands that transfer nothing
        let out_cap = (request.data_len as usize)
            .max(MAX_SENSE)
            .min(buffer_size() - RESPONSE_HEADER_SIZE);
        let cdb_len = usize::from(request.cdb_len).min(MAX_COMMAND_SIZE);

        let (status, out_len) = {
            let out = &mut buf[RESPONSE_HEADER_SIZE..RESPONSE_HEADER_SIZE + out_cap];
            let mut command = Command::new(&request.cdb[..cdb_len], &data_in, out);
            let status = state.lock().unwrap().execute_command(&mut command);
            (status, command.out_len())
        };

        VhbaResponse {
            tag: request.tag,
            status,
            data_len: out_len as u32,
        }
        .encode(&mut buf[..RESPONSE_HEADER_SIZE]);

        if let Err(e) = file.write_all(&buf[..RESPONSE_HEADER_SIZE + out_len]) {
            log::warn!("device {number}: failed to write response: {e}");
            continue;
        }
        log::trace!(
            "device {number}: response tag {}, status {status}, {out_len} byte(s)",
            request.tag
        );
    }

    log::debug!("device {number}: I/O loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size() {
        // 256 data sectors plus one sector for sense and header
        assert_eq!(buffer_size(), 512 * 257);
    }

    #[test]
    fn test_request_roundtrip() {
        let mut cdb = [0u8; MAX_COMMAND_SIZE];
        cdb[0] = 0x28;
        cdb[8] = 0x10;
        let request = VhbaRequest {
            tag: 0xDEAD_BEEF,
            lun: 3,
            cdb,
            cdb_len: 10,
            data_len: 0x8000,
        };

        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        request.encode(&mut buf);
        assert_eq!(VhbaRequest::parse(&buf), Some(request));
    }

    #[test]
    fn test_request_field_offsets() {
        let request = VhbaRequest {
            tag: 0x0403_0201,
            lun: 0,
            cdb: [0u8; MAX_COMMAND_SIZE],
            cdb_len: 12,
            data_len: 0x0807_0605,
        };
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        request.encode(&mut buf);

        // Little-endian fields at the C struct offsets
        assert_eq!(&buf[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buf[24], 12);
        assert_eq!(&buf[25..28], &[0, 0, 0]);
        assert_eq!(&buf[28..32], &[0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn test_short_frame_rejected() {
        let buf = [0u8; REQUEST_HEADER_SIZE - 1];
        assert!(VhbaRequest::parse(&buf).is_none());
    }

    #[test]
    fn test_response_roundtrip() {
        let response = VhbaResponse {
            tag: 42,
            status: 2,
            data_len: 18,
        };
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        response.encode(&mut buf);
        assert_eq!(VhbaResponse::parse(&buf), Some(response));
    }

    mod live {
        use super::*;
        use crate::core::audio::NullSink;
        use std::io::{Read, Write};
        use std::os::unix::net::UnixStream;
        use std::sync::mpsc::channel;

        /// Run the I/O loop against a socketpair standing in for the
        /// control device
        fn transport() -> (UnixStream, Arc<AtomicBool>, JoinHandle<()>) {
            let (kernel_side, daemon_side) = UnixStream::pair().expect("socketpair");
            let file = File::from(std::os::fd::OwnedFd::from(daemon_side));

            let state = Arc::new(Mutex::new(DeviceState::new(
                0,
                Arc::new(|| Box::new(NullSink) as Box<dyn crate::core::audio::PcmSink>),
            )));
            let shutdown = Arc::new(AtomicBool::new(false));
            let (events, _rx) = channel();

            let handle = spawn_io_thread(0, file, state, Arc::clone(&shutdown), events);
            (kernel_side, shutdown, handle)
        }

        fn send_request(stream: &mut UnixStream, tag: u32, cdb: &[u8], data_len: u32) {
            let mut frame = vec![0u8; REQUEST_HEADER_SIZE];
            let mut padded = [0u8; MAX_COMMAND_SIZE];
            padded[..cdb.len()].copy_from_slice(cdb);
            VhbaRequest {
                tag,
                lun: 0,
                cdb: padded,
                cdb_len: cdb.len() as u8,
                data_len,
            }
            .encode(&mut frame);
            stream.write_all(&frame).expect("write request");
        }

        fn read_response(stream: &mut UnixStream) -> (VhbaResponse, Vec<u8>) {
            let mut buf = vec![0u8; buffer_size()];
            let read = stream.read(&mut buf).expect("read response");
            let response = VhbaResponse::parse(&buf[..read]).expect("response header");
            let payload = buf[RESPONSE_HEADER_SIZE..read].to_vec();
            assert_eq!(payload.len(), response.data_len as usize);
            (response, payload)
        }

        #[test]
        fn test_inquiry_over_the_wire() {
            let (mut stream, shutdown, handle) = transport();

            // INQUIRY passes the power-on unit attention by definition
            send_request(&mut stream, 7, &[0x12, 0, 0, 0, 96, 0], 96);
            let (response, payload) = read_response(&mut stream);

            assert_eq!(response.tag, 7);
            assert_eq!(response.status, 0);
            assert_eq!(payload.len(), 96);
            assert_eq!(payload[0], 0x05);

            shutdown.store(true, Ordering::Release);
            handle.join().unwrap();
        }

        #[test]
        fn test_check_condition_carries_sense() {
            let (mut stream, shutdown, handle) = transport();

            // TEST UNIT READY hits the power-on unit attention first
            send_request(&mut stream, 1, &[0x00, 0, 0, 0, 0, 0], 0);
            let (response, payload) = read_response(&mut stream);
            assert_eq!(response.tag, 1);
            assert_eq!(response.status, 2);
            assert_eq!(payload.len(), 18);
            assert_eq!(payload[0], 0x70);
            assert_eq!(payload[2] & 0x0F, 0x06); // unit attention

            // Then reports the missing medium
            send_request(&mut stream, 2, &[0x00, 0, 0, 0, 0, 0], 0);
            let (response, payload) = read_response(&mut stream);
            assert_eq!(response.status, 2);
            assert_eq!(payload[2] & 0x0F, 0x02); // not ready
            assert_eq!(payload[12], 0x3A);

            shutdown.store(true, Ordering::Release);
            handle.join().unwrap();
        }

        #[test]
        fn test_short_frame_is_dropped() {
            let (mut stream, shutdown, handle) = transport();

            // A truncated frame is logged and skipped, the loop stays up
            stream.write_all(&[0u8; 8]).expect("write");
            send_request(&mut stream, 9, &[0x12, 0, 0, 0, 36, 0], 36);
            let (response, _) = read_response(&mut stream);
            assert_eq!(response.tag, 9);

            shutdown.store(true, Ordering::Release);
            handle.join().unwrap();
        }
    }
}
