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

//! Track fragments
//!
//! A fragment describes a contiguous run of sectors backed by a byte
//! stream: either nothing at all (pregap silence), a slice of an image
//! file, or a slice of an audio file whose samples may need byte
//! swapping. Tracks are ordered sequences of fragments; the disc layout
//! never touches files directly, it always goes through a fragment.
//!
//! Reads past the end of the backing file zero-fill the remainder and
//! report the number of stored bytes, so truncated images stay
//! readable. The caller decides whether a short read is an error.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use crate::core::error::ParserError;

/// Layout of subchannel data attached to a fragment's sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubchannelFormat {
    /// No stored subchannel data
    None,
    /// 16 bytes of Q subchannel per sector
    Q16,
    /// 96 bytes of interleaved PW subchannel per sector
    Pw96,
}

/// A contiguous run of sectors backed by one byte stream
///
/// `index` arguments are sector indices relative to the start of the
/// fragment, not disc addresses.
pub trait Fragment: Send + Sync {
    /// Number of sectors this fragment covers
    fn length(&self) -> u32;

    /// Stored main-channel bytes per sector (0, 2048, 2324, 2336 or 2352)
    fn main_sector_size(&self) -> usize;

    /// Stored subchannel bytes per sector (0, 16 or 96)
    fn subchannel_sector_size(&self) -> usize;

    /// Layout of the stored subchannel data
    fn subchannel_format(&self) -> SubchannelFormat;

    /// Read the main-channel bytes of one sector into `buf`
    ///
    /// `buf` must be `main_sector_size()` bytes. Returns the number of
    /// bytes that came from storage; the rest of `buf` is zero-filled.
    fn read_main(&self, index: u32, buf: &mut [u8]) -> Result<usize, ParserError>;

    /// Read the stored subchannel bytes of one sector into `buf`
    ///
    /// `buf` must be `subchannel_sector_size()` bytes. Returns the
    /// number of bytes that came from storage.
    fn read_subchannel(&self, index: u32, buf: &mut [u8]) -> Result<usize, ParserError>;
}

/// Fragment producing zero-filled sectors (pregaps, lead-in emulation)
#[derive(Debug)]
pub struct NullFragment {
    length: u32,
    sector_size: usize,
}

impl NullFragment {
    /// Create a zero-producing fragment covering `length` sectors
    pub fn new(length: u32, sector_size: usize) -> Self {
        Self {
            length,
            sector_size,
        }
    }
}

impl Fragment for NullFragment {
    fn length(&self) -> u32 {
        self.length
    }

    fn main_sector_size(&self) -> usize {
        self.sector_size
    }

    fn subchannel_sector_size(&self) -> usize {
        0
    }

    fn subchannel_format(&self) -> SubchannelFormat {
        SubchannelFormat::None
    }

    fn read_main(&self, _index: u32, buf: &mut [u8]) -> Result<usize, ParserError> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn read_subchannel(&self, _index: u32, buf: &mut [u8]) -> Result<usize, ParserError> {
        buf.fill(0);
        Ok(0)
    }
}

/// Fragment backed by a slice of an image file
///
/// Each stored sector is `main_size + sub_size` bytes: the main channel
/// first, then the optional subchannel. The file handle is shared
/// read-only, so concurrent readers (command dispatcher, audio engine)
/// never contend on a seek position.
#[derive(Debug)]
pub struct BinaryFragment {
    file: Arc<File>,
    file_size: u64,
    offset: u64,
    length: u32,
    main_size: usize,
    sub_size: usize,
    sub_format: SubchannelFormat,
}

impl BinaryFragment {
    /// Create a fragment over `length` sectors starting at `offset`
    ///
    /// Fails with [`ParserError::FragmentOverrun`] if the declared
    /// layout does not fit into the backing file.
    pub fn new(
        file: Arc<File>,
        offset: u64,
        length: u32,
        main_size: usize,
        sub_size: usize,
        sub_format: SubchannelFormat,
    ) -> Result<Self, ParserError> {
        let file_size = file.metadata()?.len();
        let needed = offset + u64::from(length) * (main_size + sub_size) as u64;
        if needed > file_size {
            return Err(ParserError::FragmentOverrun {
                needed,
                available: file_size,
            });
        }

        Ok(Self {
            file,
            file_size,
            offset,
            length,
            main_size,
            sub_size,
            sub_format,
        })
    }

    /// Byte offset of sector `index` within the backing file
    fn sector_offset(&self, index: u32) -> u64 {
        self.offset + u64::from(index) * (self.main_size + self.sub_size) as u64
    }

    /// Read `buf.len()` bytes at `pos`, zero-filling past end of file
    fn read_at_tolerant(&self, pos: u64, buf: &mut [u8]) -> Result<usize, ParserError> {
        buf.fill(0);
        if pos >= self.file_size {
            return Ok(0);
        }

        let stored = ((self.file_size - pos) as usize).min(buf.len());
        self.file.read_exact_at(&mut buf[..stored], pos)?;
        Ok(stored)
    }
}

impl Fragment for BinaryFragment {
    fn length(&self) -> u32 {
        self.length
    }

    fn main_sector_size(&self) -> usize {
        self.main_size
    }

    fn subchannel_sector_size(&self) -> usize {
        self.sub_size
    }

    fn subchannel_format(&self) -> SubchannelFormat {
        self.sub_format
    }

    fn read_main(&self, index: u32, buf: &mut [u8]) -> Result<usize, ParserError> {
        debug_assert_eq!(buf.len(), self.main_size);
        self.read_at_tolerant(self.sector_offset(index), buf)
    }

    fn read_subchannel(&self, index: u32, buf: &mut [u8]) -> Result<usize, ParserError> {
        debug_assert_eq!(buf.len(), self.sub_size);
        if self.sub_size == 0 {
            return Ok(0);
        }
        self.read_at_tolerant(self.sector_offset(index) + self.main_size as u64, buf)
    }
}

/// Fragment backed by raw CD-DA audio data
///
/// Identical to [`BinaryFragment`] except that stored samples may be
/// big-endian, in which case every 16-bit sample is byte-swapped on
/// read. Output is always little-endian, the layout PLAY AUDIO and
/// READ CD expect.
pub struct AudioFragment {
    inner: BinaryFragment,
    swap_samples: bool,
}

impl AudioFragment {
    /// Create an audio fragment; `swap_samples` marks big-endian storage
    pub fn new(
        file: Arc<File>,
        offset: u64,
        length: u32,
        sub_size: usize,
        sub_format: SubchannelFormat,
        swap_samples: bool,
    ) -> Result<Self, ParserError> {
        let inner = BinaryFragment::new(file, offset, length, 2352, sub_size, sub_format)?;
        Ok(Self {
            inner,
            swap_samples,
        })
    }
}

impl Fragment for AudioFragment {
    fn length(&self) -> u32 {
        self.inner.length()
    }

    fn main_sector_size(&self) -> usize {
        self.inner.main_sector_size()
    }

    fn subchannel_sector_size(&self) -> usize {
        self.inner.subchannel_sector_size()
    }

    fn subchannel_format(&self) -> SubchannelFormat {
        self.inner.subchannel_format()
    }

    fn read_main(&self, index: u32, buf: &mut [u8]) -> Result<usize, ParserError> {
        let stored = self.inner.read_main(index, buf)?;
        if self.swap_samples {
            for sample in buf.chunks_exact_mut(2) {
                sample.swap(0, 1);
            }
        }
        Ok(stored)
    }

    fn read_subchannel(&self, index: u32, buf: &mut [u8]) -> Result<usize, ParserError> {
        self.inner.read_subchannel(index, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(contents: &[u8]) -> Arc<File> {
        let mut file = tempfile::tempfile().expect("tempfile");
        file.write_all(contents).expect("write");
        Arc::new(file)
    }

    #[test]
    fn test_null_fragment_zero_fills() {
        let frag = NullFragment::new(10, 2352);
        let mut buf = vec![0xAA; 2352];
        assert_eq!(frag.read_main(3, &mut buf).unwrap(), 2352);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_binary_fragment_reads_sector() {
        let mut data = vec![0u8; 2048 * 4];
        data[2048 * 2] = 0x42;
        let frag = BinaryFragment::new(temp_file(&data), 0, 4, 2048, 0, SubchannelFormat::None)
            .expect("fragment");

        let mut buf = vec![0u8; 2048];
        assert_eq!(frag.read_main(2, &mut buf).unwrap(), 2048);
        assert_eq!(buf[0], 0x42);
    }

    #[test]
    fn test_binary_fragment_rejects_overrun() {
        let data = vec![0u8; 2048];
        let err = BinaryFragment::new(temp_file(&data), 0, 2, 2048, 0, SubchannelFormat::None)
            .unwrap_err();
        assert!(matches!(err, ParserError::FragmentOverrun { .. }));
    }

    #[test]
    fn test_truncated_read_zero_fills_tail() {
        // Declared layout fits, but read at an offset near EOF anyway
        let data = vec![0x11u8; 2048 + 100];
        let frag = BinaryFragment::new(temp_file(&data), 0, 1, 2048, 0, SubchannelFormat::None)
            .expect("fragment");

        let mut buf = vec![0xAAu8; 2048];
        // Index 1 is out of the declared range; storage covers 100 bytes
        let stored = frag.read_main(1, &mut buf).unwrap();
        assert_eq!(stored, 100);
        assert!(buf[..100].iter().all(|&b| b == 0x11));
        assert!(buf[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_audio_fragment_swaps_samples() {
        let mut data = vec![0u8; 2352];
        data[0] = 0x12;
        data[1] = 0x34;
        let frag = AudioFragment::new(temp_file(&data), 0, 1, 0, SubchannelFormat::None, true)
            .expect("fragment");

        let mut buf = vec![0u8; 2352];
        frag.read_main(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0x34);
        assert_eq!(buf[1], 0x12);
    }
}
