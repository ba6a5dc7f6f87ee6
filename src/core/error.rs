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

//! Daemon error types
//!
//! Errors are split by layer: `ParserError` for the image-format layer,
//! `SinkError` for the audio output backend, and `DaemonError` for the
//! device supervisor surface. SCSI-level failures never appear here;
//! they are converted to sense data at the command dispatcher boundary
//! and reported through the wire protocol instead.

use thiserror::Error;

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors surfaced by the device supervisor and daemon lifecycle
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A load was attempted while a medium is already present
    #[error("device {0}: medium is already loaded")]
    AlreadyLoaded(u32),

    /// An unload was attempted while the drive is locked
    #[error("device {0}: medium is locked")]
    Locked(u32),

    /// An operation required a medium and none is loaded
    #[error("device {0}: no medium loaded")]
    NotLoaded(u32),

    /// An unrecognized name was passed to option get/set
    #[error("unknown device option '{0}'")]
    UnknownOption(String),

    /// A recognized option rejected the proposed value
    #[error("invalid value '{value}' for device option '{name}'")]
    InvalidOptionValue {
        /// Option name
        name: String,
        /// Rejected value
        value: String,
    },

    /// An audio engine operation was invalid in the current state
    ///
    /// Raised for `start` while playing or paused, `resume` while not
    /// paused, and `pause`/`stop` while idle.
    #[error("invalid audio state for {operation} (current status: {status})")]
    InvalidAudioState {
        /// Operation that was attempted
        operation: &'static str,
        /// Audio status at the time of the call
        status: &'static str,
    },

    /// The image layer rejected or failed to read an image
    #[error("image parser error: {0}")]
    Parser(#[from] ParserError),

    /// The audio output backend failed
    #[error("audio sink error: {0}")]
    Sink(#[from] SinkError),

    /// The control device could not be opened or configured
    #[error("control device error: {0}")]
    ControlDevice(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the image-format parsers
#[derive(Debug, Error)]
pub enum ParserError {
    /// No registered parser recognizes the file
    #[error("no parser recognizes '{0}'")]
    UnsupportedFormat(String),

    /// The file was recognized but its contents are invalid
    #[error("malformed image: {0}")]
    Malformed(String),

    /// A fragment's declared layout does not fit in the backing file
    #[error("fragment exceeds image file: {needed} bytes needed, {available} available")]
    FragmentOverrun {
        /// Bytes the fragment layout requires
        needed: u64,
        /// Bytes actually present in the file
        available: u64,
    },

    /// A sector read failed on the backing file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by a PCM sink implementation
#[derive(Debug, Error)]
pub enum SinkError {
    /// The output device could not be opened
    #[error("failed to open audio output: {0}")]
    Open(String),

    /// A frame write failed mid-playback
    #[error("playback write failed: {0}")]
    Write(String),
}
