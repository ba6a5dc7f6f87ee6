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

//! Core emulation components
//!
//! This module contains all drive emulation components:
//! - Disc model (sessions, tracks, fragments, sector synthesis)
//! - Image parsers (ISO, CUE/BIN, pluggable registry)
//! - Device model (features, mode pages, sense, command interpreter)
//! - VHBA control device transport
//! - CD audio playback engine
//! - Daemon supervisor

pub mod audio;
pub mod daemon;
pub mod device;
pub mod disc;
pub mod error;
pub mod image;

// Re-export commonly used types
pub use audio::{AudioEngine, AudioStatus, NullSink, PcmSink};
pub use daemon::{Daemon, DaemonConfig};
pub use device::{Device, DeviceEvent, DeviceState};
pub use disc::{Disc, MediumType, Sector, SectorMode, Session, Track};
pub use error::{DaemonError, ParserError, Result, SinkError};
pub use image::{ImageParser, ParserRegistry};
