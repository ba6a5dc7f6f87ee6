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

//! Virtual optical drive emulation core library
//!
//! This library provides the components of a userspace daemon that
//! emulates ATAPI/MMC-3 CD/DVD-ROM drives backed by disc image files:
//! the MMC command interpreter, the device model, the VHBA control
//! device transport, the disc/session/track/fragment image model and
//! the CD audio playback engine.
//!
//! # Example
//!
//! ```
//! use vdrive::core::daemon::{Daemon, DaemonConfig};
//!
//! let daemon = Daemon::new(DaemonConfig::default());
//! assert_eq!(daemon.devices().len(), 1);
//! ```

pub mod core;
