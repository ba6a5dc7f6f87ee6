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

//! Emulated drive
//!
//! One [`Device`] is one virtual ATAPI drive: its SCSI state (features,
//! mode pages, sense, events), the loaded disc, the audio engine, and
//! the I/O thread that answers the kernel's requests. The [`Device`]
//! handle wraps the mutable [`DeviceState`] in a mutex; every command
//! execution and every supervisor operation goes through that mutex,
//! which is what serializes the drive.
//!
//! # Drive lifecycle
//!
//! A device starts empty with a power-on unit attention pending. `load`
//! parses image files and inserts the disc, raising the new-medium
//! events; `unload` removes it. START STOP UNIT with the eject bit
//! keeps the removed disc queued so a later load request from the host
//! can bring it back without the supervisor's help.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::core::audio::{AudioEngine, AudioStatus, SinkFactory};
use crate::core::disc::{Disc, MediumType};
use crate::core::error::{DaemonError, Result};
use crate::core::image::ParserRegistry;

pub mod commands;
pub mod features;
pub mod kernel_io;
pub mod mode_pages;
pub mod recording;

pub use commands::Command;
pub use features::{FeatureSet, Profile};
pub use mode_pages::{ModePageStore, PageVariant};
pub use recording::{ImageWriter, RecordingState};

/// Events a device reports to its supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// No request arrived within the watchdog interval
    Inactive {
        /// Device number
        device: u32,
    },
    /// Loaded/unloaded state changed
    StatusChanged {
        /// Device number
        device: u32,
    },
    /// A device option was changed
    OptionChanged {
        /// Device number
        device: u32,
        /// Option name
        option: String,
    },
}

/// GET EVENT/STATUS media event codes
pub mod media_event {
    /// New medium arrived
    pub const NEW_MEDIA: u8 = 0x02;
    /// Medium was removed
    pub const MEDIA_REMOVAL: u8 = 0x03;
}

/// Latched sense data in fixed format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseData {
    /// Sense key
    pub key: u8,
    /// Additional sense code
    pub asc: u8,
    /// Additional sense code qualifier
    pub ascq: u8,
    /// Incorrect length indicator
    pub ili: bool,
    /// Command-specific information bytes
    pub cmd_info: u32,
}

impl SenseData {
    /// Size of the fixed sense format
    pub const SIZE: usize = 18;

    /// Build sense from a key and a combined ASC/ASCQ word
    pub fn new(key: u8, asc_ascq: u16) -> Self {
        Self {
            key,
            asc: (asc_ascq >> 8) as u8,
            ascq: (asc_ascq & 0xFF) as u8,
            ili: false,
            cmd_info: 0,
        }
    }

    /// Serialize to the 18-byte fixed format (response code 0x70)
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = 0x70; // current error, fixed format
        buf[2] = (self.key & 0x0F) | (u8::from(self.ili) << 5);
        buf[3..7].copy_from_slice(&self.cmd_info.to_be_bytes());
        buf[7] = 0x0A; // additional sense length
        buf[12] = self.asc;
        buf[13] = self.ascq;
        buf
    }
}

/// The mutable state of one emulated drive
///
/// Only ever touched with the device mutex held.
pub struct DeviceState {
    /// Device number (also the LUN reported upward)
    pub number: u32,

    // INQUIRY identity strings, space-padded on the wire
    id_vendor: String,
    id_product: String,
    id_revision: String,
    id_vendor_specific: String,

    /// Loaded disc, if any
    disc: Option<Arc<Disc>>,
    /// Disc kept aside by an eject, reloadable via START STOP UNIT
    ejected_disc: Option<Arc<Disc>>,
    /// PREVENT ALLOW MEDIUM REMOVAL state
    locked: bool,

    /// Pending media event codes for GET EVENT/STATUS, oldest first
    media_events: std::collections::VecDeque<u8>,
    /// Pending unit attention (ASC/ASCQ), reported before any other
    /// command except INQUIRY and REQUEST SENSE
    ua_condition: Option<u16>,
    /// Deferred sense for REQUEST SENSE
    sense: Option<SenseData>,

    /// Feature/profile table
    pub features: FeatureSet,
    /// Mode page store
    pub mode_pages: ModePageStore,
    /// Audio playback engine
    pub audio: AudioEngine,
    /// Recording emulation state
    pub recording: RecordingState,

    /// Last accessed LBA (READ SUBCHANNEL position, mechanism status)
    current_address: i32,

    // Emulation options
    dpm_emulation: bool,
    tr_emulation: bool,
    bad_sector_emulation: bool,

    // Read delay bookkeeping (observable only via timing)
    delay_begin: Option<Instant>,
    delay_amount: Duration,

    /// Reusable buffer for assembling multi-sector READ CD responses
    pub(crate) cache: Vec<u8>,
}

impl DeviceState {
    /// Create the power-on state of a drive
    pub fn new(number: u32, sink_factory: SinkFactory) -> Self {
        Self {
            number,
            id_vendor: "vdrive".into(),
            id_product: "Virtual CD/DVD".into(),
            id_revision: "1.0".into(),
            id_vendor_specific: String::new(),
            disc: None,
            ejected_disc: None,
            locked: false,
            media_events: std::collections::VecDeque::new(),
            ua_condition: Some(commands::asc::POWER_ON_RESET),
            sense: None,
            features: FeatureSet::new(),
            mode_pages: ModePageStore::new(),
            audio: AudioEngine::new(sink_factory),
            recording: RecordingState::new(),
            current_address: 0,
            dpm_emulation: false,
            tr_emulation: false,
            bad_sector_emulation: false,
            delay_begin: None,
            delay_amount: Duration::ZERO,
            cache: Vec::new(),
        }
    }

    /// Whether a medium is present
    pub fn loaded(&self) -> bool {
        self.disc.is_some()
    }

    /// The loaded disc
    pub fn disc(&self) -> Option<&Arc<Disc>> {
        self.disc.as_ref()
    }

    /// Whether medium removal is prevented
    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Set the removal lock
    pub fn set_locked(&mut self, locked: bool) {
        log::debug!("device {}: removal {}", self.number, if locked { "prevented" } else { "allowed" });
        self.locked = locked;
    }

    /// Last accessed LBA
    pub fn current_address(&self) -> i32 {
        self.current_address
    }

    /// Insert a disc and raise the new-medium condition
    pub fn insert_disc(&mut self, disc: Arc<Disc>) -> Result<()> {
        if self.disc.is_some() {
            return Err(DaemonError::AlreadyLoaded(self.number));
        }

        let profile = match disc.medium {
            MediumType::Cd => Profile::CdRom,
            MediumType::Dvd | MediumType::Bd => Profile::DvdRom,
        };
        self.features.set_profile(profile);

        log::info!(
            "device {}: medium loaded ({:?}, {} sectors)",
            self.number,
            disc.medium,
            disc.capacity()
        );

        self.disc = Some(disc);
        self.ejected_disc = None;
        self.current_address = 0;
        self.media_events.push_back(media_event::NEW_MEDIA);
        self.ua_condition = Some(commands::asc::MEDIUM_MAY_HAVE_CHANGED);
        Ok(())
    }

    /// Remove the medium
    ///
    /// `keep_queued` stashes the disc for a host-initiated reload
    /// (START STOP UNIT with LoEj and Start set).
    pub fn remove_disc(&mut self, force: bool, keep_queued: bool) -> Result<()> {
        if self.disc.is_none() {
            return Ok(());
        }
        if self.locked && !force {
            return Err(DaemonError::Locked(self.number));
        }

        // Playback cannot survive the medium
        if matches!(
            self.audio.status(),
            AudioStatus::Playing | AudioStatus::Paused
        ) {
            let _ = self.audio.stop();
        }

        let disc = self.disc.take().expect("checked above");
        if keep_queued {
            self.ejected_disc = Some(disc);
        }

        self.features.set_profile(Profile::None);
        self.recording.reset();
        self.media_events.push_back(media_event::MEDIA_REMOVAL);

        log::info!("device {}: medium removed", self.number);
        Ok(())
    }

    /// Reload the disc stashed by an eject
    pub fn reload_queued_disc(&mut self) -> Result<()> {
        match self.ejected_disc.take() {
            Some(disc) => self.insert_disc(disc),
            None => Err(DaemonError::NotLoaded(self.number)),
        }
    }

    /// Whether an eject left a disc queued for reload
    pub fn has_queued_disc(&self) -> bool {
        self.ejected_disc.is_some()
    }

    /// Loaded state and image file names
    pub fn status(&self) -> (bool, Vec<String>) {
        match &self.disc {
            Some(disc) => (
                true,
                disc.filenames
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
            ),
            None => (false, Vec::new()),
        }
    }

    /// Read a device option by name
    pub fn option(&self, name: &str) -> Result<String> {
        let value = match name {
            "dpm-emulation" => self.dpm_emulation.to_string(),
            "tr-emulation" => self.tr_emulation.to_string(),
            "bad-sector-emulation" => self.bad_sector_emulation.to_string(),
            "id-vendor" => self.id_vendor.clone(),
            "id-product" => self.id_product.clone(),
            "id-revision" => self.id_revision.clone(),
            "id-vendor-specific" => self.id_vendor_specific.clone(),
            _ => return Err(DaemonError::UnknownOption(name.into())),
        };
        Ok(value)
    }

    /// Set a device option by name
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        let parse_bool = |value: &str| -> Result<bool> {
            match value {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(DaemonError::InvalidOptionValue {
                    name: name.into(),
                    value: value.into(),
                }),
            }
        };

        match name {
            "dpm-emulation" => self.dpm_emulation = parse_bool(value)?,
            "tr-emulation" => self.tr_emulation = parse_bool(value)?,
            "bad-sector-emulation" => self.bad_sector_emulation = parse_bool(value)?,
            "id-vendor" => self.id_vendor = value.into(),
            "id-product" => self.id_product = value.into(),
            "id-revision" => self.id_revision = value.into(),
            "id-vendor-specific" => self.id_vendor_specific = value.into(),
            _ => return Err(DaemonError::UnknownOption(name.into())),
        }

        log::debug!("device {}: option {name} = {value}", self.number);
        Ok(())
    }

    /// Latch sense data for the next REQUEST SENSE
    pub fn set_sense(&mut self, sense: SenseData) {
        self.sense = Some(sense);
    }

    /// Take the latched sense data, clearing it
    pub fn take_sense(&mut self) -> Option<SenseData> {
        self.sense.take()
    }

    /// Take the pending unit attention, if any
    fn take_unit_attention(&mut self) -> Option<u16> {
        self.ua_condition.take()
    }

    /// Take the oldest pending media event code
    pub fn take_media_event(&mut self) -> Option<u8> {
        self.media_events.pop_front()
    }

    /// Whether any media event is pending
    pub fn has_media_event(&self) -> bool {
        !self.media_events.is_empty()
    }

    /// Record the range a read command touched
    ///
    /// Feeds the READ SUBCHANNEL position and, when DPM emulation is
    /// on, the artificial rotational delay applied before the
    /// response goes out.
    fn delay_begin(&mut self, address: i32, count: u32) {
        self.current_address = address + count.saturating_sub(1) as i32;
        if self.dpm_emulation || self.tr_emulation {
            self.delay_begin = Some(Instant::now());
            // One sector takes 1/75 s at 1x; page 0x2A carries the
            // current speed in kB/s
            let page = self.mode_pages.get(0x2A).expect("page 0x2A exists");
            let speed_kb = u16::from_be_bytes([
                page.bytes(PageVariant::Current)[14],
                page.bytes(PageVariant::Current)[15],
            ])
            .max(176);
            let speed_factor = f64::from(speed_kb) / 176.0;
            let seconds = f64::from(count) / 75.0 / speed_factor;
            self.delay_amount = Duration::from_secs_f64(seconds);
        }
    }

    /// Sleep out the remainder of the simulated delay
    fn delay_finalize(&mut self) {
        if let Some(begin) = self.delay_begin.take() {
            let elapsed = begin.elapsed();
            if elapsed < self.delay_amount {
                std::thread::sleep(self.delay_amount - elapsed);
            }
            self.delay_amount = Duration::ZERO;
        }
    }
}

/// Handle to one emulated drive
pub struct Device {
    number: u32,
    state: Arc<Mutex<DeviceState>>,
    registry: Arc<ParserRegistry>,
    events: Sender<DeviceEvent>,
    shutdown: Arc<AtomicBool>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Device {
    /// Create a stopped device
    pub fn new(
        number: u32,
        sink_factory: SinkFactory,
        registry: Arc<ParserRegistry>,
        events: Sender<DeviceEvent>,
    ) -> Self {
        Self {
            number,
            state: Arc::new(Mutex::new(DeviceState::new(number, sink_factory))),
            registry,
            events,
            shutdown: Arc::new(AtomicBool::new(false)),
            io_thread: Mutex::new(None),
        }
    }

    /// Device number
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Open the control device and start the I/O thread
    pub fn start(&self, ctl_device: &Path) -> Result<()> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(ctl_device)
            .map_err(|e| {
                DaemonError::ControlDevice(format!("{}: {e}", ctl_device.display()))
            })?;

        self.shutdown.store(false, Ordering::Release);
        let handle = kernel_io::spawn_io_thread(
            self.number,
            file,
            Arc::clone(&self.state),
            Arc::clone(&self.shutdown),
            self.events.clone(),
        );
        *self.io_thread.lock().unwrap() = Some(handle);

        log::info!("device {}: I/O thread started on {}", self.number, ctl_device.display());
        Ok(())
    }

    /// Signal the I/O thread and wait for it to finish
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.io_thread.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("device {}: I/O thread panicked", self.number);
            }
        }
    }

    /// Load image files through the parser registry
    pub fn load(&self, paths: &[PathBuf]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.loaded() {
            return Err(DaemonError::AlreadyLoaded(self.number));
        }

        let mut disc = self.registry.load(paths)?;
        disc.filenames = paths.to_vec();
        state.insert_disc(Arc::new(disc))?;
        drop(state);

        let _ = self.events.send(DeviceEvent::StatusChanged {
            device: self.number,
        });
        Ok(())
    }

    /// Insert an already-built disc (in-process loading)
    pub fn insert_disc(&self, disc: Arc<Disc>) -> Result<()> {
        self.state.lock().unwrap().insert_disc(disc)?;
        let _ = self.events.send(DeviceEvent::StatusChanged {
            device: self.number,
        });
        Ok(())
    }

    /// Unload the medium
    pub fn unload(&self, force: bool) -> Result<()> {
        self.state.lock().unwrap().remove_disc(force, false)?;
        let _ = self.events.send(DeviceEvent::StatusChanged {
            device: self.number,
        });
        Ok(())
    }

    /// Loaded state and image file names
    pub fn status(&self) -> (bool, Vec<String>) {
        self.state.lock().unwrap().status()
    }

    /// Read a device option
    pub fn option(&self, name: &str) -> Result<String> {
        self.state.lock().unwrap().option(name)
    }

    /// Set a device option
    pub fn set_option(&self, name: &str, value: &str) -> Result<()> {
        self.state.lock().unwrap().set_option(name, value)?;
        let _ = self.events.send(DeviceEvent::OptionChanged {
            device: self.number,
            option: name.into(),
        });
        Ok(())
    }

    /// Execute one SCSI command against the device
    ///
    /// Takes the device mutex for the duration of the command. This is
    /// the same entry the I/O thread uses; tests and in-process
    /// callers go through it directly.
    pub fn execute(&self, cdb: &[u8], input: &[u8], output: &mut [u8]) -> (u32, usize) {
        let mut command = Command::new(cdb, input, output);
        let status = self
            .state
            .lock()
            .unwrap()
            .execute_command(&mut command);
        (status, command.out_len())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop();
    }
}
