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

//! Daemon supervisor
//!
//! Owns the device registry: N emulated drives, each with its own I/O
//! thread on the shared control device, plus the parser registry they
//! load images through. Device events (inactivity, status changes)
//! arrive on one channel and are surfaced to the log; an RPC facade
//! would consume the same channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::core::audio;
use crate::core::device::{Device, DeviceEvent};
use crate::core::error::Result;
use crate::core::image::ParserRegistry;

/// Which message bus the control surface would bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    /// Per-user session bus
    #[default]
    Session,
    /// System-wide bus (discouraged on multi-user systems)
    System,
}

/// Per-device identity overrides from the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceIdConfig {
    /// INQUIRY vendor field
    pub vendor: Option<String>,
    /// INQUIRY product field
    pub product: Option<String>,
    /// INQUIRY revision field
    pub revision: Option<String>,
    /// INQUIRY vendor-specific field
    pub vendor_specific: Option<String>,
}

/// Daemon configuration, merged from the config file and the CLI
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Number of emulated drives
    pub num_devices: u32,
    /// Path of the VHBA control device
    pub ctl_device: PathBuf,
    /// Audio sink selection ("null" or "cpal")
    pub audio_driver: String,
    /// Bus the control surface would use
    pub bus: BusType,
    /// Identity overrides, one entry per device
    pub device: Vec<DeviceIdConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            num_devices: 1,
            ctl_device: PathBuf::from("/dev/vhba_ctl"),
            audio_driver: "null".into(),
            bus: BusType::Session,
            device: Vec::new(),
        }
    }
}

/// The daemon: device registry plus event aggregation
pub struct Daemon {
    config: DaemonConfig,
    devices: Vec<Arc<Device>>,
    events: Receiver<DeviceEvent>,
    #[allow(dead_code)]
    events_tx: Sender<DeviceEvent>,
}

impl Daemon {
    /// Build the daemon and its devices (I/O threads not yet running)
    pub fn new(config: DaemonConfig) -> Self {
        let registry = Arc::new(ParserRegistry::with_default_parsers());
        let (events_tx, events) = channel();

        let sink_factory = audio::sink_factory(&config.audio_driver).unwrap_or_else(|| {
            log::warn!(
                "cannot find audio driver '{}', using 'null' instead",
                config.audio_driver
            );
            audio::sink_factory("null").expect("null sink always exists")
        });

        let mut devices = Vec::with_capacity(config.num_devices as usize);
        for number in 0..config.num_devices {
            let device = Arc::new(Device::new(
                number,
                Arc::clone(&sink_factory),
                Arc::clone(&registry),
                events_tx.clone(),
            ));

            if let Some(ids) = config.device.get(number as usize) {
                let pairs = [
                    ("id-vendor", &ids.vendor),
                    ("id-product", &ids.product),
                    ("id-revision", &ids.revision),
                    ("id-vendor-specific", &ids.vendor_specific),
                ];
                for (name, value) in pairs {
                    if let Some(value) = value {
                        if let Err(e) = device.set_option(name, value) {
                            log::warn!("device {number}: {e}");
                        }
                    }
                }
            }

            devices.push(device);
        }

        Self {
            config,
            devices,
            events,
            events_tx,
        }
    }

    /// Emulated devices
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Device by number
    pub fn device(&self, number: u32) -> Option<&Arc<Device>> {
        self.devices.get(number as usize)
    }

    /// Start every device's I/O thread
    ///
    /// Failure to open the control device is the daemon's only fatal
    /// error; it propagates to the caller.
    pub fn start(&mut self) -> Result<()> {
        if self.config.bus == BusType::System {
            log::warn!(
                "running on the system bus is discouraged and may be unsafe on multi-user systems"
            );
        }

        for device in &self.devices {
            device.start(&self.config.ctl_device)?;
        }
        log::info!(
            "daemon started: {} device(s) on {}",
            self.devices.len(),
            self.config.ctl_device.display()
        );
        Ok(())
    }

    /// Pump device events until the shutdown flag is raised
    pub fn run(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Acquire) {
            match self.events.recv_timeout(Duration::from_millis(500)) {
                Ok(DeviceEvent::Inactive { device }) => {
                    log::info!("device {device} is inactive");
                }
                Ok(DeviceEvent::StatusChanged { device }) => {
                    log::debug!("device {device} status changed");
                }
                Ok(DeviceEvent::OptionChanged { device, option }) => {
                    log::debug!("device {device} option '{option}' changed");
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Stop every device and join their threads
    pub fn stop(&mut self) {
        log::info!("stopping daemon");
        for device in &self.devices {
            device.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.num_devices, 1);
        assert_eq!(config.ctl_device, PathBuf::from("/dev/vhba_ctl"));
        assert_eq!(config.audio_driver, "null");
        assert_eq!(config.bus, BusType::Session);
    }

    #[test]
    fn test_config_from_toml() {
        let config: DaemonConfig = toml::from_str(
            r#"
            num_devices = 2
            ctl_device = "/dev/vhba_ctl"
            audio_driver = "null"
            bus = "system"

            [[device]]
            vendor = "ACME"
            product = "Emulated DVD"
            "#,
        )
        .expect("parse");

        assert_eq!(config.num_devices, 2);
        assert_eq!(config.bus, BusType::System);
        assert_eq!(config.device.len(), 1);
        assert_eq!(config.device[0].vendor.as_deref(), Some("ACME"));
    }

    #[test]
    fn test_daemon_builds_devices() {
        let mut config = DaemonConfig {
            num_devices: 3,
            ..Default::default()
        };
        config.device.push(DeviceIdConfig {
            vendor: Some("ACME".into()),
            ..Default::default()
        });

        let daemon = Daemon::new(config);
        assert_eq!(daemon.devices().len(), 3);
        assert_eq!(daemon.device(0).unwrap().option("id-vendor").unwrap(), "ACME");
        assert_eq!(
            daemon.device(1).unwrap().option("id-vendor").unwrap(),
            "vdrive"
        );
        assert!(daemon.device(3).is_none());
    }

    #[test]
    fn test_unknown_audio_driver_falls_back() {
        let config = DaemonConfig {
            audio_driver: "does-not-exist".into(),
            ..Default::default()
        };
        // Construction succeeds; the null sink takes over
        let daemon = Daemon::new(config);
        assert_eq!(daemon.devices().len(), 1);
    }
}
