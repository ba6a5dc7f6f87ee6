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

use std::os::raw::c_int;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use log::{error, info, warn};
use vdrive::core::daemon::{Daemon, DaemonConfig};

/// Virtual CD/DVD-ROM drive emulation daemon
#[derive(Parser)]
#[command(name = "vdrived")]
#[command(about = "Virtual optical drive emulation daemon", long_about = None)]
struct Args {
    /// Number of emulated devices
    #[arg(short = 'n', long)]
    num_devices: Option<u32>,

    /// Path of the VHBA control device
    #[arg(short = 'c', long)]
    ctl_device: Option<PathBuf>,

    /// Audio driver ("null" or "cpal")
    #[arg(short = 'a', long)]
    audio_driver: Option<String>,

    /// Bus type to use ("session" or "system")
    #[arg(short = 'b', long)]
    bus: Option<String>,

    /// Write the log to this file instead of stderr
    #[arg(short = 'l', long)]
    logfile: Option<PathBuf>,

    /// Daemon configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signal: c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Trap SIGINT/SIGTERM/SIGHUP so shutdown joins the device threads
fn setup_signal_trap() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
        if let Err(e) = unsafe { sigaction(signal, &action) } {
            warn!("failed to add signal handler for {signal}: {e}");
        }
    }
}

/// Initialize env_logger, honoring verbosity and the logfile target
fn setup_logging(verbose: u8, logfile: Option<&PathBuf>) -> Result<(), String> {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);

    if let Some(path) = logfile {
        let file = std::fs::File::create(path)
            .map_err(|e| format!("failed to open log file {}: {e}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        });
    }

    builder.init();
    Ok(())
}

fn main() {
    // RUST_LOG may come from a .env next to the daemon
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    if let Err(message) = setup_logging(args.verbose, args.logfile.as_ref()) {
        eprintln!("{message}");
        std::process::exit(-1);
    }

    info!("vdrived v{}", env!("CARGO_PKG_VERSION"));

    // Config file first, CLI flags override
    let mut config = match &args.config {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<DaemonConfig>(&text) {
                Ok(config) => config,
                Err(e) => {
                    error!("failed to parse {}: {e}", path.display());
                    std::process::exit(-1);
                }
            },
            Err(e) => {
                error!("failed to read {}: {e}", path.display());
                std::process::exit(-1);
            }
        },
        None => DaemonConfig::default(),
    };

    if let Some(n) = args.num_devices {
        config.num_devices = n;
    }
    if let Some(path) = args.ctl_device {
        config.ctl_device = path;
    }
    if let Some(driver) = args.audio_driver {
        config.audio_driver = driver;
    }
    if let Some(bus) = args.bus {
        match bus.as_str() {
            "session" => config.bus = vdrive::core::daemon::BusType::Session,
            "system" => config.bus = vdrive::core::daemon::BusType::System,
            other => warn!("invalid bus argument '{other}', using the default bus"),
        }
    }

    info!("starting daemon with the following parameters:");
    info!(" - num devices: {}", config.num_devices);
    info!(" - control device: {}", config.ctl_device.display());
    info!(" - audio driver: {}", config.audio_driver);
    info!(" - bus type: {:?}", config.bus);

    let mut daemon = Daemon::new(config);

    setup_signal_trap();

    if let Err(e) = daemon.start() {
        error!("daemon initialization and start failed: {e}");
        std::process::exit(-1);
    }

    daemon.run(&SHUTDOWN);

    info!("stopping daemon");
    daemon.stop();
}
