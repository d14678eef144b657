// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};

use orgel::config::Instrument;
use orgel::dispatch::Dispatcher;
use orgel::midi;
use orgel::performance::Performance;
use orgel::voices::manager::VoiceManager;

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=pipe organ driver

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/orgel
ExecStart=/usr/local/bin/orgel play "$ORGEL_CONFIG"
ExecReload=/bin/kill -HUP $MAINPID

[Install]
WantedBy=multi-user.target
Alias=orgel.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A pipe organ driver."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available MIDI output devices.
    MidiDevices {},
    /// Lists the registers and stops in the given instrument configuration.
    Registers {
        /// The path to the instrument configuration.
        config: String,
    },
    /// Plays the performance on the configured instrument.
    Play {
        /// The path to the instrument configuration.
        config: String,
    },
    /// Silences the configured instrument.
    Panic {
        /// The path to the instrument configuration.
        config: String,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Registers { config } => {
            let instrument = Instrument::deserialize(&PathBuf::from(&config))?;
            let organ = instrument.to_organ()?;

            println!("{}:", organ);
            for register in organ.registers() {
                println!("- {}", register);
                for stop in register.stops() {
                    println!("  - {}", stop);
                }
            }
        }
        Commands::Play { config } => {
            let instrument = Instrument::deserialize(&PathBuf::from(&config))?;
            let device_name = instrument
                .device()
                .ok_or("no MIDI output device in the configuration")?;
            let device = midi::get_device(device_name)?;
            let organ = Arc::new(instrument.to_organ()?);

            let dispatcher =
                Dispatcher::new(device, instrument.queue_size(), instrument.min_gap()?);
            dispatcher.start()?;

            let manager = Arc::new(VoiceManager::new(organ, dispatcher.sender()));
            Performance::new(manager).play();

            dispatcher.stop()?;
        }
        Commands::Panic { config } => {
            let instrument = Instrument::deserialize(&PathBuf::from(&config))?;
            let device_name = instrument
                .device()
                .ok_or("no MIDI output device in the configuration")?;
            let device = midi::get_device(device_name)?;

            device.panic()?;
            println!("Silenced {}.", device.name());
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
