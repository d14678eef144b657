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
use std::{error::Error, fmt};

use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use midly::live::LiveEvent;
use midly::num::{u4, u7};
use midly::MidiMessage;
use tracing::{debug, info, span, Level};

/// All Sound Off cuts sound immediately, All Notes Off releases held keys.
/// Both are sent on every channel when silencing the instrument.
const ALL_SOUND_OFF: u8 = 120;
const ALL_NOTES_OFF: u8 = 123;

pub struct Device {
    name: String,
    output_port: MidiOutputPort,
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    /// Opens a connection for sending events.
    fn open(&self) -> Result<Box<dyn super::Output>, Box<dyn Error>> {
        let output = MidiOutput::new("orgel dispatch output")?;
        let connection = output.connect(&self.output_port, "orgel dispatch")?;

        info!(device = self.name, "Opened MIDI output connection.");

        Ok(Box::new(Connection { connection }))
    }

    /// Silences the device through a fresh connection.
    fn panic(&self) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "panic (midir)");
        let _enter = span.enter();

        info!(device = self.name, "Silencing all channels.");

        let output = MidiOutput::new("orgel panic output")?;
        let mut connection = output.connect(&self.output_port, "orgel panic")?;
        silence(&mut connection)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Output)", self.name)
    }
}

/// An open midir connection.
struct Connection {
    connection: MidiOutputConnection,
}

impl super::Output for Connection {
    fn send(&mut self, event: &LiveEvent<'static>) -> Result<(), Box<dyn Error>> {
        debug!(event = format!("{:?}", event), "Sending MIDI event.");

        let mut buf: Vec<u8> = Vec::with_capacity(8);
        event.write(&mut buf)?;
        self.connection.send(&buf)?;

        Ok(())
    }

    fn panic(&mut self) -> Result<(), Box<dyn Error>> {
        silence(&mut self.connection)
    }
}

/// Sends All Sound Off and All Notes Off on every channel through the given
/// connection.
fn silence(connection: &mut MidiOutputConnection) -> Result<(), Box<dyn Error>> {
    for channel in 0..16 {
        for controller in [ALL_SOUND_OFF, ALL_NOTES_OFF] {
            let event = LiveEvent::Midi {
                channel: u4::new(channel),
                message: MidiMessage::Controller {
                    controller: u7::new(controller),
                    value: u7::new(0),
                },
            };

            let mut buf: Vec<u8> = Vec::with_capacity(8);
            event.write(&mut buf)?;
            connection.send(&buf)?;
        }
    }

    Ok(())
}

/// Lists midir devices and produces the Device trait.
pub fn list() -> Result<Vec<Box<dyn super::Device>>, Box<dyn Error>> {
    Ok(list_midir_devices()?
        .into_iter()
        .map(|device| {
            let device: Box<dyn super::Device> = Box::new(device);
            device
        })
        .collect())
}

/// Lists midir output devices.
fn list_midir_devices() -> Result<Vec<Device>, Box<dyn Error>> {
    let output = MidiOutput::new("orgel output listing")?;

    let mut devices = Vec::new();
    for port in output.ports() {
        let name = output.port_name(&port)?;
        devices.push(Device {
            name,
            output_port: port,
        });
    }

    devices.sort_by_key(|device| device.name.clone());
    Ok(devices)
}

/// Gets the given midir device.
pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
    let mut matches = list_midir_devices()?
        .into_iter()
        .filter(|device| device.name.contains(name))
        .collect::<Vec<Device>>();

    if matches.is_empty() {
        return Err(format!("no device found with name {}", name).into());
    }
    if matches.len() > 1 {
        return Err(format!(
            "found too many devices that match ({}), use a less ambiguous device name",
            matches
                .iter()
                .map(|device| device.name.clone())
                .collect::<Vec<String>>()
                .join(", ")
        )
        .into());
    }

    // We've verified that there's only one element in the vector, so this should be safe.
    Ok(matches.swap_remove(0))
}
