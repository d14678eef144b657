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
use std::{error::Error, fmt, sync::Arc};

use midly::live::LiveEvent;

mod midir;
mod mock;

/// An open connection for driving a MIDI output device.
pub trait Output: Send {
    /// Sends the given event.
    fn send(&mut self, event: &LiveEvent<'static>) -> Result<(), Box<dyn Error>>;

    /// Silences everything this connection may have started.
    fn panic(&mut self) -> Result<(), Box<dyn Error>>;
}

/// A MIDI output device that the instrument can be driven through.
pub trait Device: fmt::Display + std::marker::Send + std::marker::Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Opens a connection for sending events.
    fn open(&self) -> Result<Box<dyn Output>, Box<dyn Error>>;

    /// Silences the device through a fresh connection, bypassing any open
    /// ones.
    fn panic(&self) -> Result<(), Box<dyn Error>>;
}

/// Lists devices known to midir.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    midir::list()
}

/// Gets a device with the given name.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(midir::get(name)?))
}
