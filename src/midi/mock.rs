// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
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
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use midly::live::LiveEvent;
use parking_lot::Mutex;

/// A mock device. Events are recorded instead of sent anywhere.
#[derive(Clone)]
pub struct Device {
    name: String,
    sent: Arc<Mutex<Vec<(Instant, LiveEvent<'static>)>>>,
    panic_count: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sent: Arc::new(Mutex::new(Vec::new())),
            panic_count: Arc::new(AtomicUsize::new(0)),
            fail_sends: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    /// Returns the events sent so far, in order.
    pub fn sent_events(&self) -> Vec<LiveEvent<'static>> {
        self.sent.lock().iter().map(|(_, event)| *event).collect()
    }

    #[cfg(test)]
    /// Returns the instants at which events were sent, in order.
    pub fn sent_instants(&self) -> Vec<Instant> {
        self.sent.lock().iter().map(|(instant, _)| *instant).collect()
    }

    #[cfg(test)]
    /// The number of times the device was told to silence itself, through
    /// fresh or open connections.
    pub fn panic_count(&self) -> usize {
        self.panic_count.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    /// Makes every subsequent send fail to exercise transport error paths.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> Result<Box<dyn super::Output>, Box<dyn Error>> {
        Ok(Box::new(Connection {
            device: self.clone(),
        }))
    }

    fn panic(&self) -> Result<(), Box<dyn Error>> {
        self.panic_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

/// An open connection to a mock device.
struct Connection {
    device: Device,
}

impl super::Output for Connection {
    fn send(&mut self, event: &LiveEvent<'static>) -> Result<(), Box<dyn Error>> {
        if self.device.fail_sends.load(Ordering::Relaxed) {
            return Err("mock send failure".into());
        }

        self.device.sent.lock().push((Instant::now(), *event));
        Ok(())
    }

    fn panic(&mut self) -> Result<(), Box<dyn Error>> {
        self.device.panic_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
