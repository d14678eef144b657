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

//! The physical topology of the instrument: registers, their addressable
//! notes, and their stops. Everything here is read-mostly after loading;
//! the mutable activation state hangs off each note individually.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use midly::num::{u4, u7};

use crate::notes::{note_range, NoteAction, NoteName};

pub mod event;
pub mod state;

use event::DispatchEvent;
use state::ActivationState;

/// A single addressable note on a register.
pub struct Note {
    name: NoteName,
    register: String,
    channel: u4,
    state: Arc<ActivationState>,
}

impl Note {
    fn new(name: NoteName, register: &str, channel: u4, max_activations: u32) -> Note {
        Note {
            name,
            register: register.to_string(),
            channel,
            state: Arc::new(ActivationState::new(max_activations)),
        }
    }

    /// The name of this note.
    pub fn name(&self) -> NoteName {
        self.name
    }

    /// The activation state of this note.
    pub fn state(&self) -> &ActivationState {
        &self.state
    }

    /// Admits an action against this note and returns the resulting event.
    /// The event's action is `NoteAction::None` when the request was
    /// absorbed by the activation state.
    pub fn note_event(&self, action: NoteAction) -> DispatchEvent {
        DispatchEvent::new(
            &self.register,
            self.name,
            self.channel,
            self.state.process_action(action),
            self.state.clone(),
        )
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on '{}'", self.name, self.register)
    }
}

/// A stop (or coupler, or effect) that can be engaged on a register. Stops
/// are addressed like notes, but over the dedicated stop channel.
pub struct Stop {
    name: String,
    number: NoteName,
    size: Option<u32>,
    duplicates: bool,
    effect: bool,
    channel: u4,
    state: Arc<ActivationState>,
}

impl Stop {
    /// Creates a stop addressed by the given number over the stop channel.
    pub fn new(
        name: &str,
        number: u7,
        size: Option<u32>,
        duplicates: bool,
        effect: bool,
        channel: u4,
        max_activations: u32,
    ) -> Stop {
        Stop {
            name: name.to_string(),
            number: NoteName::Note(number),
            size,
            duplicates,
            effect,
            channel,
            state: Arc::new(ActivationState::new(max_activations)),
        }
    }

    /// The name of this stop.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The note number this stop is addressed by.
    pub fn number(&self) -> NoteName {
        self.number
    }

    /// Whether this stop makes sound on its own. Duplicate console controls
    /// and effects like bells are excluded from normal registration changes.
    pub fn playable(&self) -> bool {
        !self.duplicates && !self.effect
    }

    /// Admits an action against this stop and returns the resulting event.
    pub fn stop_event(&self, action: NoteAction) -> DispatchEvent {
        DispatchEvent::new(
            &self.name,
            self.number,
            self.channel,
            self.state.process_action(action),
            self.state.clone(),
        )
    }
}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let number = self.number.number().map_or(0, |number| number.as_int());
        match self.size {
            Some(size) => write!(f, "{} {}' (stop {})", self.name, size, number),
            None => write!(f, "{} (stop {})", self.name, number),
        }
    }
}

/// A register: one keyboard's worth of contiguous notes on one MIDI channel.
pub struct Register {
    name: String,
    channel: u4,
    pedal: bool,
    notes: BTreeMap<u7, Arc<Note>>,
    stops: Vec<Arc<Stop>>,
}

impl Register {
    /// Creates a register spanning the closed range between the two notes.
    pub fn new(
        name: &str,
        channel: u4,
        low: NoteName,
        high: NoteName,
        max_activations: u32,
        pedal: bool,
        stops: Vec<Stop>,
    ) -> Register {
        let notes = note_range(low, high)
            .into_iter()
            .filter_map(|note| {
                note.number()
                    .map(|number| (number, Arc::new(Note::new(note, name, channel, max_activations))))
            })
            .collect();

        Register {
            name: name.to_string(),
            channel,
            pedal,
            notes,
            stops: stops.into_iter().map(Arc::new).collect(),
        }
    }

    /// The name of this register.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wire channel this register sounds on.
    pub fn channel(&self) -> u4 {
        self.channel
    }

    /// Whether this register is the pedal board.
    pub fn is_pedal(&self) -> bool {
        self.pedal
    }

    /// The number of addressable notes on this register.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Whether this register has no notes.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Looks up an addressable note by name.
    pub fn note(&self, name: NoteName) -> Option<Arc<Note>> {
        name.number().and_then(|number| self.notes.get(&number).cloned())
    }

    /// All note names on this register, ascending.
    pub fn note_names(&self) -> Vec<NoteName> {
        self.notes.keys().map(|number| NoteName::Note(*number)).collect()
    }

    /// The lowest addressable note name.
    pub fn lowest_note_name(&self) -> NoteName {
        self.notes
            .keys()
            .next()
            .map_or(NoteName::None, |number| NoteName::Note(*number))
    }

    /// The highest addressable note name.
    pub fn highest_note_name(&self) -> NoteName {
        self.notes
            .keys()
            .next_back()
            .map_or(NoteName::None, |number| NoteName::Note(*number))
    }

    /// The stops attached to this register.
    pub fn stops(&self) -> &[Arc<Stop>] {
        &self.stops
    }
}

/// Channels are displayed 1-indexed, matching the configuration format.
impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' [{}, {}] on channel {}",
            self.name,
            self.lowest_note_name(),
            self.highest_note_name(),
            self.channel.as_int() + 1
        )
    }
}

/// The full instrument topology.
pub struct Organ {
    name: String,
    registers: Vec<Arc<Register>>,
}

impl Organ {
    /// Creates an organ from its registers.
    pub fn new(name: &str, registers: Vec<Register>) -> Organ {
        Organ {
            name: name.to_string(),
            registers: registers.into_iter().map(Arc::new).collect(),
        }
    }

    /// The name of the instrument.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All registers, in configuration order.
    pub fn registers(&self) -> &[Arc<Register>] {
        &self.registers
    }

    /// Looks up a register by name.
    pub fn register(&self, name: &str) -> Option<Arc<Register>> {
        self.registers
            .iter()
            .find(|register| register.name == name)
            .cloned()
    }

    /// All stops across all registers.
    pub fn stops(&self) -> Vec<Arc<Stop>> {
        self.registers
            .iter()
            .flat_map(|register| register.stops.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Organ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} registers)", self.name, self.registers.len())
    }
}
