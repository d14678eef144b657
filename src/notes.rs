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
use std::fmt;

use midly::live::LiveEvent;
use midly::num::{u4, u7};
use midly::MidiMessage;

/// Velocity for every press and release. The instrument's pallets are binary,
/// so velocity carries no information.
pub const VELOCITY: u7 = u7::new(127);

/// The twelve pitch class names, starting at C.
const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// The identity of a single playable note, or the absence of one.
/// `NoteName::None` orders before every real note.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NoteName {
    None,
    Note(u7),
}

impl NoteName {
    /// Creates a note name from a raw MIDI note number.
    pub fn from_number(number: u8) -> Option<NoteName> {
        u7::try_from(number).map(NoteName::Note)
    }

    /// The MIDI note number, if this is a real note.
    pub fn number(&self) -> Option<u7> {
        match self {
            NoteName::None => None,
            NoteName::Note(number) => Some(*number),
        }
    }

    /// The pitch class ("C", "F#") of this note, if it has one.
    pub fn pitch_class(&self) -> Option<&'static str> {
        self.number()
            .map(|number| PITCH_CLASSES[usize::from(number.as_int()) % 12])
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteName::None => write!(f, "no note"),
            NoteName::Note(number) => {
                let number = i32::from(number.as_int());
                write!(f, "{}{}", PITCH_CLASSES[number as usize % 12], number / 12 - 1)
            }
        }
    }
}

/// Returns the ascending closed range of notes between the two endpoints,
/// regardless of the order they're given in. Ranges involving `NoteName::None`
/// are empty.
pub fn note_range(a: NoteName, b: NoteName) -> Vec<NoteName> {
    let (a, b) = match (a.number(), b.number()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Vec::new(),
    };

    let low = a.min(b).as_int();
    let high = a.max(b).as_int();
    (low..=high)
        .map(|number| NoteName::Note(u7::new(number)))
        .collect()
}

/// Filters notes down to those whose pitch class appears in the given set.
pub fn filter_pitch_classes(notes: &[NoteName], classes: &[&str]) -> Vec<NoteName> {
    notes
        .iter()
        .copied()
        .filter(|note| {
            note.pitch_class()
                .map_or(false, |class| classes.contains(&class))
        })
        .collect()
}

/// An action that can be applied to a note.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoteAction {
    /// Start sounding the note.
    Press,
    /// Stop sounding the note.
    Release,
    /// Do nothing. Absorbed actions decay to this.
    None,
}

impl NoteAction {
    /// The change in activation count that this action represents.
    pub fn delta(&self) -> i32 {
        match self {
            NoteAction::Press => 1,
            NoteAction::Release => -1,
            NoteAction::None => 0,
        }
    }

    /// Builds the wire event for this action against a key and channel.
    /// Actions with no wire representation yield nothing.
    pub fn to_midi_event(&self, channel: u4, key: u7) -> Option<LiveEvent<'static>> {
        let message = match self {
            NoteAction::Press => MidiMessage::NoteOn { key, vel: VELOCITY },
            NoteAction::Release => MidiMessage::NoteOff { key, vel: VELOCITY },
            NoteAction::None => return None,
        };

        Some(LiveEvent::Midi { channel, message })
    }
}

impl fmt::Display for NoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteAction::Press => write!(f, "press"),
            NoteAction::Release => write!(f, "release"),
            NoteAction::None => write!(f, "no action"),
        }
    }
}
