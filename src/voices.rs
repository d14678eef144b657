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

//! Voices select notes on the organ.
//!
//! A voice points somewhere inside an ordered note list and owes the
//! instrument at most one sounding note at a time. Moving the voice emits
//! the minimal release/press pair; repeated updates between flushes
//! coalesce into a single pair.

use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::warn;

use crate::dispatch::EventSender;
use crate::notes::{self, NoteAction, NoteName};
use crate::organ::event::DispatchEvent;
use crate::organ::Register;

pub mod controller;
pub mod manager;

/// Pitch classes used when a random range is drawn without an explicit
/// subset.
pub const DEFAULT_PITCH_CLASSES: [&str; 3] = ["C", "E", "G"];

/// The closed set of voice kinds. Ratio voices are addressed by a
/// continuous position, step voices by a note index, drones hold whatever
/// note they were given.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoiceKind {
    Ratio,
    Step,
    Drone,
}

impl fmt::Display for VoiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceKind::Ratio => write!(f, "ratio"),
            VoiceKind::Step => write!(f, "step"),
            VoiceKind::Drone => write!(f, "drone"),
        }
    }
}

/// Errors raised by voices and the voice manager.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The register already carries its maximum number of voices.
    #[error("register '{0}' already has its maximum number of voices")]
    RegisterFull(String),
    /// No register can take another voice.
    #[error("every register already has its maximum number of voices")]
    AllRegistersFull,
    /// A range assignment could not supply two distinct playable notes.
    #[error("a voice range needs at least two distinct playable notes")]
    DegenerateRange,
    /// No voice with the given id exists.
    #[error("no voice named '{0}'")]
    UnknownVoice(String),
    /// A voice with the given id already exists.
    #[error("a voice named '{0}' already exists")]
    DuplicateVoice(String),
    /// No register with the given name exists.
    #[error("no register named '{0}'")]
    UnknownRegister(String),
}

/// A single voice: an ordered note list on one register, a position inside
/// it, and the bookkeeping needed to emit only what changed.
pub struct Voice {
    id: String,
    kind: VoiceKind,
    register: Arc<Register>,
    notes: Vec<NoteName>,
    ratio: f64,
    last_note: NoteName,
    active_note: NoteName,
    next_note: NoteName,
    on: bool,
    dirty: bool,
}

impl Voice {
    /// Creates a voice spanning the register's full note range, parked on
    /// the lowest note and powered off.
    pub fn new(id: &str, kind: VoiceKind, register: Arc<Register>) -> Voice {
        let notes = register.note_names();
        let first = notes.first().copied().unwrap_or(NoteName::None);

        Voice {
            id: id.to_string(),
            kind,
            register,
            notes,
            ratio: 0.0,
            last_note: first,
            active_note: first,
            next_note: first,
            on: false,
            dirty: false,
        }
    }

    /// The identity of this voice.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The kind of this voice.
    pub fn kind(&self) -> VoiceKind {
        self.kind
    }

    /// The register this voice plays on.
    pub fn register(&self) -> &Arc<Register> {
        &self.register
    }

    /// The notes this voice can currently reach, in ascending order.
    pub fn notes(&self) -> &[NoteName] {
        &self.notes
    }

    /// The number of notes this voice can currently reach.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Whether the note list is empty.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// The note this voice is sounding, or would sound when powered on.
    pub fn active_note(&self) -> NoteName {
        self.active_note
    }

    /// The note this voice will move to on the next flush.
    pub fn next_note(&self) -> NoteName {
        self.next_note
    }

    /// Whether this voice is powered on.
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// The current continuous position.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Powers this voice on. The press goes out on the next flush.
    pub fn power_on(&mut self) {
        if !self.on {
            self.dirty = true;
        }
        self.on = true;
    }

    /// Powers this voice off. The release goes out on the next flush.
    pub fn power_off(&mut self) {
        if self.on {
            self.dirty = true;
        }
        self.on = false;
    }

    /// Points this voice at a continuous position in [0, 1] across its note
    /// list. Out of range values are clamped.
    pub fn set_ratio(&mut self, ratio: f64) {
        self.ratio = ratio.clamp(0.0, 1.0);
        self.quantize();
    }

    /// Moves the continuous position by the given amount.
    pub fn shift_ratio(&mut self, delta: f64) {
        self.set_ratio(self.ratio + delta);
    }

    /// Points this voice at a note by index. Out of range indices are
    /// ignored with a warning.
    pub fn set_step(&mut self, index: usize) {
        match self.notes.get(index) {
            Some(note) => {
                let note = *note;
                self.set_next(note);
            }
            None => warn!(voice = self.id, index, "Note index out of range."),
        }
    }

    /// Replaces the note list with the closed interval between the two
    /// endpoints, in either order, and resets the position onto it. The
    /// interval must hold at least two distinct playable notes. The active
    /// note is left alone until the next flush moves it.
    pub fn assign_range(&mut self, a: NoteName, b: NoteName) -> Result<(), VoiceError> {
        let notes = notes::note_range(a, b);
        if notes.len() < 2 {
            return Err(VoiceError::DegenerateRange);
        }

        self.notes = notes;
        self.reset();
        Ok(())
    }

    /// Replaces the note list with a random interval whose endpoints are
    /// drawn from the register's notes filtered to the given pitch classes.
    /// With keep_current, the active note stays on as one endpoint.
    pub fn assign_random_range(
        &mut self,
        pitch_classes: &[&str],
        keep_current: bool,
    ) -> Result<(), VoiceError> {
        let allowed = self.register.note_names();
        let mut subset = notes::filter_pitch_classes(&allowed, pitch_classes);
        let mut rng = rand::thread_rng();

        if keep_current {
            let current = self.active_note;
            subset.retain(|note| *note != current);
            let other = match subset.choose(&mut rng) {
                Some(note) => *note,
                None => return Err(VoiceError::DegenerateRange),
            };
            self.assign_range(current, other)
        } else {
            let endpoints: Vec<NoteName> = subset.choose_multiple(&mut rng, 2).copied().collect();
            if endpoints.len() < 2 {
                return Err(VoiceError::DegenerateRange);
            }
            self.assign_range(endpoints[0], endpoints[1])
        }
    }

    /// Moves the position back to the start of the note list. Drones hold
    /// their note.
    pub fn reset(&mut self) {
        match self.kind {
            VoiceKind::Ratio => {
                self.ratio = 0.0;
                self.quantize();
            }
            VoiceKind::Step => {
                if let Some(first) = self.notes.first().copied() {
                    self.set_next(first);
                }
            }
            VoiceKind::Drone => {}
        }
    }

    /// Produces the events owed since the last call, in the order they must
    /// reach the wire. Nothing changed means no events. A powered-off voice
    /// owes a single release; otherwise the old active note is released, the
    /// position commits, and the new active note is pressed.
    pub fn create_note_events(&mut self) -> Vec<DispatchEvent> {
        if !self.dirty {
            return Vec::new();
        }
        self.dirty = false;

        if !self.on {
            return self.active_note_event(NoteAction::Release).into_iter().collect();
        }

        let mut events = Vec::with_capacity(2);
        if let Some(event) = self.active_note_event(NoteAction::Release) {
            events.push(event);
        }
        self.last_note = self.active_note;
        self.active_note = self.next_note;
        if let Some(event) = self.active_note_event(NoteAction::Press) {
            events.push(event);
        }
        events
    }

    /// Creates this voice's pending events and submits each of them.
    pub fn flush(&mut self, sender: &EventSender) {
        for event in self.create_note_events() {
            sender.submit(event);
        }
    }

    fn set_next(&mut self, next: NoteName) {
        if next != self.next_note {
            self.dirty = true;
        }
        self.next_note = next;
    }

    fn quantize(&mut self) {
        let last_index = self.notes.len().saturating_sub(1);
        let index = ((self.ratio * last_index as f64).round() as usize).min(last_index);
        if let Some(note) = self.notes.get(index).copied() {
            self.set_next(note);
        }
    }

    fn active_note_event(&self, action: NoteAction) -> Option<DispatchEvent> {
        match self.register.note(self.active_note) {
            Some(note) => Some(note.note_event(action)),
            None => {
                warn!(
                    voice = self.id,
                    note = format!("{}", self.active_note),
                    "Note is not part of the register, skipping."
                );
                None
            }
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let low = self.notes.first().copied().unwrap_or(NoteName::None);
        let high = self.notes.last().copied().unwrap_or(NoteName::None);
        write!(
            f,
            "{} voice '{}' ({}) on '{}' [{}, {}]: {}",
            self.kind,
            self.id,
            if self.on { "on" } else { "off" },
            self.register.name(),
            low,
            high,
            self.active_note,
        )
    }
}

#[cfg(test)]
mod test {
    use midly::num::{u4, u7};

    use super::*;

    fn make_register() -> Arc<Register> {
        Arc::new(Register::new(
            "Great",
            u4::new(0),
            NoteName::Note(u7::new(48)),
            NoteName::Note(u7::new(72)),
            5,
            false,
            Vec::new(),
        ))
    }

    fn actions(events: &[DispatchEvent]) -> Vec<(NoteAction, NoteName)> {
        events
            .iter()
            .map(|event| (event.action(), event.note()))
            .collect()
    }

    #[test]
    fn test_new_voice_is_parked_and_clean() {
        let mut voice = Voice::new("v1", VoiceKind::Ratio, make_register());

        assert_eq!(voice.active_note(), NoteName::Note(u7::new(48)));
        assert_eq!(voice.next_note(), NoteName::Note(u7::new(48)));
        assert!(!voice.is_on());
        assert!(voice.create_note_events().is_empty());
    }

    #[test]
    fn test_ratio_quantization() {
        let mut voice = Voice::new("v1", VoiceKind::Ratio, make_register());

        // 25 notes, so a full sweep covers indices 0 through 24.
        voice.set_ratio(0.0);
        assert_eq!(voice.next_note(), NoteName::Note(u7::new(48)));
        voice.set_ratio(0.5);
        assert_eq!(voice.next_note(), NoteName::Note(u7::new(60)));
        voice.set_ratio(1.0);
        assert_eq!(voice.next_note(), NoteName::Note(u7::new(72)));

        // Out of range positions clamp instead of overshooting.
        voice.set_ratio(7.5);
        assert_eq!(voice.next_note(), NoteName::Note(u7::new(72)));
        voice.set_ratio(-1.0);
        assert_eq!(voice.next_note(), NoteName::Note(u7::new(48)));
    }

    #[test]
    fn test_steps() {
        let mut voice = Voice::new("v1", VoiceKind::Step, make_register());

        voice.set_step(2);
        assert_eq!(voice.next_note(), NoteName::Note(u7::new(50)));

        // Out of range indices leave the position alone.
        voice.set_step(500);
        assert_eq!(voice.next_note(), NoteName::Note(u7::new(50)));
    }

    #[test]
    fn test_power_cycle_emits_minimal_events() {
        let mut voice = Voice::new("v1", VoiceKind::Ratio, make_register());

        // The leading release is absorbed at admission: the note was not
        // sounding, so only the press carries an edge.
        voice.power_on();
        assert_eq!(
            actions(&voice.create_note_events()),
            vec![
                (NoteAction::None, NoteName::Note(u7::new(48))),
                (NoteAction::Press, NoteName::Note(u7::new(48))),
            ]
        );

        voice.power_off();
        assert_eq!(
            actions(&voice.create_note_events()),
            vec![(NoteAction::Release, NoteName::Note(u7::new(48)))]
        );

        // A powered-off flush clears the slate entirely.
        assert!(voice.create_note_events().is_empty());
    }

    #[test]
    fn test_moves_coalesce_into_one_pair() {
        let mut voice = Voice::new("v1", VoiceKind::Ratio, make_register());
        voice.power_on();
        voice.create_note_events();

        // Many position updates between flushes collapse into a single
        // release/press pair for the final target.
        for ratio in [0.1, 0.3, 0.7, 1.0] {
            voice.set_ratio(ratio);
        }
        assert_eq!(
            actions(&voice.create_note_events()),
            vec![
                (NoteAction::Release, NoteName::Note(u7::new(48))),
                (NoteAction::Press, NoteName::Note(u7::new(72))),
            ]
        );
        assert_eq!(voice.active_note(), NoteName::Note(u7::new(72)));
        assert!(voice.create_note_events().is_empty());
    }

    #[test]
    fn test_assign_range_normalizes_order() {
        let mut voice = Voice::new("v1", VoiceKind::Ratio, make_register());

        voice
            .assign_range(NoteName::Note(u7::new(64)), NoteName::Note(u7::new(52)))
            .expect("range should be assignable");
        assert_eq!(voice.notes().first(), Some(&NoteName::Note(u7::new(52))));
        assert_eq!(voice.notes().last(), Some(&NoteName::Note(u7::new(64))));

        // The position was reset onto the new list.
        assert_eq!(voice.next_note(), NoteName::Note(u7::new(52)));
    }

    #[test]
    fn test_assign_range_rejects_degenerate_ranges() {
        let mut voice = Voice::new("v1", VoiceKind::Ratio, make_register());

        let same = NoteName::Note(u7::new(60));
        assert!(matches!(
            voice.assign_range(same, same),
            Err(VoiceError::DegenerateRange)
        ));
        assert!(matches!(
            voice.assign_range(NoteName::None, same),
            Err(VoiceError::DegenerateRange)
        ));

        // The old list survives a failed assignment.
        assert_eq!(voice.len(), 25);
    }

    #[test]
    fn test_assign_range_does_not_move_the_active_note() {
        let mut voice = Voice::new("v1", VoiceKind::Ratio, make_register());
        voice.power_on();
        voice.set_ratio(0.5);
        voice.create_note_events();
        assert_eq!(voice.active_note(), NoteName::Note(u7::new(60)));

        voice
            .assign_range(NoteName::Note(u7::new(48)), NoteName::Note(u7::new(55)))
            .expect("range should be assignable");

        // Active only moves on the next flush, via a proper release.
        assert_eq!(voice.active_note(), NoteName::Note(u7::new(60)));
        assert_eq!(
            actions(&voice.create_note_events()),
            vec![
                (NoteAction::Release, NoteName::Note(u7::new(60))),
                (NoteAction::Press, NoteName::Note(u7::new(48))),
            ]
        );
    }

    #[test]
    fn test_assign_random_range_keeps_the_current_note() {
        let mut voice = Voice::new("v1", VoiceKind::Ratio, make_register());
        voice.power_on();
        voice.set_ratio(0.5);
        voice.create_note_events();
        let current = voice.active_note();

        for _ in 0..20 {
            voice
                .assign_random_range(&DEFAULT_PITCH_CLASSES, true)
                .expect("range should be assignable");
            let low = voice.notes().first().copied();
            let high = voice.notes().last().copied();
            assert!(low == Some(current) || high == Some(current));
        }
    }

    #[test]
    fn test_assign_random_range_respects_pitch_classes() {
        let mut voice = Voice::new("v1", VoiceKind::Ratio, make_register());

        for _ in 0..20 {
            voice
                .assign_random_range(&["C", "E", "G"], false)
                .expect("range should be assignable");
            for endpoint in [voice.notes().first(), voice.notes().last()] {
                let endpoint = endpoint.copied().unwrap_or(NoteName::None);
                let class = endpoint.pitch_class().unwrap_or("");
                assert!(["C", "E", "G"].contains(&class), "got {}", endpoint);
            }
        }
    }

    #[test]
    fn test_assign_random_range_fails_without_candidates() {
        let mut voice = Voice::new("v1", VoiceKind::Ratio, make_register());

        assert!(matches!(
            voice.assign_random_range(&["X"], false),
            Err(VoiceError::DegenerateRange)
        ));
    }

    #[test]
    fn test_drone_reset_holds_its_note() {
        let mut voice = Voice::new("v1", VoiceKind::Drone, make_register());
        voice.power_on();
        voice.create_note_events();

        voice
            .assign_range(NoteName::Note(u7::new(60)), NoteName::Note(u7::new(72)))
            .expect("range should be assignable");

        // A drone has no position to re-quantize.
        assert_eq!(voice.next_note(), NoteName::Note(u7::new(48)));
    }
}
