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

//! Per-note activation accounting.
//!
//! Any number of voices can press or release the same physical note. The
//! activation state reconciles them by counting: the wire only ever sees the
//! first press and the last release, everything in between is absorbed.

use parking_lot::Mutex;
use tracing::warn;

use crate::notes::NoteAction;

/// Reconciles concurrent press/release requests for a single addressable
/// note. Admission is edge triggered: an action is returned to the caller
/// only when it flips the note between silent and sounding, and decays to
/// `NoteAction::None` otherwise.
pub struct ActivationState {
    /// Ceiling for both counters.
    max_count: u32,
    counters: Mutex<Counters>,
}

/// The two counters, updated together under one lock.
#[derive(Default)]
struct Counters {
    /// Activations admitted but not yet confirmed sent.
    queued: u32,
    /// Activations confirmed on the wire.
    actual: u32,
}

impl ActivationState {
    /// Creates an activation state with the given activation ceiling.
    pub fn new(max_count: u32) -> ActivationState {
        ActivationState {
            max_count,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Whether any queued activations are outstanding.
    pub fn queue_active(&self) -> bool {
        self.counters.lock().queued > 0
    }

    /// The number of queued activations.
    pub fn queued_count(&self) -> u32 {
        self.counters.lock().queued
    }

    /// The number of activations confirmed on the wire.
    pub fn actual_count(&self) -> u32 {
        self.counters.lock().actual
    }

    /// Admits an action against the queued count. Returns the action itself
    /// when it flips the note between silent and sounding, and
    /// `NoteAction::None` when it was absorbed.
    pub fn process_action(&self, action: NoteAction) -> NoteAction {
        let mut counters = self.counters.lock();

        let was_active = counters.queued > 0;
        counters.queued = add_clamped(counters.queued, action.delta(), self.max_count);

        if was_active != (counters.queued > 0) {
            action
        } else {
            NoteAction::None
        }
    }

    /// Records that the action's wire message was sent (or that there was
    /// nothing to send).
    pub fn process_completed(&self, action: NoteAction) {
        let mut counters = self.counters.lock();

        let delta = action.delta();
        if delta < 0 && counters.actual == 0 {
            debug_assert!(false, "release completed with no presses outstanding");
            warn!("Release completed with no presses outstanding.");
        }
        counters.actual = add_clamped(counters.actual, delta, self.max_count);
    }

    /// Reverses the action's effect on the queued count after its event was
    /// dropped without being sent.
    pub fn process_cancelled(&self, action: NoteAction) {
        let mut counters = self.counters.lock();
        counters.queued = add_clamped(counters.queued, -action.delta(), self.max_count);
    }
}

/// Applies a delta to a counter, clamping the result to [0, max].
fn add_clamped(value: u32, delta: i32, max: u32) -> u32 {
    (i64::from(value) + i64::from(delta)).clamp(0, i64::from(max)) as u32
}
