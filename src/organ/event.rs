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
use std::sync::Arc;
use std::time::Instant;

use midly::live::LiveEvent;
use midly::num::u4;
use tracing::debug;

use super::state::ActivationState;
use crate::notes::{NoteAction, NoteName};

/// An admitted action on an addressable note, ready for the dispatch queue.
///
/// Every event must be resolved exactly once, either with [`complete`] after
/// its message hit the wire (or there was nothing to send), or with
/// [`cancel`] when it is dropped without being sent. Both take the event by
/// value, so the type system rules out double resolution.
///
/// [`complete`]: DispatchEvent::complete
/// [`cancel`]: DispatchEvent::cancel
pub struct DispatchEvent {
    register: String,
    note: NoteName,
    channel: u4,
    action: NoteAction,
    payload: Option<LiveEvent<'static>>,
    state: Arc<ActivationState>,
    created_at: Instant,
}

impl DispatchEvent {
    /// Creates an event for an action that was already admitted by the
    /// note's activation state.
    pub fn new(
        register: &str,
        note: NoteName,
        channel: u4,
        action: NoteAction,
        state: Arc<ActivationState>,
    ) -> DispatchEvent {
        let payload = note
            .number()
            .and_then(|key| action.to_midi_event(channel, key));

        DispatchEvent {
            register: register.to_string(),
            note,
            channel,
            action,
            payload,
            state,
            created_at: Instant::now(),
        }
    }

    /// The admitted action this event carries.
    pub fn action(&self) -> NoteAction {
        self.action
    }

    /// The note this event addresses.
    pub fn note(&self) -> NoteName {
        self.note
    }

    /// The wire message to send, if this event has one. Absorbed actions and
    /// actions on the null note carry no payload.
    pub fn payload(&self) -> Option<&LiveEvent<'static>> {
        self.payload.as_ref()
    }

    /// Records this event as done: its message was sent, or it had none.
    pub fn complete(self) {
        debug!(
            event = format!("{}", self),
            queued_for = format!("{:?}", self.created_at.elapsed()),
            "Completed event."
        );
        self.state.process_completed(self.action);
    }

    /// Records this event as dropped without its message being sent, undoing
    /// its effect on the note's queued count.
    pub fn cancel(self) {
        debug!(event = format!("{}", self), "Cancelled event.");
        self.state.process_cancelled(self.action);
    }
}

/// Channels are displayed 1-indexed, matching the configuration format.
impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on '{}' over channel {}",
            self.action,
            self.note,
            self.register,
            self.channel.as_int() + 1
        )
    }
}
