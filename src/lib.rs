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

//! Drives a MIDI-controlled pipe organ.
//!
//! An organ is described as registers of notes and stops. Voices walk
//! positions across register ranges and emit note events, which a rate
//! limited dispatcher delivers to the MIDI device one at a time so the
//! instrument's electromechanical relays are never overdriven.

pub mod config;
pub mod dispatch;
pub mod midi;
pub mod notes;
pub mod organ;
pub mod performance;
pub mod scenes;
pub mod voices;
