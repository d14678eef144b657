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

/// Typed error for config load/parse and validation failures so callers can
/// distinguish e.g. file-not-found from a bad topology without string
/// matching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("channel {0} is out of bounds [1, 16]")]
    InvalidChannel(u8),
    #[error("note {0} is out of bounds [0, 127]")]
    InvalidNote(u8),
    #[error("note range [{low}, {high}] must be ascending")]
    InvalidNoteRange { low: u8, high: u8 },
    #[error("stop number {0} is out of bounds [0, 127]")]
    InvalidStopNumber(u8),
    #[error("the instrument has no registers")]
    NoRegisters,
    #[error("register '{0}' is defined twice")]
    DuplicateRegister(String),
    #[error("'{0}' is not a valid minimum gap duration")]
    InvalidMinGap(String),
}
