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

//! Scenes: per register note pools for choreography to draw from.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use tracing::warn;

use crate::notes::{self, NoteName};
use crate::organ::Organ;

/// How a scene picks a note from the candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Choice {
    Random,
    FavourLow,
    FavourHigh,
}

/// A set of notes per register, drawn down as choreography assigns them.
/// A drained pool falls back to the full pool so a draw always succeeds
/// while the scene has notes for the register at all.
pub struct Scene {
    choice: Choice,
    repeats_allowed: bool,
    full: HashMap<String, Vec<NoteName>>,
    pool: HashMap<String, Vec<NoteName>>,
}

impl Scene {
    /// Creates a scene over the given per register notes.
    pub fn new(
        register_notes: HashMap<String, Vec<NoteName>>,
        choice: Choice,
        repeats_allowed: bool,
    ) -> Scene {
        Scene {
            choice,
            repeats_allowed,
            pool: register_notes.clone(),
            full: register_notes,
        }
    }

    /// Refills every pool.
    pub fn reset(&mut self) {
        self.pool = self.full.clone();
    }

    /// The notes still available for the register.
    pub fn remaining(&self, register: &str) -> &[NoteName] {
        self.pool.get(register).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Draws a note for the register, never the excluded one if another
    /// candidate exists. Unless repeats are allowed the note leaves the
    /// pool; a drained pool is logged and redrawn from the full pool.
    pub fn draw(&mut self, register: &str, exclude: Option<NoteName>) -> Option<NoteName> {
        let mut rng = rand::thread_rng();

        let pool = match self.pool.get_mut(register) {
            Some(pool) => pool,
            None => {
                warn!(register, "The scene has no notes for this register.");
                return None;
            }
        };

        let candidates: Vec<NoteName> = pool
            .iter()
            .copied()
            .filter(|note| Some(*note) != exclude)
            .collect();
        let selected = match self.choice {
            Choice::Random => candidates.choose(&mut rng).copied(),
            Choice::FavourLow => candidates.first().copied(),
            Choice::FavourHigh => candidates.last().copied(),
        };

        match selected {
            Some(note) => {
                if !self.repeats_allowed {
                    if let Some(position) = pool.iter().position(|candidate| *candidate == note) {
                        pool.remove(position);
                    }
                }
                Some(note)
            }
            None => {
                warn!(register, "Out of notes in the scene pool, re-using.");
                self.full
                    .get(register)
                    .and_then(|notes| notes.choose(&mut rng))
                    .copied()
            }
        }
    }
}

/// Builds per register pools holding every note of the organ that matches
/// one of the pitch classes.
pub fn all_notes(organ: &Organ, pitch_classes: &[&str]) -> HashMap<String, Vec<NoteName>> {
    organ
        .registers()
        .iter()
        .map(|register| {
            (
                register.name().to_string(),
                notes::filter_pitch_classes(&register.note_names(), pitch_classes),
            )
        })
        .collect()
}
