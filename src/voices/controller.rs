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

//! Kind controllers: the broadcast surface over all voices of one kind.

use std::time::{Duration, Instant};

use tracing::warn;

use super::manager::VoiceManager;
use super::VoiceKind;

/// Drives every voice of one kind. Power, flushing and range operations
/// share one implementation; position operations only exist for kinds
/// with a position, the rest ignore them.
pub trait Controller: Send + Sync {
    /// The voice kind this controller drives.
    fn kind(&self) -> VoiceKind;

    /// Powers every voice of this kind on.
    fn all_on(&self, manager: &VoiceManager) {
        for voice in manager.voices_of(self.kind()) {
            voice.lock().power_on();
        }
    }

    /// Powers every voice of this kind off.
    fn all_off(&self, manager: &VoiceManager) {
        for voice in manager.voices_of(self.kind()) {
            voice.lock().power_off();
        }
    }

    /// Submits the pending events of every voice of this kind.
    fn flush_all(&self, manager: &VoiceManager) {
        for voice in manager.voices_of(self.kind()) {
            voice.lock().flush(manager.sender());
        }
    }

    /// Redraws the note range of every voice of this kind.
    fn assign_random_ranges(
        &self,
        manager: &VoiceManager,
        pitch_classes: &[&str],
        keep_current: bool,
    ) {
        for voice in manager.voices_of(self.kind()) {
            let mut voice = voice.lock();
            if let Err(err) = voice.assign_random_range(pitch_classes, keep_current) {
                warn!(
                    voice = voice.id(),
                    err = format!("{}", err),
                    "Unable to reassign the voice range."
                );
            }
        }
    }

    /// Sets the continuous position of every voice of this kind.
    fn set_all_ratios(&self, _manager: &VoiceManager, _ratio: f64) {}

    /// Moves the continuous position of every voice of this kind.
    fn shift_all_ratios(&self, _manager: &VoiceManager, _delta: f64) {}

    /// Points every voice of this kind at a note index.
    fn set_all_steps(&self, _manager: &VoiceManager, _index: usize) {}

    /// Walks every voice of this kind across its range, flushing after
    /// each step and pacing the steps.
    fn sweep(&self, _manager: &VoiceManager, _step_time: Duration, _steps: usize) {}
}

/// Controls the voices addressed by a continuous position.
pub struct RatioController;

impl Controller for RatioController {
    fn kind(&self) -> VoiceKind {
        VoiceKind::Ratio
    }

    fn set_all_ratios(&self, manager: &VoiceManager, ratio: f64) {
        for voice in manager.voices_of(self.kind()) {
            voice.lock().set_ratio(ratio);
        }
    }

    fn shift_all_ratios(&self, manager: &VoiceManager, delta: f64) {
        for voice in manager.voices_of(self.kind()) {
            voice.lock().shift_ratio(delta);
        }
    }

    fn sweep(&self, manager: &VoiceManager, step_time: Duration, steps: usize) {
        if steps == 0 {
            return;
        }

        self.set_all_ratios(manager, 0.0);
        self.flush_all(manager);

        // One extra step so rounding never leaves the sweep short of the
        // top. The increments clamp at 1.0.
        let increment = 1.0 / steps as f64;
        let mut next_step = Instant::now();
        for _ in 0..=steps {
            self.shift_all_ratios(manager, increment);
            self.flush_all(manager);

            next_step += step_time;
            spin_sleep::sleep(next_step - Instant::now());
        }
    }
}

/// Controls the voices addressed by a note index.
pub struct StepController;

impl Controller for StepController {
    fn kind(&self) -> VoiceKind {
        VoiceKind::Step
    }

    fn set_all_steps(&self, manager: &VoiceManager, index: usize) {
        for voice in manager.voices_of(self.kind()) {
            let mut voice = voice.lock();
            // Voices with shorter ranges sit the step out.
            if index < voice.len() {
                voice.set_step(index);
            }
        }
    }

    fn sweep(&self, manager: &VoiceManager, step_time: Duration, steps: usize) {
        let mut next_step = Instant::now();
        for index in 0..=steps {
            self.set_all_steps(manager, index);
            self.flush_all(manager);

            next_step += step_time;
            spin_sleep::sleep(next_step - Instant::now());
        }
    }
}

/// Controls the drones. Drones have no position, so only the shared
/// operations apply.
pub struct DroneController;

impl Controller for DroneController {
    fn kind(&self) -> VoiceKind {
        VoiceKind::Drone
    }
}
