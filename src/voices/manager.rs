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

//! The voice manager: owns the live voices and their register capacity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::dispatch::EventSender;
use crate::organ::{Organ, Register};

use super::controller::{Controller, DroneController, RatioController, StepController};
use super::{Voice, VoiceError, VoiceKind};

/// The most voices a register will carry.
pub const MAX_VOICES: usize = 12;

/// The most voices the pedal board will carry.
pub const MAX_PEDAL_VOICES: usize = 6;

/// A voice shared between the manager and its callers.
pub type SharedVoice = Arc<Mutex<Voice>>;

const ID_CHARS: &[u8] = b"0123456789abcdef";

struct Population {
    voices: HashMap<String, SharedVoice>,
    counts: HashMap<String, usize>,
}

/// Owns the live voices and the kind controllers, enforces per register
/// capacity, and fans broadcast operations across every controller.
pub struct VoiceManager {
    organ: Arc<Organ>,
    sender: EventSender,
    population: Mutex<Population>,
    controllers: Vec<Box<dyn Controller>>,
    rejected: AtomicUsize,
}

impl VoiceManager {
    /// Creates a manager over the organ, flushing into the given queue
    /// handle. One controller per voice kind is registered up front.
    pub fn new(organ: Arc<Organ>, sender: EventSender) -> VoiceManager {
        let counts = organ
            .registers()
            .iter()
            .map(|register| (register.name().to_string(), 0))
            .collect();

        VoiceManager {
            organ,
            sender,
            population: Mutex::new(Population {
                voices: HashMap::new(),
                counts,
            }),
            controllers: vec![
                Box::new(RatioController),
                Box::new(StepController),
                Box::new(DroneController),
            ],
            rejected: AtomicUsize::new(0),
        }
    }

    /// The organ the voices play on.
    pub fn organ(&self) -> &Arc<Organ> {
        &self.organ
    }

    /// The queue handle voices flush into.
    pub fn sender(&self) -> &EventSender {
        &self.sender
    }

    /// The number of live voices.
    pub fn len(&self) -> usize {
        self.population.lock().voices.len()
    }

    /// Whether no voices are live.
    pub fn is_empty(&self) -> bool {
        self.population.lock().voices.is_empty()
    }

    /// The number of voice creations refused for capacity.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Looks up a voice by id.
    pub fn voice(&self, id: &str) -> Option<SharedVoice> {
        self.population.lock().voices.get(id).cloned()
    }

    /// A snapshot of all live voices.
    pub fn voices(&self) -> Vec<SharedVoice> {
        self.population.lock().voices.values().cloned().collect()
    }

    /// A snapshot of the live voices of one kind.
    pub fn voices_of(&self, kind: VoiceKind) -> Vec<SharedVoice> {
        self.voices()
            .into_iter()
            .filter(|voice| voice.lock().kind() == kind)
            .collect()
    }

    /// Whether the register can take no more voices.
    pub fn register_full(&self, register: &Register) -> bool {
        Self::full(&self.population.lock(), register)
    }

    /// Creates a voice with the given id on the named register.
    pub fn create_voice(
        &self,
        id: &str,
        register: &str,
        kind: VoiceKind,
    ) -> Result<SharedVoice, VoiceError> {
        let register = self
            .organ
            .register(register)
            .ok_or_else(|| VoiceError::UnknownRegister(register.to_string()))?;

        let mut population = self.population.lock();
        self.admit(&mut population, id, register, kind)
    }

    /// Creates a voice with a generated id on a random register that still
    /// has room.
    pub fn create_random_voice(&self, kind: VoiceKind) -> Result<SharedVoice, VoiceError> {
        let mut population = self.population.lock();

        let open: Vec<Arc<Register>> = self
            .organ
            .registers()
            .iter()
            .filter(|register| !Self::full(&population, register))
            .cloned()
            .collect();
        let register = match open.choose(&mut rand::thread_rng()) {
            Some(register) => register.clone(),
            None => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                error!("Every register already has its maximum number of voices.");
                return Err(VoiceError::AllRegistersFull);
            }
        };

        let id = random_id();
        self.admit(&mut population, &id, register, kind)
    }

    /// Creates up to count voices on random registers, returning how many
    /// were actually placed.
    pub fn create_random_voices(&self, count: usize, kind: VoiceKind) -> usize {
        let mut created = 0;
        for _ in 0..count {
            match self.create_random_voice(kind) {
                Ok(_) => created += 1,
                Err(VoiceError::AllRegistersFull) => break,
                Err(err) => warn!(err = format!("{}", err), "Unable to create a voice."),
            }
        }
        created
    }

    /// Removes a voice, freeing its register slot. A sounding note is not
    /// released by removal; power the voice off and flush it first.
    pub fn remove_voice(&self, id: &str) -> Result<(), VoiceError> {
        let mut population = self.population.lock();
        let voice = population
            .voices
            .remove(id)
            .ok_or_else(|| VoiceError::UnknownVoice(id.to_string()))?;

        let register = voice.lock().register().name().to_string();
        if let Some(count) = population.counts.get_mut(&register) {
            *count = count.saturating_sub(1);
        }
        debug!(voice = id, register, "Removed voice.");
        Ok(())
    }

    /// Powers every voice on.
    pub fn all_on(&self) {
        for controller in &self.controllers {
            controller.all_on(self);
        }
    }

    /// Powers every voice off.
    pub fn all_off(&self) {
        for controller in &self.controllers {
            controller.all_off(self);
        }
    }

    /// Submits every voice's pending events.
    pub fn flush_all(&self) {
        for controller in &self.controllers {
            controller.flush_all(self);
        }
    }

    /// Redraws every voice's note range.
    pub fn assign_random_ranges(&self, pitch_classes: &[&str], keep_current: bool) {
        for controller in &self.controllers {
            controller.assign_random_ranges(self, pitch_classes, keep_current);
        }
    }

    /// Sets the position of every voice with a continuous position.
    pub fn set_all_ratios(&self, ratio: f64) {
        for controller in &self.controllers {
            controller.set_all_ratios(self, ratio);
        }
    }

    /// Moves the position of every voice with a continuous position.
    pub fn shift_all_ratios(&self, delta: f64) {
        for controller in &self.controllers {
            controller.shift_all_ratios(self, delta);
        }
    }

    /// Points every step voice at a note index.
    pub fn set_all_steps(&self, index: usize) {
        for controller in &self.controllers {
            controller.set_all_steps(self, index);
        }
    }

    /// Walks every positioned voice across its range.
    pub fn sweep(&self, step_time: Duration, steps: usize) {
        for controller in &self.controllers {
            controller.sweep(self, step_time, steps);
        }
    }

    fn full(population: &Population, register: &Register) -> bool {
        let ceiling = if register.is_pedal() {
            MAX_PEDAL_VOICES
        } else {
            MAX_VOICES
        };
        population.counts.get(register.name()).copied().unwrap_or(0) >= ceiling
    }

    fn admit(
        &self,
        population: &mut Population,
        id: &str,
        register: Arc<Register>,
        kind: VoiceKind,
    ) -> Result<SharedVoice, VoiceError> {
        if population.voices.contains_key(id) {
            return Err(VoiceError::DuplicateVoice(id.to_string()));
        }
        if Self::full(population, &register) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(VoiceError::RegisterFull(register.name().to_string()));
        }

        let name = register.name().to_string();
        let voice = Arc::new(Mutex::new(Voice::new(id, kind, register)));
        population.voices.insert(id.to_string(), voice.clone());
        *population.counts.entry(name.clone()).or_insert(0) += 1;

        debug!(
            voice = id,
            register = name,
            kind = format!("{}", kind),
            "Created voice."
        );
        Ok(voice)
    }
}

fn random_id() -> String {
    let mut rng = rand::thread_rng();
    (0..10)
        .map(|_| ID_CHARS[rng.gen_range(0..ID_CHARS.len())] as char)
        .collect()
}
