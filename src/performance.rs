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

//! A scripted performance driving the stops and voices.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::notes::{NoteAction, NoteName};
use crate::organ::Stop;
use crate::scenes::{Choice, Scene};
use crate::voices::manager::{SharedVoice, VoiceManager};
use crate::voices::{VoiceError, VoiceKind, DEFAULT_PITCH_CLASSES};

/// Plays a fixed show on the instrument: a stop introduction, sweeping
/// ratio voices across shifting ranges, a growing choir and a final rise.
/// Every wait is plain blocking time.
pub struct Performance {
    manager: Arc<VoiceManager>,
}

impl Performance {
    /// Creates a performance over the given voices.
    pub fn new(manager: Arc<VoiceManager>) -> Performance {
        Performance { manager }
    }

    /// Plays the whole show. Returns once the instrument is silent again;
    /// the trailing dispatcher stop clears anything still sounding.
    pub fn play(&self) {
        let manager = &self.manager;

        // Every register gets a manual voice.
        for register in manager.organ().registers() {
            let id = format!("{}-manual", register.name());
            if let Err(err) = manager.create_voice(&id, register.name(), VoiceKind::Ratio) {
                warn!(err = format!("{}", err), "Unable to create a manual voice.");
            }
        }
        for voice in manager.voices() {
            info!(voice = format!("{}", voice.lock()), "Voice ready.");
        }

        self.stop_intro();

        let mut tutti = Scene::new(
            self.adjusted_notes(&[48, 55, 60, 64, 72]),
            Choice::Random,
            true,
        );

        manager.all_on();
        manager.set_all_ratios(0.0);
        manager.flush_all();

        info!("Setting the first stops.");
        self.send_stops_by_number(
            Duration::from_secs(5),
            &[1, 14, 33, 53, 69],
            NoteAction::Press,
        );
        thread::sleep(Duration::from_secs(1));

        info!("Starting the cycles.");
        for cycle in 0..5u64 {
            let step_time = Duration::from_micros(20_000 / (2 * cycle + 1));
            manager.sweep(step_time, 1000);
            manager.assign_random_ranges(&DEFAULT_PITCH_CLASSES, true);
            self.apply_scene(&mut tutti);
            manager.flush_all();
            thread::sleep(Duration::from_secs(1));
            info!(cycle, "Cycle ended.");
        }

        info!("Setting the second stops.");
        self.send_stops_by_number(
            Duration::from_secs(4),
            &[2, 12, 35, 55, 79],
            NoteAction::Press,
        );
        manager.assign_random_ranges(&DEFAULT_PITCH_CLASSES, true);
        manager.sweep(Duration::from_millis(10), 1000);

        info!("More stops.");
        self.send_stops_by_number(Duration::from_secs(2), &[72, 61, 44, 24], NoteAction::Press);
        thread::sleep(Duration::from_secs(2));

        info!("Growing the choir.");
        for _ in 0..10 {
            match self.add_voice() {
                Ok(voice) => {
                    let voice = voice.lock();
                    info!(
                        voice = voice.id(),
                        register = voice.register().name(),
                        "New voice."
                    );
                }
                Err(err) => warn!(err = format!("{}", err), "Unable to add a voice."),
            }
            thread::sleep(Duration::from_millis(500));
        }
        thread::sleep(Duration::from_secs(3));

        manager.assign_random_ranges(&DEFAULT_PITCH_CLASSES, true);

        info!("Slow cycles.");
        for _ in 0..3 {
            manager.sweep(Duration::from_millis(10), 1000);
            if let Err(err) = self.add_voice() {
                warn!(err = format!("{}", err), "Unable to add a voice.");
            }
            thread::sleep(Duration::from_secs(2));
            manager.assign_random_ranges(&DEFAULT_PITCH_CLASSES, true);
        }

        info!("Fast cycles.");
        for _ in 0..3 {
            manager.sweep(Duration::from_millis(1), 1000);
            if let Err(err) = self.add_voice() {
                warn!(err = format!("{}", err), "Unable to add a voice.");
            }
            thread::sleep(Duration::from_secs(2));
            manager.assign_random_ranges(&DEFAULT_PITCH_CLASSES, true);
        }
        thread::sleep(Duration::from_secs(1));

        info!(voices = manager.len(), "Final rise.");
        manager.sweep(Duration::from_millis(50), 1000);

        info!("Setting every stop.");
        let stops = self.playable_stops();
        self.send_stop_events(Duration::from_secs(10), &stops, NoteAction::Press);
        thread::sleep(Duration::from_secs(4));

        info!("Silence.");
        manager.all_off();
        manager.flush_all();
        thread::sleep(Duration::from_secs(1));
        self.send_stop_events(Duration::ZERO, &stops, NoteAction::Release);
    }

    /// Walks every playable stop on and off in accelerating waves.
    pub fn stop_intro(&self) {
        let stops = self.playable_stops();
        info!(stops = stops.len(), "Playing the stop introduction.");

        self.send_stop_events(Duration::from_secs(8), &stops, NoteAction::Press);
        self.send_stop_events(Duration::from_secs(6), &stops, NoteAction::Release);
        self.send_stop_events(Duration::from_secs(4), &stops, NoteAction::Press);
        self.send_stop_events(Duration::from_secs(2), &stops, NoteAction::Release);
        self.send_stop_events(Duration::from_secs(1), &stops, NoteAction::Press);
        thread::sleep(Duration::from_millis(500));
        self.send_stop_events(Duration::ZERO, &stops, NoteAction::Release);
        thread::sleep(Duration::from_millis(500));
    }

    /// Creates a powered-on ratio voice on a random register with a random
    /// range, and flushes its first press.
    pub fn add_voice(&self) -> Result<SharedVoice, VoiceError> {
        let voice = self.manager.create_random_voice(VoiceKind::Ratio)?;
        {
            let mut voice = voice.lock();
            if let Err(err) = voice.assign_random_range(&DEFAULT_PITCH_CLASSES, false) {
                warn!(
                    voice = voice.id(),
                    err = format!("{}", err),
                    "Unable to range the new voice."
                );
            }
            voice.power_on();
            voice.flush(self.manager.sender());
        }
        Ok(voice)
    }

    /// Ranges every voice onto two notes drawn from the scene for its
    /// register.
    pub fn apply_scene(&self, scene: &mut Scene) {
        for voice in self.manager.voices() {
            let mut voice = voice.lock();
            let register = voice.register().name().to_string();

            let first = match scene.draw(&register, None) {
                Some(note) => note,
                None => continue,
            };
            let second = match scene.draw(&register, Some(first)) {
                Some(note) => note,
                None => continue,
            };

            if let Err(err) = voice.assign_range(first, second) {
                warn!(
                    voice = voice.id(),
                    err = format!("{}", err),
                    "Unable to range the voice onto the scene."
                );
            }
        }
    }

    /// The stops worth playing: neither duplicates nor effects.
    pub fn playable_stops(&self) -> Vec<Arc<Stop>> {
        self.manager
            .organ()
            .stops()
            .into_iter()
            .filter(|stop| stop.playable())
            .collect()
    }

    /// Spreads the stop events evenly across the given span.
    fn send_stop_events(&self, span: Duration, stops: &[Arc<Stop>], action: NoteAction) {
        if stops.is_empty() {
            return;
        }

        let delay = span / stops.len() as u32;
        for stop in stops {
            thread::sleep(delay);
            self.manager.sender().submit(stop.stop_event(action));
        }
    }

    /// Spreads events for the numbered stops evenly across the given span.
    fn send_stops_by_number(&self, span: Duration, numbers: &[u8], action: NoteAction) {
        let stops: Vec<Arc<Stop>> = self
            .playable_stops()
            .into_iter()
            .filter(|stop| {
                numbers
                    .iter()
                    .any(|number| NoteName::from_number(*number) == Some(stop.number()))
            })
            .collect();
        self.send_stop_events(span, &stops, action);
    }

    /// Builds per register pools from the note numbers, with the pedal
    /// board transposed down an octave.
    fn adjusted_notes(&self, numbers: &[u8]) -> HashMap<String, Vec<NoteName>> {
        let mut pools = HashMap::new();
        for register in self.manager.organ().registers() {
            let notes: Vec<NoteName> = numbers
                .iter()
                .filter_map(|number| {
                    let number = if register.is_pedal() {
                        number.checked_sub(12)?
                    } else {
                        *number
                    };
                    NoteName::from_number(number)
                })
                .collect();
            pools.insert(register.name().to_string(), notes);
        }
        pools
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;
    use std::time::Instant;

    use midly::num::{u4, u7};

    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::organ::{Organ, Register};
    use crate::test::eventually;

    fn make_organ() -> Arc<Organ> {
        let stops = vec![
            Stop::new("Principal", u7::new(1), Some(8), false, false, u4::new(13), 5),
            Stop::new("Octava", u7::new(2), Some(4), false, false, u4::new(13), 5),
            Stop::new("Octava kopia", u7::new(3), None, true, false, u4::new(13), 5),
            Stop::new("Zimbelstern", u7::new(4), None, false, true, u4::new(13), 5),
        ];
        Arc::new(Organ::new(
            "Test",
            vec![
                Register::new(
                    "Great",
                    u4::new(0),
                    NoteName::Note(u7::new(36)),
                    NoteName::Note(u7::new(96)),
                    5,
                    false,
                    stops,
                ),
                Register::new(
                    "Pedal",
                    u4::new(1),
                    NoteName::Note(u7::new(24)),
                    NoteName::Note(u7::new(50)),
                    5,
                    true,
                    Vec::new(),
                ),
            ],
        ))
    }

    fn make_performance() -> (Dispatcher, Performance, crate::midi::test::Device) {
        let mock = crate::midi::test::Device::get("mock performance");
        let dispatcher = Dispatcher::new(Arc::new(mock.clone()), 256, Duration::ZERO);
        let manager = Arc::new(VoiceManager::new(make_organ(), dispatcher.sender()));
        (dispatcher, Performance::new(manager), mock)
    }

    #[test]
    fn test_playable_stops() {
        let (_dispatcher, performance, _mock) = make_performance();

        let names: Vec<String> = performance
            .playable_stops()
            .iter()
            .map(|stop| stop.name().to_string())
            .collect();
        assert_eq!(names, vec!["Principal", "Octava"]);
    }

    #[test]
    fn test_stop_events_are_paced_across_the_span() -> Result<(), Box<dyn Error>> {
        let (dispatcher, performance, mock) = make_performance();
        dispatcher.start()?;

        let stops = performance.playable_stops();
        let span = Duration::from_millis(200);
        let started = Instant::now();
        performance.send_stop_events(span, &stops, NoteAction::Press);
        assert!(started.elapsed() >= span);

        eventually(|| mock.sent_events().len() == 2, "stops were not sent");
        dispatcher.stop()?;
        Ok(())
    }

    #[test]
    fn test_add_voice_sounds_immediately() -> Result<(), Box<dyn Error>> {
        let (dispatcher, performance, mock) = make_performance();
        dispatcher.start()?;

        let voice = performance.add_voice()?;
        assert!(voice.lock().is_on());
        eventually(|| !mock.sent_events().is_empty(), "press was not sent");

        dispatcher.stop()?;
        Ok(())
    }

    #[test]
    fn test_apply_scene_ranges_voices() -> Result<(), Box<dyn Error>> {
        let (_dispatcher, performance, _mock) = make_performance();
        let manager = &performance.manager;

        manager.create_voice("great", "Great", VoiceKind::Ratio)?;
        let mut pools = HashMap::new();
        pools.insert(
            "Great".to_string(),
            vec![NoteName::Note(u7::new(48)), NoteName::Note(u7::new(60))],
        );
        let mut scene = Scene::new(pools, Choice::FavourLow, false);

        performance.apply_scene(&mut scene);

        let voice = manager.voice("great").expect("voice should exist");
        let voice = voice.lock();
        assert_eq!(voice.notes().first(), Some(&NoteName::Note(u7::new(48))));
        assert_eq!(voice.notes().last(), Some(&NoteName::Note(u7::new(60))));
        Ok(())
    }

    #[test]
    fn test_adjusted_notes_transposes_the_pedals() {
        let (_dispatcher, performance, _mock) = make_performance();

        let pools = performance.adjusted_notes(&[48, 60]);
        assert_eq!(
            pools["Great"],
            vec![NoteName::Note(u7::new(48)), NoteName::Note(u7::new(60))]
        );
        assert_eq!(
            pools["Pedal"],
            vec![NoteName::Note(u7::new(36)), NoteName::Note(u7::new(48))]
        );
    }
}
