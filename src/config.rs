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

//! The YAML instrument topology and output settings.

use std::path::Path;
use std::time::Duration;

use config::{Config, File};
use duration_string::DurationString;
use midly::num::u4;
use serde::Deserialize;

use crate::notes::NoteName;
use crate::organ;

pub mod error;

use error::ConfigError;

/// The instrument name used when the config does not carry one.
const DEFAULT_NAME: &str = "Generic";

/// The note span registers get when neither they nor the defaults carry one.
const DEFAULT_LOW_NOTE: u8 = 36;
const DEFAULT_HIGH_NOTE: u8 = 93;

/// The polyphony ceiling per note when the config does not carry one.
const DEFAULT_MAX_ACTIVATIONS: u32 = 5;

/// The number of events the dispatch queue holds.
const DEFAULT_QUEUE_SIZE: usize = 512;

/// The minimum time between physical sends.
const DEFAULT_MIN_GAP: Duration = Duration::from_millis(5);

/// The config channel stops are switched on.
const DEFAULT_STOP_CHANNEL: u8 = 14;

/// A YAML representation of an instrument.
#[derive(Deserialize, Debug, Clone)]
pub struct Instrument {
    /// Values shared by all registers unless they override them.
    defaults: Option<Defaults>,
    /// The registers of the instrument.
    registers: Vec<Register>,
    /// The physical output settings.
    output: Option<Output>,
}

/// Fallback values for the registers.
#[derive(Deserialize, Debug, Clone)]
struct Defaults {
    /// The name of the instrument.
    name: Option<String>,
    /// The note span registers get when they carry none.
    note_range: Option<NoteRange>,
    /// The per note polyphony ceiling registers get when they carry none.
    max_activations: Option<u32>,
}

/// A note span given as MIDI note numbers.
#[derive(Deserialize, Debug, Clone, Copy)]
struct NoteRange {
    /// The lowest note, inclusive.
    low: u8,
    /// The highest note, inclusive.
    high: u8,
}

/// A YAML representation of a register.
#[derive(Deserialize, Debug, Clone)]
struct Register {
    /// The name of the register.
    name: String,
    /// The MIDI settings of the register.
    midi: Midi,
    /// The note span of the register.
    note_range: Option<NoteRange>,
    /// The per note polyphony ceiling.
    max_activations: Option<u32>,
    /// Whether this register is the pedal board.
    pedal: Option<bool>,
    /// The stops of the register.
    stops: Option<Vec<Stop>>,
}

/// The MIDI settings of a register.
#[derive(Deserialize, Debug, Clone)]
struct Midi {
    /// The channel the register sounds on. Expected to be in [1, 16].
    channel: u8,
}

/// A YAML representation of a stop.
#[derive(Deserialize, Debug, Clone)]
struct Stop {
    /// The name of the stop.
    name: String,
    /// The note number that switches the stop.
    number: u8,
    /// The pipe length of the stop, in feet.
    size: Option<u32>,
    /// Whether this stop doubles another one.
    duplicates: Option<bool>,
    /// Whether this stop is an effect rather than a rank.
    effect: Option<bool>,
}

/// The physical output settings.
#[derive(Deserialize, Debug, Clone)]
struct Output {
    /// A substring of the MIDI device name to send through.
    device: Option<String>,
    /// The number of events the dispatch queue holds.
    queue_size: Option<usize>,
    /// The minimum time between physical sends, as a duration string.
    min_gap: Option<String>,
    /// The channel stops are switched on. Expected to be in [1, 16].
    stop_channel: Option<u8>,
}

impl Instrument {
    /// Deserializes a file from the path into an instrument configuration
    /// struct.
    pub fn deserialize(path: &Path) -> Result<Instrument, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Instrument>()?)
    }

    /// The name of the instrument.
    pub fn name(&self) -> &str {
        match &self.defaults {
            Some(defaults) => defaults.name.as_deref().unwrap_or(DEFAULT_NAME),
            None => DEFAULT_NAME,
        }
    }

    /// The MIDI device substring to send through, if one is configured.
    pub fn device(&self) -> Option<&str> {
        self.output.as_ref().and_then(|output| output.device.as_deref())
    }

    /// The number of events the dispatch queue holds.
    pub fn queue_size(&self) -> usize {
        self.output
            .as_ref()
            .and_then(|output| output.queue_size)
            .unwrap_or(DEFAULT_QUEUE_SIZE)
    }

    /// The minimum time between physical sends.
    pub fn min_gap(&self) -> Result<Duration, ConfigError> {
        let raw = match self.output.as_ref().and_then(|output| output.min_gap.as_deref()) {
            Some(raw) => raw,
            None => return Ok(DEFAULT_MIN_GAP),
        };
        match DurationString::from_string(raw.to_string()) {
            Ok(duration) => Ok(duration.into()),
            Err(_) => Err(ConfigError::InvalidMinGap(raw.to_string())),
        }
    }

    /// The wire channel stops are switched on.
    pub fn stop_channel(&self) -> Result<u4, ConfigError> {
        parse_channel(
            self.output
                .as_ref()
                .and_then(|output| output.stop_channel)
                .unwrap_or(DEFAULT_STOP_CHANNEL),
        )
    }

    /// Converts the configuration into an organ, validating it as a whole.
    pub fn to_organ(&self) -> Result<organ::Organ, ConfigError> {
        if self.registers.is_empty() {
            return Err(ConfigError::NoRegisters);
        }

        let defaults = self.defaults.as_ref();
        let default_range = defaults.and_then(|defaults| defaults.note_range).unwrap_or(NoteRange {
            low: DEFAULT_LOW_NOTE,
            high: DEFAULT_HIGH_NOTE,
        });
        let default_max = defaults
            .and_then(|defaults| defaults.max_activations)
            .unwrap_or(DEFAULT_MAX_ACTIVATIONS);
        let stop_channel = self.stop_channel()?;

        let mut registers = Vec::with_capacity(self.registers.len());
        let mut seen: Vec<&str> = Vec::with_capacity(self.registers.len());
        for register in &self.registers {
            if seen.contains(&register.name.as_str()) {
                return Err(ConfigError::DuplicateRegister(register.name.clone()));
            }
            seen.push(&register.name);
            registers.push(register.to_register(default_range, default_max, stop_channel)?);
        }

        Ok(organ::Organ::new(self.name(), registers))
    }
}

impl Register {
    /// Converts the configuration into a register with its stops.
    fn to_register(
        &self,
        default_range: NoteRange,
        default_max: u32,
        stop_channel: u4,
    ) -> Result<organ::Register, ConfigError> {
        let channel = parse_channel(self.midi.channel)?;
        let range = self.note_range.unwrap_or(default_range);
        let max_activations = self.max_activations.unwrap_or(default_max);

        let (low, high) = (parse_note(range.low)?, parse_note(range.high)?);
        if range.low >= range.high {
            return Err(ConfigError::InvalidNoteRange {
                low: range.low,
                high: range.high,
            });
        }

        let mut stops = Vec::new();
        for stop in self.stops.iter().flatten() {
            stops.push(stop.to_stop(stop_channel, max_activations)?);
        }

        Ok(organ::Register::new(
            &self.name,
            channel,
            low,
            high,
            max_activations,
            self.pedal.unwrap_or(false),
            stops,
        ))
    }
}

impl Stop {
    /// Converts the configuration into a stop on the stop channel.
    fn to_stop(&self, stop_channel: u4, max_activations: u32) -> Result<organ::Stop, ConfigError> {
        let number = match NoteName::from_number(self.number) {
            Some(NoteName::Note(number)) => number,
            _ => return Err(ConfigError::InvalidStopNumber(self.number)),
        };

        Ok(organ::Stop::new(
            &self.name,
            number,
            self.size,
            self.duplicates.unwrap_or(false),
            self.effect.unwrap_or(false),
            stop_channel,
            max_activations,
        ))
    }
}

/// Parses a channel from the config. Input is expected to be [1, 16].
fn parse_channel(channel: u8) -> Result<u4, ConfigError> {
    channel
        .checked_sub(1)
        .and_then(u4::try_from)
        .ok_or(ConfigError::InvalidChannel(channel))
}

/// Parses a note number from the config.
fn parse_note(number: u8) -> Result<NoteName, ConfigError> {
    NoteName::from_number(number).ok_or(ConfigError::InvalidNote(number))
}

#[cfg(test)]
mod test {
    use std::error::Error;
    use std::io::Write;

    use config::FileFormat;
    use midly::num::u7;

    use super::*;

    fn parse(yaml: &str) -> Result<Instrument, Box<dyn Error>> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Instrument>()?)
    }

    const FULL_CONFIG: &str = r#"
        defaults:
          name: Hallgrimskirkja
          note_range:
            low: 36
            high: 93
          max_activations: 5
        output:
          device: mock output
          queue_size: 256
          min_gap: 2ms
          stop_channel: 14
        registers:
          - name: Great
            midi:
              channel: 1
            stops:
              - name: Principal 8'
                number: 1
                size: 8
              - name: Mixtur V
                number: 23
                effect: true
          - name: Swell
            midi:
              channel: 2
            note_range:
              low: 48
              high: 84
          - name: Pedal
            midi:
              channel: 3
            pedal: true
            max_activations: 2
    "#;

    #[test]
    fn test_full_config() -> Result<(), Box<dyn Error>> {
        let instrument = parse(FULL_CONFIG)?;

        assert_eq!(instrument.name(), "Hallgrimskirkja");
        assert_eq!(instrument.device(), Some("mock output"));
        assert_eq!(instrument.queue_size(), 256);
        assert_eq!(instrument.min_gap()?, Duration::from_millis(2));
        assert_eq!(instrument.stop_channel()?, u4::new(13));

        let organ = instrument.to_organ()?;
        assert_eq!(organ.registers().len(), 3);

        let great = organ.register("Great").expect("register should exist");
        assert_eq!(great.channel(), u4::new(0));
        assert_eq!(great.lowest_note_name(), NoteName::Note(u7::new(36)));
        assert_eq!(great.highest_note_name(), NoteName::Note(u7::new(93)));
        assert_eq!(great.stops().len(), 2);
        assert!(!great.is_pedal());

        // The effect stop is not playable.
        let playable: Vec<bool> = great.stops().iter().map(|stop| stop.playable()).collect();
        assert_eq!(playable, vec![true, false]);

        let swell = organ.register("Swell").expect("register should exist");
        assert_eq!(swell.lowest_note_name(), NoteName::Note(u7::new(48)));
        assert_eq!(swell.highest_note_name(), NoteName::Note(u7::new(84)));

        let pedal = organ.register("Pedal").expect("register should exist");
        assert!(pedal.is_pedal());
        Ok(())
    }

    #[test]
    fn test_defaults() -> Result<(), Box<dyn Error>> {
        let instrument = parse(
            r#"
            registers:
              - name: Great
                midi:
                  channel: 1
        "#,
        )?;

        assert_eq!(instrument.name(), "Generic");
        assert_eq!(instrument.device(), None);
        assert_eq!(instrument.queue_size(), 512);
        assert_eq!(instrument.min_gap()?, Duration::from_millis(5));
        assert_eq!(instrument.stop_channel()?, u4::new(13));

        let organ = instrument.to_organ()?;
        let great = organ.register("Great").expect("register should exist");
        assert_eq!(great.lowest_note_name(), NoteName::Note(u7::new(36)));
        assert_eq!(great.highest_note_name(), NoteName::Note(u7::new(93)));
        Ok(())
    }

    #[test]
    fn test_invalid_channel() -> Result<(), Box<dyn Error>> {
        for channel in [0, 17] {
            let instrument = parse(&format!(
                r#"
                registers:
                  - name: Great
                    midi:
                      channel: {}
            "#,
                channel
            ))?;
            assert!(matches!(
                instrument.to_organ(),
                Err(ConfigError::InvalidChannel(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn test_invalid_note_range() -> Result<(), Box<dyn Error>> {
        let instrument = parse(
            r#"
            registers:
              - name: Great
                midi:
                  channel: 1
                note_range:
                  low: 60
                  high: 48
        "#,
        )?;
        assert!(matches!(
            instrument.to_organ(),
            Err(ConfigError::InvalidNoteRange { low: 60, high: 48 })
        ));
        Ok(())
    }

    #[test]
    fn test_no_registers() -> Result<(), Box<dyn Error>> {
        let instrument = parse("registers: []")?;
        assert!(matches!(
            instrument.to_organ(),
            Err(ConfigError::NoRegisters)
        ));
        Ok(())
    }

    #[test]
    fn test_duplicate_registers() -> Result<(), Box<dyn Error>> {
        let instrument = parse(
            r#"
            registers:
              - name: Great
                midi:
                  channel: 1
              - name: Great
                midi:
                  channel: 2
        "#,
        )?;
        assert!(matches!(
            instrument.to_organ(),
            Err(ConfigError::DuplicateRegister(_))
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_min_gap() -> Result<(), Box<dyn Error>> {
        let instrument = parse(
            r#"
            output:
              min_gap: quickly
            registers:
              - name: Great
                midi:
                  channel: 1
        "#,
        )?;
        assert!(matches!(
            instrument.min_gap(),
            Err(ConfigError::InvalidMinGap(_))
        ));
        Ok(())
    }

    #[test]
    fn test_deserialize_from_file() -> Result<(), Box<dyn Error>> {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile()?;
        file.write_all(FULL_CONFIG.as_bytes())?;

        let instrument = Instrument::deserialize(file.path())?;
        assert_eq!(instrument.name(), "Hallgrimskirkja");
        Ok(())
    }
}
