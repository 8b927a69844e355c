//! SoundFont synthesis engine.
//!
//! Each of the [`NUM_PARTS`] parts owns its own rustysynth synthesizer built
//! from the instrument loaded into it. Part `i` answers MIDI channel `i`;
//! inside its synthesizer the instrument always plays on a single channel.

use super::bank::{scan_bank_roots, BankContents, BankInfo};
use super::{EngineFactory, SynthEngine, NUM_PARTS};
use crate::context::ProcessContext;
use crate::error::{BridgeError, Result};
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Version tag written into every state chunk.
pub const STATE_VERSION: u32 = 1;

/// Default part volume (MIDI CC 7).
const DEFAULT_VOLUME: u8 = 100;

/// Default part pan (MIDI CC 10), centered.
const DEFAULT_PAN: u8 = 64;

/// MIDI channel rustysynth treats as percussion.
const PERCUSSION_CHANNEL: i32 = 9;

/// Polyphony limits accepted by rustysynth.
const MIN_POLYPHONY: usize = 8;
const MAX_POLYPHONY: usize = 256;

/// Identifies the instrument file loaded into a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct InstrumentRef {
    path: PathBuf,
    name: String,
}

/// A part with an instrument loaded.
struct PartVoice {
    synth: Synthesizer,
    /// Channel of `synth` the instrument plays on.
    channel: i32,
    instrument: InstrumentRef,
}

struct Part {
    volume: u8,
    pan: u8,
    voice: Option<PartVoice>,
}

impl Default for Part {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
            pan: DEFAULT_PAN,
            voice: None,
        }
    }
}

/// Serialized form of the whole engine.
#[derive(Debug, Serialize, Deserialize)]
struct EngineSnapshot {
    version: u32,
    master_volume: f32,
    parts: Vec<PartSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartSnapshot {
    instrument: Option<InstrumentRef>,
    volume: u8,
    pan: u8,
}

/// The rustysynth-backed engine.
pub struct SoundFontEngine {
    context: Arc<ProcessContext>,
    banks: Vec<BankInfo>,
    bank: BankContents,
    parts: Vec<Part>,
    master_volume: f32,
    /// Per-part render scratch, one block long.
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
    /// Most recently parsed SoundFont, reused when several parts load the
    /// same file.
    last_loaded: Option<(PathBuf, Arc<SoundFont>)>,
}

impl SoundFontEngine {
    /// Creates an engine with empty parts and scans the configured bank
    /// roots.
    ///
    /// # Arguments
    ///
    /// * `context` - The process-wide context
    pub fn new(context: Arc<ProcessContext>) -> Self {
        let block = context.buffer_size();
        let mut engine = Self {
            context,
            banks: Vec::new(),
            bank: BankContents::default(),
            parts: (0..NUM_PARTS).map(|_| Part::default()).collect(),
            master_volume: 1.0,
            scratch_left: vec![0.0; block],
            scratch_right: vec![0.0; block],
            last_loaded: None,
        };
        engine.rescan_banks();
        engine
    }

    /// Returns the name of the instrument loaded into a part.
    pub fn part_instrument(&self, part: usize) -> Option<&str> {
        self.parts
            .get(part)?
            .voice
            .as_ref()
            .map(|v| v.instrument.name.as_str())
    }

    /// Returns the master output gain.
    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Sets the master output gain. Non-finite values are ignored.
    pub fn set_master_volume(&mut self, volume: f32) {
        if volume.is_finite() {
            self.master_volume = volume.max(0.0);
        }
    }

    fn settings(&self) -> SynthesizerSettings {
        let config = self.context.config();
        let mut settings = SynthesizerSettings::new(config.sample_rate as i32);
        settings.maximum_polyphony = config.max_polyphony.clamp(MIN_POLYPHONY, MAX_POLYPHONY);
        settings.enable_reverb_and_chorus = config.enable_reverb_and_chorus;
        settings
    }

    /// Parses a SoundFont file, reusing the last one when the path matches.
    fn open_soundfont(&mut self, path: &Path) -> Result<Arc<SoundFont>> {
        if let Some((loaded_path, soundfont)) = &self.last_loaded {
            if loaded_path == path {
                return Ok(Arc::clone(soundfont));
            }
        }

        let file = File::open(path).map_err(|e| BridgeError::InstrumentLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut reader = BufReader::new(file);
        let soundfont = Arc::new(SoundFont::new(&mut reader).map_err(|e| {
            BridgeError::InstrumentLoad {
                path: path.to_path_buf(),
                reason: format!("{:?}", e),
            }
        })?);

        self.last_loaded = Some((path.to_path_buf(), Arc::clone(&soundfont)));
        Ok(soundfont)
    }

    /// Builds a synthesizer playing the instrument's first preset.
    fn build_voice(&mut self, instrument: InstrumentRef, volume: u8, pan: u8) -> Result<PartVoice> {
        let soundfont = self.open_soundfont(&instrument.path)?;
        let settings = self.settings();
        let mut synth = Synthesizer::new(&soundfont, &settings)
            .map_err(|e| BridgeError::Synthesizer(format!("{:?}", e)))?;

        let preset = soundfont
            .get_presets()
            .iter()
            .min_by_key(|p| (p.get_bank_number(), p.get_patch_number()));
        let (channel, bank, patch) = match preset {
            Some(p) if p.get_bank_number() >= 128 => (PERCUSSION_CHANNEL, 0, p.get_patch_number()),
            Some(p) => (0, p.get_bank_number(), p.get_patch_number()),
            None => (0, 0, 0),
        };

        // Bank select (CC 0), program change, volume (CC 7), pan (CC 10)
        synth.process_midi_message(channel, 0xB0, 0, bank);
        synth.process_midi_message(channel, 0xC0, patch, 0);
        synth.process_midi_message(channel, 0xB0, 7, volume as i32);
        synth.process_midi_message(channel, 0xB0, 10, pan as i32);

        Ok(PartVoice {
            synth,
            channel,
            instrument,
        })
    }

    fn voice_for_channel(&mut self, channel: u8) -> Option<&mut PartVoice> {
        self.parts.get_mut(channel as usize)?.voice.as_mut()
    }
}

impl SynthEngine for SoundFontEngine {
    fn rescan_banks(&mut self) {
        self.banks = scan_bank_roots(&self.context.config().bank_roots);
        tracing::debug!("found {} banks", self.banks.len());
    }

    fn banks(&self) -> &[BankInfo] {
        &self.banks
    }

    fn load_bank(&mut self, dir: &Path) -> Result<()> {
        self.bank = BankContents::load(dir)?;
        Ok(())
    }

    fn slot_name(&self, slot: usize) -> &str {
        self.bank.name(slot)
    }

    fn load_from_slot(&mut self, slot: usize, part: usize) -> Result<()> {
        if part >= NUM_PARTS {
            return Ok(());
        }
        let Some(bank_slot) = self.bank.slot(slot) else {
            tracing::debug!("slot {} of {} is empty", slot, self.bank.dir().display());
            return Ok(());
        };
        let instrument = InstrumentRef {
            path: bank_slot.path.clone(),
            name: bank_slot.name.clone(),
        };

        let (volume, pan) = (self.parts[part].volume, self.parts[part].pan);
        let voice = self.build_voice(instrument, volume, pan)?;
        self.parts[part].voice = Some(voice);
        Ok(())
    }

    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        if let Some(voice) = self.voice_for_channel(channel) {
            voice
                .synth
                .note_on(voice.channel, note as i32, velocity as i32);
        }
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        if let Some(voice) = self.voice_for_channel(channel) {
            voice.synth.note_off(voice.channel, note as i32);
        }
    }

    fn polyphonic_aftertouch(&mut self, channel: u8, note: u8, pressure: u8) {
        if let Some(voice) = self.voice_for_channel(channel) {
            voice
                .synth
                .process_midi_message(voice.channel, 0xA0, note as i32, pressure as i32);
        }
    }

    fn all_notes_off(&mut self) {
        for voice in self.parts.iter_mut().filter_map(|p| p.voice.as_mut()) {
            voice.synth.note_off_all(true);
        }
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let block = self.scratch_left.len();
        let gain = self.master_volume;

        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(block);
            let out_left = &mut left[offset..offset + n];
            let out_right = &mut right[offset..offset + n];
            out_left.fill(0.0);
            out_right.fill(0.0);

            for voice in self.parts.iter_mut().filter_map(|p| p.voice.as_mut()) {
                let part_left = &mut self.scratch_left[..n];
                let part_right = &mut self.scratch_right[..n];
                voice.synth.render(part_left, part_right);

                for (out, sample) in out_left.iter_mut().zip(part_left.iter()) {
                    *out += sample * gain;
                }
                for (out, sample) in out_right.iter_mut().zip(part_right.iter()) {
                    *out += sample * gain;
                }
            }

            self.context.add_denormal_noise(out_left);
            self.context.add_denormal_noise(out_right);
            offset += n;
        }
    }

    fn serialize_state(&self) -> Result<Vec<u8>> {
        let snapshot = EngineSnapshot {
            version: STATE_VERSION,
            master_volume: self.master_volume,
            parts: self
                .parts
                .iter()
                .map(|part| PartSnapshot {
                    instrument: part.voice.as_ref().map(|v| v.instrument.clone()),
                    volume: part.volume,
                    pan: part.pan,
                })
                .collect(),
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    fn deserialize_state(&mut self, data: &[u8]) -> Result<()> {
        let snapshot: EngineSnapshot = bincode::deserialize(data)?;
        if snapshot.version != STATE_VERSION {
            return Err(BridgeError::StateVersion(snapshot.version));
        }

        // Build every part before touching the live ones.
        let mut parts: Vec<Part> = Vec::with_capacity(NUM_PARTS);
        for saved in snapshot.parts.into_iter().take(NUM_PARTS) {
            let voice = match saved.instrument {
                Some(instrument) => {
                    let path = instrument.path.clone();
                    match self.build_voice(instrument, saved.volume, saved.pan) {
                        Ok(voice) => Some(voice),
                        Err(e) => {
                            tracing::warn!("leaving part empty, {} failed: {}", path.display(), e);
                            None
                        }
                    }
                }
                None => None,
            };
            parts.push(Part {
                volume: saved.volume,
                pan: saved.pan,
                voice,
            });
        }
        parts.resize_with(NUM_PARTS, Part::default);

        self.parts = parts;
        self.set_master_volume(snapshot.master_volume);
        Ok(())
    }
}

/// Builds [`SoundFontEngine`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoundFontEngineFactory;

impl EngineFactory for SoundFontEngineFactory {
    type Engine = SoundFontEngine;

    fn create(&self, context: &Arc<ProcessContext>) -> Result<SoundFontEngine> {
        Ok(SoundFontEngine::new(Arc::clone(context)))
    }
}
