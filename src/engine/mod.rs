//! The synthesis engine seam.
//!
//! The bridge never synthesizes audio itself. It drives an engine through
//! the [`SynthEngine`] trait: bank browsing, note events, block rendering
//! and opaque state snapshots. [`SoundFontEngine`] is the shipped
//! implementation on top of rustysynth.

pub mod bank;
pub mod soundfont;

use crate::context::ProcessContext;
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;

pub use bank::{BankContents, BankInfo, BankSlot};
pub use soundfont::{SoundFontEngine, SoundFontEngineFactory};

/// Number of program slots in every bank.
pub const BANK_SIZE: usize = 160;

/// Number of synthesis parts; part `i` listens on MIDI channel `i`.
pub const NUM_PARTS: usize = 16;

/// A polyphonic synthesizer driven by the bridge.
///
/// All methods are called with the instance's render lock held. `render`
/// and the note methods run on the audio thread and must not block or
/// allocate; everything else belongs to the control path.
pub trait SynthEngine: Send {
    /// Refreshes the list of known banks.
    fn rescan_banks(&mut self);

    /// Returns the known banks in scan order.
    fn banks(&self) -> &[BankInfo];

    /// Makes the bank in `dir` the current bank.
    fn load_bank(&mut self, dir: &Path) -> Result<()>;

    /// Returns the display name of a slot in the current bank, or "" when
    /// the slot is empty or out of range.
    fn slot_name(&self, slot: usize) -> &str;

    /// Loads a slot of the current bank into a part.
    fn load_from_slot(&mut self, slot: usize, part: usize) -> Result<()>;

    /// Starts a note on every part listening to `channel`.
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8);

    /// Releases a note on every part listening to `channel`.
    fn note_off(&mut self, channel: u8, note: u8);

    /// Applies per-note pressure.
    fn polyphonic_aftertouch(&mut self, channel: u8, note: u8, pressure: u8);

    /// Releases every sounding note.
    fn all_notes_off(&mut self);

    /// Renders `left.len()` frames, overwriting both buffers.
    /// Both slices have the same length.
    fn render(&mut self, left: &mut [f32], right: &mut [f32]);

    /// Serializes the full engine state.
    fn serialize_state(&self) -> Result<Vec<u8>>;

    /// Restores a state produced by `serialize_state`.
    ///
    /// On error the engine is left as it was.
    fn deserialize_state(&mut self, data: &[u8]) -> Result<()>;
}

/// Creates one engine per plugin instance.
pub trait EngineFactory: Send + Sync {
    /// The engine type produced.
    type Engine: SynthEngine;

    /// Builds an engine bound to the process context.
    fn create(&self, context: &Arc<ProcessContext>) -> Result<Self::Engine>;
}
