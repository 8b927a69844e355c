//! synthbridge - a real-time plugin bridge for a polyphonic SoundFont synth.
//!
//! The crate exposes a synthesizer engine to a plugin host through a fixed
//! callback contract: parameters, MIDI programs, block processing and
//! opaque state chunks. Its job is the lifecycle and locking around the
//! engine, so that control-thread work (bank scans, program loads, state
//! restores) never stalls or corrupts the audio thread.

pub mod catalog;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod instance;
pub mod midi;
pub mod plugin;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use catalog::{ProgramCatalog, ProgramEntry};
pub use config::BridgeConfig;
pub use context::{ContextSlot, ProcessContext};
pub use engine::{EngineFactory, SoundFontEngine, SynthEngine, BANK_SIZE, NUM_PARTS};
pub use error::{BridgeError, Result};
pub use instance::{EngineInstance, Lifecycle};
pub use midi::{MidiEvent, NoteMessage};
pub use plugin::{HostDescriptor, NativePlugin, PluginDescriptor, PluginHandle, SynthBridge};
