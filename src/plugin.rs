//! Host-facing plugin adapter.
//!
//! [`SynthBridge`] is created once per process by whatever registers the
//! plugin with the host. It hands out [`PluginHandle`]s on `instantiate`,
//! keeps the instance count, and builds and tears down the shared
//! [`ProcessContext`] and [`ProgramCatalog`] on the first and last instance.
//!
//! The per-instance callbacks live in the [`NativePlugin`] trait. None of
//! them return errors: invalid indices read as "not found" or zero, bad
//! requests are ignored, and failures are logged.

use crate::catalog::{ProgramCatalog, ProgramEntry};
use crate::config::BridgeConfig;
use crate::context::{ContextSlot, ProcessContext};
use crate::engine::{EngineFactory, SoundFontEngineFactory, SynthEngine};
use crate::error::Result;
use crate::instance::EngineInstance;
use crate::midi::MidiEvent;
use std::ops::BitOr;
use std::sync::Arc;

/// Broad plugin category reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCategory {
    /// Instrument producing audio from MIDI.
    Synth,
    /// Anything else.
    Other,
}

/// Capability flags reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PluginHints(u32);

impl PluginHints {
    /// The plugin is an instrument.
    pub const IS_SYNTH: Self = Self(1 << 0);
    /// State is saved as one opaque chunk.
    pub const USES_CHUNKS: Self = Self(1 << 1);

    /// Returns the raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for PluginHints {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Static description of the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub category: PluginCategory,
    pub hints: PluginHints,
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub midi_ins: u32,
    pub midi_outs: u32,
    pub parameter_ins: u32,
    pub parameter_outs: u32,
    pub name: &'static str,
    pub label: &'static str,
    pub maker: &'static str,
    pub copyright: &'static str,
}

/// The descriptor of this plugin.
pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    category: PluginCategory::Synth,
    hints: PluginHints::IS_SYNTH.union(PluginHints::USES_CHUNKS),
    audio_ins: 2,
    audio_outs: 2,
    midi_ins: 1,
    midi_outs: 0,
    parameter_ins: crate::instance::PARAMETER_COUNT,
    parameter_outs: 0,
    name: "SynthBridge",
    label: "synthbridge",
    maker: "synthbridge developers",
    copyright: "MIT",
};

/// Value ranges of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRanges {
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub step: f32,
    pub step_small: f32,
    pub step_large: f32,
}

impl Default for ParameterRanges {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            default: 0.0,
            step: 0.01,
            step_small: 0.0001,
            step_large: 0.1,
        }
    }
}

/// Metadata of one host-visible parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub unit: String,
    pub ranges: ParameterRanges,
}

/// What the plugin needs to know about its host.
pub trait HostDescriptor {
    /// Host sample rate in Hz.
    fn sample_rate(&self) -> f64;

    /// Host block size in frames.
    fn buffer_size(&self) -> u32;
}

/// The per-instance callback contract.
///
/// `process` is called from the audio thread; everything else from the
/// host's control thread. Implementations never panic on bad input.
pub trait NativePlugin: Send + Sync {
    fn parameter_count(&self) -> u32;
    fn parameter_info(&self, index: u32) -> Option<ParameterInfo>;
    fn parameter_value(&self, index: u32) -> f32;
    fn set_parameter_value(&self, index: u32, value: f32);

    fn midi_program_count(&self) -> u32;
    fn midi_program_info(&self, index: u32) -> Option<ProgramEntry>;
    fn set_midi_program(&self, bank: u32, program: u32);

    fn activate(&self);
    fn deactivate(&self);

    /// Renders `frames` frames into `outputs[0]` and `outputs[1]`.
    /// Inputs are accepted for layout compatibility and ignored.
    fn process(
        &self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: u32,
        midi_events: &[MidiEvent],
    );

    /// Returns the full state. Empty on failure.
    fn chunk(&self) -> Vec<u8>;
    /// Restores a state returned by `chunk`. Bad chunks are ignored.
    fn set_chunk(&self, data: &[u8]);
}

/// State shared by the adapter and every live handle.
#[derive(Debug, Default)]
struct SharedState {
    context: ContextSlot,
    catalog: Arc<ProgramCatalog>,
}

/// One registration in the context slot, released on drop.
///
/// The last lease to go tears down the process context and empties the
/// catalog.
struct ContextLease {
    shared: Arc<SharedState>,
}

impl ContextLease {
    fn acquire(
        shared: &Arc<SharedState>,
        host: &dyn HostDescriptor,
        config: &BridgeConfig,
    ) -> (Self, Arc<ProcessContext>, bool) {
        let (context, first) =
            shared
                .context
                .acquire(host.sample_rate(), host.buffer_size() as usize, config);
        let lease = Self {
            shared: Arc::clone(shared),
        };
        (lease, context, first)
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        if self.shared.context.release() {
            self.shared.catalog.clear();
        }
    }
}

/// An instance handed to the host.
///
/// Dropping the handle destroys the instance and then releases its share
/// of the process context, whether or not [`SynthBridge::cleanup`] is used.
pub struct PluginHandle<E: SynthEngine> {
    // Field order matters: the instance drains its render lock before the
    // lease releases the context.
    instance: EngineInstance<E>,
    _lease: ContextLease,
}

impl<E: SynthEngine> PluginHandle<E> {
    /// Returns the wrapped engine instance.
    pub fn instance(&self) -> &EngineInstance<E> {
        &self.instance
    }
}

impl<E: SynthEngine> NativePlugin for PluginHandle<E> {
    fn parameter_count(&self) -> u32 {
        self.instance.parameter_count()
    }

    fn parameter_info(&self, index: u32) -> Option<ParameterInfo> {
        if index >= self.parameter_count() {
            return None;
        }
        self.instance.parameter_info(index)
    }

    fn parameter_value(&self, index: u32) -> f32 {
        if index >= self.parameter_count() {
            return 0.0;
        }
        self.instance.parameter_value(index)
    }

    fn set_parameter_value(&self, index: u32, value: f32) {
        if index < self.parameter_count() {
            self.instance.set_parameter_value(index, value);
        }
    }

    fn midi_program_count(&self) -> u32 {
        u32::try_from(self.instance.midi_program_count()).unwrap_or(u32::MAX)
    }

    fn midi_program_info(&self, index: u32) -> Option<ProgramEntry> {
        if index >= self.midi_program_count() {
            return None;
        }
        self.instance.midi_program_info(index as usize)
    }

    fn set_midi_program(&self, bank: u32, program: u32) {
        self.instance.select_program(bank, program);
    }

    fn activate(&self) {
        tracing::debug!(instance = %self.instance.id(), "activated");
    }

    fn deactivate(&self) {
        self.instance.all_notes_off();
        tracing::debug!(instance = %self.instance.id(), "deactivated");
    }

    fn process(
        &self,
        _inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: u32,
        midi_events: &[MidiEvent],
    ) {
        self.instance.process(outputs, frames as usize, midi_events);
    }

    fn chunk(&self) -> Vec<u8> {
        match self.instance.state() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(instance = %self.instance.id(), "failed to save state: {}", e);
                Vec::new()
            }
        }
    }

    fn set_chunk(&self, data: &[u8]) {
        if data.is_empty() {
            tracing::warn!(instance = %self.instance.id(), "ignoring empty state chunk");
            return;
        }
        if let Err(e) = self.instance.set_state(data) {
            tracing::warn!(instance = %self.instance.id(), "failed to restore state: {}", e);
        }
    }
}

/// Process-wide plugin adapter.
///
/// Owns the shared context and catalog; every handle keeps them alive
/// through a reference-counted lease.
pub struct SynthBridge<F: EngineFactory = SoundFontEngineFactory> {
    factory: F,
    config: BridgeConfig,
    shared: Arc<SharedState>,
}

impl SynthBridge<SoundFontEngineFactory> {
    /// Creates an adapter driving SoundFont engines.
    pub fn soundfont(config: BridgeConfig) -> Self {
        Self::new(SoundFontEngineFactory, config)
    }
}

impl<F: EngineFactory> SynthBridge<F> {
    /// Creates an adapter.
    ///
    /// # Arguments
    ///
    /// * `factory` - Builds one engine per instance
    /// * `config` - Configuration applied when the process context is built
    pub fn new(factory: F, config: BridgeConfig) -> Self {
        Self {
            factory,
            config,
            shared: Arc::new(SharedState::default()),
        }
    }

    /// Returns the static plugin description.
    pub fn descriptor(&self) -> &'static PluginDescriptor {
        &DESCRIPTOR
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Returns the shared program catalog.
    pub fn catalog(&self) -> &Arc<ProgramCatalog> {
        &self.shared.catalog
    }

    /// Returns the shared process context, if any instance is alive.
    pub fn context(&self) -> Option<Arc<ProcessContext>> {
        self.shared.context.current()
    }

    /// Returns the number of live instances.
    pub fn instance_count(&self) -> usize {
        self.shared.context.instance_count()
    }

    /// Creates a plugin instance.
    ///
    /// The first instance of the process builds the process context and
    /// scans the program catalog.
    ///
    /// # Arguments
    ///
    /// * `host` - Supplies the sample rate and block size
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be built; the instance count is
    /// left unchanged
    pub fn instantiate(&self, host: &dyn HostDescriptor) -> Result<PluginHandle<F::Engine>> {
        let (lease, context, first) = ContextLease::acquire(&self.shared, host, &self.config);

        let engine = match self.factory.create(&context) {
            Ok(engine) => engine,
            Err(e) => {
                drop(context);
                drop(lease);
                tracing::error!("failed to instantiate: {}", e);
                return Err(e);
            }
        };

        let instance = EngineInstance::new(engine, context, Arc::clone(&self.shared.catalog));
        if first {
            instance.scan_programs();
        }
        instance.activate();

        tracing::info!(
            instance = %instance.id(),
            instances = self.instance_count(),
            "plugin instantiated"
        );
        Ok(PluginHandle {
            instance,
            _lease: lease,
        })
    }

    /// Destroys a plugin instance.
    ///
    /// Waits for any in-flight render of that instance. The last instance
    /// of the process drops the context and empties the catalog. Dropping
    /// the handle has the same effect.
    pub fn cleanup(&self, handle: PluginHandle<F::Engine>) {
        let id = handle.instance.id();
        drop(handle);
        tracing::info!(instance = %id, instances = self.instance_count(), "plugin cleaned up");
    }
}
