//! Per-instance engine wrapper.
//!
//! An [`EngineInstance`] owns one engine behind a mutex, the render lock.
//! Control-path operations (program changes, state save and restore) block
//! on it. The audio callback only ever tries it: if a control operation
//! holds the lock, the block is rendered as silence instead of waiting.

use crate::catalog::{ProgramCatalog, ProgramEntry};
use crate::context::ProcessContext;
use crate::engine::{SynthEngine, BANK_SIZE, NUM_PARTS};
use crate::error::{BridgeError, Result};
use crate::midi::{MidiEvent, NoteMessage};
use crate::plugin::ParameterInfo;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use uuid::Uuid;

/// Number of parameters exposed to the host.
pub const PARAMETER_COUNT: u32 = 0;

/// Lifecycle of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    /// Constructed, not yet handed to the host. Processing renders
    /// silence and control calls are ignored.
    Created = 0,
    /// Accepting program, process and state calls.
    Active = 1,
    /// Draining the render lock before the engine is freed.
    Destroying = 2,
    /// Engine freed.
    Destroyed = 3,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::Created,
            1 => Lifecycle::Active,
            2 => Lifecycle::Destroying,
            _ => Lifecycle::Destroyed,
        }
    }
}

/// One plugin instance's engine and its render lock.
pub struct EngineInstance<E: SynthEngine> {
    id: Uuid,
    engine: Mutex<E>,
    sample_rate: f64,
    context: Arc<ProcessContext>,
    catalog: Arc<ProgramCatalog>,
    lifecycle: AtomicU8,
    /// Bank count as of the last scan, readable without the render lock.
    bank_count: AtomicUsize,
}

impl<E: SynthEngine> EngineInstance<E> {
    /// Wraps an engine.
    ///
    /// # Arguments
    ///
    /// * `engine` - The engine, exclusively owned from now on
    /// * `context` - The process context the engine was built for
    /// * `catalog` - The process-wide program catalog
    pub fn new(engine: E, context: Arc<ProcessContext>, catalog: Arc<ProgramCatalog>) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(instance = %id, "engine instance created");
        let bank_count = engine.banks().len();
        Self {
            id,
            engine: Mutex::new(engine),
            sample_rate: context.sample_rate(),
            context,
            catalog,
            lifecycle: AtomicU8::new(Lifecycle::Created as u8),
            bank_count: AtomicUsize::new(bank_count),
        }
    }

    /// Returns the instance identifier used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the sample rate captured at construction.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Returns the process context.
    pub fn context(&self) -> &Arc<ProcessContext> {
        &self.context
    }

    /// Returns the current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    fn is_active(&self) -> bool {
        self.lifecycle() == Lifecycle::Active
    }

    /// Moves a freshly created instance to [`Lifecycle::Active`].
    pub fn activate(&self) {
        let _ = self.lifecycle.compare_exchange(
            Lifecycle::Created as u8,
            Lifecycle::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Runs the one-time program scan with this instance's engine.
    ///
    /// # Returns
    ///
    /// true if the scan ran, false if the catalog was already built
    pub fn scan_programs(&self) -> bool {
        let scanned = self.catalog.ensure_scanned(&self.engine);
        if scanned {
            match self.lock_engine() {
                Ok(engine) => self
                    .bank_count
                    .store(engine.banks().len(), Ordering::Release),
                Err(e) => tracing::warn!(instance = %self.id, "cannot read banks: {}", e),
            }
        }
        scanned
    }

    /// Returns the number of banks `select_program` accepts.
    pub fn bank_count(&self) -> usize {
        self.bank_count.load(Ordering::Acquire)
    }

    /// Blocks until the render lock is free and returns the engine.
    ///
    /// # Errors
    ///
    /// Returns error if a previous holder panicked
    pub fn lock_engine(&self) -> Result<MutexGuard<'_, E>> {
        self.engine.lock().map_err(|_| BridgeError::LockPoisoned)
    }

    // ---------------------------------------------------------------------
    // Parameters

    /// Returns the number of parameters (always zero).
    pub fn parameter_count(&self) -> u32 {
        PARAMETER_COUNT
    }

    /// Returns parameter metadata. No parameters exist, so always None.
    pub fn parameter_info(&self, _index: u32) -> Option<ParameterInfo> {
        None
    }

    /// Returns a parameter value. Always 0.0.
    pub fn parameter_value(&self, _index: u32) -> f32 {
        0.0
    }

    /// Sets a parameter value. Ignored.
    pub fn set_parameter_value(&self, _index: u32, _value: f32) {}

    // ---------------------------------------------------------------------
    // Programs

    /// Returns the number of programs in the catalog.
    pub fn midi_program_count(&self) -> usize {
        self.catalog.count()
    }

    /// Returns a program by catalog index.
    pub fn midi_program_info(&self, index: usize) -> Option<ProgramEntry> {
        self.catalog.at(index)
    }

    /// Loads a program into every part.
    ///
    /// Out-of-range banks or programs are ignored without touching the
    /// engine or waiting for the render lock. Otherwise blocks on it.
    ///
    /// # Arguments
    ///
    /// * `bank` - Index into the engine's bank list
    /// * `program` - Slot within the bank
    pub fn select_program(&self, bank: u32, program: u32) {
        if !self.is_active() {
            tracing::debug!(instance = %self.id, "ignoring program change on inactive instance");
            return;
        }
        let slot = program as usize;
        if slot >= BANK_SIZE {
            tracing::debug!(instance = %self.id, program, "ignoring out-of-range program");
            return;
        }
        if bank as usize >= self.bank_count() {
            tracing::debug!(instance = %self.id, bank, "ignoring out-of-range bank");
            return;
        }

        let mut engine = match self.lock_engine() {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!(instance = %self.id, "cannot select program: {}", e);
                return;
            }
        };

        let Some(dir) = engine.banks().get(bank as usize).map(|b| b.dir.clone()) else {
            tracing::debug!(instance = %self.id, bank, "ignoring out-of-range bank");
            return;
        };
        if dir.as_os_str().is_empty() {
            return;
        }

        if let Err(e) = engine.load_bank(&dir) {
            tracing::warn!(instance = %self.id, "cannot load bank: {}", e);
            return;
        }
        for part in 0..NUM_PARTS {
            if let Err(e) = engine.load_from_slot(slot, part) {
                tracing::warn!(instance = %self.id, part, "cannot load program: {}", e);
                return;
            }
        }

        tracing::info!(instance = %self.id, bank, program, "program selected");
    }

    /// Releases every sounding note. Blocks on the render lock.
    pub fn all_notes_off(&self) {
        if !self.is_active() {
            return;
        }
        match self.lock_engine() {
            Ok(mut engine) => engine.all_notes_off(),
            Err(e) => tracing::warn!(instance = %self.id, "cannot stop notes: {}", e),
        }
    }

    // ---------------------------------------------------------------------
    // Processing

    /// Applies MIDI events in order and renders one block.
    ///
    /// Every event is dispatched before rendering starts, whatever its
    /// `time` offset. Never blocks: if the render lock is taken or the
    /// instance is not active, both outputs are filled with silence. At most `frames` frames are written, fewer if an output
    /// buffer is shorter. Output channels past the second are left alone.
    ///
    /// # Arguments
    ///
    /// * `outputs` - Left and right output buffers
    /// * `frames` - Number of frames to produce
    /// * `midi_events` - Events for this block, in arrival order
    pub fn process(&self, outputs: &mut [&mut [f32]], frames: usize, midi_events: &[MidiEvent]) {
        let (left, right) = match outputs {
            [left, right, ..] => (left, right),
            others => {
                for output in others.iter_mut() {
                    let n = frames.min(output.len());
                    output[..n].fill(0.0);
                }
                return;
            }
        };
        let frames = frames.min(left.len()).min(right.len());
        let left = &mut left[..frames];
        let right = &mut right[..frames];

        if !self.is_active() {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }

        let mut engine = match self.engine.try_lock() {
            Ok(engine) => engine,
            Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => {
                left.fill(0.0);
                right.fill(0.0);
                return;
            }
        };

        for event in midi_events {
            match event.note_message() {
                Some(NoteMessage::NoteOn {
                    channel,
                    note,
                    velocity,
                }) => engine.note_on(channel, note, velocity),
                Some(NoteMessage::NoteOff { channel, note }) => engine.note_off(channel, note),
                Some(NoteMessage::PolyAftertouch {
                    channel,
                    note,
                    pressure,
                }) => engine.polyphonic_aftertouch(channel, note, pressure),
                None => {}
            }
        }

        engine.render(left, right);
    }

    // ---------------------------------------------------------------------
    // State

    /// Serializes the engine. Blocks on the render lock.
    pub fn state(&self) -> Result<Vec<u8>> {
        let engine = self.lock_engine()?;
        engine.serialize_state()
    }

    /// Restores a serialized engine. Blocks on the render lock.
    ///
    /// # Errors
    ///
    /// Returns error if the instance is not active or the chunk is
    /// malformed; the engine is then unchanged
    pub fn set_state(&self, data: &[u8]) -> Result<()> {
        if !self.is_active() {
            return Err(BridgeError::NotActive);
        }
        let mut engine = self.lock_engine()?;
        engine.deserialize_state(data)?;
        tracing::debug!(instance = %self.id, bytes = data.len(), "state restored");
        Ok(())
    }
}

impl<E: SynthEngine> Drop for EngineInstance<E> {
    fn drop(&mut self) {
        self.lifecycle
            .store(Lifecycle::Destroying as u8, Ordering::Release);

        // Wait out any render still holding the engine.
        drop(self.engine.lock());

        self.lifecycle
            .store(Lifecycle::Destroyed as u8, Ordering::Release);
        tracing::debug!(instance = %self.id, "engine instance destroyed");
    }
}
