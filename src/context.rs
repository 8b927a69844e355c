//! Process-wide synthesis context.
//!
//! Every plugin instance in a process renders with the same sample rate,
//! buffer size and denormal-noise buffer. The [`ContextSlot`] owned by the
//! plugin adapter creates that [`ProcessContext`] when the first instance
//! appears and drops it when the last one goes away.

use crate::config::BridgeConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Amplitude of the denormal-prevention noise.
pub const DENORMAL_NOISE_SCALE: f32 = 1e-16;

/// Engine configuration shared by every instance of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Host sample rate in Hz.
    pub sample_rate: f64,
    /// Host block size in frames.
    pub buffer_size: usize,
    /// Directories scanned for instrument banks.
    pub bank_roots: Vec<PathBuf>,
    /// Maximum voices per part synthesizer.
    pub max_polyphony: usize,
    /// Whether reverb and chorus run inside the synthesizer.
    pub enable_reverb_and_chorus: bool,
}

/// Shared runtime configuration for all instances.
///
/// Immutable once built; instances hold it through an [`Arc`].
#[derive(Debug)]
pub struct ProcessContext {
    config: EngineConfig,
    seed: u64,
    denormal_noise: Box<[f32]>,
}

impl ProcessContext {
    /// Builds a context for the given host settings.
    ///
    /// # Arguments
    ///
    /// * `sample_rate` - Host sample rate in Hz
    /// * `buffer_size` - Host block size in frames (at least 1 is used)
    /// * `config` - User configuration
    pub fn new(sample_rate: f64, buffer_size: usize, config: &BridgeConfig) -> Self {
        let buffer_size = buffer_size.max(1);
        let seed = config.rng_seed.unwrap_or_else(wall_clock_seed);

        let mut rng = StdRng::seed_from_u64(seed);
        let denormal_noise = (0..buffer_size)
            .map(|_| (rng.gen::<f32>() - 0.5) * DENORMAL_NOISE_SCALE)
            .collect();

        Self {
            config: EngineConfig {
                sample_rate,
                buffer_size,
                bank_roots: config.bank_roots.clone(),
                max_polyphony: config.max_polyphony.max(1),
                enable_reverb_and_chorus: config.enable_reverb_and_chorus,
            },
            seed,
            denormal_noise,
        }
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    /// Returns the block size in frames.
    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    /// Returns the seed the noise buffer was generated from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the denormal-noise buffer (one value per frame of a block).
    pub fn denormal_noise(&self) -> &[f32] {
        &self.denormal_noise
    }

    /// Adds the noise buffer to a block of samples.
    ///
    /// Blocks longer than the buffer wrap around it.
    pub fn add_denormal_noise(&self, samples: &mut [f32]) {
        for (sample, noise) in samples.iter_mut().zip(self.denormal_noise.iter().cycle()) {
            *sample += *noise;
        }
    }
}

fn wall_clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct SlotState {
    instances: usize,
    context: Option<Arc<ProcessContext>>,
}

/// Reference-counted holder of the process context.
///
/// `acquire` and `release` must be paired one to one with instance
/// construction and destruction.
#[derive(Debug, Default)]
pub struct ContextSlot {
    state: Mutex<SlotState>,
}

impl ContextSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more instance, building the context on the 0 to 1
    /// transition.
    ///
    /// # Returns
    ///
    /// The shared context and whether this call created it
    pub fn acquire(
        &self,
        sample_rate: f64,
        buffer_size: usize,
        config: &BridgeConfig,
    ) -> (Arc<ProcessContext>, bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let created = state.context.is_none();
        let context = match &state.context {
            Some(context) => Arc::clone(context),
            None => {
                let context = Arc::new(ProcessContext::new(sample_rate, buffer_size, config));
                tracing::info!(
                    sample_rate = context.sample_rate(),
                    buffer_size = context.buffer_size(),
                    seed = context.seed(),
                    "process context initialized"
                );
                state.context = Some(Arc::clone(&context));
                context
            }
        };
        state.instances += 1;

        (context, created)
    }

    /// Unregisters one instance, dropping the context on the 1 to 0
    /// transition.
    ///
    /// # Returns
    ///
    /// true if the context was torn down by this call
    pub fn release(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.instances == 0 {
            tracing::warn!("process context released with no live instances");
            return false;
        }

        state.instances -= 1;
        if state.instances > 0 {
            return false;
        }

        state.context = None;
        tracing::info!("process context torn down");
        true
    }

    /// Returns the number of registered instances.
    pub fn instance_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .instances
    }

    /// Returns the current context, if any instance is alive.
    pub fn current(&self) -> Option<Arc<ProcessContext>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .context
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> BridgeConfig {
        BridgeConfig::default().with_rng_seed(1234)
    }

    #[test]
    fn test_noise_buffer_shape() {
        let context = ProcessContext::new(48000.0, 256, &seeded());
        assert_eq!(context.denormal_noise().len(), 256);
        assert!(context
            .denormal_noise()
            .iter()
            .all(|n| n.abs() <= DENORMAL_NOISE_SCALE * 0.5));
        assert!(context.denormal_noise().iter().any(|n| *n != 0.0));
    }

    #[test]
    fn test_seed_is_deterministic() {
        let a = ProcessContext::new(44100.0, 64, &seeded());
        let b = ProcessContext::new(44100.0, 64, &seeded());
        assert_eq!(a.seed(), 1234);
        assert_eq!(a.denormal_noise(), b.denormal_noise());
    }

    #[test]
    fn test_zero_buffer_size_is_clamped() {
        let context = ProcessContext::new(44100.0, 0, &seeded());
        assert_eq!(context.buffer_size(), 1);
        assert_eq!(context.denormal_noise().len(), 1);
    }

    #[test]
    fn test_add_noise_wraps() {
        let context = ProcessContext::new(44100.0, 4, &seeded());
        let mut samples = [0.0f32; 10];
        context.add_denormal_noise(&mut samples);
        assert_eq!(samples[0], context.denormal_noise()[0]);
        assert_eq!(samples[4], context.denormal_noise()[0]);
        assert_eq!(samples[9], context.denormal_noise()[1]);
    }

    #[test]
    fn test_slot_refcount() {
        let slot = ContextSlot::new();
        let (first, created) = slot.acquire(48000.0, 128, &seeded());
        assert!(created);
        let (second, created) = slot.acquire(96000.0, 512, &seeded());
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        // The second instance observes the first one's settings.
        assert_eq!(second.sample_rate(), 48000.0);
        assert_eq!(second.buffer_size(), 128);
        assert_eq!(slot.instance_count(), 2);

        let weak = Arc::downgrade(&first);
        drop(first);
        drop(second);

        assert!(!slot.release());
        assert!(weak.upgrade().is_some());
        assert!(slot.release());
        assert!(weak.upgrade().is_none());
        assert!(slot.current().is_none());
    }

    #[test]
    fn test_slot_reinitializes() {
        let slot = ContextSlot::new();
        let (context, _) = slot.acquire(44100.0, 64, &seeded());
        drop(context);
        assert!(slot.release());

        let (context, created) = slot.acquire(22050.0, 32, &seeded());
        assert!(created);
        assert_eq!(context.sample_rate(), 22050.0);
        assert_eq!(context.denormal_noise().len(), 32);
    }

    #[test]
    fn test_unbalanced_release() {
        let slot = ContextSlot::new();
        assert!(!slot.release());
        assert_eq!(slot.instance_count(), 0);
    }
}
