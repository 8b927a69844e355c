//! Deterministic engine and host doubles for unit tests.

use crate::context::ProcessContext;
use crate::engine::{BankInfo, EngineFactory, SynthEngine, NUM_PARTS};
use crate::error::{BridgeError, Result};
use crate::plugin::HostDescriptor;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An in-memory bank.
#[derive(Debug, Clone)]
pub struct TestBank {
    pub info: BankInfo,
    pub slots: Vec<(usize, String)>,
    pub reachable: bool,
}

impl TestBank {
    pub fn new(name: &str, slots: &[(usize, &str)]) -> Self {
        Self {
            info: BankInfo {
                name: name.to_string(),
                dir: PathBuf::from(format!("/test-banks/{}", name)),
            },
            slots: slots.iter().map(|(i, n)| (*i, n.to_string())).collect(),
            reachable: true,
        }
    }

    /// A bank whose directory fails to load.
    pub fn unreachable(name: &str) -> Self {
        Self {
            reachable: false,
            ..Self::new(name, &[])
        }
    }
}

/// Banks used by most tests: "Keys" with slots 0 and 2, "Leads" with slot 1.
pub fn default_banks() -> Vec<TestBank> {
    vec![
        TestBank::new("Keys", &[(0, "Piano"), (2, "Organ")]),
        TestBank::new("Leads", &[(1, "Square")]),
    ]
}

/// Every engine call observable by a test.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
    AllNotesOff,
    LoadBank(PathBuf),
    LoadSlot { slot: usize, part: usize },
    Render { frames: usize },
}

/// The serializable part of a [`RecordingEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestState {
    pub programs: Vec<Option<String>>,
    pub gain: f32,
}

impl Default for TestState {
    fn default() -> Self {
        Self {
            programs: vec![None; NUM_PARTS],
            gain: 0.5,
        }
    }
}

/// Engine that logs every call and renders a deterministic signal.
pub struct RecordingEngine {
    banks: Vec<TestBank>,
    bank_infos: Vec<BankInfo>,
    current: Option<usize>,
    context: Option<Arc<ProcessContext>>,
    active: Vec<(u8, u8, u8)>,
    frame: u64,
    pub state: TestState,
    pub calls: Vec<EngineCall>,
    pub rescans: usize,
}

impl RecordingEngine {
    pub fn with_banks(banks: Vec<TestBank>) -> Self {
        let bank_infos = banks.iter().map(|b| b.info.clone()).collect();
        Self {
            banks,
            bank_infos,
            current: None,
            context: None,
            active: Vec::new(),
            frame: 0,
            state: TestState::default(),
            calls: Vec::new(),
            rescans: 0,
        }
    }

    /// Note calls only, in the order received.
    pub fn note_calls(&self) -> Vec<EngineCall> {
        self.calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    EngineCall::NoteOn { .. }
                        | EngineCall::NoteOff { .. }
                        | EngineCall::PolyAftertouch { .. }
                )
            })
            .cloned()
            .collect()
    }
}

impl SynthEngine for RecordingEngine {
    fn rescan_banks(&mut self) {
        self.rescans += 1;
    }

    fn banks(&self) -> &[BankInfo] {
        &self.bank_infos
    }

    fn load_bank(&mut self, dir: &Path) -> Result<()> {
        self.calls.push(EngineCall::LoadBank(dir.to_path_buf()));
        let index = self
            .banks
            .iter()
            .position(|b| b.info.dir == dir && b.reachable)
            .ok_or_else(|| BridgeError::BankIo {
                path: dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such bank"),
            })?;
        self.current = Some(index);
        Ok(())
    }

    fn slot_name(&self, slot: usize) -> &str {
        self.current
            .and_then(|i| self.banks[i].slots.iter().find(|(s, _)| *s == slot))
            .map(|(_, name)| name.as_str())
            .unwrap_or("")
    }

    fn load_from_slot(&mut self, slot: usize, part: usize) -> Result<()> {
        self.calls.push(EngineCall::LoadSlot { slot, part });
        let name = self.slot_name(slot).to_string();
        if !name.is_empty() && part < NUM_PARTS {
            self.state.programs[part] = Some(name);
        }
        Ok(())
    }

    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        self.calls.push(EngineCall::NoteOn {
            channel,
            note,
            velocity,
        });
        self.active.push((channel, note, velocity));
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        self.calls.push(EngineCall::NoteOff { channel, note });
        self.active.retain(|(c, n, _)| !(*c == channel && *n == note));
    }

    fn polyphonic_aftertouch(&mut self, channel: u8, note: u8, pressure: u8) {
        self.calls.push(EngineCall::PolyAftertouch {
            channel,
            note,
            pressure,
        });
    }

    fn all_notes_off(&mut self) {
        self.calls.push(EngineCall::AllNotesOff);
        self.active.clear();
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.calls.push(EngineCall::Render { frames: left.len() });

        let color: usize = self.state.programs.iter().flatten().map(|p| p.len()).sum();
        let color = color as f32 * 0.01;

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let t = self.frame as f32;
            let mut sample = 0.0;
            for (_, note, velocity) in &self.active {
                sample += (t * *note as f32 * 0.001).sin() * (*velocity as f32 / 127.0);
            }
            sample *= self.state.gain;
            *l = sample * (1.0 + color);
            *r = sample * (1.0 - color * 0.5);
            self.frame += 1;
        }

        if let Some(context) = &self.context {
            context.add_denormal_noise(left);
            context.add_denormal_noise(right);
        }
    }

    fn serialize_state(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.state)?)
    }

    fn deserialize_state(&mut self, data: &[u8]) -> Result<()> {
        self.state = bincode::deserialize(data)?;
        Ok(())
    }
}

/// Factory producing [`RecordingEngine`]s, optionally failing.
#[derive(Debug, Clone)]
pub struct RecordingFactory {
    pub banks: Vec<TestBank>,
    pub fail: bool,
}

impl Default for RecordingFactory {
    fn default() -> Self {
        Self {
            banks: default_banks(),
            fail: false,
        }
    }
}

impl EngineFactory for RecordingFactory {
    type Engine = RecordingEngine;

    fn create(&self, context: &Arc<ProcessContext>) -> Result<RecordingEngine> {
        if self.fail {
            return Err(BridgeError::Synthesizer("refused by test factory".to_string()));
        }
        let mut engine = RecordingEngine::with_banks(self.banks.clone());
        engine.context = Some(Arc::clone(context));
        Ok(engine)
    }
}

/// Host reporting fixed settings.
#[derive(Debug, Clone, Copy)]
pub struct TestHost {
    pub sample_rate: f64,
    pub buffer_size: u32,
}

impl Default for TestHost {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            buffer_size: 128,
        }
    }
}

impl HostDescriptor for TestHost {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }
}
