//! A minimal plugin host for driving the bridge from the command line.
//!
//! Provides an offline host descriptor, a block scheduler for timed MIDI
//! events, Standard MIDI File loading, WAV rendering and live playback
//! through rodio. Every block goes through the plugin's `process` callback
//! exactly as a real host would call it.

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use rodio::Source;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use synthbridge::{HostDescriptor, MidiEvent, NativePlugin};

/// Seconds rendered after the last event so releases can ring out.
pub const TAIL_SECONDS: f64 = 2.0;

/// Default tempo when a file carries no tempo event (120 BPM).
const DEFAULT_USEC_PER_BEAT: u32 = 500_000;

/// Host settings reported to the plugin.
#[derive(Debug, Clone, Copy)]
pub struct OfflineHost {
    pub sample_rate: u32,
    pub buffer_size: u32,
}

impl HostDescriptor for OfflineHost {
    fn sample_rate(&self) -> f64 {
        self.sample_rate as f64
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }
}

/// A MIDI event at an absolute frame position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub frame: u64,
    pub event: MidiEvent,
}

/// Hands out the events of consecutive blocks.
#[derive(Debug, Clone)]
pub struct EventSchedule {
    events: Vec<TimedEvent>,
    next: usize,
    position: u64,
}

impl EventSchedule {
    /// Creates a schedule; events are ordered by frame, ties keep their
    /// input order.
    pub fn new(mut events: Vec<TimedEvent>) -> Self {
        events.sort_by_key(|e| e.frame);
        Self {
            events,
            next: 0,
            position: 0,
        }
    }

    /// Returns the total frames to render, including the release tail.
    pub fn total_frames(&self, sample_rate: u32) -> u64 {
        let last = self.events.last().map(|e| e.frame).unwrap_or(0);
        last + (TAIL_SECONDS * sample_rate as f64) as u64
    }

    /// Fills `out` with the events of the next `frames` frames, with block
    /// relative timestamps, and advances the position.
    pub fn next_block(&mut self, frames: usize, out: &mut Vec<MidiEvent>) {
        out.clear();
        let end = self.position + frames as u64;
        while let Some(timed) = self.events.get(self.next) {
            if timed.frame >= end {
                break;
            }
            let offset = timed.frame.saturating_sub(self.position) as u32;
            out.push(timed.event.at(offset));
            self.next += 1;
        }
        self.position = end;
    }
}

/// A C major chord held for one second, used when no MIDI file is given.
pub fn demo_events(sample_rate: u32) -> Vec<TimedEvent> {
    let release = sample_rate as u64;
    [60u8, 64, 67]
        .iter()
        .flat_map(|&note| {
            [
                TimedEvent {
                    frame: 0,
                    event: MidiEvent::note_on(0, note, 100),
                },
                TimedEvent {
                    frame: release,
                    event: MidiEvent::note_off(0, note),
                },
            ]
        })
        .collect()
}

enum FileEvent {
    Tempo(u32),
    Midi(MidiEvent),
}

/// Reads the note events of a Standard MIDI File, timed in frames.
///
/// Only note on, note off and polyphonic aftertouch are kept; tempo changes
/// are honoured when converting ticks to frames.
///
/// # Errors
///
/// Returns error if the file cannot be read, is not a valid MIDI file, or
/// uses SMPTE timing
pub fn load_midi_events<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Vec<TimedEvent>> {
    let path = path.as_ref();
    let data =
        fs::read(path).with_context(|| format!("Failed to read MIDI file: {}", path.display()))?;
    let smf = Smf::parse(&data).map_err(|e| anyhow::anyhow!("Failed to parse MIDI: {}", e))?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => tpb.as_int() as u64,
        Timing::Timecode(_, _) => bail!("SMPTE timecode timing not supported"),
    };

    // Merge all tracks into one tick-ordered stream.
    let mut merged: Vec<(u64, FileEvent)> = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(usec)) => {
                    merged.push((tick, FileEvent::Tempo(usec.as_int())));
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    let event = match message {
                        MidiMessage::NoteOn { key, vel } => {
                            MidiEvent::note_on(ch, key.as_int(), vel.as_int())
                        }
                        MidiMessage::NoteOff { key, .. } => MidiEvent::note_off(ch, key.as_int()),
                        MidiMessage::Aftertouch { key, vel } => {
                            MidiEvent::poly_aftertouch(ch, key.as_int(), vel.as_int())
                        }
                        _ => continue,
                    };
                    merged.push((tick, FileEvent::Midi(event)));
                }
                _ => {}
            }
        }
    }
    merged.sort_by_key(|(tick, _)| *tick);

    let mut events = Vec::new();
    let mut usec_per_beat = DEFAULT_USEC_PER_BEAT as f64;
    let mut last_tick = 0u64;
    let mut seconds = 0.0f64;

    for (tick, event) in merged {
        seconds += (tick - last_tick) as f64 * usec_per_beat / 1_000_000.0 / ticks_per_beat as f64;
        last_tick = tick;
        match event {
            FileEvent::Tempo(usec) if usec > 0 => usec_per_beat = usec as f64,
            FileEvent::Tempo(_) => {}
            FileEvent::Midi(event) => events.push(TimedEvent {
                frame: (seconds * sample_rate as f64) as u64,
                event,
            }),
        }
    }

    tracing::info!("loaded {} events from {}", events.len(), path.display());
    Ok(events)
}

/// Renders a schedule through the plugin into a 16-bit stereo WAV file.
///
/// # Arguments
///
/// * `plugin` - The plugin instance
/// * `schedule` - Events to play
/// * `host` - Sample rate and block size
/// * `output_path` - Path for the output WAV file
pub fn render_to_wav<P: AsRef<Path>>(
    plugin: &dyn NativePlugin,
    mut schedule: EventSchedule,
    host: OfflineHost,
    output_path: P,
) -> Result<()> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: host.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output_path.as_ref(), spec).with_context(|| {
        format!(
            "Failed to create output WAV file: {}",
            output_path.as_ref().display()
        )
    })?;

    let block = host.buffer_size.max(1) as usize;
    let total_frames = schedule.total_frames(host.sample_rate);
    let mut left = vec![0.0f32; block];
    let mut right = vec![0.0f32; block];
    let mut block_events = Vec::new();
    let mut rendered = 0u64;

    while rendered < total_frames {
        let frames = ((total_frames - rendered) as usize).min(block);
        schedule.next_block(frames, &mut block_events);
        plugin.process(
            &[],
            &mut [&mut left[..frames], &mut right[..frames]],
            frames as u32,
            &block_events,
        );

        for i in 0..frames {
            // Convert f32 (-1.0 to 1.0) to i16
            let left_sample = (left[i] * 32767.0).clamp(-32768.0, 32767.0) as i16;
            let right_sample = (right[i] * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(left_sample)?;
            writer.write_sample(right_sample)?;
        }
        rendered += frames as u64;
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}

/// Audio source pulling blocks from a plugin for rodio playback.
pub struct PluginSource<P: NativePlugin + 'static> {
    plugin: Arc<P>,
    schedule: EventSchedule,
    sample_rate: u32,
    left: Vec<f32>,
    right: Vec<f32>,
    block_events: Vec<MidiEvent>,
    /// Frames in the current block.
    block_len: usize,
    /// Current frame in the block.
    buf_pos: usize,
    /// Current channel (0 = left, 1 = right).
    channel: usize,
    frames_left: u64,
}

impl<P: NativePlugin + 'static> PluginSource<P> {
    pub fn new(plugin: Arc<P>, schedule: EventSchedule, host: OfflineHost) -> Self {
        let block = host.buffer_size.max(1) as usize;
        let frames_left = schedule.total_frames(host.sample_rate);
        Self {
            plugin,
            schedule,
            sample_rate: host.sample_rate,
            left: vec![0.0; block],
            right: vec![0.0; block],
            block_events: Vec::new(),
            block_len: 0,
            buf_pos: 0,
            channel: 0,
            frames_left,
        }
    }

    /// Returns how long the source plays.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames_left as f64 / self.sample_rate as f64)
    }
}

impl<P: NativePlugin + 'static> Iterator for PluginSource<P> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        // Render a new block when we've exhausted the current one
        if self.buf_pos >= self.block_len {
            if self.frames_left == 0 {
                return None;
            }
            let frames = (self.frames_left as usize).min(self.left.len());
            self.schedule.next_block(frames, &mut self.block_events);
            self.plugin.process(
                &[],
                &mut [&mut self.left[..frames], &mut self.right[..frames]],
                frames as u32,
                &self.block_events,
            );
            self.block_len = frames;
            self.buf_pos = 0;
            self.frames_left -= frames as u64;
        }

        // Interleave stereo samples: L, R, L, R, ...
        let sample = if self.channel == 0 {
            self.left[self.buf_pos]
        } else {
            self.right[self.buf_pos]
        };

        self.channel = 1 - self.channel;
        if self.channel == 0 {
            self.buf_pos += 1;
        }

        Some(sample)
    }
}

impl<P: NativePlugin + 'static> Source for PluginSource<P> {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_blocks() {
        let mut schedule = EventSchedule::new(vec![
            TimedEvent {
                frame: 130,
                event: MidiEvent::note_off(0, 60),
            },
            TimedEvent {
                frame: 5,
                event: MidiEvent::note_on(0, 60, 100),
            },
            TimedEvent {
                frame: 5,
                event: MidiEvent::note_on(0, 64, 100),
            },
        ]);

        let mut out = Vec::new();
        schedule.next_block(128, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], MidiEvent::note_on(0, 60, 100).at(5));
        assert_eq!(out[1].data[1], 64);

        schedule.next_block(128, &mut out);
        assert_eq!(out, vec![MidiEvent::note_off(0, 60).at(2)]);

        schedule.next_block(128, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_total_frames_includes_tail() {
        let schedule = EventSchedule::new(demo_events(1000));
        assert_eq!(schedule.total_frames(1000), 1000 + 2000);
    }

    #[test]
    fn test_missing_midi_file() {
        assert!(load_midi_events("/nonexistent/song.mid", 44100).is_err());
    }
}
