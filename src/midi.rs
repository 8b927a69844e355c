//! MIDI input events.
//!
//! The host delivers short MIDI packets timestamped within the current
//! block. Only the note messages the engine understands are decoded; the
//! rest are dropped.

use midly::live::LiveEvent;
use midly::MidiMessage;

/// One MIDI packet delivered by the host.
///
/// Events are applied at the start of the block in arrival order; `time`
/// is carried for hosts that report it but does not delay dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiEvent {
    /// Frame offset inside the current block.
    pub time: u32,
    /// Raw bytes: status (message kind and channel), then two data bytes.
    pub data: [u8; 3],
}

/// A decoded note message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteMessage {
    /// Note start. A velocity of zero is passed through unchanged.
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note release.
    NoteOff { channel: u8, note: u8 },
    /// Per-note pressure change.
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
}

impl MidiEvent {
    /// Creates an event at frame offset 0.
    pub fn new(data: [u8; 3]) -> Self {
        Self {
            time: 0,
            data,
        }
    }

    /// Builds a note-on packet.
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new([0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F])
    }

    /// Builds a note-off packet.
    pub fn note_off(channel: u8, note: u8) -> Self {
        Self::new([0x80 | (channel & 0x0F), note & 0x7F, 0])
    }

    /// Builds a polyphonic aftertouch packet.
    pub fn poly_aftertouch(channel: u8, note: u8, pressure: u8) -> Self {
        Self::new([0xA0 | (channel & 0x0F), note & 0x7F, pressure & 0x7F])
    }

    /// Returns a copy at the given frame offset.
    pub fn at(mut self, time: u32) -> Self {
        self.time = time;
        self
    }

    /// Decodes the packet into a note message.
    ///
    /// Returns None for malformed packets and for every other message kind.
    /// Does not allocate.
    pub fn note_message(&self) -> Option<NoteMessage> {
        let LiveEvent::Midi { channel, message } = LiveEvent::parse(&self.data).ok()? else {
            return None;
        };
        let channel = channel.as_int();

        match message {
            MidiMessage::NoteOn { key, vel } => Some(NoteMessage::NoteOn {
                channel,
                note: key.as_int(),
                velocity: vel.as_int(),
            }),
            MidiMessage::NoteOff { key, .. } => Some(NoteMessage::NoteOff {
                channel,
                note: key.as_int(),
            }),
            MidiMessage::Aftertouch { key, vel } => Some(NoteMessage::PolyAftertouch {
                channel,
                note: key.as_int(),
                pressure: vel.as_int(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_note_messages() {
        assert_eq!(
            MidiEvent::new([0x93, 60, 100]).note_message(),
            Some(NoteMessage::NoteOn {
                channel: 3,
                note: 60,
                velocity: 100
            })
        );
        assert_eq!(
            MidiEvent::new([0x8F, 61, 40]).note_message(),
            Some(NoteMessage::NoteOff {
                channel: 15,
                note: 61
            })
        );
        assert_eq!(
            MidiEvent::new([0xA1, 62, 77]).note_message(),
            Some(NoteMessage::PolyAftertouch {
                channel: 1,
                note: 62,
                pressure: 77
            })
        );
    }

    #[test]
    fn test_zero_velocity_note_on_is_kept() {
        assert_eq!(
            MidiEvent::new([0x90, 60, 0]).note_message(),
            Some(NoteMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 0
            })
        );
    }

    #[test]
    fn test_ignored_messages() {
        // Control change, program change, pitch bend
        assert_eq!(MidiEvent::new([0xB0, 7, 100]).note_message(), None);
        assert_eq!(MidiEvent::new([0xC0, 5, 0]).note_message(), None);
        assert_eq!(MidiEvent::new([0xE0, 0, 64]).note_message(), None);
        // Data byte where a status byte belongs
        assert_eq!(MidiEvent::new([0x40, 60, 100]).note_message(), None);
    }

    #[test]
    fn test_builders() {
        let event = MidiEvent::note_on(0x12, 200, 100).at(17);
        assert_eq!(event.data, [0x92, 72, 100]);
        assert_eq!(event.time, 17);
        assert_eq!(MidiEvent::note_off(1, 60).data, [0x81, 60, 0]);
        assert_eq!(MidiEvent::poly_aftertouch(2, 60, 90).data, [0xA2, 60, 90]);
    }
}
