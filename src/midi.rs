use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use midly::{MidiMessage, Smf, Timing, TrackEventKind};
use tracing::debug;

use crate::{NoteEvent, PieceSource, Result, Score, StyleRankError};

/// A Standard MIDI File on disk.
#[derive(Clone, Debug)]
pub struct MidiFile {
    path: PathBuf,
}

impl MidiFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        MidiFile {path: path.as_ref().to_path_buf()}
    }

    pub fn path(&self) -> &Path {&self.path}
}

impl PieceSource for MidiFile {
    fn id(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Score> {
        let id = self.id();
        let bytes = std::fs::read(&self.path).map_err(|e| StyleRankError::unreadable(&id, e))?;
        decode_smf(&id, &bytes)
    }
}

/// Pairs note-ons with their releases across every track. A release closes
/// the most recent open note with the same channel and key; notes left open
/// close at the end of their track.
pub fn decode_smf(id: &str, bytes: &[u8]) -> Result<Score> {
    let smf = Smf::parse(bytes).map_err(|e| StyleRankError::unreadable(id, e))?;
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(ticks) => ticks.as_int() as u32,
        Timing::Timecode(..) => {
            return Err(StyleRankError::unreadable(id, "SMPTE timecode timing is not supported"))
        }
    };

    let mut notes = vec![];
    for track in smf.tracks.iter() {
        let mut tick = 0u64;
        let mut open: BTreeMap<(u8, u8), Vec<(u64, u8)>> = BTreeMap::new();
        for event in track.iter() {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Midi {channel, message} = event.kind {
                let channel = channel.as_int();
                match message {
                    MidiMessage::NoteOn {key, vel} if vel.as_int() > 0 => {
                        open.entry((channel, key.as_int())).or_default().push((tick, vel.as_int()));
                    }
                    MidiMessage::NoteOn {key, ..} | MidiMessage::NoteOff {key, ..} => {
                        if let Some((onset, velocity)) = open.get_mut(&(channel, key.as_int())).and_then(|s| s.pop()) {
                            notes.push(NoteEvent {pitch: key.as_int(), onset, duration: tick - onset, velocity, channel});
                        }
                    }
                    _ => {}
                }
            }
        }
        for ((channel, pitch), pending) in open {
            for (onset, velocity) in pending {
                notes.push(NoteEvent {pitch, onset, duration: tick - onset, velocity, channel});
            }
        }
    }
    notes.sort_by_key(|n| (n.onset, n.pitch));
    debug!(piece = id, notes = notes.len(), ticks_per_beat, "decoded");
    Ok(Score::new(ticks_per_beat, notes))
}
