use std::collections::BTreeSet;

use crate::{ExtractionParams, PitchClassSet, Result, StyleRankError};

pub type MidiByte = u8;

const UNQUANTIZED_STEPS_PER_BEAT: u64 = 8;
pub const MAX_MIDI_PITCH: MidiByte = 127;

/// One decoded note, timed in ticks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NoteEvent {
    pub pitch: MidiByte,
    pub onset: u64,
    pub duration: u64,
    pub velocity: MidiByte,
    pub channel: u8,
}

impl NoteEvent {
    pub fn new(pitch: MidiByte, onset: u64, duration: u64) -> Self {
        NoteEvent {pitch, onset, duration, velocity: 100, channel: 0}
    }

    pub fn end(&self) -> u64 {self.onset + self.duration}
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Score {
    ticks_per_beat: u32,
    notes: Vec<NoteEvent>,
}

impl Score {
    pub fn new(ticks_per_beat: u32, notes: Vec<NoteEvent>) -> Self {
        Score {ticks_per_beat, notes}
    }

    /// Builds a score from `(pitch, onset, duration)` triples.
    pub fn from_triples(ticks_per_beat: u32, triples: &[(MidiByte, u64, u64)]) -> Self {
        Self::new(
            ticks_per_beat,
            triples.iter().map(|(p, o, d)| NoteEvent::new(*p, *o, *d)).collect(),
        )
    }

    pub fn ticks_per_beat(&self) -> u32 {self.ticks_per_beat}

    pub fn notes(&self) -> &[NoteEvent] {&self.notes}

    pub fn len(&self) -> usize {self.notes.len()}

    pub fn is_empty(&self) -> bool {self.notes.is_empty()}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Note {
    pitch: MidiByte,
    onset: u64,
    end: u64,
}

impl Note {
    pub fn pitch(&self) -> MidiByte {self.pitch}

    pub fn onset(&self) -> u64 {self.onset}

    pub fn end(&self) -> u64 {self.end}

    fn sounds_at(&self, time: u64) -> bool {
        self.onset <= time && time < self.end
    }
}

/// The notes sounding over one segment, sorted by pitch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chord {
    onset: u64,
    duration: u64,
    notes: Vec<Note>,
}

impl Chord {
    fn new(onset: u64, duration: u64, mut notes: Vec<Note>) -> Self {
        notes.sort_by_key(|n| n.pitch);
        Chord {onset, duration, notes}
    }

    pub fn onset(&self) -> u64 {self.onset}

    pub fn duration(&self) -> u64 {self.duration}

    pub fn len(&self) -> usize {self.notes.len()}

    pub fn is_empty(&self) -> bool {self.notes.is_empty()}

    pub fn notes(&self) -> &[Note] {&self.notes}

    pub fn pitches(&self) -> Vec<MidiByte> {
        self.notes.iter().map(|n| n.pitch).collect()
    }

    /// True when the note at sorted position `i` starts with this chord.
    pub fn is_onset(&self, i: usize) -> bool {
        self.notes[i].onset == self.onset
    }

    pub fn onset_pitches(&self) -> Vec<MidiByte> {
        self.notes.iter().filter(|n| n.onset == self.onset).map(|n| n.pitch).collect()
    }

    pub fn tie_pitches(&self) -> Vec<MidiByte> {
        self.notes.iter().filter(|n| n.onset != self.onset).map(|n| n.pitch).collect()
    }

    pub fn lowest(&self) -> MidiByte {self.notes[0].pitch}

    pub fn highest(&self) -> MidiByte {self.notes[self.notes.len() - 1].pitch}

    pub fn bass_is_onset(&self) -> bool {self.is_onset(0)}

    pub fn top_is_onset(&self) -> bool {self.is_onset(self.notes.len() - 1)}

    pub fn pitch_class_set(&self) -> PitchClassSet {
        PitchClassSet::from_pitches(self.notes.iter().map(|n| n.pitch))
    }
}

/// A score normalized into chords, ready for feature extraction.
#[derive(Clone, Debug)]
pub struct Piece {
    units_per_beat: u64,
    quantized: bool,
    chords: Vec<Chord>,
    onset_segments: Vec<PitchClassSet>,
}

impl Piece {
    pub fn new(id: &str, score: &Score, params: &ExtractionParams) -> Result<Self> {
        if score.ticks_per_beat() == 0 {
            return Err(StyleRankError::unreadable(id, "zero ticks per beat"));
        }
        if let Some(event) = score.notes().iter().find(|event| event.pitch > MAX_MIDI_PITCH) {
            return Err(StyleRankError::unreadable(id, format!("pitch {} out of MIDI range", event.pitch)));
        }
        let notes = normalize(score, params);
        if notes.is_empty() {
            return Err(StyleRankError::unreadable(id, "no sounding notes"));
        }
        let onsets: BTreeSet<u64> = notes.iter().map(|n| n.onset).collect();
        let last_release = notes.iter().map(|n| n.end).max().unwrap_or(0);

        let mut boundaries = onsets.clone();
        if params.include_offsets {
            boundaries.extend(notes.iter().map(|n| n.end));
        }
        boundaries.insert(last_release);
        let chords = segment(&notes, &boundaries);
        if chords.len() < params.min_chords {
            return Err(StyleRankError::unreadable(
                id,
                format!("{} chords, at least {} required", chords.len(), params.min_chords),
            ));
        }

        let mut onset_boundaries = onsets;
        onset_boundaries.insert(last_release);
        let onset_segments = sweep(&notes, &onset_boundaries)
            .map(|(_, _, sounding)| PitchClassSet::from_pitches(sounding.iter().map(|n| n.pitch)))
            .collect();

        Ok(Piece {
            units_per_beat: if params.is_quantized() {params.resolution as u64} else {score.ticks_per_beat() as u64},
            quantized: params.is_quantized(),
            chords,
            onset_segments,
        })
    }

    pub fn chords(&self) -> &[Chord] {&self.chords}

    pub fn len(&self) -> usize {self.chords.len()}

    pub fn is_empty(&self) -> bool {self.chords.is_empty()}

    pub fn units_per_beat(&self) -> u64 {self.units_per_beat}

    /// Pitch-class sets sounding between successive distinct onsets.
    pub fn onset_segments(&self) -> &[PitchClassSet] {&self.onset_segments}

    /// Durations in units of 1/resolution beat when quantized, otherwise
    /// rounded to eighths of a beat.
    pub fn duration_symbol(&self, duration: u64) -> u64 {
        if self.quantized {
            duration
        } else {
            round_half_up(duration * UNQUANTIZED_STEPS_PER_BEAT, self.units_per_beat)
        }
    }
}

fn round_half_up(numerator: u64, denominator: u64) -> u64 {
    (2 * numerator + denominator) / (2 * denominator)
}

fn quantize(ticks: u64, ticks_per_beat: u64, resolution: u64) -> u64 {
    round_half_up(ticks * resolution, ticks_per_beat)
}

fn normalize(score: &Score, params: &ExtractionParams) -> Vec<Note> {
    let ticks_per_beat = score.ticks_per_beat() as u64;
    let mut notes: Vec<Note> = score
        .notes()
        .iter()
        .filter(|event| event.duration > 0)
        .map(|event| {
            if params.is_quantized() {
                let resolution = params.resolution as u64;
                Note {
                    pitch: event.pitch,
                    onset: quantize(event.onset, ticks_per_beat, resolution),
                    end: quantize(event.end(), ticks_per_beat, resolution),
                }
            } else {
                Note {pitch: event.pitch, onset: event.onset, end: event.end()}
            }
        })
        .filter(|note| note.end > note.onset)
        .collect();
    notes.sort_by_key(|n| n.onset);
    notes
}

/// Walks consecutive boundary pairs, yielding `(start, end, sounding notes)`.
/// `notes` must be sorted by onset.
fn sweep<'a>(notes: &'a [Note], boundaries: &'a BTreeSet<u64>) -> impl Iterator<Item = (u64, u64, Vec<Note>)> + 'a {
    let mut next = 0;
    let mut active: Vec<Note> = vec![];
    boundaries
        .iter()
        .zip(boundaries.iter().skip(1))
        .map(move |(start, end)| {
            while next < notes.len() && notes[next].onset <= *start {
                active.push(notes[next]);
                next += 1;
            }
            active.retain(|n| n.sounds_at(*start));
            (*start, *end, active.clone())
        })
}

fn segment(notes: &[Note], boundaries: &BTreeSet<u64>) -> Vec<Chord> {
    sweep(notes, boundaries)
        .filter(|(_, _, sounding)| !sounding.is_empty())
        .map(|(start, end, sounding)| Chord::new(start, end - start, sounding))
        .collect()
}
