use std::collections::VecDeque;
use bare_metal_modulo::{MNum, ModNumC};
use lazy_static::lazy_static;
use num::integer::Integer;
use num::rational::Ratio;
use rayon::prelude::*;

pub const NOTES_PER_OCTAVE: usize = 12;
pub const NUM_PITCH_CLASS_SETS: usize = 1 << NOTES_PER_OCTAVE;
pub const NUM_SCALES: usize = 2 * NOTES_PER_OCTAVE;
pub const NUM_INTERVAL_CLASSES: usize = 6;
pub const INTERVAL_CLASSES: [usize; NOTES_PER_OCTAVE] = [0, 1, 2, 3, 4, 5, 6, 5, 4, 3, 2, 1];
pub const MIN_DISSONANCE_OFFSET: i32 = -128;
pub const MAX_DISSONANCE_OFFSET: i32 = 127;

const FULL_MASK: u16 = (1 << NOTES_PER_OCTAVE) - 1;
const MAJOR_SCALE: [usize; 7] = [0, 2, 4, 5, 7, 9, 11];
const NATURAL_MINOR_SCALE: [usize; 7] = [0, 2, 3, 5, 7, 8, 10];
const TONNETZ_STEPS: [usize; 3] = [7, 4, 3];
const UNREACHABLE: u32 = u32::MAX;

// Just-intonation ratios for 0..=12 semitones.
const TUNING_NUMERATORS: [u64; 13] = [1, 16, 9, 6, 5, 4, 7, 3, 8, 5, 9, 15, 2];
const TUNING_DENOMINATORS: [u64; 13] = [1, 15, 8, 5, 4, 3, 5, 2, 5, 3, 5, 8, 1];

pub type PitchClass = ModNumC<usize, NOTES_PER_OCTAVE>;

pub fn pitch_class(pitch: u8) -> PitchClass {
    ModNumC::new(pitch as usize)
}

/// Upward distance in semitones from `from` to `to`, reduced to one octave.
pub fn pitch_interval(from: u8, to: u8) -> usize {
    (pitch_class(to) + (NOTES_PER_OCTAVE - pitch_class(from).a())).a()
}

pub fn interval_class(from: u8, to: u8) -> usize {
    INTERVAL_CLASSES[pitch_interval(from, to)]
}

lazy_static! {
    pub static ref PITCH_CLASS_TABLE: PitchClassTable = PitchClassTable::build();
}

/// 12-bit mask; bit i is set when pitch class i is present.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PitchClassSet(u16);

impl PitchClassSet {
    pub fn new(mask: u16) -> Self {
        PitchClassSet(mask & FULL_MASK)
    }

    pub fn from_pitches<I: IntoIterator<Item = u8>>(pitches: I) -> Self {
        pitches
            .into_iter()
            .fold(Self::default(), |set, p| set.with(pitch_class(p)))
    }

    pub fn with(self, pc: PitchClass) -> Self {
        PitchClassSet(self.0 | (1 << pc.a()))
    }

    pub fn mask(&self) -> u16 {self.0}

    pub fn index(&self) -> usize {self.0 as usize}

    pub fn len(&self) -> usize {self.0.count_ones() as usize}

    pub fn is_empty(&self) -> bool {self.0 == 0}

    pub fn contains(&self, pc: usize) -> bool {
        pc < NOTES_PER_OCTAVE && self.0 & (1 << pc) != 0
    }

    pub fn is_subset_of(&self, other: PitchClassSet) -> bool {
        self.0 & other.0 == self.0
    }

    pub fn pitch_classes(&self) -> Vec<usize> {
        (0..NOTES_PER_OCTAVE).filter(|pc| self.contains(*pc)).collect()
    }

    /// Transposes every member up by `steps` semitones (a cyclic shift of the mask).
    pub fn transposed(&self, steps: usize) -> Self {
        let steps = steps % NOTES_PER_OCTAVE;
        let mask = self.0 as u32;
        let rotated = (mask << steps) | (mask >> (NOTES_PER_OCTAVE - steps));
        PitchClassSet::new(rotated as u16)
    }
}

/// Counts of interval classes 1 through 6, class k stored in byte k-1.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct IntervalClassVector(u64);

impl IntervalClassVector {
    pub fn of(set: PitchClassSet) -> Self {
        let pcs = set.pitch_classes();
        let mut counts = [0u8; NUM_INTERVAL_CLASSES];
        for (i, low) in pcs.iter().enumerate() {
            for high in pcs.iter().skip(i + 1) {
                let ic = INTERVAL_CLASSES[high - low];
                counts[ic - 1] = counts[ic - 1].saturating_add(1);
            }
        }
        IntervalClassVector(
            counts
                .iter()
                .enumerate()
                .fold(0, |packed, (i, c)| packed | ((*c as u64) << (8 * i))),
        )
    }

    pub fn count(&self, interval_class: usize) -> u8 {
        assert!((1..=NUM_INTERVAL_CLASSES).contains(&interval_class));
        ((self.0 >> (8 * (interval_class - 1))) & 0xff) as u8
    }

    pub fn packed(&self) -> u64 {self.0}
}

/// Bit k set when the set fits inside scale template k: 0-11 are major scales
/// on each root, 12-23 natural minor scales on each root.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ScaleMembership(u32);

impl ScaleMembership {
    pub fn of(set: PitchClassSet, templates: &[PitchClassSet; NUM_SCALES]) -> Self {
        ScaleMembership(
            templates
                .iter()
                .enumerate()
                .filter(|(_, template)| set.is_subset_of(**template))
                .fold(0, |bits, (k, _)| bits | (1 << k)),
        )
    }

    pub fn contains(&self, scale: usize) -> bool {
        scale < NUM_SCALES && self.0 & (1 << scale) != 0
    }

    pub fn bits(&self) -> u32 {self.0}

    pub fn len(&self) -> usize {self.0.count_ones() as usize}
}

pub fn scale_templates() -> [PitchClassSet; NUM_SCALES] {
    let major = PitchClassSet::from_pitches(MAJOR_SCALE.iter().map(|p| *p as u8));
    let minor = PitchClassSet::from_pitches(NATURAL_MINOR_SCALE.iter().map(|p| *p as u8));
    let mut templates = [PitchClassSet::default(); NUM_SCALES];
    for root in 0..NOTES_PER_OCTAVE {
        templates[root] = major.transposed(root);
        templates[root + NOTES_PER_OCTAVE] = minor.transposed(root);
    }
    templates
}

/// Shortest-path lengths between pitch classes on the Tonnetz, where each
/// pitch class neighbors its fifths and major and minor thirds.
pub fn tonnetz_distances() -> [[u32; NOTES_PER_OCTAVE]; NOTES_PER_OCTAVE] {
    let mut distances = [[UNREACHABLE; NOTES_PER_OCTAVE]; NOTES_PER_OCTAVE];
    for source in 0..NOTES_PER_OCTAVE {
        let row = &mut distances[source];
        row[source] = 0;
        let mut pending = VecDeque::from([source]);
        while let Some(current) = pending.pop_front() {
            let here: PitchClass = ModNumC::new(current);
            for step in TONNETZ_STEPS {
                for neighbor in [(here + step).a(), (here + (NOTES_PER_OCTAVE - step)).a()] {
                    if row[neighbor] == UNREACHABLE {
                        row[neighbor] = row[current] + 1;
                        pending.push_back(neighbor);
                    }
                }
            }
        }
    }
    distances
}

/// Exact minimum-weight Hamiltonian path over `nodes`, by dynamic programming
/// over (visited subset, last node).
fn shortest_hamiltonian_path(nodes: &[usize], distances: &[[u32; NOTES_PER_OCTAVE]; NOTES_PER_OCTAVE]) -> u32 {
    let n = nodes.len();
    if n <= 1 {
        return 0;
    }
    let everything = (1usize << n) - 1;
    let mut best = vec![UNREACHABLE; (everything + 1) * n];
    for start in 0..n {
        best[(1 << start) * n + start] = 0;
    }
    for visited in 1..=everything {
        for last in 0..n {
            let cost = best[visited * n + last];
            if cost == UNREACHABLE || visited & (1 << last) == 0 {
                continue;
            }
            for next in (0..n).filter(|next| visited & (1 << next) == 0) {
                let slot = &mut best[(visited | (1 << next)) * n + next];
                *slot = (*slot).min(cost + distances[nodes[last]][nodes[next]]);
            }
        }
    }
    (0..n)
        .map(|last| best[everything * n + last])
        .min()
        .unwrap_or(0)
}

pub fn voice_leading_distance(set: PitchClassSet, distances: &[[u32; NOTES_PER_OCTAVE]; NOTES_PER_OCTAVE]) -> u32 {
    let pcs = set.pitch_classes();
    match pcs.len() {
        0 | 1 => 0,
        2 => distances[pcs[0]][pcs[1]],
        _ => shortest_hamiltonian_path(&pcs, distances),
    }
}

/// Exact frequency ratio for a semitone offset, in lowest terms.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DissonanceFraction {
    numerator: u64,
    denominator: u64,
}

impl DissonanceFraction {
    pub fn for_offset(offset: i32) -> Self {
        let step = offset.rem_euclid(NOTES_PER_OCTAVE as i32) as usize;
        let octave = offset.div_euclid(NOTES_PER_OCTAVE as i32);
        let mut numerator = TUNING_NUMERATORS[step];
        let mut denominator = TUNING_DENOMINATORS[step];
        if octave < 0 {
            denominator <<= octave.unsigned_abs();
        } else {
            numerator <<= octave;
        }
        let divisor = numerator.gcd(&denominator);
        DissonanceFraction {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        }
    }

    pub fn numerator(&self) -> u64 {self.numerator}

    pub fn denominator(&self) -> u64 {self.denominator}

    pub fn ratio(&self) -> Ratio<u64> {
        Ratio::new_raw(self.numerator, self.denominator)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DissonanceScale {
    Linear,
    Log2,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PitchClassEntry {
    pub canonical: PitchClassSet,
    pub rotation: u8,
    pub size: u8,
    pub interval_classes: IntervalClassVector,
    pub scales: ScaleMembership,
    pub voice_leading: u32,
}

impl PitchClassEntry {
    fn compute(
        set: PitchClassSet,
        distances: &[[u32; NOTES_PER_OCTAVE]; NOTES_PER_OCTAVE],
        templates: &[PitchClassSet; NUM_SCALES],
    ) -> Self {
        let (rotation, canonical) = (0..NOTES_PER_OCTAVE)
            .map(|steps| (steps, set.transposed(steps)))
            .min_by_key(|(steps, rotated)| (*rotated, *steps))
            .unwrap_or((0, set));
        PitchClassEntry {
            canonical,
            rotation: rotation as u8,
            size: set.len() as u8,
            interval_classes: IntervalClassVector::of(set),
            scales: ScaleMembership::of(set, templates),
            voice_leading: voice_leading_distance(set, distances),
        }
    }
}

/// Invariants of all 4096 pitch-class sets plus the dissonance fractions,
/// computed once and read without locking afterwards.
pub struct PitchClassTable {
    entries: Vec<PitchClassEntry>,
    fractions: Vec<DissonanceFraction>,
}

impl PitchClassTable {
    pub fn build() -> Self {
        let distances = tonnetz_distances();
        let templates = scale_templates();
        let entries = (0..NUM_PITCH_CLASS_SETS)
            .into_par_iter()
            .map(|mask| PitchClassEntry::compute(PitchClassSet::new(mask as u16), &distances, &templates))
            .collect();
        let fractions = (MIN_DISSONANCE_OFFSET..=MAX_DISSONANCE_OFFSET)
            .map(DissonanceFraction::for_offset)
            .collect();
        PitchClassTable {entries, fractions}
    }

    pub fn entry(&self, set: PitchClassSet) -> &PitchClassEntry {
        &self.entries[set.index()]
    }

    pub fn canonical_form(&self, set: PitchClassSet) -> PitchClassSet {
        self.entry(set).canonical
    }

    /// Transposition that carries `set` onto its canonical form.
    pub fn rotation(&self, set: PitchClassSet) -> usize {
        self.entry(set).rotation as usize
    }

    pub fn interval_class_vector(&self, set: PitchClassSet) -> IntervalClassVector {
        self.entry(set).interval_classes
    }

    pub fn scale_membership(&self, set: PitchClassSet) -> ScaleMembership {
        self.entry(set).scales
    }

    pub fn voice_leading_distance(&self, set: PitchClassSet) -> u32 {
        self.entry(set).voice_leading
    }

    /// `None` outside `MIN_DISSONANCE_OFFSET..=MAX_DISSONANCE_OFFSET`, which
    /// covers every difference between two MIDI pitches.
    pub fn dissonance_fraction(&self, offset: i32) -> Option<DissonanceFraction> {
        if !(MIN_DISSONANCE_OFFSET..=MAX_DISSONANCE_OFFSET).contains(&offset) {
            return None;
        }
        Some(self.fractions[(offset - MIN_DISSONANCE_OFFSET) as usize])
    }

    /// For each row pitch: the smallest ratio to any column pitch (never above
    /// unison) times the LCM of the denominators involved. Pairs further apart
    /// than the table reaches are ignored.
    pub fn row_periodicities(&self, rows: &[u8], columns: &[u8]) -> Vec<Ratio<u64>> {
        rows.iter()
            .map(|row| {
                let (lowest, lcm) = columns
                    .iter()
                    .filter_map(|column| self.dissonance_fraction(*column as i32 - *row as i32))
                    .fold((Ratio::from_integer(1), 1u64), |(lowest, lcm), fraction| {
                        (lowest.min(fraction.ratio()), lcm.lcm(&fraction.denominator))
                    });
                lowest * Ratio::from_integer(lcm)
            })
            .collect()
    }

    /// Exact mean periodicity of `rows` heard against `columns`.
    pub fn periodicity(&self, rows: &[u8], columns: &[u8]) -> Ratio<u64> {
        if rows.is_empty() {
            return Ratio::from_integer(0);
        }
        let total = self
            .row_periodicities(rows, columns)
            .into_iter()
            .fold(Ratio::from_integer(0), |sum, p| sum + p);
        total / Ratio::from_integer(rows.len() as u64)
    }

    pub fn dissonance(&self, chord: &[u8], scale: DissonanceScale) -> f64 {
        if chord.len() < 2 {
            return 0.0;
        }
        match scale {
            DissonanceScale::Linear => ratio_to_f64(self.periodicity(chord, chord)),
            DissonanceScale::Log2 => {
                let rows = self.row_periodicities(chord, chord);
                rows.iter().map(|p| ratio_to_f64(*p).log2()).sum::<f64>() / rows.len() as f64
            }
        }
    }
}

pub fn ratio_to_f64(r: Ratio<u64>) -> f64 {
    *r.numer() as f64 / *r.denom() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force_path(nodes: &[usize], distances: &[[u32; NOTES_PER_OCTAVE]; NOTES_PER_OCTAVE]) -> u32 {
        fn extend(path: &mut Vec<usize>, remaining: &mut Vec<usize>, distances: &[[u32; NOTES_PER_OCTAVE]; NOTES_PER_OCTAVE], best: &mut u32) {
            if remaining.is_empty() {
                let cost = path.windows(2).map(|w| distances[w[0]][w[1]]).sum();
                *best = (*best).min(cost);
                return;
            }
            for i in 0..remaining.len() {
                let node = remaining.remove(i);
                path.push(node);
                extend(path, remaining, distances, best);
                path.pop();
                remaining.insert(i, node);
            }
        }
        let mut best = UNREACHABLE;
        extend(&mut vec![], &mut nodes.to_vec(), distances, &mut best);
        best
    }

    #[test]
    fn test_canonical_form_is_rotation_invariant() {
        let table = &*PITCH_CLASS_TABLE;
        for mask in 0..NUM_PITCH_CLASS_SETS {
            let set = PitchClassSet::new(mask as u16);
            let canonical = table.canonical_form(set);
            assert!(canonical <= set);
            assert_eq!(set.transposed(table.rotation(set)), canonical);
            for k in 0..NOTES_PER_OCTAVE {
                assert_eq!(table.canonical_form(set.transposed(k)), canonical);
            }
        }
    }

    #[test]
    fn test_major_triad_canonical() {
        let table = &*PITCH_CLASS_TABLE;
        let c_major = PitchClassSet::from_pitches([60, 64, 67]);
        assert_eq!(c_major.mask(), 0b1001_0001);
        assert_eq!(table.canonical_form(c_major), c_major);
        assert_eq!(table.rotation(c_major), 0);
        let d_major = PitchClassSet::from_pitches([62, 66, 69]);
        assert_eq!(table.canonical_form(d_major), c_major);
        assert_eq!(table.rotation(d_major), 10);
    }

    #[test]
    fn test_transpose_wraps() {
        let b = PitchClassSet::from_pitches([11]);
        assert_eq!(b.transposed(1), PitchClassSet::from_pitches([0]));
        assert_eq!(b.transposed(12), b);
        assert_eq!(pitch_interval(67, 60), 5);
        assert_eq!(interval_class(67, 60), 5);
        assert_eq!(interval_class(60, 70), 2);
    }

    #[test]
    fn test_interval_class_vector() {
        let table = &*PITCH_CLASS_TABLE;
        let triad = table.interval_class_vector(PitchClassSet::from_pitches([0, 4, 7]));
        assert_eq!(triad.packed(), (1 << 16) | (1 << 24) | (1 << 32));
        let chromatic = table.interval_class_vector(PitchClassSet::new(0x0fff));
        for ic in 1..=5 {
            assert_eq!(chromatic.count(ic), 12);
        }
        assert_eq!(chromatic.count(6), 6);
        assert_eq!(table.interval_class_vector(PitchClassSet::new(1)).packed(), 0);
    }

    #[test]
    fn test_scale_membership() {
        let table = &*PITCH_CLASS_TABLE;
        let scales = table.scale_membership(PitchClassSet::from_pitches([0, 4, 7]));
        assert_eq!(scales.len(), 6);
        for major_root in [0, 5, 7] {
            assert!(scales.contains(major_root));
        }
        for minor_root in [2, 4, 9] {
            assert!(scales.contains(NOTES_PER_OCTAVE + minor_root));
        }
        assert_eq!(table.scale_membership(PitchClassSet::default()).bits(), (1 << NUM_SCALES) - 1);
        assert_eq!(table.scale_membership(PitchClassSet::from_pitches([0, 1, 2])).bits(), 0);
    }

    #[test]
    fn test_tonnetz_distances() {
        let distances = tonnetz_distances();
        for a in 0..NOTES_PER_OCTAVE {
            assert_eq!(distances[a][a], 0);
            for b in 0..NOTES_PER_OCTAVE {
                assert_eq!(distances[a][b], distances[b][a]);
                assert!(distances[a][b] <= 2);
            }
        }
        assert_eq!(distances[0][7], 1);
        assert_eq!(distances[0][4], 1);
        assert_eq!(distances[0][9], 1);
        assert_eq!(distances[0][1], 2);
        assert_eq!(distances[0][6], 2);
    }

    #[test]
    fn test_voice_leading_small_sets() {
        let table = &*PITCH_CLASS_TABLE;
        assert_eq!(table.voice_leading_distance(PitchClassSet::default()), 0);
        assert_eq!(table.voice_leading_distance(PitchClassSet::from_pitches([5])), 0);
        assert_eq!(table.voice_leading_distance(PitchClassSet::from_pitches([0, 7])), 1);
        assert_eq!(table.voice_leading_distance(PitchClassSet::from_pitches([0, 1])), 2);
        assert_eq!(table.voice_leading_distance(PitchClassSet::from_pitches([0, 4, 7])), 2);
    }

    #[test]
    fn test_voice_leading_matches_brute_force() {
        let table = &*PITCH_CLASS_TABLE;
        let distances = tonnetz_distances();
        for mask in (0..NUM_PITCH_CLASS_SETS).step_by(7) {
            let set = PitchClassSet::new(mask as u16);
            if set.len() >= 2 && set.len() <= 7 {
                let expected = brute_force_path(&set.pitch_classes(), &distances);
                assert_eq!(table.voice_leading_distance(set), expected, "{:012b}", mask);
                assert!(expected as usize >= set.len() - 1);
            }
        }
    }

    #[test]
    fn test_dissonance_fractions() {
        let table = &*PITCH_CLASS_TABLE;
        let ratio = |offset: i32| table.dissonance_fraction(offset).unwrap().ratio();
        assert_eq!(ratio(0), Ratio::new(1, 1));
        assert_eq!(ratio(7), Ratio::new(3, 2));
        assert_eq!(ratio(12), Ratio::new(2, 1));
        assert_eq!(ratio(19), Ratio::new(3, 1));
        assert_eq!(ratio(-7), Ratio::new(2, 3));
        assert_eq!(ratio(-12), Ratio::new(1, 2));
        assert_eq!(ratio(MIN_DISSONANCE_OFFSET), Ratio::new(5, 4 * 2048));
        assert_eq!(table.dissonance_fraction(MIN_DISSONANCE_OFFSET - 1), None);
        assert_eq!(table.dissonance_fraction(MAX_DISSONANCE_OFFSET + 1), None);
        for step in 0..=NOTES_PER_OCTAVE {
            let fraction = table.dissonance_fraction(step as i32).unwrap();
            assert_eq!(fraction.numerator(), TUNING_NUMERATORS[step]);
            assert_eq!(fraction.denominator(), TUNING_DENOMINATORS[step]);
        }
        for offset in MIN_DISSONANCE_OFFSET..=MAX_DISSONANCE_OFFSET {
            let fraction = table.dissonance_fraction(offset).unwrap();
            assert_eq!(fraction.numerator().gcd(&fraction.denominator()), 1);
        }
    }

    #[test]
    fn test_reference_dissonance_values() {
        let table = &*PITCH_CLASS_TABLE;
        let expected = [
            (0, 1.0), (12, 1.0), (7, 2.0), (5, 3.0), (4, 4.0), (9, 3.0), (8, 5.0),
            (3, 5.0), (6, 6.0), (10, 7.0), (2, 8.5), (11, 8.0), (1, 15.0),
        ];
        for (interval, value) in expected {
            assert_eq!(table.dissonance(&[0, interval], DissonanceScale::Linear), value, "interval {}", interval);
        }
        assert_eq!(table.dissonance(&[0, 7], DissonanceScale::Log2), 1.0);
        assert_eq!(table.dissonance(&[60], DissonanceScale::Linear), 0.0);
        assert_eq!(table.dissonance(&[], DissonanceScale::Log2), 0.0);
    }

    #[test]
    fn test_periodicity_is_exact() {
        let table = &*PITCH_CLASS_TABLE;
        assert_eq!(table.periodicity(&[0, 2], &[0, 2]), Ratio::new(17, 2));
        assert_eq!(table.periodicity(&[60, 64, 67], &[60, 64, 67]), Ratio::from_integer(4));
        assert_eq!(table.periodicity(&[], &[60]), Ratio::from_integer(0));
        assert_eq!(table.periodicity(&[0, 255], &[0, 255]), Ratio::from_integer(1));
    }
}
