//! Circular bit genome with motif primitives and derived indices.
//!
//! All position arithmetic wraps modulo the genome length. The promoter map
//! and terminator set are derived state: a full scan rebuilds both, and
//! point substitutions patch the promoter map incrementally by rescanning
//! only the windows that cover the flipped base.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;

use crate::rng::SubStream;

/// Length of the promoter recognition window, in bases.
pub const PROM_SIZE: usize = 22;
/// Largest consensus distance still accepted as a promoter.
pub const PROM_MAX_DIST: u8 = 4;
/// Hairpin score required of a terminator.
pub const TERM_SCORE: u8 = 4;
/// Bases per codon.
pub const CODON_SIZE: usize = 3;

/// Offset from a gene start to the first codon of its reading frame
/// (Shine-Dalgarno motif, spacer and start codon).
pub const GENE_LEADER: usize = 13;

pub const CODON_START: u8 = 0b000;
pub const CODON_STOP: u8 = 0b001;
pub const CODON_W0: u8 = 0b010;
pub const CODON_W1: u8 = 0b011;
pub const CODON_M0: u8 = 0b100;
pub const CODON_M1: u8 = 0b101;
pub const CODON_H0: u8 = 0b110;
pub const CODON_H1: u8 = 0b111;

const PROMOTER_CONSENSUS: [u8; PROM_SIZE] = [
    0, 1, 0, 1, 0, 1, 1, 0, 0, 1, 1, 1, 0, 0, 1, 0, 0, 1, 0, 1, 1, 0,
];
const SHINE_DAL_MOTIF: [u8; 6] = [0, 1, 1, 0, 1, 1];
const START_CODON_OFFSET: usize = 10;
const TERM_STEM_SIZE: usize = 4;
const TERM_SPAN: usize = 10;

/// Circular sequence of bases plus recomputable promoter/terminator indices.
#[derive(Debug, Clone)]
pub struct Genome {
    bits: Vec<u8>,
    promoters: BTreeMap<usize, u8>,
    terminators: BTreeSet<usize>,
}

impl Genome {
    /// Build a genome from raw bases (each 0 or 1) and index it.
    #[must_use]
    pub fn new(bits: Vec<u8>) -> Self {
        debug_assert!(bits.iter().all(|&b| b <= 1));
        let mut genome = Self {
            bits,
            promoters: BTreeMap::new(),
            terminators: BTreeSet::new(),
        };
        genome.rebuild_indices();
        genome
    }

    /// Draw `length` uniform random bases from `rng` and index the result.
    #[must_use]
    pub fn random(length: usize, rng: &mut SubStream<'_>) -> Self {
        let bits = (0..length).map(|_| rng.random_range(0..2u8)).collect();
        Self::new(bits)
    }

    /// Number of bases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Raw base values in sequence order.
    #[must_use]
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    /// Indexed promoter positions mapped to their consensus distance.
    #[must_use]
    pub fn promoters(&self) -> &BTreeMap<usize, u8> {
        &self.promoters
    }

    /// Indexed terminator positions in ascending order.
    #[must_use]
    pub fn terminators(&self) -> &BTreeSet<usize> {
        &self.terminators
    }

    /// Distance along the circle from `from` forward to `to`.
    #[must_use]
    pub fn circular_distance(&self, from: usize, to: usize) -> usize {
        if to >= from {
            to - from
        } else {
            self.len() - from + to
        }
    }

    #[inline]
    fn bit(&self, pos: usize) -> u8 {
        self.bits[pos % self.bits.len()]
    }

    /// Hamming distance between the window at `pos` and the promoter
    /// consensus.
    #[must_use]
    pub fn promoter_at(&self, pos: usize) -> u8 {
        let mut distance = 0;
        for (offset, consensus) in PROMOTER_CONSENSUS.iter().enumerate() {
            if self.bit(pos + offset) != *consensus {
                distance += 1;
            }
        }
        distance
    }

    /// Hairpin symmetry score of the stem around `pos`.
    #[must_use]
    pub fn terminator_at(&self, pos: usize) -> u8 {
        let mut score = 0;
        for offset in 0..TERM_STEM_SIZE {
            if self.bit(pos + offset) != self.bit(pos + TERM_SPAN - offset) {
                score += 1;
            }
        }
        score
    }

    /// True when `pos` carries the ribosome-binding motif followed by a
    /// start codon.
    #[must_use]
    pub fn shine_dal_start(&self, pos: usize) -> bool {
        for (offset, motif) in SHINE_DAL_MOTIF.iter().enumerate() {
            if self.bit(pos + offset) != *motif {
                return false;
            }
        }
        (0..CODON_SIZE).all(|offset| self.bit(pos + START_CODON_OFFSET + offset) == 0)
    }

    /// True when the codon at `pos` is the stop pattern.
    #[must_use]
    pub fn protein_stop(&self, pos: usize) -> bool {
        self.bit(pos) == 0 && self.bit(pos + 1) == 0 && self.bit(pos + 2) == 1
    }

    /// 3-bit codon value at `pos`, most significant base first.
    #[must_use]
    pub fn codon_at(&self, pos: usize) -> u8 {
        (self.bit(pos) << 2) | (self.bit(pos + 1) << 1) | self.bit(pos + 2)
    }

    /// Rebuild both indices with a full scan.
    ///
    /// A genome shorter than the promoter window yields empty indices.
    pub fn rebuild_indices(&mut self) {
        self.promoters.clear();
        self.terminators.clear();
        if self.len() < PROM_SIZE {
            return;
        }
        for pos in 0..self.len() {
            let distance = self.promoter_at(pos);
            if distance <= PROM_MAX_DIST {
                self.promoters.insert(pos, distance);
            }
            if self.terminator_at(pos) == TERM_SCORE {
                self.terminators.insert(pos);
            }
        }
    }

    /// Drop the terminator index; RNA construction rebuilds what it needs.
    pub fn clear_terminators(&mut self) {
        self.terminators.clear();
    }

    /// First indexed terminator at or after `pos`, wrapping to the smallest
    /// one when the tail of the circle holds none.
    #[must_use]
    pub fn first_terminator_from(&self, pos: usize) -> Option<usize> {
        self.terminators
            .range(pos..)
            .next()
            .or_else(|| self.terminators.iter().next())
            .copied()
    }

    /// Flip the base at `pos` and patch the promoter index.
    pub fn flip(&mut self, pos: usize) {
        let len = self.bits.len();
        self.bits[pos % len] ^= 1;
        if len < PROM_SIZE {
            return;
        }
        // Only windows covering the flipped base can change.
        for offset in 0..PROM_SIZE {
            let start = (pos + len - offset) % len;
            let distance = self.promoter_at(start);
            if distance <= PROM_MAX_DIST {
                self.promoters.insert(start, distance);
            } else {
                self.promoters.remove(&start);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_of(text: &str) -> Vec<u8> {
        text.bytes().map(|b| b - b'0').collect()
    }

    // One perfect promoter at 0, no terminator anywhere on the circle.
    const QUIET: &str = "0101011001110000010110000000000000000000";
    // Promoter at 0, terminator stem at 60, one gene start at 26.
    const CODING: &str =
        "01010110011100100101101011011011011100010101111110000100110011110000000110001100";

    #[test]
    fn promoter_distance_counts_mismatches() {
        let genome = Genome::new(bits_of(CODING));
        assert_eq!(genome.promoter_at(0), 0);
        assert!(genome.promoter_at(1) > PROM_MAX_DIST);

        let near = Genome::new(bits_of(QUIET));
        assert_eq!(near.promoter_at(0), 1);
    }

    #[test]
    fn full_scan_respects_motif_thresholds() {
        let genome = Genome::new(bits_of(CODING));
        for (&pos, &distance) in genome.promoters() {
            assert_eq!(genome.promoter_at(pos), distance);
            assert!(distance <= PROM_MAX_DIST);
        }
        for &pos in genome.terminators() {
            assert_eq!(genome.terminator_at(pos), TERM_SCORE);
        }
        assert!(genome.terminators().contains(&60));
    }

    #[test]
    fn quiet_genome_has_no_terminators() {
        let genome = Genome::new(bits_of(QUIET));
        assert_eq!(genome.promoters().len(), 1);
        assert!(genome.terminators().is_empty());
        assert_eq!(genome.first_terminator_from(22), None);
    }

    #[test]
    fn short_genome_yields_empty_indices() {
        let genome = Genome::new(vec![1; PROM_SIZE - 1]);
        assert!(genome.promoters().is_empty());
        assert!(genome.terminators().is_empty());
    }

    #[test]
    fn shine_dalgarno_requires_motif_and_start_codon() {
        let genome = Genome::new(bits_of(CODING));
        assert!(genome.shine_dal_start(26));
        assert!(!genome.shine_dal_start(27));
    }

    #[test]
    fn codon_values_read_most_significant_first() {
        let genome = Genome::new(bits_of(CODING));
        assert_eq!(genome.codon_at(39), CODON_M1);
        assert_eq!(genome.codon_at(42), CODON_W1);
        assert_eq!(genome.codon_at(45), CODON_H1);
        assert_eq!(genome.codon_at(48), CODON_M0);
        assert!(genome.protein_stop(51));
    }

    #[test]
    fn terminator_lookup_wraps_to_the_smallest_entry() {
        let genome = Genome::new(bits_of(CODING));
        let smallest = *genome.terminators().iter().next().expect("terminator");
        assert_eq!(genome.first_terminator_from(0), Some(smallest));
        assert_eq!(genome.first_terminator_from(61), Some(smallest));
        assert_eq!(genome.first_terminator_from(22), Some(60));
    }

    #[test]
    fn circular_distance_wraps() {
        let genome = Genome::new(bits_of(QUIET));
        assert_eq!(genome.circular_distance(5, 15), 10);
        assert_eq!(genome.circular_distance(35, 5), 10);
        assert_eq!(genome.circular_distance(7, 7), 0);
    }

    #[test]
    fn incremental_flip_matches_full_rescan() {
        let mut patched = Genome::new(bits_of(CODING));
        let mut bits = bits_of(CODING);
        for &pos in &[0usize, 13, 27, 45, 61, 79] {
            patched.flip(pos);
            bits[pos] ^= 1;
        }
        let rescanned = Genome::new(bits);
        assert_eq!(patched.promoters(), rescanned.promoters());
    }

    #[test]
    fn double_flip_restores_the_index() {
        let mut genome = Genome::new(bits_of(CODING));
        let reference = genome.promoters().clone();
        genome.flip(10);
        genome.flip(10);
        assert_eq!(genome.promoters(), &reference);
    }
}
