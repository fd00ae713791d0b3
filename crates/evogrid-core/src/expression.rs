//! Transcription and gene delineation over a circular genome.
//!
//! Two RNA-construction routes exist with identical results: walking the
//! genome base by base from each promoter (used right after a mutation,
//! when the terminator index is stale) and an ordered lookup in the
//! terminator set (preferred after a full index scan).

use crate::genome::{CODON_SIZE, GENE_LEADER, Genome, PROM_SIZE, TERM_SCORE};
use crate::protein::Protein;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Bases between a terminator position and the transcribed end.
const TERM_TAIL: usize = 10;
/// Promoter bases plus the first transcribed base that never code.
const RNA_PREFIX: usize = 21;

/// One transcribed segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Rna {
    /// Promoter position.
    pub begin: usize,
    /// Position right past the terminator hairpin.
    pub end: usize,
    /// Transcript length in bases, always positive.
    pub length: usize,
    /// Expression level inherited from the promoter quality.
    pub expression: f64,
    /// Set once the transcript yields at least one protein.
    pub is_coding: bool,
    /// Candidate gene-start positions inside the transcript.
    pub gene_starts: Vec<usize>,
}

fn rna_for_terminator(genome: &Genome, begin: usize, distance: u8, terminator: usize) -> Option<Rna> {
    let end = (terminator + TERM_TAIL) % genome.len();
    let span = genome.circular_distance(begin, end);
    if span <= RNA_PREFIX {
        return None;
    }
    Some(Rna {
        begin,
        end,
        length: span - RNA_PREFIX,
        expression: 1.0 - f64::from(distance) / 5.0,
        is_coding: false,
        gene_starts: Vec::new(),
    })
}

/// Build RNAs by scanning forward from each promoter for a terminator.
///
/// A promoter whose downstream circle holds no terminator produces nothing.
#[must_use]
pub fn transcribe_by_scan(genome: &Genome) -> Vec<Rna> {
    let len = genome.len();
    let mut rnas = Vec::with_capacity(genome.promoters().len());
    for (&begin, &distance) in genome.promoters() {
        let start = (begin + PROM_SIZE) % len;
        let mut cursor = start;
        let terminator = loop {
            if genome.terminator_at(cursor) == TERM_SCORE {
                break Some(cursor);
            }
            cursor = (cursor + 1) % len;
            if cursor == start {
                break None;
            }
        };
        if let Some(terminator) = terminator {
            rnas.extend(rna_for_terminator(genome, begin, distance, terminator));
        }
    }
    rnas
}

/// Build RNAs through the ordered terminator index.
///
/// Returns early when the index is empty; that is a valid state with no
/// coding material this generation.
#[must_use]
pub fn transcribe_from_indices(genome: &Genome) -> Vec<Rna> {
    if genome.terminators().is_empty() {
        return Vec::new();
    }
    let len = genome.len();
    let mut rnas = Vec::with_capacity(genome.promoters().len());
    for (&begin, &distance) in genome.promoters() {
        let lookup = (begin + PROM_SIZE) % len;
        if let Some(terminator) = genome.first_terminator_from(lookup) {
            rnas.extend(rna_for_terminator(genome, begin, distance, terminator));
        }
    }
    rnas
}

/// Record every gene-start candidate inside each transcript.
pub fn locate_gene_starts(genome: &Genome, rnas: &mut [Rna]) {
    let len = genome.len();
    for rna in rnas.iter_mut() {
        if rna.length < PROM_SIZE {
            continue;
        }
        let mut cursor = (rna.begin + PROM_SIZE) % len;
        while cursor != rna.end {
            if genome.shine_dal_start(cursor) {
                rna.gene_starts.push(cursor);
            }
            cursor = (cursor + 1) % len;
        }
    }
}

/// Walk each candidate reading frame to its stop codon and emit proteins.
///
/// The frame begins `GENE_LEADER` bases past the gene start; codons are
/// consumed only while the transcript still holds three unread bases.
pub fn delineate_proteins(genome: &Genome, rnas: &mut [Rna]) -> Vec<Protein> {
    let len = genome.len();
    let mut proteins = Vec::new();
    for rna in rnas.iter_mut() {
        let transcribed_start = (rna.begin + PROM_SIZE) % len;
        for index in 0..rna.gene_starts.len() {
            let start = rna.gene_starts[index];
            let mut cursor = (start + GENE_LEADER) % len;
            let mut consumed = if transcribed_start <= start {
                start - transcribed_start
            } else {
                len - transcribed_start + start
            };
            consumed += GENE_LEADER;

            while rna.length >= consumed + CODON_SIZE {
                if genome.protein_stop(cursor) {
                    let protein_end = (cursor + 2) % len;
                    let frame_start = start + GENE_LEADER;
                    let protein_length = if frame_start < protein_end {
                        protein_end as i64 - frame_start as i64
                    } else {
                        len as i64 - frame_start as i64 + protein_end as i64
                    };
                    if protein_length >= CODON_SIZE as i64 {
                        proteins.push(Protein::new(
                            start,
                            protein_end,
                            protein_length as usize,
                            rna.expression,
                        ));
                        rna.is_coding = true;
                    }
                    break;
                }
                cursor = (cursor + CODON_SIZE) % len;
                consumed += CODON_SIZE;
            }
        }
    }
    proteins
}

/// Fold duplicate gene starts into one protein carrying the summed
/// expression; later duplicates are retired from further processing.
pub fn merge_duplicate_starts(proteins: &mut [Protein]) {
    let mut first_by_start: BTreeMap<usize, usize> = BTreeMap::new();
    for index in 0..proteins.len() {
        if !proteins[index].is_init {
            continue;
        }
        match first_by_start.entry(proteins[index].start) {
            Entry::Vacant(slot) => {
                slot.insert(index);
            }
            Entry::Occupied(slot) => {
                let kept = *slot.get();
                let extra = proteins[index].expression;
                proteins[kept].expression += extra;
                proteins[index].is_init = false;
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

    const QUIET: &str = "0101011001110000010110000000000000000000";
    const CODING: &str =
        "01010110011100100101101011011011011100010101111110000100110011110000000110001100";

    #[test]
    fn both_routes_transcribe_the_same_rna() {
        let genome = Genome::new(bits_of(CODING));
        let scanned = transcribe_by_scan(&genome);
        let indexed = transcribe_from_indices(&genome);
        assert_eq!(scanned, indexed);
        assert_eq!(scanned.len(), 1);

        let rna = &scanned[0];
        assert_eq!(rna.begin, 0);
        assert_eq!(rna.end, 70);
        assert_eq!(rna.length, 49);
        assert_eq!(rna.length, genome.circular_distance(rna.begin, rna.end) - 21);
        assert!((rna.expression - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_terminator_drops_the_transcript() {
        let genome = Genome::new(bits_of(QUIET));
        assert!(transcribe_by_scan(&genome).is_empty());
        assert!(transcribe_from_indices(&genome).is_empty());
    }

    #[test]
    fn gene_start_scan_finds_the_ribosome_site() {
        let genome = Genome::new(bits_of(CODING));
        let mut rnas = transcribe_by_scan(&genome);
        locate_gene_starts(&genome, &mut rnas);
        assert_eq!(rnas[0].gene_starts, vec![26]);
    }

    #[test]
    fn delineation_walks_to_the_stop_codon() {
        let genome = Genome::new(bits_of(CODING));
        let mut rnas = transcribe_by_scan(&genome);
        locate_gene_starts(&genome, &mut rnas);
        let proteins = delineate_proteins(&genome, &mut rnas);

        assert_eq!(proteins.len(), 1);
        let protein = &proteins[0];
        assert_eq!(protein.start, 26);
        assert_eq!(protein.end, 53);
        assert_eq!(protein.length, 14);
        assert!(protein.is_init);
        assert!(rnas[0].is_coding);
    }

    #[test]
    fn short_transcripts_carry_no_genes() {
        let genome = Genome::new(bits_of(CODING));
        let mut rnas = transcribe_by_scan(&genome);
        rnas[0].length = PROM_SIZE - 1;
        locate_gene_starts(&genome, &mut rnas);
        assert!(rnas[0].gene_starts.is_empty());
    }

    #[test]
    fn duplicate_starts_merge_their_expression() {
        let mut proteins = vec![
            Protein::new(26, 53, 14, 0.6),
            Protein::new(40, 60, 9, 1.0),
            Protein::new(26, 53, 14, 0.2),
        ];
        merge_duplicate_starts(&mut proteins);

        assert!(proteins[0].is_init);
        assert!((proteins[0].expression - 0.8).abs() < 1e-12);
        assert!(proteins[1].is_init);
        assert!(!proteins[2].is_init);
    }
}
