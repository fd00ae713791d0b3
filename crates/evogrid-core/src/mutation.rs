//! Mutation plan generation and application.
//!
//! The number of substitutions per child follows a binomial draw over the
//! genome length; positions are then drawn uniformly, in order, from the
//! same stream. Applying a plan flips bases and patches the promoter index
//! as it goes, leaving the genome ready for re-expression.

use rand::Rng;
use rand_distr::{Binomial, Distribution};

use crate::ExperimentError;
use crate::genome::Genome;
use crate::rng::SubStream;

/// Draws per-child edit plans for genomes of a fixed length.
#[derive(Debug, Clone)]
pub struct Mutator {
    genome_length: usize,
    binomial: Binomial,
}

impl Mutator {
    pub fn new(genome_length: usize, rate: f64) -> Result<Self, ExperimentError> {
        let binomial = Binomial::new(genome_length as u64, rate)
            .map_err(|_| ExperimentError::InvalidConfig("mutation rate must lie in [0, 1]"))?;
        Ok(Self {
            genome_length,
            binomial,
        })
    }

    /// Draw one child's edit plan from its mutation stream.
    #[must_use]
    pub fn draw_plan(&self, rng: &mut SubStream<'_>) -> MutationPlan {
        let count = self.binomial.sample(rng) as usize;
        let mut switches = Vec::with_capacity(count);
        for _ in 0..count {
            switches.push(rng.random_range(0..self.genome_length));
        }
        MutationPlan { switches }
    }
}

/// Ordered list of point substitutions for one child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPlan {
    switches: Vec<usize>,
}

impl MutationPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.switches.len()
    }

    #[must_use]
    pub fn switches(&self) -> &[usize] {
        &self.switches
    }

    /// Apply every substitution in order.
    pub fn apply(&self, genome: &mut Genome) {
        for &pos in &self.switches {
            genome.flip(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{StreamPurpose, Threefry};

    #[test]
    fn zero_rate_never_mutates() {
        let mutator = Mutator::new(1_000, 0.0).expect("mutator");
        let mut rng = Threefry::new(2, 2, 5);
        for cell in 0..4 {
            let plan = mutator.draw_plan(&mut rng.stream(cell, StreamPurpose::Mutation));
            assert!(plan.is_empty());
        }
    }

    #[test]
    fn invalid_rate_is_rejected() {
        assert!(Mutator::new(100, 1.5).is_err());
        assert!(Mutator::new(100, -0.1).is_err());
    }

    #[test]
    fn plans_are_reproducible_per_stream() {
        let mutator = Mutator::new(500, 0.01).expect("mutator");
        let mut a = Threefry::new(2, 2, 11);
        let mut b = Threefry::new(2, 2, 11);
        let plan_a = mutator.draw_plan(&mut a.stream(1, StreamPurpose::Mutation));
        let plan_b = mutator.draw_plan(&mut b.stream(1, StreamPurpose::Mutation));
        assert_eq!(plan_a, plan_b);
        assert!(plan_a.switches().iter().all(|&pos| pos < 500));
    }

    #[test]
    fn high_rate_produces_edits() {
        let mutator = Mutator::new(500, 0.05).expect("mutator");
        let mut rng = Threefry::new(1, 1, 3);
        let plan = mutator.draw_plan(&mut rng.stream(0, StreamPurpose::Mutation));
        assert!(!plan.is_empty());
    }

    #[test]
    fn applying_a_plan_flips_the_listed_bases() {
        let mut genome = Genome::new(vec![0; 64]);
        let plan = MutationPlan {
            switches: vec![3, 10, 3],
        };
        plan.apply(&mut genome);
        // Position 3 was flipped twice and cancels out.
        assert_eq!(genome.bits()[3], 0);
        assert_eq!(genome.bits()[10], 1);
    }
}
