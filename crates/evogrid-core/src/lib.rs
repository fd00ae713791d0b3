//! Core types and the generation pipeline shared across the evogrid workspace.
//!
//! A population of fixed size occupies the cells of a toroidal 2D grid. Every
//! cell holds one organism whose genetic material is a circular bit string.
//! Each generation a cell picks a parent from its Moore neighborhood by
//! fitness-proportionate lottery, copies and possibly mutates the parent
//! genome, re-expresses it into RNAs and proteins, folds the proteins into a
//! phenotype curve and scores the curve against a fixed environmental target.
//! Runs are bit-reproducible for a given seed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod environment;
pub mod expression;
pub mod genome;
pub mod mutation;
pub mod organism;
pub mod protein;
pub mod rng;
pub mod world;

pub use environment::{Environment, PHENOTYPE_SIZE, fitness_from_error};
pub use expression::Rna;
pub use genome::{Genome, PROM_SIZE};
pub use mutation::{MutationPlan, Mutator};
pub use organism::Organism;
pub use protein::Protein;
pub use rng::{StreamPurpose, SubStream, Threefry};
pub use world::{CheckpointData, Experiment, GenerationEvents, OrganismRecord};

/// Errors raised when constructing or restoring an experiment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExperimentError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Indicates inconsistent checkpoint contents.
    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(&'static str),
}

/// Static configuration for an evogrid experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvoGridConfig {
    /// Width of the population grid in cells.
    pub grid_width: u32,
    /// Height of the population grid in cells.
    pub grid_height: u32,
    /// Master seed from which every per-cell stream is derived.
    pub seed: u64,
    /// Per-base substitution probability applied at reproduction.
    pub mutation_rate: f64,
    /// Length of the randomly generated founder genome, in bases.
    pub init_genome_length: usize,
    /// Steepness of the error-to-fitness mapping `exp(-k * error)`.
    pub selection_pressure: f64,
    /// Generations between checkpoints; 0 disables periodic backups.
    pub backup_step: u32,
}

impl Default for EvoGridConfig {
    fn default() -> Self {
        Self {
            grid_width: 32,
            grid_height: 32,
            seed: 42,
            mutation_rate: 1e-5,
            init_genome_length: 5_000,
            selection_pressure: 1_000.0,
            backup_step: 1_000,
        }
    }
}

impl EvoGridConfig {
    /// Ensure all parameters are usable before an experiment is built.
    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(ExperimentError::InvalidConfig(
                "grid dimensions must be non-zero",
            ));
        }
        if self.init_genome_length < PROM_SIZE {
            return Err(ExperimentError::InvalidConfig(
                "founder genome must be at least one promoter long",
            ));
        }
        if !self.mutation_rate.is_finite() || !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(ExperimentError::InvalidConfig(
                "mutation rate must lie in [0, 1]",
            ));
        }
        if !self.selection_pressure.is_finite() || self.selection_pressure <= 0.0 {
            return Err(ExperimentError::InvalidConfig(
                "selection pressure must be positive",
            ));
        }
        Ok(())
    }

    /// Number of individuals held by the grid.
    #[must_use]
    pub fn nb_indivs(&self) -> usize {
        self.grid_width as usize * self.grid_height as usize
    }
}

/// Expression and fitness figures for a single organism.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrganismMetrics {
    pub fitness: f64,
    pub metaerror: f64,
    pub genome_length: usize,
    pub rna_count: usize,
    pub coding_rna_count: usize,
    pub protein_count: usize,
    pub functional_protein_count: usize,
}

/// Population averages of the per-organism figures.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeanMetrics {
    pub fitness: f64,
    pub metaerror: f64,
    pub genome_length: f64,
    pub rna_count: f64,
    pub coding_rna_count: f64,
    pub protein_count: f64,
    pub functional_protein_count: f64,
}

/// Per-generation digest emitted after each completed step.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    pub generation: u64,
    pub best_cell: usize,
    pub best: OrganismMetrics,
    pub mean: MeanMetrics,
    /// Children that received at least one mutation this generation.
    pub mutated_children: usize,
}

/// Observer invoked after each completed generation.
pub trait GenerationSink: Send {
    fn on_generation(&mut self, summary: &GenerationSummary);
}

/// No-op generation sink.
#[derive(Debug, Default)]
pub struct NullSink;

impl GenerationSink for NullSink {
    fn on_generation(&mut self, _summary: &GenerationSummary) {}
}
