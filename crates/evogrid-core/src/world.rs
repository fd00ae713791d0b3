//! Double-buffered population grid and the per-generation pipeline.
//!
//! Selection and mutation-plan draws run sequentially so every cell
//! consumes its random streams in a fixed order; building and scoring the
//! mutated children is pure and fans out across threads with bitwise
//! identical results.

use std::sync::Arc;

use rayon::prelude::*;

use crate::environment::{Environment, PHENOTYPE_SIZE};
use crate::genome::Genome;
use crate::mutation::{MutationPlan, Mutator};
use crate::organism::Organism;
use crate::rng::{StreamPurpose, Threefry};
use crate::{EvoGridConfig, ExperimentError, GenerationSink, GenerationSummary, MeanMetrics, NullSink};

/// Cells in a Moore neighborhood.
const NEIGHBORHOOD_SIZE: usize = 9;

/// Events reported after one completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationEvents {
    pub generation: u64,
    /// True when the configured backup cadence lands on this generation.
    pub backup_due: bool,
    pub summary: GenerationSummary,
}

/// Serialized form of one organism inside a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct OrganismRecord {
    pub bits: Vec<u8>,
    pub metaerror: f64,
    pub fitness: f64,
}

/// Plain-data snapshot of a whole experiment.
///
/// Derived expression state is never recorded; restoring rebuilds the
/// indices with a full scan and re-expresses every organism.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointData {
    pub generation: u64,
    pub grid_height: u32,
    pub grid_width: u32,
    pub backup_step: u32,
    pub mutation_rate: f64,
    pub selection_pressure: f64,
    pub target: Vec<f64>,
    pub organisms: Vec<OrganismRecord>,
    pub rng_seed: u64,
    pub rng_counters: Vec<u64>,
}

/// The cell ids covered by the 3x3 neighborhood of `cell`, in row-major
/// offset order (x offset outer, y offset inner).
fn moore_neighborhood(cell: usize, width: usize, height: usize) -> [usize; NEIGHBORHOOD_SIZE] {
    let x = cell / height;
    let y = cell % height;
    let mut cells = [0; NEIGHBORHOOD_SIZE];
    let mut slot = 0;
    for dx in -1i64..=1 {
        for dy in -1i64..=1 {
            let nx = (x as i64 + dx).rem_euclid(width as i64) as usize;
            let ny = (y as i64 + dy).rem_euclid(height as i64) as usize;
            cells[slot] = nx * height + ny;
            slot += 1;
        }
    }
    cells
}

/// Owner of the double-buffered population and the generation loop.
pub struct Experiment {
    config: EvoGridConfig,
    env: Environment,
    rng: Threefry,
    mutator: Mutator,
    prev_generation: Vec<Arc<Organism>>,
    scratch_generation: Vec<Arc<Organism>>,
    reproducers: Vec<usize>,
    plans: Vec<MutationPlan>,
    generation: u64,
    best_cell: usize,
    sink: Box<dyn GenerationSink>,
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("config", &self.config)
            .field("generation", &self.generation)
            .field("best_cell", &self.best_cell)
            .finish()
    }
}

impl Experiment {
    /// Build a fresh experiment: draw a viable founder and clone it over
    /// the whole grid.
    pub fn new(config: EvoGridConfig) -> Result<Self, ExperimentError> {
        config.validate()?;
        let nb_indivs = config.nb_indivs();
        let env = Environment::new();
        let mut rng = Threefry::new(config.grid_width, config.grid_height, config.seed);
        let mutator = Mutator::new(config.init_genome_length, config.mutation_rate)?;

        // Redraw until the founder beats the empty phenotype.
        let founder = loop {
            let mut candidate = Organism::random(
                config.init_genome_length,
                &mut rng.stream(0, StreamPurpose::Mutation),
            );
            candidate.express_from_indices();
            candidate.fold_phenotype();
            candidate.assess(&env, config.selection_pressure);
            let gap = ((candidate.metaerror() - env.geometric_area()) * 1e10).round() / 1e10;
            if gap < 0.0 {
                break Arc::new(candidate);
            }
        };

        Ok(Self {
            env,
            rng,
            mutator,
            prev_generation: vec![Arc::clone(&founder); nb_indivs],
            scratch_generation: Vec::with_capacity(nb_indivs),
            reproducers: vec![0; nb_indivs],
            plans: vec![MutationPlan::default(); nb_indivs],
            generation: 0,
            best_cell: 0,
            sink: Box::new(NullSink),
            config,
        })
    }

    /// Rebuild an experiment from checkpointed state.
    pub fn restore(data: CheckpointData) -> Result<Self, ExperimentError> {
        let config = EvoGridConfig {
            grid_width: data.grid_width,
            grid_height: data.grid_height,
            seed: data.rng_seed,
            mutation_rate: data.mutation_rate,
            init_genome_length: data
                .organisms
                .first()
                .map(|record| record.bits.len())
                .ok_or(ExperimentError::InvalidCheckpoint("empty population"))?,
            selection_pressure: data.selection_pressure,
            backup_step: data.backup_step,
        };
        config.validate()?;

        let nb_indivs = config.nb_indivs();
        if data.organisms.len() != nb_indivs {
            return Err(ExperimentError::InvalidCheckpoint(
                "organism count does not match the grid",
            ));
        }
        if data.target.len() != PHENOTYPE_SIZE {
            return Err(ExperimentError::InvalidCheckpoint(
                "target sample count is wrong",
            ));
        }
        if data.rng_counters.len() != nb_indivs * StreamPurpose::COUNT {
            return Err(ExperimentError::InvalidCheckpoint(
                "random stream counters do not match the grid",
            ));
        }
        if data
            .organisms
            .iter()
            .any(|record| record.bits.len() != config.init_genome_length)
        {
            return Err(ExperimentError::InvalidCheckpoint(
                "genome lengths are not uniform",
            ));
        }

        let mut target = [0.0; PHENOTYPE_SIZE];
        target.copy_from_slice(&data.target);
        let env = Environment::from_target(target);
        let mutator = Mutator::new(config.init_genome_length, config.mutation_rate)?;

        let mut prev_generation = Vec::with_capacity(nb_indivs);
        for record in data.organisms {
            let mut organism = Organism::from_genome(Genome::new(record.bits));
            organism.express_from_indices();
            organism.fold_phenotype();
            organism.assess(&env, config.selection_pressure);
            prev_generation.push(Arc::new(organism));
        }
        let best_cell = Self::best_of(&prev_generation);

        Ok(Self {
            env,
            rng: Threefry::from_state(data.rng_seed, data.rng_counters),
            mutator,
            prev_generation,
            scratch_generation: Vec::with_capacity(nb_indivs),
            reproducers: vec![0; nb_indivs],
            plans: vec![MutationPlan::default(); nb_indivs],
            generation: data.generation,
            best_cell,
            sink: Box::new(NullSink),
            config,
        })
    }

    /// Replace the generation observer.
    pub fn set_sink(&mut self, sink: Box<dyn GenerationSink>) {
        self.sink = sink;
    }

    /// Run one full generation and report its events.
    pub fn step(&mut self) -> GenerationEvents {
        self.generation += 1;
        let nb_indivs = self.prev_generation.len();

        for cell in 0..nb_indivs {
            self.select_parent(cell);
        }
        for cell in 0..nb_indivs {
            let mut stream = self.rng.stream(cell, StreamPurpose::Mutation);
            self.plans[cell] = self.mutator.draw_plan(&mut stream);
        }

        // Children with an empty plan share the parent handle; the rest are
        // cloned, edited and re-evaluated in parallel.
        let mut next = std::mem::take(&mut self.scratch_generation);
        {
            let env = &self.env;
            let selection_pressure = self.config.selection_pressure;
            let prev = &self.prev_generation;
            let reproducers = &self.reproducers;
            let plans = &self.plans;
            (0..nb_indivs)
                .into_par_iter()
                .map(|cell| {
                    let parent = &prev[reproducers[cell]];
                    let plan = &plans[cell];
                    if plan.is_empty() {
                        return Arc::clone(parent);
                    }
                    let mut child = Organism::child_of(parent);
                    plan.apply(child.genome_mut());
                    child.express_after_mutation();
                    child.fold_phenotype();
                    child.assess(env, selection_pressure);
                    Arc::new(child)
                })
                .collect_into_vec(&mut next);
        }
        std::mem::swap(&mut self.prev_generation, &mut next);
        next.clear();
        self.scratch_generation = next;

        self.best_cell = Self::best_of(&self.prev_generation);
        let summary = self.summarize();
        self.sink.on_generation(&summary);

        GenerationEvents {
            generation: self.generation,
            backup_due: self.config.backup_step > 0
                && self.generation.is_multiple_of(u64::from(self.config.backup_step)),
            summary,
        }
    }

    /// Fitness-proportionate parent draw over the cell's neighborhood.
    fn select_parent(&mut self, cell: usize) {
        let width = self.config.grid_width as usize;
        let height = self.config.grid_height as usize;
        let neighborhood = moore_neighborhood(cell, width, height);

        let mut local_fitness = [0.0; NEIGHBORHOOD_SIZE];
        let mut sum = 0.0;
        for (slot, &neighbor) in neighborhood.iter().enumerate() {
            let fitness = self.prev_generation[neighbor].fitness();
            local_fitness[slot] = fitness;
            sum += fitness;
        }

        let mut probs = [1.0 / NEIGHBORHOOD_SIZE as f64; NEIGHBORHOOD_SIZE];
        if sum > 0.0 {
            for (prob, fitness) in probs.iter_mut().zip(local_fitness) {
                *prob = fitness / sum;
            }
        }

        let winner = self
            .rng
            .stream(cell, StreamPurpose::Reproduction)
            .roulette(&probs);
        self.reproducers[cell] = neighborhood[winner];
    }

    /// Lowest cell holding the maximum fitness.
    fn best_of(population: &[Arc<Organism>]) -> usize {
        let mut best_cell = 0;
        let mut best_fitness = population[0].fitness();
        for (cell, organism) in population.iter().enumerate().skip(1) {
            if organism.fitness() > best_fitness {
                best_cell = cell;
                best_fitness = organism.fitness();
            }
        }
        best_cell
    }

    fn summarize(&self) -> GenerationSummary {
        let nb_indivs = self.prev_generation.len() as f64;
        let mut mean = MeanMetrics::default();
        for organism in &self.prev_generation {
            let metrics = organism.metrics();
            mean.fitness += metrics.fitness;
            mean.metaerror += metrics.metaerror;
            mean.genome_length += metrics.genome_length as f64;
            mean.rna_count += metrics.rna_count as f64;
            mean.coding_rna_count += metrics.coding_rna_count as f64;
            mean.protein_count += metrics.protein_count as f64;
            mean.functional_protein_count += metrics.functional_protein_count as f64;
        }
        mean.fitness /= nb_indivs;
        mean.metaerror /= nb_indivs;
        mean.genome_length /= nb_indivs;
        mean.rna_count /= nb_indivs;
        mean.coding_rna_count /= nb_indivs;
        mean.protein_count /= nb_indivs;
        mean.functional_protein_count /= nb_indivs;

        GenerationSummary {
            generation: self.generation,
            best_cell: self.best_cell,
            best: self.prev_generation[self.best_cell].metrics(),
            mean,
            mutated_children: self.plans.iter().filter(|plan| !plan.is_empty()).count(),
        }
    }

    /// Capture the full state needed to resume this run later.
    #[must_use]
    pub fn snapshot(&self) -> CheckpointData {
        CheckpointData {
            generation: self.generation,
            grid_height: self.config.grid_height,
            grid_width: self.config.grid_width,
            backup_step: self.config.backup_step,
            mutation_rate: self.config.mutation_rate,
            selection_pressure: self.config.selection_pressure,
            target: self.env.target().to_vec(),
            organisms: self
                .prev_generation
                .iter()
                .map(|organism| OrganismRecord {
                    bits: organism.genome().bits().to_vec(),
                    metaerror: organism.metaerror(),
                    fitness: organism.fitness(),
                })
                .collect(),
            rng_seed: self.rng.seed(),
            rng_counters: self.rng.counters().to_vec(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EvoGridConfig {
        &self.config
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Completed generations since the start of the run.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn nb_indivs(&self) -> usize {
        self.prev_generation.len()
    }

    /// Organism currently held by `cell`.
    #[must_use]
    pub fn organism(&self, cell: usize) -> &Organism {
        &self.prev_generation[cell]
    }

    /// Cell of the fittest organism in the last completed generation.
    #[must_use]
    pub fn best_cell(&self) -> usize {
        self.best_cell
    }

    /// The fittest organism in the last completed generation.
    #[must_use]
    pub fn best(&self) -> &Organism {
        &self.prev_generation[self.best_cell]
    }

    /// Parent cell chosen for `cell` in the last completed generation.
    #[must_use]
    pub fn parent_of(&self, cell: usize) -> usize {
        self.reproducers[cell]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> EvoGridConfig {
        EvoGridConfig {
            grid_width: 3,
            grid_height: 3,
            seed: 0xDEC0DE,
            mutation_rate: 0.0,
            init_genome_length: 256,
            selection_pressure: 1_000.0,
            backup_step: 5,
        }
    }

    #[test]
    fn neighborhood_order_wraps_toroidally() {
        // Cell (0, 0) of a 4x4 grid reaches across both seams.
        assert_eq!(
            moore_neighborhood(0, 4, 4),
            [15, 12, 13, 3, 0, 1, 7, 4, 5]
        );
        // An interior cell is plain row-major around itself.
        assert_eq!(
            moore_neighborhood(5, 4, 4),
            [0, 1, 2, 4, 5, 6, 8, 9, 10]
        );
    }

    #[test]
    fn founder_populates_every_cell() {
        let experiment = Experiment::new(small_config()).expect("experiment");
        assert_eq!(experiment.nb_indivs(), 9);
        assert_eq!(experiment.generation(), 0);
        let founder_fitness = experiment.organism(0).fitness();
        assert!(founder_fitness > 0.0);
        for cell in 1..9 {
            assert_eq!(experiment.organism(cell).fitness(), founder_fitness);
        }
        // The founder strictly beats the empty phenotype.
        assert!(experiment.organism(0).metaerror() < experiment.environment().geometric_area());
    }

    #[test]
    fn uniform_fitness_selection_matches_the_raw_draw() {
        let config = small_config();
        let mut experiment = Experiment::new(config.clone()).expect("experiment");
        experiment.step();

        // All nine organisms held identical fitness, so the winner index is
        // exactly the uniform draw scaled by the neighborhood size.
        let mut oracle = Threefry::new(config.grid_width, config.grid_height, config.seed);
        for cell in 0..9 {
            let u = oracle.stream(cell, StreamPurpose::Reproduction).next_f64();
            let expected = moore_neighborhood(cell, 3, 3)[(u * 9.0) as usize];
            assert_eq!(experiment.parent_of(cell), expected);
        }
    }

    #[test]
    fn unmutated_children_share_the_parent_allocation() {
        let mut experiment = Experiment::new(small_config()).expect("experiment");
        let before = Arc::as_ptr(&experiment.prev_generation[0]);
        experiment.step();
        // Rate zero: every child is a shared handle onto generation zero.
        for cell in 0..9 {
            assert_eq!(Arc::as_ptr(&experiment.prev_generation[cell]), before);
        }
    }

    #[test]
    fn step_reports_backup_cadence() {
        let mut experiment = Experiment::new(small_config()).expect("experiment");
        for generation in 1..=10u64 {
            let events = experiment.step();
            assert_eq!(events.generation, generation);
            assert_eq!(events.backup_due, generation % 5 == 0);
            assert_eq!(events.summary.generation, generation);
        }
    }

    #[test]
    fn best_search_prefers_the_lowest_cell_on_ties() {
        let experiment = Experiment::new(small_config()).expect("experiment");
        // Generation zero is a grid of clones, so every fitness ties.
        assert_eq!(Experiment::best_of(&experiment.prev_generation), 0);
    }

    #[test]
    fn snapshot_round_trips_through_restore() {
        let config = EvoGridConfig {
            mutation_rate: 5e-3,
            ..small_config()
        };
        let mut experiment = Experiment::new(config).expect("experiment");
        for _ in 0..5 {
            experiment.step();
        }

        let restored = Experiment::restore(experiment.snapshot()).expect("restore");
        assert_eq!(restored.generation(), experiment.generation());
        assert_eq!(restored.nb_indivs(), experiment.nb_indivs());
        for cell in 0..experiment.nb_indivs() {
            assert_eq!(
                restored.organism(cell).fitness(),
                experiment.organism(cell).fitness(),
            );
            assert_eq!(
                restored.organism(cell).genome().bits(),
                experiment.organism(cell).genome().bits(),
            );
        }
    }

    #[test]
    fn restore_rejects_inconsistent_checkpoints() {
        let experiment = Experiment::new(small_config()).expect("experiment");
        let mut truncated = experiment.snapshot();
        truncated.organisms.pop();
        assert!(Experiment::restore(truncated).is_err());

        let mut bad_counters = experiment.snapshot();
        bad_counters.rng_counters.pop();
        assert!(Experiment::restore(bad_counters).is_err());
    }
}
