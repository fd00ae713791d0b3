use anyhow::{Context, Result};
use clap::Parser;
use evogrid_core::{EvoGridConfig, Experiment};
use evogrid_storage::{RunDirs, StatsWriter, load_checkpoint, save_checkpoint};
use owo_colors::OwoColorize;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

fn main() -> Result<()> {
    init_tracing();
    let cli = AppCli::parse();

    let dirs = RunDirs::create_under(&cli.run_dir).context("failed to prepare run directories")?;
    let mut experiment = bootstrap_experiment(&cli, &dirs)?;
    let mut stats = StatsWriter::create(dirs.stats()).context("failed to open stats files")?;

    let config = experiment.config().clone();
    info!(
        grid_width = config.grid_width,
        grid_height = config.grid_height,
        seed = config.seed,
        mutation_rate = config.mutation_rate,
        genome_length = config.init_genome_length,
        from_generation = experiment.generation(),
        generations = cli.generations,
        "Starting evolution run"
    );

    for _ in 0..cli.generations {
        let events = experiment.step();
        info!(
            generation = events.generation,
            best_fitness = events.summary.best.fitness,
            mean_fitness = events.summary.mean.fitness,
            mutated_children = events.summary.mutated_children,
            "Generation complete"
        );
        stats
            .record(&events.summary)
            .context("failed to append stats row")?;

        if events.backup_due {
            let path = dirs.checkpoint_path(events.generation);
            save_checkpoint(&path, &experiment.snapshot())
                .with_context(|| format!("failed to write checkpoint {}", path.display()))?;
            info!(generation = events.generation, path = %path.display(), "Checkpoint written");
        }
    }

    let best = experiment.best().metrics();
    println!(
        "{} generation {} best fitness {:.6e} (metabolic error {:.6}, {} functional proteins)",
        "evolution complete:".green().bold(),
        experiment.generation(),
        best.fitness,
        best.metaerror,
        best.functional_protein_count,
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Parser, Debug)]
#[command(
    name = "evogrid",
    version,
    about = "Deterministic evolution of bit genomes on a toroidal grid"
)]
struct AppCli {
    /// Grid width in cells.
    #[arg(long, short = 'W', env = "EVOGRID_WIDTH")]
    width: Option<u32>,
    /// Grid height in cells.
    #[arg(long, short = 'H', env = "EVOGRID_HEIGHT")]
    height: Option<u32>,
    /// Master seed for all per-cell random streams.
    #[arg(long, short = 's', env = "EVOGRID_SEED")]
    seed: Option<u64>,
    /// Per-base substitution rate applied at reproduction.
    #[arg(long, short = 'm')]
    mutation_rate: Option<f64>,
    /// Length of the randomly generated founder genome.
    #[arg(long, short = 'g')]
    genome_length: Option<usize>,
    /// Steepness of the error-to-fitness mapping.
    #[arg(long)]
    selection_pressure: Option<f64>,
    /// Generations between checkpoints (0 disables periodic backups).
    #[arg(long, short = 'b')]
    backup_step: Option<u32>,
    /// Number of generations to simulate.
    #[arg(long, short = 'n', default_value_t = 1_000)]
    generations: u64,
    /// Resume from the checkpoint written at this generation; grid and
    /// seed parameters then come from the checkpoint, not the flags.
    #[arg(long, short = 'r')]
    resume: Option<u64>,
    /// Base configuration file (TOML) applied before CLI overrides.
    #[arg(long, value_name = "FILE", env = "EVOGRID_CONFIG")]
    config: Option<PathBuf>,
    /// Directory holding backup/ and stats/.
    #[arg(long, value_name = "DIR", default_value = ".")]
    run_dir: PathBuf,
}

fn bootstrap_experiment(cli: &AppCli, dirs: &RunDirs) -> Result<Experiment> {
    if let Some(generation) = cli.resume {
        if cli.width.is_some() || cli.height.is_some() || cli.seed.is_some() {
            warn!("grid and seed flags are ignored when resuming from a checkpoint");
        }
        let path = dirs.checkpoint_path(generation);
        let data = load_checkpoint(&path)
            .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
        let experiment = Experiment::restore(data)
            .with_context(|| format!("failed to restore checkpoint {}", path.display()))?;
        info!(generation, "Resumed from checkpoint");
        return Ok(experiment);
    }

    let config = compose_config(cli)?;
    Experiment::new(config).context("failed to initialize the experiment")
}

fn compose_config(cli: &AppCli) -> Result<EvoGridConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read configuration file {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("failed to parse configuration file {}", path.display()))?
        }
        None => EvoGridConfig::default(),
    };

    if let Some(width) = cli.width {
        config.grid_width = width;
    }
    if let Some(height) = cli.height {
        config.grid_height = height;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(rate) = cli.mutation_rate {
        config.mutation_rate = rate;
    }
    if let Some(length) = cli.genome_length {
        config.init_genome_length = length;
    }
    if let Some(pressure) = cli.selection_pressure {
        config.selection_pressure = pressure;
    }
    if let Some(step) = cli.backup_step {
        config.backup_step = step;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        AppCli::command().debug_assert();
    }

    #[test]
    fn overrides_take_precedence_over_defaults() {
        let cli = AppCli::parse_from([
            "evogrid", "-W", "8", "-H", "6", "-s", "123", "-m", "0.001", "-g", "400", "-n", "50",
        ]);
        let config = compose_config(&cli).expect("config");
        assert_eq!(config.grid_width, 8);
        assert_eq!(config.grid_height, 6);
        assert_eq!(config.seed, 123);
        assert_eq!(config.mutation_rate, 0.001);
        assert_eq!(config.init_genome_length, 400);
        assert_eq!(cli.generations, 50);
        // Untouched fields keep their defaults.
        assert_eq!(config.backup_step, EvoGridConfig::default().backup_step);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let cli = AppCli::parse_from(["evogrid", "-m", "2.0"]);
        assert!(compose_config(&cli).is_err());
    }
}
