//! Checkpoint and statistics persistence for evogrid runs.
//!
//! Checkpoints are gzip streams of little-endian fields laid out in a fixed
//! order; statistics are per-generation CSV rows for the best organism and
//! the population mean. Both live under a run directory holding `backup/`
//! and `stats/`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use evogrid_core::{
    CheckpointData, GenerationSink, GenerationSummary, OrganismRecord, PHENOTYPE_SIZE,
    StreamPurpose,
};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound accepted for a single grid dimension when loading.
const MAX_GRID_DIM: u32 = 1 << 16;
/// Upper bound accepted for a genome length when loading.
const MAX_GENOME_LENGTH: u32 = 1 << 28;

/// Storage error wrapper carrying the offending path.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt checkpoint {path}: {reason}")]
    Corrupt { path: PathBuf, reason: &'static str },
}

fn io_failure(path: &Path, source: io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn corrupt(path: &Path, reason: &'static str) -> StorageError {
    StorageError::Corrupt {
        path: path.to_path_buf(),
        reason,
    }
}

/// The `backup/` and `stats/` directories of one run.
#[derive(Debug, Clone)]
pub struct RunDirs {
    backup: PathBuf,
    stats: PathBuf,
}

impl RunDirs {
    /// Create (or adopt) both directories under `root`.
    pub fn create_under(root: &Path) -> Result<Self, StorageError> {
        let backup = root.join("backup");
        let stats = root.join("stats");
        fs::create_dir_all(&backup).map_err(|err| io_failure(&backup, err))?;
        fs::create_dir_all(&stats).map_err(|err| io_failure(&stats, err))?;
        Ok(Self { backup, stats })
    }

    #[must_use]
    pub fn backup(&self) -> &Path {
        &self.backup
    }

    #[must_use]
    pub fn stats(&self) -> &Path {
        &self.stats
    }

    /// Canonical checkpoint path for a generation.
    #[must_use]
    pub fn checkpoint_path(&self, generation: u64) -> PathBuf {
        self.backup.join(format!("backup_{generation}.zae"))
    }
}

/// Write one checkpoint; either the stream closes cleanly or this errors.
pub fn save_checkpoint(path: &Path, data: &CheckpointData) -> Result<(), StorageError> {
    let file = File::create(path).map_err(|err| io_failure(path, err))?;
    let mut writer = GzEncoder::new(BufWriter::new(file), Compression::default());
    encode(&mut writer, data).map_err(|err| io_failure(path, err))?;
    let mut inner = writer.finish().map_err(|err| io_failure(path, err))?;
    inner.flush().map_err(|err| io_failure(path, err))?;
    Ok(())
}

/// Read one checkpoint back into plain data.
pub fn load_checkpoint(path: &Path) -> Result<CheckpointData, StorageError> {
    let file = File::open(path).map_err(|err| io_failure(path, err))?;
    let mut reader = GzDecoder::new(BufReader::new(file));
    decode(&mut reader, path)
}

fn encode<W: Write>(writer: &mut W, data: &CheckpointData) -> io::Result<()> {
    writer.write_i32::<LittleEndian>(data.generation as i32)?;
    writer.write_i32::<LittleEndian>(data.grid_height as i32)?;
    writer.write_i32::<LittleEndian>(data.grid_width as i32)?;
    writer.write_i32::<LittleEndian>(data.organisms.len() as i32)?;
    writer.write_i32::<LittleEndian>(data.backup_step as i32)?;
    writer.write_f64::<LittleEndian>(data.mutation_rate)?;
    writer.write_f64::<LittleEndian>(data.selection_pressure)?;
    for &sample in &data.target {
        writer.write_f64::<LittleEndian>(sample)?;
    }
    for organism in &data.organisms {
        writer.write_u32::<LittleEndian>(organism.bits.len() as u32)?;
        writer.write_all(&organism.bits)?;
        writer.write_f64::<LittleEndian>(organism.metaerror)?;
        writer.write_f64::<LittleEndian>(organism.fitness)?;
    }
    writer.write_u64::<LittleEndian>(data.rng_seed)?;
    writer.write_u32::<LittleEndian>(data.rng_counters.len() as u32)?;
    for &counter in &data.rng_counters {
        writer.write_u64::<LittleEndian>(counter)?;
    }
    Ok(())
}

fn decode<R: Read>(reader: &mut R, path: &Path) -> Result<CheckpointData, StorageError> {
    let read_failure = |err: io::Error| io_failure(path, err);

    let generation = reader.read_i32::<LittleEndian>().map_err(read_failure)?;
    let grid_height = reader.read_i32::<LittleEndian>().map_err(read_failure)?;
    let grid_width = reader.read_i32::<LittleEndian>().map_err(read_failure)?;
    let nb_indivs = reader.read_i32::<LittleEndian>().map_err(read_failure)?;
    let backup_step = reader.read_i32::<LittleEndian>().map_err(read_failure)?;

    if generation < 0 || backup_step < 0 {
        return Err(corrupt(path, "negative time field"));
    }
    if grid_height <= 0
        || grid_width <= 0
        || grid_height as u32 > MAX_GRID_DIM
        || grid_width as u32 > MAX_GRID_DIM
    {
        return Err(corrupt(path, "grid dimensions out of range"));
    }
    if nb_indivs as i64 != grid_height as i64 * grid_width as i64 {
        return Err(corrupt(path, "population size does not match the grid"));
    }

    let mutation_rate = reader.read_f64::<LittleEndian>().map_err(read_failure)?;
    let selection_pressure = reader.read_f64::<LittleEndian>().map_err(read_failure)?;

    let mut target = Vec::with_capacity(PHENOTYPE_SIZE);
    for _ in 0..PHENOTYPE_SIZE {
        target.push(reader.read_f64::<LittleEndian>().map_err(read_failure)?);
    }

    let mut organisms = Vec::with_capacity(nb_indivs as usize);
    for _ in 0..nb_indivs {
        let length = reader.read_u32::<LittleEndian>().map_err(read_failure)?;
        if length == 0 || length > MAX_GENOME_LENGTH {
            return Err(corrupt(path, "genome length out of range"));
        }
        let mut bits = vec![0u8; length as usize];
        reader.read_exact(&mut bits).map_err(read_failure)?;
        if bits.iter().any(|&bit| bit > 1) {
            return Err(corrupt(path, "genome holds non-binary bases"));
        }
        let metaerror = reader.read_f64::<LittleEndian>().map_err(read_failure)?;
        let fitness = reader.read_f64::<LittleEndian>().map_err(read_failure)?;
        organisms.push(OrganismRecord {
            bits,
            metaerror,
            fitness,
        });
    }

    let rng_seed = reader.read_u64::<LittleEndian>().map_err(read_failure)?;
    let counter_count = reader.read_u32::<LittleEndian>().map_err(read_failure)?;
    if counter_count as usize != nb_indivs as usize * StreamPurpose::COUNT {
        return Err(corrupt(path, "random stream counters do not match the grid"));
    }
    let mut rng_counters = Vec::with_capacity(counter_count as usize);
    for _ in 0..counter_count {
        rng_counters.push(reader.read_u64::<LittleEndian>().map_err(read_failure)?);
    }

    Ok(CheckpointData {
        generation: generation as u64,
        grid_height: grid_height as u32,
        grid_width: grid_width as u32,
        backup_step: backup_step as u32,
        mutation_rate,
        selection_pressure,
        target,
        organisms,
        rng_seed,
        rng_counters,
    })
}

const STATS_HEADER: &str = "generation,fitness,metaerror,genome_length,rna_count,coding_rna_count,protein_count,functional_protein_count";

/// Per-generation CSV writer for best-organism and population-mean rows.
pub struct StatsWriter {
    best_path: PathBuf,
    mean_path: PathBuf,
    best: BufWriter<File>,
    mean: BufWriter<File>,
}

impl StatsWriter {
    /// Create `stats_best.csv` and `stats_mean.csv` under `stats_dir`.
    pub fn create(stats_dir: &Path) -> Result<Self, StorageError> {
        let best_path = stats_dir.join("stats_best.csv");
        let mean_path = stats_dir.join("stats_mean.csv");
        let mut best = BufWriter::new(
            File::create(&best_path).map_err(|err| io_failure(&best_path, err))?,
        );
        let mut mean = BufWriter::new(
            File::create(&mean_path).map_err(|err| io_failure(&mean_path, err))?,
        );
        writeln!(best, "{STATS_HEADER}").map_err(|err| io_failure(&best_path, err))?;
        writeln!(mean, "{STATS_HEADER}").map_err(|err| io_failure(&mean_path, err))?;
        Ok(Self {
            best_path,
            mean_path,
            best,
            mean,
        })
    }

    /// Append one generation's rows and flush them to disk.
    pub fn record(&mut self, summary: &GenerationSummary) -> Result<(), StorageError> {
        let best = &summary.best;
        writeln!(
            self.best,
            "{},{:e},{},{},{},{},{},{}",
            summary.generation,
            best.fitness,
            best.metaerror,
            best.genome_length,
            best.rna_count,
            best.coding_rna_count,
            best.protein_count,
            best.functional_protein_count,
        )
        .and_then(|()| self.best.flush())
        .map_err(|err| io_failure(&self.best_path, err))?;

        let mean = &summary.mean;
        writeln!(
            self.mean,
            "{},{:e},{},{},{},{},{},{}",
            summary.generation,
            mean.fitness,
            mean.metaerror,
            mean.genome_length,
            mean.rna_count,
            mean.coding_rna_count,
            mean.protein_count,
            mean.functional_protein_count,
        )
        .and_then(|()| self.mean.flush())
        .map_err(|err| io_failure(&self.mean_path, err))?;
        Ok(())
    }
}

impl GenerationSink for StatsWriter {
    fn on_generation(&mut self, summary: &GenerationSummary) {
        if let Err(err) = self.record(summary) {
            eprintln!(
                "failed to write stats for generation {}: {err}",
                summary.generation
            );
        }
    }
}
