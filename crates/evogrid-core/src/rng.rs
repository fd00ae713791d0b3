//! Counter-based Threefry generator with reproducible per-cell sub-streams.
//!
//! Every (cell, purpose) pair owns an independent stream keyed by the master
//! seed, so the draws one cell consumes never perturb another cell's
//! sequence. The per-stream draw counters are the only mutable state, which
//! makes the whole generator a plain table that checkpoints losslessly.

use rand::RngCore;

const ROUNDS: usize = 20;
const ROTATIONS: [u32; 8] = [16, 42, 12, 31, 16, 32, 24, 21];
const KS_PARITY: u64 = 0x1BD1_1BDA_A9FC_1A22;

/// One Threefry-2x64 block: encrypt `counter` under `key`.
fn threefry_2x64(key: [u64; 2], counter: [u64; 2]) -> [u64; 2] {
    let ks = [key[0], key[1], key[0] ^ key[1] ^ KS_PARITY];
    let mut x = [
        counter[0].wrapping_add(ks[0]),
        counter[1].wrapping_add(ks[1]),
    ];
    for round in 0..ROUNDS {
        x[0] = x[0].wrapping_add(x[1]);
        x[1] = x[1].rotate_left(ROTATIONS[round % 8]) ^ x[0];
        if (round + 1) % 4 == 0 {
            let injection = (round + 1) / 4;
            x[0] = x[0].wrapping_add(ks[injection % 3]);
            x[1] = x[1].wrapping_add(ks[(injection + 1) % 3].wrapping_add(injection as u64));
        }
    }
    x
}

/// Purpose tag separating the random streams one cell consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamPurpose {
    /// Mutation-count and mutation-position draws.
    Mutation = 0,
    /// Parent-selection roulette draws.
    Reproduction = 1,
}

impl StreamPurpose {
    /// Number of distinct purposes per cell.
    pub const COUNT: usize = 2;
}

/// Stateless-core generator owning one draw counter per (cell, purpose).
#[derive(Debug, Clone)]
pub struct Threefry {
    seed: u64,
    counters: Vec<u64>,
}

impl Threefry {
    /// Fresh generator for a `grid_width * grid_height` population.
    #[must_use]
    pub fn new(grid_width: u32, grid_height: u32, seed: u64) -> Self {
        let cells = grid_width as usize * grid_height as usize;
        Self {
            seed,
            counters: vec![0; cells * StreamPurpose::COUNT],
        }
    }

    /// Rebuild a generator from checkpointed state.
    #[must_use]
    pub fn from_state(seed: u64, counters: Vec<u64>) -> Self {
        Self { seed, counters }
    }

    /// Master seed shared by every sub-stream.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Per-(cell, purpose) draw counters, in cell-major order.
    #[must_use]
    pub fn counters(&self) -> &[u64] {
        &self.counters
    }

    /// Borrow the sub-stream for `(cell_id, purpose)`.
    ///
    /// Draws advance the owned counter, so a later borrow of the same pair
    /// continues the sequence instead of replaying it.
    pub fn stream(&mut self, cell_id: usize, purpose: StreamPurpose) -> SubStream<'_> {
        let slot = cell_id * StreamPurpose::COUNT + purpose as usize;
        SubStream {
            key: [self.seed, ((purpose as u64) << 32) | cell_id as u64],
            counter: &mut self.counters[slot],
        }
    }
}

/// Exclusive handle on one (cell, purpose) random sequence.
#[derive(Debug)]
pub struct SubStream<'a> {
    key: [u64; 2],
    counter: &'a mut u64,
}

impl SubStream<'_> {
    fn next_block(&mut self) -> u64 {
        let counter = *self.counter;
        *self.counter = counter.wrapping_add(1);
        threefry_2x64(self.key, [counter, 0])[0]
    }

    /// Uniform draw in `[0, 1)` with 53-bit resolution.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roulette draw over `probs`; precondition: the entries sum to ~1.
    pub fn roulette(&mut self, probs: &[f64]) -> usize {
        let u = self.next_f64();
        pick(probs, u)
    }
}

/// First index whose cumulative probability exceeds `u`.
fn pick(probs: &[f64], u: f64) -> usize {
    let mut cumulative = 0.0;
    for (index, prob) in probs.iter().enumerate() {
        cumulative += prob;
        if u < cumulative {
            return index;
        }
    }
    probs.len() - 1
}

impl RngCore for SubStream<'_> {
    fn next_u32(&mut self) -> u32 {
        (self.next_block() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.next_block()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for chunk in dst.chunks_mut(8) {
            let word = self.next_block().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}
