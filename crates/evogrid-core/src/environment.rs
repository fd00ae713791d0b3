//! Environmental target curve and the error-to-fitness mapping.

use crate::protein::{Y_MAX, Y_MIN};

/// Number of samples in the phenotype/target grid.
pub const PHENOTYPE_SIZE: usize = 300;

/// One Gaussian bump of the target curve.
#[derive(Debug, Clone, Copy)]
struct Gaussian {
    height: f64,
    mean: f64,
    width: f64,
}

impl Gaussian {
    fn compute_y(&self, x: f64) -> f64 {
        self.height * (-(x - self.mean).powi(2) / (2.0 * self.width * self.width)).exp()
    }
}

const TARGET_GAUSSIANS: [Gaussian; 3] = [
    Gaussian {
        height: 1.2,
        mean: 0.52,
        width: 0.12,
    },
    Gaussian {
        height: -1.4,
        mean: 0.5,
        width: 0.07,
    },
    Gaussian {
        height: 0.3,
        mean: 0.8,
        width: 0.03,
    },
];

/// Fixed metabolic target every phenotype is scored against.
#[derive(Debug, Clone)]
pub struct Environment {
    target: [f64; PHENOTYPE_SIZE],
    geometric_area: f64,
}

impl Environment {
    /// Sample the Gaussian mixture onto the phenotype grid.
    #[must_use]
    pub fn new() -> Self {
        let mut target = [0.0; PHENOTYPE_SIZE];
        for (index, sample) in target.iter_mut().enumerate() {
            let x = index as f64 / PHENOTYPE_SIZE as f64;
            let sum: f64 = TARGET_GAUSSIANS.iter().map(|g| g.compute_y(x)).sum();
            *sample = sum.clamp(Y_MIN, Y_MAX);
        }
        Self::from_target(target)
    }

    /// Adopt previously sampled target values (checkpoint restore).
    #[must_use]
    pub fn from_target(target: [f64; PHENOTYPE_SIZE]) -> Self {
        let mut geometric_area = 0.0;
        for index in 0..PHENOTYPE_SIZE - 1 {
            geometric_area += (target[index].abs() + target[index + 1].abs()) / 600.0;
        }
        Self {
            target,
            geometric_area,
        }
    }

    #[must_use]
    pub fn target(&self) -> &[f64; PHENOTYPE_SIZE] {
        &self.target
    }

    /// Trapezoidal integral of |target|; the error of an empty phenotype.
    #[must_use]
    pub fn geometric_area(&self) -> f64 {
        self.geometric_area
    }

    /// Fill `delta` with the signed gap and integrate its absolute value.
    pub fn metabolic_error(
        &self,
        phenotype: &[f64; PHENOTYPE_SIZE],
        delta: &mut [f64; PHENOTYPE_SIZE],
    ) -> f64 {
        for index in 0..PHENOTYPE_SIZE {
            delta[index] = phenotype[index] - self.target[index];
        }
        let mut error = 0.0;
        for index in 0..PHENOTYPE_SIZE - 1 {
            error += (delta[index].abs() + delta[index + 1].abs()) / 600.0;
        }
        error
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a metabolic error to fitness under the given selection pressure.
#[must_use]
pub fn fitness_from_error(metaerror: f64, selection_pressure: f64) -> f64 {
    (-selection_pressure * metaerror).exp()
}
