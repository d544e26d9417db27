//! Duration and speed sampling.
//!
//! Samplers draw from an explicit RNG handed in by the caller; there is
//! no global randomness anywhere in the workspace.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// A distribution over positive values (speeds, durations).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sampler {
    /// Always the same value.
    Constant(f64),
    /// Triangular distribution on `[low, high]` with the given mode.
    Triangular {
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
        /// Most likely value.
        mode: f64,
    },
    /// Log-normal distribution parameterized by its actual mean and
    /// standard deviation (not the underlying normal's).
    LogNormal {
        /// Mean of the distribution.
        mean: f64,
        /// Standard deviation of the distribution.
        std_dev: f64,
    },
}

impl Sampler {
    /// Draw one value.
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> f64 {
        match *self {
            Self::Constant(v) => v,
            Self::Triangular { low, high, mode } => {
                let u: f64 = rng.random();
                let c = (mode - low) / (high - low);
                if u < c {
                    low + ((high - low) * (mode - low) * u).sqrt()
                } else {
                    high - ((high - low) * (high - mode) * (1.0 - u)).sqrt()
                }
            }
            Self::LogNormal { mean, std_dev } => {
                if std_dev == 0.0 {
                    return mean;
                }
                let mu = (mean * mean / (std_dev * std_dev + mean * mean).sqrt()).ln();
                let sigma = (1.0 + (std_dev * std_dev) / (mean * mean)).ln().sqrt();
                (mu + sigma * standard_normal(rng)).exp()
            }
        }
    }

    /// Check the parameters describe a valid distribution over
    /// positive values.
    pub fn validate(&self) -> Result<(), &'static str> {
        match *self {
            Self::Constant(v) => {
                if v <= 0.0 || !v.is_finite() {
                    return Err("constant must be positive and finite");
                }
            }
            Self::Triangular { low, high, mode } => {
                if !(low > 0.0 && low < high && low <= mode && mode <= high) {
                    return Err("triangular requires 0 < low <= mode <= high, low < high");
                }
            }
            Self::LogNormal { mean, std_dev } => {
                if mean <= 0.0 || std_dev < 0.0 {
                    return Err("log-normal requires mean > 0 and std_dev >= 0");
                }
            }
        }
        Ok(())
    }
}

// Box-Muller; rejects u1 == 0 to keep ln() finite.
fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    loop {
        let u1: f64 = rng.random();
        if u1 > 0.0 {
            let u2: f64 = rng.random();
            return (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn constant_is_constant() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let s = Sampler::Constant(2.5);
        for _ in 0..10 {
            assert_eq!(s.sample(&mut rng), 2.5);
        }
    }

    #[test]
    fn triangular_stays_in_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let s = Sampler::Triangular {
            low: 1.0,
            high: 3.0,
            mode: 2.0,
        };
        for _ in 0..1000 {
            let v = s.sample(&mut rng);
            assert!((1.0..=3.0).contains(&v));
        }
    }

    #[test]
    fn log_normal_is_positive() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let s = Sampler::LogNormal {
            mean: 5.0,
            std_dev: 2.0,
        };
        for _ in 0..1000 {
            assert!(s.sample(&mut rng) > 0.0);
        }
    }

    #[test]
    fn same_seed_same_draws() {
        let s = Sampler::Triangular {
            low: 1.0,
            high: 3.0,
            mode: 2.0,
        };
        let mut a = ChaCha8Rng::seed_from_u64(99);
        let mut b = ChaCha8Rng::seed_from_u64(99);
        for _ in 0..100 {
            assert_eq!(s.sample(&mut a), s.sample(&mut b));
        }
    }

    proptest::proptest! {
        #[test]
        fn triangular_never_leaves_its_support(
            low in 0.1f64..10.0,
            span in 0.1f64..10.0,
            mode_frac in 0.0f64..=1.0,
            seed in 0u64..1000,
        ) {
            let high = low + span;
            let s = Sampler::Triangular {
                low,
                high,
                mode: low + span * mode_frac,
            };
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for _ in 0..50 {
                let v = s.sample(&mut rng);
                proptest::prop_assert!((low..=high).contains(&v));
            }
        }
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        assert!(Sampler::Constant(0.0).validate().is_err());
        assert!(Sampler::Triangular {
            low: 2.0,
            high: 1.0,
            mode: 1.5
        }
        .validate()
        .is_err());
        assert!(Sampler::LogNormal {
            mean: -1.0,
            std_dev: 1.0
        }
        .validate()
        .is_err());
        assert!(Sampler::Triangular {
            low: 1.0,
            high: 3.0,
            mode: 2.0
        }
        .validate()
        .is_ok());
    }
}
