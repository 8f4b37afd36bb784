/// Training hyperparameters stored with a segmentor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingParams {
    /// Maximum number of generations.
    pub epoch_count: u32,
    /// Initial population size.
    pub pool_size: usize,
    /// Lower bound of the elastic population size.
    pub min_pool_size: usize,
    /// Upper bound of the elastic population size.
    pub max_pool_size: usize,
    /// Number of individuals carried unchanged into the next generation.
    pub elite_count: usize,
    /// Training stops as soon as the best fitness reaches this value.
    pub target_fitness: f32,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epoch_count: 100,
            pool_size: 20,
            min_pool_size: 20,
            max_pool_size: 20,
            elite_count: 5,
            target_fitness: 0.99,
        }
    }
}

#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
pub enum ParamError {
    #[display("epoch count must be at least 1")]
    EpochCount,
    #[display("pool size {size} is below the minimum of 3")]
    PoolSize { size: usize },
    #[display("pool size {size} is outside its bounds [{min}, {max}]")]
    PoolBounds { size: usize, min: usize, max: usize },
    #[display("elite count {elite} must be in [2, {pool}) for a minimum pool of {pool}")]
    EliteCount { elite: usize, pool: usize },
    #[display("target fitness {value} is outside [0, 1]")]
    TargetFitness { value: f32 },
    #[display("binary threshold {value} is not finite")]
    Threshold { value: f32 },
}

impl TrainingParams {
    /// Sets the pool size and collapses both bounds onto it.
    #[must_use]
    pub fn with_fixed_pool(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self.min_pool_size = pool_size;
        self.max_pool_size = pool_size;
        self
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if self.epoch_count == 0 {
            return Err(ParamError::EpochCount);
        }
        if self.pool_size < 3 {
            return Err(ParamError::PoolSize {
                size: self.pool_size,
            });
        }
        if !(self.min_pool_size..=self.max_pool_size).contains(&self.pool_size) {
            return Err(ParamError::PoolBounds {
                size: self.pool_size,
                min: self.min_pool_size,
                max: self.max_pool_size,
            });
        }
        if self.elite_count < 2 || self.elite_count >= self.min_pool_size {
            return Err(ParamError::EliteCount {
                elite: self.elite_count,
                pool: self.min_pool_size,
            });
        }
        if !(0.0..=1.0).contains(&self.target_fitness) {
            return Err(ParamError::TargetFitness {
                value: self.target_fitness,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(TrainingParams::default().validate(), Ok(()));
    }

    #[test]
    fn test_invalid_params() {
        let base = TrainingParams::default();
        let test_cases = [
            ("no epoch", TrainingParams { epoch_count: 0, ..base }),
            ("tiny pool", base.with_fixed_pool(2)),
            ("pool above max", TrainingParams { pool_size: 30, ..base }),
            ("min above pool", TrainingParams { min_pool_size: 25, ..base }),
            ("single elite", TrainingParams { elite_count: 1, ..base }),
            ("elite fills pool", TrainingParams { elite_count: 20, ..base }),
            ("target above one", TrainingParams { target_fitness: 1.5, ..base }),
            ("target nan", TrainingParams { target_fitness: f32::NAN, ..base }),
        ];
        for (name, params) in test_cases {
            assert!(params.validate().is_err(), "{name}");
        }
    }

    #[test]
    fn test_elastic_pool_bounds_elite_by_minimum() {
        let params = TrainingParams {
            pool_size: 16,
            min_pool_size: 6,
            max_pool_size: 64,
            elite_count: 5,
            ..TrainingParams::default()
        };
        assert_eq!(params.validate(), Ok(()));
        let params = TrainingParams {
            min_pool_size: 5,
            ..params
        };
        assert_eq!(
            params.validate(),
            Err(ParamError::EliteCount { elite: 5, pool: 5 })
        );
    }
}
