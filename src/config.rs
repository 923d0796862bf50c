//! Run configuration.
//!
//! Every field has a default, so a YAML file only needs the keys it
//! changes:
//!
//! ```yaml
//! nbody: 16384
//! workers: 4
//! theta: 0.7
//! dt: 0.0125
//! max_steps: 40
//! ```

use crate::{
    error::{Result, SimError},
    gravity::Gravity,
};
use serde::Deserialize;
use std::{fs::File, io::BufReader, path::Path};

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Number of bodies.
    pub nbody: usize,
    /// Number of worker threads.
    pub workers: usize,
    /// Dump the final body state instead of the timing report.
    pub emit_bodies: bool,
    /// Opening angle.
    pub theta: f64,
    /// Softening added to squared distances.
    pub eps2: f64,
    /// Gravitational constant.
    pub g: f64,
    /// Fixed time step.
    pub dt: f64,
    /// Simulated time at which the run stops.
    pub t_stop: f64,
    /// Step count at which the run stops.
    pub max_steps: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nbody: Self::DEFAULT_NBODY,
            workers: 1,
            emit_bodies: false,
            theta: Gravity::DEFAULT_THETA,
            eps2: Gravity::DEFAULT_EPS2,
            g: Gravity::DEFAULT_G,
            dt: Self::DEFAULT_DT,
            t_stop: Self::DEFAULT_T_STOP,
            max_steps: Self::DEFAULT_MAX_STEPS,
        }
    }
}

impl SimConfig {
    pub const DEFAULT_NBODY: usize = 100_000;
    pub const DEFAULT_DT: f64 = 0.025;
    pub const DEFAULT_T_STOP: f64 = 2.0;
    pub const DEFAULT_MAX_STEPS: u64 = 10;

    /// Loads a configuration from a YAML file; absent keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn gravity(&self) -> Gravity {
        Gravity::new(self.g, self.eps2, self.theta)
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(SimError::InvalidConfig(msg))
        }

        if self.nbody == 0 {
            return invalid("nbody must be positive".into());
        }
        if u32::try_from(self.nbody).is_err() {
            return invalid(format!("nbody {} exceeds the tree's index range", self.nbody));
        }
        if self.workers == 0 {
            return invalid("workers must be positive".into());
        }
        if !(self.theta.is_finite() && self.theta >= 0.0) {
            return invalid(format!("theta must be finite and >= 0, got {}", self.theta));
        }
        if !(self.eps2.is_finite() && self.eps2 >= 0.0) {
            return invalid(format!("eps2 must be finite and >= 0, got {}", self.eps2));
        }
        if !(self.g.is_finite() && self.g > 0.0) {
            return invalid(format!("g must be finite and > 0, got {}", self.g));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return invalid(format!("dt must be finite and > 0, got {}", self.dt));
        }
        if self.t_stop.is_nan() || self.t_stop <= 0.0 {
            return invalid(format!("t_stop must be > 0, got {}", self.t_stop));
        }
        Ok(())
    }
}
