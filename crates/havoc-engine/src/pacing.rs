//! ---
//! havoc_section: "02-chaos-engine"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Inter-failure wait schedules."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use rand::RngCore;
use rand_distr::{Distribution, Exp1};

/// Source of the idle interval between two injection phases.
pub trait PacingSchedule: Send + fmt::Debug {
    fn next_wait(&mut self, rng: &mut dyn RngCore) -> Duration;
}

/// Memoryless arrivals: waits are exponentially distributed with mean `mttf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialPacing {
    mttf: Duration,
}

impl ExponentialPacing {
    pub fn new(mttf: Duration) -> Self {
        Self { mttf }
    }
}

impl PacingSchedule for ExponentialPacing {
    fn next_wait(&mut self, rng: &mut dyn RngCore) -> Duration {
        let unit: f64 = Exp1.sample(rng);
        let secs = unit * self.mttf.as_secs_f64();
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Constant wait, for dry runs and deterministic tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPacing {
    wait: Duration,
}

impl FixedPacing {
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }
}

impl PacingSchedule for FixedPacing {
    fn next_wait(&mut self, _rng: &mut dyn RngCore) -> Duration {
        self.wait
    }
}
