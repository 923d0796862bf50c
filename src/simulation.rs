use crate::{
    body::Body,
    bounds::BoundingBox,
    config::SimConfig,
    error::{Result, SimError},
    gravity::Gravity,
    integrator::Leapfrog,
    octree::Octree,
    pool::WorkerPool,
};

use log::{debug, info, trace};
use std::time::{Duration, Instant};

/// The three barrier-separated phases of a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    BuildTree,
    ComputeForces,
    Integrate,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::BuildTree => "build-tree",
            Phase::ComputeForces => "compute-forces",
            Phase::Integrate => "integrate",
        })
    }
}

/// Simulated time and the stop conditions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Clock {
    pub dt: f64,
    /// Completed steps.
    pub step: u64,
    pub t_stop: f64,
    pub max_steps: u64,
}

impl Clock {
    pub fn new(dt: f64, t_stop: f64, max_steps: u64) -> Self {
        Self {
            dt,
            step: 0,
            t_stop,
            max_steps,
        }
    }

    /// Current simulated time. Derived from the step count, so it does not
    /// accumulate rounding error.
    pub fn time(&self) -> f64 {
        self.step as f64 * self.dt
    }

    /// Whether either stop condition has been reached. Time within a tenth
    /// of a step of `t_stop` counts as reached.
    pub fn finished(&self) -> bool {
        self.step >= self.max_steps || self.time() + 0.1 * self.dt >= self.t_stop
    }

    fn tick(&mut self) {
        self.step += 1;
    }
}

/// Everything a step's phases share: the root extent and the tree built
/// over the step's body snapshot.
#[derive(Debug)]
pub struct StepContext {
    pub bounds: BoundingBox,
    pub tree: Octree,
}

impl StepContext {
    pub fn new(bounds: BoundingBox) -> Self {
        Self {
            bounds,
            tree: Octree::new(),
        }
    }
}

/// Timings and counters for one completed step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepStats {
    /// Index of the step (starting at 0).
    pub step: u64,
    /// Simulated time after the step.
    pub time: f64,
    /// Body-node interactions evaluated.
    pub interactions: u64,
    /// Nodes in the step's tree.
    pub nodes: usize,
    pub build: Duration,
    pub forces: Duration,
    pub integrate: Duration,
}

/// Result of [`Simulation::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    pub time: f64,
    pub interactions: u64,
    pub elapsed: Duration,
}

/// Phase 1: grow the bounding box if a body left it, then rebuild the tree
/// from the current positions.
pub fn build_tree(ctx: &mut StepContext, bodies: &[Body], pool: &WorkerPool) -> Result<()> {
    if ctx.bounds.expand_to_fit(bodies)? {
        debug!(
            "bounding box grew to side {} at {:?}",
            ctx.bounds.size, ctx.bounds.min
        );
    }
    ctx.tree.build_in(pool, bodies, &ctx.bounds)
}

/// Phase 2: overwrite every body's acceleration from the tree.
/// Returns the number of interactions evaluated.
///
/// Each worker writes only its own slice of the store; positions are read
/// from the tree's snapshot.
pub fn compute_forces(
    ctx: &StepContext,
    gravity: &Gravity,
    bodies: &mut [Body],
    pool: &WorkerPool,
) -> u64 {
    let tree = &ctx.tree;
    pool.for_each_slice(bodies, |offset, slice| {
        let mut interactions = 0;
        for (i, body) in slice.iter_mut().enumerate() {
            let (acc, count) = gravity.acceleration(tree, (offset + i) as u32);
            body.acc = acc;
            interactions += count;
        }
        interactions
    })
}

/// Phase 3: advance velocity and position of every body.
pub fn integrate(leapfrog: &Leapfrog, bodies: &mut [Body], pool: &WorkerPool) {
    pool.for_each_slice(bodies, |_, slice| {
        slice.iter_mut().for_each(|body| leapfrog.advance(body));
        0
    });
}

fn timed<R>(phase: Phase, step: u64, f: impl FnOnce() -> R) -> (R, Duration) {
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    trace!("step {step}: {phase} took {elapsed:?}");
    (result, elapsed)
}

/// Manages the Barnes-Hut N-body simulation state and logic.
#[derive(Debug)]
pub struct Simulation {
    bodies: Vec<Body>,
    context: StepContext,
    gravity: Gravity,
    leapfrog: Leapfrog,
    clock: Clock,
    pool: WorkerPool,
    /// Interactions evaluated over the whole run.
    interactions: u64,
}

impl Simulation {
    /// Takes ownership of the body store and prepares a run described by
    /// `config`. The bounding box is computed here, once.
    pub fn new(bodies: Vec<Body>, config: &SimConfig) -> Result<Self> {
        if bodies.is_empty() {
            return Err(SimError::EmptySystem);
        }
        config.validate()?;
        if bodies.len() != config.nbody {
            return Err(SimError::InvalidConfig(format!(
                "config expects {} bodies, got {}",
                config.nbody,
                bodies.len()
            )));
        }
        let bounds = BoundingBox::containing(&bodies)?;
        let pool = WorkerPool::new(config.workers)?;

        Ok(Self {
            bodies,
            context: StepContext::new(bounds),
            gravity: config.gravity(),
            leapfrog: Leapfrog::new(config.dt),
            clock: Clock::new(config.dt, config.t_stop, config.max_steps),
            pool,
            interactions: 0,
        })
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn into_bodies(self) -> Vec<Body> {
        self.bodies
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.context.bounds
    }

    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    pub fn interactions(&self) -> u64 {
        self.interactions
    }

    /// Whether velocities are level with positions (false between steps).
    pub fn is_synchronized(&self) -> bool {
        !self.leapfrog.is_staggered()
    }

    /// Advances the simulation by one step: build tree, compute forces,
    /// integrate. Each phase completes for every body before the next
    /// begins.
    pub fn step(&mut self) -> Result<StepStats> {
        let step = self.clock.step;

        let (built, build) = timed(Phase::BuildTree, step, || {
            build_tree(&mut self.context, &self.bodies, &self.pool)
        });
        built?;

        let (interactions, forces) = timed(Phase::ComputeForces, step, || {
            compute_forces(&self.context, &self.gravity, &mut self.bodies, &self.pool)
        });

        let ((), integrate_time) = timed(Phase::Integrate, step, || {
            integrate(&self.leapfrog, &mut self.bodies, &self.pool)
        });

        self.leapfrog.finish_step();
        self.clock.tick();
        self.interactions += interactions;

        let stats = StepStats {
            step,
            time: self.clock.time(),
            interactions,
            nodes: self.context.tree.len(),
            build,
            forces,
            integrate: integrate_time,
        };
        debug!(
            "step {} t={:.4} interactions={} nodes={} build={:?} forces={:?} integrate={:?}",
            stats.step,
            stats.time,
            stats.interactions,
            stats.nodes,
            stats.build,
            stats.forces,
            stats.integrate
        );
        Ok(stats)
    }

    /// Steps until the clock reports a stop condition.
    pub fn run(&mut self) -> Result<RunSummary> {
        info!(
            "simulating {} bodies on {} worker(s): dt={} t_stop={} max_steps={} theta={}",
            self.bodies.len(),
            self.workers(),
            self.clock.dt,
            self.clock.t_stop,
            self.clock.max_steps,
            self.gravity.theta
        );

        let start = Instant::now();
        let mut summary = RunSummary::default();
        while !self.clock.finished() {
            let stats = self.step()?;
            summary.steps += 1;
            summary.interactions += stats.interactions;
        }
        summary.time = self.clock.time();
        summary.elapsed = start.elapsed();

        info!(
            "finished {} steps at t={:.4} in {:?} ({} interactions)",
            summary.steps, summary.time, summary.elapsed, summary.interactions
        );
        Ok(summary)
    }

    /// Brings velocities level with positions: evaluates forces at the
    /// current positions and applies the closing half kick. Does nothing
    /// if the velocities are already synchronized.
    pub fn synchronize(&mut self) -> Result<()> {
        if !self.leapfrog.is_staggered() {
            return Ok(());
        }

        build_tree(&mut self.context, &self.bodies, &self.pool)?;
        self.interactions +=
            compute_forces(&self.context, &self.gravity, &mut self.bodies, &self.pool);

        let leapfrog = self.leapfrog;
        self.pool.for_each_slice(&mut self.bodies, |_, slice| {
            slice.iter_mut().for_each(|body| leapfrog.close(body));
            0
        });
        self.leapfrog.synchronize();
        Ok(())
    }
}
