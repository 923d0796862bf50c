use anyhow::{Context, Result};
use barnes_hut::{SimConfig, Simulation, plummer};
use clap::Parser;
use std::{
    io::{self, BufWriter, Write},
    path::PathBuf,
};

/// Barnes-Hut N-body simulation of a Plummer sphere.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Number of bodies [default: 100000]
    nbody: Option<usize>,
    /// Number of worker threads [default: 1]
    nproc: Option<usize>,
    /// Print the final state of every body instead of the timing report
    #[arg(long)]
    emit: bool,
    /// YAML file with run parameters; command-line values take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Opening angle
    #[arg(long)]
    theta: Option<f64>,
    /// Time step
    #[arg(long)]
    dt: Option<f64>,
    /// Maximum number of steps
    #[arg(long)]
    steps: Option<u64>,
    /// Simulated time at which to stop
    #[arg(long)]
    t_stop: Option<f64>,
    /// Softening added to squared distances
    #[arg(long)]
    eps2: Option<f64>,
}

impl Args {
    fn into_config(self) -> Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_yaml_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => SimConfig::default(),
        };

        if let Some(nbody) = self.nbody {
            config.nbody = nbody;
        }
        if let Some(workers) = self.nproc {
            config.workers = workers;
        }
        config.emit_bodies |= self.emit;
        if let Some(theta) = self.theta {
            config.theta = theta;
        }
        if let Some(dt) = self.dt {
            config.dt = dt;
        }
        if let Some(steps) = self.steps {
            config.max_steps = steps;
        }
        if let Some(t_stop) = self.t_stop {
            config.t_stop = t_stop;
        }
        if let Some(eps2) = self.eps2 {
            config.eps2 = eps2;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let config = Args::parse().into_config()?;
    log::debug!("{config:?}");

    let bodies = plummer::generate(config.nbody);
    let mut sim = Simulation::new(bodies, &config)?;
    let summary = sim.run()?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    if config.emit_bodies {
        sim.synchronize()?;
        for body in sim.bodies() {
            writeln!(
                out,
                "{} {:.10e} {:.10e} {:.10e} {:.10e} {:.10e} {:.10e} {:.10e}",
                body.index,
                body.mass,
                body.pos.x,
                body.pos.y,
                body.pos.z,
                body.vel.x,
                body.vel.y,
                body.vel.z
            )?;
        }
    } else {
        writeln!(out, "Total force interactions: {}", summary.interactions)?;
        writeln!(out, "Elapsed time: {:.6} s", summary.elapsed.as_secs_f64())?;
    }
    out.flush()?;
    Ok(())
}
