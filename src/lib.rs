pub mod body;
pub mod bounds;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod gravity;
pub mod integrator;
pub mod octree;
pub mod plummer;
pub mod pool;
pub mod simulation;

pub use body::Body;
pub use bounds::{BoundingBox, Cell};
pub use config::SimConfig;
pub use error::{Result, SimError};
pub use gravity::Gravity;
pub use integrator::Leapfrog;
pub use octree::{Node, NodeKind, Octree, PointMass};
pub use pool::WorkerPool;
pub use simulation::{Clock, Phase, RunSummary, Simulation, StepContext, StepStats};
