//! Conserved quantities of a body store, used to check a run.
//!
//! Velocities are taken as stored; call
//! [`Simulation::synchronize`](crate::Simulation::synchronize) first when
//! energies should refer to a single instant.

use crate::{body::Body, gravity::Gravity};
use ultraviolet::DVec3;

pub fn total_mass(bodies: &[Body]) -> f64 {
    bodies.iter().map(|b| b.mass).sum()
}

pub fn center_of_mass(bodies: &[Body]) -> DVec3 {
    let mass = total_mass(bodies);
    if mass == 0.0 {
        return DVec3::zero();
    }
    bodies
        .iter()
        .fold(DVec3::zero(), |acc, b| acc + b.pos * b.mass)
        / mass
}

pub fn total_momentum(bodies: &[Body]) -> DVec3 {
    bodies
        .iter()
        .fold(DVec3::zero(), |acc, b| acc + b.momentum())
}

pub fn kinetic_energy(bodies: &[Body]) -> f64 {
    bodies
        .iter()
        .map(|b| 0.5 * b.mass * b.vel.mag_sq())
        .sum()
}

/// Exact pairwise potential energy, O(n^2).
pub fn potential_energy(bodies: &[Body], gravity: &Gravity) -> f64 {
    let mut energy = 0.0;
    for (i, a) in bodies.iter().enumerate() {
        for b in &bodies[i + 1..] {
            energy += gravity.pair_potential(a, b);
        }
    }
    energy
}

pub fn total_energy(bodies: &[Body], gravity: &Gravity) -> f64 {
    kinetic_energy(bodies) + potential_energy(bodies, gravity)
}
