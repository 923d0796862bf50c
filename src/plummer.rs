use crate::body::Body;
use std::f64::consts::PI;
use ultraviolet::DVec3;

/// Bodies are drawn in this many groups, each from its own seeded generator.
pub const GROUPS: usize = 32;

/// Cap on the enclosed-mass fraction when sampling radii; keeps the
/// profile's unbounded tail out of the sample.
const MFRAC: f64 = 0.999;

/// Generates `n` bodies sampled from a Plummer sphere in standard units
/// (G = M = 1, E = -1/4).
/// - Every body has mass `1/n`, so the total mass is 1.
/// - Bodies come in [`GROUPS`] contiguous groups; group `k` uses seed `123 * (k + 1)`.
/// - Radii follow the Plummer cumulative mass profile, speeds the Plummer
///   distribution function, directions are isotropic.
/// - The result is shifted so the center of mass and mean velocity are zero.
pub fn generate(n: usize) -> Vec<Body> {
    let mass = 1.0 / n as f64;
    let rsc = 3.0 * PI / 16.0;
    let vsc = (1.0 / rsc).sqrt();

    let mut bodies: Vec<Body> = Vec::with_capacity(n);
    for group in 0..GROUPS {
        let count = n / GROUPS + usize::from(group < n % GROUPS);
        let mut rng = fastrand::Rng::with_seed(123 * (group as u64 + 1));

        for _ in 0..count {
            let r = radius(&mut rng);
            let pos = direction(&mut rng) * (rsc * r);
            let vel = direction(&mut rng) * (vsc * speed(&mut rng, r));
            bodies.push(Body::new(bodies.len(), mass, pos, vel));
        }
    }

    recenter(&mut bodies);
    bodies
}

/// Radius enclosing a uniformly drawn mass fraction.
fn radius(rng: &mut fastrand::Rng) -> f64 {
    let m = rng.f64() * MFRAC;
    1.0 / (m.powf(-2.0 / 3.0) - 1.0).sqrt()
}

/// Speed at radius `r`: q * v_escape with q drawn from q^2 (1 - q^2)^3.5
/// by rejection (the density peaks below 0.1).
fn speed(rng: &mut fastrand::Rng, r: f64) -> f64 {
    let q = loop {
        let x = rng.f64();
        let y = rng.f64() * 0.1;
        if y <= x * x * (1.0 - x * x).powf(3.5) {
            break x;
        }
    };
    2f64.sqrt() * q / (1.0 + r * r).powf(0.25)
}

/// Uniformly distributed unit vector, picked from the unit ball by rejection.
fn direction(rng: &mut fastrand::Rng) -> DVec3 {
    loop {
        let p = DVec3::new(rng.f64(), rng.f64(), rng.f64()) * 2.0 - DVec3::one();
        let r_sq = p.mag_sq();
        if r_sq > 0.0 && r_sq <= 1.0 {
            return p / r_sq.sqrt();
        }
    }
}

fn recenter(bodies: &mut [Body]) {
    let mass: f64 = bodies.iter().map(|b| b.mass).sum();
    if mass == 0.0 {
        return;
    }
    let (cmr, cmv) = bodies.iter().fold((DVec3::zero(), DVec3::zero()), |(r, v), b| {
        (r + b.pos * b.mass, v + b.vel * b.mass)
    });
    let (cmr, cmv) = (cmr / mass, cmv / mass);

    for body in bodies {
        body.pos -= cmr;
        body.vel -= cmv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics;
    use approx::assert_relative_eq;

    #[test]
    fn produces_requested_count_with_unit_mass() {
        for n in [1, 31, 32, 100, 1024] {
            let bodies = generate(n);
            assert_eq!(bodies.len(), n);
            assert_relative_eq!(diagnostics::total_mass(&bodies), 1.0, max_relative = 1e-12);
            assert!(bodies.iter().enumerate().all(|(i, b)| b.index == i));
        }
    }

    #[test]
    fn centered_in_position_and_velocity() {
        let bodies = generate(2048);
        assert_relative_eq!(diagnostics::center_of_mass(&bodies).mag(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(diagnostics::total_momentum(&bodies).mag(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(generate(500), generate(500));
    }

    #[test]
    fn kinetic_energy_is_near_virial_value() {
        let bodies = generate(4096);
        let kinetic = diagnostics::kinetic_energy(&bodies);
        assert!((0.2..0.3).contains(&kinetic), "kinetic energy {kinetic}");
    }

    #[test]
    fn positions_are_finite() {
        let bodies = generate(4096);
        assert!(bodies.iter().all(|b| b.pos.mag().is_finite() && b.vel.mag().is_finite()));
    }
}
