//! Kick-drift-kick leapfrog with one force evaluation per step.
//!
//! Between steps the stored velocities are half-step velocities
//! `v(t + dt/2)`. Each step's accelerations first close the previous step
//! with a half kick and then open the next one with another, so the two
//! are applied as a single full kick. The very first step (and the first
//! step after [`Leapfrog::synchronize`]) starts from synchronized
//! velocities and only opens with a half kick.

use crate::body::Body;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Leapfrog {
    dt: f64,
    /// True once velocities are staggered half a step behind positions.
    staggered: bool,
}

impl Leapfrog {
    pub fn new(dt: f64) -> Self {
        Self {
            dt,
            staggered: false,
        }
    }

    pub fn is_staggered(&self) -> bool {
        self.staggered
    }

    /// Velocity increment per unit acceleration for the current step.
    pub fn kick_dt(&self) -> f64 {
        if self.staggered { self.dt } else { 0.5 * self.dt }
    }

    /// Advances one body using the acceleration computed this step.
    #[inline]
    pub fn advance(&self, body: &mut Body) {
        body.kick(self.kick_dt());
        body.drift(self.dt);
    }

    /// Marks the end of a step: velocities are now half a step behind.
    pub fn finish_step(&mut self) {
        self.staggered = true;
    }

    /// Closing half kick that brings a body's velocity level with its
    /// position, using accelerations evaluated at the current positions.
    #[inline]
    pub fn close(&self, body: &mut Body) {
        if self.staggered {
            body.kick(0.5 * self.dt);
        }
    }

    /// Marks velocities as synchronized again after [`Leapfrog::close`].
    pub fn synchronize(&mut self) {
        self.staggered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ultraviolet::DVec3;

    #[test]
    fn first_step_opens_with_half_kick() {
        let mut leapfrog = Leapfrog::new(0.1);
        let mut body = Body::new(0, 1.0, DVec3::zero(), DVec3::zero());
        body.acc = DVec3::new(1.0, 0.0, 0.0);

        leapfrog.advance(&mut body);
        assert_relative_eq!(body.vel.x, 0.05);
        assert_relative_eq!(body.pos.x, 0.005);

        leapfrog.finish_step();
        leapfrog.advance(&mut body);
        assert_relative_eq!(body.vel.x, 0.15);
        assert_relative_eq!(body.pos.x, 0.02);
    }

    #[test]
    fn constant_acceleration_is_integrated_exactly() {
        // x(t) = a t^2 / 2 and v(t) = a t at whole steps
        let dt = 0.01;
        let mut leapfrog = Leapfrog::new(dt);
        let mut body = Body::new(0, 1.0, DVec3::zero(), DVec3::zero());
        body.acc = DVec3::new(0.0, -9.81, 0.0);

        for _ in 0..100 {
            leapfrog.advance(&mut body);
            leapfrog.finish_step();
        }
        leapfrog.close(&mut body);
        leapfrog.synchronize();

        assert_relative_eq!(body.pos.y, -9.81 * 0.5, max_relative = 1e-10);
        assert_relative_eq!(body.vel.y, -9.81, max_relative = 1e-10);
        assert!(!leapfrog.is_staggered());
    }

    #[test]
    fn close_is_a_no_op_when_synchronized() {
        let leapfrog = Leapfrog::new(0.5);
        let mut body = Body::new(0, 1.0, DVec3::zero(), DVec3::new(1.0, 2.0, 3.0));
        body.acc = DVec3::broadcast(4.0);

        leapfrog.close(&mut body);
        assert_eq!(body.vel, DVec3::new(1.0, 2.0, 3.0));
    }
}
