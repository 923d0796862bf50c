use ultraviolet::DVec3;

/// A point mass in the body store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Body {
    /// Stable identity, assigned once when the store is created.
    pub index: usize,
    /// Mass of the body. Positive and fixed for the whole run.
    pub mass: f64,
    /// Position vector.
    pub pos: DVec3,
    /// Velocity vector. Between steps this is the half-step velocity.
    pub vel: DVec3,
    /// Acceleration vector (overwritten each step).
    pub acc: DVec3,
}

impl Default for Body {
    fn default() -> Self {
        Self::new(0, 1.0, DVec3::zero(), DVec3::zero())
    }
}

impl Body {
    /// Creates a new Body with the given properties.
    /// Initial acceleration is zero.
    pub fn new(index: usize, mass: f64, pos: DVec3, vel: DVec3) -> Self {
        Self {
            index,
            mass,
            pos,
            vel,
            acc: DVec3::zero(),
        }
    }

    /// Applies the current acceleration to the velocity over `dt`.
    #[inline]
    pub fn kick(&mut self, dt: f64) {
        self.vel += self.acc * dt;
    }

    /// Moves the body along its current velocity over `dt`.
    #[inline]
    pub fn drift(&mut self, dt: f64) {
        self.pos += self.vel * dt;
    }

    pub fn momentum(&self) -> DVec3 {
        self.vel * self.mass
    }
}
