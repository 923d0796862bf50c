use crate::{
    body::Body,
    octree::{END, NodeKind, Octree},
};
use ultraviolet::DVec3;

/// Softened Newtonian gravity and the Barnes-Hut opening angle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gravity {
    /// Gravitational constant.
    pub g: f64,
    /// Softening added to the squared distance of every interaction.
    pub eps2: f64,
    /// Opening angle: a cell of side `s` at distance `d` is approximated
    /// by its aggregate when `s / d < theta`.
    pub theta: f64,
}

impl Default for Gravity {
    fn default() -> Self {
        Self::new(Self::DEFAULT_G, Self::DEFAULT_EPS2, Self::DEFAULT_THETA)
    }
}

impl Gravity {
    pub const DEFAULT_G: f64 = 1.0;
    pub const DEFAULT_EPS2: f64 = 1e-4;
    pub const DEFAULT_THETA: f64 = 0.5;

    pub fn new(g: f64, eps2: f64, theta: f64) -> Self {
        Self { g, eps2, theta }
    }

    /// Acceleration caused by `mass` sitting at offset `d`.
    #[inline(always)]
    fn pull(&self, d: DVec3, mass: f64) -> DVec3 {
        let r_sq = d.mag_sq() + self.eps2;
        if r_sq > 0.0 {
            d * (self.g * mass / (r_sq * r_sq.sqrt()))
        } else {
            DVec3::zero()
        }
    }

    /// Calculates the acceleration of body `body` from the tree.
    /// Returns it together with the number of interactions evaluated.
    ///
    /// The walk follows the `next` links so it needs neither recursion nor
    /// a stack. A cell that contains the body is always opened, so the body
    /// never interacts with an aggregate that includes itself.
    pub fn acceleration(&self, tree: &Octree, body: u32) -> (DVec3, u64) {
        let mut acc = DVec3::zero();
        let mut interactions = 0;
        if tree.is_empty() {
            return (acc, interactions);
        }

        let pos = tree.point(body).pos;
        let t_sq = self.theta * self.theta;
        let mut node = Octree::ROOT as u32;

        loop {
            let n = tree.node(node);
            match n.kind {
                NodeKind::Leaf { .. } => {
                    for other in tree.leaf_bodies(n).filter(|&b| b != body) {
                        let p = tree.point(other);
                        acc += self.pull(p.pos - pos, p.mass);
                        interactions += 1;
                    }
                }
                NodeKind::Internal { first, .. } => {
                    let d = n.com - pos;
                    // s/d < theta, written as s^2 < d^2 * theta^2
                    if n.cell.size * n.cell.size < d.mag_sq() * t_sq && !n.cell.contains(pos) {
                        acc += self.pull(d, n.mass);
                        interactions += 1;
                    } else {
                        node = first;
                        continue;
                    }
                }
            }

            if n.next == END {
                break;
            }
            node = n.next;
        }

        (acc, interactions)
    }

    /// Exact O(n) sum over every other body.
    pub fn direct_acceleration(&self, bodies: &[Body], index: usize) -> DVec3 {
        let pos = bodies[index].pos;
        bodies
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != index)
            .fold(DVec3::zero(), |acc, (_, b)| acc + self.pull(b.pos - pos, b.mass))
    }

    /// Exact accelerations of every body, O(n^2).
    pub fn direct_accelerations(&self, bodies: &[Body]) -> Vec<DVec3> {
        (0..bodies.len())
            .map(|i| self.direct_acceleration(bodies, i))
            .collect()
    }

    /// Softened potential energy of one pair, consistent with the force law.
    pub fn pair_potential(&self, a: &Body, b: &Body) -> f64 {
        let r_sq = (a.pos - b.pos).mag_sq() + self.eps2;
        if r_sq > 0.0 {
            -self.g * a.mass * b.mass / r_sq.sqrt()
        } else {
            0.0
        }
    }
}
