use crate::{
    body::Body,
    error::{Result, SimError},
};
use ultraviolet::DVec3;

/// Relative padding applied to the extent of the bodies so that the
/// outermost body lies strictly inside the box.
const PADDING: f64 = 1.00002;

/// Represents a cubic region of the octree.
/// Used to define the bounds of nodes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cell {
    pub center: DVec3,
    /// Side length.
    pub size: f64,
}

impl Cell {
    pub fn new(center: DVec3, size: f64) -> Self {
        Self { center, size }
    }

    /// Determines which octant a position falls into relative to the cell's center.
    /// Bit 0 is set for +x, bit 1 for +y, bit 2 for +z.
    #[inline]
    pub fn find_octant(&self, pos: DVec3) -> usize {
        ((pos.z > self.center.z) as usize) << 2
            | ((pos.y > self.center.y) as usize) << 1
            | (pos.x > self.center.x) as usize
    }

    /// Transforms the cell into one of its eight sub-cells.
    pub fn into_octant(mut self, octant: usize) -> Self {
        self.size *= 0.5;
        self.center.x += ((octant & 1) as f64 - 0.5) * self.size;
        self.center.y += (((octant >> 1) & 1) as f64 - 0.5) * self.size;
        self.center.z += (((octant >> 2) & 1) as f64 - 0.5) * self.size;
        self
    }

    /// Closed containment test.
    #[inline]
    pub fn contains(&self, pos: DVec3) -> bool {
        let half = self.size * 0.5;
        let d = (pos - self.center).abs();
        d.x <= half && d.y <= half && d.z <= half
    }
}

/// The cubic region covered by the root of every tree build.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Minimum corner.
    pub min: DVec3,
    /// Side length.
    pub size: f64,
}

impl BoundingBox {
    pub fn new(min: DVec3, size: f64) -> Self {
        Self { min, size }
    }

    /// Creates the smallest padded cube around all bodies.
    pub fn containing(bodies: &[Body]) -> Result<Self> {
        if bodies.is_empty() {
            return Err(SimError::EmptySystem);
        }
        check_finite(bodies)?;

        let mut lo = DVec3::broadcast(f64::MAX);
        let mut hi = DVec3::broadcast(f64::MIN);
        for body in bodies {
            lo = lo.min_by_component(body.pos);
            hi = hi.max_by_component(body.pos);
        }

        let extent = (hi - lo).component_max();
        let size = if extent > 0.0 { extent * PADDING } else { 1.0 };
        let center = (lo + hi) * 0.5;

        Ok(Self::new(center - DVec3::broadcast(size * 0.5), size))
    }

    pub fn max(&self) -> DVec3 {
        self.min + DVec3::broadcast(self.size)
    }

    pub fn center(&self) -> DVec3 {
        self.min + DVec3::broadcast(self.size * 0.5)
    }

    /// The root cell of a tree built over this box.
    pub fn cell(&self) -> Cell {
        Cell::new(self.center(), self.size)
    }

    #[inline]
    pub fn contains(&self, pos: DVec3) -> bool {
        let max = self.max();
        pos.x >= self.min.x
            && pos.y >= self.min.y
            && pos.z >= self.min.z
            && pos.x <= max.x
            && pos.y <= max.y
            && pos.z <= max.z
    }

    /// Doubles the box around its center until every body fits.
    /// Returns whether the box grew.
    pub fn expand_to_fit(&mut self, bodies: &[Body]) -> Result<bool> {
        check_finite(bodies)?;

        // The center stays fixed and every pass doubles at least once, so a
        // body left a few ulps outside by rounding of `min` is still taken in.
        let center = self.center();
        let mut grew = false;
        while let Some(body) = bodies.iter().find(|b| !self.contains(b.pos)) {
            let needed = 2.0 * (body.pos - center).abs().component_max();
            loop {
                self.size *= 2.0;
                if self.size > needed {
                    break;
                }
            }
            self.min = center - DVec3::broadcast(self.size * 0.5);
            grew = true;
        }
        Ok(grew)
    }
}

fn check_finite(bodies: &[Body]) -> Result<()> {
    match bodies
        .iter()
        .position(|b| !(b.pos.x.is_finite() && b.pos.y.is_finite() && b.pos.z.is_finite()))
    {
        Some(index) => Err(SimError::NonFinite { index }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn body_at(index: usize, x: f64, y: f64, z: f64) -> Body {
        Body::new(index, 1.0, DVec3::new(x, y, z), DVec3::zero())
    }

    #[test]
    fn octants_cover_the_cell() {
        let cell = Cell::new(DVec3::zero(), 2.0);
        let children: Vec<Cell> = (0..8).map(|i| cell.into_octant(i)).collect();

        for (octant, child) in children.iter().enumerate() {
            assert_relative_eq!(child.size, 1.0);
            assert_eq!(cell.find_octant(child.center), octant);
            assert!(cell.contains(child.center));
        }
        assert_eq!(children[7].center, DVec3::broadcast(0.5));
        assert_eq!(children[0].center, DVec3::broadcast(-0.5));
    }

    #[test]
    fn box_contains_every_body() {
        let bodies = vec![
            body_at(0, -1.0, 0.0, 3.0),
            body_at(1, 2.0, -4.0, 0.5),
            body_at(2, 0.0, 1.0, -1.0),
        ];
        let bounds = BoundingBox::containing(&bodies).unwrap();

        assert!(bodies.iter().all(|b| bounds.contains(b.pos)));
        assert!(bounds.size > 7.0);
        assert_relative_eq!(bounds.cell().size, bounds.size);
    }

    #[test]
    fn single_body_gets_unit_box() {
        let bounds = BoundingBox::containing(&[body_at(0, 3.0, 3.0, 3.0)]).unwrap();
        assert_relative_eq!(bounds.size, 1.0);
        assert_eq!(bounds.center(), DVec3::broadcast(3.0));
    }

    #[test]
    fn empty_store_is_rejected() {
        assert!(matches!(
            BoundingBox::containing(&[]),
            Err(SimError::EmptySystem)
        ));
    }

    #[test]
    fn expand_grows_around_center() {
        let mut bounds = BoundingBox::new(DVec3::broadcast(-1.0), 2.0);
        let bodies = vec![body_at(0, 0.0, 0.0, 0.0), body_at(1, 0.0, 5.0, 0.0)];

        assert!(bounds.expand_to_fit(&bodies).unwrap());
        assert!(bodies.iter().all(|b| bounds.contains(b.pos)));
        assert_eq!(bounds.center(), DVec3::zero());
        assert_relative_eq!(bounds.size, 16.0);

        assert!(!bounds.expand_to_fit(&bodies).unwrap());
    }

    #[test]
    fn expand_terminates_for_body_just_past_rounded_edge() {
        let mut bounds = BoundingBox::new(DVec3::broadcast(-8.391479076516337), 0.49288195172440813);
        let bodies = vec![body_at(0, -6.173510293756501, -6.173510293756501, -6.173510293756501)];

        assert!(bounds.expand_to_fit(&bodies).unwrap());
        assert!(bounds.contains(bodies[0].pos));
        assert!(!bounds.expand_to_fit(&bodies).unwrap());
    }

    #[test]
    fn expand_keeps_the_original_center() {
        let mut bounds = BoundingBox::new(DVec3::new(0.1, -0.3, 0.7), 0.3);
        let center = bounds.center();
        let mut rng = fastrand::Rng::with_seed(11);
        let bodies: Vec<Body> = (0..200)
            .map(|i| body_at(i, rng.f64() * 50.0 - 25.0, rng.f64() * 3.0, -rng.f64() * 7.0))
            .collect();

        bounds.expand_to_fit(&bodies).unwrap();
        assert!(bodies.iter().all(|b| bounds.contains(b.pos)));
        assert_relative_eq!((bounds.center() - center).mag(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn non_finite_positions_are_fatal() {
        let mut bounds = BoundingBox::new(DVec3::broadcast(-1.0), 2.0);
        let bodies = vec![body_at(0, 0.0, 0.0, 0.0), body_at(1, f64::NAN, 0.0, 0.0)];

        assert!(matches!(
            bounds.expand_to_fit(&bodies),
            Err(SimError::NonFinite { index: 1 })
        ));
    }
}
