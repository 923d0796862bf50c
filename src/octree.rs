use crate::{
    body::Body,
    bounds::{BoundingBox, Cell},
    error::{Result, SimError},
    pool::WorkerPool,
};
use rayon::prelude::*;
use ultraviolet::DVec3;

/// Sentinel for an absent child or body.
pub const EMPTY: u32 = u32::MAX;

/// `next` value that ends a traversal. The root never follows another node.
pub const END: u32 = 0;

/// Subdivision depth at which halving a cell no longer separates positions
/// in f64. Bodies still coincident at this depth share one leaf.
pub const MAX_DEPTH: u32 = f64::MANTISSA_DIGITS - 3;

/// Position and mass of a body, frozen for the duration of one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointMass {
    pub pos: DVec3,
    pub mass: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeKind {
    /// Head of the leaf's body bucket. `EMPTY` only for the root of an empty tree.
    Leaf { body: u32 },
    /// Child slots by octant (`EMPTY` for empty octants) and the first occupied one.
    Internal { children: [u32; 8], first: u32 },
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// Spatial bounds of the node.
    pub cell: Cell,
    /// Center of mass of the node.
    pub com: DVec3,
    /// Total mass of the node.
    pub mass: f64,
    /// Where a depth-first traversal continues once this subtree is done.
    pub next: u32,
}

impl Node {
    fn empty(cell: Cell) -> Self {
        Self {
            kind: NodeKind::Leaf { body: EMPTY },
            cell,
            com: DVec3::zero(),
            mass: 0.0,
            next: END,
        }
    }

    fn leaf(cell: Cell, body: u32, point: PointMass) -> Self {
        Self {
            kind: NodeKind::Leaf { body },
            cell,
            com: point.pos,
            mass: point.mass,
            next: END,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { body: EMPTY })
    }

    /// Indices of the occupied child slots, in octant order.
    pub fn children(&self) -> impl Iterator<Item = u32> + '_ {
        let slots: &[u32] = match &self.kind {
            NodeKind::Internal { children, .. } => children,
            NodeKind::Leaf { .. } => &[],
        };
        slots.iter().copied().filter(|&c| c != EMPTY)
    }
}

/// Node storage for one tree, or for one octant subtree during a parallel build.
#[derive(Debug, Default)]
struct Arena {
    nodes: Vec<Node>,
    /// Internal nodes in the order they were split, so parents precede children.
    parents: Vec<u32>,
    /// (body, next body in the same leaf) pairs recorded while bucketing.
    chained: Vec<(u32, u32)>,
    root_depth: u32,
}

impl Arena {
    fn reset(&mut self, cell: Cell, depth: u32) {
        self.nodes.clear();
        self.parents.clear();
        self.chained.clear();
        self.root_depth = depth;
        self.nodes.push(Node::empty(cell));
    }

    fn push(&mut self, node: Node) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    /// Inserts body `body` (an index into `points`) below the arena root.
    fn insert(&mut self, points: &[PointMass], body: u32) {
        let point = points[body as usize];
        let mut node = 0;
        let mut depth = self.root_depth;

        loop {
            match self.nodes[node].kind {
                NodeKind::Internal { children, .. } => {
                    let octant = self.nodes[node].cell.find_octant(point.pos);
                    let child = children[octant];
                    if child != EMPTY {
                        node = child as usize;
                        depth += 1;
                        continue;
                    }

                    let cell = self.nodes[node].cell.into_octant(octant);
                    let index = self.push(Node::leaf(cell, body, point));
                    if let NodeKind::Internal { children, .. } = &mut self.nodes[node].kind {
                        children[octant] = index;
                    }
                    return;
                }
                NodeKind::Leaf { body: EMPTY } => {
                    self.nodes[node] = Node::leaf(self.nodes[node].cell, body, point);
                    return;
                }
                NodeKind::Leaf { body: resident } if depth >= MAX_DEPTH => {
                    self.chained.push((body, resident));
                    let n = &mut self.nodes[node];
                    let mass = n.mass + point.mass;
                    n.com = (n.com * n.mass + point.pos * point.mass) / mass;
                    n.mass = mass;
                    n.kind = NodeKind::Leaf { body };
                    return;
                }
                NodeKind::Leaf { body: resident } => {
                    // Push the resident one level down, then retry from this node.
                    self.parents.push(node as u32);
                    let resident_point = points[resident as usize];
                    let octant = self.nodes[node].cell.find_octant(resident_point.pos);
                    let cell = self.nodes[node].cell.into_octant(octant);
                    let index = self.push(Node::leaf(cell, resident, resident_point));

                    let mut children = [EMPTY; 8];
                    children[octant] = index;
                    self.nodes[node].kind = NodeKind::Internal {
                        children,
                        first: EMPTY,
                    };
                }
            }
        }
    }

    /// Calculates center of mass and total mass for all internal nodes (bottom-up).
    fn propagate(&mut self) {
        // Iterate parents in reverse split order (deepest first)
        for &node in self.parents.iter().rev() {
            aggregate(&mut self.nodes, node as usize);
        }
    }

    /// Replaces the arena contents with a root over `cell` whose children
    /// are the given, already aggregated, octant subtrees.
    fn stitch(&mut self, cell: Cell, subtrees: Vec<Option<Arena>>) {
        self.reset(cell, 0);
        self.parents.push(0);

        let mut children = [EMPTY; 8];
        for (octant, subtree) in subtrees.into_iter().enumerate() {
            let Some(subtree) = subtree else { continue };
            let offset = self.nodes.len() as u32;
            children[octant] = offset;

            self.nodes.extend(subtree.nodes.into_iter().map(|mut node| {
                if let NodeKind::Internal { children, .. } = &mut node.kind {
                    for child in children.iter_mut().filter(|c| **c != EMPTY) {
                        *child += offset;
                    }
                }
                node
            }));
            self.parents
                .extend(subtree.parents.iter().map(|&p| p + offset));
            self.chained.extend(subtree.chained);
        }

        self.nodes[0].kind = NodeKind::Internal {
            children,
            first: EMPTY,
        };
        aggregate(&mut self.nodes, 0);
    }
}

fn aggregate(nodes: &mut [Node], node: usize) {
    let NodeKind::Internal { children, .. } = nodes[node].kind else {
        return;
    };

    let mut mass = 0.0;
    let mut weighted = DVec3::zero();
    for child in children.into_iter().filter(|&c| c != EMPTY) {
        let child = &nodes[child as usize];
        mass += child.mass;
        weighted += child.com * child.mass;
    }

    let n = &mut nodes[node];
    n.mass = mass;
    n.com = if mass > 0.0 { weighted / mass } else { n.cell.center };
}

/// Sets `first` on every internal node and `next` on every node so the tree
/// can be walked depth-first without a stack.
fn link(nodes: &mut [Node], parents: &[u32]) {
    if let Some(root) = nodes.first_mut() {
        root.next = END;
    }

    // Parents precede their children, so `next` of a parent is final before
    // its children read it.
    for &parent in parents {
        let parent = parent as usize;
        let NodeKind::Internal { children, .. } = nodes[parent].kind else {
            continue;
        };
        let after = nodes[parent].next;

        let mut occupied = children.into_iter().filter(|&c| c != EMPTY).peekable();
        let head = occupied.peek().copied().unwrap_or(EMPTY);
        while let Some(child) = occupied.next() {
            nodes[child as usize].next = occupied.peek().copied().unwrap_or(after);
        }

        if let NodeKind::Internal { first, .. } = &mut nodes[parent].kind {
            *first = head;
        }
    }
}

/// The Barnes-Hut octree, rebuilt from scratch every step.
///
/// Nodes live in a flat arena and refer to each other by index. The tree
/// also keeps a snapshot of every body's position and mass taken at build
/// time, so force evaluation never reads the body store that it writes to.
#[derive(Debug, Default)]
pub struct Octree {
    arena: Arena,
    points: Vec<PointMass>,
    /// Next body in the same leaf bucket, by body index.
    links: Vec<u32>,
}

impl Octree {
    pub const ROOT: usize = 0;

    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the tree over `bodies` on the calling thread.
    ///
    /// Every body must lie inside `bounds`.
    pub fn build(&mut self, bodies: &[Body], bounds: &BoundingBox) -> Result<()> {
        self.snapshot(bodies, bounds)?;

        self.arena.reset(bounds.cell(), 0);
        for body in 0..self.points.len() as u32 {
            self.arena.insert(&self.points, body);
        }
        self.arena.propagate();

        self.finish();
        Ok(())
    }

    /// Builds the tree with the pool's workers: bodies are grouped by root
    /// octant and each octant subtree is built and aggregated independently
    /// before being stitched under the root.
    pub fn build_in(
        &mut self,
        pool: &WorkerPool,
        bodies: &[Body],
        bounds: &BoundingBox,
    ) -> Result<()> {
        if !pool.is_parallel() || bodies.is_empty() {
            return self.build(bodies, bounds);
        }
        self.snapshot(bodies, bounds)?;

        let root = bounds.cell();
        let mut groups: [Vec<u32>; 8] = Default::default();
        for (index, point) in self.points.iter().enumerate() {
            groups[root.find_octant(point.pos)].push(index as u32);
        }

        let points = &self.points;
        let subtrees: Vec<Option<Arena>> = pool.install(|| {
            groups
                .par_iter()
                .enumerate()
                .map(|(octant, group)| {
                    if group.is_empty() {
                        return None;
                    }
                    let mut arena = Arena::default();
                    arena.reset(root.into_octant(octant), 1);
                    for &body in group {
                        arena.insert(points, body);
                    }
                    arena.propagate();
                    Some(arena)
                })
                .collect()
        });

        self.arena.stitch(root, subtrees);
        self.finish();
        Ok(())
    }

    fn snapshot(&mut self, bodies: &[Body], bounds: &BoundingBox) -> Result<()> {
        self.points.clear();
        self.links.clear();

        for (index, body) in bodies.iter().enumerate() {
            let pos = body.pos;
            if !(pos.x.is_finite() && pos.y.is_finite() && pos.z.is_finite()) {
                return Err(SimError::NonFinite { index });
            }
            if !bounds.contains(pos) {
                return Err(SimError::OutOfBounds {
                    index,
                    position: [pos.x, pos.y, pos.z],
                });
            }
            self.points.push(PointMass {
                pos,
                mass: body.mass,
            });
        }

        self.links.resize(self.points.len(), EMPTY);
        Ok(())
    }

    fn finish(&mut self) {
        for &(body, next) in &self.arena.chained {
            self.links[body as usize] = next;
        }
        link(&mut self.arena.nodes, &self.arena.parents);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.arena.nodes
    }

    pub fn node(&self, index: u32) -> &Node {
        &self.arena.nodes[index as usize]
    }

    pub fn root(&self) -> Option<&Node> {
        self.arena.nodes.first()
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.arena.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root().is_none_or(Node::is_empty)
    }

    /// The body snapshot the tree was built from.
    pub fn points(&self) -> &[PointMass] {
        &self.points
    }

    pub fn point(&self, body: u32) -> PointMass {
        self.points[body as usize]
    }

    /// Bodies held by a leaf (nothing for an internal node).
    pub fn leaf_bodies(&self, node: &Node) -> LeafBodies<'_> {
        let head = match node.kind {
            NodeKind::Leaf { body } => body,
            NodeKind::Internal { .. } => EMPTY,
        };
        LeafBodies {
            links: &self.links,
            current: head,
        }
    }

    /// Total mass of the tree.
    pub fn mass(&self) -> f64 {
        self.root().map_or(0.0, |n| n.mass)
    }

    pub fn center_of_mass(&self) -> DVec3 {
        self.root().map_or(DVec3::zero(), |n| n.com)
    }
}

pub struct LeafBodies<'a> {
    links: &'a [u32],
    current: u32,
}

impl Iterator for LeafBodies<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.current == EMPTY {
            return None;
        }
        let body = self.current;
        self.current = self.links[body as usize];
        Some(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn random_bodies(n: usize, seed: u64) -> Vec<Body> {
        let mut rng = fastrand::Rng::with_seed(seed);
        (0..n)
            .map(|i| {
                let pos = DVec3::new(rng.f64(), rng.f64(), rng.f64()) * 2.0 - DVec3::one();
                Body::new(i, 0.5 + rng.f64(), pos, DVec3::zero())
            })
            .collect()
    }

    /// Returns the bodies under `node`, checking the aggregate of every
    /// internal node on the way back up.
    fn check_subtree(tree: &Octree, node: u32, seen: &mut [u32]) -> Vec<u32> {
        let n = tree.node(node);
        let bodies: Vec<u32> = if n.is_leaf() {
            tree.leaf_bodies(n).collect()
        } else {
            n.children()
                .flat_map(|child| check_subtree(tree, child, seen))
                .collect()
        };

        if n.is_leaf() {
            for &b in &bodies {
                seen[b as usize] += 1;
                assert!(n.cell.contains(tree.point(b).pos));
            }
        }

        let mass: f64 = bodies.iter().map(|&b| tree.point(b).mass).sum();
        let com = bodies
            .iter()
            .map(|&b| tree.point(b).pos * tree.point(b).mass)
            .fold(DVec3::zero(), |acc, p| acc + p)
            / mass;
        assert_relative_eq!(n.mass, mass, max_relative = 1e-12);
        assert_relative_eq!(n.com.x, com.x, epsilon = 1e-12);
        assert_relative_eq!(n.com.y, com.y, epsilon = 1e-12);
        assert_relative_eq!(n.com.z, com.z, epsilon = 1e-12);
        bodies
    }

    fn check_invariants(tree: &Octree, n: usize) {
        let mut seen = vec![0u32; n];
        let bodies = check_subtree(tree, Octree::ROOT as u32, &mut seen);
        assert_eq!(bodies.len(), n);
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn aggregates_match_descendants() {
        let bodies = random_bodies(500, 7);
        let bounds = BoundingBox::containing(&bodies).unwrap();
        let mut tree = Octree::new();
        tree.build(&bodies, &bounds).unwrap();

        check_invariants(&tree, bodies.len());
        assert_relative_eq!(
            tree.mass(),
            bodies.iter().map(|b| b.mass).sum::<f64>(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn parallel_build_matches_sequential() {
        let bodies = random_bodies(2000, 11);
        let bounds = BoundingBox::containing(&bodies).unwrap();
        let pool = WorkerPool::new(4).unwrap();

        let mut sequential = Octree::new();
        sequential.build(&bodies, &bounds).unwrap();
        let mut parallel = Octree::new();
        parallel.build_in(&pool, &bodies, &bounds).unwrap();

        check_invariants(&parallel, bodies.len());
        assert_eq!(sequential.len(), parallel.len());
        assert_relative_eq!(sequential.mass(), parallel.mass(), max_relative = 1e-12);
        assert_relative_eq!(
            (sequential.center_of_mass() - parallel.center_of_mass()).mag(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn traversal_links_visit_every_node_once() {
        let bodies = random_bodies(300, 3);
        let bounds = BoundingBox::containing(&bodies).unwrap();
        let mut tree = Octree::new();
        tree.build(&bodies, &bounds).unwrap();

        let mut visited = vec![false; tree.len()];
        let mut node = Octree::ROOT as u32;
        loop {
            assert!(!visited[node as usize]);
            visited[node as usize] = true;
            let n = tree.node(node);
            node = match n.kind {
                NodeKind::Internal { first, .. } => first,
                NodeKind::Leaf { .. } if n.next == END => break,
                NodeKind::Leaf { .. } => n.next,
            };
        }
        assert!(visited.iter().all(|&v| v));
    }

    #[test]
    fn single_body_is_root_leaf() {
        let bodies = random_bodies(1, 5);
        let bounds = BoundingBox::containing(&bodies).unwrap();
        let mut tree = Octree::new();
        tree.build(&bodies, &bounds).unwrap();

        assert_eq!(tree.len(), 1);
        let root = tree.root().unwrap();
        assert!(root.is_leaf());
        assert_eq!(tree.leaf_bodies(root).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn coincident_bodies_share_a_leaf_at_max_depth() {
        let pos = DVec3::new(0.25, -0.5, 0.125);
        let bodies = vec![
            Body::new(0, 1.0, pos, DVec3::zero()),
            Body::new(1, 3.0, pos, DVec3::zero()),
            Body::new(2, 1.0, DVec3::new(-0.9, 0.9, 0.9), DVec3::zero()),
        ];
        let bounds = BoundingBox::new(DVec3::broadcast(-1.0), 2.0);
        let mut tree = Octree::new();
        tree.build(&bodies, &bounds).unwrap();

        check_invariants(&tree, bodies.len());
        let shared = tree
            .nodes()
            .iter()
            .find(|n| tree.leaf_bodies(n).count() == 2)
            .unwrap();
        assert_relative_eq!(shared.mass, 4.0);
        assert_eq!(shared.com, pos);
        assert!(tree.len() <= MAX_DEPTH as usize + 2);
    }

    #[test]
    fn body_outside_bounds_is_rejected() {
        let bodies = vec![
            Body::new(0, 1.0, DVec3::zero(), DVec3::zero()),
            Body::new(1, 1.0, DVec3::new(3.0, 0.0, 0.0), DVec3::zero()),
        ];
        let bounds = BoundingBox::new(DVec3::broadcast(-1.0), 2.0);
        let mut tree = Octree::new();

        assert!(matches!(
            tree.build(&bodies, &bounds),
            Err(SimError::OutOfBounds { index: 1, .. })
        ));
    }

    #[test]
    fn rebuild_reuses_the_tree() {
        let mut bodies = random_bodies(100, 9);
        let bounds = BoundingBox::new(DVec3::broadcast(-4.0), 8.0);
        let mut tree = Octree::new();
        tree.build(&bodies, &bounds).unwrap();

        for body in &mut bodies {
            body.pos *= 1.5;
        }
        tree.build(&bodies, &bounds).unwrap();
        check_invariants(&tree, bodies.len());
        assert_eq!(tree.point(7).pos, bodies[7].pos);
    }
}
