//! Octree spatial index for broad-phase collision detection
//!
//! Rebuilt from scratch every tick: cleared, refilled with the tick's
//! bounding volumes, then queried. Nothing persists between ticks.
//! The same index backs the main tick and both background workers.

use serde::{Deserialize, Serialize};

use crate::game::constants::octree::{MAX_DEPTH, MAX_OBJECTS_PER_NODE};
use crate::util::vec3::Vec3;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Build from two opposite corners (normalised so `min <= max`)
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    #[inline]
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        let half = half_extents.abs();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Open-interval overlap on all three axes.
    ///
    /// Boxes that only share a face do not intersect.
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    /// True when `other` lies entirely inside (or on the faces of) this box
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        other.min.x >= self.min.x
            && other.max.x <= self.max.x
            && other.min.y >= self.min.y
            && other.max.y <= self.max.y
            && other.min.z >= self.min.z
            && other.max.z <= self.max.z
    }

    #[inline]
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Clamp a point into the box
    pub fn clamp_point(&self, p: Vec3) -> Vec3 {
        p.max(self.min).min(self.max)
    }

    /// Shrink every face inward by `margin` (never past the center)
    pub fn shrink(&self, margin: f32) -> Aabb {
        let half = self.half_extents();
        let m = Vec3::new(margin.min(half.x), margin.min(half.y), margin.min(half.z));
        Aabb {
            min: self.min + m,
            max: self.max - m,
        }
    }

    /// Octant (0..8) of the box with the given center
    fn octant(&self, index: usize) -> Aabb {
        let c = self.center();
        let (min_x, max_x) = if index & 1 != 0 { (c.x, self.max.x) } else { (self.min.x, c.x) };
        let (min_y, max_y) = if index & 2 != 0 { (c.y, self.max.y) } else { (self.min.y, c.y) };
        let (min_z, max_z) = if index & 4 != 0 { (c.z, self.max.z) } else { (self.min.z, c.z) };
        Aabb {
            min: Vec3::new(min_x, min_y, min_z),
            max: Vec3::new(max_x, max_y, max_z),
        }
    }
}

/// Which half of a node a box falls into along one axis
#[inline]
fn axis_side(min: f32, max: f32, center: f32) -> Option<usize> {
    if min >= center {
        Some(1)
    } else if max <= center {
        Some(0)
    } else {
        None
    }
}

/// Index of the single child octant that fully contains `bounds`,
/// or `None` if the box straddles a center plane on any axis.
///
/// Bit 0 = right (+x), bit 1 = top (+y), bit 2 = front (+z).
#[inline]
fn child_index(node_center: Vec3, bounds: &Aabb) -> Option<usize> {
    let x = axis_side(bounds.min.x, bounds.max.x, node_center.x)?;
    let y = axis_side(bounds.min.y, bounds.max.y, node_center.y)?;
    let z = axis_side(bounds.min.z, bounds.max.z, node_center.z)?;
    Some(x | (y << 1) | (z << 2))
}

#[derive(Debug, Clone)]
struct OctreeNode<T> {
    bounds: Aabb,
    center: Vec3,
    depth: u32,
    objects: Vec<(T, Aabb)>,
    children: Option<Box<[OctreeNode<T>; 8]>>,
}

impl<T: Copy> OctreeNode<T> {
    fn new(bounds: Aabb, depth: u32) -> Self {
        Self {
            bounds,
            center: bounds.center(),
            depth,
            objects: Vec::new(),
            children: None,
        }
    }

    fn clear(&mut self) {
        self.objects.clear();
        self.children = None;
    }

    fn insert(&mut self, item: T, bounds: Aabb, max_objects: usize, max_depth: u32) {
        if let Some(children) = self.children.as_mut() {
            if let Some(index) = child_index(self.center, &bounds) {
                children[index].insert(item, bounds, max_objects, max_depth);
                return;
            }
            self.objects.push((item, bounds));
            return;
        }

        self.objects.push((item, bounds));

        if self.objects.len() > max_objects && self.depth < max_depth {
            self.subdivide();
            let held = std::mem::take(&mut self.objects);
            for (held_item, held_bounds) in held {
                self.insert(held_item, held_bounds, max_objects, max_depth);
            }
        }
    }

    fn subdivide(&mut self) {
        let depth = self.depth + 1;
        let bounds = self.bounds;
        self.children = Some(Box::new(std::array::from_fn(|i| {
            OctreeNode::new(bounds.octant(i), depth)
        })));
    }

    fn retrieve_into(&self, query: &Aabb, out: &mut Vec<T>) {
        out.extend(self.objects.iter().map(|(item, _)| *item));

        let Some(children) = self.children.as_ref() else {
            return;
        };

        match child_index(self.center, query) {
            Some(index) => children[index].retrieve_into(query, out),
            None => {
                for child in children.iter() {
                    child.retrieve_into(query, out);
                }
            }
        }
    }

    fn node_count(&self) -> usize {
        1 + self
            .children
            .as_ref()
            .map_or(0, |c| c.iter().map(|n| n.node_count()).sum())
    }

    fn object_count(&self) -> usize {
        self.objects.len()
            + self
                .children
                .as_ref()
                .map_or(0, |c| c.iter().map(|n| n.object_count()).sum())
    }

    fn max_depth_reached(&self) -> u32 {
        self.children
            .as_ref()
            .map_or(self.depth, |c| c.iter().map(|n| n.max_depth_reached()).max().unwrap_or(self.depth))
    }
}

/// Dynamic octree over axis-aligned boxes.
///
/// Holds copies of item handles (entity ids), never the entities
/// themselves. Objects that straddle a center plane stay at the node
/// where they straddle; `retrieve` always includes every ancestor's
/// objects, so nothing stored at a shallower depth is missed.
#[derive(Debug, Clone)]
pub struct Octree<T> {
    root: OctreeNode<T>,
    max_objects: usize,
    max_depth: u32,
}

impl<T: Copy> Octree<T> {
    pub fn new(bounds: Aabb, max_objects: usize, max_depth: u32) -> Self {
        Self {
            root: OctreeNode::new(bounds, 0),
            max_objects: max_objects.max(1),
            max_depth,
        }
    }

    /// Discard all objects and children, leaving an empty root leaf
    pub fn clear(&mut self) {
        self.root.clear();
    }

    /// Insert an item with its bounding volume.
    ///
    /// Boxes that are not inside the root bounds are kept at the root.
    pub fn insert(&mut self, item: T, bounds: Aabb) {
        if !self.root.bounds.contains(&bounds) {
            self.root.objects.push((item, bounds));
            return;
        }
        self.root.insert(item, bounds, self.max_objects, self.max_depth);
    }

    /// Candidate items whose stored boxes may intersect `query`
    pub fn retrieve(&self, query: &Aabb) -> Vec<T> {
        let mut out = Vec::new();
        self.root.retrieve_into(query, &mut out);
        out
    }

    /// Same as [`Octree::retrieve`] but appends into a reusable buffer
    pub fn retrieve_into(&self, query: &Aabb, out: &mut Vec<T>) {
        self.root.retrieve_into(query, out);
    }

    pub fn bounds(&self) -> Aabb {
        self.root.bounds
    }

    pub fn len(&self) -> usize {
        self.root.object_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get statistics about the tree
    pub fn stats(&self) -> OctreeStats {
        OctreeStats {
            node_count: self.root.node_count(),
            object_count: self.root.object_count(),
            depth: self.root.max_depth_reached(),
        }
    }
}

impl<T: Copy> Default for Octree<T> {
    fn default() -> Self {
        use crate::game::constants::world::{HALF_EXTENT, HALF_HEIGHT};
        let half = Vec3::new(HALF_EXTENT, HALF_HEIGHT, HALF_EXTENT);
        Self::new(Aabb::new(-half, half), MAX_OBJECTS_PER_NODE, MAX_DEPTH)
    }
}

/// Statistics about the octree
#[derive(Debug, Clone)]
pub struct OctreeStats {
    pub node_count: usize,
    pub object_count: usize,
    pub depth: u32,
}
