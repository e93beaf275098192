//! SAH-based BVH builder and traversal.
//!
//! Constructs a flat BVH array from a list of primitive bounds.
//! Uses Surface Area Heuristic for split decisions. The same builder
//! serves triangles (bottom level) and instances (top level).

use glam::Vec3;

use crate::aabb::{Aabb, BvhNode};
use crate::ray::Ray;

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection.
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum primitives per leaf before forcing a split.
const MAX_LEAF_SIZE: usize = 4;

/// Built BVH result.
#[derive(Debug, Clone)]
pub struct Bvh {
    /// Flat node array (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Reordered primitive indices (leaves reference into this).
    pub prim_indices: Vec<usize>,
}

/// SAH bin for evaluating split candidates.
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Bin {
    fn new() -> Self {
        Self {
            bounds: Aabb::EMPTY,
            count: 0,
        }
    }
}

/// Build BVH from primitive bounds using SAH.
///
/// Returns a flat node array + reordered primitive index list.
/// Indices map into the input slice.
#[tracing::instrument(skip_all, fields(prim_count = aabbs.len()))]
pub fn build_bvh(aabbs: &[Aabb]) -> Bvh {
    let n = aabbs.len();
    if n == 0 {
        return Bvh {
            nodes: vec![BvhNode::ZERO],
            prim_indices: vec![],
        };
    }

    let centroids: Vec<Vec3> = aabbs.iter().map(|b| b.centroid()).collect();

    // Working index array (reordered by partitioning)
    let mut indices: Vec<usize> = (0..n).collect();

    // Worst case: 2*n - 1 for a full binary tree
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::ZERO);

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize, // exclusive
    }

    let mut stack = vec![Task {
        node_idx: 0,
        start: 0,
        end: n,
    }];

    while let Some(task) = stack.pop() {
        let start = task.start;
        let end = task.end;
        let count = end - start;

        let mut node_aabb = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            node_aabb.grow(&aabbs[idx]);
        }

        if count <= MAX_LEAF_SIZE {
            nodes[task.node_idx] = leaf(&node_aabb, start, count);
            continue;
        }

        let mut centroid_bounds = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            centroid_bounds.grow_point(centroids[idx]);
        }

        let (best_axis, best_split_pos, best_cost) =
            find_best_split(&indices[start..end], aabbs, &centroids, &centroid_bounds);

        let leaf_cost = count as f32 * INTERSECT_COST * node_aabb.area();

        if best_cost >= leaf_cost || best_axis == usize::MAX {
            nodes[task.node_idx] = leaf(&node_aabb, start, count);
            continue;
        }

        let mid = partition(&mut indices[start..end], |&idx| {
            centroids[idx][best_axis] < best_split_pos
        }) + start;

        // Degenerate partition: split in the middle
        let mid = if mid == start || mid == end {
            (start + end) / 2
        } else {
            mid
        };

        let left_idx = nodes.len();
        let right_idx = left_idx + 1;
        nodes.push(BvhNode::ZERO);
        nodes.push(BvhNode::ZERO);

        nodes[task.node_idx] = BvhNode {
            aabb_min: node_aabb.min.to_array(),
            left_or_first: left_idx as u32,
            aabb_max: node_aabb.max.to_array(),
            count: 0,
        };

        // Right first so left is processed first
        stack.push(Task {
            node_idx: right_idx,
            start: mid,
            end,
        });
        stack.push(Task {
            node_idx: left_idx,
            start,
            end: mid,
        });
    }

    Bvh {
        nodes,
        prim_indices: indices,
    }
}

fn leaf(bounds: &Aabb, first: usize, count: usize) -> BvhNode {
    BvhNode {
        aabb_min: bounds.min.to_array(),
        left_or_first: first as u32,
        aabb_max: bounds.max.to_array(),
        count: count as u32,
    }
}

/// SAH binned split search across all 3 axes.
/// Returns (best_axis, split_position, cost). axis=usize::MAX if no valid split.
fn find_best_split(
    indices: &[usize],
    aabbs: &[Aabb],
    centroids: &[Vec3],
    centroid_bounds: &Aabb,
) -> (usize, f32, f32) {
    let mut best_axis = usize::MAX;
    let mut best_pos = 0.0f32;
    let mut best_cost = f32::INFINITY;

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-8 {
            continue;
        }

        let mut bins: Vec<Bin> = (0..NUM_BINS).map(|_| Bin::new()).collect();
        let inv_extent = NUM_BINS as f32 / extent;

        for &idx in indices {
            let bin_id = ((centroids[idx][axis] - centroid_bounds.min[axis]) * inv_extent) as usize;
            let bin_id = bin_id.min(NUM_BINS - 1);
            bins[bin_id].bounds.grow(&aabbs[idx]);
            bins[bin_id].count += 1;
        }

        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.area();
            left_count[i] = sweep_count;
        }

        sweep = Aabb::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1]
                        + sweep_count as f32 * sweep.area());

            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
                best_pos = centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent;
            }
        }
    }

    (best_axis, best_pos, best_cost)
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

impl Bvh {
    /// True if the tree holds no primitives.
    pub fn is_empty(&self) -> bool {
        self.prim_indices.is_empty()
    }

    /// Bounds of the root node.
    pub fn bounds(&self) -> Aabb {
        if self.is_empty() {
            Aabb::EMPTY
        } else {
            self.nodes[0].aabb()
        }
    }

    /// Closest-hit traversal.
    ///
    /// `visit(prim, t_max)` is called for every primitive whose leaf box the
    /// ray overlaps and returns `Some(t)` for a hit closer than `t_max`.
    /// Returns the closest accepted distance.
    pub fn traverse<F>(&self, ray: &Ray, mut visit: F) -> Option<f32>
    where
        F: FnMut(usize, f32) -> Option<f32>,
    {
        if self.is_empty() {
            return None;
        }

        let inv_dir = ray.dir.recip();
        let mut t_max = ray.t_far;
        let mut closest = None;
        let mut stack = Vec::with_capacity(64);
        stack.push(0usize);

        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx];
            if node.aabb().intersect(ray.org, inv_dir, ray.t_near, t_max).is_none() {
                continue;
            }

            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &prim in &self.prim_indices[first..first + node.count as usize] {
                    if let Some(t) = visit(prim, t_max) {
                        if t < t_max {
                            t_max = t;
                            closest = Some(t);
                        }
                    }
                }
            } else {
                let left = node.left_or_first as usize;
                stack.push(left + 1);
                stack.push(left);
            }
        }

        closest
    }
}
