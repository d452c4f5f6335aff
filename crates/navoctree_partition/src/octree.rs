//! The sparse octree itself: construction, triangle insertion, adjacency,
//! path-graph building, connected-component labeling, and the host-facing
//! queries (`samplePosition`, `lineOfSight`, component export).
//!
//! Every cross-node reference is a [`Handle`] resolved through the
//! allocator, never a borrowed reference held across a call that might
//! mutate the same tree — this crate follows the arena-of-handles discipline
//! the whole workspace is built around rather than fighting the borrow
//! checker with back-pointers.

use crate::forest;
use crate::node::{OctreeNode, ADJACENT_DIRECTIONS, CORNER_DIRECTIONS, INVALID_COMPONENT_INDEX, MAX_COMPONENT_INDEX};
use fnv::{FnvHashMap, FnvHashSet};
use navoctree_core::{Aabb, Matrix3, Vector3};
use navoctree_storage::{Handle, NodeAllocator};
use std::collections::VecDeque;

/// A sparse octree over `[-size, size]^3`, parameterised over the allocator
/// policy that backs its nodes.
pub struct Octree<A: NodeAllocator<OctreeNode>> {
    allocator: A,
    tree_index: u16,

    size: f32,
    radius: f32,
    min_layer: u8,

    root: Handle,

    /// `component index -> (representative leaf, member count)`.
    component_map: FnvHashMap<u32, (Handle, usize)>,
    /// `runtime mesh index -> leaves that mesh currently touches`.
    runtime_mesh_index_to_nodes: FnvHashMap<i32, FnvHashSet<Handle>>,
    to_recalculate_path_graph: FnvHashSet<Handle>,

    /// Total allocated node count (root + all instantiated children),
    /// distinct from the path-graph's participant count.
    number_of_nodes: usize,
}

impl<A: NodeAllocator<OctreeNode>> Octree<A> {
    /// Builds a new octree of root half-extent `size`, eagerly subdividing
    /// down to `min_layer` (clamped to 15).
    pub fn new(size: f32, radius: f32, min_layer: u8, allocator: A) -> Self {
        let tree_index = forest::register();
        let root_ptr = allocator.allocate(1);
        // SAFETY: `root_ptr` was just returned by `allocate(1)` and is not
        // yet constructed.
        unsafe { allocator.construct(root_ptr, OctreeNode::new(tree_index, 0, Vector3::ZERO, [0, 0, 0])) };
        let root = allocator.translate(root_ptr);

        let mut tree = Self {
            allocator,
            tree_index,
            size,
            radius,
            min_layer: min_layer.min(15),
            root,
            component_map: FnvHashMap::default(),
            runtime_mesh_index_to_nodes: FnvHashMap::default(),
            to_recalculate_path_graph: FnvHashSet::default(),
            number_of_nodes: 1,
        };
        if tree.min_layer > 0 {
            tree.instantiate_children(tree.root);
        }
        tree
    }

    pub fn root(&self) -> Handle {
        self.root
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn number_of_nodes(&self) -> usize {
        self.number_of_nodes
    }

    // --- node access -----------------------------------------------------

    fn node(&self, h: Handle) -> &OctreeNode {
        // SAFETY: every live `Handle` this crate hands out was produced by
        // `self.allocator.translate` on a pointer this same allocator
        // constructed and has not yet destroyed.
        unsafe { &*self.allocator.resolve(h) }
    }

    /// Resolves a handle to a mutable reference. Takes `&self`, not
    /// `&mut self`, because node mutation happens through the allocator's
    /// resolved pointer rather than through Rust's borrow of `Octree` itself
    /// — the same aliasing discipline the original's raw-pointer graph
    /// relies on. Callers must not hold two such references to the same
    /// handle live at once.
    #[allow(clippy::mut_from_ref)]
    fn node_mut(&self, h: Handle) -> &mut OctreeNode {
        // SAFETY: see `node`; exclusivity is a caller invariant, not
        // something the type system enforces here.
        unsafe { &mut *self.allocator.resolve(h) }
    }

    fn children_at(&self, children: Handle, k: usize) -> Handle {
        let children_ptr = self.allocator.resolve(children);
        // SAFETY: `children` is either null (never passed here) or resolves
        // to a contiguous 8-element block allocated by `instantiate_children`.
        self.allocator.translate(unsafe { children_ptr.add(k) })
    }

    // --- construction ------------------------------------------------------

    /// Allocates and wires the 8 children of `handle`, with deterministic
    /// relative coordinates (`k`'s bits select +/- per axis, matching
    /// [`CORNER_DIRECTIONS`]). Returns `false` without allocating if children
    /// already exist. Recurses while the new layer is still above
    /// `min_layer`, so the tree reaches `min_layer` everywhere eagerly.
    fn instantiate_children(&mut self, handle: Handle) -> bool {
        if !self.node(handle).children.is_null() {
            return false;
        }

        let (parent_center, parent_layer, parent_world, tree_index) = {
            let n = self.node(handle);
            (n.center_position, n.layer, n.world_index, n.tree)
        };
        let child_layer = parent_layer + 1;
        let child_half = self.size / (1u32 << child_layer) as f32;

        let children_ptr = self.allocator.allocate(8);
        for k in 0..8usize {
            let x = (k >> 2) & 1;
            let y = (k >> 1) & 1;
            let z = k & 1;
            let dir = CORNER_DIRECTIONS[x][y][z];
            let center = parent_center + dir * child_half;
            // `world_index` needs standard monotonic-increasing-with-position
            // bits for the `find_adjacent_node_at` +-1 arithmetic to work;
            // `CORNER_DIRECTIONS` is indexed the other way (0 = +axis), so
            // the bit is flipped going from one convention to the other.
            let (wx, wy, wz) = (1 - x, 1 - y, 1 - z);
            let world_index = [
                (parent_world[0] << 1) + wx as u16,
                (parent_world[1] << 1) + wy as u16,
                (parent_world[2] << 1) + wz as u16,
            ];
            let mut child = OctreeNode::new(tree_index, child_layer, center, world_index);
            child.parent = handle;
            // SAFETY: slot `k` of the freshly allocated 8-block, unconstructed.
            unsafe { self.allocator.construct(children_ptr.add(k), child) };
        }
        let children = self.allocator.translate(children_ptr);
        self.node_mut(handle).children = children;
        self.number_of_nodes += 8;

        if child_layer < self.min_layer {
            for k in 0..8usize {
                let child = self.children_at(children, k);
                self.instantiate_children(child);
            }
        }
        true
    }

    fn intersect_with_triangle(&self, handle: Handle, p1: Vector3, p2: Vector3, p3: Vector3, expansion: f32) -> bool {
        let n = self.node(handle);
        let aabb = Aabb::new(n.center_position, n.half_extent(self.size));
        navoctree_core::triangle_intersects_aabb(p1, p2, p3, &aabb, expansion)
    }

    // --- terrain insertion --------------------------------------------------

    /// Inserts one terrain triangle, subdividing down to `max_layer`
    /// (clamped to 15). `expansion` is the agent radius when
    /// `consider_radius`, else zero.
    pub fn add_terrain_triangle_mesh(&mut self, p1: Vector3, p2: Vector3, p3: Vector3, max_layer: u8, consider_radius: bool) {
        let max_layer = max_layer.min(15);
        let expansion = if consider_radius { self.radius } else { 0.0 };
        let root = self.root;
        self.add_terrain_triangle_mesh_at(root, p1, p2, p3, max_layer, expansion, false);
    }

    fn add_terrain_triangle_mesh_at(
        &mut self,
        handle: Handle,
        p1: Vector3,
        p2: Vector3,
        p3: Vector3,
        max_layer: u8,
        expansion: f32,
        was_moveable: bool,
    ) {
        let (is_moveable, layer, center, half) = {
            let n = self.node(handle);
            (n.is_moveable, n.layer, n.center_position, n.half_extent(self.size))
        };

        let centroid = Vector3::mean(&[p1, p2, p3]);
        let forced = layer as u32 >= self.min_layer as u32
            && expansion > half
            && (centroid - center).length() < (expansion - half);

        if is_moveable || was_moveable || forced {
            let n = self.node_mut(handle);
            n.is_moveable = true;
            n.is_contains_moveable_children = true;
            return;
        }

        if self.intersect_with_triangle(handle, p1, p2, p3, expansion) {
            self.node_mut(handle).is_contains_moveable_children = true;
            if layer < max_layer {
                self.instantiate_children(handle);
                let children = self.node(handle).children;
                let propagate = self.node(handle).is_moveable;
                for k in 0..8usize {
                    let child = self.children_at(children, k);
                    self.add_terrain_triangle_mesh_at(child, p1, p2, p3, max_layer, expansion, propagate);
                }
            } else {
                self.node_mut(handle).is_moveable = true;
            }
        }
    }

    // --- runtime insertion / removal ----------------------------------------

    /// Inserts one runtime-mesh triangle, tracked under `mesh_index` so it
    /// can later be removed with [`Self::remove_runtime_mesh`].
    ///
    /// Argument order matches the original's internal method, not its
    /// host-visible wrapper (`navoctree_search::PathGraph` fixes the
    /// swap at its call site rather than here).
    pub fn add_runtime_triangle_mesh(
        &mut self,
        p1: Vector3,
        p2: Vector3,
        p3: Vector3,
        max_layer: u8,
        consider_radius: bool,
        mesh_index: i32,
    ) {
        let max_layer = max_layer.min(15);
        let expansion = if consider_radius { self.radius } else { 0.0 };
        let mut influenced = self.runtime_mesh_index_to_nodes.remove(&mesh_index).unwrap_or_default();
        let root = self.root;
        self.add_runtime_triangle_mesh_at(root, p1, p2, p3, max_layer, expansion, &mut influenced, false);
        self.runtime_mesh_index_to_nodes.insert(mesh_index, influenced);
    }

    fn add_runtime_triangle_mesh_at(
        &mut self,
        handle: Handle,
        p1: Vector3,
        p2: Vector3,
        p3: Vector3,
        max_layer: u8,
        expansion: f32,
        influenced: &mut FnvHashSet<Handle>,
        was_moveable: bool,
    ) {
        let (is_moveable, layer) = {
            let n = self.node(handle);
            (n.is_moveable, n.layer)
        };

        if is_moveable || was_moveable {
            // The triangle is subsumed by terrain; nothing runtime-specific
            // changes, but the closure flag is re-asserted defensively.
            self.node_mut(handle).is_contains_moveable_children = true;
            return;
        }

        if self.intersect_with_triangle(handle, p1, p2, p3, expansion) {
            self.node_mut(handle).is_contains_runtime_moveable_children = true;

            if layer < max_layer {
                let was_leaf_with_edges = {
                    let n = self.node(handle);
                    n.is_leaf() && !n.path_graph_edges.is_empty()
                };
                if was_leaf_with_edges {
                    self.enqueue_recompute_with_neighbors(handle);
                }
                self.instantiate_children(handle);
                let children = self.node(handle).children;
                for k in 0..8usize {
                    let child = self.children_at(children, k);
                    self.add_runtime_triangle_mesh_at(child, p1, p2, p3, max_layer, expansion, influenced, false);
                }
            } else if influenced.insert(handle) {
                self.node_mut(handle).runtime_moveable_counter += 1;
                self.enqueue_recompute_with_neighbors(handle);
            }
        } else {
            let n = self.node(handle);
            if n.is_leaf() && n.path_graph_edges.is_empty() {
                self.to_recalculate_path_graph.insert(handle);
            }
        }
    }

    fn enqueue_recompute_with_neighbors(&mut self, handle: Handle) {
        self.to_recalculate_path_graph.insert(handle);
        let neighbors: Vec<Handle> = self.node(handle).path_graph_edges.view().to_vec();
        for n in neighbors {
            self.to_recalculate_path_graph.insert(n);
        }
    }

    /// Removes every leaf's association with `mesh_index`, decrementing
    /// `runtime_moveable_counter` and clearing the `is_contains_runtime_
    /// moveable_children` closure up the parent chain wherever it reaches
    /// zero with no sibling still flagged.
    pub fn remove_runtime_mesh(&mut self, mesh_index: i32) {
        let Some(leaves) = self.runtime_mesh_index_to_nodes.remove(&mesh_index) else {
            return;
        };
        for leaf in leaves {
            let counter = {
                let n = self.node_mut(leaf);
                n.runtime_moveable_counter = n.runtime_moveable_counter.saturating_sub(1);
                n.runtime_moveable_counter
            };
            if counter == 0 {
                self.node_mut(leaf).is_contains_runtime_moveable_children = false;
                self.clear_runtime_flag_upward(leaf);
            }
            self.to_recalculate_path_graph.insert(leaf);
        }
    }

    /// Clears `is_contains_runtime_moveable_children` on `handle`'s ancestors,
    /// stopping as soon as one still has a flagged child. Callers must clear
    /// `handle`'s own flag before calling this — the check below inspects
    /// `handle` as one of its parent's eight children.
    fn clear_runtime_flag_upward(&mut self, mut handle: Handle) {
        loop {
            let parent = self.node(handle).parent;
            if parent.is_null() {
                return;
            }
            let children = self.node(parent).children;
            let any_child_flagged = (0..8).any(|k| {
                let child = self.children_at(children, k);
                self.node(child).is_contains_runtime_moveable_children
            });
            if any_child_flagged {
                return;
            }
            self.node_mut(parent).is_contains_runtime_moveable_children = false;
            handle = parent;
        }
    }

    // --- adjacency -----------------------------------------------------------

    /// Finds the node adjacent to `handle` along `direction_index` (0 = +x,
    /// 1 = -x, 2 = +y, 3 = -y, 4 = +z, 5 = -z). Returns the coarser covering
    /// ancestor if the exact target path is not fully instantiated, or
    /// `None` if the target lattice cell is outside the tree's bounds.
    pub fn find_adjacent_node(&self, handle: Handle, direction_index: usize) -> Option<Handle> {
        let n = self.node(handle);
        let d = ADJACENT_DIRECTIONS[direction_index];
        let x = n.world_index[0] as i32 + d[0];
        let y = n.world_index[1] as i32 + d[1];
        let z = n.world_index[2] as i32 + d[2];
        self.find_adjacent_node_at(x, y, z, n.layer)
    }

    fn find_adjacent_node_at(&self, x: i32, y: i32, z: i32, layer: u8) -> Option<Handle> {
        let bound = 1i32 << layer;
        if x < 0 || y < 0 || z < 0 || x >= bound || y >= bound || z >= bound {
            return None;
        }
        let mut current = self.root;
        for depth in 1..=layer {
            let children = self.node(current).children;
            if children.is_null() {
                break;
            }
            let shift = layer - depth;
            // Invert world-index bits (1 = +axis) back to the
            // `CORNER_DIRECTIONS` convention (0 = +axis) used to order
            // children at construction.
            let cx = 1 - ((x >> shift) & 1) as usize;
            let cy = 1 - ((y >> shift) & 1) as usize;
            let cz = 1 - ((z >> shift) & 1) as usize;
            current = self.children_at(children, (cx << 2) | (cy << 1) | cz);
        }
        Some(current)
    }

    // --- leaf enumeration ------------------------------------------------

    fn collect_leaves(&self) -> Vec<Handle> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(h) = stack.pop() {
            let children = self.node(h).children;
            if children.is_null() {
                leaves.push(h);
            } else {
                for k in 0..8usize {
                    stack.push(self.children_at(children, k));
                }
            }
        }
        leaves
    }

    fn add_edge(&mut self, a: Handle, b: Handle) {
        if !self.node(a).path_graph_edges.contains(b) {
            self.node_mut(a).path_graph_edges.add(b);
        }
        if !self.node(b).path_graph_edges.contains(a) {
            self.node_mut(b).path_graph_edges.add(a);
        }
    }

    // --- path graph build --------------------------------------------------

    /// Rebuilds the whole path graph over *blocked* leaves from scratch.
    /// Returns the number of participating leaves (non-empty edge lists).
    pub fn calculate_terrain_path_graph(&mut self) -> usize {
        let leaves = self.collect_leaves();
        for &h in &leaves {
            self.node_mut(h).path_graph_edges = Default::default();
        }
        for &q in &leaves {
            let (is_moveable, layer) = {
                let n = self.node(q);
                (n.is_moveable, n.layer)
            };
            if !is_moveable || layer == 0 {
                continue;
            }
            for dir in 0..6usize {
                let Some(f) = self.find_adjacent_node(q, dir) else { continue };
                let fnode = self.node(f);
                if !fnode.is_moveable {
                    continue;
                }
                if !(fnode.layer <= layer || fnode.is_leaf()) {
                    continue;
                }
                self.add_edge(q, f);
            }
        }
        self.update_scc(&leaves)
    }

    /// Incrementally rebuilds edges only for leaves queued in
    /// `to_recalculate_path_graph` (by runtime insert/remove), over *free*
    /// leaves. Returns the number of participating leaves.
    pub fn calculate_runtime_path_graph(&mut self) -> usize {
        let queue: Vec<Handle> = self.to_recalculate_path_graph.iter().copied().collect();
        for &q in &queue {
            let neighbors: Vec<Handle> = self.node(q).path_graph_edges.view().to_vec();
            for n in neighbors {
                self.node_mut(n).path_graph_edges.remove(q);
            }
            self.node_mut(q).path_graph_edges = Default::default();
        }
        for &q in &queue {
            let (is_free, is_leaf, layer) = {
                let n = self.node(q);
                (n.is_free(), n.is_leaf(), n.layer)
            };
            if !is_free || !is_leaf || layer == 0 {
                continue;
            }
            for dir in 0..6usize {
                let Some(f) = self.find_adjacent_node(q, dir) else { continue };
                let fnode = self.node(f);
                if fnode.is_moveable || fnode.runtime_moveable_counter > 0 {
                    continue;
                }
                if !(fnode.layer <= layer || fnode.is_leaf()) {
                    continue;
                }
                self.add_edge(q, f);
            }
        }
        self.to_recalculate_path_graph.clear();
        let leaves = self.collect_leaves();
        self.update_scc(&leaves)
    }

    /// Multi-source BFS labeling of connected components over leaves with a
    /// non-empty edge list. Component indices saturate at `MAX_COMPONENT_
    /// INDEX`: once reached, further components are labeled and then
    /// reverted to "unclassified" rather than overflowing the 20-bit field.
    fn update_scc(&mut self, leaves: &[Handle]) -> usize {
        for &h in leaves {
            self.node_mut(h).path_graph_connect_component_index = INVALID_COMPONENT_INDEX;
        }
        self.component_map.clear();

        let mut next_label: u32 = 1;
        let mut queue = VecDeque::new();
        let mut logged_saturation = false;

        for &start in leaves {
            if self.node(start).path_graph_edges.is_empty() {
                continue;
            }
            if self.node(start).path_graph_connect_component_index != INVALID_COMPONENT_INDEX {
                continue;
            }

            let saturated = next_label > MAX_COMPONENT_INDEX;
            if saturated && !logged_saturation {
                log::warn!("octree path-graph exceeded {} components; further components are left unclassified", MAX_COMPONENT_INDEX);
                logged_saturation = true;
            }
            let label = if saturated { MAX_COMPONENT_INDEX } else { next_label };

            let mut members = Vec::new();
            queue.clear();
            queue.push_back(start);
            self.node_mut(start).path_graph_connect_component_index = label;
            while let Some(h) = queue.pop_front() {
                members.push(h);
                let neighbors: Vec<Handle> = self.node(h).path_graph_edges.view().to_vec();
                for n in neighbors {
                    if self.node(n).path_graph_connect_component_index == INVALID_COMPONENT_INDEX {
                        self.node_mut(n).path_graph_connect_component_index = label;
                        queue.push_back(n);
                    }
                }
            }

            if saturated {
                for h in members {
                    self.node_mut(h).path_graph_connect_component_index = INVALID_COMPONENT_INDEX;
                }
            } else {
                self.component_map.insert(label, (start, members.len()));
                next_label += 1;
            }
        }

        leaves.iter().filter(|&&h| !self.node(h).path_graph_edges.is_empty()).count()
    }

    // --- host queries --------------------------------------------------------

    pub fn get_component_total_count(&self) -> usize {
        self.component_map.len()
    }

    pub fn get_component_size(&self, component: u32) -> usize {
        self.component_map.get(&component).map(|&(_, n)| n).unwrap_or(0)
    }

    /// Exports component `component` as a 0-based position list plus
    /// directed edge index pairs (one pair per stored direction, so an
    /// undirected edge appears twice). Resets `runtime_moveable_counter` to
    /// 0 on every visited leaf — an original side effect preserved rather
    /// than fixed (see `DESIGN.md`).
    pub fn get_component_graph(&mut self, component: u32, rotate: bool) -> (Vec<Vector3>, Vec<(u32, u32)>) {
        let (members, index_of) = self.component_members(component);

        let mut positions = Vec::with_capacity(members.len());
        let mut edges = Vec::new();
        for &h in &members {
            let neighbors: Vec<Handle> = self.node(h).path_graph_edges.view().to_vec();
            let n = self.node_mut(h);
            n.runtime_moveable_counter = 0;
            positions.push(n.center_position);
            let my_index = index_of[&h];
            for nb in neighbors {
                if let Some(&other) = index_of.get(&nb) {
                    edges.push((my_index, other));
                }
            }
        }

        if rotate {
            rotate_and_scale(&mut positions);
        }
        (positions, edges)
    }

    /// Exports component `component` as an `N x N` dense adjacency-color
    /// matrix; see `spec.md` §4.6 for the per-channel formula. Also resets
    /// `runtime_moveable_counter` on every visited leaf.
    pub fn get_component_color_graph(&mut self, component: u32, layer: u8) -> Vec<Vec<[f32; 3]>> {
        let (members, index_of) = self.component_members(component);
        let n = members.len();
        let scale = (1u32 << layer) as f32;

        let mut positions = Vec::with_capacity(n);
        for &h in &members {
            let node = self.node_mut(h);
            node.runtime_moveable_counter = 0;
            positions.push(node.center_position);
        }
        let center = Vector3::mean(&positions);

        let mut matrix = vec![vec![[0.0f32; 3]; n]; n];
        for (i, &h) in members.iter().enumerate() {
            let from = positions[i];
            let neighbors: Vec<Handle> = self.node(h).path_graph_edges.view().to_vec();
            for nb in neighbors {
                let Some(&j) = index_of.get(&nb) else { continue };
                let j = j as usize;
                let to = positions[j];
                let x = (to - from).length() * scale;
                let y = (((from - to).normalized().dot(&(center - to).normalized())) + 1.0) / 2.0;
                matrix[i][j][0] = x;
                matrix[i][j][1] = y;
                matrix[j][i][2] = y;
            }
        }
        matrix
    }

    fn component_members(&self, component: u32) -> (Vec<Handle>, FnvHashMap<Handle, u32>) {
        let mut members = Vec::new();
        let mut index_of = FnvHashMap::default();
        for h in self.collect_leaves() {
            if self.node(h).path_graph_connect_component_index == component {
                index_of.insert(h, members.len() as u32);
                members.push(h);
            }
        }
        (members, index_of)
    }

    fn leaf_containing(&self, position: Vector3) -> Option<Handle> {
        if !Aabb::new(Vector3::ZERO, self.size).contains(&position) {
            return None;
        }
        let mut current = self.root;
        loop {
            let children = self.node(current).children;
            if children.is_null() {
                return Some(current);
            }
            let rel = position - self.node(current).center_position;
            let x = if rel.x >= 0.0 { 0 } else { 1 };
            let y = if rel.y >= 0.0 { 0 } else { 1 };
            let z = if rel.z >= 0.0 { 0 } else { 1 };
            current = self.children_at(children, (x << 2) | (y << 1) | z);
        }
    }

    /// BFS from the leaf containing `position` for the nearest free,
    /// graph-participating leaf matching `scc` (`scc <= 0` accepts any
    /// component). Neighbors are only expanded within `radius` of
    /// `position`. Returns `(0, position)` if `position` is outside the
    /// root, `(-1, position)` if the search is exhausted without a match.
    pub fn sample_position(&self, position: Vector3, radius: f32, scc: i32) -> (i32, Vector3) {
        let Some(start) = self.leaf_containing(position) else {
            return (0, position);
        };

        let mut visited = FnvHashSet::default();
        let mut queue = VecDeque::new();
        visited.insert(start);
        queue.push_back(start);

        while let Some(h) = queue.pop_front() {
            let node = self.node(h);
            let matches_scc = scc <= 0 || node.path_graph_connect_component_index as i32 == scc;
            if node.is_free() && !node.path_graph_edges.is_empty() && matches_scc {
                let clipped = clip_into_leaf(position, node.center_position, node.half_extent(self.size));
                return (node.path_graph_connect_component_index as i32, clipped);
            }
            let neighbors: Vec<Handle> = node.path_graph_edges.view().to_vec();
            for n in neighbors {
                if visited.insert(n) {
                    let dist_sq = (self.node(n).center_position - position).sqr_length();
                    if dist_sq <= radius * radius {
                        queue.push_back(n);
                    }
                }
            }
        }
        (-1, position)
    }

    /// Iterative AABB-slab traversal from the root; a node whose subtree
    /// contains no terrain or runtime geometry is skipped outright. Returns
    /// `false` (blocked) the instant a surviving leaf is occupied.
    pub fn line_of_sight(&self, from: Vector3, to: Vector3) -> bool {
        let dir = to - from;
        let length = dir.length();
        if length <= 0.0 {
            return true;
        }
        let inv = Vector3::new(
            if dir.x != 0.0 { 1.0 / dir.x } else { f32::INFINITY },
            if dir.y != 0.0 { 1.0 / dir.y } else { f32::INFINITY },
            if dir.z != 0.0 { 1.0 / dir.z } else { f32::INFINITY },
        );

        let mut stack = vec![self.root];
        while let Some(h) = stack.pop() {
            let node = self.node(h);
            if !node.is_contains_moveable_children && !node.is_contains_runtime_moveable_children {
                continue;
            }
            let half = node.half_extent(self.size) * 1.01;
            let min = node.center_position - Vector3::splat(half);
            let max = node.center_position + Vector3::splat(half);
            if !intersect_ray_box(min, max, from, inv, length) {
                continue;
            }
            if node.children.is_null() {
                if node.is_moveable || node.runtime_moveable_counter > 0 {
                    return false;
                }
            } else {
                for k in 0..8usize {
                    stack.push(self.children_at(node.children, k));
                }
            }
        }
        true
    }
}

impl<A: NodeAllocator<OctreeNode>> Drop for Octree<A> {
    fn drop(&mut self) {
        self.destroy_subtree(self.root);
        let root_ptr = self.allocator.resolve(self.root);
        // SAFETY: `root_ptr` is the live root, constructed in `new` and not
        // yet destroyed.
        unsafe { self.allocator.destroy(root_ptr) };
        self.allocator.deallocate(root_ptr, 1);
        forest::release(self.tree_index);
    }
}

impl<A: NodeAllocator<OctreeNode>> Octree<A> {
    /// Destroys every descendant of `handle` (not `handle` itself), bottom up.
    fn destroy_subtree(&mut self, handle: Handle) {
        let children = self.node(handle).children;
        if children.is_null() {
            return;
        }
        for k in 0..8usize {
            let child = self.children_at(children, k);
            self.destroy_subtree(child);
        }
        let children_ptr = self.allocator.resolve(children);
        for k in 0..8usize {
            // SAFETY: every one of the 8 slots was constructed together in
            // `instantiate_children` and none has been destroyed yet.
            unsafe { self.allocator.destroy(children_ptr.add(k)) };
        }
        self.allocator.deallocate(children_ptr, 8);
    }
}

fn intersect_ray_box(min: Vector3, max: Vector3, origin: Vector3, inv_dir: Vector3, length: f32) -> bool {
    let mut t_min = 0.0f32;
    let mut t_max = length;
    for i in 0..3 {
        let t1 = (min[i] - origin[i]) * inv_dir[i];
        let t2 = (max[i] - origin[i]) * inv_dir[i];
        let (lo, hi) = if t1 < t2 { (t1, t2) } else { (t2, t1) };
        t_min = t_min.max(lo);
        t_max = t_max.min(hi);
        if t_min > t_max {
            return false;
        }
    }
    true
}

/// Clamps `position` into the leaf's AABB along whichever axis it overflows
/// the most; other axes are left as-is.
fn clip_into_leaf(position: Vector3, center: Vector3, half_extent: f32) -> Vector3 {
    let min = center - Vector3::splat(half_extent);
    let max = center + Vector3::splat(half_extent);
    let mut overflow = Vector3::ZERO;
    for i in 0..3 {
        overflow[i] = (min[i] - position[i]).max(position[i] - max[i]).max(0.0);
    }
    if overflow.x == 0.0 && overflow.y == 0.0 && overflow.z == 0.0 {
        return position;
    }
    let axis = overflow.dominant_axis();
    let mut result = position;
    result[axis] = result[axis].max(min[axis]).min(max[axis]);
    result
}

/// The PCA-ish export transform: center on the mean, apply the raw
/// covariance matrix as a linear map (deliberately not orthonormalized —
/// see `DESIGN.md`), then shift+scale into `[0, 1]^3` by the largest axis
/// extent. A single-point component divides by zero, same as the OFF
/// loader's degenerate-mesh case; neither is guarded.
fn rotate_and_scale(positions: &mut [Vector3]) {
    if positions.is_empty() {
        return;
    }
    let mean = Vector3::mean(positions);
    for p in positions.iter_mut() {
        *p = *p - mean;
    }
    let covariance = Matrix3::covariance(positions);
    for p in positions.iter_mut() {
        *p = covariance * *p;
    }
    let mut min = positions[0];
    let mut max = positions[0];
    for &p in positions.iter() {
        min = min.min(&p);
        max = max.max(&p);
    }
    let extent = max - min;
    let scale = extent.x.max(extent.y).max(extent.z);
    for p in positions.iter_mut() {
        *p = (*p - min) / scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navoctree_storage::MonotonicAllocator;

    fn new_tree(min_layer: u8) -> Octree<MonotonicAllocator<OctreeNode>> {
        let allocator = MonotonicAllocator::new(4096).unwrap();
        Octree::new(1.0, 0.0, min_layer, allocator)
    }

    #[test]
    fn construction_subdivides_to_min_layer() {
        let tree = new_tree(2);
        // 1 (root) + 8 (layer 1) + 64 (layer 2) = 73
        assert_eq!(tree.number_of_nodes(), 73);
    }

    #[test]
    fn single_triangle_terrain_forms_one_component() {
        let mut tree = new_tree(1);
        tree.add_terrain_triangle_mesh(
            Vector3::new(0.1, 0.1, 0.1),
            Vector3::new(0.9, 0.1, 0.1),
            Vector3::new(0.1, 0.9, 0.1),
            3,
            false,
        );
        tree.calculate_terrain_path_graph();
        assert!(tree.get_component_total_count() >= 1);
    }

    #[test]
    fn two_disjoint_triangles_form_two_components() {
        let mut tree = new_tree(1);
        tree.add_terrain_triangle_mesh(
            Vector3::new(0.05, 0.05, 0.05),
            Vector3::new(0.2, 0.05, 0.05),
            Vector3::new(0.05, 0.2, 0.05),
            4,
            false,
        );
        tree.add_terrain_triangle_mesh(
            Vector3::new(0.8, 0.8, 0.95),
            Vector3::new(0.95, 0.8, 0.95),
            Vector3::new(0.8, 0.95, 0.95),
            4,
            false,
        );
        tree.calculate_terrain_path_graph();
        assert_eq!(tree.get_component_total_count(), 2);
    }

    #[test]
    fn runtime_insert_then_remove_restores_counters() {
        let mut tree = new_tree(1);
        tree.add_terrain_triangle_mesh(
            Vector3::new(0.1, 0.1, 0.1),
            Vector3::new(0.9, 0.1, 0.1),
            Vector3::new(0.1, 0.9, 0.1),
            3,
            false,
        );
        tree.calculate_terrain_path_graph();

        tree.add_runtime_triangle_mesh(
            Vector3::new(0.1, 0.1, 0.8),
            Vector3::new(0.9, 0.1, 0.8),
            Vector3::new(0.1, 0.9, 0.8),
            3,
            false,
            7,
        );
        tree.calculate_runtime_path_graph();
        tree.remove_runtime_mesh(7);
        tree.calculate_runtime_path_graph();

        for h in tree.collect_leaves() {
            assert_eq!(tree.node(h).runtime_moveable_counter, 0);
            assert!(!tree.node(h).is_contains_runtime_moveable_children);
        }
    }

    #[test]
    fn find_adjacent_node_outside_bounds_is_none() {
        let tree = new_tree(2);
        assert!(tree.find_adjacent_node_at(-1, 0, 0, 2).is_none());
        assert!(tree.find_adjacent_node_at(4, 0, 0, 2).is_none());
    }

    #[test]
    fn component_graph_positions_are_in_unit_cube_when_rotated() {
        let mut tree = new_tree(1);
        tree.add_terrain_triangle_mesh(
            Vector3::new(0.1, 0.1, 0.1),
            Vector3::new(0.9, 0.1, 0.1),
            Vector3::new(0.1, 0.9, 0.1),
            3,
            false,
        );
        tree.calculate_terrain_path_graph();
        let count = tree.get_component_total_count();
        assert!(count >= 1);
        let (positions, _edges) = tree.get_component_graph(1, true);
        for p in positions {
            for i in 0..3 {
                assert!(p[i] >= 0.0 && p[i] <= 1.0, "component position left unit cube: {:?}", p);
            }
        }
    }

    #[test]
    fn line_of_sight_blocked_by_wall_but_clear_before_it() {
        let mut tree = new_tree(2);
        tree.add_terrain_triangle_mesh(
            Vector3::new(0.5, 0.0, 0.0),
            Vector3::new(0.5, 1.0, 0.0),
            Vector3::new(0.5, 0.0, 1.0),
            4,
            false,
        );
        assert!(!tree.line_of_sight(Vector3::new(0.1, 0.5, 0.5), Vector3::new(0.9, 0.5, 0.5)));
        assert!(tree.line_of_sight(Vector3::new(0.1, 0.5, 0.5), Vector3::new(0.4, 0.5, 0.5)));
    }
}
