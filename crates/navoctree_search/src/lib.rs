//! The host-facing path-graph API: a thin wrapper over
//! [`navoctree_partition::Octree`] that owns the participant-leaf count the
//! core itself only returns, not stores (mirroring the original's separate
//! `Octree` vs `PathGraph<OctreeType>` class split).

use navoctree_core::Vector3;
use navoctree_partition::{Octree, OctreeNode};
use navoctree_storage::{ArenaError, HeapAllocator, MonotonicAllocator, NodeAllocator};

pub struct PathGraph<A: NodeAllocator<OctreeNode>> {
    octree: Octree<A>,
    nodes_number: usize,
}

impl PathGraph<HeapAllocator<OctreeNode>> {
    /// A path graph backed by the plain system heap, one allocation per
    /// node — no upfront capacity to reserve.
    pub fn new_heap(size: f32, radius: f32, min_layer: u8) -> Self {
        Self { octree: Octree::new(size, radius, min_layer, HeapAllocator::new()), nodes_number: 0 }
    }
}

impl PathGraph<MonotonicAllocator<OctreeNode>> {
    /// A path graph backed by a reserved-virtual-memory bump arena sized for
    /// `capacity` nodes. The default backing; what the `generator` CLI uses.
    pub fn new_pooled(size: f32, radius: f32, min_layer: u8, capacity: usize) -> Result<Self, ArenaError> {
        let allocator = MonotonicAllocator::new(capacity)?;
        Ok(Self { octree: Octree::new(size, radius, min_layer, allocator), nodes_number: 0 })
    }
}

impl<A: NodeAllocator<OctreeNode>> PathGraph<A> {
    /// Number of leaves that participated in the most recent path-graph
    /// build (distinct from `Octree::number_of_nodes`, which counts every
    /// allocated node, internal or leaf).
    pub fn nodes_number(&self) -> usize {
        self.nodes_number
    }

    pub fn add_terrain_triangle_mesh(&mut self, p1: Vector3, p2: Vector3, p3: Vector3, max_layer: u8, consider_radius: bool) {
        self.octree.add_terrain_triangle_mesh(p1, p2, p3, max_layer, consider_radius);
    }

    /// Argument order here (`runtime_mesh_index` before `consider_radius`)
    /// matches the original's host-visible API; the internal
    /// `Octree::add_runtime_triangle_mesh` takes them in the other order.
    /// The fix lives entirely at this call site.
    pub fn add_runtime_triangle_mesh(
        &mut self,
        p1: Vector3,
        p2: Vector3,
        p3: Vector3,
        max_layer: u8,
        runtime_mesh_index: i32,
        consider_radius: bool,
    ) {
        self.octree.add_runtime_triangle_mesh(p1, p2, p3, max_layer, consider_radius, runtime_mesh_index);
    }

    pub fn remove_runtime_mesh(&mut self, runtime_mesh_index: i32) {
        self.octree.remove_runtime_mesh(runtime_mesh_index);
    }

    /// Full rebuild over *blocked* (terrain) leaves.
    pub fn build_terrain(&mut self) {
        self.nodes_number = self.octree.calculate_terrain_path_graph();
        log::debug!("terrain path graph built: {} components, {} participating leaves", self.octree.get_component_total_count(), self.nodes_number);
    }

    /// Incremental rebuild over *free* leaves queued since the last build.
    pub fn build_runtime(&mut self) {
        self.nodes_number = self.octree.calculate_runtime_path_graph();
        log::debug!("runtime path graph rebuilt: {} components, {} participating leaves", self.octree.get_component_total_count(), self.nodes_number);
    }

    pub fn sample_position(&self, position: Vector3, radius: f32, scc: i32) -> (i32, Vector3) {
        self.octree.sample_position(position, radius, scc)
    }

    pub fn line_of_sight(&self, from: Vector3, to: Vector3) -> bool {
        self.octree.line_of_sight(from, to)
    }

    pub fn get_component_total_count(&self) -> usize {
        self.octree.get_component_total_count()
    }

    pub fn get_component_size(&self, component: u32) -> usize {
        self.octree.get_component_size(component)
    }

    pub fn get_component_graph(&mut self, component: u32, rotate: bool) -> (Vec<Vector3>, Vec<(u32, u32)>) {
        self.octree.get_component_graph(component, rotate)
    }

    pub fn get_component_color_graph(&mut self, component: u32, layer: u8) -> Vec<Vec<[f32; 3]>> {
        self.octree.get_component_color_graph(component, layer)
    }
}
