use navoctree_core::Vector3;
use navoctree_partition::{Octree, OctreeNode};
use navoctree_storage::MonotonicAllocator;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const MIN_LAYERS: [u8; 3] = [2, 3, 4];

fn new_tree(min_layer: u8) -> Octree<MonotonicAllocator<OctreeNode>> {
    let allocator = MonotonicAllocator::new(1 << 20).unwrap();
    Octree::new(100.0, 0.5, min_layer, allocator)
}

fn terrain_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("terrain_insertion");
    for min_layer in MIN_LAYERS.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(min_layer), min_layer, |b, &min_layer| {
            b.iter_with_setup(
                || new_tree(min_layer),
                |mut tree| {
                    for i in 0..50 {
                        let offset = i as f32 * 1.5;
                        tree.add_terrain_triangle_mesh(
                            Vector3::new(offset, 0.0, 0.0),
                            Vector3::new(offset + 1.0, 0.0, 0.0),
                            Vector3::new(offset, 1.0, 0.0),
                            min_layer + 2,
                            true,
                        );
                    }
                },
            );
        });
    }
    group.finish();
}

fn terrain_path_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("terrain_path_graph");
    for min_layer in MIN_LAYERS.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(min_layer), min_layer, |b, &min_layer| {
            b.iter_with_setup(
                || {
                    let mut tree = new_tree(min_layer);
                    for i in 0..50 {
                        let offset = i as f32 * 1.5;
                        tree.add_terrain_triangle_mesh(
                            Vector3::new(offset, 0.0, 0.0),
                            Vector3::new(offset + 1.0, 0.0, 0.0),
                            Vector3::new(offset, 1.0, 0.0),
                            min_layer + 2,
                            true,
                        );
                    }
                    tree
                },
                |mut tree| {
                    tree.calculate_terrain_path_graph();
                },
            );
        });
    }
    group.finish();
}

criterion_group!(benches, terrain_insertion, terrain_path_graph);
criterion_main!(benches);
