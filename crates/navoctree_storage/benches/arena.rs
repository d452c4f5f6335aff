use navoctree_storage::{HeapAllocator, MonotonicAllocator, NodeAllocator};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const COUNTS: [usize; 3] = [64, 1024, 16384];

#[repr(C)]
struct Node {
    a: u64,
    b: u64,
}

fn monotonic_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("monotonic_allocate");
    for count in COUNTS.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_with_setup(
                || MonotonicAllocator::<Node>::new(count + 1).unwrap(),
                |arena| {
                    for _ in 0..count {
                        let p = arena.allocate(1);
                        unsafe { arena.construct(p, Node { a: 0, b: 0 }) };
                    }
                },
            );
        });
    }
    group.finish();
}

fn heap_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_allocate");
    for count in COUNTS.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_with_setup(HeapAllocator::<Node>::new, |alloc| {
                for _ in 0..count {
                    let p = alloc.allocate(1);
                    unsafe { alloc.construct(p, Node { a: 0, b: 0 }) };
                }
            });
        });
    }
    group.finish();
}

fn monotonic_free_list_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("monotonic_free_list_reuse");
    for count in COUNTS.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_with_setup(
                || {
                    let arena = MonotonicAllocator::<Node>::new(count + 1).unwrap();
                    let pointers: Vec<_> = (0..count).map(|_| arena.allocate(1)).collect();
                    for &p in &pointers {
                        arena.deallocate(p, 1);
                    }
                    arena
                },
                |arena| {
                    for _ in 0..count {
                        let p = arena.allocate(1);
                        unsafe { arena.construct(p, Node { a: 0, b: 0 }) };
                    }
                },
            );
        });
    }
    group.finish();
}

criterion_group!(benches, monotonic_allocate, heap_allocate, monotonic_free_list_reuse);
criterion_main!(benches);
