// Object mutation benchmarks
//
// Measures:
// - Adding and removing one mixin on a warm type cache
// - Replacing a mixin in place
// - Template instantiation vs. step-by-step construction
// - Heap vs. arena allocation for short-lived objects

use amalgam::{ArenaAllocator, Domain, DomainConfig, Mixin, MixinBuilder, Object, ObjectTemplate};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

#[derive(Default, Clone)]
struct Position([f32; 3]);
impl Mixin for Position {
    const NAME: &'static str = "position";
}

#[derive(Default, Clone)]
struct Velocity([f32; 3]);
impl Mixin for Velocity {
    const NAME: &'static str = "velocity";
}

#[derive(Default, Clone)]
struct Label(String);
impl Mixin for Label {
    const NAME: &'static str = "label";
}

fn domain() -> Domain {
    let domain = Domain::new("bench-mutation", DomainConfig::default());
    MixinBuilder::<Position>::new()
        .default_constructible()
        .copyable()
        .register(&domain)
        .unwrap();
    MixinBuilder::<Velocity>::new()
        .default_constructible()
        .copyable()
        .register(&domain)
        .unwrap();
    MixinBuilder::<Label>::new()
        .default_constructible()
        .copyable()
        .register(&domain)
        .unwrap();
    domain
}

/// Benchmark toggling one mixin on an object that keeps the others.
fn bench_add_remove(c: &mut Criterion) {
    let domain = domain();
    let mut object = Object::new(&domain);
    object.mutate().add::<Position>().add::<Label>().apply().unwrap();

    c.bench_function("add_remove_velocity", |b| {
        b.iter(|| {
            object.mutate().add::<Velocity>().apply().unwrap();
            object.mutate().remove::<Velocity>().apply().unwrap();
        })
    });

    c.bench_function("replace_position", |b| {
        b.iter(|| {
            object
                .mutate()
                .add_value(Position(black_box([1.0, 2.0, 3.0])))
                .apply()
                .unwrap();
        })
    });

    c.bench_function("noop_remove", |b| {
        b.iter(|| object.mutate().remove::<Velocity>().apply().unwrap())
    });
}

/// Benchmark building a three-mixin object from a template and by hand.
fn bench_construction(c: &mut Criterion) {
    let domain = domain();
    let template = ObjectTemplate::builder(&domain)
        .add::<Position>()
        .add::<Velocity>()
        .add::<Label>()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("construction");

    group.bench_function("template", |b| {
        b.iter(|| black_box(template.instantiate().unwrap()))
    });
    group.bench_function("mutation", |b| {
        b.iter(|| {
            let mut object = Object::new(&domain);
            object
                .mutate()
                .add::<Position>()
                .add::<Velocity>()
                .add::<Label>()
                .apply()
                .unwrap();
            black_box(object)
        })
    });
    group.bench_function("copy", |b| {
        let source = template.instantiate().unwrap();
        b.iter(|| black_box(source.try_clone().unwrap()))
    });

    group.finish();
}

/// Benchmark short-lived objects on the heap and on an arena.
fn bench_allocators(c: &mut Criterion) {
    let domain = domain();
    let mut group = c.benchmark_group("allocators");

    for batch in [16usize, 128] {
        group.bench_with_input(BenchmarkId::new("heap", batch), &batch, |b, &batch| {
            b.iter(|| {
                let objects: Vec<Object> = (0..batch)
                    .map(|_| {
                        let mut object = Object::new(&domain);
                        object.mutate().add::<Position>().add::<Velocity>().apply().unwrap();
                        object
                    })
                    .collect();
                black_box(objects)
            })
        });
        group.bench_with_input(BenchmarkId::new("arena", batch), &batch, |b, &batch| {
            b.iter(|| {
                let arena = Arc::new(ArenaAllocator::new(64 * 1024));
                let objects: Vec<Object> = (0..batch)
                    .map(|_| {
                        let mut object = Object::with_allocator(&domain, arena.clone());
                        object.mutate().add::<Position>().add::<Velocity>().apply().unwrap();
                        object
                    })
                    .collect();
                black_box(objects)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_remove, bench_construction, bench_allocators);

criterion_main!(benches);
