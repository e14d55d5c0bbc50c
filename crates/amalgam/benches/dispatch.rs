// Message dispatch benchmarks
//
// Measures:
// - Unicast calls through shared and exclusive handlers
// - Multicast calls over growing compositions
// - Combinator overhead relative to a plain loop
// - Concurrent readers on one object

use amalgam::{
    BooleanAnd, Collect, Domain, DomainConfig, Mixin, MixinBuilder, MulticastMessage, Object, Sum,
    UnicastMessage,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::thread;

#[derive(Default)]
struct Counter(u64);
impl Mixin for Counter {
    const NAME: &'static str = "counter";
}

macro_rules! layers {
    ($($name:ident = $value:expr),* $(,)?) => {
        $(
            #[derive(Default)]
            struct $name;
            impl Mixin for $name {
                const NAME: &'static str = stringify!($name);
            }
        )*

        fn register_layers(domain: &Domain, weight: &MulticastMessage<u64, u64>) {
            $(
                MixinBuilder::<$name>::new()
                    .implements(weight, |_: &$name, x| x + $value)
                    .default_constructible()
                    .register(domain)
                    .unwrap();
            )*
        }

        fn add_layers(object: &mut Object, count: usize) {
            let mut mutation = object.mutate();
            let mut left = count;
            $(
                if left > 0 {
                    mutation = mutation.add::<$name>();
                    left -= 1;
                }
            )*
            let _ = left;
            mutation.apply().unwrap();
        }
    };
}

layers!(L1 = 1, L2 = 2, L3 = 3, L4 = 4, L5 = 5, L6 = 6, L7 = 7, L8 = 8);

struct Setup {
    domain: Domain,
    get: UnicastMessage<(), u64>,
    bump: UnicastMessage<u64, ()>,
    weight: MulticastMessage<u64, u64>,
}

fn setup() -> Setup {
    let domain = Domain::new("bench-dispatch", DomainConfig::default());
    let get = domain.register_unicast::<(), u64>("get").unwrap();
    let bump = domain.register_unicast::<u64, ()>("bump").unwrap();
    let weight = domain.register_multicast::<u64, u64>("weight").unwrap();

    MixinBuilder::<Counter>::new()
        .implements(&get, |c: &Counter, ()| c.0)
        .implements_mut(&bump, |c: &mut Counter, by| c.0 += by)
        .default_constructible()
        .register(&domain)
        .unwrap();
    register_layers(&domain, &weight);

    Setup {
        domain,
        get,
        bump,
        weight,
    }
}

/// Benchmark a unicast call through a shared handler.
fn bench_unicast(c: &mut Criterion) {
    let s = setup();
    let mut object = Object::new(&s.domain);
    object.mutate().add::<Counter>().apply().unwrap();

    c.bench_function("unicast_shared", |b| {
        b.iter(|| black_box(s.get.call(&object, ()).unwrap()))
    });

    c.bench_function("unicast_exclusive", |b| {
        b.iter(|| s.bump.call_mut(&mut object, black_box(1)).unwrap())
    });
}

/// Benchmark multicast dispatch over 1 to 8 implementers.
fn bench_multicast(c: &mut Criterion) {
    let s = setup();
    let mut group = c.benchmark_group("multicast");

    for count in [1usize, 2, 4, 8] {
        let mut object = Object::new(&s.domain);
        add_layers(&mut object, count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("sum", count), &count, |b, _| {
            b.iter(|| black_box(s.weight.call_with(&object, black_box(1), Sum::new()).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("collect", count), &count, |b, _| {
            b.iter(|| black_box(s.weight.call_with(&object, 1, Collect::new()).unwrap()))
        });
    }

    group.finish();
}

/// Benchmark short-circuiting combinators against a full pass.
fn bench_combinators(c: &mut Criterion) {
    let s = setup();
    let ready = s.domain.register_multicast::<(), bool>("ready").unwrap();
    let mut object = Object::new(&s.domain);
    add_layers(&mut object, 8);
    let mut group = c.benchmark_group("combinators");

    group.bench_function("sum_8", |b| {
        b.iter(|| black_box(s.weight.call_with(&object, 0, Sum::new()).unwrap()))
    });
    group.bench_function("and_unimplemented", |b| {
        b.iter(|| black_box(ready.call_with(&object, (), BooleanAnd::new())))
    });

    group.finish();
}

/// Benchmark dispatch from several threads on one object.
fn bench_multithreaded_dispatch(c: &mut Criterion) {
    let s = setup();
    let mut object = Object::new(&s.domain);
    add_layers(&mut object, 4);

    let mut group = c.benchmark_group("multithreaded");
    for threads in [1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                thread::scope(|scope| {
                    for _ in 0..threads {
                        scope.spawn(|| {
                            for i in 0..1000 {
                                black_box(s.weight.call_with(&object, i, Sum::new()).unwrap());
                            }
                        });
                    }
                });
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_unicast,
    bench_multicast,
    bench_combinators,
    bench_multithreaded_dispatch
);

criterion_main!(benches);
