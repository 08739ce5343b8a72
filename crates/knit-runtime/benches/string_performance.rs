//! Benchmarks for string growth on the tracked heap
//!
//! Growth is capacity-exact, so repeated appends reallocate every time. These
//! numbers show what that costs next to a single assignment.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use knit_runtime::{ErrorPolicy, Heap, KnitStr, Runtime};

fn bench_assign(c: &mut Criterion) {
    let mut group = c.benchmark_group("assign_copy");

    for len in [5usize, 64, 1024] {
        let text = vec![b'x'; len];
        group.bench_with_input(BenchmarkId::from_parameter(len), &text, |b, text| {
            let mut heap = Heap::new().unwrap();
            b.iter(|| {
                let s = KnitStr::from_bytes(&mut heap, black_box(text)).unwrap();
                s.deinit(&mut heap).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for count in [16usize, 256] {
        group.bench_with_input(BenchmarkId::new("chunks", count), &count, |b, &count| {
            let mut heap = Heap::new().unwrap();
            b.iter(|| {
                let mut s = KnitStr::new_empty(&mut heap).unwrap();
                for _ in 0..count {
                    s.append(&mut heap, black_box(b"abcd")).unwrap();
                }
                s.deinit(&mut heap).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_format(c: &mut Criterion) {
    c.bench_function("format_assign", |b| {
        let mut heap = Heap::new().unwrap();
        let mut s = KnitStr::new_empty(&mut heap).unwrap();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            s.format_assign(&mut heap, format_args!("item-{}-{}", black_box(n), "suffix"))
                .unwrap();
        });
    });
}

fn bench_variables(c: &mut Criterion) {
    c.bench_function("set_get_string", |b| {
        let mut rt = Runtime::init(ErrorPolicy::Continue).unwrap();
        b.iter(|| {
            rt.set_string(black_box("counter"), black_box("value")).unwrap();
            black_box(rt.get_string("counter").unwrap().len());
        });
    });
}

criterion_group!(benches, bench_assign, bench_append, bench_format, bench_variables);
criterion_main!(benches);
