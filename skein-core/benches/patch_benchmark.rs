//! Diff/apply throughput on editor-sized passage texts.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use skein_core::patch::{apply, diff};

fn bench_patch(c: &mut Criterion) {
    let base: String = "You wake in a dim corridor. [[Go north]] or [[Go south]].\n"
        .repeat(50);
    let mut edited = base.clone();
    edited.insert_str(base.len() / 2, "A door creaks somewhere above. ");

    c.bench_function("diff_3kb_insert", |b| {
        b.iter(|| diff(black_box(&base), black_box(&edited)))
    });

    let patch = diff(&base, &edited);
    c.bench_function("apply_3kb_insert", |b| {
        b.iter(|| apply(black_box(&base), black_box(&patch)))
    });
}

criterion_group!(benches, bench_patch);
criterion_main!(benches);
