use criterion::{black_box, criterion_group, criterion_main, Criterion};
use skein_collab::protocol::{FieldAction, WireAction, WireEnvelope};
use skein_core::TextPatch;

fn text_patch_envelope() -> WireEnvelope {
    WireEnvelope::new(
        "alice",
        WireAction::Set {
            passage: "Some Passage".into(),
            action: FieldAction::Text(TextPatch {
                offset: 42,
                deleted: 3,
                inserted: "replacement".into(),
            }),
        },
    )
}

fn bench_encode_text_patch(c: &mut Criterion) {
    let envelope = text_patch_envelope();

    c.bench_function("encode_text_patch", |b| {
        b.iter(|| black_box(black_box(&envelope).encode()))
    });
}

fn bench_decode_text_patch(c: &mut Criterion) {
    let encoded = text_patch_envelope().encode();

    c.bench_function("decode_text_patch", |b| {
        b.iter(|| black_box(WireEnvelope::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_encode_location(c: &mut Criterion) {
    let envelope = WireEnvelope::new(
        "alice",
        WireAction::Set {
            passage: "Some Passage".into(),
            action: FieldAction::Location {
                left: 812.5,
                top: 430.0,
            },
        },
    );

    c.bench_function("encode_location", |b| {
        b.iter(|| black_box(black_box(&envelope).encode()))
    });
}

fn bench_decode_pointer(c: &mut Criterion) {
    let encoded = WireEnvelope::new(
        "alice",
        WireAction::ShowPointer {
            author: "alice".into(),
            x: 512.0,
            y: 384.0,
        },
    )
    .encode();

    c.bench_function("decode_pointer", |b| {
        b.iter(|| black_box(WireEnvelope::decode(black_box(&encoded)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_encode_text_patch,
    bench_decode_text_patch,
    bench_encode_location,
    bench_decode_pointer,
);
criterion_main!(benches);
