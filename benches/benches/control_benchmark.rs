use std::hint::black_box;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use zumq::{
    proxy::{rewrite, SubscriptionFrame, SubscriptionKind},
    HmacSignatureChecker, RewriteMarker, SubscriptionEnvelope,
};

fn signed_frame(checker: &HmacSignatureChecker) -> Bytes {
    SubscriptionEnvelope::new("orders.eu", checker.sign("orders.eu"))
        .to_frame(SubscriptionKind::Subscribe)
}

fn bench_parse_envelope(c: &mut Criterion) {
    let checker = HmacSignatureChecker::new("bench-secret").unwrap();
    let frame = signed_frame(&checker);

    c.bench_function("subscription_frame_parse_envelope", |b| {
        b.iter(|| {
            let parsed = SubscriptionFrame::parse(black_box(&frame)).unwrap();
            black_box(parsed.envelope().unwrap())
        })
    });
}

fn bench_verify(c: &mut Criterion) {
    let checker = HmacSignatureChecker::new("bench-secret").unwrap();
    let signature = checker.sign("orders.eu");

    c.bench_function("hmac_verify", |b| {
        b.iter(|| black_box(checker.verify(black_box("orders.eu"), black_box(&signature))))
    });
}

/// Полный путь подписки: разбор, проверка, переписывание.
fn bench_authorize_and_rewrite(c: &mut Criterion) {
    let checker = HmacSignatureChecker::new("bench-secret").unwrap();
    let frame = signed_frame(&checker);

    c.bench_function("subscription_authorize_rewrite", |b| {
        b.iter(|| {
            let parsed = SubscriptionFrame::parse(black_box(&frame)).unwrap();
            let envelope = parsed.envelope().unwrap();
            checker
                .verify(&envelope.channel_name, &envelope.signature)
                .unwrap();
            black_box(rewrite(parsed.kind, &envelope.channel_name, RewriteMarker::MirrorInput))
        })
    });
}

criterion_group!(
    benches,
    bench_parse_envelope,
    bench_verify,
    bench_authorize_and_rewrite
);
criterion_main!(benches);
