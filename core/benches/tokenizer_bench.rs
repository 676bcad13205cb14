use criterion::{criterion_group, criterion_main, Criterion};
use lawpy_core::tokenizer::{keywords, normalize};
use lawpy_core::{Indexer, SourceDocument, StopwordSet};

const OPINION: &str = "The trial court awarded sole legal and physical custody of the minor child to the \
mother, finding that the father's repeated DUI convictions posed a risk to the child's welfare. \
On appeal, the father contends the court abused its discretion by failing to consider the \
child's preference and the stability of his new household. See In re Marriage of Smith, \
123 P.3d 456 (Colo. App. 2005); <i>Jones v. Jones</i>, 98 N.W.2d 12. Available at \
https://www.courtlistener.com/opinion/12345/. We affirm the custody determination but remand \
for recalculation of child support consistent with the statutory guidelines.";

fn bench_normalize(c: &mut Criterion) {
    let text = OPINION.repeat(20);
    c.bench_function("normalize_opinion", |b| b.iter(|| normalize(&text)));
}

fn bench_keywords(c: &mut Criterion) {
    let text = OPINION.repeat(20);
    let stop = StopwordSet::legal();
    c.bench_function("keywords_opinion", |b| b.iter(|| keywords(&text, &stop)));
}

fn bench_index_batch(c: &mut Criterion) {
    let indexer = Indexer::default();
    let docs: Vec<SourceDocument> = (0..100).map(|i| SourceDocument::new(format!("op{i}"), OPINION)).collect();
    c.bench_function("index_batch_100", |b| b.iter(|| indexer.index_batch(&docs)));
}

criterion_group!(benches, bench_normalize, bench_keywords, bench_index_batch);
criterion_main!(benches);
