use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gramdex::Index;

const WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel",
    "india", "juliet", "kilo", "lima", "mike", "november", "oscar", "papa",
    "quebec", "romeo", "sierra", "tango", "uniform", "victor", "whiskey",
    "xray", "yankee", "zulu",
];

fn corpus(n: usize) -> Vec<(u32, String)> {
    (0..n)
        .map(|i| {
            let a = WORDS[i % WORDS.len()];
            let b = WORDS[(i * 7 + 3) % WORDS.len()];
            let c = WORDS[(i * 13 + 11) % WORDS.len()];
            (i as u32, format!("{a} {b} {c} entry {i}"))
        })
        .collect()
}

fn built_index(docs: &[(u32, String)]) -> Index {
    let idx = Index::new(3);
    let mut batch = idx.batch_with_capacity(docs.len());
    for (id, text) in docs {
        batch.add(*id, text.as_str());
    }
    batch.flush();
    idx
}

fn bench_add(c: &mut Criterion) {
    let docs = corpus(10_000);
    c.bench_function("add_serial_10k", |b| {
        b.iter(|| {
            let idx = Index::new(3);
            for (id, text) in &docs {
                idx.add(*id, text);
            }
            black_box(idx.ngram_count())
        })
    });

    c.bench_function("batch_flush_10k", |b| {
        b.iter(|| {
            let idx = Index::new(3);
            let mut batch = idx.batch_with_capacity(docs.len());
            for (id, text) in &docs {
                batch.add(*id, text.as_str());
            }
            batch.flush();
            black_box(idx.ngram_count())
        })
    });
}

fn bench_search(c: &mut Criterion) {
    let docs = corpus(100_000);
    let idx = built_index(&docs);

    c.bench_function("search_and_short", |b| {
        b.iter(|| black_box(idx.search("alpha")))
    });
    c.bench_function("search_and_long", |b| {
        b.iter(|| black_box(idx.search("alpha bravo charlie")))
    });
    c.bench_function("search_count", |b| {
        b.iter(|| black_box(idx.search_count("alpha")))
    });
    c.bench_function("search_any", |b| {
        b.iter(|| black_box(idx.search_any("alpha zulu")))
    });
    c.bench_function("search_with_limit_10", |b| {
        b.iter(|| black_box(idx.search_with_limit("alpha", 10)))
    });
    c.bench_function("search_no_match", |b| {
        b.iter(|| black_box(idx.search("qqqxyz")))
    });
}

criterion_group!(benches, bench_add, bench_search);
criterion_main!(benches);
