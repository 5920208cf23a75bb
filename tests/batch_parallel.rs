use gramdex::Index;

const WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel",
    "india", "juliet", "kilo", "lima", "mike", "november", "oscar", "papa",
    "quebec", "romeo", "sierra", "tango", "uniform", "victor", "whiskey",
    "xray", "yankee", "zulu", "кошка", "собака", "東京", "大阪",
];

fn corpus(n: usize) -> Vec<(u32, String)> {
    (0..n)
        .map(|i| {
            let a = WORDS[i % WORDS.len()];
            let b = WORDS[(i * 7 + 3) % WORDS.len()];
            (i as u32 + 1, format!("{a} {b} doc {i}"))
        })
        .collect()
}

/// Пакетная сборка обязана давать то же состояние, что последовательный add.
#[test]
fn batch_equals_serial() {
    let docs = corpus(500);

    let serial = Index::new(3);
    for (id, text) in &docs {
        serial.add(*id, text);
    }

    let batched = Index::new(3);
    let mut batch = batched.batch_with_capacity(docs.len());
    for (id, text) in &docs {
        batch.add(*id, text.as_str());
    }
    batch.flush();

    assert_eq!(batched.ngram_count(), serial.ngram_count());
    for query in ["alpha", "doc", "whiskey", "кошка", "東京", "oscar papa"] {
        assert_eq!(batched.search(query), serial.search(query), "AND {query:?}");
        assert_eq!(
            batched.search_any(query),
            serial.search_any(query),
            "OR {query:?}"
        );
        assert_eq!(batched.search_count(query), serial.search_count(query));
    }
    let t1 = batched.search_threshold("alpha bravo", 2);
    let t2 = serial.search_threshold("alpha bravo", 2);
    assert_eq!(t1.doc_ids, t2.doc_ids);
    assert_eq!(t1.scores, t2.scores);
}

#[test]
fn batch_with_pinned_workers() {
    let docs = corpus(240);
    for workers in [1, 2, 4, 16] {
        let serial = Index::new(3);
        for (id, text) in &docs {
            serial.add(*id, text);
        }

        let idx = Index::new(3);
        let mut batch = idx.batch();
        for (id, text) in &docs {
            batch.add(*id, text.as_str());
        }
        batch.flush_with_workers(workers);

        assert_eq!(idx.ngram_count(), serial.ngram_count(), "workers={workers}");
        assert_eq!(idx.search("alpha"), serial.search("alpha"));
    }
}

/// Меньше сотни документов — одиночный воркер, но семантика та же.
#[test]
fn small_batch_single_worker_path() {
    let idx = Index::new(3);
    let mut batch = idx.batch();
    for i in 1..=20u32 {
        batch.add(i, format!("hello number {i}"));
    }
    assert_eq!(batch.len(), 20);
    batch.flush();
    assert!(batch.is_empty());

    assert_eq!(idx.search("hello").len(), 20);
}

#[test]
fn empty_flush_is_noop() {
    let idx = Index::new(3);
    let mut batch = idx.batch();
    batch.flush();
    assert_eq!(idx.ngram_count(), 0);
}

#[test]
fn flush_merges_into_existing_index() {
    let idx = Index::new(3);
    idx.add(1, "hello world");

    let mut batch = idx.batch();
    batch.add(2, "hello there");
    batch.add(1, "hello again"); // та же единица: постинги сливаются
    batch.flush();

    assert_eq!(idx.search("hello"), vec![1, 2]);
    assert_eq!(idx.search("world"), vec![1]);
    assert_eq!(idx.search("again"), vec![1]);
}

#[test]
fn batch_reusable_after_flush() {
    let idx = Index::new(3);
    let mut batch = idx.batch();
    batch.add(1, "first wave");
    batch.flush();
    batch.add(2, "second wave");
    batch.flush();

    assert_eq!(idx.search("wave"), vec![1, 2]);
    assert_eq!(idx.search("second"), vec![2]);
}

/// Конкурентные читатели во время flush видят согласованные срезы и не
/// блокируются на всё время слияния.
#[test]
fn readers_during_flush() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let idx = Index::new(3);
    idx.add(1_000_000, "resident hello");

    let done = AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| {
            // читаем, пока пишется пакет: паник и пустых ответов быть не должно
            while !done.load(Ordering::Relaxed) {
                let hits = idx.search("resident");
                assert!(hits.contains(&1_000_000));
            }
        });

        let mut batch = idx.batch_with_capacity(2000);
        for (id, text) in corpus(2000) {
            batch.add(id, text);
        }
        batch.flush();
        done.store(true, Ordering::Relaxed);
    });

    assert!(idx.search("alpha").len() > 0);
}
