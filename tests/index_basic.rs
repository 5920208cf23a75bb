use std::sync::Arc;

use gramdex::{Index, Normalizer};

#[test]
fn search_and_or() {
    let idx = Index::new(3);
    idx.add(1, "Hello World");
    idx.add(2, "Hello there");
    idx.add(3, "World peace");

    assert!(idx.ngram_count() > 0);
    assert_eq!(idx.search("hello"), vec![1, 2]);
    assert_eq!(idx.search("world"), vec![1, 3]);
    // OR: хотя бы одна n-грамма запроса
    assert_eq!(idx.search_any("hello world"), vec![1, 2, 3]);
    assert_eq!(idx.search_any_count("hello world"), 3);
}

#[test]
fn search_counts() {
    let idx = Index::new(3);
    idx.add(1, "hello world");
    idx.add(2, "hello there");

    assert_eq!(idx.search_count("hello"), 2);
    assert_eq!(idx.search_count("world"), 1);
    assert_eq!(idx.search_count("missing"), 0);
}

#[test]
fn search_threshold_scores() {
    let idx = Index::new(3);
    idx.add(1, "hello world");
    idx.add(2, "hello there");
    idx.add(3, "goodbye world");

    // у "hello" три граммы: hel, ell, llo; обе единицы и двойки несут все три
    let result = idx.search_threshold("hello", 2);
    assert_eq!(result.doc_ids, vec![1, 2]);
    assert_eq!(result.scores[&1], 3);
    assert_eq!(result.scores[&2], 3);

    // порог зажимается числом найденных ключей
    let clamped = idx.search_threshold("hello", 100);
    assert_eq!(clamped.doc_ids, vec![1, 2]);

    assert!(idx.search_threshold("hello", 0).doc_ids.is_empty());
}

#[test]
fn threshold_orders_by_score_then_id() {
    let idx = Index::new(3);
    idx.add(10, "abcdef");
    idx.add(5, "abcd");
    idx.add(7, "abcdef");

    // запрос "abcdef": doc 5 несёт только abc/bcd, десятка и семёрка — все
    let result = idx.search_threshold("abcdef", 1);
    assert_eq!(result.doc_ids, vec![7, 10, 5]);
    assert!(result.scores[&7] > result.scores[&5]);
}

#[test]
fn cjk_bigrams() {
    let idx = Index::new(2);
    idx.add(1, "東京都");
    idx.add(2, "京都府");
    idx.add(3, "大阪府");

    assert_eq!(idx.search("京都"), vec![1, 2]);
    assert_eq!(idx.search("府庁"), Vec::<u32>::new());
}

#[test]
fn search_with_limit_ascending_head() {
    let idx = Index::new(3);
    for i in 1..=5u32 {
        idx.add(i, &format!("hello doc number {i}"));
    }

    let head = idx.search_with_limit("hello", 2);
    assert_eq!(head, vec![1, 2]);

    assert!(idx.search_with_limit("hello", 0).is_empty());
    // лимит больше результата — отдаём всё
    assert_eq!(idx.search_with_limit("hello", 50).len(), 5);
    assert!(idx.search_with_limit("nothing here", 3).is_empty());
}

#[test]
fn search_callback_early_exit() {
    let idx = Index::new(3);
    for i in 1..=5u32 {
        idx.add(i, &format!("hello doc number {i}"));
    }

    let mut seen = Vec::new();
    let completed = idx.search_callback("hello", |doc_id| {
        seen.push(doc_id);
        seen.len() < 2
    });
    assert!(!completed);
    assert_eq!(seen, vec![1, 2]);

    let mut all = Vec::new();
    assert!(idx.search_callback("hello", |doc_id| {
        all.push(doc_id);
        true
    }));
    assert_eq!(all, vec![1, 2, 3, 4, 5]);

    // пустой запрос — обход "завершён", callback не звался
    assert!(idx.search_callback("", |_| panic!("must not be called")));
}

#[test]
fn add_search_substring_consistency() {
    let idx = Index::new(3);
    let text = "Hello World 42";
    idx.add(9, text);

    // любая подстрока нормализованного текста длиной >= 3 находит документ
    let normalized: Vec<char> = Normalizer::default().normalize(text).chars().collect();
    for start in 0..normalized.len() {
        for end in (start + 3)..=normalized.len() {
            let sub: String = normalized[start..end].iter().collect();
            assert!(
                idx.search(&sub).contains(&9),
                "substring {sub:?} lost the document"
            );
            assert!(idx.search_any(&sub).contains(&9));
        }
    }
}

#[test]
fn remove_is_idempotent() {
    let idx = Index::new(3);
    idx.add(1, "hello world");
    idx.add(2, "hello there");

    let before = idx.search("hello");

    idx.remove(42); // никогда не добавлялся
    assert_eq!(idx.search("hello"), before);

    idx.remove(2);
    assert_eq!(idx.search("hello"), vec![1]);
    idx.remove(2); // повторно — ничего не меняет
    assert_eq!(idx.search("hello"), vec![1]);
}

#[test]
fn remove_drops_empty_bitmaps() {
    let idx = Index::new(3);
    idx.add(1, "unique");
    assert!(idx.ngram_count() > 0);
    idx.remove(1);
    assert_eq!(idx.ngram_count(), 0);
}

#[test]
fn clear_resets() {
    let idx = Index::new(3);
    idx.add(1, "hello world");
    idx.clear();
    assert_eq!(idx.ngram_count(), 0);
    assert!(idx.search("hello").is_empty());
}

#[test]
fn gram_size_clamps() {
    assert_eq!(Index::new(0).gram_size(), 3);
    assert_eq!(Index::new(9).gram_size(), 8);
    assert_eq!(Index::new(100).gram_size(), 8);
    assert_eq!(Index::new(1).gram_size(), 1);
}

#[test]
fn short_and_empty_queries() {
    let idx = Index::new(3);
    idx.add(1, "hello");

    assert!(idx.search("").is_empty());
    assert!(idx.search("he").is_empty());
    assert!(idx.search_any("he").is_empty());
    assert_eq!(idx.search_count("he"), 0);
    assert!(idx.search_threshold("he", 1).doc_ids.is_empty());

    // документ короче n-граммы не индексируется
    idx.add(2, "ab");
    assert!(idx.search("ab").is_empty());
}

#[test]
fn repeated_grams_deduplicate() {
    let idx = Index::new(2);
    idx.add(1, "aaaa");

    // "aaaa" даёт единственную биграмму "aa"
    assert_eq!(idx.ngram_count(), 1);
    assert_eq!(idx.search("aaaa"), vec![1]);
    assert_eq!(idx.search("aa"), vec![1]);
    // повторные окна запроса не меняют результата
    assert_eq!(idx.search_any_count("aaaaaaaa"), 1);
}

#[test]
fn re_add_merges_postings() {
    let idx = Index::new(3);
    idx.add(1, "hello");
    idx.add(1, "world");

    assert_eq!(idx.search("hello"), vec![1]);
    assert_eq!(idx.search("world"), vec![1]);
}

#[test]
fn lowercase_normalizer_keeps_separators() {
    let idx = Index::with_normalizer(3, Normalizer::Lowercase);
    idx.add(1, "Hello World");

    // пробел сохранился, грамма "o w" существует
    assert_eq!(idx.search("o w"), vec![1]);
    // а у alphanumeric-нормализатора её нет
    let alnum = Index::new(3);
    alnum.add(1, "Hello World");
    assert!(alnum.search("o w").is_empty());
    assert_eq!(alnum.search("owo"), vec![1]);
}

#[test]
fn custom_normalizer() {
    let idx = Index::with_normalizer(
        3,
        Normalizer::Custom(Arc::new(|s: &str| s.to_uppercase())),
    );
    idx.add(1, "hello");

    assert_eq!(idx.search("HELLO"), vec![1]);
    assert_eq!(idx.search("hello"), vec![1]); // запрос нормализуется так же
}

#[test]
fn unicode_mixed_with_ascii() {
    let idx = Index::new(3);
    idx.add(1, "naïve approach");
    idx.add(2, "naive approach");

    // "naïve" не-ASCII: окна с ï хэшируются, но согласованно
    assert_eq!(idx.search("naïve"), vec![1]);
    assert_eq!(idx.search("naive"), vec![2]);
    assert_eq!(idx.search("approach"), vec![1, 2]);
}
