//! Пакетная индексация: документы шардируются по воркерам с приватными
//! картами, карты сливаются попарной редукцией, итог выкладывается в общий
//! индекс небольшими кусками под короткими write-блокировками.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::thread;

use croaring::Bitmap;

use crate::gram::{KeyScratch, Keyer};
use crate::index::{Document, Index};

/// Меньше этого — один воркер: планирование дороже самой работы.
const SINGLE_WORKER_BELOW: usize = 100;
/// Сколько ключей выкладываем в общий индекс под одной блокировкой.
const MERGE_CHUNK_KEYS: usize = 1000;

/// Аккумулятор документов; flush() запускает параллельную обработку.
/// Состояние индекса после flush такое же, как после последовательного
/// add тех же документов.
pub struct IndexBatch<'a> {
    index: &'a Index,
    docs: Vec<Document>,
}

impl<'a> IndexBatch<'a> {
    pub(crate) fn new(index: &'a Index) -> Self {
        IndexBatch {
            index,
            docs: Vec::new(),
        }
    }

    pub(crate) fn with_capacity(index: &'a Index, capacity: usize) -> Self {
        IndexBatch {
            index,
            docs: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, id: u32, text: impl Into<String>) {
        self.docs.push(Document {
            id,
            text: text.into(),
        });
    }

    pub fn add_document(&mut self, doc: Document) {
        self.docs.push(doc);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Обрабатывает накопленное; число воркеров — по числу CPU хоста.
    pub fn flush(&mut self) {
        self.flush_with_workers(0);
    }

    /// workers == 0 — взять число CPU. Число воркеров зажимается в
    /// [1, количество документов].
    pub fn flush_with_workers(&mut self, workers: usize) {
        let docs = std::mem::take(&mut self.docs);
        if docs.is_empty() {
            return;
        }

        let mut workers = if workers == 0 { default_workers() } else { workers };
        workers = workers.clamp(1, docs.len());
        if docs.len() < SINGLE_WORKER_BELOW {
            workers = 1;
        }

        let keyer = self.index.keyer();
        let chunk_len = docs.len().div_ceil(workers);
        let locals: Vec<HashMap<u64, Bitmap>> = thread::scope(|s| {
            let handles: Vec<_> = docs
                .chunks(chunk_len)
                .map(|chunk| s.spawn(move || index_chunk(keyer, chunk)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("indexing worker panicked"))
                .collect()
        });

        let merged = merge_pairwise(locals);
        tracing::debug!(
            docs = docs.len(),
            workers,
            keys = merged.len(),
            "batch flush merged"
        );
        self.fold_into_index(merged);
    }

    /// Выкладываем слитую карту кусками: читатели успевают взять блокировку
    /// между кусками, а память локальной карты освобождается по ходу.
    fn fold_into_index(&self, mut merged: HashMap<u64, Bitmap>) {
        let keys: Vec<u64> = merged.keys().copied().collect();
        for chunk in keys.chunks(MERGE_CHUNK_KEYS) {
            let mut map = self.index.bitmaps().write();
            for key in chunk {
                if let Some(local) = merged.remove(key) {
                    match map.entry(*key) {
                        Entry::Occupied(mut e) => e.get_mut().or_inplace(&local),
                        Entry::Vacant(v) => {
                            v.insert(local);
                        }
                    }
                }
            }
        }
    }
}

fn default_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Воркер: приватная карта ключ → битмап; scratch-буферы переиспользуются
/// между документами чанка.
fn index_chunk(keyer: &Keyer, docs: &[Document]) -> HashMap<u64, Bitmap> {
    let mut local: HashMap<u64, Bitmap> = HashMap::new();
    let mut scratch = KeyScratch::default();
    for doc in docs {
        for &key in keyer.doc_keys(&doc.text, &mut scratch) {
            local.entry(key).or_insert_with(Bitmap::new).add(doc.id);
        }
    }
    local
}

/// Попарная редукция: на каждом раунде соседние карты сливаются параллельно,
/// популяция уменьшается вдвое, пока не останется одна.
fn merge_pairwise(mut locals: Vec<HashMap<u64, Bitmap>>) -> HashMap<u64, Bitmap> {
    while locals.len() > 1 {
        let mut pairs = Vec::with_capacity(locals.len() / 2);
        let mut carry = None;
        let mut it = locals.into_iter();
        while let Some(a) = it.next() {
            match it.next() {
                Some(b) => pairs.push((a, b)),
                None => carry = Some(a),
            }
        }

        let mut next: Vec<HashMap<u64, Bitmap>> = thread::scope(|s| {
            let handles: Vec<_> = pairs
                .into_iter()
                .map(|(a, b)| s.spawn(move || merge_maps(a, b)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("merge worker panicked"))
                .collect()
        });
        next.extend(carry);
        locals = next;
    }
    locals.into_iter().next().unwrap_or_default()
}

/// OR-объединение под общими ключами; уникальные записи переезжают по
/// значению, без копий. Меньшая карта вливается в большую.
fn merge_maps(mut dst: HashMap<u64, Bitmap>, src: HashMap<u64, Bitmap>) -> HashMap<u64, Bitmap> {
    if dst.len() < src.len() {
        return merge_maps(src, dst);
    }
    for (key, bm) in src {
        match dst.entry(key) {
            Entry::Occupied(mut e) => e.get_mut().or_inplace(&bm),
            Entry::Vacant(v) => {
                v.insert(bm);
            }
        }
    }
    dst
}
