//! Резидентный инвертированный индекс: ключ n-граммы → roaring-битмап
//! документов. Один писатель / много читателей; блокировка держится на время
//! одного публичного вызова.

use std::borrow::Borrow;
use std::collections::HashMap;

use croaring::Bitmap;
use parking_lot::RwLock;

use crate::batch::IndexBatch;
use crate::gram::{KeyScratch, Keyer};
use crate::normalizer::Normalizer;

/// Документ для пакетной индексации.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: u32,
    pub text: String,
}

/// Результат порогового поиска: какие документы прошли порог и сколько
/// n-грамм запроса совпало на каждом.
#[derive(Debug, Default, Clone)]
pub struct SearchResult {
    /// Счёт по убыванию, при равенстве doc id по возрастанию.
    pub doc_ids: Vec<u32>,
    pub scores: HashMap<u32, usize>,
}

#[derive(Debug)]
pub struct Index {
    keyer: Keyer,
    bitmaps: RwLock<HashMap<u64, Bitmap>>,
}

impl Index {
    /// Индекс с нормализатором по умолчанию (lowercase + alphanumeric).
    /// Размер граммы зажимается: 0 → 3, больше 8 → 8.
    pub fn new(gram_size: usize) -> Self {
        Self::with_normalizer(gram_size, Normalizer::default())
    }

    pub fn with_normalizer(gram_size: usize, normalizer: Normalizer) -> Self {
        Index {
            keyer: Keyer::new(gram_size, normalizer),
            bitmaps: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn from_parts(keyer: Keyer, bitmaps: HashMap<u64, Bitmap>) -> Self {
        Index {
            keyer,
            bitmaps: RwLock::new(bitmaps),
        }
    }

    pub(crate) fn keyer(&self) -> &Keyer {
        &self.keyer
    }

    pub(crate) fn bitmaps(&self) -> &RwLock<HashMap<u64, Bitmap>> {
        &self.bitmaps
    }

    pub fn gram_size(&self) -> usize {
        self.keyer.gram_size()
    }

    /// Число уникальных n-грамм в индексе.
    pub fn ngram_count(&self) -> usize {
        self.bitmaps.read().len()
    }

    /// Индексирует документ: одна вставка на каждый уникальный ключ текста,
    /// сколько бы раз n-грамма ни повторялась.
    pub fn add(&self, doc_id: u32, text: &str) {
        let mut scratch = KeyScratch::default();
        let keys = self.keyer.doc_keys(text, &mut scratch);
        if keys.is_empty() {
            return;
        }
        let mut map = self.bitmaps.write();
        for &key in keys {
            map.entry(key).or_insert_with(Bitmap::new).add(doc_id);
        }
    }

    /// Удаляет документ из всех битмапов; опустевшие записи выбрасываются.
    /// O(числа ключей индекса).
    pub fn remove(&self, doc_id: u32) {
        let mut map = self.bitmaps.write();
        map.retain(|_, bm| {
            bm.remove(doc_id);
            !bm.is_empty()
        });
    }

    pub fn clear(&self) {
        self.bitmaps.write().clear();
    }

    /// Аккумулятор для параллельной пакетной индексации.
    pub fn batch(&self) -> IndexBatch<'_> {
        IndexBatch::new(self)
    }

    pub fn batch_with_capacity(&self, capacity: usize) -> IndexBatch<'_> {
        IndexBatch::with_capacity(self, capacity)
    }

    /// AND: документы, содержащие все n-граммы запроса. Отсутствие любой
    /// n-граммы в индексе обнуляет результат. Doc id по возрастанию.
    pub fn search(&self, query: &str) -> Vec<u32> {
        let keys = self.keyer.query_keys(query);
        if keys.is_empty() {
            return Vec::new();
        }
        let map = self.bitmaps.read();
        match collect_required(&map, &keys) {
            Some(bms) if bms.len() == 1 => bms[0].to_vec(),
            Some(bms) => and_sorted(bms).to_vec(),
            None => Vec::new(),
        }
    }

    /// Кардинальность AND без материализации результата.
    pub fn search_count(&self, query: &str) -> u64 {
        let keys = self.keyer.query_keys(query);
        if keys.is_empty() {
            return 0;
        }
        let map = self.bitmaps.read();
        match collect_required(&map, &keys) {
            Some(bms) if bms.len() == 1 => bms[0].cardinality(),
            Some(bms) => and_sorted(bms).cardinality(),
            None => 0,
        }
    }

    /// AND с ранним выходом: обходим наименьший битмап по возрастанию id,
    /// кандидата проверяем членством в остальных. Дешевле полного
    /// пересечения, когда нужна только голова результата.
    pub fn search_with_limit(&self, query: &str, limit: usize) -> Vec<u32> {
        if limit == 0 {
            return Vec::new();
        }
        let keys = self.keyer.query_keys(query);
        if keys.is_empty() {
            return Vec::new();
        }
        let map = self.bitmaps.read();
        let Some(mut bitmaps) = collect_required(&map, &keys) else {
            return Vec::new();
        };
        bitmaps.sort_by_key(|bm| bm.cardinality());
        let smallest = bitmaps[0];
        let rest = &bitmaps[1..];

        let mut out = Vec::with_capacity(limit);
        for doc_id in smallest.iter() {
            if rest.iter().all(|bm| bm.contains(doc_id)) {
                out.push(doc_id);
                if out.len() == limit {
                    break;
                }
            }
        }
        out
    }

    /// Тот же обход, что у search_with_limit, но через callback: id подаются
    /// по возрастанию, false из callback останавливает обход. Возвращает
    /// true, если обход дошёл до конца.
    pub fn search_callback(&self, query: &str, mut f: impl FnMut(u32) -> bool) -> bool {
        let keys = self.keyer.query_keys(query);
        if keys.is_empty() {
            return true;
        }
        let map = self.bitmaps.read();
        let Some(mut bitmaps) = collect_required(&map, &keys) else {
            return true;
        };
        bitmaps.sort_by_key(|bm| bm.cardinality());
        let smallest = bitmaps[0];
        let rest = &bitmaps[1..];

        for doc_id in smallest.iter() {
            if rest.iter().all(|bm| bm.contains(doc_id)) && !f(doc_id) {
                return false;
            }
        }
        true
    }

    /// OR: документы хотя бы с одной n-граммой запроса; отсутствующие ключи
    /// не вносят ничего.
    pub fn search_any(&self, query: &str) -> Vec<u32> {
        self.union_of(query).to_vec()
    }

    pub fn search_any_count(&self, query: &str) -> u64 {
        self.union_of(query).cardinality()
    }

    fn union_of(&self, query: &str) -> Bitmap {
        let mut acc = Bitmap::new();
        let keys = self.keyer.query_keys(query);
        if keys.is_empty() {
            return acc;
        }
        let map = self.bitmaps.read();
        for key in &keys {
            if let Some(bm) = map.get(key) {
                acc.or_inplace(bm);
            }
        }
        acc
    }

    /// Документы, на которых совпало не меньше threshold n-грамм запроса;
    /// порог зажимается числом реально найденных ключей.
    pub fn search_threshold(&self, query: &str, threshold: usize) -> SearchResult {
        if threshold == 0 {
            return SearchResult::default();
        }
        let keys = self.keyer.query_keys(query);
        if keys.is_empty() {
            return SearchResult::default();
        }
        let map = self.bitmaps.read();
        let found: Vec<&Bitmap> = keys.iter().filter_map(|k| map.get(k)).collect();
        threshold_result(&found, threshold)
    }
}

fn collect_required<'m>(map: &'m HashMap<u64, Bitmap>, keys: &[u64]) -> Option<Vec<&'m Bitmap>> {
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        out.push(map.get(key)?);
    }
    Some(out)
}

/// Пересечение в порядке возрастания кардинальности: бегущий результат
/// схлопывается как можно раньше. Сортировка stable — при равной
/// кардинальности порядок появления ключей сохраняется. Ожидает >= 2 битмапа.
pub(crate) fn and_sorted<B: Borrow<Bitmap>>(mut bitmaps: Vec<B>) -> Bitmap {
    bitmaps.sort_by_key(|bm| bm.borrow().cardinality());
    let mut acc = bitmaps[0].borrow().and(bitmaps[1].borrow());
    for bm in &bitmaps[2..] {
        if acc.is_empty() {
            break;
        }
        acc.and_inplace(bm.borrow());
    }
    acc
}

/// Свёртка порогового поиска, общая для резидентного и кэшированного
/// индексов: счётчик на документ по всем найденным битмапам.
pub(crate) fn threshold_result<B: Borrow<Bitmap>>(bitmaps: &[B], threshold: usize) -> SearchResult {
    if bitmaps.is_empty() {
        return SearchResult::default();
    }
    let threshold = threshold.min(bitmaps.len());

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for bm in bitmaps {
        for doc_id in bm.borrow().iter() {
            *counts.entry(doc_id).or_insert(0) += 1;
        }
    }

    let mut doc_ids = Vec::new();
    let mut scores = HashMap::new();
    for (&doc_id, &count) in &counts {
        if count >= threshold {
            doc_ids.push(doc_id);
            scores.insert(doc_id, count);
        }
    }
    doc_ids.sort_by(|a, b| scores[b].cmp(&scores[a]).then(a.cmp(b)));

    SearchResult { doc_ids, scores }
}
