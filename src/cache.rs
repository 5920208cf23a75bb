//! Дисковый индекс с ленивой загрузкой битмапов.
//!
//! При открытии читается только каталог ключей: смещение и размер каждой
//! записи, сами битмапы пропускаются seek-ом. Загруженные битмапы живут в
//! LRU с бюджетом либо по числу записей, либо по байтам; байтовый бюджет
//! имеет приоритет, если заданы оба.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use croaring::{Bitmap, Portable};
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::StorageError;
use crate::gram::Keyer;
use crate::index::{and_sorted, threshold_result, SearchResult};
use crate::normalizer::Normalizer;
use crate::storage;

const DEFAULT_CACHE_ENTRIES: usize = 1000;

/// Настройки открытия кэшированного индекса.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Максимум записей в LRU, если байтовый бюджет не задан.
    pub cache_entries: usize,
    /// Байтовый бюджет кэша; имеет приоритет над cache_entries.
    pub memory_budget: Option<u64>,
    /// Обязан совпадать с нормализатором, которым строился индекс.
    pub normalizer: Normalizer,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            cache_entries: DEFAULT_CACHE_ENTRIES,
            memory_budget: None,
            normalizer: Normalizer::default(),
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_entries(mut self, n: usize) -> Self {
        if n > 0 {
            self.cache_entries = n;
        }
        self
    }

    pub fn memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct GramLocation {
    /// Смещение начала сериализованного битмапа в файле.
    offset: u64,
    size: u32,
}

#[derive(Debug, Clone, Copy)]
enum Budget {
    Entries(usize),
    Bytes(u64),
}

#[derive(Debug)]
struct CacheState {
    file: File,
    lru: LruCache<u64, Arc<Bitmap>>,
    /// Суммарная учтённая стоимость загруженных битмапов.
    bytes: u64,
}

/// Дисковый вариант индекса с теми же поисковыми примитивами, что у
/// резидентного. Каталог после открытия неизменяем; LRU и файл — под
/// мьютексом, который берётся по разу на ключ и отпускается между ключами.
#[derive(Debug)]
pub struct CachedIndex {
    keyer: Keyer,
    budget: Budget,
    directory: HashMap<u64, GramLocation>,
    state: Mutex<CacheState>,
}

impl CachedIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open_with(path, CacheOptions::default())
    }

    /// Читает заголовок и строит каталог; ни один битмап при открытии не
    /// загружается.
    pub fn open_with<P: AsRef<Path>>(path: P, opts: CacheOptions) -> Result<Self, StorageError> {
        let mut r = BufReader::new(File::open(path.as_ref())?);
        let gram_size = storage::read_header(&mut r)?;
        let count = storage::read_u32(&mut r)?;
        if count > storage::MAX_NGRAM_COUNT {
            return Err(StorageError::InvalidCount(count));
        }

        let mut directory = HashMap::with_capacity(count as usize);
        // header (8) + count (4)
        let mut cursor: u64 = 12;
        for _ in 0..count {
            let key = storage::read_u64(&mut r)?;
            let size = storage::read_u32(&mut r)?;
            if size > storage::MAX_BITMAP_BYTES {
                return Err(StorageError::InvalidSize(size));
            }
            cursor += 12;
            directory.insert(key, GramLocation { offset: cursor, size });
            r.seek_relative(i64::from(size))?;
            cursor += u64::from(size);
        }

        let budget = match opts.memory_budget {
            Some(bytes) => Budget::Bytes(bytes),
            None => Budget::Entries(opts.cache_entries.max(1)),
        };

        Ok(CachedIndex {
            keyer: Keyer::new(gram_size as usize, opts.normalizer),
            budget,
            directory,
            state: Mutex::new(CacheState {
                file: r.into_inner(),
                lru: LruCache::unbounded(),
                bytes: 0,
            }),
        })
    }

    pub fn gram_size(&self) -> usize {
        self.keyer.gram_size()
    }

    /// Число n-грамм в каталоге (не в кэше).
    pub fn ngram_count(&self) -> usize {
        self.directory.len()
    }

    /// Число загруженных битмапов.
    pub fn cache_size(&self) -> usize {
        self.state.lock().lru.len()
    }

    /// Суммарная учтённая стоимость кэша в байтах.
    pub fn memory_usage(&self) -> u64 {
        self.state.lock().bytes
    }

    /// Сбрасывает LRU и байтовый счётчик атомарно.
    pub fn clear_cache(&self) {
        let mut st = self.state.lock();
        st.lru.clear();
        st.bytes = 0;
    }

    /// Есть ли n-грамма в каталоге, без загрузки битмапа. Строка должна быть
    /// ровно из gram_size code points; нормализация не применяется.
    pub fn has_ngram(&self, gram: &str) -> bool {
        match self.keyer.exact_key(gram) {
            Some(key) => self.directory.contains_key(&key),
            None => false,
        }
    }

    /// Уникальные ключи запроса — в том виде, в каком их ждёт preload_keys.
    pub fn query_keys(&self, query: &str) -> Vec<u64> {
        self.keyer.query_keys(query)
    }

    /// Прогрев кэша перечисленными ключами. Ключи, которых нет в каталоге,
    /// игнорируются; ошибка чтения известного ключа возвращается наружу.
    pub fn preload_keys(&self, keys: &[u64]) -> Result<(), StorageError> {
        for &key in keys {
            self.lookup(key)?;
        }
        Ok(())
    }

    /// AND: отсутствие любой n-граммы запроса обнуляет результат.
    pub fn search(&self, query: &str) -> Vec<u32> {
        let Some(bitmaps) = self.required_bitmaps(query) else {
            return Vec::new();
        };
        if bitmaps.len() == 1 {
            return bitmaps[0].to_vec();
        }
        and_sorted(bitmaps).to_vec()
    }

    pub fn search_count(&self, query: &str) -> u64 {
        let Some(bitmaps) = self.required_bitmaps(query) else {
            return 0;
        };
        if bitmaps.len() == 1 {
            return bitmaps[0].cardinality();
        }
        and_sorted(bitmaps).cardinality()
    }

    /// AND с ранним выходом, как у резидентного индекса.
    pub fn search_with_limit(&self, query: &str, limit: usize) -> Vec<u32> {
        if limit == 0 {
            return Vec::new();
        }
        let Some(mut bitmaps) = self.required_bitmaps(query) else {
            return Vec::new();
        };
        bitmaps.sort_by_key(|bm| bm.cardinality());
        let smallest = &bitmaps[0];
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

    /// Callback-обход подтверждённых совпадений по возрастанию id; false
    /// из callback останавливает обход. true — обход дошёл до конца.
    pub fn search_callback(&self, query: &str, mut f: impl FnMut(u32) -> bool) -> bool {
        let Some(mut bitmaps) = self.required_bitmaps(query) else {
            return true;
        };
        bitmaps.sort_by_key(|bm| bm.cardinality());
        let smallest = &bitmaps[0];
        let rest = &bitmaps[1..];

        for doc_id in smallest.iter() {
            if rest.iter().all(|bm| bm.contains(doc_id)) && !f(doc_id) {
                return false;
            }
        }
        true
    }

    /// OR по найденным n-граммам запроса.
    pub fn search_any(&self, query: &str) -> Vec<u32> {
        self.union_of(query).to_vec()
    }

    pub fn search_any_count(&self, query: &str) -> u64 {
        self.union_of(query).cardinality()
    }

    fn union_of(&self, query: &str) -> Bitmap {
        let mut acc = Bitmap::new();
        for bm in self.found_bitmaps(query) {
            acc.or_inplace(&bm);
        }
        acc
    }

    /// Порог зажимается числом найденных ключей, как у резидентного индекса.
    pub fn search_threshold(&self, query: &str, threshold: usize) -> SearchResult {
        if threshold == 0 {
            return SearchResult::default();
        }
        let found = self.found_bitmaps(query);
        threshold_result(&found, threshold)
    }

    /// Все битмапы запроса; None, если запрос короткий или хотя бы один
    /// ключ отсутствует.
    fn required_bitmaps(&self, query: &str) -> Option<Vec<Arc<Bitmap>>> {
        let keys = self.keyer.query_keys(query);
        if keys.is_empty() {
            return None;
        }
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get_bitmap(key)?);
        }
        Some(out)
    }

    fn found_bitmaps(&self, query: &str) -> Vec<Arc<Bitmap>> {
        self.keyer
            .query_keys(query)
            .into_iter()
            .filter_map(|key| self.get_bitmap(key))
            .collect()
    }

    /// Сбой загрузки приравнивается к отсутствию ключа: AND схлопнется в
    /// пусто, OR пропустит. Ошибка остаётся в логе, наружу не выходит.
    fn get_bitmap(&self, key: u64) -> Option<Arc<Bitmap>> {
        match self.lookup(key) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to load gram bitmap, treating as absent");
                None
            }
        }
    }

    /// Ok(None) — ключа нет в каталоге; попадание двигает запись в голову LRU.
    fn lookup(&self, key: u64) -> Result<Option<Arc<Bitmap>>, StorageError> {
        let Some(loc) = self.directory.get(&key) else {
            return Ok(None);
        };

        let mut evicted: Vec<Arc<Bitmap>> = Vec::new();
        let out = {
            let mut st = self.state.lock();
            if let Some(bm) = st.lru.get(&key) {
                bm.clone()
            } else {
                let bm = Arc::new(load_bitmap(&mut st.file, *loc)?);
                self.admit(&mut st, key, bm.clone(), loc.size, &mut evicted);
                bm
            }
        };
        // вытесненные битмапы умирают уже после отпускания блокировки
        drop(evicted);
        Ok(Some(out))
    }

    /// Вытеснение хвоста до вместимости. В байтовом режиме одиночная запись
    /// крупнее всего бюджета допускается: после вытеснения остальных она
    /// остаётся единственной, даже превышая бюджет.
    fn admit(
        &self,
        st: &mut CacheState,
        key: u64,
        bm: Arc<Bitmap>,
        size: u32,
        evicted: &mut Vec<Arc<Bitmap>>,
    ) {
        let cost = u64::from(size);
        match self.budget {
            Budget::Entries(cap) => {
                while st.lru.len() >= cap {
                    match st.lru.pop_lru() {
                        Some((old_key, old)) => {
                            st.bytes = st.bytes.saturating_sub(self.entry_cost(old_key));
                            evicted.push(old);
                        }
                        None => break,
                    }
                }
            }
            Budget::Bytes(budget) => {
                while st.bytes + cost > budget && !st.lru.is_empty() {
                    if let Some((old_key, old)) = st.lru.pop_lru() {
                        st.bytes = st.bytes.saturating_sub(self.entry_cost(old_key));
                        evicted.push(old);
                    }
                }
            }
        }
        st.lru.push(key, bm);
        st.bytes += cost;
    }

    /// Стоимость записи — её сериализованный размер из каталога; одна и та
    /// же величина на допуске и на вытеснении.
    fn entry_cost(&self, key: u64) -> u64 {
        self.directory
            .get(&key)
            .map(|loc| u64::from(loc.size))
            .unwrap_or(0)
    }
}

fn load_bitmap(file: &mut File, loc: GramLocation) -> Result<Bitmap, StorageError> {
    file.seek(SeekFrom::Start(loc.offset))?;
    let mut payload = vec![0u8; loc.size as usize];
    storage::read_exact(file, &mut payload)?;
    Bitmap::try_deserialize::<Portable>(&payload).ok_or(StorageError::DeserializationFailed)
}
