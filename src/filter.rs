//! Категориальный битмап-фильтр: поле × категория → множество документов.
//! Живёт отдельно от индекса; результат поиска дофильтровывается алгеброй
//! битмапов. Персистентность независима от кодека индекса.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::thread;

use croaring::{Bitmap, Portable};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::atomic_save;

/// С этого числа категорий групповые add_many уходят в параллельные потоки.
const PARALLEL_CATEGORIES: usize = 4;

#[derive(Debug, Default)]
pub struct BitmapFilter {
    fields: RwLock<HashMap<String, HashMap<String, Bitmap>>>,
}

impl BitmapFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Помечает документ категорией поля; промежуточные карты создаются
    /// по мере надобности.
    pub fn set(&self, doc_id: u32, field: &str, category: &str) {
        let mut fields = self.fields.write();
        fields
            .entry(field.to_string())
            .or_default()
            .entry(category.to_string())
            .or_insert_with(Bitmap::new)
            .add(doc_id);
    }

    /// Вычищает документ из всех категорий всех полей. O(числа категорий).
    pub fn remove(&self, doc_id: u32) {
        let mut fields = self.fields.write();
        for categories in fields.values_mut() {
            for bm in categories.values_mut() {
                bm.remove(doc_id);
            }
        }
    }

    /// Живая ссылка на битмап категории, только для чтения. None отличает
    /// «такой категории нет» от «категория есть, но битмап пуст».
    pub fn get(&self, field: &str, category: &str) -> Option<MappedRwLockReadGuard<'_, Bitmap>> {
        RwLockReadGuard::try_map(self.fields.read(), |fields| {
            fields.get(field)?.get(category)
        })
        .ok()
    }

    /// OR по перечисленным категориям поля; отсутствующие категории не
    /// вносят ничего, отсутствующее поле даёт пустой битмап.
    pub fn get_any(&self, field: &str, categories: &[&str]) -> Bitmap {
        let fields = self.fields.read();
        let mut acc = Bitmap::new();
        if let Some(cats) = fields.get(field) {
            for name in categories {
                if let Some(bm) = cats.get(*name) {
                    acc.or_inplace(bm);
                }
            }
        }
        acc
    }

    /// Имена категорий поля.
    pub fn categories(&self, field: &str) -> Vec<String> {
        let fields = self.fields.read();
        fields
            .get(field)
            .map(|cats| cats.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Кардинальность каждой категории поля.
    pub fn counts(&self, field: &str) -> HashMap<String, u64> {
        let fields = self.fields.read();
        fields
            .get(field)
            .map(|cats| {
                cats.iter()
                    .map(|(name, bm)| (name.clone(), bm.cardinality()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all_counts(&self) -> HashMap<String, HashMap<String, u64>> {
        let fields = self.fields.read();
        fields
            .iter()
            .map(|(field, cats)| {
                let counts = cats
                    .iter()
                    .map(|(name, bm)| (name.clone(), bm.cardinality()))
                    .collect();
                (field.clone(), counts)
            })
            .collect()
    }

    /// Суммарный сериализованный размер всех битмапов.
    pub fn memory_usage(&self) -> u64 {
        let fields = self.fields.read();
        fields
            .values()
            .flat_map(|cats| cats.values())
            .map(|bm| bm.get_serialized_size_in_bytes::<Portable>() as u64)
            .sum()
    }

    /// Аккумулятор пар (doc, категория) одного поля для пакетной вставки.
    pub fn batch(&self, field: &str) -> FilterBatch<'_> {
        self.batch_with_capacity(field, 1024)
    }

    pub fn batch_with_capacity(&self, field: &str, capacity: usize) -> FilterBatch<'_> {
        FilterBatch {
            filter: self,
            field: field.to_string(),
            doc_ids: Vec::with_capacity(capacity),
            categories: Vec::with_capacity(capacity),
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), StorageError> {
        let fields = self.fields.read();
        let mut data = FilterData {
            fields: HashMap::with_capacity(fields.len()),
        };
        for (field, cats) in fields.iter() {
            let encoded = cats
                .iter()
                .map(|(name, bm)| (name.clone(), bm.serialize::<Portable>()))
                .collect();
            data.fields.insert(field.clone(), encoded);
        }
        bincode::serialize_into(w, &data)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, StorageError> {
        let data: FilterData = bincode::deserialize_from(r)?;
        let mut fields = HashMap::with_capacity(data.fields.len());
        for (field, cats) in data.fields {
            let mut decoded = HashMap::with_capacity(cats.len());
            for (name, payload) in cats {
                let bm = Bitmap::try_deserialize::<Portable>(&payload)
                    .ok_or(StorageError::DeserializationFailed)?;
                decoded.insert(name, bm);
            }
            fields.insert(field, decoded);
        }
        Ok(BitmapFilter {
            fields: RwLock::new(fields),
        })
    }

    /// Та же атомарная схема, что у индекса: <path>.tmp + fsync + rename.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        atomic_save(path.as_ref(), |w| self.write_to(w))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(&mut r)
    }
}

/// Сериализуемое представление: категория → Portable-байты битмапа.
#[derive(Serialize, Deserialize)]
struct FilterData {
    fields: HashMap<String, HashMap<String, Vec<u8>>>,
}

/// Пакетная загрузка одного поля: одна write-блокировка и групповые
/// add_many вместо по-штучных вставок с ростом карт.
pub struct FilterBatch<'a> {
    filter: &'a BitmapFilter,
    field: String,
    doc_ids: Vec<u32>,
    categories: Vec<String>,
}

impl FilterBatch<'_> {
    pub fn add(&mut self, doc_id: u32, category: &str) {
        self.doc_ids.push(doc_id);
        self.categories.push(category.to_string());
    }

    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Три прохода до блокировки: интернирование категорий линейным поиском
    /// (на малом числе категорий быстрее карты), подсчёт на категорию,
    /// раскладка doc id по группам точного размера. Затем add_many под одной
    /// write-блокировкой, параллельно при >= 4 категориях.
    pub fn flush(&mut self) {
        if self.doc_ids.is_empty() {
            return;
        }

        let mut category_list: Vec<String> = Vec::with_capacity(16);
        let mut indices: Vec<usize> = Vec::with_capacity(self.doc_ids.len());
        for cat in &self.categories {
            let idx = match category_list.iter().position(|existing| existing == cat) {
                Some(i) => i,
                None => {
                    category_list.push(cat.clone());
                    category_list.len() - 1
                }
            };
            indices.push(idx);
        }

        let num_cats = category_list.len();
        let mut counts = vec![0usize; num_cats];
        for &idx in &indices {
            counts[idx] += 1;
        }

        let mut groups: Vec<Vec<u32>> = counts.iter().map(|&c| Vec::with_capacity(c)).collect();
        for (i, &idx) in indices.iter().enumerate() {
            groups[idx].push(self.doc_ids[i]);
        }

        let mut fields = self.filter.fields.write();
        let field_map = fields.entry(self.field.clone()).or_default();

        // временно забираем битмапы из карты: каждому потоку — своё владение
        let mut bitmaps: Vec<Bitmap> = category_list
            .iter()
            .map(|cat| field_map.remove(cat).unwrap_or_else(Bitmap::new))
            .collect();

        if num_cats >= PARALLEL_CATEGORIES {
            thread::scope(|s| {
                for (bm, ids) in bitmaps.iter_mut().zip(&groups) {
                    s.spawn(move || bm.add_many(ids));
                }
            });
        } else {
            for (bm, ids) in bitmaps.iter_mut().zip(&groups) {
                bm.add_many(ids);
            }
        }

        for (cat, bm) in category_list.into_iter().zip(bitmaps) {
            field_map.insert(cat, bm);
        }

        self.doc_ids.clear();
        self.categories.clear();
    }
}
