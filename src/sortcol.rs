//! Колонка значений для сортировки результатов поиска: плотный массив,
//! индексированный doc id, и выбор top-K ограниченной кучей.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::mem;
use std::path::Path;

use croaring::Bitmap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::atomic_save;

const MIN_GROW: usize = 1024;

/// Пара (документ, значение) в отсортированной выдаче.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortedResult<T> {
    pub doc_id: u32,
    pub value: T,
}

struct ColumnInner<T> {
    values: Vec<T>,
    max_doc_id: u32,
}

/// Типизированная колонка values[doc_id]; не назначенные позиции читаются
/// нулём типа. Годится любой Copy + PartialOrd тип: u16, u64, f64 и т.п.
pub struct SortColumn<T> {
    inner: RwLock<ColumnInner<T>>,
}

impl<T: Copy + Default + PartialOrd> Default for SortColumn<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default + PartialOrd> SortColumn<T> {
    pub fn new() -> Self {
        SortColumn {
            inner: RwLock::new(ColumnInner {
                values: Vec::new(),
                max_doc_id: 0,
            }),
        }
    }

    pub fn set(&self, doc_id: u32, value: T) {
        let mut inner = self.inner.write();
        inner.assign(doc_id, value);
    }

    pub fn get(&self, doc_id: u32) -> T {
        let inner = self.inner.read();
        value_at(&inner.values, doc_id)
    }

    pub fn memory_usage(&self) -> u64 {
        let inner = self.inner.read();
        (inner.values.len() * mem::size_of::<T>()) as u64
    }

    /// Аккумулятор пар (doc, значение): один рост массива и одна
    /// блокировка на flush.
    pub fn batch(&self) -> SortColumnBatch<'_, T> {
        self.batch_with_capacity(1024)
    }

    pub fn batch_with_capacity(&self, capacity: usize) -> SortColumnBatch<'_, T> {
        SortColumnBatch {
            column: self,
            doc_ids: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Сортирует входные doc id по значению. limit == 0 — без ограничения.
    /// При limit < len/4 включается частичная сортировка кучей.
    pub fn sort(&self, doc_ids: &[u32], asc: bool, limit: usize) -> Vec<SortedResult<T>> {
        let inner = self.inner.read();
        sort_ids(&inner.values, doc_ids, asc, limit)
    }

    pub fn sort_desc(&self, doc_ids: &[u32], limit: usize) -> Vec<SortedResult<T>> {
        self.sort(doc_ids, false, limit)
    }

    pub fn sort_bitmap(&self, bm: &Bitmap, asc: bool, limit: usize) -> Vec<SortedResult<T>> {
        if bm.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.read();
        sort_ids(&inner.values, &bm.to_vec(), asc, limit)
    }

    pub fn sort_bitmap_desc(&self, bm: &Bitmap, limit: usize) -> Vec<SortedResult<T>> {
        self.sort_bitmap(bm, false, limit)
    }
}

impl<T: Copy + Default + PartialOrd + Serialize + DeserializeOwned> SortColumn<T> {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), StorageError> {
        let inner = self.inner.read();
        let keep = inner.values.len().min(inner.max_doc_id as usize + 1);
        let data = ColumnData {
            values: inner.values[..keep].to_vec(),
            max_doc_id: inner.max_doc_id,
        };
        bincode::serialize_into(w, &data)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, StorageError> {
        let data: ColumnData<T> = bincode::deserialize_from(r)?;
        Ok(SortColumn {
            inner: RwLock::new(ColumnInner {
                values: data.values,
                max_doc_id: data.max_doc_id,
            }),
        })
    }

    /// Та же атомарная схема, что у индекса и фильтра.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        atomic_save(path.as_ref(), |w| self.write_to(w))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(&mut r)
    }
}

impl<T: Copy + Default> ColumnInner<T> {
    /// Рост с запасом: max(doc_id + 1, len * 5/4, 1024).
    fn assign(&mut self, doc_id: u32, value: T) {
        let needed = doc_id as usize + 1;
        if needed > self.values.len() {
            let grown = self.values.len().saturating_add(self.values.len() / 4);
            let new_len = needed.max(grown).max(MIN_GROW);
            self.values.resize(new_len, T::default());
        }
        self.values[doc_id as usize] = value;
        if doc_id > self.max_doc_id {
            self.max_doc_id = doc_id;
        }
    }
}

/// Сериализуемое представление: хвост массива за max_doc_id не пишем.
#[derive(Serialize, Deserialize)]
struct ColumnData<T> {
    values: Vec<T>,
    max_doc_id: u32,
}

/// Пакетное наполнение колонки.
pub struct SortColumnBatch<'a, T> {
    column: &'a SortColumn<T>,
    doc_ids: Vec<u32>,
    values: Vec<T>,
}

impl<T: Copy + Default + PartialOrd> SortColumnBatch<'_, T> {
    pub fn add(&mut self, doc_id: u32, value: T) {
        self.doc_ids.push(doc_id);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Один рост до максимума пакета, затем присваивания под одной
    /// write-блокировкой.
    pub fn flush(&mut self) {
        if self.doc_ids.is_empty() {
            return;
        }
        let max_id = self.doc_ids.iter().copied().max().unwrap_or(0);

        let mut inner = self.column.inner.write();
        if max_id as usize >= inner.values.len() {
            inner.values.resize(max_id as usize + 1, T::default());
        }
        for (&id, &value) in self.doc_ids.iter().zip(&self.values) {
            inner.values[id as usize] = value;
            if id > inner.max_doc_id {
                inner.max_doc_id = id;
            }
        }

        self.doc_ids.clear();
        self.values.clear();
    }
}

fn value_at<T: Copy + Default>(values: &[T], doc_id: u32) -> T {
    values.get(doc_id as usize).copied().unwrap_or_default()
}

fn sort_ids<T: Copy + Default + PartialOrd>(
    values: &[T],
    doc_ids: &[u32],
    asc: bool,
    limit: usize,
) -> Vec<SortedResult<T>> {
    if doc_ids.is_empty() {
        return Vec::new();
    }

    if limit > 0 && limit < doc_ids.len() / 4 {
        return heap_select(values, doc_ids, asc, limit);
    }

    let mut results: Vec<SortedResult<T>> = doc_ids
        .iter()
        .map(|&id| SortedResult {
            doc_id: id,
            value: value_at(values, id),
        })
        .collect();
    // stable-сортировка: контрактен только порядок значений
    if asc {
        results.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap_or(std::cmp::Ordering::Equal));
    } else {
        results.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(std::cmp::Ordering::Equal));
    }
    if limit > 0 && limit < results.len() {
        results.truncate(limit);
    }
    results
}

/// Ограниченная куча на limit элементов: для asc это max-куча (на вершине
/// худший из удержанных), для desc — min-куча. Кандидат строго лучше
/// вершины вытесняет её с просейкой вниз; в конце куча выбирается с конца,
/// так что лучший элемент оказывается в out[0].
fn heap_select<T: Copy + Default + PartialOrd>(
    values: &[T],
    doc_ids: &[u32],
    asc: bool,
    limit: usize,
) -> Vec<SortedResult<T>> {
    let mut heap: Vec<SortedResult<T>> = Vec::with_capacity(limit);
    for &id in doc_ids {
        let value = value_at(values, id);
        if heap.len() < limit {
            heap.push(SortedResult { doc_id: id, value });
            if heap.len() == limit {
                heapify(&mut heap, asc);
            }
        } else {
            let top = heap[0];
            let better = if asc { value < top.value } else { value > top.value };
            if better {
                heap[0] = SortedResult { doc_id: id, value };
                sift_down(&mut heap, 0, asc);
            }
        }
    }
    if heap.len() < limit {
        heapify(&mut heap, asc);
    }

    let mut out = vec![
        SortedResult {
            doc_id: 0,
            value: T::default(),
        };
        heap.len()
    ];
    for i in (0..out.len()).rev() {
        out[i] = pop_top(&mut heap, asc);
    }
    out
}

/// true, если a должен стоять в куче выше b.
fn heap_above<T: PartialOrd>(a: &SortedResult<T>, b: &SortedResult<T>, asc: bool) -> bool {
    if asc {
        a.value > b.value
    } else {
        a.value < b.value
    }
}

fn heapify<T: Copy + PartialOrd>(heap: &mut [SortedResult<T>], asc: bool) {
    for i in (0..heap.len() / 2).rev() {
        sift_down(heap, i, asc);
    }
}

fn sift_down<T: Copy + PartialOrd>(heap: &mut [SortedResult<T>], mut i: usize, asc: bool) {
    loop {
        let left = 2 * i + 1;
        if left >= heap.len() {
            break;
        }
        let mut child = left;
        let right = left + 1;
        if right < heap.len() && heap_above(&heap[right], &heap[left], asc) {
            child = right;
        }
        if !heap_above(&heap[child], &heap[i], asc) {
            break;
        }
        heap.swap(i, child);
        i = child;
    }
}

fn pop_top<T: Copy + PartialOrd>(heap: &mut Vec<SortedResult<T>>, asc: bool) -> SortedResult<T> {
    let top = heap.swap_remove(0);
    sift_down(heap, 0, asc);
    top
}
