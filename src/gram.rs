//! Нарезка нормализованного текста на n-граммы и упаковка окна в 64-битный
//! ключ. Три режима кодирования:
//!
//! - n <= 2 — по 32 бита на code point, без коллизий для всего Unicode;
//! - n = 3..8, все символы окна ASCII — по 8 бит на символ, без коллизий;
//! - иначе — FNV-1a по четырём байтам каждого code point. Малый риск
//!   коллизий; ключи запроса считаются тем же способом, так что множество
//!   коллизий согласовано само с собой.

use crate::normalizer::Normalizer;

pub const MAX_GRAM_SIZE: usize = 8;
const DEFAULT_GRAM_SIZE: usize = 3;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Размер граммы зажимается в 1..=8: 0 → 3, больше 8 → 8.
pub fn clamp_gram_size(n: usize) -> usize {
    if n == 0 {
        DEFAULT_GRAM_SIZE
    } else if n > MAX_GRAM_SIZE {
        MAX_GRAM_SIZE
    } else {
        n
    }
}

/// Ключ окна из code points.
pub fn window_key(window: &[char]) -> u64 {
    let n = window.len();
    if n <= 2 {
        return pack_wide(window);
    }
    if n <= MAX_GRAM_SIZE {
        let mut key = 0u64;
        for &c in window {
            let r = c as u32;
            if r > 127 {
                return hash_window(window);
            }
            key = (key << 8) | u64::from(r);
        }
        return key;
    }
    hash_window(window)
}

fn pack_wide(window: &[char]) -> u64 {
    let mut key = 0u64;
    for &c in window {
        key = (key << 32) | u64::from(c as u32);
    }
    key
}

fn hash_window(window: &[char]) -> u64 {
    let mut h = FNV_OFFSET;
    for &c in window {
        let r = c as u32;
        for shift in [0u32, 8, 16, 24] {
            h ^= u64::from((r >> shift) & 0xFF);
            h = h.wrapping_mul(FNV_PRIME);
        }
    }
    h
}

/// ASCII-нормализация в байтовый буфер: не-alphanumeric выбрасываем,
/// A..Z приводим к нижнему регистру. false — встретился байт > 127,
/// вызывающий обязан уйти на путь через code points.
fn normalize_ascii_into(text: &str, buf: &mut Vec<u8>) -> bool {
    buf.clear();
    for &b in text.as_bytes() {
        if b > 127 {
            return false;
        }
        if b.is_ascii_uppercase() {
            buf.push(b + 32);
        } else if b.is_ascii_lowercase() || b.is_ascii_digit() {
            buf.push(b);
        }
    }
    true
}

/// Упаковка байтового окна; раскладка по слотам обязана бит-в-бит совпадать
/// с window_key на том же ASCII-тексте.
fn pack_ascii(buf: &[u8], start: usize, n: usize) -> u64 {
    let mut key = 0u64;
    if n <= 2 {
        for &b in &buf[start..start + n] {
            key = (key << 32) | u64::from(b);
        }
    } else {
        for &b in &buf[start..start + n] {
            key = (key << 8) | u64::from(b);
        }
    }
    key
}

/// Линейный дедуп по маленькому буферу: на типичных коротких документах
/// быстрее HashSet.
fn push_dedup(keys: &mut Vec<u64>, key: u64) {
    if !keys.contains(&key) {
        keys.push(key);
    }
}

/// Переиспользуемые буферы обработки одного документа; воркеры пакетной
/// индексации держат по экземпляру на поток.
#[derive(Default)]
pub struct KeyScratch {
    keys: Vec<u64>,
    ascii: Vec<u8>,
    chars: Vec<char>,
}

/// Нормализатор + размер граммы: всё, что нужно, чтобы превратить текст
/// в набор ключей.
#[derive(Debug, Clone)]
pub(crate) struct Keyer {
    gram_size: usize,
    normalizer: Normalizer,
    ascii_fast_path: bool,
}

impl Keyer {
    pub(crate) fn new(gram_size: usize, normalizer: Normalizer) -> Self {
        let gram_size = clamp_gram_size(gram_size);
        let ascii_fast_path = normalizer.supports_ascii_fast_path();
        Keyer {
            gram_size,
            normalizer,
            ascii_fast_path,
        }
    }

    pub(crate) fn gram_size(&self) -> usize {
        self.gram_size
    }

    /// Уникальные ключи всех окон текста; результат живёт в scratch.
    pub(crate) fn doc_keys<'s>(&self, text: &str, scratch: &'s mut KeyScratch) -> &'s [u64] {
        scratch.keys.clear();

        if self.ascii_fast_path && normalize_ascii_into(text, &mut scratch.ascii) {
            let buf = &scratch.ascii;
            if buf.len() >= self.gram_size {
                for i in 0..=buf.len() - self.gram_size {
                    push_dedup(&mut scratch.keys, pack_ascii(buf, i, self.gram_size));
                }
            }
            return &scratch.keys;
        }

        // путь через code points: Unicode либо пользовательский нормализатор
        scratch.chars.clear();
        scratch.chars.extend(self.normalizer.normalize(text).chars());
        if scratch.chars.len() >= self.gram_size {
            for w in scratch.chars.windows(self.gram_size) {
                push_dedup(&mut scratch.keys, window_key(w));
            }
        }
        &scratch.keys
    }

    /// Уникальные ключи запроса — та же нарезка, что у документов.
    pub(crate) fn query_keys(&self, query: &str) -> Vec<u64> {
        let mut scratch = KeyScratch::default();
        self.doc_keys(query, &mut scratch);
        scratch.keys
    }

    /// Ключ строки ровно из gram_size code points, без нормализации.
    pub(crate) fn exact_key(&self, gram: &str) -> Option<u64> {
        let chars: Vec<char> = gram.chars().collect();
        if chars.len() != self.gram_size {
            return None;
        }
        Some(window_key(&chars))
    }
}
