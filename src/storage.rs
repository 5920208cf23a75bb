//! Кодек персистентного индекса (формат FTSR v2) и общая схема атомарной
//! записи файлов.
//!
//! Раскладка файла, все числа little-endian:
//!
//! | смещение | размер | поле |
//! |---|---|---|
//! | 0 | 4 | magic `FTSR` |
//! | 4 | 2 | версия = 2 |
//! | 6 | 2 | размер граммы 1..=8 |
//! | 8 | 4 | число записей |
//! | 12 | — | записи: ключ (8) + длина L (4) + Portable-битмап (L) |

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use croaring::{Bitmap, Portable};

use crate::error::StorageError;
use crate::gram::Keyer;
use crate::index::Index;
use crate::normalizer::Normalizer;

pub(crate) const MAGIC: [u8; 4] = *b"FTSR";
pub(crate) const VERSION: u16 = 2;
const MAX_GRAM_SIZE: u16 = 8;
// Санитарные границы загрузчика: мусорный заголовок отбрасывается до
// каких-либо аллокаций.
pub(crate) const MAX_NGRAM_COUNT: u32 = 100_000_000;
pub(crate) const MAX_BITMAP_BYTES: u32 = 100 << 20;

impl Index {
    /// Полная сериализация индекса в writer.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), StorageError> {
        let map = self.bitmaps().read();
        w.write_all(&MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&(self.gram_size() as u16).to_le_bytes())?;
        w.write_all(&(map.len() as u32).to_le_bytes())?;
        for (key, bm) in map.iter() {
            let payload = bm.serialize::<Portable>();
            w.write_all(&key.to_le_bytes())?;
            w.write_all(&(payload.len() as u32).to_le_bytes())?;
            w.write_all(&payload)?;
        }
        Ok(())
    }

    /// Читает индекс целиком. Нормализатор в файле не хранится и берётся
    /// от вызывающего; он обязан совпадать с тем, что был при записи.
    pub fn read_from<R: Read>(r: &mut R, normalizer: Normalizer) -> Result<Index, StorageError> {
        let gram_size = read_header(r)?;
        let count = read_u32(r)?;
        if count > MAX_NGRAM_COUNT {
            return Err(StorageError::InvalidCount(count));
        }

        let mut bitmaps = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let (key, bm) = read_entry(r)?;
            bitmaps.insert(key, bm);
        }
        Ok(Index::from_parts(
            Keyer::new(gram_size as usize, normalizer),
            bitmaps,
        ))
    }

    /// Атомарное сохранение: пишем <path>.tmp, fsync, rename поверх path.
    /// При любой ошибке временный файл удаляется, целевой не трогается.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        atomic_save(path.as_ref(), |w| self.write_to(w))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Index, StorageError> {
        Self::load_from_file_with_normalizer(path, Normalizer::default())
    }

    pub fn load_from_file_with_normalizer<P: AsRef<Path>>(
        path: P,
        normalizer: Normalizer,
    ) -> Result<Index, StorageError> {
        let mut r = BufReader::new(File::open(path)?);
        Index::read_from(&mut r, normalizer)
    }
}

/// Проверяет magic/версию/размер граммы; возвращает размер граммы.
pub(crate) fn read_header<R: Read>(r: &mut R) -> Result<u16, StorageError> {
    let mut header = [0u8; 8];
    read_exact(r, &mut header)?;
    if header[0..4] != MAGIC {
        return Err(StorageError::InvalidMagic);
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(StorageError::InvalidVersion(version));
    }
    let gram_size = u16::from_le_bytes([header[6], header[7]]);
    if gram_size < 1 || gram_size > MAX_GRAM_SIZE {
        return Err(StorageError::InvalidGramSize(gram_size));
    }
    Ok(gram_size)
}

/// Одна запись: ключ + длина + полезная нагрузка. Длина проверяется до
/// выделения буфера.
pub(crate) fn read_entry<R: Read>(r: &mut R) -> Result<(u64, Bitmap), StorageError> {
    let key = read_u64(r)?;
    let size = read_u32(r)?;
    if size > MAX_BITMAP_BYTES {
        return Err(StorageError::InvalidSize(size));
    }
    let mut payload = vec![0u8; size as usize];
    read_exact(r, &mut payload)?;
    let bm = Bitmap::try_deserialize::<Portable>(&payload)
        .ok_or(StorageError::DeserializationFailed)?;
    Ok((key, bm))
}

pub(crate) fn read_u32<R: Read>(r: &mut R) -> Result<u32, StorageError> {
    let mut buf = [0u8; 4];
    read_exact(r, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(r: &mut R) -> Result<u64, StorageError> {
    let mut buf = [0u8; 8];
    read_exact(r, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// EOF посреди объявленной длины — это Truncated, а не просто Io.
pub(crate) fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), StorageError> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            StorageError::Truncated
        } else {
            StorageError::Io(e)
        }
    })
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Общая схема атомарной записи для всех персистентных структур: читатели
/// path видят либо прежнее содержимое, либо целиком новый файл.
pub(crate) fn atomic_save<F>(path: &Path, write: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), StorageError>,
{
    let tmp = tmp_path(path);
    let result = (|| {
        let mut w = BufWriter::new(File::create(&tmp)?);
        write(&mut w)?;
        w.flush()?;
        w.get_ref().sync_all()?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            if let Err(err) = fs::rename(&tmp, path) {
                let _ = fs::remove_file(&tmp);
                return Err(StorageError::Io(err));
            }
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}
