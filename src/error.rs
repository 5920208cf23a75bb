use thiserror::Error;

/// Ошибки загрузки и сохранения персистентных структур. Поисковые примитивы
/// ошибок не возвращают: некорректный запрос даёт пустой результат, сбой
/// загрузки битмапа в кэше считается отсутствием ключа.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error("unsupported format version {0}")]
    InvalidVersion(u16),
    #[error("gram size {0} out of range")]
    InvalidGramSize(u16),
    #[error("ngram count {0} exceeds limit")]
    InvalidCount(u32),
    #[error("bitmap size {0} bytes exceeds limit")]
    InvalidSize(u32),
    #[error("unexpected end of stream")]
    Truncated,
    #[error("bitmap payload failed to deserialize")]
    DeserializationFailed,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                StorageError::Truncated
            }
            bincode::ErrorKind::Io(io) => StorageError::Io(io),
            _ => StorageError::DeserializationFailed,
        }
    }
}
