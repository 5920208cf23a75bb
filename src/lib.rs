//! gramdex — встраиваемый поиск подстрок по n-граммам на roaring-битмапах.
//!
//! Документ режется на n-граммы фиксированной ширины; каждой n-грамме
//! соответствует битмап doc id. AND/OR-запросы — алгебра этих битмапов.
//! Резидентный индекс строится в памяти (при больших объёмах — пакетно,
//! параллельно), сохраняется на диск целиком и может открываться в
//! кэшированном варианте с ленивой загрузкой битмапов под бюджетом памяти.

pub mod batch;
pub mod cache;
pub mod error;
pub mod filter;
pub mod gram;
pub mod index;
pub mod normalizer;
pub mod sortcol;
pub mod storage;

pub use batch::IndexBatch;
pub use cache::{CacheOptions, CachedIndex};
pub use error::StorageError;
pub use filter::{BitmapFilter, FilterBatch};
pub use index::{Document, Index, SearchResult};
pub use normalizer::Normalizer;
pub use sortcol::{SortColumn, SortColumnBatch, SortedResult};

pub use croaring::Bitmap;
