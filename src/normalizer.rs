use std::fmt;
use std::sync::Arc;

/// Приведение текста к канонической форме перед нарезкой на n-граммы.
/// Одна и та же форма применяется при индексации и при поиске.
#[derive(Clone, Default)]
pub enum Normalizer {
    /// Lowercase + только буквы/цифры (по категориям Unicode, не только
    /// ASCII). Единственный вариант с байтовым ASCII fast path.
    #[default]
    LowercaseAlphanumeric,
    /// Только lowercase, остальные символы сохраняются как есть.
    Lowercase,
    /// Произвольная функция пользователя; fast path отключается.
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl Normalizer {
    pub fn normalize(&self, s: &str) -> String {
        match self {
            Normalizer::LowercaseAlphanumeric => s
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect(),
            Normalizer::Lowercase => s.to_lowercase(),
            Normalizer::Custom(f) => f(s),
        }
    }

    /// Байтовый путь корректен только для встроенного alphanumeric-варианта.
    pub(crate) fn supports_ascii_fast_path(&self) -> bool {
        matches!(self, Normalizer::LowercaseAlphanumeric)
    }
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalizer::LowercaseAlphanumeric => f.write_str("LowercaseAlphanumeric"),
            Normalizer::Lowercase => f.write_str("Lowercase"),
            Normalizer::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
