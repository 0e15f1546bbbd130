use std::fmt;

/// Errors returned by the patch operations.
///
/// Every operation borrows its input immutably, so a returned error always means the caller's
/// buffer is exactly as it was before the call.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Malformed caller input (empty phrase, unbalanced payload, disallowed identifier
    /// characters). Raised before the buffer is inspected.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The anchor phrase does not occur in the part's rendered text.
    #[error("anchor not found: {phrase:?}")]
    NotFound { phrase: String },
    /// The part is missing scaffolding the operation requires (e.g. no `<w:body>`).
    #[error("unsupported part structure: {0}")]
    Structural(String),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[cfg(feature = "package")]
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing package part: {0}")]
    MissingPart(String),
    #[error("package part is too large to load safely: {part} is {size} bytes (max {max} bytes)")]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("package is too large to load safely: {total} bytes uncompressed (max {max})")]
    PackageTooLarge { total: u64, max: u64 },
}

impl PatchError {
    pub(crate) fn not_found(phrase: &str) -> Self {
        Self::NotFound {
            phrase: phrase.to_string(),
        }
    }

    /// `true` when a higher-level assembly step may skip this edit and carry on.
    ///
    /// Only a missing anchor is recoverable; everything else means the input (or the part)
    /// cannot be patched as requested.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Which data field of a chart series a [`FieldFormatError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesField {
    Name,
    Categories,
    Values,
}

impl fmt::Display for SeriesField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SeriesField::Name => "name",
            SeriesField::Categories => "categories",
            SeriesField::Values => "values",
        })
    }
}

/// A localized failure: one formula could not be recomputed and was left unchanged while the
/// rest of the series synchronization proceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFormatError {
    pub series_index: usize,
    pub field: SeriesField,
    pub formula: String,
    pub reason: String,
}

impl fmt::Display for FieldFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "series {} {}: cannot update formula {:?}: {}",
            self.series_index, self.field, self.formula, self.reason
        )
    }
}
