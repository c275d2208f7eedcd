//! Spreadsheet reading for the two migration domains.
//!
//! Workbooks are parsed with calamine. Identifier-like cells are always
//! coerced to text (leading zeros preserved, integer-valued floats rendered
//! without a fraction), header rows are located heuristically, and parsed
//! tables are cached next to the source file keyed by modification time.

pub mod cache;
pub mod cups;
pub mod header;
pub mod solicitudes;

use std::path::PathBuf;

use calamine::Data;

pub use cups::{load_preparation, load_referral};
pub use solicitudes::{LoadedRequests, load_requests};

/// Why a spreadsheet could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The source file does not exist.
    FileNotFound(PathBuf),
    /// No sheet carried all required columns.
    SchemaNotFound { expected: Vec<String> },
    /// The workbook exists but could not be parsed.
    Parse(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::FileNotFound(path) => {
                write!(f, "file not found: {}", path.display())
            }
            LoadError::SchemaNotFound { expected } => {
                write!(
                    f,
                    "no sheet contains the required columns: {}",
                    expected.join(", ")
                )
            }
            LoadError::Parse(message) => write!(f, "failed to read workbook: {}", message),
        }
    }
}

impl std::error::Error for LoadError {}

/// Render a cell as text.
///
/// Numeric cells that hold whole values are rendered without a fractional
/// part so that large identifiers never come out as `"12345678.0"` or in
/// exponent notation. String cells pass through untouched, which is what
/// preserves leading zeros in document numbers and service codes.
pub(crate) fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Empty | Data::Error(_) => String::new(),
    }
}

/// Trimmed cell text, `None` when the cell is blank.
pub(crate) fn cell_to_trimmed(cell: &Data) -> Option<String> {
    let text = cell_to_string(cell);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Lenient integer read: integer cells directly, float cells truncated,
/// numeric strings parsed.
pub(crate) fn cell_to_int(cell: &Data) -> Option<i64> {
    match cell {
        Data::Int(i) => Some(*i),
        Data::Float(f) => Some(*f as i64),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_to_string_keeps_leading_zeros() {
        let cell = Data::String("0012345".to_string());
        assert_eq!(cell_to_string(&cell), "0012345");
    }

    #[test]
    fn test_cell_to_string_renders_integer_float_without_fraction() {
        assert_eq!(cell_to_string(&Data::Float(1089196373.0)), "1089196373");
        assert_eq!(cell_to_string(&Data::Int(42)), "42");
    }

    #[test]
    fn test_cell_to_string_keeps_real_fractions() {
        assert_eq!(cell_to_string(&Data::Float(2.5)), "2.5");
    }

    #[test]
    fn test_cell_to_trimmed_blank_is_none() {
        assert_eq!(cell_to_trimmed(&Data::Empty), None);
        assert_eq!(cell_to_trimmed(&Data::String("   ".to_string())), None);
        assert_eq!(
            cell_to_trimmed(&Data::String("  X50  ".to_string())),
            Some("X50".to_string())
        );
    }

    #[test]
    fn test_cell_to_int() {
        assert_eq!(cell_to_int(&Data::Int(7)), Some(7));
        assert_eq!(cell_to_int(&Data::Float(7.9)), Some(7));
        assert_eq!(cell_to_int(&Data::String(" 12 ".to_string())), Some(12));
        assert_eq!(cell_to_int(&Data::String("abc".to_string())), None);
        assert_eq!(cell_to_int(&Data::Empty), None);
    }

    #[test]
    fn test_load_error_display() {
        let err = LoadError::SchemaNotFound {
            expected: vec!["codigo_cups".to_string(), "nombre_estudio".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("codigo_cups"));
        assert!(text.contains("nombre_estudio"));
    }
}
