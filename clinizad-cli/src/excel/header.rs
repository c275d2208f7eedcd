//! Header-row location strategies.
//!
//! Source workbooks for the CUPS lists do not start with a clean header
//! row: they carry titles, form codes and blank rows above the real
//! columns. The locator scans a bounded window of leading rows for one
//! containing the required vocabulary, and falls back to a fixed row index
//! when the scan finds nothing. The fallback is the lowest-confidence
//! strategy and is logged every time it is used.

use calamine::Data;

use crate::excel::cell_to_string;

/// How the header row was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// The scan found a row containing all required token groups.
    Scanned,
    /// No row matched within the window; the fixed row index was assumed.
    Fallback,
}

/// A located header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedHeader {
    /// Zero-based row index of the header within the sheet.
    pub row: usize,
    pub confidence: Confidence,
}

/// Token-scan strategy with a fixed-row fallback.
///
/// `required_tokens` is a conjunction of alternative groups: a row matches
/// when, for every group, at least one of its tokens appears in the
/// lower-cased concatenation of the row's non-empty cells.
#[derive(Debug, Clone, Copy)]
pub struct HeaderLocator {
    /// How many leading rows to scan.
    pub scan_rows: usize,
    pub required_tokens: &'static [&'static [&'static str]],
    /// Zero-based row assumed when the scan fails.
    pub fallback_row: usize,
}

impl HeaderLocator {
    /// Scan the leading rows for the required vocabulary.
    pub fn scan<'a, I>(&self, rows: I) -> Option<usize>
    where
        I: IntoIterator<Item = &'a [Data]>,
    {
        for (idx, row) in rows.into_iter().take(self.scan_rows).enumerate() {
            let joined = row
                .iter()
                .map(cell_to_string)
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();

            if joined.is_empty() {
                continue;
            }

            let matches = self
                .required_tokens
                .iter()
                .all(|group| group.iter().any(|token| joined.contains(token)));
            if matches {
                return Some(idx);
            }
        }
        None
    }

    /// Scan, or assume the fallback row when nothing matches.
    pub fn locate<'a, I>(&self, rows: I) -> LocatedHeader
    where
        I: IntoIterator<Item = &'a [Data]>,
    {
        match self.scan(rows) {
            Some(row) => LocatedHeader {
                row,
                confidence: Confidence::Scanned,
            },
            None => {
                log::warn!(
                    "no header row found in the first {} rows, assuming row {}",
                    self.scan_rows,
                    self.fallback_row
                );
                LocatedHeader {
                    row: self.fallback_row,
                    confidence: Confidence::Fallback,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCATOR: HeaderLocator = HeaderLocator {
        scan_rows: 5,
        required_tokens: &[&["nombre"], &["codigo", "cups"]],
        fallback_row: 1,
    };

    fn text_row(cells: &[&str]) -> Vec<Data> {
        cells
            .iter()
            .map(|s| Data::String(s.to_string()))
            .collect()
    }

    #[test]
    fn test_scan_finds_header_row() {
        let rows = vec![
            text_row(&["LISTADO DE EXAMENES"]),
            text_row(&[""]),
            text_row(&["NOMBRE DEL ESTUDIO", "CODIGO CUPS"]),
            text_row(&["Glucosa", "903841"]),
        ];

        let located = LOCATOR.locate(rows.iter().map(|r| r.as_slice()));
        assert_eq!(located.row, 2);
        assert_eq!(located.confidence, Confidence::Scanned);
    }

    #[test]
    fn test_alternative_token_within_group_matches() {
        // "cups" alone satisfies the ["codigo", "cups"] group.
        let rows = vec![text_row(&["nombre", "cups"])];

        assert_eq!(LOCATOR.scan(rows.iter().map(|r| r.as_slice())), Some(0));
    }

    #[test]
    fn test_fallback_when_nothing_matches() {
        let rows = vec![
            text_row(&["solo un titulo"]),
            text_row(&["datos", "mas datos"]),
        ];

        let located = LOCATOR.locate(rows.iter().map(|r| r.as_slice()));
        assert_eq!(located.row, 1);
        assert_eq!(located.confidence, Confidence::Fallback);
    }

    #[test]
    fn test_scan_window_is_bounded() {
        let mut rows = vec![text_row(&["relleno"]); 5];
        rows.push(text_row(&["nombre", "codigo"])); // row 5, outside window

        assert_eq!(LOCATOR.scan(rows.iter().map(|r| r.as_slice())), None);
    }

    #[test]
    fn test_blank_rows_are_skipped() {
        let rows = vec![
            vec![Data::Empty, Data::Empty],
            text_row(&["NOMBRE", "CODIGO"]),
        ];

        assert_eq!(LOCATOR.scan(rows.iter().map(|r| r.as_slice())), Some(1));
    }
}
