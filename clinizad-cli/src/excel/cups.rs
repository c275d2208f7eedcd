//! Readers for the two CUPS source workbooks.
//!
//! The "requires preparation" list and the "refer to reference laboratory"
//! list come from different forms with different layouts: titles above the
//! header, a different header row per file, and header names that only
//! loosely match. Both readers locate the header heuristically, resolve
//! the code and name columns by substring, and drop rows that do not look
//! like real code entries.

use std::path::Path;

use calamine::{Data, Reader, Xlsx, open_workbook};

use crate::excel::header::HeaderLocator;
use crate::excel::{LoadError, cell_to_trimmed};
use crate::migrate::types::CupsRow;

/// The preparation list keeps its header within the first rows of the
/// only sheet; row 1 is the observed layout when the scan fails.
const PREPARATION_LOCATOR: HeaderLocator = HeaderLocator {
    scan_rows: 5,
    required_tokens: &[&["nombre"], &["codigo", "cups"]],
    fallback_row: 1,
};

/// The referral form buries its header below a title block; row 6 is the
/// observed layout when the scan fails.
const REFERRAL_LOCATOR: HeaderLocator = HeaderLocator {
    scan_rows: 10,
    required_tokens: &[&["cups"], &["estudio"]],
    fallback_row: 6,
};

/// Load the "requires special preparation" list.
///
/// A missing file is not fatal: the CUPS load can run from the referral
/// list alone. Returns an empty list with a warning in that case.
pub fn load_preparation(path: &Path) -> Result<Vec<CupsRow>, LoadError> {
    if !path.exists() {
        log::warn!("preparation list not found: {}", path.display());
        return Ok(Vec::new());
    }

    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| LoadError::Parse(e.to_string()))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| LoadError::Parse("workbook has no sheets".to_string()))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| LoadError::Parse(format!("sheet '{}': {}", sheet_name, e)))?;
    let rows: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();

    let located = PREPARATION_LOCATOR.locate(rows.iter().map(|r| r.as_slice()));
    parse_source_rows(&rows, located.row, is_preparation_name_header)
}

/// Load the "refer to reference laboratory" list.
///
/// The header may live on any sheet; the first sheet where the scan finds
/// the "CUPS"/"ESTUDIO" vocabulary wins, otherwise the first sheet with
/// the fixed fallback row.
pub fn load_referral(path: &Path) -> Result<Vec<CupsRow>, LoadError> {
    if !path.exists() {
        log::warn!("referral list not found: {}", path.display());
        return Ok(Vec::new());
    }

    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| LoadError::Parse(e.to_string()))?;
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(LoadError::Parse("workbook has no sheets".to_string()));
    }

    let mut tables: Vec<(String, Vec<Vec<Data>>)> = Vec::new();
    for sheet_name in &sheet_names {
        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| LoadError::Parse(format!("sheet '{}': {}", sheet_name, e)))?;
        let rows: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();

        if let Some(header_row) = REFERRAL_LOCATOR.scan(rows.iter().map(|r| r.as_slice())) {
            log::info!("referral data found on sheet '{}'", sheet_name);
            return parse_source_rows(&rows, header_row, is_referral_name_header);
        }
        tables.push((sheet_name.clone(), rows));
    }

    let (first_sheet, rows) = tables.remove(0);
    log::warn!(
        "no referral header found on any sheet, assuming sheet '{}' row {}",
        first_sheet,
        REFERRAL_LOCATOR.fallback_row
    );
    parse_source_rows(&rows, REFERRAL_LOCATOR.fallback_row, is_referral_name_header)
}

fn is_preparation_name_header(header: &str) -> bool {
    header.contains("nombre") || header.contains("estudio")
}

/// "ESTUDIO" names the column, but the form also has a
/// "PROCESO PRE-ANALITICO DEL ESTUDIO" column that must not win.
fn is_referral_name_header(header: &str) -> bool {
    header.contains("estudio") && !header.contains("pre") && !header.contains("analitico")
}

fn is_code_header(header: &str) -> bool {
    header.contains("codigo") || header.contains("cups")
}

/// Extract `CupsRow`s below the header, applying the data-quality filter:
/// the code must be non-empty, numeric-looking and not a placeholder, and
/// the name must be non-empty.
fn parse_source_rows(
    rows: &[Vec<Data>],
    header_row: usize,
    is_name_header: fn(&str) -> bool,
) -> Result<Vec<CupsRow>, LoadError> {
    let header = rows.get(header_row).ok_or_else(|| LoadError::SchemaNotFound {
        expected: vec!["codigo_cups".to_string(), "nombre_estudio".to_string()],
    })?;

    let mut code_col = None;
    let mut name_col = None;
    for (idx, cell) in header.iter().enumerate() {
        let Some(text) = cell_to_trimmed(cell) else {
            continue;
        };
        let text = text.to_lowercase();
        if code_col.is_none() && is_code_header(&text) {
            code_col = Some(idx);
        } else if name_col.is_none() && is_name_header(&text) {
            name_col = Some(idx);
        }
    }

    let (Some(code_col), Some(name_col)) = (code_col, name_col) else {
        return Err(LoadError::SchemaNotFound {
            expected: vec!["codigo_cups".to_string(), "nombre_estudio".to_string()],
        });
    };

    let mut parsed = Vec::new();
    for row in rows.iter().skip(header_row + 1) {
        let codigo = row.get(code_col).and_then(cell_to_trimmed);
        let nombre = row.get(name_col).and_then(cell_to_trimmed);

        let (Some(codigo), Some(nombre)) = (codigo, nombre) else {
            continue;
        };
        if !looks_like_code(&codigo) || is_placeholder(&nombre) {
            continue;
        }

        parsed.push(CupsRow { codigo, nombre });
    }

    Ok(parsed)
}

/// Numeric-looking, non-placeholder code. Stray header fragments and
/// free-text notes below the table fail this check.
fn looks_like_code(value: &str) -> bool {
    !value.is_empty() && !is_placeholder(value) && value.chars().all(|c| c.is_ascii_digit())
}

/// Text-conversion artifacts that stand in for an empty cell.
fn is_placeholder(value: &str) -> bool {
    value.eq_ignore_ascii_case("nan") || value.eq_ignore_ascii_case("none")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_row(cells: &[&str]) -> Vec<Data> {
        cells
            .iter()
            .map(|s| {
                if s.is_empty() {
                    Data::Empty
                } else {
                    Data::String(s.to_string())
                }
            })
            .collect()
    }

    #[test]
    fn test_parse_source_rows_basic() {
        let rows = vec![
            text_row(&["LISTADO"]),
            text_row(&["NOMBRE ESTUDIO", "CODIGO CUPS"]),
            text_row(&["Glucosa", "903841"]),
            text_row(&["Creatinina", "903895"]),
        ];

        let parsed = parse_source_rows(&rows, 1, is_preparation_name_header).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].codigo, "903841");
        assert_eq!(parsed[0].nombre, "Glucosa");
    }

    #[test]
    fn test_numeric_code_cells_are_coerced() {
        let rows = vec![
            text_row(&["NOMBRE", "CUPS"]),
            vec![Data::String("Glucosa".to_string()), Data::Float(903841.0)],
        ];

        let parsed = parse_source_rows(&rows, 0, is_preparation_name_header).unwrap();
        assert_eq!(parsed[0].codigo, "903841");
    }

    #[test]
    fn test_data_quality_filter() {
        let rows = vec![
            text_row(&["NOMBRE", "CODIGO"]),
            text_row(&["Sin codigo", ""]),
            text_row(&["Nota al pie", "ver anexo"]),
            text_row(&["nan", "903841"]),
            text_row(&["", "903842"]),
            text_row(&["Valida", "903843"]),
        ];

        let parsed = parse_source_rows(&rows, 0, is_preparation_name_header).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].codigo, "903843");
    }

    #[test]
    fn test_referral_name_header_skips_preanalytic_column() {
        let rows = vec![
            text_row(&["CUPS", "PROCESO PRE-ANALITICO DEL ESTUDIO", "ESTUDIO"]),
            text_row(&["903841", "Ayuno de 8 horas", "Glucosa"]),
        ];

        let parsed = parse_source_rows(&rows, 0, is_referral_name_header).unwrap();
        assert_eq!(parsed[0].nombre, "Glucosa");
    }

    #[test]
    fn test_missing_columns_is_schema_error() {
        let rows = vec![
            text_row(&["COLUMNA A", "COLUMNA B"]),
            text_row(&["1", "2"]),
        ];

        let err = parse_source_rows(&rows, 0, is_preparation_name_header).unwrap_err();
        assert!(matches!(err, LoadError::SchemaNotFound { .. }));
    }

    #[test]
    fn test_missing_file_is_empty_not_fatal() {
        let parsed = load_preparation(Path::new("/no/such/prep.xlsx")).unwrap();
        assert!(parsed.is_empty());
    }
}
