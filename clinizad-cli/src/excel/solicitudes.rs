//! Reader for the service-authorization workbook.
//!
//! The workbook carries one denormalized sheet with at least the 20
//! required columns. Sheets are tried in order; the first one whose header
//! row covers the full required vocabulary wins. Identifier columns
//! (`doc_afiliado`, `num_autorizacion`, `numero_solicitud`,
//! `codigo_servicio_completo`) are always read as text so that leading
//! zeros survive and large numbers never degrade to float notation.

use std::collections::HashMap;
use std::path::Path;

use calamine::{Data, Reader, Xlsx, open_workbook};

use crate::excel::{LoadError, cache, cell_to_int, cell_to_trimmed};
use crate::migrate::types::ServiceRequest;

/// Spreadsheet column names that must all be present on one sheet.
///
/// `ips_solicita` is the workbook's name for what the database stores as
/// `ips_solicitante`.
pub const REQUIRED_COLUMNS: [&str; 20] = [
    "doc_afiliado",
    "codigo_servicio_completo",
    "cod_diag",
    "desc_diag",
    "clasificacion_servicios_acceso",
    "descr_servicio_1",
    "estado_solicitud",
    "num_autorizacion",
    "fecha_autorizacion_1",
    "ips_asignada",
    "numero_solicitud",
    "ciudad_ips_asignada",
    "cantidad",
    "primer_nom",
    "segundo_nom",
    "primer_ape",
    "segundo_ape",
    "edad_anios",
    "estado_solicitud_2",
    "ips_solicita",
];

/// A parsed authorization table with a sorted affiliate-lookup index.
#[derive(Debug, Clone)]
pub struct LoadedRequests {
    records: Vec<ServiceRequest>,
    /// (trimmed doc_afiliado, record index), sorted for range lookups.
    index: Vec<(String, usize)>,
}

impl LoadedRequests {
    fn build(records: Vec<ServiceRequest>) -> Self {
        let mut index: Vec<(String, usize)> = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                r.doc_afiliado
                    .as_deref()
                    .map(|doc| (doc.trim().to_string(), i))
            })
            .collect();
        index.sort();
        LoadedRequests { records, index }
    }

    pub fn records(&self) -> &[ServiceRequest] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ServiceRequest> {
        self.records
    }

    /// All rows whose `doc_afiliado` exactly matches `doc` (trimmed).
    ///
    /// Binary search over the sorted index, so repeated lookups from the
    /// interactive query path stay cheap on large workbooks.
    pub fn lookup_by_afiliado(&self, doc: &str) -> Vec<&ServiceRequest> {
        let doc = doc.trim();
        let start = self.index.partition_point(|(d, _)| d.as_str() < doc);
        self.index[start..]
            .iter()
            .take_while(|(d, _)| d == doc)
            .map(|&(_, i)| &self.records[i])
            .collect()
    }
}

/// Load the authorization workbook, from the snapshot cache when valid.
pub fn load_requests(path: &Path, use_cache: bool) -> Result<LoadedRequests, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound(path.to_path_buf()));
    }

    if use_cache {
        if let Some(records) = cache::load_snapshot::<Vec<ServiceRequest>>(path) {
            return Ok(LoadedRequests::build(records));
        }
    }

    let records = parse_workbook(path)?;
    if use_cache {
        cache::store_snapshot(path, &records);
    }
    Ok(LoadedRequests::build(records))
}

fn parse_workbook(path: &Path) -> Result<Vec<ServiceRequest>, LoadError> {
    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| LoadError::Parse(e.to_string()))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    for sheet_name in sheet_names {
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| LoadError::Parse(format!("sheet '{}': {}", sheet_name, e)))?;

        let rows: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();
        let Some(columns) = resolve_columns(&rows) else {
            // Header does not cover the required vocabulary, try the next sheet.
            continue;
        };

        log::info!("authorization data found on sheet '{}'", sheet_name);
        return Ok(parse_rows(&rows, &columns));
    }

    Err(LoadError::SchemaNotFound {
        expected: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
    })
}

/// Map each required column to its index on the first row, or `None` when
/// the sheet's header set is not a superset of the required vocabulary.
/// Matching is on trimmed, lower-cased names.
fn resolve_columns(rows: &[Vec<Data>]) -> Option<HashMap<&'static str, usize>> {
    let header = rows.first()?;

    let mut columns: HashMap<&'static str, usize> = HashMap::new();
    for (idx, cell) in header.iter().enumerate() {
        let Some(name) = cell_to_trimmed(cell) else {
            continue;
        };
        let name = name.to_lowercase();
        if let Some(required) = REQUIRED_COLUMNS.iter().find(|r| **r == name) {
            columns.entry(*required).or_insert(idx);
        }
    }

    if columns.len() == REQUIRED_COLUMNS.len() {
        Some(columns)
    } else {
        None
    }
}

fn parse_rows(rows: &[Vec<Data>], columns: &HashMap<&'static str, usize>) -> Vec<ServiceRequest> {
    let text = |row: &[Data], name: &str| -> Option<String> {
        columns
            .get(name)
            .and_then(|&idx| row.get(idx))
            .and_then(cell_to_trimmed)
    };
    let int = |row: &[Data], name: &str| -> Option<i64> {
        columns
            .get(name)
            .and_then(|&idx| row.get(idx))
            .and_then(cell_to_int)
    };

    let mut records = Vec::new();
    for row in rows.iter().skip(1) {
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }

        records.push(ServiceRequest {
            numero_solicitud: text(row, "numero_solicitud").unwrap_or_default(),
            codigo_servicio_completo: text(row, "codigo_servicio_completo"),
            doc_afiliado: text(row, "doc_afiliado"),
            cod_diag: text(row, "cod_diag"),
            desc_diag: text(row, "desc_diag"),
            clasificacion_servicios_acceso: text(row, "clasificacion_servicios_acceso"),
            descr_servicio_1: text(row, "descr_servicio_1"),
            estado_solicitud: text(row, "estado_solicitud"),
            num_autorizacion: text(row, "num_autorizacion"),
            fecha_autorizacion_1: text(row, "fecha_autorizacion_1"),
            ips_asignada: text(row, "ips_asignada"),
            ciudad_ips_asignada: text(row, "ciudad_ips_asignada"),
            cantidad: int(row, "cantidad"),
            primer_nom: text(row, "primer_nom"),
            segundo_nom: text(row, "segundo_nom"),
            primer_ape: text(row, "primer_ape"),
            segundo_ape: text(row, "segundo_ape"),
            edad_anios: int(row, "edad_anios"),
            estado_solicitud_2: text(row, "estado_solicitud_2"),
            ips_solicitante: text(row, "ips_solicita"),
        });
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_row() -> Vec<Data> {
        REQUIRED_COLUMNS
            .iter()
            .map(|c| Data::String(c.to_uppercase()))
            .collect()
    }

    fn data_row(solicitud: &str, doc: &str) -> Vec<Data> {
        let mut row = vec![Data::Empty; REQUIRED_COLUMNS.len()];
        let col = |name: &str| REQUIRED_COLUMNS.iter().position(|c| *c == name).unwrap();
        row[col("numero_solicitud")] = Data::String(solicitud.to_string());
        row[col("doc_afiliado")] = Data::String(doc.to_string());
        row[col("cantidad")] = Data::Float(2.0);
        row[col("primer_nom")] = Data::String("Ana".to_string());
        row
    }

    #[test]
    fn test_resolve_columns_is_case_insensitive() {
        let rows = vec![header_row()];
        let columns = resolve_columns(&rows).expect("all columns present");
        assert_eq!(columns.len(), REQUIRED_COLUMNS.len());
        assert_eq!(columns["numero_solicitud"], 10);
    }

    #[test]
    fn test_resolve_columns_rejects_partial_header() {
        let mut header = header_row();
        header.truncate(5);
        assert!(resolve_columns(&[header]).is_none());
    }

    #[test]
    fn test_resolve_columns_tolerates_extra_columns() {
        let mut header = header_row();
        header.push(Data::String("columna_extra".to_string()));
        assert!(resolve_columns(&[header]).is_some());
    }

    #[test]
    fn test_parse_rows_coerces_and_skips_blanks() {
        let rows = vec![
            header_row(),
            data_row("2024001", " 1089196373 "),
            vec![Data::Empty; REQUIRED_COLUMNS.len()],
            data_row("2024002", "52711"),
        ];
        let columns = resolve_columns(&rows).unwrap();

        let records = parse_rows(&rows, &columns);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].numero_solicitud, "2024001");
        assert_eq!(records[0].doc_afiliado.as_deref(), Some("1089196373"));
        assert_eq!(records[0].cantidad, Some(2));
        assert_eq!(records[0].primer_nom.as_deref(), Some("Ana"));
        assert_eq!(records[0].cod_diag, None);
    }

    #[test]
    fn test_numeric_key_cell_reads_as_plain_text() {
        let mut row = data_row("x", "y");
        let col = REQUIRED_COLUMNS
            .iter()
            .position(|c| *c == "numero_solicitud")
            .unwrap();
        row[col] = Data::Float(20240001.0);

        let rows = vec![header_row(), row];
        let columns = resolve_columns(&rows).unwrap();
        let records = parse_rows(&rows, &columns);
        assert_eq!(records[0].numero_solicitud, "20240001");
    }

    #[test]
    fn test_lookup_by_afiliado_exact_match_range() {
        let make = |solicitud: &str, doc: &str| ServiceRequest {
            numero_solicitud: solicitud.to_string(),
            doc_afiliado: Some(doc.to_string()),
            ..Default::default()
        };
        let loaded = LoadedRequests::build(vec![
            make("1", "100"),
            make("2", "200"),
            make("3", "100"),
            make("4", "1000"),
        ]);

        let hits = loaded.lookup_by_afiliado("100");
        let solicitudes: Vec<&str> = hits.iter().map(|r| r.numero_solicitud.as_str()).collect();
        assert_eq!(solicitudes, vec!["1", "3"]);

        // Exact match only: "1000" must not bleed into the "100" range.
        assert_eq!(loaded.lookup_by_afiliado("1000").len(), 1);
        assert!(loaded.lookup_by_afiliado("999").is_empty());
    }

    #[test]
    fn test_load_requests_missing_file() {
        let err = load_requests(Path::new("/no/such/file.xlsx"), true).unwrap_err();
        assert!(matches!(err, LoadError::FileNotFound(_)));
    }
}
