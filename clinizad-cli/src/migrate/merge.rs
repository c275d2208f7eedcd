//! Merge the two CUPS source lists into one deduplicated set of codes.

use std::collections::HashMap;

use crate::migrate::types::{CupsCode, CupsRow};

/// Full outer join of the preparation and referral lists on `codigo`.
///
/// Rules:
/// - A code in the preparation list gets `preparacion_especial = true`; a
///   code in the referral list gets `remitido = true`. A code in both gets
///   both flags (union, never overwrite).
/// - The study name prefers the preparation list; the referral name is a
///   fallback.
/// - Duplicate codes within one source keep their first occurrence.
/// - Output preserves first-seen order: preparation rows first, then
///   referral-only codes.
pub fn merge_cups_sources(preparation: &[CupsRow], referral: &[CupsRow]) -> Vec<CupsCode> {
    let mut merged: Vec<CupsCode> = Vec::new();
    let mut by_code: HashMap<String, usize> = HashMap::new();

    for row in preparation {
        if by_code.contains_key(&row.codigo) {
            continue;
        }
        by_code.insert(row.codigo.clone(), merged.len());
        merged.push(CupsCode {
            codigo_cups: row.codigo.clone(),
            nombre_estudio: Some(row.nombre.clone()),
            preparacion_especial: true,
            remitido: false,
        });
    }

    for row in referral {
        match by_code.get(&row.codigo) {
            Some(&idx) => {
                let entry = &mut merged[idx];
                entry.remitido = true;
                if entry.nombre_estudio.is_none() {
                    entry.nombre_estudio = Some(row.nombre.clone());
                }
            }
            None => {
                by_code.insert(row.codigo.clone(), merged.len());
                merged.push(CupsCode {
                    codigo_cups: row.codigo.clone(),
                    nombre_estudio: Some(row.nombre.clone()),
                    preparacion_especial: false,
                    remitido: true,
                });
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(codigo: &str, nombre: &str) -> CupsRow {
        CupsRow {
            codigo: codigo.to_string(),
            nombre: nombre.to_string(),
        }
    }

    #[test]
    fn test_flag_union_for_code_in_both_sources() {
        let prep = vec![row("001", "Glucosa")];
        let referral = vec![row("001", "Glucose Test"), row("002", "Lipidos")];

        let merged = merge_cups_sources(&prep, &referral);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].codigo_cups, "001");
        assert_eq!(merged[0].nombre_estudio.as_deref(), Some("Glucosa"));
        assert!(merged[0].preparacion_especial);
        assert!(merged[0].remitido);

        assert_eq!(merged[1].codigo_cups, "002");
        assert_eq!(merged[1].nombre_estudio.as_deref(), Some("Lipidos"));
        assert!(!merged[1].preparacion_especial);
        assert!(merged[1].remitido);
    }

    #[test]
    fn test_preparation_only_code_gets_false_remitido() {
        let merged = merge_cups_sources(&[row("903841", "Creatinina")], &[]);

        assert_eq!(merged.len(), 1);
        assert!(merged[0].preparacion_especial);
        assert!(!merged[0].remitido);
    }

    #[test]
    fn test_duplicates_within_one_source_keep_first() {
        let prep = vec![row("001", "Primero"), row("001", "Segundo")];

        let merged = merge_cups_sources(&prep, &[]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].nombre_estudio.as_deref(), Some("Primero"));
    }

    #[test]
    fn test_referral_duplicate_does_not_clobber_preparation_name() {
        let prep = vec![row("001", "Glucosa")];
        let referral = vec![row("001", "Glucose"), row("001", "Glucose again")];

        let merged = merge_cups_sources(&prep, &referral);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].nombre_estudio.as_deref(), Some("Glucosa"));
        assert!(merged[0].remitido);
    }

    #[test]
    fn test_empty_sources() {
        assert!(merge_cups_sources(&[], &[]).is_empty());
    }

    #[test]
    fn test_output_preserves_first_seen_order() {
        let prep = vec![row("300", "C"), row("100", "A")];
        let referral = vec![row("200", "B"), row("100", "A2")];

        let order: Vec<String> = merge_cups_sources(&prep, &referral)
            .into_iter()
            .map(|c| c.codigo_cups)
            .collect();

        assert_eq!(order, vec!["300", "100", "200"]);
    }
}
