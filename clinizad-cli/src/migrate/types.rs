//! Record types shared by the spreadsheet readers, the reconciler and the
//! database layer.

use serde::{Deserialize, Serialize};

/// One row of the service-authorization workbook.
///
/// `numero_solicitud` is the business key. It is kept as opaque text even
/// when it looks numeric: existence checks against the database are always
/// done on the string form, so a column typed differently on either side
/// cannot produce silent mismatches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub numero_solicitud: String,
    pub codigo_servicio_completo: Option<String>,
    pub doc_afiliado: Option<String>,
    pub cod_diag: Option<String>,
    pub desc_diag: Option<String>,
    pub clasificacion_servicios_acceso: Option<String>,
    pub descr_servicio_1: Option<String>,
    pub estado_solicitud: Option<String>,
    pub num_autorizacion: Option<String>,
    pub fecha_autorizacion_1: Option<String>,
    pub ips_asignada: Option<String>,
    pub ciudad_ips_asignada: Option<String>,
    pub cantidad: Option<i64>,
    pub primer_nom: Option<String>,
    pub segundo_nom: Option<String>,
    pub primer_ape: Option<String>,
    pub segundo_ape: Option<String>,
    pub edad_anios: Option<i64>,
    pub estado_solicitud_2: Option<String>,
    pub ips_solicitante: Option<String>,
}

/// One clinical procedure code, merged from the preparation and referral
/// source lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CupsCode {
    pub codigo_cups: String,
    pub nombre_estudio: Option<String>,
    /// The code appeared in the "requires special preparation" list.
    pub preparacion_especial: bool,
    /// The code appeared in the "refer to reference laboratory" list.
    pub remitido: bool,
}

/// Raw row from a single CUPS source workbook, before merging.
#[derive(Debug, Clone, PartialEq)]
pub struct CupsRow {
    pub codigo: String,
    pub nombre: String,
}

/// Records that carry a business key the reconciler can classify on.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for ServiceRequest {
    fn key(&self) -> &str {
        &self.numero_solicitud
    }
}

impl Keyed for CupsCode {
    fn key(&self) -> &str {
        &self.codigo_cups
    }
}

/// Counters for one migration run. Reset at run start, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Records read from the spreadsheet(s).
    pub total: u64,
    /// Keys already present in the database snapshot.
    pub existing: u64,
    /// Keys absent from the snapshot.
    pub new: u64,
    pub inserted: u64,
    pub updated: u64,
    pub errors: u64,
}
