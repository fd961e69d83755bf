//! Data model and wire types for the PJe advocate-panel endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// API root shared by every regional portal instance.
pub const API_PREFIX: &str = "/pje-comum-api/api";

/// Grouping id of the general docket bucket.
pub const GROUPING_GENERAL_DOCKET: u32 = 1;

/// Grouping id of the archived-cases bucket.
pub const GROUPING_ARCHIVED: u32 = 5;

/// Identity/secret pair for the SSO form. Injected configuration; never
/// serialized alongside harvested data.
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub secret: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

// Debug must never leak the secret into logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.username.chars().take(3).collect::<String>();
        f.debug_struct("Credential")
            .field("username", &format!("{shown}***"))
            .field("secret", &"***")
            .finish()
    }
}

fn default_idp_host() -> String {
    "sso.cloud.pje.jus.br".to_string()
}

/// Addresses of one regional portal instance. All URLs are injected; core
/// components never carry hardcoded hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Entry page carrying the SSO button, e.g.
    /// `https://pje.trt3.jus.br/primeirograu/login.seam`.
    pub login_url: String,

    /// Portal origin, e.g. `https://pje.trt3.jus.br`.
    pub base_url: String,

    /// Identity-provider host fronting the portal family.
    #[serde(default = "default_idp_host")]
    pub idp_host: String,
}

impl PortalConfig {
    pub fn new(login_url: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
            base_url: base_url.into(),
            idp_host: default_idp_host(),
        }
    }

    /// Host part of `base_url`, used to recognize a post-login landing page.
    pub fn portal_host(&self) -> &str {
        self.base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }
}

/// One regional portal instance in a multi-target sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestTarget {
    /// Short code, e.g. `trt3`.
    pub code: String,
    pub name: String,
    pub region: String,
    pub portal: PortalConfig,
}

/// A named bucket of case records on the advocate panel.
///
/// The pending bucket is selected through per-deadline expediente filters;
/// the docket and archive buckets are selected through a fixed grouping id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collection {
    /// Pending filings, narrowed by deadline filter codes (e.g. `I` for
    /// no-deadline summonses).
    Pending { deadline_filters: Vec<String> },
    GeneralDocket,
    Archived,
}

impl Collection {
    /// Stable short key used in snapshot file names.
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Pending { .. } => "pend",
            Collection::GeneralDocket => "acervo",
            Collection::Archived => "arq",
        }
    }

    /// Filter discriminator joined into snapshot file names.
    pub fn filter_tags(&self) -> String {
        match self {
            Collection::Pending { deadline_filters } => deadline_filters.join("-"),
            Collection::GeneralDocket => "geral".to_string(),
            Collection::Archived => "todos".to_string(),
        }
    }

    /// Grouping id for the grouping-addressed buckets.
    pub fn grouping_id(&self) -> Option<u32> {
        match self {
            Collection::Pending { .. } => None,
            Collection::GeneralDocket => Some(GROUPING_GENERAL_DOCKET),
            Collection::Archived => Some(GROUPING_ARCHIVED),
        }
    }
}

/// Fully qualified listing request: which bucket, whose panel, page size.
#[derive(Debug, Clone)]
pub struct CollectionRequest {
    pub collection: Collection,
    pub advocate_id: u64,
    pub page_size: u32,
}

impl CollectionRequest {
    pub fn new(collection: Collection, advocate_id: u64) -> Self {
        Self {
            collection,
            advocate_id,
            page_size: 100,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Relative path of one listing page request, resolved against the
    /// portal origin from inside the authenticated page.
    pub fn listing_path(&self, page: u32) -> String {
        let mut params: Vec<(String, String)> = Vec::new();
        match &self.collection {
            Collection::Pending { deadline_filters } => {
                for filter in deadline_filters {
                    params.push(("agrupadorExpediente".into(), filter.clone()));
                }
                params.push(("pagina".into(), page.to_string()));
                params.push(("tamanhoPagina".into(), self.page_size.to_string()));
                params.push(("tipoPainelAdvogado".into(), "2".into()));
                params.push(("ordenacaoCrescente".into(), "false".into()));
                params.push(("idPainelAdvogadoEnum".into(), "2".into()));
            }
            grouped => {
                let grouping = grouped.grouping_id().unwrap_or(GROUPING_GENERAL_DOCKET);
                params.push(("idAgrupamentoProcessoTarefa".into(), grouping.to_string()));
                params.push(("pagina".into(), page.to_string()));
                params.push(("tamanhoPagina".into(), self.page_size.to_string()));
            }
        }
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!(
            "{API_PREFIX}/paineladvogado/{}/processos?{query}",
            self.advocate_id
        )
    }
}

/// Path of the panel totalizer list for an advocate.
pub fn counters_path(advocate_id: u64) -> String {
    format!("{API_PREFIX}/paineladvogado/{advocate_id}/totalizadores?tipoPainelAdvogado=0")
}

/// One harvested case record.
///
/// Only the fields the pipeline itself needs are typed; everything else the
/// server sends is preserved verbatim in `extra` and survives the snapshot
/// round-trip. Enrichment fields are additive and absent until filled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseRecord {
    pub id: i64,

    #[serde(rename = "numeroProcesso")]
    pub case_number: String,

    #[serde(rename = "idDocumento", default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<i64>,

    #[serde(rename = "temAssociacao", default)]
    pub has_associations: bool,

    /// Viewer URL derived from case id + document id.
    #[serde(rename = "urlDocumento", default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,

    #[serde(
        rename = "documentoMetadados",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub document_info: Option<DocumentInfo>,

    /// One page of associated cases, kept opaque.
    #[serde(
        rename = "processosAssociados",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub associated_cases: Option<Vec<Value>>,

    /// Where the extracted artifact landed on disk.
    #[serde(rename = "pdfLocal", default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Metadata of the document attached to a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentInfo {
    #[serde(rename = "titulo", default)]
    pub title: Option<String>,

    #[serde(rename = "tipo", default)]
    pub kind: Option<String>,

    #[serde(rename = "nomeArquivo", default)]
    pub file_name: Option<String>,

    #[serde(rename = "tamanho", default)]
    pub size: Option<u64>,

    #[serde(rename = "criadoEm", default)]
    pub created_at: Option<String>,

    #[serde(rename = "juntadoEm", default)]
    pub attached_at: Option<String>,
}

/// One page of the listing endpoint, extracted leniently.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub records: Vec<CaseRecord>,
    pub total_pages: u32,
    pub total_records: Option<u64>,
}

impl ListingPage {
    /// Reads a listing response body. A missing or malformed item list is
    /// zero items for the page; a missing or zero page count is one page.
    pub fn from_value(body: &Value) -> Self {
        let total_pages = body
            .get("qtdPaginas")
            .and_then(Value::as_u64)
            .filter(|&n| n > 0)
            .unwrap_or(1) as u32;
        let total_records = body.get("totalRegistros").and_then(Value::as_u64);
        let records = body
            .get("resultado")
            .and_then(|v| serde_json::from_value::<Vec<CaseRecord>>(v.clone()).ok())
            .unwrap_or_default();
        Self {
            records,
            total_pages,
            total_records,
        }
    }
}

/// Per-grouping case count from the panel totalizer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCounter {
    #[serde(rename = "idAgrupamentoProcessoTarefa")]
    pub grouping_id: u32,

    #[serde(rename = "quantidadeProcessos", default)]
    pub case_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_page_reads_server_fields() {
        let body = json!({
            "resultado": [
                {"id": 1, "numeroProcesso": "0010001-23.2024.5.03.0001"},
                {"id": 2, "numeroProcesso": "0010002-23.2024.5.03.0001", "idDocumento": 77}
            ],
            "qtdPaginas": 3,
            "totalRegistros": 250
        });

        let page = ListingPage::from_value(&body);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_records, Some(250));
        assert_eq!(page.records[1].document_id, Some(77));
    }

    #[test]
    fn listing_page_defaults_when_fields_absent() {
        let page = ListingPage::from_value(&json!({}));
        assert!(page.records.is_empty());
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.total_records, None);

        // Malformed item list is zero items, not an error.
        let page = ListingPage::from_value(&json!({"resultado": "oops", "qtdPaginas": 0}));
        assert!(page.records.is_empty());
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn record_preserves_unknown_fields() {
        let body = json!({
            "id": 9,
            "numeroProcesso": "0010009-23.2024.5.03.0001",
            "nomeParteAutora": "Fulano de Tal",
            "temAssociacao": true
        });

        let record: CaseRecord = serde_json::from_value(body.clone()).unwrap();
        assert!(record.has_associations);
        assert_eq!(
            record.extra.get("nomeParteAutora").and_then(Value::as_str),
            Some("Fulano de Tal")
        );

        let round = serde_json::to_value(&record).unwrap();
        assert_eq!(round.get("nomeParteAutora"), body.get("nomeParteAutora"));
    }

    #[test]
    fn pending_listing_path_repeats_filters() {
        let request = CollectionRequest::new(
            Collection::Pending {
                deadline_filters: vec!["I".into(), "C".into()],
            },
            29203,
        );
        let path = request.listing_path(2);
        assert!(path.starts_with("/pje-comum-api/api/paineladvogado/29203/processos?"));
        assert!(path.contains("agrupadorExpediente=I&agrupadorExpediente=C"));
        assert!(path.contains("pagina=2"));
        assert!(path.contains("tamanhoPagina=100"));
        assert!(path.contains("tipoPainelAdvogado=2"));
        assert!(path.contains("ordenacaoCrescente=false"));
    }

    #[test]
    fn grouped_listing_path_uses_grouping_id() {
        let request = CollectionRequest::new(Collection::Archived, 29203).with_page_size(50);
        let path = request.listing_path(1);
        assert!(path.contains("idAgrupamentoProcessoTarefa=5"));
        assert!(path.contains("tamanhoPagina=50"));
        assert!(!path.contains("agrupadorExpediente"));
    }

    #[test]
    fn credential_debug_masks_secret() {
        let credential = Credential::new("07529294610", "hunter2");
        let debug = format!("{credential:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("07529294610"));
        assert!(debug.contains("075***"));
    }

    #[test]
    fn portal_host_strips_scheme() {
        let portal = PortalConfig::new(
            "https://pje.trt3.jus.br/primeirograu/login.seam",
            "https://pje.trt3.jus.br",
        );
        assert_eq!(portal.portal_host(), "pje.trt3.jus.br");
    }
}
