//! Per-record best-effort augmentation.
//!
//! Every sub-step here is independent and swallows its own failure: a record
//! that cannot be enriched is still emitted with the corresponding fields
//! absent. Nothing in this module ever aborts a harvest.

use serde_json::Value;
use tracing::debug;

use crate::harvest::artifact::ArtifactStore;
use crate::model::{CaseRecord, DocumentInfo, API_PREFIX};
use crate::traits::AuthenticatedApi;

/// Augments harvested records with document metadata, associated cases and
/// the extracted artifact.
#[derive(Debug, Clone)]
pub struct Enricher {
    base_url: String,
    artifacts: Option<ArtifactStore>,
}

impl Enricher {
    /// `base_url` is the portal origin used to derive viewer URLs.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            artifacts: None,
        }
    }

    /// Enables artifact extraction into `store`. Without a store the
    /// document download sub-step is skipped entirely.
    pub fn with_artifacts(mut self, store: ArtifactStore) -> Self {
        self.artifacts = Some(store);
        self
    }

    fn viewer_url(&self, case_id: i64, document_id: i64) -> String {
        format!(
            "{}/pjekz/processo/{case_id}/documento/{document_id}",
            self.base_url.trim_end_matches('/')
        )
    }

    pub(crate) fn metadata_path(case_id: i64, document_id: i64) -> String {
        format!(
            "{API_PREFIX}/processos/id/{case_id}/documentos/id/{document_id}?incluirAssinatura=false&incluirAnexos=false"
        )
    }

    pub(crate) fn associated_path(case_id: i64) -> String {
        format!(
            "{API_PREFIX}/processos/id/{case_id}/associados?pagina=1&tamanhoPagina=100&ordenacaoCrescente=true"
        )
    }

    /// Runs the enrichment sub-steps on one record.
    ///
    /// The record is always returned, however many sub-steps failed; a
    /// failed sub-step leaves its field absent and logs at `debug`.
    pub async fn enrich<A>(&self, api: &A, mut record: CaseRecord) -> CaseRecord
    where
        A: AuthenticatedApi + ?Sized,
    {
        if let Some(document_id) = record.document_id {
            record.document_url = Some(self.viewer_url(record.id, document_id));

            match api.get_json(&Self::metadata_path(record.id, document_id)).await {
                Ok(body) => match serde_json::from_value::<DocumentInfo>(body) {
                    Ok(info) => record.document_info = Some(info),
                    Err(err) => {
                        debug!(case = %record.case_number, error = %err, "document metadata unreadable")
                    }
                },
                Err(err) => {
                    debug!(case = %record.case_number, error = %err, "document metadata unavailable")
                }
            }
        }

        if record.has_associations {
            match api.get_json(&Self::associated_path(record.id)).await {
                Ok(body) => {
                    let associated = body
                        .get("resultado")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    record.associated_cases = Some(associated);
                }
                Err(err) => {
                    debug!(case = %record.case_number, error = %err, "associated cases unavailable")
                }
            }
        }

        if let (Some(document_id), Some(store)) = (record.document_id, self.artifacts.as_ref()) {
            record.artifact_path = store
                .fetch(api, record.id, document_id, &record.case_number)
                .await;
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ApiError;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde_json::json;
    use std::collections::HashMap;

    fn record(id: i64, case_number: &str) -> CaseRecord {
        serde_json::from_value(json!({"id": id, "numeroProcesso": case_number})).unwrap()
    }

    // Scripted responses keyed by exact request path; any request outside
    // the script is a test bug.
    struct ScriptedApi {
        json: HashMap<String, Result<Value, u16>>,
        binary: Option<Result<String, u16>>,
    }

    impl ScriptedApi {
        fn empty() -> Self {
            Self {
                json: HashMap::new(),
                binary: None,
            }
        }
    }

    #[async_trait]
    impl AuthenticatedApi for ScriptedApi {
        async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
            match self.json.get(path) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(ApiError::Status {
                    path: path.to_string(),
                    status: *status,
                }),
                None => panic!("unscripted request: {path}"),
            }
        }

        async fn get_encoded_binary(&self, path: &str) -> Result<String, ApiError> {
            match &self.binary {
                Some(Ok(encoded)) => Ok(encoded.clone()),
                Some(Err(status)) => Err(ApiError::Status {
                    path: path.to_string(),
                    status: *status,
                }),
                None => panic!("unscripted binary request: {path}"),
            }
        }
    }

    #[tokio::test]
    async fn record_without_document_reference_is_untouched() {
        let enricher = Enricher::new("https://pje.trt3.jus.br");
        let api = ScriptedApi::empty();

        let input = record(1, "0010001-23.2024.5.03.0001");
        let output = enricher.enrich(&api, input.clone()).await;
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn document_reference_gains_viewer_url_and_metadata() {
        let enricher = Enricher::new("https://pje.trt3.jus.br/");
        let mut api = ScriptedApi::empty();
        api.json.insert(
            Enricher::metadata_path(1, 77),
            Ok(json!({"titulo": "Sentença", "tipo": "Sentença", "nomeArquivo": "sentenca.pdf", "tamanho": 52413})),
        );

        let mut input = record(1, "0010001-23.2024.5.03.0001");
        input.document_id = Some(77);

        let output = enricher.enrich(&api, input).await;
        assert_eq!(
            output.document_url.as_deref(),
            Some("https://pje.trt3.jus.br/pjekz/processo/1/documento/77")
        );
        let info = output.document_info.unwrap();
        assert_eq!(info.title.as_deref(), Some("Sentença"));
        assert_eq!(info.size, Some(52413));
    }

    #[tokio::test]
    async fn flagged_record_gains_associated_cases() {
        let enricher = Enricher::new("https://pje.trt3.jus.br");
        let mut api = ScriptedApi::empty();
        api.json.insert(
            Enricher::associated_path(9),
            Ok(json!({"resultado": [{"id": 10}, {"id": 11}]})),
        );

        let mut input = record(9, "0010009-23.2024.5.03.0001");
        input.has_associations = true;

        let output = enricher.enrich(&api, input).await;
        assert_eq!(output.associated_cases.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn failed_sub_steps_leave_fields_absent_but_emit_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let enricher = Enricher::new("https://pje.trt3.jus.br")
            .with_artifacts(ArtifactStore::new(dir.path()));

        let mut api = ScriptedApi::empty();
        api.json.insert(Enricher::metadata_path(1, 77), Err(500));
        api.json.insert(Enricher::associated_path(1), Err(503));
        api.binary = Some(Err(404));

        let mut input = record(1, "0010001-23.2024.5.03.0001");
        input.document_id = Some(77);
        input.has_associations = true;

        let output = enricher.enrich(&api, input).await;
        // The derived URL needs no request, so it survives.
        assert!(output.document_url.is_some());
        assert!(output.document_info.is_none());
        assert!(output.associated_cases.is_none());
        assert!(output.artifact_path.is_none());
        assert_eq!(output.case_number, "0010001-23.2024.5.03.0001");
    }

    #[tokio::test]
    async fn artifact_failure_does_not_disturb_other_enrichment() {
        let dir = tempfile::tempdir().unwrap();
        let enricher = Enricher::new("https://pje.trt3.jus.br")
            .with_artifacts(ArtifactStore::new(dir.path()));

        let mut api = ScriptedApi::empty();
        api.json.insert(
            Enricher::metadata_path(1, 77),
            Ok(json!({"titulo": "Despacho"})),
        );
        api.binary = Some(Err(500));

        let mut input = record(1, "0010001-23.2024.5.03.0001");
        input.document_id = Some(77);

        let output = enricher.enrich(&api, input).await;
        assert!(output.document_info.is_some());
        assert!(output.artifact_path.is_none());
    }

    #[tokio::test]
    async fn successful_artifact_sets_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let enricher = Enricher::new("https://pje.trt3.jus.br")
            .with_artifacts(ArtifactStore::new(dir.path()));

        let mut api = ScriptedApi::empty();
        api.json
            .insert(Enricher::metadata_path(1, 77), Ok(json!({})));
        api.binary = Some(Ok(BASE64.encode(b"%PDF-1.4")));

        let mut input = record(1, "0010001-23.2024.5.03.0001");
        input.document_id = Some(77);

        let output = enricher.enrich(&api, input).await;
        let path = output.artifact_path.expect("artifact should be written");
        assert!(path.exists());
    }
}
