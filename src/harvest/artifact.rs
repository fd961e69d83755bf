//! Binary document extraction through the authenticated session boundary.
//!
//! The content endpoint is only authorized from inside the signed-on page,
//! so the payload is base64-encoded there, crosses the boundary once as an
//! opaque string, and is decoded and written to disk by this store. A fetch
//! or decode failure yields no file; there are no partially written
//! artifacts left behind.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::model::API_PREFIX;
use crate::traits::AuthenticatedApi;

/// Writes extracted documents under one directory, one file per
/// (case number, document id), overwriting idempotently by name.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Deterministic file name: digits of the case number plus the document
    /// id. Identical inputs always name the same file.
    pub fn file_name(case_number: &str, document_id: i64) -> String {
        let digits: String = case_number.chars().filter(|c| c.is_ascii_digit()).collect();
        format!("{digits}-{document_id}.pdf")
    }

    /// Relative path of the binary content endpoint for one document.
    pub fn content_path(case_id: i64, document_id: i64) -> String {
        format!("{API_PREFIX}/processos/id/{case_id}/documentos/id/{document_id}/conteudo")
    }

    /// Fetches one document through the session and writes it to the store.
    ///
    /// Returns the written path, or `None` on any failure. A missing
    /// artifact is a degraded field, never an error that stops the harvest.
    pub async fn fetch<A>(
        &self,
        api: &A,
        case_id: i64,
        document_id: i64,
        case_number: &str,
    ) -> Option<PathBuf>
    where
        A: AuthenticatedApi + ?Sized,
    {
        let content_path = Self::content_path(case_id, document_id);
        let encoded = match api.get_encoded_binary(&content_path).await {
            Ok(encoded) => encoded,
            Err(err) => {
                debug!(case_number, document_id, error = %err, "artifact fetch skipped");
                return None;
            }
        };

        let bytes = match BASE64.decode(encoded.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(case_number, document_id, error = %err, "artifact payload not decodable");
                return None;
            }
        };

        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %err, "artifact directory unavailable");
            return None;
        }

        let file_path = self.dir.join(Self::file_name(case_number, document_id));
        match tokio::fs::write(&file_path, &bytes).await {
            Ok(()) => {
                debug!(path = %file_path.display(), size = bytes.len(), "artifact written");
                Some(file_path)
            }
            Err(err) => {
                warn!(path = %file_path.display(), error = %err, "artifact write failed");
                // Never retain a torn file.
                let _ = tokio::fs::remove_file(&file_path).await;
                None
            }
        }
    }
}
