//! Serialized multi-target sweep executor.
//!
//! Scale-out across regional portal instances is strictly sequential: open
//! one page, run one complete lifecycle (sign on, harvest, snapshot), close
//! the page, cool down, move to the next target. Two live contexts never
//! overlap. A failing target produces a report entry and never stops the
//! sweep.

use chrono::Utc;
use serde::Serialize;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::harvest::{Enricher, Harvester};
use crate::model::{CollectionRequest, Credential, HarvestTarget};
use crate::session::SessionDriver;
use crate::snapshot::{snapshot_timestamp, SnapshotWriter};
use crate::traits::{BrowserPage, BrowserProvider, Pacing};

/// Outcome of one target's lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub code: String,
    pub name: String,
    pub region: String,
    pub url_tested: String,
    /// Login succeeded and the harvest came back complete.
    pub success: bool,
    pub login_ok: Option<bool>,
    pub harvest_ok: Option<bool>,
    pub record_count: Option<usize>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub final_url: Option<String>,
    pub page_title: Option<String>,
    pub duration_ms: u64,
}

impl TargetReport {
    fn started(target: &HarvestTarget) -> Self {
        Self {
            code: target.code.clone(),
            name: target.name.clone(),
            region: target.region.clone(),
            url_tested: target.portal.login_url.clone(),
            success: false,
            login_ok: None,
            harvest_ok: None,
            record_count: None,
            error_kind: None,
            error_message: None,
            final_url: None,
            page_title: None,
            duration_ms: 0,
        }
    }
}

/// Per-category target buckets for the sweep summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub login_successful: Vec<String>,
    pub login_failed: Vec<String>,
    pub harvest_successful: Vec<String>,
    pub harvest_failed: Vec<String>,
    pub structure_mismatches: Vec<String>,
    pub authentication_issues: Vec<String>,
}

/// Aggregate of one full sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub timestamp: String,
    pub total_targets: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<TargetReport>,
    pub summary: SweepSummary,
}

impl SweepReport {
    fn from_results(results: Vec<TargetReport>) -> Self {
        let mut summary = SweepSummary::default();
        for result in &results {
            match result.login_ok {
                Some(true) => summary.login_successful.push(result.code.clone()),
                Some(false) => summary.login_failed.push(result.code.clone()),
                None => {}
            }
            match result.harvest_ok {
                Some(true) => summary.harvest_successful.push(result.code.clone()),
                Some(false) => summary.harvest_failed.push(result.code.clone()),
                None => {}
            }
            match result.error_kind.as_deref() {
                Some("structure_mismatch") => summary.structure_mismatches.push(result.code.clone()),
                Some("authentication_rejected") => {
                    summary.authentication_issues.push(result.code.clone())
                }
                _ => {}
            }
        }

        let success_count = results.iter().filter(|r| r.success).count();
        Self {
            timestamp: Utc::now().to_rfc3339(),
            total_targets: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            results,
            summary,
        }
    }
}

/// Runs one collection harvest against many portal instances, one at a time.
pub struct SweepExecutor<B: BrowserProvider> {
    provider: B,
    credential: Credential,
    pacing: Pacing,
    enricher: Option<Enricher>,
    snapshots: Option<SnapshotWriter>,
}

impl<B: BrowserProvider> SweepExecutor<B> {
    pub fn new(provider: B, credential: Credential) -> Self {
        Self {
            provider,
            credential,
            pacing: Pacing::default(),
            enricher: None,
            snapshots: None,
        }
    }

    /// Replaces the default delay policy for every lifecycle in the sweep.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Enables per-record enrichment during each target's harvest.
    pub fn with_enricher(mut self, enricher: Enricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Persists each successful target's records as a snapshot.
    pub fn with_snapshots(mut self, writer: SnapshotWriter) -> Self {
        self.snapshots = Some(writer);
        self
    }

    /// Runs the full sweep and aggregates per-target reports.
    pub async fn execute(
        &self,
        targets: &[HarvestTarget],
        request: &CollectionRequest,
    ) -> SweepReport {
        let mut results = Vec::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            info!(
                code = %target.code,
                position = index + 1,
                total = targets.len(),
                "running target lifecycle"
            );
            results.push(self.run_target(target, request).await);

            if index + 1 < targets.len() {
                sleep(self.pacing.target_cooldown).await;
            }
        }
        SweepReport::from_results(results)
    }

    /// One complete lifecycle: open, sign on, harvest, snapshot, close.
    async fn run_target(&self, target: &HarvestTarget, request: &CollectionRequest) -> TargetReport {
        let started = Instant::now();
        let mut report = TargetReport::started(target);

        let page = match self.provider.open().await {
            Ok(page) => page,
            Err(err) => {
                warn!(code = %target.code, error = %err, "could not open a page");
                report.error_kind = Some("driver".to_string());
                report.error_message = Some(err.to_string());
                report.duration_ms = started.elapsed().as_millis() as u64;
                return report;
            }
        };

        let driver = SessionDriver::new(target.portal.clone(), self.credential.clone())
            .with_pacing(self.pacing.clone());

        match driver.authenticate(&page).await {
            Ok(session) => {
                report.login_ok = Some(true);

                let mut harvester = Harvester::new().with_pacing(self.pacing.clone());
                if let Some(enricher) = &self.enricher {
                    harvester = harvester.with_enricher(enricher.clone());
                }

                let outcome = harvester.collect(&session, request).await;
                report.record_count = Some(outcome.records.len());
                report.harvest_ok = Some(outcome.complete);
                report.success = outcome.complete;
                if !outcome.complete {
                    report.error_kind = Some("harvest_incomplete".to_string());
                }

                if let Some(writer) = &self.snapshots {
                    let write = writer.write(
                        request.collection.key(),
                        &request.collection.filter_tags(),
                        &snapshot_timestamp(),
                        &outcome.records,
                    );
                    if let Err(err) = write {
                        warn!(code = %target.code, error = %err, "snapshot write failed");
                    }
                }
            }
            Err(err) => {
                report.login_ok = Some(false);
                report.error_kind = Some(err.kind().to_string());
                report.error_message = Some(err.to_string());
            }
        }

        // Landing data is diagnostic only; never fail the report over it.
        report.final_url = page.current_url().await.ok();
        report.page_title = page.title().await.ok();

        if let Err(err) = page.close().await {
            warn!(code = %target.code, error = %err, "page close failed");
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Collection, PortalConfig};
    use crate::traits::DriverError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct MockPage {
        final_url: String,
        title: String,
        // Envelope served when the eval script embeds the given path.
        eval_by_path: HashMap<String, Value>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrowserPage for MockPage {
        async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<(), DriverError> {
            Ok(())
        }

        async fn type_text(&self, _selector: &str, _text: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn click(&self, _selector: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn eval(&self, script: &str) -> Result<Value, DriverError> {
            for (path, envelope) in &self.eval_by_path {
                if script.contains(path.as_str()) {
                    return Ok(envelope.clone());
                }
            }
            Ok(json!({"ok": false, "status": 500}))
        }

        async fn current_url(&self) -> Result<String, DriverError> {
            Ok(self.final_url.clone())
        }

        async fn title(&self) -> Result<String, DriverError> {
            Ok(self.title.clone())
        }

        async fn close(&self) -> Result<(), DriverError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockProvider {
        pages: Mutex<Vec<MockPage>>,
    }

    #[async_trait]
    impl BrowserProvider for MockProvider {
        type Page = MockPage;

        async fn open(&self) -> Result<MockPage, DriverError> {
            self.pages
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| DriverError::Transport("no pages left".to_string()))
        }
    }

    fn target(code: &str, host: &str) -> HarvestTarget {
        HarvestTarget {
            code: code.to_string(),
            name: format!("Tribunal {code}"),
            region: "Test".to_string(),
            portal: PortalConfig::new(
                format!("https://{host}/primeirograu/login.seam"),
                format!("https://{host}"),
            ),
        }
    }

    fn good_page(host: &str, request: &CollectionRequest, closed: Arc<AtomicUsize>) -> MockPage {
        let mut eval_by_path = HashMap::new();
        eval_by_path.insert(
            request.listing_path(1),
            json!({"ok": true, "body": {"resultado": [
                {"id": 1, "numeroProcesso": "0010001-23"},
                {"id": 2, "numeroProcesso": "0010002-23"}
            ], "qtdPaginas": 1}}),
        );
        MockPage {
            final_url: format!("https://{host}/pjekz/painel"),
            title: "Painel do advogado".to_string(),
            eval_by_path,
            closed,
        }
    }

    fn rejected_page(closed: Arc<AtomicUsize>) -> MockPage {
        MockPage {
            final_url: "https://sso.cloud.pje.jus.br/auth?error=invalid".to_string(),
            title: "Login".to_string(),
            eval_by_path: HashMap::new(),
            closed,
        }
    }

    #[tokio::test]
    async fn sweep_serializes_targets_and_survives_failures() {
        let request = CollectionRequest::new(Collection::GeneralDocket, 29203);
        let closed = Arc::new(AtomicUsize::new(0));

        // Pages pop from the back: first target gets the good page.
        let provider = MockProvider {
            pages: Mutex::new(vec![
                rejected_page(closed.clone()),
                good_page("pje.trt1.jus.br", &request, closed.clone()),
            ]),
        };

        let executor = SweepExecutor::new(provider, Credential::new("user", "pass"))
            .with_pacing(Pacing::none());
        let targets = vec![
            target("trt1", "pje.trt1.jus.br"),
            target("trt2", "pje.trt2.jus.br"),
        ];

        let report = executor.execute(&targets, &request).await;

        assert_eq!(report.total_targets, 2);
        assert_eq!(report.success_count, 1);
        assert_eq!(report.failure_count, 1);
        // Strict submission order.
        assert_eq!(report.results[0].code, "trt1");
        assert_eq!(report.results[1].code, "trt2");
        assert_eq!(report.results[0].record_count, Some(2));
        assert_eq!(report.summary.login_successful, vec!["trt1"]);
        assert_eq!(report.summary.login_failed, vec!["trt2"]);
        assert_eq!(report.summary.authentication_issues, vec!["trt2"]);
        // Every opened page was closed; one lifecycle at a time.
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn successful_target_writes_a_snapshot() {
        let request = CollectionRequest::new(Collection::GeneralDocket, 29203);
        let closed = Arc::new(AtomicUsize::new(0));
        let provider = MockProvider {
            pages: Mutex::new(vec![good_page("pje.trt3.jus.br", &request, closed)]),
        };

        let dir = tempfile::tempdir().unwrap();
        let executor = SweepExecutor::new(provider, Credential::new("user", "pass"))
            .with_pacing(Pacing::none())
            .with_snapshots(SnapshotWriter::new(dir.path()));

        let report = executor
            .execute(&[target("trt3", "pje.trt3.jus.br")], &request)
            .await;
        assert_eq!(report.success_count, 1);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("acervo-geral-"));
    }
}
