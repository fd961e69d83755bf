//! Paginated harvest pipeline.
//!
//! This module provides the [`Harvester`] that pages through one collection
//! over one authenticated session:
//! - Pagination discovered lazily from the server's first response
//! - Accumulation in server order (no client resort)
//! - Stop-on-failure with partial results, flagged incomplete; a page
//!   fetch failure never raises past [`Harvester::collect`]
//! - Optional sequential enrichment pass with rate-bounding delays
//! - Structured logging via `tracing`

use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::harvest::enrich::Enricher;
use crate::model::{counters_path, CaseRecord, CollectionRequest, GroupCounter, ListingPage};
use crate::traits::{ApiError, AuthenticatedApi, Pacing};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Result of one collection harvest.
///
/// A partial harvest is always distinguishable from a full one: `complete`
/// is false and the stats carry how far pagination got.
#[derive(Debug)]
pub struct HarvestOutcome {
    /// Accumulated records, in server order.
    pub records: Vec<CaseRecord>,

    /// Whether every declared page was fetched.
    pub complete: bool,

    /// Pagination and timing detail for reporting.
    pub stats: HarvestStats,
}

/// Statistics about one harvest run.
#[derive(Debug, Default, Clone)]
pub struct HarvestStats {
    /// Pages successfully fetched.
    pub pages_fetched: u32,

    /// Page count declared by the first successful response. `None` when
    /// the very first request already failed.
    pub total_pages: Option<u32>,

    /// Record count declared by the first successful response.
    pub total_declared: Option<u64>,

    /// How many records went through the enrichment pass.
    pub records_enriched: usize,

    /// Wall time of the whole run (milliseconds).
    pub duration_ms: u64,
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Pagination failures. Internal to the pipeline: they stop forward progress
/// and surface as an incomplete [`HarvestOutcome`], never as a raised error.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("listing page {page} fetch failed: {source}")]
    PageFetchFailed {
        page: u32,
        #[source]
        source: ApiError,
    },
}

// ============================================================================
// Harvester
// ============================================================================

/// Generic paginated collector, reused by every collection.
///
/// One instance is reusable across collections and targets; all state lives
/// in the per-call locals. Requests run strictly sequentially over the
/// single-command session handle.
pub struct Harvester {
    pacing: Pacing,
    enricher: Option<Enricher>,
}

impl Default for Harvester {
    fn default() -> Self {
        Self::new()
    }
}

impl Harvester {
    pub fn new() -> Self {
        Self {
            pacing: Pacing::default(),
            enricher: None,
        }
    }

    /// Replaces the default delay policy.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Enables the per-record enrichment pass.
    pub fn with_enricher(mut self, enricher: Enricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Harvests one collection over one authenticated session.
    ///
    /// The page counter starts at 1. The declared page count is fixed from
    /// the first successful response and never re-derived within one run;
    /// mid-harvest drift of the remote dataset is an accepted
    /// weak-consistency tradeoff. On a page fetch failure the records
    /// accumulated so far are returned with `complete = false`.
    pub async fn collect<A>(&self, api: &A, request: &CollectionRequest) -> HarvestOutcome
    where
        A: AuthenticatedApi + ?Sized,
    {
        let started = Instant::now();
        let mut stats = HarvestStats::default();
        let mut records: Vec<CaseRecord> = Vec::new();
        let mut total_pages: Option<u32> = None;
        let mut page: u32 = 1;

        info!(
            collection = request.collection.key(),
            advocate_id = request.advocate_id,
            "starting harvest"
        );

        let complete = loop {
            let listing = match self.fetch_page(api, request, page).await {
                Ok(listing) => listing,
                Err(err) => {
                    warn!(page, error = %err, "pagination stopped; keeping partial harvest");
                    break false;
                }
            };

            if total_pages.is_none() {
                total_pages = Some(listing.total_pages);
                stats.total_declared = listing.total_records;
                info!(
                    total_pages = listing.total_pages,
                    total_records = ?listing.total_records,
                    "pagination discovered"
                );
            }

            stats.pages_fetched += 1;
            debug!(page, items = listing.records.len(), "page captured");
            records.extend(listing.records);

            // total_pages was fixed above on the first success.
            if page >= total_pages.unwrap_or(1) {
                break true;
            }
            page += 1;
            sleep(self.pacing.between_pages).await;
        };

        stats.total_pages = total_pages;

        if let Some(enricher) = &self.enricher {
            let mut enriched = Vec::with_capacity(records.len());
            for record in records {
                enriched.push(enricher.enrich(api, record).await);
                sleep(self.pacing.between_records).await;
            }
            stats.records_enriched = enriched.len();
            records = enriched;
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            records = records.len(),
            complete,
            pages = stats.pages_fetched,
            duration_ms = stats.duration_ms,
            "harvest finished"
        );

        HarvestOutcome {
            records,
            complete,
            stats,
        }
    }

    async fn fetch_page<A>(
        &self,
        api: &A,
        request: &CollectionRequest,
        page: u32,
    ) -> Result<ListingPage, HarvestError>
    where
        A: AuthenticatedApi + ?Sized,
    {
        let body = api
            .get_json(&request.listing_path(page))
            .await
            .map_err(|source| HarvestError::PageFetchFailed { page, source })?;
        Ok(ListingPage::from_value(&body))
    }
}

/// Best-effort lookup of the panel totalizers, used to log the expected
/// record count before a grouping harvest. Failure is logged and ignored.
pub async fn fetch_counters<A>(api: &A, advocate_id: u64) -> Vec<GroupCounter>
where
    A: AuthenticatedApi + ?Sized,
{
    match api.get_json(&counters_path(advocate_id)).await {
        Ok(body) => match serde_json::from_value::<Vec<GroupCounter>>(body) {
            Ok(counters) => counters,
            Err(err) => {
                debug!(error = %err, "totalizer list unreadable");
                Vec::new()
            }
        },
        Err(err) => {
            debug!(error = %err, "totalizer list unavailable");
            Vec::new()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
