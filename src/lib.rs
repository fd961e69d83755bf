pub mod browser;
pub mod executor;
pub mod harvest;
pub mod model;
pub mod session;
pub mod snapshot;
pub mod traits;

// Re-export common types for convenience
pub use browser::{WebDriver, WebDriverPage};
pub use executor::{SweepExecutor, SweepReport, TargetReport};
pub use harvest::{ArtifactStore, Enricher, HarvestOutcome, HarvestStats, Harvester};
pub use model::{
    CaseRecord, Collection, CollectionRequest, Credential, DocumentInfo, HarvestTarget,
    PortalConfig,
};
pub use session::{classify_outcome, Session, SessionDriver, SessionError, SessionPhase};
pub use snapshot::{snapshot_timestamp, SnapshotWriter};
pub use traits::{ApiError, AuthenticatedApi, BrowserPage, BrowserProvider, DriverError, Pacing};
