//! Ingestion pipeline: connectors, gating, dedup, persistence and analysis
//! dispatch for one platform scan cycle.

pub mod connector;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod manual;
pub mod memory;
pub mod pg;
pub mod stage;
pub mod store;

pub use connector::{Connector, ConnectorError, FetchRequest, HttpConnector};
pub use dispatch::{plan_analysis, DispatchInput, EnrichmentEvent, DEFAULT_BATCH_THRESHOLD};
pub use error::PipelineError;
pub use ingest::{
    gate_monitor, gate_summary, CycleReport, IngestPipeline, MatchedCandidate, MonitorOutcome,
    PipelineSettings, ScanMode, SkipReason,
};
pub use leadscout_db::ManualClaim;
pub use manual::{request_manual_scan, ManualScanOutcome};
pub use memory::{MemoryStageStore, MemoryStore, StoredResult};
pub use pg::{PgStageStore, PgStore};
pub use stage::{CycleId, StageKey, StageRun, StageRunner, StageStore};
pub use store::{MonitorRecord, PipelineStore};
