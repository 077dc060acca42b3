//! Outbound webhook notifications: payload formatting, signing, delivery and
//! the retry ladder.

pub mod engine;
pub mod error;
pub mod format;
pub mod signature;
pub mod state;
pub mod store;

pub use engine::{DeliveryReport, DispatchOutcome, SweepReport, WebhookEngine};
pub use error::WebhookError;
pub use format::{detect_target, render, LeadSummary, Notification, TargetKind, EVENT_NEW_LEADS};
pub use signature::{sign, verify, SIGNATURE_HEADER};
pub use state::{
    backoff_for, AttemptResult, DeliveryState, DeliveryStatus, BACKOFF_LADDER_MINUTES,
    DEFAULT_MAX_ATTEMPTS,
};
pub use store::{Delivery, DeliveryStore, MemoryDeliveryStore, PgDeliveryStore, WebhookTarget};
