pub mod config;
pub mod conflict;
pub mod controller;
pub mod resources;
pub mod webhook;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::SyncConfig;
pub use conflict::{resolve, Resolution, Winner};
pub use controller::{JobHandle, SyncController};
pub use resources::{ExternalRecord, ImportPage, ResourceRegistry, ResourceSync};
pub use webhook::{RejectReason, WebhookDisposition, WebhookOutcome, WebhookRouter};
pub use worker::SyncWorker;
