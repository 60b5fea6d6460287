//! Importers, exporters and deleters, one per Shopify resource.
//!
//! Every resource goes through the same [`ResourceSync`] seam. The Shopify
//! implementations share one generic [`GraphqlResource`] driven by a static
//! [`ResourceSpec`] (queries, mutations and the field mapping).

pub mod customer;
pub mod graphql;
pub mod order;
pub mod product;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shopsync_common::types::ResourceType;
use shopsync_db::jobs::models::SkippedRecord;
use shopsync_db::records::models::{Fields, LocalRecord};
use shopsync_shopify::{ShopifyClient, ShopifyClientError};

pub use graphql::{FieldMap, GraphqlResource, Mutations, ResourceSpec};

/// Remote record translated into the local field vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalRecord {
    /// Shopify global id, `gid://shopify/Product/123`.
    pub external_id: String,
    pub updated_at: DateTime<Utc>,
    pub fields: Fields,
}

/// One page of an import.
#[derive(Debug, Clone, Default)]
pub struct ImportPage {
    pub records: Vec<ExternalRecord>,
    /// Nodes that could not be translated; skipped without failing the page.
    pub rejected: Vec<SkippedRecord>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[async_trait]
pub trait ResourceSync: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    /// Whether local changes can be pushed to Shopify.
    fn supports_export(&self) -> bool {
        true
    }

    /// Fetch the page after `cursor` (the first page for `None`), restricted to
    /// records updated at or after `updated_since` when set.
    async fn import_page(
        &self,
        cursor: Option<&str>,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<ImportPage, ShopifyClientError>;

    /// Create (no `existing_external_id`) or update the remote record.
    /// Returns the external id.
    async fn export(
        &self,
        record: &LocalRecord,
        existing_external_id: Option<&str>,
    ) -> Result<String, ShopifyClientError>;

    /// Delete the remote record. `false` when it was already gone.
    async fn delete(&self, external_id: &str) -> Result<bool, ShopifyClientError>;

    /// Bulk query used for full imports, when the resource has one.
    fn bulk_query(&self) -> Option<&str> {
        None
    }

    /// Translate one JSONL line of a bulk result. `Ok(None)` for lines that
    /// are not top-level records.
    fn translate_bulk_line(&self, _line: &Value) -> Result<Option<ExternalRecord>, String> {
        Ok(None)
    }

    /// Import everything in one bulk operation, returned as a single page.
    async fn import_bulk(&self) -> Result<ImportPage, ShopifyClientError> {
        Err(ShopifyClientError::Validation(format!(
            "bulk import is not available for {}",
            self.resource_type()
        )))
    }
}

/// Resource implementations by type, built once per process.
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    resources: HashMap<ResourceType, Arc<dyn ResourceSync>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shopify-backed resources for every enabled type, sharing `client`
    /// (and with it, the rate budget).
    pub fn shopify(client: &ShopifyClient, page_size: u32, enabled: &[ResourceType]) -> Self {
        let mut registry = Self::new();
        for resource_type in enabled {
            let spec = match resource_type {
                ResourceType::Product => &product::SPEC,
                ResourceType::Customer => &customer::SPEC,
                ResourceType::Order => &order::SPEC,
            };
            registry.register(Arc::new(GraphqlResource::new(client.clone(), spec, page_size)));
        }
        registry
    }

    pub fn register(&mut self, resource: Arc<dyn ResourceSync>) {
        self.resources.insert(resource.resource_type(), resource);
    }

    pub fn get(&self, resource_type: ResourceType) -> Option<Arc<dyn ResourceSync>> {
        self.resources.get(&resource_type).cloned()
    }

    pub fn contains(&self, resource_type: ResourceType) -> bool {
        self.resources.contains_key(&resource_type)
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        let mut types: Vec<_> = self.resources.keys().copied().collect();
        types.sort();
        types
    }
}

/// Build a global id from a numeric REST id.
pub fn gid(resource_type: ResourceType, id: &str) -> String {
    format!("gid://shopify/{}/{}", resource_type.gid_type(), id)
}
