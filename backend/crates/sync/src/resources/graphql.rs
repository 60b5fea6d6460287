use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use shopsync_common::types::ResourceType;
use shopsync_db::jobs::models::SkippedRecord;
use shopsync_db::records::models::{Fields, LocalRecord};
use shopsync_shopify::{GraphqlResponse, PageInfo, ShopifyClient, ShopifyClientError, UserError};

use super::{ExternalRecord, ImportPage, ResourceSync};

/// One remote attribute and the local field it lands in.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    pub local: &'static str,
    /// JSON pointer into the GraphQL node, e.g. `/totalPriceSet/shopMoney/amount`.
    pub pointer: &'static str,
    /// Sent back on export. Only top-level pointers may be writable.
    pub writable: bool,
}

impl FieldMap {
    pub const fn read(local: &'static str, pointer: &'static str) -> Self {
        Self {
            local,
            pointer,
            writable: false,
        }
    }

    pub const fn write(local: &'static str, pointer: &'static str) -> Self {
        Self {
            local,
            pointer,
            writable: true,
        }
    }

    fn input_key(&self) -> &'static str {
        self.pointer.trim_start_matches('/')
    }
}

/// Create/update/delete mutations of an exportable resource.
#[derive(Debug, Clone, Copy)]
pub struct Mutations {
    pub create: &'static str,
    pub create_root: &'static str,
    pub update: &'static str,
    pub update_root: &'static str,
    pub delete: &'static str,
    pub delete_root: &'static str,
    /// Payload key holding the written object (`product`).
    pub object_key: &'static str,
    /// Payload key holding the deleted id (`deletedProductId`).
    pub deleted_id_key: &'static str,
}

#[derive(Debug)]
pub struct ResourceSpec {
    pub resource_type: ResourceType,
    /// Root connection field of `list_query` (`products`).
    pub connection: &'static str,
    /// Takes `$first`, `$after` and `$query`; selects `nodes` and `pageInfo`.
    pub list_query: &'static str,
    pub bulk_query: &'static str,
    pub fields: &'static [FieldMap],
    /// `None` for import-only resources.
    pub mutations: Option<Mutations>,
}

impl ResourceSpec {
    /// Translate a GraphQL node (or bulk line) into an [`ExternalRecord`].
    pub fn translate(&self, node: &Value) -> Result<ExternalRecord, String> {
        let external_id = node
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("{} node without id", self.resource_type))?
            .to_string();

        let raw_updated = node
            .get("updatedAt")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("{external_id}: missing updatedAt"))?;
        let updated_at = DateTime::parse_from_rfc3339(raw_updated)
            .map_err(|e| format!("{external_id}: bad updatedAt '{raw_updated}': {e}"))?
            .with_timezone(&Utc);

        let mut fields = Fields::new();
        for field in self.fields {
            if let Some(value) = node.pointer(field.pointer) {
                fields.insert(field.local.to_string(), value.clone());
            }
        }

        Ok(ExternalRecord {
            external_id,
            updated_at,
            fields,
        })
    }

    /// Mutation input for a local record. Only writable fields present
    /// locally are sent.
    pub fn build_input(&self, record: &LocalRecord, existing_external_id: Option<&str>) -> Value {
        let mut input = Map::new();
        if let Some(id) = existing_external_id {
            input.insert("id".to_string(), Value::String(id.to_string()));
        }
        for field in self.fields.iter().filter(|f| f.writable) {
            if let Some(value) = record.fields.get(field.local) {
                input.insert(field.input_key().to_string(), value.clone());
            }
        }
        Value::Object(input)
    }
}

/// `updated_at:>='...'` search filter for incremental imports.
pub fn updated_since_filter(since: DateTime<Utc>) -> String {
    format!(
        "updated_at:>='{}'",
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// [`ResourceSync`] over the Admin GraphQL API.
pub struct GraphqlResource {
    client: ShopifyClient,
    spec: &'static ResourceSpec,
    page_size: u32,
}

impl GraphqlResource {
    pub fn new(client: ShopifyClient, spec: &'static ResourceSpec, page_size: u32) -> Self {
        Self {
            client,
            spec,
            page_size,
        }
    }

    fn mutations(&self) -> Result<&Mutations, ShopifyClientError> {
        self.spec.mutations.as_ref().ok_or_else(|| {
            ShopifyClientError::Validation(format!(
                "{} is import-only",
                self.spec.resource_type
            ))
        })
    }

    fn parse_page(&self, resp: &GraphqlResponse) -> Result<ImportPage, ShopifyClientError> {
        let root = format!("/{}", self.spec.connection);
        let connection = resp.data_at(&root).ok_or_else(|| {
            ShopifyClientError::Decode(format!("response has no '{}' connection", self.spec.connection))
        })?;

        let page_info: PageInfo = connection
            .get("pageInfo")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ShopifyClientError::Decode(format!("bad pageInfo: {e}")))?
            .unwrap_or_default();

        let mut page = ImportPage {
            next_cursor: page_info.end_cursor,
            has_more: page_info.has_next_page,
            ..ImportPage::default()
        };

        let nodes = connection
            .get("nodes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for node in nodes {
            match self.spec.translate(node) {
                Ok(record) => page.records.push(record),
                Err(reason) => page.rejected.push(SkippedRecord {
                    reference: node
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or("<unknown>")
                        .to_string(),
                    reason,
                }),
            }
        }
        Ok(page)
    }
}

#[async_trait]
impl ResourceSync for GraphqlResource {
    fn resource_type(&self) -> ResourceType {
        self.spec.resource_type
    }

    fn supports_export(&self) -> bool {
        self.spec.mutations.is_some()
    }

    async fn import_page(
        &self,
        cursor: Option<&str>,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<ImportPage, ShopifyClientError> {
        let variables = json!({
            "first": self.page_size,
            "after": cursor,
            "query": updated_since.map(updated_since_filter),
        });
        let resp = self.client.execute(self.spec.list_query, variables).await?;
        let page = self.parse_page(&resp)?;

        tracing::debug!(
            resource = %self.spec.resource_type,
            cursor = ?cursor,
            records = page.records.len(),
            has_more = page.has_more,
            "fetched import page"
        );
        Ok(page)
    }

    async fn export(
        &self,
        record: &LocalRecord,
        existing_external_id: Option<&str>,
    ) -> Result<String, ShopifyClientError> {
        let mutations = self.mutations()?;
        let (mutation, root) = match existing_external_id {
            Some(_) => (mutations.update, mutations.update_root),
            None => (mutations.create, mutations.create_root),
        };
        let input = self.spec.build_input(record, existing_external_id);
        let resp = self.client.execute(mutation, json!({ "input": input })).await?;

        let pointer = format!("/{root}");
        let user_errors = resp.user_errors(&pointer);
        if !user_errors.is_empty() {
            return Err(ShopifyClientError::Validation(UserError::describe(&user_errors)));
        }

        resp.data_at(&format!("{pointer}/{}/id", mutations.object_key))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ShopifyClientError::Decode(format!("{root} returned no id")))
    }

    async fn delete(&self, external_id: &str) -> Result<bool, ShopifyClientError> {
        let mutations = self.mutations()?;
        let resp = self
            .client
            .execute(mutations.delete, json!({ "input": { "id": external_id } }))
            .await?;

        let pointer = format!("/{}", mutations.delete_root);
        let user_errors = resp.user_errors(&pointer);
        if !user_errors.is_empty() {
            if user_errors
                .iter()
                .all(|e| e.message.to_lowercase().contains("does not exist"))
            {
                return Ok(false);
            }
            return Err(ShopifyClientError::Validation(UserError::describe(&user_errors)));
        }

        Ok(resp
            .data_at(&format!("{pointer}/{}", mutations.deleted_id_key))
            .is_some_and(|v| !v.is_null()))
    }

    fn bulk_query(&self) -> Option<&str> {
        Some(self.spec.bulk_query)
    }

    fn translate_bulk_line(&self, line: &Value) -> Result<Option<ExternalRecord>, String> {
        if line.get("__parentId").is_some() {
            return Ok(None);
        }
        self.spec.translate(line).map(Some)
    }

    async fn import_bulk(&self) -> Result<ImportPage, ShopifyClientError> {
        let operation = self.client.run_bulk_query(self.spec.bulk_query).await?;
        let lines = match operation.url.as_deref() {
            Some(url) => self.client.download_bulk_results(url).await?,
            None => Vec::new(),
        };

        let mut page = ImportPage::default();
        for line in &lines {
            match self.translate_bulk_line(line) {
                Ok(Some(record)) => page.records.push(record),
                Ok(None) => {}
                Err(reason) => page.rejected.push(SkippedRecord {
                    reference: line
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or("<unknown>")
                        .to_string(),
                    reason,
                }),
            }
        }

        tracing::info!(
            resource = %self.spec.resource_type,
            bulk_id = %operation.id,
            records = page.records.len(),
            rejected = page.rejected.len(),
            "bulk import downloaded"
        );
        Ok(page)
    }
}
