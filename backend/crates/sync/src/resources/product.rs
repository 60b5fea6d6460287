use shopsync_common::types::ResourceType;

use super::graphql::{FieldMap, Mutations, ResourceSpec};

const LIST_QUERY: &str = r#"
query Products($first: Int!, $after: String, $query: String) {
  products(first: $first, after: $after, query: $query, sortKey: UPDATED_AT) {
    nodes {
      id
      title
      handle
      status
      vendor
      productType
      tags
      descriptionHtml
      updatedAt
    }
    pageInfo { hasNextPage endCursor }
  }
}"#;

const BULK_QUERY: &str = r#"
{
  products {
    edges {
      node { id title handle status vendor productType tags descriptionHtml updatedAt }
    }
  }
}"#;

const CREATE: &str = r#"
mutation ProductCreate($input: ProductInput!) {
  productCreate(input: $input) {
    product { id updatedAt }
    userErrors { field message }
  }
}"#;

const UPDATE: &str = r#"
mutation ProductUpdate($input: ProductInput!) {
  productUpdate(input: $input) {
    product { id updatedAt }
    userErrors { field message }
  }
}"#;

const DELETE: &str = r#"
mutation ProductDelete($input: ProductDeleteInput!) {
  productDelete(input: $input) {
    deletedProductId
    userErrors { field message }
  }
}"#;

const FIELDS: &[FieldMap] = &[
    FieldMap::write("title", "/title"),
    FieldMap::write("handle", "/handle"),
    FieldMap::write("status", "/status"),
    FieldMap::write("vendor", "/vendor"),
    FieldMap::write("product_type", "/productType"),
    FieldMap::write("tags", "/tags"),
    FieldMap::write("description_html", "/descriptionHtml"),
];

pub static SPEC: ResourceSpec = ResourceSpec {
    resource_type: ResourceType::Product,
    connection: "products",
    list_query: LIST_QUERY,
    bulk_query: BULK_QUERY,
    fields: FIELDS,
    mutations: Some(Mutations {
        create: CREATE,
        create_root: "productCreate",
        update: UPDATE,
        update_root: "productUpdate",
        delete: DELETE,
        delete_root: "productDelete",
        object_key: "product",
        deleted_id_key: "deletedProductId",
    }),
};
