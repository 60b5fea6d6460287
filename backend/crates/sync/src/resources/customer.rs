use shopsync_common::types::ResourceType;

use super::graphql::{FieldMap, Mutations, ResourceSpec};

const LIST_QUERY: &str = r#"
query Customers($first: Int!, $after: String, $query: String) {
  customers(first: $first, after: $after, query: $query, sortKey: UPDATED_AT) {
    nodes {
      id
      firstName
      lastName
      email
      phone
      note
      tags
      state
      updatedAt
    }
    pageInfo { hasNextPage endCursor }
  }
}"#;

const BULK_QUERY: &str = r#"
{
  customers {
    edges {
      node { id firstName lastName email phone note tags state updatedAt }
    }
  }
}"#;

const CREATE: &str = r#"
mutation CustomerCreate($input: CustomerInput!) {
  customerCreate(input: $input) {
    customer { id updatedAt }
    userErrors { field message }
  }
}"#;

const UPDATE: &str = r#"
mutation CustomerUpdate($input: CustomerInput!) {
  customerUpdate(input: $input) {
    customer { id updatedAt }
    userErrors { field message }
  }
}"#;

const DELETE: &str = r#"
mutation CustomerDelete($input: CustomerDeleteInput!) {
  customerDelete(input: $input) {
    deletedCustomerId
    userErrors { field message }
  }
}"#;

// `state` is managed by Shopify (invites, disabling) and never written back.
const FIELDS: &[FieldMap] = &[
    FieldMap::write("first_name", "/firstName"),
    FieldMap::write("last_name", "/lastName"),
    FieldMap::write("email", "/email"),
    FieldMap::write("phone", "/phone"),
    FieldMap::write("note", "/note"),
    FieldMap::write("tags", "/tags"),
    FieldMap::read("state", "/state"),
];

pub static SPEC: ResourceSpec = ResourceSpec {
    resource_type: ResourceType::Customer,
    connection: "customers",
    list_query: LIST_QUERY,
    bulk_query: BULK_QUERY,
    fields: FIELDS,
    mutations: Some(Mutations {
        create: CREATE,
        create_root: "customerCreate",
        update: UPDATE,
        update_root: "customerUpdate",
        delete: DELETE,
        delete_root: "customerDelete",
        object_key: "customer",
        deleted_id_key: "deletedCustomerId",
    }),
};
