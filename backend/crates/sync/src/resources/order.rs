use shopsync_common::types::ResourceType;

use super::graphql::{FieldMap, ResourceSpec};

const LIST_QUERY: &str = r#"
query Orders($first: Int!, $after: String, $query: String) {
  orders(first: $first, after: $after, query: $query, sortKey: UPDATED_AT) {
    nodes {
      id
      name
      email
      displayFinancialStatus
      displayFulfillmentStatus
      currencyCode
      totalPriceSet { shopMoney { amount } }
      customer { id }
      processedAt
      updatedAt
    }
    pageInfo { hasNextPage endCursor }
  }
}"#;

const BULK_QUERY: &str = r#"
{
  orders {
    edges {
      node {
        id name email displayFinancialStatus displayFulfillmentStatus currencyCode
        totalPriceSet { shopMoney { amount } }
        customer { id }
        processedAt updatedAt
      }
    }
  }
}"#;

const FIELDS: &[FieldMap] = &[
    FieldMap::read("name", "/name"),
    FieldMap::read("email", "/email"),
    FieldMap::read("financial_status", "/displayFinancialStatus"),
    FieldMap::read("fulfillment_status", "/displayFulfillmentStatus"),
    FieldMap::read("currency", "/currencyCode"),
    FieldMap::read("total_price", "/totalPriceSet/shopMoney/amount"),
    FieldMap::read("customer_id", "/customer/id"),
    FieldMap::read("processed_at", "/processedAt"),
];

/// Orders are import-only.
pub static SPEC: ResourceSpec = ResourceSpec {
    resource_type: ResourceType::Order,
    connection: "orders",
    list_query: LIST_QUERY,
    bulk_query: BULK_QUERY,
    fields: FIELDS,
    mutations: None,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn translate_flattens_nested_money_and_customer() {
        let record = SPEC
            .translate(&json!({
                "id": "gid://shopify/Order/100",
                "name": "#1001",
                "totalPriceSet": { "shopMoney": { "amount": "19.90" } },
                "customer": { "id": "gid://shopify/Customer/8" },
                "updatedAt": "2024-05-01T10:00:00Z"
            }))
            .unwrap();
        assert_eq!(record.fields["total_price"], json!("19.90"));
        assert_eq!(record.fields["customer_id"], json!("gid://shopify/Customer/8"));
        assert!(!record.fields.contains_key("email"));
    }

    #[test]
    fn guest_orders_have_no_customer_id() {
        let record = SPEC
            .translate(&json!({
                "id": "gid://shopify/Order/101",
                "customer": null,
                "updatedAt": "2024-05-01T10:00:00Z"
            }))
            .unwrap();
        assert!(!record.fields.contains_key("customer_id"));
    }
}
