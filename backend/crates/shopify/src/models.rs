use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
    #[serde(default)]
    pub extensions: Option<Extensions>,
}

impl GraphqlResponse {
    /// Throttle block of the cost extension, if Shopify sent one.
    pub fn throttle_status(&self) -> Option<&ThrottleStatus> {
        self.extensions
            .as_ref()
            .and_then(|e| e.cost.as_ref())
            .and_then(|c| c.throttle_status.as_ref())
    }

    pub fn is_throttled(&self) -> bool {
        self.errors.iter().any(|e| e.code() == Some("THROTTLED"))
    }

    /// Value under `data` at a JSON pointer such as `/products`.
    pub fn data_at(&self, pointer: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.pointer(pointer))
    }

    /// `userErrors` of a mutation payload rooted at `pointer`.
    pub fn user_errors(&self, pointer: &str) -> Vec<UserError> {
        self.data_at(&format!("{pointer}/userErrors"))
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn error_messages(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<Value>,
}

impl GraphqlError {
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extensions {
    #[serde(default)]
    pub cost: Option<QueryCost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCost {
    #[serde(default)]
    pub requested_query_cost: Option<f64>,
    #[serde(default)]
    pub actual_query_cost: Option<f64>,
    /// Absent on some responses; treated as an unknown budget.
    #[serde(default)]
    pub throttle_status: Option<ThrottleStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleStatus {
    pub maximum_available: f64,
    pub currently_available: f64,
    pub restore_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

impl UserError {
    pub fn describe(errors: &[UserError]) -> String {
        errors
            .iter()
            .map(|e| match &e.field {
                Some(path) if !path.is_empty() => format!("{}: {}", path.join("."), e.message),
                _ => e.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_cost_extension() {
        let resp: GraphqlResponse = serde_json::from_value(json!({
            "data": { "shop": { "name": "demo" } },
            "extensions": {
                "cost": {
                    "requestedQueryCost": 12,
                    "actualQueryCost": 10,
                    "throttleStatus": {
                        "maximumAvailable": 2000.0,
                        "currentlyAvailable": 1990,
                        "restoreRate": 100.0
                    }
                }
            }
        }))
        .unwrap();

        let status = resp.throttle_status().expect("cost block");
        assert_eq!(status.currently_available, 1990.0);
        assert_eq!(status.restore_rate, 100.0);
        assert_eq!(resp.data_at("/shop/name"), Some(&json!("demo")));
    }

    #[test]
    fn cost_block_without_throttle_status_still_decodes() {
        let resp: GraphqlResponse = serde_json::from_value(json!({
            "data": { "shop": { "name": "demo" } },
            "extensions": { "cost": { "requestedQueryCost": 1, "actualQueryCost": 1 } }
        }))
        .unwrap();
        assert!(resp.throttle_status().is_none());
        assert_eq!(resp.data_at("/shop/name"), Some(&json!("demo")));
    }

    #[test]
    fn detects_throttled_errors() {
        let resp: GraphqlResponse = serde_json::from_value(json!({
            "errors": [{ "message": "Throttled", "extensions": { "code": "THROTTLED" } }]
        }))
        .unwrap();
        assert!(resp.is_throttled());
        assert!(resp.throttle_status().is_none());
    }

    #[test]
    fn describes_user_errors_with_field_paths() {
        let resp: GraphqlResponse = serde_json::from_value(json!({
            "data": {
                "productCreate": {
                    "product": null,
                    "userErrors": [
                        { "field": ["input", "title"], "message": "Title can't be blank" },
                        { "field": null, "message": "Shop is frozen" }
                    ]
                }
            }
        }))
        .unwrap();

        let errors = resp.user_errors("/productCreate");
        assert_eq!(errors.len(), 2);
        assert_eq!(
            UserError::describe(&errors),
            "input.title: Title can't be blank; Shop is frozen"
        );
    }
}
