//! Shopify Admin GraphQL client with throttle-aware pacing.
//!
//! Every response carries a cost extension describing the remaining bucket
//! (`currentlyAvailable`) and its refill speed (`restoreRate`). The client
//! feeds it into a [`RateBudget`] and delays the next call proportionally to
//! the deficit below a low-water mark, instead of using a fixed request rate.

pub mod budget;
pub mod bulk;
pub mod client;
pub mod error;
pub mod models;

pub use budget::{BackoffPolicy, RateBudget};
pub use bulk::{BulkOperation, BulkStatus};
pub use client::{ShopifyClient, ShopifyClientConfig};
pub use error::{ApiErrorKind, ShopifyClientError};
pub use models::{GraphqlResponse, PageInfo, ThrottleStatus, UserError};
pub use reqwest::StatusCode;
