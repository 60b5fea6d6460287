//! Per-record reconciliation between the local copy and Shopify.

use serde::{Deserialize, Serialize};
use shopsync_db::records::models::{Fields, LocalRecord};

use crate::resources::ExternalRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Local,
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub winner: Winner,
    /// Field bag after the merge: the winner's values for fields both sides
    /// carry, plus every field only one side carries.
    pub merged: Fields,
}

/// Compare `local.write_date` against `external.updated_at`.
///
/// The strictly later timestamp wins. On an exact tie the external record
/// wins.
pub fn pick_winner(local: &LocalRecord, external: &ExternalRecord) -> Winner {
    if local.write_date > external.updated_at {
        Winner::Local
    } else {
        Winner::External
    }
}

pub fn resolve(local: &LocalRecord, external: &ExternalRecord) -> Resolution {
    let winner = pick_winner(local, external);
    let (base, overlay) = match winner {
        Winner::Local => (&external.fields, &local.fields),
        Winner::External => (&local.fields, &external.fields),
    };

    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }

    Resolution { winner, merged }
}
