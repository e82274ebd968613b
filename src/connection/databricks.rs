//! Built-in `databricks` provider.

use super::{Connection, OptionMap};
use crate::error::Result;

/// Resolves `databricks` as itself because it is intended to be used as a
/// keyword: the hosted service interprets the bare word natively, so the
/// provider passes it through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabricksConnection;

impl Connection for DatabricksConnection {
    fn tracking_uri(&self, _credentials: &OptionMap, _options: &OptionMap) -> Result<String> {
        Ok("databricks".to_string())
    }
}
