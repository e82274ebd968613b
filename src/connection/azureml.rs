//! Built-in `azureml` workspace provider.

use super::{getkey, Connection, OptionMap};
use crate::error::Result;

/// Environment fallback for the `subscription_id` option.
pub const AZUREML_SUBSCRIPTION_ID: &str = "AZUREML_SUBSCRIPTION_ID";
/// Environment fallback for the `resource_group` option.
pub const AZUREML_RESOURCE_GROUP: &str = "AZUREML_RESOURCE_GROUP";
/// Environment fallback for the `workspace_name` option.
pub const AZUREML_WORKSPACE_NAME: &str = "AZUREML_WORKSPACE_NAME";

/// Resolves `azureml` into the tracking URI of an AzureML workspace.
///
/// Requires the following options, either in the connection options block
/// or in the environment:
///
/// - `subscription_id` or `AZUREML_SUBSCRIPTION_ID`
/// - `resource_group` or `AZUREML_RESOURCE_GROUP`
/// - `workspace_name` or `AZUREML_WORKSPACE_NAME`
///
/// With these set, both the tracking URI and the registry URI take the
/// workspace form
/// `azureml://subscriptions/<sub>/resourcegroups/<rg>/workspaces/<ws>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AzureMlConnection;

impl Connection for AzureMlConnection {
    fn tracking_uri(&self, _credentials: &OptionMap, options: &OptionMap) -> Result<String> {
        let subscription_id =
            getkey(options, "subscription_id", AZUREML_SUBSCRIPTION_ID, None)?;
        let resource_group = getkey(options, "resource_group", AZUREML_RESOURCE_GROUP, None)?;
        let workspace_name = getkey(options, "workspace_name", AZUREML_WORKSPACE_NAME, None)?;

        Ok(format!(
            "azureml://subscriptions/{subscription_id}/resourcegroups/{resource_group}/workspaces/{workspace_name}"
        ))
    }
}
