//! Session configuration options advertised by the agent (model, mode, …).

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Category used to route a configuration change to its ACP method.
pub const CATEGORY_MODEL: &str = "model";
/// Category for agent operating modes.
pub const CATEGORY_MODE: &str = "mode";

/// One selectable value of a [`ConfigOption`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigOptionValue {
    /// Value sent back to the agent.
    pub value: String,
    /// Display name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A selectable session setting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOption {
    /// Option identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Category (`model`, `mode`, `thought_level`, or agent-specific).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Widget type; agents currently only use `select`.
    #[serde(rename = "type", default = "default_option_type")]
    pub kind: String,
    /// Currently selected value.
    pub current_value: String,
    /// Allowed values; grouped entries are flattened.
    #[serde(default, deserialize_with = "deserialize_option_values")]
    pub options: Vec<ConfigOptionValue>,
}

fn default_option_type() -> String {
    "select".into()
}

/// Accepts both flat `{value, name}` entries and `{group, name, options}`
/// groups. Entries matching neither shape are dropped.
fn deserialize_option_values<'de, D>(deserializer: D) -> Result<Vec<ConfigOptionValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    let mut values = Vec::with_capacity(entries.len());
    for entry in &entries {
        flatten_option_entry(entry, &mut values);
    }
    Ok(values)
}

fn flatten_option_entry(entry: &Value, values: &mut Vec<ConfigOptionValue>) {
    if let Some(group) = entry.get("options").and_then(Value::as_array) {
        for nested in group {
            flatten_option_entry(nested, values);
        }
        return;
    }
    match ConfigOptionValue::deserialize(entry) {
        Ok(value) => values.push(value),
        Err(err) => debug!(%err, "skipping unrecognized config option value"),
    }
}

/// Decode a `configOptions` array one option at a time.
///
/// Malformed options are logged and skipped. Returns `None` when `value` is
/// not an array.
#[must_use]
pub fn decode_config_options(value: &Value) -> Option<Vec<ConfigOption>> {
    let entries = value.as_array()?;
    Some(
        entries
            .iter()
            .filter_map(|entry| match ConfigOption::deserialize(entry) {
                Ok(option) => Some(option),
                Err(err) => {
                    warn!(%err, "dropping malformed config option");
                    None
                }
            })
            .collect(),
    )
}

/// Serde adapter over [`decode_config_options`] for notification payloads.
///
/// # Errors
///
/// Fails only when the payload is not an array.
pub fn deserialize_config_options<'de, D>(deserializer: D) -> Result<Vec<ConfigOption>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    decode_config_options(&value).ok_or_else(|| D::Error::custom("configOptions must be an array"))
}

impl ConfigOption {
    /// Whether the option belongs to `category`.
    #[must_use]
    pub fn has_category(&self, category: &str) -> bool {
        self.category.as_deref() == Some(category)
    }
}
