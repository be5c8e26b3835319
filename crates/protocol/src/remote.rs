//! `Runtime.RemoteObject` mirror.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mirror object referencing a value in the page's JavaScript runtime.
///
/// Primitives arrive with `value` populated. Objects and arrays arrive with an
/// `object_id` that must be resolved through `Runtime.callFunctionOn` to
/// obtain their contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub subtype: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub class_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<Value>,
	/// Set for values JSON cannot carry (`NaN`, `-0`, bigint literals).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub unserializable_value: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub object_id: Option<String>,
}

impl RemoteObject {
	/// Whether this value must be fetched from the runtime to be rendered.
	pub fn needs_resolution(&self) -> bool {
		self.kind == "object" && self.subtype.as_deref() != Some("null") && self.object_id.is_some()
	}

	/// Text form usable without a round trip.
	///
	/// Strings render without quotes, other primitives through their JSON
	/// form, and objects through the description the browser provided.
	pub fn preformatted(&self) -> String {
		if let Some(raw) = &self.unserializable_value {
			return raw.clone();
		}
		match &self.value {
			Some(Value::String(s)) => s.clone(),
			Some(Value::Null) => "null".to_string(),
			Some(other) => other.to_string(),
			None => match self.kind.as_str() {
				"undefined" => "undefined".to_string(),
				_ => self.description.clone().unwrap_or_else(|| self.kind.clone()),
			},
		}
	}
}
