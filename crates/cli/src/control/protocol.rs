use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operator command, from the keyboard or the control socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "kebab-case")]
pub enum Verb {
	Dump,
	Clear,
	Status,
	ListTabs,
	SwitchTab { index: usize },
	Pause,
	Resume,
	Stop,
}

impl Verb {
	pub fn name(&self) -> &'static str {
		match self {
			Verb::Dump => "dump",
			Verb::Clear => "clear",
			Verb::Status => "status",
			Verb::ListTabs => "list-tabs",
			Verb::SwitchTab { .. } => "switch-tab",
			Verb::Pause => "pause",
			Verb::Resume => "resume",
			Verb::Stop => "stop",
		}
	}
}

/// One reply per command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
	pub ok: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl CommandReply {
	pub fn success(data: Value) -> Self {
		Self {
			ok: true,
			data: Some(data),
			error: None,
		}
	}

	/// Success without a payload.
	pub fn done() -> Self {
		Self {
			ok: true,
			data: None,
			error: None,
		}
	}

	pub fn failure(message: impl Into<String>) -> Self {
		Self {
			ok: false,
			data: None,
			error: Some(message.into()),
		}
	}
}
