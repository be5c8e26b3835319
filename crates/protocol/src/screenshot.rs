use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// `Page.captureScreenshot` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Screenshot {
	/// Base64-encoded image bytes.
	pub data: String,
}

impl Screenshot {
	pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
		STANDARD.decode(self.data.as_bytes())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_png_signature() {
		let shot = Screenshot {
			data: STANDARD.encode([0x89, b'P', b'N', b'G']),
		};
		assert_eq!(shot.decode().unwrap(), vec![0x89, b'P', b'N', b'G']);
	}

	#[test]
	fn rejects_invalid_payload() {
		let shot = Screenshot { data: "@@not base64@@".into() };
		assert!(shot.decode().is_err());
	}
}
