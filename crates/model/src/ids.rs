use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			/// Allocates a fresh, globally unique identifier.
			#[must_use]
			pub fn new() -> Self {
				Self(Uuid::new_v4().to_string().to_uppercase())
			}

			#[must_use]
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl Default for $name {
			fn default() -> Self {
				Self::new()
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl From<String> for $name {
			fn from(id: String) -> Self {
				Self(id)
			}
		}

		impl From<&str> for $name {
			fn from(id: &str) -> Self {
				Self(id.to_string())
			}
		}

		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
	};
}

string_id!(
	/// Globally unique identity of a [`crate::PatientRecord`], assigned once and never reused.
	RecordId
);

string_id!(
	/// Globally unique identity of a [`crate::MedicalUpdate`].
	UpdateId
);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fresh_ids_are_unique_uppercase_uuids() {
		let a = RecordId::new();
		let b = RecordId::new();

		assert_ne!(a, b);
		assert_eq!(a.as_str(), a.as_str().to_uppercase());
		assert!(Uuid::parse_str(a.as_str()).is_ok());
	}

	#[test]
	fn ids_serialize_as_plain_strings() {
		let id = UpdateId::from("ABC");
		assert_eq!(serde_json::to_string(&id).unwrap(), "\"ABC\"");
	}
}
