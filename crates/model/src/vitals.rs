use serde::{Deserialize, Serialize};

/// Snapshot of optional clinical measurements. A value object with no identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vitals {
	/// `systolic/diastolic`, e.g. `120/80`
	pub blood_pressure: Option<String>,
	/// beats per minute
	pub heart_rate: Option<u32>,
	/// degrees Celsius
	pub temperature: Option<f64>,
	/// percentage
	pub oxygen_saturation: Option<u32>,
	/// 1-10 scale
	pub pain_level: Option<u32>,
}

impl Vitals {
	#[must_use]
	pub const fn has_any(&self) -> bool {
		self.blood_pressure.is_some()
			|| self.heart_rate.is_some()
			|| self.temperature.is_some()
			|| self.oxygen_saturation.is_some()
			|| self.pain_level.is_some()
	}

	/// Splits a blood pressure reading into `(systolic, diastolic)`.
	#[must_use]
	pub fn blood_pressure_parts(&self) -> Option<(u32, u32)> {
		let (systolic, diastolic) = self.blood_pressure.as_deref()?.split_once('/')?;

		Some((systolic.trim().parse().ok()?, diastolic.trim().parse().ok()?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn has_any_is_true_iff_one_field_is_present() {
		assert!(!Vitals::default().has_any());

		assert!(Vitals {
			pain_level: Some(4),
			..Default::default()
		}
		.has_any());

		assert!(Vitals {
			temperature: Some(37.2),
			..Default::default()
		}
		.has_any());
	}

	#[test]
	fn blood_pressure_parsing() {
		let vitals = Vitals {
			blood_pressure: Some("120/80".to_string()),
			..Default::default()
		};
		assert_eq!(vitals.blood_pressure_parts(), Some((120, 80)));

		let vitals = Vitals {
			blood_pressure: Some("high".to_string()),
			..Default::default()
		};
		assert_eq!(vitals.blood_pressure_parts(), None);
	}
}
