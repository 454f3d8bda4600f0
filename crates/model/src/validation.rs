use crate::{MedicalUpdate, PatientRecord, RecordId, Vitals};

const MAX_AGE: u32 = 150;
const HEART_RATE: (u32, u32) = (1, 300);
const OXYGEN_SATURATION: (u32, u32) = (0, 100);
const PAIN_LEVEL: (u32, u32) = (1, 10);
const TEMPERATURE: (f64, f64) = (25.0, 45.0);
const BLOOD_PRESSURE: (u32, u32) = (1, 300);

/// Rejections raised before any state is touched.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
	#[error("required field `{0}` is empty")]
	MissingField(&'static str),
	#[error("`{field}` out of range: {value} (expected {expected})")]
	OutOfRange {
		field: &'static str,
		value: String,
		expected: &'static str,
	},
	#[error("malformed blood pressure reading <value='{0}'>, expected `systolic/diastolic`")]
	MalformedBloodPressure(String),
	#[error("unknown patient record <id='{0}'>")]
	UnknownPatient(RecordId),
}

pub trait Validate {
	fn validate(&self) -> Result<(), ValidationError>;
}

fn required(field: &'static str, value: &str) -> Result<(), ValidationError> {
	if value.trim().is_empty() {
		return Err(ValidationError::MissingField(field));
	}

	Ok(())
}

fn within(
	field: &'static str,
	value: Option<u32>,
	(min, max): (u32, u32),
	expected: &'static str,
) -> Result<(), ValidationError> {
	match value {
		Some(value) if !(min..=max).contains(&value) => Err(ValidationError::OutOfRange {
			field,
			value: value.to_string(),
			expected,
		}),
		_ => Ok(()),
	}
}

impl Validate for PatientRecord {
	fn validate(&self) -> Result<(), ValidationError> {
		required("name", &self.name)?;
		required("presentingComplaint", &self.presenting_complaint)?;
		required("authorFingerprint", &self.author_fingerprint)?;

		within("age", self.age, (0, MAX_AGE), "0-150")
	}
}

impl Validate for Vitals {
	fn validate(&self) -> Result<(), ValidationError> {
		within("heartRate", self.heart_rate, HEART_RATE, "1-300 bpm")?;
		within(
			"oxygenSaturation",
			self.oxygen_saturation,
			OXYGEN_SATURATION,
			"0-100 %",
		)?;
		within("painLevel", self.pain_level, PAIN_LEVEL, "1-10")?;

		if let Some(temperature) = self.temperature {
			if !temperature.is_finite() || !(TEMPERATURE.0..=TEMPERATURE.1).contains(&temperature)
			{
				return Err(ValidationError::OutOfRange {
					field: "temperature",
					value: temperature.to_string(),
					expected: "25.0-45.0 °C",
				});
			}
		}

		if let Some(reading) = &self.blood_pressure {
			let Some((systolic, diastolic)) = self.blood_pressure_parts() else {
				return Err(ValidationError::MalformedBloodPressure(reading.clone()));
			};

			if systolic <= diastolic
				|| !(BLOOD_PRESSURE.0..=BLOOD_PRESSURE.1).contains(&systolic)
				|| !(BLOOD_PRESSURE.0..=BLOOD_PRESSURE.1).contains(&diastolic)
			{
				return Err(ValidationError::OutOfRange {
					field: "bloodPressure",
					value: reading.clone(),
					expected: "systolic > diastolic, both 1-300 mmHg",
				});
			}
		}

		Ok(())
	}
}

impl Validate for MedicalUpdate {
	fn validate(&self) -> Result<(), ValidationError> {
		required("authorFingerprint", &self.author_fingerprint)?;

		if self.notes.trim().is_empty() && !self.has_vitals() {
			return Err(ValidationError::MissingField("notes"));
		}

		self.vitals.as_ref().map_or(Ok(()), Validate::validate)
	}
}
