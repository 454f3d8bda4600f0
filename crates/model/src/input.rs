use std::collections::HashSet;

/// Splits comma separated free text into trimmed, non-empty entries.
#[must_use]
pub fn parse_list(text: &str) -> Vec<String> {
	text.split(',')
		.map(str::trim)
		.filter(|item| !item.is_empty())
		.map(ToString::to_string)
		.collect()
}

/// Trims an optional field, mapping blank values to `None`.
#[must_use]
pub fn normalize_optional(value: Option<String>) -> Option<String> {
	value
		.map(|value| value.trim().to_string())
		.filter(|value| !value.is_empty())
}

/// First free human-facing id of the form `P001`, `P002`, ...
///
/// Only guarantees uniqueness against `existing`; independently operating peers may
/// allocate the same id, which the engine tolerates.
#[must_use]
pub fn next_patient_id<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
	let taken = existing.into_iter().collect::<HashSet<_>>();

	(1_u64..)
		.map(|counter| format!("P{counter:03}"))
		.find(|candidate| !taken.contains(candidate.as_str()))
		.unwrap_or_default()
}
