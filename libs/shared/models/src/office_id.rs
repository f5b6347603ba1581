// libs/shared/models/src/office_id.rs
//! Office identifier normalization.
//!
//! Location strings arrive from the scheduling provider, from staff edits and
//! from configuration files in many shapes ("B4", "Office b-04", "Room C 1",
//! "virtual"). Everything is reduced to a canonical `Floor-Unit` code such as
//! `B-4` or `A-v`. Input that cannot be read unambiguously becomes
//! [`OfficeCode::Unresolved`]; it is never mapped onto a real room.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker written to the record store for appointments without an office.
pub const UNRESOLVED_MARKER: &str = "TBD";

/// Unit used by virtual (telehealth) offices.
pub const VIRTUAL_UNIT: &str = "v";

/// Floor that hosts the clinic's virtual office.
pub const VIRTUAL_FLOOR: char = 'A';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OfficeCode {
    Room { floor: char, unit: String },
    Unresolved,
}

impl OfficeCode {
    pub fn room(floor: char, unit: impl Into<String>) -> Self {
        OfficeCode::Room {
            floor: floor.to_ascii_uppercase(),
            unit: unit.into(),
        }
    }

    pub fn virtual_office() -> Self {
        OfficeCode::room(VIRTUAL_FLOOR, VIRTUAL_UNIT)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, OfficeCode::Room { .. })
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, OfficeCode::Room { unit, .. } if unit == VIRTUAL_UNIT)
    }

    pub fn floor(&self) -> Option<char> {
        match self {
            OfficeCode::Room { floor, .. } => Some(*floor),
            OfficeCode::Unresolved => None,
        }
    }

    pub fn as_code(&self) -> String {
        self.to_string()
    }
}

impl Default for OfficeCode {
    fn default() -> Self {
        OfficeCode::Unresolved
    }
}

impl fmt::Display for OfficeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfficeCode::Room { floor, unit } => write!(f, "{}-{}", floor, unit),
            OfficeCode::Unresolved => f.write_str(UNRESOLVED_MARKER),
        }
    }
}

impl From<&str> for OfficeCode {
    fn from(raw: &str) -> Self {
        normalize_office_id(raw)
    }
}

impl Serialize for OfficeCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OfficeCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(normalize_office_id).unwrap_or_default())
    }
}

fn room_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z])[\s\-_./]*(?:(\d{1,3})|(v|virtual))$").expect("static office pattern")
    })
}

fn prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:office|room|rm|suite|ste|unit)\b[\s.#:]*").expect("static prefix pattern")
    })
}

/// Map a free-form location identifier onto a canonical office code.
///
/// Never fails. `normalize_office_id(&normalize_office_id(x).to_string())`
/// always equals `normalize_office_id(x)`.
pub fn normalize_office_id(raw: &str) -> OfficeCode {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return OfficeCode::Unresolved;
    }

    match lowered.as_str() {
        "tbd" | "unassigned" | "unresolved" | "none" | "n/a" => return OfficeCode::Unresolved,
        "virtual" | "telehealth" | "online" | "remote" | "video" => return OfficeCode::virtual_office(),
        _ => {}
    }

    let stripped = prefix_pattern().replace(&lowered, "");
    let candidate = stripped.trim().trim_start_matches('#').trim();

    let Some(captures) = room_pattern().captures(candidate) else {
        return OfficeCode::Unresolved;
    };

    let floor = match captures.get(1).and_then(|m| m.as_str().chars().next()) {
        Some(c) => c.to_ascii_uppercase(),
        None => return OfficeCode::Unresolved,
    };

    if captures.get(3).is_some() {
        return OfficeCode::room(floor, VIRTUAL_UNIT);
    }

    match captures.get(2).map(|m| m.as_str().parse::<u32>()) {
        Some(Ok(unit)) if unit > 0 => OfficeCode::room(floor, unit.to_string()),
        _ => OfficeCode::Unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_canonical_codes_pass_through() {
        assert_eq!(normalize_office_id("B-4"), OfficeCode::room('B', "4"));
        assert_eq!(normalize_office_id("A-v"), OfficeCode::virtual_office());
        assert_eq!(normalize_office_id("C-1").to_string(), "C-1");
    }

    #[test]
    fn test_free_form_variants() {
        assert_eq!(normalize_office_id("b4"), OfficeCode::room('B', "4"));
        assert_eq!(normalize_office_id("  Office B-04 "), OfficeCode::room('B', "4"));
        assert_eq!(normalize_office_id("Room c 2"), OfficeCode::room('C', "2"));
        assert_eq!(normalize_office_id("ste. #b_5"), OfficeCode::room('B', "5"));
        assert_eq!(normalize_office_id("Telehealth"), OfficeCode::virtual_office());
        assert_eq!(normalize_office_id("a virtual"), OfficeCode::virtual_office());
    }

    #[test]
    fn test_ambiguous_input_is_unresolved() {
        for raw in ["", "   ", "TBD", "upstairs", "4B", "B-0", "B-1234", "BB-4", "B4 or C1"] {
            assert_eq!(normalize_office_id(raw), OfficeCode::Unresolved, "input {:?}", raw);
        }
    }

    #[test]
    fn test_serde_uses_canonical_form() {
        let code: OfficeCode = serde_json::from_str("\"office b4\"").unwrap();
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"B-4\"");

        let missing: OfficeCode = serde_json::from_str("null").unwrap();
        assert_eq!(missing, OfficeCode::Unresolved);
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(raw in ".{0,24}") {
            let once = normalize_office_id(&raw);
            let twice = normalize_office_id(&once.to_string());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_room_like_input_is_idempotent(floor in "[a-zA-Z]", unit in 0u32..2000, sep in "[ \\-_]{0,2}") {
            let raw = format!("{}{}{}", floor, sep, unit);
            let once = normalize_office_id(&raw);
            prop_assert_eq!(normalize_office_id(&once.to_string()), once);
        }
    }
}
