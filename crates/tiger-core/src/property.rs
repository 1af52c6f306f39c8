//! Property descriptors, values and allowed-value sets.
//!
//! A [`PropertyDescriptor`] is the immutable description of one named device
//! property: its kind, default, limits and (for enumerations) the ordered
//! `(label, wire code)` pairs it accepts. Descriptors are produced by the
//! capability registry once the firmware version is known and never change
//! afterwards.

use crate::capability::Gate;
use crate::error::{TigerError, TigerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Kinds and Values
// =============================================================================

/// Type tag of a property as presented to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// One label out of an [`AllowedValueSet`].
    Enumeration,
    /// Signed integer, optionally limited.
    Integer,
    /// Floating point, optionally limited.
    Float,
    /// Free text.
    String,
    /// "Do it" trigger: an enumeration whose write performs a one-shot action.
    Action,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PropertyKind::Enumeration => "enumeration",
            PropertyKind::Integer => "integer",
            PropertyKind::Float => "float",
            PropertyKind::String => "string",
            PropertyKind::Action => "action",
        };
        write!(f, "{}", label)
    }
}

/// A property value as seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Label or free text
    Text(String),
}

impl PropertyValue {
    /// Integer view. Floats with no fractional part convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            PropertyValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            PropertyValue::Float(_) => None,
            PropertyValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Floating point view.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Integer(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Text view; only labels and strings have one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Integer(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Integer(i64::from(v))
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Integer(i64::from(v))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<&String> for PropertyValue {
    fn from(v: &String) -> Self {
        PropertyValue::Text(v.clone())
    }
}

// =============================================================================
// Allowed Values and Limits
// =============================================================================

/// One entry of an [`AllowedValueSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowedValue {
    /// Label presented to the host
    pub label: String,
    /// Code sent on the wire
    pub code: i64,
}

/// Ordered `(label, wire code)` pairs accepted by an enumeration.
///
/// Labels are unique; insertion order is preserved for presentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllowedValueSet {
    entries: Vec<AllowedValue>,
}

impl AllowedValueSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value. A label that is already present is replaced in place.
    pub fn push(&mut self, label: impl Into<String>, code: i64) {
        let label = label.into();
        if let Some(existing) = self.entries.iter_mut().find(|e| e.label == label) {
            existing.code = code;
        } else {
            self.entries.push(AllowedValue { label, code });
        }
    }

    /// Wire code for `label`.
    pub fn code_of(&self, label: &str) -> Option<i64> {
        self.entries.iter().find(|e| e.label == label).map(|e| e.code)
    }

    /// First label carrying `code`.
    pub fn label_of(&self, code: i64) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.code == code)
            .map(|e| e.label.as_str())
    }

    /// Whether `label` is offered.
    pub fn contains(&self, label: &str) -> bool {
        self.code_of(label).is_some()
    }

    /// Labels in presentation order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }

    /// Entries in presentation order.
    pub fn iter(&self) -> impl Iterator<Item = &AllowedValue> {
        self.entries.iter()
    }

    /// Number of offered values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is offered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Inclusive numeric bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericLimits {
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

impl NumericLimits {
    /// Bounds `[min, max]`.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether `value` lies inside the bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

// =============================================================================
// PropertyDescriptor
// =============================================================================

/// Immutable description of one device property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDescriptor {
    /// Unique name within the device
    pub name: String,
    /// Type tag
    pub kind: PropertyKind,
    /// Value before anything has been read
    pub default: PropertyValue,
    /// Rejects host writes when set
    pub read_only: bool,
    /// Always queried, regardless of refresh policy
    pub always_live: bool,
    /// Numeric bounds, if any
    pub limits: Option<NumericLimits>,
    /// Enumeration labels, if any
    pub allowed: Option<AllowedValueSet>,
    /// Unit shown to the user
    pub units: Option<String>,
    /// Short description
    pub description: Option<String>,
    /// Conditions under which the property exists
    #[serde(skip)]
    pub gate: Gate,
}

impl PropertyDescriptor {
    /// Descriptor with no limits, labels or gate.
    pub fn new(name: impl Into<String>, kind: PropertyKind, default: PropertyValue) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
            read_only: false,
            always_live: false,
            limits: None,
            allowed: None,
            units: None,
            description: None,
            gate: Gate::always(),
        }
    }

    /// Labels offered by an enumeration, empty for other kinds.
    pub fn labels(&self) -> Vec<String> {
        self.allowed
            .as_ref()
            .map(|set| set.labels().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Wire code of an enumeration label.
    pub fn code_of(&self, label: &str) -> TigerResult<i64> {
        self.allowed
            .as_ref()
            .and_then(|set| set.code_of(label))
            .ok_or_else(|| TigerError::invalid_value(&self.name, label, "label not offered"))
    }

    /// Label of an enumeration wire code.
    pub fn label_of(&self, code: i64) -> TigerResult<String> {
        self.allowed
            .as_ref()
            .and_then(|set| set.label_of(code))
            .map(str::to_string)
            .ok_or_else(|| TigerError::invalid_value(&self.name, code, "wire code has no label"))
    }

    /// Parse host text into a value of this descriptor's kind.
    pub fn parse_text(&self, text: &str) -> TigerResult<PropertyValue> {
        match self.kind {
            PropertyKind::Integer => text
                .trim()
                .parse::<i64>()
                .map(PropertyValue::Integer)
                .or_else(|_| {
                    text.trim()
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.fract() == 0.0)
                        .map(|v| PropertyValue::Integer(v as i64))
                        .ok_or_else(|| {
                            TigerError::invalid_value(&self.name, text, "expected an integer")
                        })
                }),
            PropertyKind::Float => text
                .trim()
                .parse::<f64>()
                .map(PropertyValue::Float)
                .map_err(|_| TigerError::invalid_value(&self.name, text, "expected a number")),
            PropertyKind::Enumeration | PropertyKind::String | PropertyKind::Action => {
                Ok(PropertyValue::Text(text.to_string()))
            }
        }
    }

    /// Coerce `value` to this descriptor's kind and check it against the
    /// allowed set and limits.
    pub fn validate(&self, value: PropertyValue) -> TigerResult<PropertyValue> {
        let value = match (self.kind, value) {
            (PropertyKind::Integer, v) => PropertyValue::Integer(v.as_i64().ok_or_else(|| {
                TigerError::invalid_value(&self.name, &v, "expected an integer")
            })?),
            (PropertyKind::Float, v) => PropertyValue::Float(
                v.as_f64()
                    .ok_or_else(|| TigerError::invalid_value(&self.name, &v, "expected a number"))?,
            ),
            (_, PropertyValue::Text(s)) => PropertyValue::Text(s),
            (_, v) => PropertyValue::Text(v.to_string()),
        };

        if let Some(limits) = &self.limits {
            if let Some(number) = value.as_f64() {
                if matches!(self.kind, PropertyKind::Integer | PropertyKind::Float)
                    && !limits.contains(number)
                {
                    return Err(TigerError::invalid_value(
                        &self.name,
                        number,
                        format!("outside limits [{}, {}]", limits.min, limits.max),
                    ));
                }
            }
        }

        if let (Some(allowed), PropertyValue::Text(label)) = (&self.allowed, &value) {
            if !allowed.contains(label) {
                return Err(TigerError::invalid_value(
                    &self.name,
                    label,
                    "label not offered",
                ));
            }
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger_source() -> PropertyDescriptor {
        let mut allowed = AllowedValueSet::new();
        allowed.push("0 - internal 4kHz", 0);
        allowed.push("1 - Micro-mirror card", 1);
        let mut desc = PropertyDescriptor::new(
            "TriggerSource",
            PropertyKind::Enumeration,
            "0 - internal 4kHz".into(),
        );
        desc.allowed = Some(allowed);
        desc
    }

    #[test]
    fn allowed_set_maps_both_ways() {
        let desc = trigger_source();
        assert_eq!(desc.code_of("1 - Micro-mirror card").unwrap(), 1);
        assert_eq!(desc.label_of(0).unwrap(), "0 - internal 4kHz");
        assert!(desc.label_of(9).is_err());
        assert_eq!(desc.labels().len(), 2);
    }

    #[test]
    fn push_replaces_duplicate_label() {
        let mut set = AllowedValueSet::new();
        set.push("No", 0);
        set.push("Yes", 1);
        set.push("No", 5);
        assert_eq!(set.len(), 2);
        assert_eq!(set.code_of("No"), Some(5));
    }

    #[test]
    fn validate_rejects_unknown_label() {
        let desc = trigger_source();
        assert!(desc.validate("2 - bogus".into()).is_err());
        assert_eq!(
            desc.validate("1 - Micro-mirror card".into()).unwrap(),
            PropertyValue::Text("1 - Micro-mirror card".into())
        );
    }

    #[test]
    fn validate_applies_limits_and_coerces() {
        let mut desc = PropertyDescriptor::new("ScanNumLines", PropertyKind::Integer, 1.into());
        desc.limits = Some(NumericLimits::new(1.0, 100.0));
        assert_eq!(desc.validate(PropertyValue::Float(5.0)).unwrap(), 5.into());
        assert!(desc.validate(101.into()).is_err());
        assert!(desc.validate(PropertyValue::Float(2.5)).is_err());

        let mut speed = PropertyDescriptor::new("Speed", PropertyKind::Float, 1.0.into());
        speed.limits = Some(NumericLimits::new(0.0, 7.5));
        assert_eq!(speed.validate(3.into()).unwrap(), PropertyValue::Float(3.0));
    }

    #[test]
    fn parse_text_per_kind() {
        let desc = PropertyDescriptor::new("PointerPosition", PropertyKind::Integer, 0.into());
        assert_eq!(desc.parse_text("40").unwrap(), 40.into());
        assert_eq!(desc.parse_text("40.0").unwrap(), 40.into());
        assert!(desc.parse_text("forty").is_err());

        let float = PropertyDescriptor::new("Backlash", PropertyKind::Float, 0.0.into());
        assert_eq!(float.parse_text("0.04").unwrap(), PropertyValue::Float(0.04));
    }
}
