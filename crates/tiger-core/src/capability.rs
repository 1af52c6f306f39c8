//! Firmware-gated capability registry.
//!
//! Device code describes every property it *could* expose as a
//! [`PropertyCandidate`]: a descriptor template plus per-value gates.
//! [`CapabilityRegistry::build`] evaluates those gates against a
//! [`CapabilityContext`] (firmware version, build info, active modes) and
//! keeps what survives. The evaluation is pure, so building twice from the
//! same inputs yields equal registries, and every gate is monotonic in the
//! firmware version.

use crate::property::{
    AllowedValueSet, NumericLimits, PropertyDescriptor, PropertyKind, PropertyValue,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Tolerance used when comparing firmware versions parsed from text.
pub const VERSION_EPSILON: f64 = 0.001;

// =============================================================================
// Firmware Version and Build Info
// =============================================================================

/// Card firmware version as reported by `<addr>V`, e.g. `3.30`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct FirmwareVersion(f64);

impl FirmwareVersion {
    /// Wrap a major.minor version number.
    pub const fn new(version: f64) -> Self {
        Self(version)
    }

    /// Numeric value.
    pub fn value(self) -> f64 {
        self.0
    }

    /// Whether this version is `threshold` or newer.
    pub fn at_least(self, threshold: FirmwareVersion) -> bool {
        self.0 > threshold.0 - VERSION_EPSILON
    }

    /// Extract the version number following the last `v` in a version reply
    /// such as `:A Version: USB-9.2p v3.30`.
    pub fn parse_reply(reply: &str) -> Option<Self> {
        reply
            .rmatch_indices(['v', 'V'])
            .filter_map(|(idx, _)| {
                let digits: String = reply[idx + 1..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                digits.parse::<f64>().ok()
            })
            .next()
            .map(FirmwareVersion)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Build information reported by `<addr>BU X`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    /// Build name, e.g. `TIGER_PLOGIC_16`
    pub name: String,
    /// Per-axis property bitfields from the `Axis Props:` line
    pub axis_props: Vec<u32>,
    /// Compile-time defines the firmware was built with
    pub defines: Vec<String>,
}

impl BuildInfo {
    /// Parse a CR-delimited build dump.
    ///
    /// The first non-empty line is the build name, an `Axis Props:` line
    /// carries the bitfields, other `key: value` header lines are skipped and
    /// everything else is a define.
    pub fn parse(reply: &str) -> Self {
        let mut lines = reply
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|line| !line.is_empty());
        let name = lines
            .next()
            .map(|line| line.trim_start_matches(":A").trim().to_string())
            .unwrap_or_default();
        let mut info = BuildInfo {
            name,
            ..Default::default()
        };
        for line in lines {
            if let Some(rest) = line.strip_prefix("Axis Props:") {
                info.axis_props = rest
                    .split_whitespace()
                    .filter_map(|v| v.parse().ok())
                    .collect();
            } else if line.contains(':') {
                continue;
            } else {
                info.defines.push(line.to_string());
            }
        }
        info
    }

    /// Whether `flag` is among the defines, compared as a prefix so that
    /// valued defines such as `RING BUFFER 250` match `RING BUFFER`.
    pub fn has_define(&self, flag: &str) -> bool {
        self.defines.iter().any(|d| d.starts_with(flag))
    }

    /// Text following `flag` in a valued define.
    pub fn define_value(&self, flag: &str) -> Option<&str> {
        self.defines
            .iter()
            .find_map(|d| d.strip_prefix(flag))
            .map(str::trim)
    }

    /// Axis property bitfield for `axis_index`, zero when absent.
    pub fn axis_property(&self, axis_index: usize) -> u32 {
        self.axis_props.get(axis_index).copied().unwrap_or(0)
    }
}

/// Whether `flag` was compiled into the firmware described by `build`.
pub fn is_build_flag_present(build: &BuildInfo, flag: &str) -> bool {
    build.has_define(flag)
}

// =============================================================================
// Gates
// =============================================================================

/// One condition a property or allowed value depends on.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    /// Firmware version at least this
    MinVersion(FirmwareVersion),
    /// Named device mode active
    Mode(String),
    /// Build define present
    BuildFlag(String),
    /// Bit set in the axis property bitfield of the given axis index
    AxisPropertyBit {
        /// Axis index into `Axis Props:`
        axis: usize,
        /// Bit number
        bit: u32,
    },
    /// Arbitrary precomputed condition
    Fixed(bool),
}

/// Conjunction of [`Requirement`]s; an empty gate is always open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gate {
    requirements: Vec<Requirement>,
}

impl Gate {
    /// Gate with no requirements.
    pub fn always() -> Self {
        Self::default()
    }

    /// Gate requiring firmware `version` or newer.
    pub fn since(version: f64) -> Self {
        Self::always().and_since(version)
    }

    /// Gate requiring `mode` to be active.
    pub fn in_mode(mode: impl Into<String>) -> Self {
        Self::always().and_mode(mode)
    }

    /// Gate open only when `condition` is true.
    pub fn when(condition: bool) -> Self {
        Self {
            requirements: vec![Requirement::Fixed(condition)],
        }
    }

    /// Add a firmware version requirement.
    pub fn and_since(mut self, version: f64) -> Self {
        self.requirements
            .push(Requirement::MinVersion(FirmwareVersion::new(version)));
        self
    }

    /// Add a mode requirement.
    pub fn and_mode(mut self, mode: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Mode(mode.into()));
        self
    }

    /// Add a build define requirement.
    pub fn and_define(mut self, flag: impl Into<String>) -> Self {
        self.requirements.push(Requirement::BuildFlag(flag.into()));
        self
    }

    /// Add an axis property bit requirement.
    pub fn and_axis_property(mut self, axis: usize, bit: u32) -> Self {
        self.requirements
            .push(Requirement::AxisPropertyBit { axis, bit });
        self
    }

    /// Conjunction of two gates.
    pub fn and(mut self, other: &Gate) -> Self {
        self.requirements.extend(other.requirements.iter().cloned());
        self
    }

    /// Highest firmware threshold among the requirements.
    pub fn min_version(&self) -> Option<FirmwareVersion> {
        self.requirements
            .iter()
            .filter_map(|r| match r {
                Requirement::MinVersion(v) => Some(*v),
                _ => None,
            })
            .fold(None, |acc: Option<FirmwareVersion>, v| match acc {
                Some(a) if a >= v => Some(a),
                _ => Some(v),
            })
    }

    /// First mode requirement, if any.
    pub fn mode(&self) -> Option<&str> {
        self.requirements.iter().find_map(|r| match r {
            Requirement::Mode(m) => Some(m.as_str()),
            _ => None,
        })
    }

    /// Whether every requirement holds in `ctx`.
    pub fn is_open(&self, ctx: &CapabilityContext) -> bool {
        self.requirements.iter().all(|r| match r {
            Requirement::MinVersion(v) => ctx.version.at_least(*v),
            Requirement::Mode(m) => ctx.modes.contains(m),
            Requirement::BuildFlag(f) => is_build_flag_present(&ctx.build, f),
            Requirement::AxisPropertyBit { axis, bit } => {
                ctx.build.axis_property(*axis) & (1 << bit) != 0
            }
            Requirement::Fixed(open) => *open,
        })
    }
}

/// Everything gates are evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityContext {
    /// Detected firmware version
    pub version: FirmwareVersion,
    /// Detected build info
    pub build: BuildInfo,
    /// Active device modes
    pub modes: BTreeSet<String>,
}

impl CapabilityContext {
    /// Context for `version` with empty build info and no modes.
    pub fn new(version: FirmwareVersion) -> Self {
        Self {
            version,
            build: BuildInfo::default(),
            modes: BTreeSet::new(),
        }
    }

    /// Attach build info.
    pub fn with_build(mut self, build: BuildInfo) -> Self {
        self.build = build;
        self
    }

    /// Activate a mode.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.modes.insert(mode.into());
        self
    }

    /// Whether the firmware is `version` or newer.
    pub fn at_least(&self, version: f64) -> bool {
        self.version.at_least(FirmwareVersion::new(version))
    }
}

// =============================================================================
// Candidates
// =============================================================================

/// A possible allowed value and the gate it depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueCandidate {
    /// Label offered when the gate opens
    pub label: String,
    /// Wire code
    pub code: i64,
    /// Membership gate
    pub gate: Gate,
    /// Older firmware presents the same code under a different label
    pub legacy_label: Option<(FirmwareVersion, String)>,
}

/// A property that may exist, with its possible allowed values.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyCandidate {
    descriptor: PropertyDescriptor,
    values: Vec<ValueCandidate>,
}

impl PropertyCandidate {
    fn with_kind(name: impl Into<String>, kind: PropertyKind, default: PropertyValue) -> Self {
        Self {
            descriptor: PropertyDescriptor::new(name, kind, default),
            values: Vec::new(),
        }
    }

    /// Enumeration defaulting to `default_label`.
    pub fn enumeration(name: impl Into<String>, default_label: &str) -> Self {
        Self::with_kind(name, PropertyKind::Enumeration, default_label.into())
    }

    /// Integer property.
    pub fn integer(name: impl Into<String>, default: i64) -> Self {
        Self::with_kind(name, PropertyKind::Integer, default.into())
    }

    /// Floating point property.
    pub fn float(name: impl Into<String>, default: f64) -> Self {
        Self::with_kind(name, PropertyKind::Float, default.into())
    }

    /// Free-text property.
    pub fn text(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::String, PropertyValue::Text(default.into()))
    }

    /// "Do it" trigger with the given idle/do-it/done labels.
    pub fn action(name: impl Into<String>, idle: &str, do_it: &str, done: &str) -> Self {
        Self::with_kind(name, PropertyKind::Action, idle.into())
            .value(idle, 0)
            .value(do_it, 1)
            .value(done, 2)
    }

    /// Offer `label` unconditionally.
    pub fn value(self, label: impl Into<String>, code: i64) -> Self {
        self.value_gated(label, code, Gate::always())
    }

    /// Offer `label` when `gate` opens.
    pub fn value_gated(mut self, label: impl Into<String>, code: i64, gate: Gate) -> Self {
        self.values.push(ValueCandidate {
            label: label.into(),
            code,
            gate,
            legacy_label: None,
        });
        self
    }

    /// Offer every `(label, code)` pair when `gate` opens.
    pub fn values_gated(mut self, values: &[(&str, i64)], gate: Gate) -> Self {
        for (label, code) in values {
            self = self.value_gated(*label, *code, gate.clone());
        }
        self
    }

    /// Offer `label` unconditionally, but as `legacy` on firmware older than
    /// `before`.
    pub fn value_relabelled(
        mut self,
        label: impl Into<String>,
        code: i64,
        before: f64,
        legacy: impl Into<String>,
    ) -> Self {
        self.values.push(ValueCandidate {
            label: label.into(),
            code,
            gate: Gate::always(),
            legacy_label: Some((FirmwareVersion::new(before), legacy.into())),
        });
        self
    }

    /// Yes/No enumeration values (`No` = 0, `Yes` = 1).
    pub fn yes_no(self) -> Self {
        self.value("No", 0).value("Yes", 1)
    }

    /// Property gate.
    pub fn gate(mut self, gate: Gate) -> Self {
        self.descriptor.gate = self.descriptor.gate.and(&gate);
        self
    }

    /// Property exists from `version` on.
    pub fn since(self, version: f64) -> Self {
        self.gate(Gate::since(version))
    }

    /// Property exists only in `mode`.
    pub fn in_mode(self, mode: impl Into<String>) -> Self {
        self.gate(Gate::in_mode(mode))
    }

    /// Host writes rejected.
    pub fn read_only(mut self) -> Self {
        self.descriptor.read_only = true;
        self
    }

    /// Always queried regardless of refresh policy.
    pub fn always_live(mut self) -> Self {
        self.descriptor.always_live = true;
        self
    }

    /// Inclusive numeric bounds.
    pub fn limits(mut self, min: f64, max: f64) -> Self {
        self.descriptor.limits = Some(NumericLimits::new(min, max));
        self
    }

    /// Display units.
    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.descriptor.units = Some(units.into());
        self
    }

    /// Short description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = Some(description.into());
        self
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Evaluate the candidate; `None` when its gate is closed.
    pub fn resolve(&self, ctx: &CapabilityContext) -> Option<PropertyDescriptor> {
        if !self.descriptor.gate.is_open(ctx) {
            return None;
        }
        let mut descriptor = self.descriptor.clone();
        if !self.values.is_empty() {
            let mut allowed = AllowedValueSet::new();
            for value in self.values.iter().filter(|v| v.gate.is_open(ctx)) {
                let label = match &value.legacy_label {
                    Some((before, legacy)) if !ctx.version.at_least(*before) => legacy.clone(),
                    _ => value.label.clone(),
                };
                allowed.push(label, value.code);
            }
            if let PropertyValue::Text(default) = &descriptor.default {
                if !allowed.contains(default) {
                    if let Some(first) = allowed.labels().next() {
                        descriptor.default = PropertyValue::Text(first.to_string());
                    }
                }
            }
            descriptor.allowed = Some(allowed);
        }
        Some(descriptor)
    }
}

// =============================================================================
// CapabilityRegistry
// =============================================================================

/// Descriptors that exist on one device, in creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityRegistry {
    descriptors: Vec<Arc<PropertyDescriptor>>,
    index: BTreeMap<String, usize>,
}

impl CapabilityRegistry {
    /// Evaluate `candidates` against `ctx`.
    pub fn build(ctx: &CapabilityContext, candidates: &[PropertyCandidate]) -> Self {
        let mut registry = Self::default();
        registry.extend(ctx, candidates);
        registry
    }

    /// Add the candidates that survive `ctx`. Names already present are kept
    /// as they are; returns the names that were added.
    pub fn extend(&mut self, ctx: &CapabilityContext, candidates: &[PropertyCandidate]) -> Vec<String> {
        let mut added = Vec::new();
        for descriptor in candidates.iter().filter_map(|c| c.resolve(ctx)) {
            if self.index.contains_key(&descriptor.name) {
                continue;
            }
            added.push(descriptor.name.clone());
            self.index
                .insert(descriptor.name.clone(), self.descriptors.len());
            self.descriptors.push(Arc::new(descriptor));
        }
        added
    }

    /// Descriptor for `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<PropertyDescriptor>> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    /// Whether `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Descriptors in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.descriptors.iter().map(|d| d.as_ref())
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retrace() -> PropertyCandidate {
        PropertyCandidate::float("ScanRetraceSpeedPercent", 67.0)
            .limits(0.01, 100.0)
            .since(3.30)
    }

    fn presets() -> PropertyCandidate {
        PropertyCandidate::enumeration("SetCardPreset", "none")
            .value("none", -1)
            .value_relabelled("12 - new label", 12, 3.08, "12 - old label")
            .value_gated("15 - since 3.06", 15, Gate::since(3.06))
            .value_gated("9 - four channel", 9, Gate::in_mode("four_channel"))
    }

    #[test]
    fn version_threshold_is_monotonic() {
        for (version, present) in [(3.29, false), (3.30, true), (3.31, true), (3.51, true)] {
            let ctx = CapabilityContext::new(FirmwareVersion::new(version));
            let registry = CapabilityRegistry::build(&ctx, &[retrace()]);
            assert_eq!(registry.contains("ScanRetraceSpeedPercent"), present, "{version}");
        }
    }

    #[test]
    fn values_are_gated_and_relabelled() {
        let old = CapabilityContext::new(FirmwareVersion::new(3.05));
        let desc = presets().resolve(&old).unwrap();
        let labels = desc.labels();
        assert_eq!(labels, vec!["none", "12 - old label"]);

        let new = CapabilityContext::new(FirmwareVersion::new(3.10)).with_mode("four_channel");
        let desc = presets().resolve(&new).unwrap();
        assert_eq!(
            desc.labels(),
            vec!["none", "12 - new label", "15 - since 3.06", "9 - four channel"]
        );
        assert_eq!(desc.code_of("12 - new label").unwrap(), 12);
    }

    #[test]
    fn build_is_idempotent() {
        let ctx = CapabilityContext::new(FirmwareVersion::new(3.30)).with_mode("four_channel");
        let candidates = [retrace(), presets()];
        assert_eq!(
            CapabilityRegistry::build(&ctx, &candidates),
            CapabilityRegistry::build(&ctx, &candidates)
        );
    }

    #[test]
    fn build_flag_and_axis_bits() {
        let build = BuildInfo::parse(
            "TIGER_COMM\rMotor Axes: X Y\rAxis Types: x x\rAxis Props:   3   0\rRING BUFFER 250\rIN0_INT\r",
        );
        assert_eq!(build.name, "TIGER_COMM");
        assert_eq!(build.axis_props, vec![3, 0]);
        assert!(is_build_flag_present(&build, "IN0_INT"));
        assert!(!is_build_flag_present(&build, "SPEED TRUTH"));
        assert_eq!(build.define_value("RING BUFFER"), Some("250"));

        let ctx = CapabilityContext::new(FirmwareVersion::new(3.0)).with_build(build);
        assert!(Gate::always().and_axis_property(0, 1).is_open(&ctx));
        assert!(!Gate::always().and_axis_property(0, 2).is_open(&ctx));
        assert!(!Gate::always().and_axis_property(1, 0).is_open(&ctx));
        assert!(Gate::always().and_define("RING BUFFER").is_open(&ctx));
    }

    #[test]
    fn version_reply_parsing() {
        assert_eq!(
            FirmwareVersion::parse_reply(":A Version: USB-9.2p v3.30"),
            Some(FirmwareVersion::new(3.30))
        );
        assert_eq!(FirmwareVersion::parse_reply(":A no digits"), None);
        assert!(FirmwareVersion::new(3.2999).at_least(FirmwareVersion::new(3.30)));
        assert!(!FirmwareVersion::new(3.29).at_least(FirmwareVersion::new(3.30)));
    }

    #[test]
    fn default_falls_back_to_first_offered_label() {
        let candidate = PropertyCandidate::enumeration("PLogicChannel", "none")
            .value_gated("none", 50, Gate::since(3.29))
            .value("only 1", 37);
        let ctx = CapabilityContext::new(FirmwareVersion::new(3.20));
        let desc = candidate.resolve(&ctx).unwrap();
        assert_eq!(desc.default, PropertyValue::Text("only 1".into()));
    }
}
