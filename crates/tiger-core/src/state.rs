//! Live mirror of the last observed hardware state.

use crate::property::PropertyValue;
use std::collections::BTreeMap;

/// Cached property values plus the flags that decide when the cache is
/// trusted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    /// Query the controller on every read
    pub refresh_enabled: bool,
    /// Initialization finished
    pub initialized: bool,
    /// The previous write asked for its property to be re-read
    pub last_write_was_immediate: bool,
    /// Addressable sub-unit the controller's pointer is on (logic cell / IO)
    pub pointer_position: u32,
    values: BTreeMap<String, PropertyValue>,
}

impl DeviceState {
    /// Fresh, uninitialized state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a read must go to the controller.
    pub fn must_query(&self, always_live: bool) -> bool {
        always_live || self.refresh_enabled || !self.initialized || self.last_write_was_immediate
    }

    /// Cached value of `name`.
    pub fn cached(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    /// Cached label/text of `name`.
    pub fn cached_text(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(PropertyValue::as_str)
    }

    /// Replace the cached value of `name`.
    pub fn store(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.values.insert(name.into(), value);
    }

    /// Turn refresh on, returning the previous setting for [`restore_refresh`].
    ///
    /// [`restore_refresh`]: DeviceState::restore_refresh
    pub fn force_refresh(&mut self) -> bool {
        std::mem::replace(&mut self.refresh_enabled, true)
    }

    /// Put back a refresh setting saved by [`force_refresh`].
    ///
    /// [`force_refresh`]: DeviceState::force_refresh
    pub fn restore_refresh(&mut self, previous: bool) {
        self.refresh_enabled = previous;
    }

    /// Copy of every cached value.
    pub fn snapshot(&self) -> BTreeMap<String, PropertyValue> {
        self.values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_trusted_only_after_init_with_refresh_off() {
        let mut state = DeviceState::new();
        assert!(state.must_query(false));

        state.initialized = true;
        assert!(!state.must_query(false));
        assert!(state.must_query(true));

        state.last_write_was_immediate = true;
        assert!(state.must_query(false));
        state.last_write_was_immediate = false;

        let previous = state.force_refresh();
        assert!(!previous);
        assert!(state.must_query(false));
        state.restore_refresh(previous);
        assert!(!state.must_query(false));
    }

    #[test]
    fn store_and_read_back() {
        let mut state = DeviceState::new();
        state.store("EditCellUpdates", "Yes".into());
        assert_eq!(state.cached_text("EditCellUpdates"), Some("Yes"));
        assert!(state.cached("Missing").is_none());
    }
}
