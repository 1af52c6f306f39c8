//! Property dispatch.
//!
//! A [`Device`] owns a capability registry, a table of [`PropertyHandler`]s
//! keyed by property name, and the [`DeviceState`] cache. Host reads and
//! writes go through [`Device::get`] and [`Device::set`], which apply the
//! cache policy and validation before handing the request to the handler
//! bound to that name:
//!
//! ```text
//! host ─► Device::get/set ─► PropertyHandler ─► WireAdapter ─► controller
//!                ▲                                   │
//!                └──────── parsed value ◄────────────┘
//! ```
//!
//! Handlers receive `&mut Device<E>` so that cross-property side effects
//! (presets touching the channel property, pointer moves refreshing the edit
//! cell properties) are nested awaited calls on the same task.
//!
//! `E` is per-device extension state that handlers may need beyond the
//! cache, such as unit multipliers or the PLogic cell count.

use crate::capability::{CapabilityContext, CapabilityRegistry, PropertyCandidate};
use crate::error::{TigerError, TigerResult};
use crate::property::{PropertyDescriptor, PropertyValue};
use crate::state::DeviceState;
use crate::wire::WireAdapter;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

// =============================================================================
// Handler Trait
// =============================================================================

/// Result of a handler write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The requested value was applied; cache it.
    Applied,
    /// The controller settled on a different value (re-read, action done).
    Resolved(PropertyValue),
    /// Nothing happened (out-of-range pointer, no-op action); cache untouched.
    Ignored,
}

/// Two-phase callback bound to one property name.
///
/// `read` runs before the host sees a value and returns `None` when the
/// property has nothing to query (write-only presets, host-side flags), in
/// which case the cached value is returned unchanged. `write` runs after the
/// host value has been validated.
#[async_trait]
pub trait PropertyHandler<E: Send + Sync + 'static>: Send + Sync {
    /// Query the controller for the current value.
    async fn read(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>>;

    /// Push a validated value to the controller.
    async fn write(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome>;
}

/// Shared handler pointer.
pub type HandlerRef<E> = Arc<dyn PropertyHandler<E>>;

// =============================================================================
// Property Groups
// =============================================================================

/// Candidates and their handlers, installed together.
pub struct PropertyGroup<E: Send + Sync + 'static> {
    entries: Vec<(PropertyCandidate, Option<HandlerRef<E>>)>,
}

impl<E: Send + Sync + 'static> Default for PropertyGroup<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<E: Send + Sync + 'static> PropertyGroup<E> {
    /// Empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property served by `handler`.
    pub fn add(&mut self, candidate: PropertyCandidate, handler: impl PropertyHandler<E> + 'static) {
        self.entries.push((candidate, Some(Arc::new(handler))));
    }

    /// Add a property served by a shared handler.
    pub fn add_shared(&mut self, candidate: PropertyCandidate, handler: HandlerRef<E>) {
        self.entries.push((candidate, Some(handler)));
    }

    /// Add a property without a handler: reads return the cache, writes store.
    pub fn add_static(&mut self, candidate: PropertyCandidate) {
        self.entries.push((candidate, None));
    }

    /// Append another group.
    pub fn extend(&mut self, other: PropertyGroup<E>) {
        self.entries.extend(other.entries);
    }

    /// Property names in this group, gated or not.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(c, _)| c.name().to_string())
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Device
// =============================================================================

/// Card address and axis letters a device is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Card address character, e.g. `'2'`
    pub address: char,
    /// Axis letters on that card
    pub axes: Vec<char>,
}

impl DeviceCapabilities {
    /// Capabilities for `address` with `axes`.
    pub fn new(address: char, axes: impl IntoIterator<Item = char>) -> Self {
        Self {
            address,
            axes: axes.into_iter().collect(),
        }
    }

    /// Axis letter at `index`, or `'X'` when the device has fewer axes.
    pub fn axis(&self, index: usize) -> char {
        self.axes.get(index).copied().unwrap_or('X')
    }
}

/// One device adapter: registry, handlers, cache and extension state.
pub struct Device<E: Send + Sync + 'static> {
    name: String,
    caps: DeviceCapabilities,
    wire: Arc<dyn WireAdapter>,
    context: CapabilityContext,
    registry: CapabilityRegistry,
    handlers: HashMap<String, HandlerRef<E>>,
    state: DeviceState,
    ext: E,
}

impl<E: Send + Sync + 'static> Device<E> {
    /// New, uninitialized device with an empty registry.
    pub fn new(
        name: impl Into<String>,
        caps: DeviceCapabilities,
        wire: Arc<dyn WireAdapter>,
        context: CapabilityContext,
        ext: E,
    ) -> Self {
        Self {
            name: name.into(),
            caps,
            wire,
            context,
            registry: CapabilityRegistry::default(),
            handlers: HashMap::new(),
            state: DeviceState::new(),
            ext,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address and axes.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    /// Card address character.
    pub fn address(&self) -> char {
        self.caps.address
    }

    /// Shared wire adapter.
    pub fn wire(&self) -> Arc<dyn WireAdapter> {
        Arc::clone(&self.wire)
    }

    /// Version, build and modes the registry was built against.
    pub fn context(&self) -> &CapabilityContext {
        &self.context
    }

    /// Capability registry.
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Descriptor for `name`.
    pub fn descriptor(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.registry.get(name).map(|d| d.as_ref())
    }

    /// Whether `name` exists on this device.
    pub fn has_property(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Cache and policy flags.
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Mutable cache and policy flags.
    pub fn state_mut(&mut self) -> &mut DeviceState {
        &mut self.state
    }

    /// Extension state.
    pub fn ext(&self) -> &E {
        &self.ext
    }

    /// Mutable extension state.
    pub fn ext_mut(&mut self) -> &mut E {
        &mut self.ext
    }

    // -------------------------------------------------------------------------
    // Registry construction
    // -------------------------------------------------------------------------

    /// Evaluate a group's candidates, add the survivors to the registry and
    /// bind their handlers. Returns the names added.
    pub fn install(&mut self, group: PropertyGroup<E>) -> Vec<String> {
        let mut added = Vec::new();
        for (candidate, handler) in group.entries {
            let names = self
                .registry
                .extend(&self.context, std::slice::from_ref(&candidate));
            for name in names {
                if let Some(descriptor) = self.registry.get(&name) {
                    self.state.store(name.clone(), descriptor.default.clone());
                }
                if let Some(handler) = &handler {
                    self.handlers.insert(name.clone(), Arc::clone(handler));
                }
                added.push(name);
            }
        }
        debug!(device = %self.name, added = added.len(), "installed property group");
        added
    }

    /// Mark initialization complete; the cache is trusted from now on.
    pub fn mark_initialized(&mut self) {
        self.state.initialized = true;
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    fn lookup(
        &self,
        name: &str,
    ) -> TigerResult<(Arc<PropertyDescriptor>, Option<HandlerRef<E>>)> {
        let descriptor = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| TigerError::UnknownProperty(name.to_string()))?;
        Ok((descriptor, self.handlers.get(name).cloned()))
    }

    /// Read a property, honouring the cache policy.
    #[instrument(skip(self), fields(device = %self.name), err)]
    pub async fn get(&mut self, name: &str) -> TigerResult<PropertyValue> {
        let (descriptor, handler) = self.lookup(name)?;

        let must_query = self.state.must_query(descriptor.always_live);
        self.state.last_write_was_immediate = false;
        if !must_query {
            if let Some(value) = self.state.cached(name) {
                trace!(property = name, "cache hit");
                return Ok(value.clone());
            }
        }

        let fresh = match handler {
            Some(handler) => handler.read(self, &descriptor).await?,
            None => None,
        };
        match fresh {
            Some(value) => {
                self.state.store(name, value.clone());
                Ok(value)
            }
            None => Ok(self
                .state
                .cached(name)
                .cloned()
                .unwrap_or_else(|| descriptor.default.clone())),
        }
    }

    /// Read a property and return its text form.
    pub async fn get_text(&mut self, name: &str) -> TigerResult<String> {
        Ok(self.get(name).await?.to_string())
    }

    /// Validate and write a property.
    #[instrument(skip(self, value), fields(device = %self.name), err)]
    pub async fn set(&mut self, name: &str, value: PropertyValue) -> TigerResult<()> {
        let (descriptor, handler) = self.lookup(name)?;
        if descriptor.read_only {
            return Err(TigerError::ReadOnly(name.to_string()));
        }
        let value = descriptor.validate(value)?;

        let outcome = match handler {
            Some(handler) => handler.write(self, &descriptor, &value).await?,
            None => WriteOutcome::Applied,
        };
        match outcome {
            WriteOutcome::Applied => self.state.store(name, value),
            WriteOutcome::Resolved(resolved) => self.state.store(name, resolved),
            WriteOutcome::Ignored => debug!(property = name, value = %value, "write ignored"),
        }
        Ok(())
    }

    /// Parse host text per the descriptor's kind and write it.
    pub async fn set_text(&mut self, name: &str, text: &str) -> TigerResult<()> {
        let value = self
            .descriptor(name)
            .ok_or_else(|| TigerError::UnknownProperty(name.to_string()))?
            .parse_text(text)?;
        self.set(name, value).await
    }

    /// Write the label that carries `code` in `name`'s allowed set.
    pub async fn set_code(&mut self, name: &str, code: i64) -> TigerResult<()> {
        let label = self
            .descriptor(name)
            .ok_or_else(|| TigerError::UnknownProperty(name.to_string()))?
            .label_of(code)?;
        self.set(name, PropertyValue::Text(label)).await
    }

    /// Read `name` again straight from the controller, as a write that asks
    /// for an immediate re-read does.
    pub async fn reread(&mut self, name: &str) -> TigerResult<PropertyValue> {
        self.state.last_write_was_immediate = true;
        let result = self.get(name).await;
        self.state.last_write_was_immediate = false;
        result
    }

    /// Read every name in `names` with refresh forced on, then restore the
    /// refresh setting. Names missing from the registry are skipped.
    pub async fn refresh_with(&mut self, names: &[String]) -> TigerResult<()> {
        let previous = self.state.force_refresh();
        let mut result = Ok(());
        for name in names {
            if !self.registry.contains(name) {
                continue;
            }
            if let Err(e) = self.get(name).await {
                result = Err(e);
                break;
            }
        }
        self.state.restore_refresh(previous);
        result
    }

    /// Read every property that has a handler once, straight from the
    /// controller, to seed the cache after construction. Failures are logged
    /// and skipped; returns how many reads failed.
    pub async fn prime(&mut self, names: &[String]) -> usize {
        let previous = self.state.force_refresh();
        let mut failed = 0;
        for name in names {
            if !self.handlers.contains_key(name) {
                continue;
            }
            if let Err(e) = self.get(name).await {
                warn!(device = %self.name, property = %name, error = %e, "initial read failed");
                failed += 1;
            }
        }
        self.state.restore_refresh(previous);
        failed
    }

    /// Names of every property, in creation order.
    pub fn property_names(&self) -> Vec<String> {
        self.registry.iter().map(|d| d.name.clone()).collect()
    }

    /// Host-visible text of the cached value of `name`, or its default.
    pub fn cached_text(&self, name: &str) -> Option<String> {
        self.state
            .cached(name)
            .map(|v| v.to_string())
            .or_else(|| self.descriptor(name).map(|d| d.default.to_string()))
    }

    /// Copies of every descriptor, in creation order.
    pub fn descriptors(&self) -> Vec<PropertyDescriptor> {
        self.registry.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FirmwareVersion;
    use crate::wire::RawResponse;
    use parking_lot::Mutex;

    /// Replies `:A X=<n>` to every command and counts traffic.
    #[derive(Default)]
    struct CountingWire {
        sent: Mutex<Vec<String>>,
        value: Mutex<i64>,
    }

    #[async_trait]
    impl WireAdapter for CountingWire {
        async fn send(&self, command: &str) -> TigerResult<RawResponse> {
            self.sent.lock().push(command.to_string());
            if let Some((_, v)) = command.split_once('=') {
                *self.value.lock() = v.parse().unwrap_or(0);
                return Ok(RawResponse::new(":A"));
            }
            Ok(RawResponse::new(format!(":A X={}", *self.value.lock())))
        }
    }

    struct Register;

    #[async_trait]
    impl PropertyHandler<()> for Register {
        async fn read(
            &self,
            device: &mut Device<()>,
            _descriptor: &PropertyDescriptor,
        ) -> TigerResult<Option<PropertyValue>> {
            let reply = device.wire().send_and_verify("1MA X?", ":A").await?;
            Ok(Some(reply.integer(crate::wire::Marker::AfterEquals)?.into()))
        }

        async fn write(
            &self,
            device: &mut Device<()>,
            _descriptor: &PropertyDescriptor,
            value: &PropertyValue,
        ) -> TigerResult<WriteOutcome> {
            let code = value.as_i64().unwrap_or_default();
            device
                .wire()
                .send_and_verify(&format!("1MA X={}", code), ":A")
                .await?;
            Ok(WriteOutcome::Applied)
        }
    }

    fn device(wire: Arc<CountingWire>) -> Device<()> {
        let ctx = CapabilityContext::new(FirmwareVersion::new(3.30));
        let mut device = Device::new(
            "test",
            DeviceCapabilities::new('1', ['X']),
            wire,
            ctx,
            (),
        );
        let mut group = PropertyGroup::new();
        group.add(PropertyCandidate::integer("Maintain", 0).limits(0.0, 3.0), Register);
        group.add_static(PropertyCandidate::integer("Cells", 16).read_only());
        group.add(
            PropertyCandidate::float("Retrace", 67.0).since(3.31),
            Register,
        );
        device.install(group);
        device
    }

    #[tokio::test]
    async fn cached_read_skips_wire_after_init() {
        let wire = Arc::new(CountingWire::default());
        let mut device = device(wire.clone());
        device.set("Maintain", 2.into()).await.unwrap();
        device.mark_initialized();

        let before = wire.sent.lock().len();
        assert_eq!(device.get("Maintain").await.unwrap(), 2.into());
        assert_eq!(wire.sent.lock().len(), before);

        device.state_mut().refresh_enabled = true;
        assert_eq!(device.get("Maintain").await.unwrap(), 2.into());
        assert_eq!(wire.sent.lock().len(), before + 1);
    }

    #[tokio::test]
    async fn validation_and_unsupported() {
        let wire = Arc::new(CountingWire::default());
        let mut device = device(wire.clone());

        let err = device.set("Maintain", 9.into()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidValue);
        let err = device.set("Cells", 4.into()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedOperation);
        let err = device.get("Retrace").await.unwrap_err();
        assert!(matches!(err, TigerError::UnknownProperty(_)));
        assert!(wire.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn reread_bypasses_cache_once() {
        let wire = Arc::new(CountingWire::default());
        let mut device = device(wire.clone());
        device.mark_initialized();

        *wire.value.lock() = 3;
        assert_eq!(device.reread("Maintain").await.unwrap(), 3.into());
        assert!(!device.state().last_write_was_immediate);

        *wire.value.lock() = 1;
        assert_eq!(device.get("Maintain").await.unwrap(), 3.into());
    }

    struct Noop;

    #[async_trait]
    impl PropertyHandler<()> for Noop {
        async fn read(
            &self,
            _device: &mut Device<()>,
            _descriptor: &PropertyDescriptor,
        ) -> TigerResult<Option<PropertyValue>> {
            Ok(None)
        }

        async fn write(
            &self,
            _device: &mut Device<()>,
            _descriptor: &PropertyDescriptor,
            _value: &PropertyValue,
        ) -> TigerResult<WriteOutcome> {
            Ok(WriteOutcome::Ignored)
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn ignored_write_keeps_cache_and_logs() {
        let wire = Arc::new(CountingWire::default());
        let mut device = device(wire.clone());
        let mut group = PropertyGroup::new();
        group.add(PropertyCandidate::integer("EditCellConfig", 0), Noop);
        device.install(group);

        device.set("EditCellConfig", 41.into()).await.unwrap();
        assert_eq!(device.get("EditCellConfig").await.unwrap(), 0.into());
        assert!(wire.sent.lock().is_empty());
        assert!(logs_contain("write ignored"));
    }

    #[tokio::test]
    async fn static_property_reads_default() {
        let wire = Arc::new(CountingWire::default());
        let mut device = device(wire.clone());
        assert_eq!(device.get("Cells").await.unwrap(), 16.into());
        assert_eq!(device.descriptors().len(), 2);
    }
}
