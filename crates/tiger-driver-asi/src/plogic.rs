//! ASI Tiger programmable logic card (PLogic).
//!
//! The card holds 16 or 24 logic cells plus 16 physical IOs (front panel
//! BNCs 33-40, backplane TTLs 41-48). Cells and IOs are edited through a
//! single pointer:
//!
//! ```text
//! M <axis>=<n>        move the pointer
//! W <axis>            read the pointer
//! <addr>CCA X=<n>     apply a card preset
//! <addr>CCA Y=<n>     type of the cell/IO under the pointer
//! <addr>CCA Z=<n>     config of the cell, or source address of the IO
//! <addr>CCB X|Y|Z|F   inputs 1-4 of the cell under the pointer
//! <addr>RA X|Y|Z|F?   output states (front panel, backplane, cells)
//! PM <axis>=<n>       clock source
//! ```
//!
//! A pre-init mode turns the card into a shutter: the card presets 10/11
//! drive cell 8 low or high and [`PLogic::set_open`] toggles between them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tiger_driver_asi::plogic::{PLogic, PLogicConfig, PLogicMode};
//!
//! let config = PLogicConfig::new("shutter", '3', 'E').with_mode(PLogicMode::FourChannelShutter);
//! let mut card = PLogic::initialize(&config, wire).await?;
//! card.set_open(true).await?;
//! ```

use crate::card::{card_group, check_address, check_axis, ActionHandler};
use crate::labels::{self, NO, YES};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tiger_core::binding::{Codec, WireBinding};
use tiger_core::capability::{CapabilityContext, Gate, PropertyCandidate};
use tiger_core::dispatch::{Device, DeviceCapabilities, PropertyGroup, PropertyHandler, WriteOutcome};
use tiger_core::driver::{DeviceRole, DriverFactory, PropertySurface};
use tiger_core::error::{TigerError, TigerResult};
use tiger_core::limits::{is_physical_io, PLOGIC_ADDRESSES, PLOGIC_DEFAULT_CELLS};
use tiger_core::property::{PropertyDescriptor, PropertyValue};
use tiger_core::wire::{Marker, RawResponse, WireAdapter, ACK_PREFIX};
use tracing::{debug, info, instrument};

// =============================================================================
// Mode
// =============================================================================

/// Pre-init role of the card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PLogicMode {
    /// Plain logic card.
    #[default]
    None,
    /// Four-channel shutter on BNC5-8, gated by backplane TTL1.
    DispimShutter,
    /// Four-channel shutter on BNC5-8.
    FourChannelShutter,
    /// Seven-channel shutter on BNC1-7.
    SevenChannelShutter,
    /// Seven-channel shutter gated by backplane TTL1.
    SevenChannelTtlShutter,
}

impl PLogicMode {
    /// Every mode, in the order offered.
    pub const ALL: [PLogicMode; 5] = [
        PLogicMode::None,
        PLogicMode::DispimShutter,
        PLogicMode::FourChannelShutter,
        PLogicMode::SevenChannelShutter,
        PLogicMode::SevenChannelTtlShutter,
    ];

    /// Host label.
    pub fn label(self) -> &'static str {
        match self {
            PLogicMode::None => labels::MODE_NONE,
            PLogicMode::DispimShutter => labels::MODE_DISPIM_SHUTTER,
            PLogicMode::FourChannelShutter => labels::MODE_FOUR_CHANNEL_SHUTTER,
            PLogicMode::SevenChannelShutter => labels::MODE_SEVEN_CHANNEL_SHUTTER,
            PLogicMode::SevenChannelTtlShutter => labels::MODE_SEVEN_CHANNEL_TTL_SHUTTER,
        }
    }

    /// Spelling used in configuration files.
    pub fn config_key(self) -> &'static str {
        match self {
            PLogicMode::None => "none",
            PLogicMode::DispimShutter => "dispim_shutter",
            PLogicMode::FourChannelShutter => "four_channel_shutter",
            PLogicMode::SevenChannelShutter => "seven_channel_shutter",
            PLogicMode::SevenChannelTtlShutter => "seven_channel_ttl_shutter",
        }
    }

    /// Triggered from backplane TTL1.
    pub fn is_dispim(self) -> bool {
        matches!(self, PLogicMode::DispimShutter | PLogicMode::SevenChannelTtlShutter)
    }

    /// Uses the BNC5-8 channel set.
    pub fn is_four_channel(self) -> bool {
        matches!(self, PLogicMode::DispimShutter | PLogicMode::FourChannelShutter)
    }

    /// Uses the BNC1-7 channel set.
    pub fn is_seven_channel(self) -> bool {
        matches!(self, PLogicMode::SevenChannelShutter | PLogicMode::SevenChannelTtlShutter)
    }

    /// Any shutter mode.
    pub fn is_shutter(self) -> bool {
        self != PLogicMode::None
    }

    /// "None" channel label of this mode's channel set.
    pub fn channel_none(self) -> Option<&'static str> {
        if self.is_four_channel() {
            Some(labels::CHANNEL_NONE_4CH)
        } else if self.is_seven_channel() {
            Some(labels::CHANNEL_NONE_7CH)
        } else {
            None
        }
    }

    /// Capability modes that open mode-gated properties and values.
    pub fn capability_modes(self) -> Vec<&'static str> {
        let mut modes = Vec::new();
        if self.is_dispim() {
            modes.push(labels::CAP_DISPIM);
        }
        if self.is_four_channel() {
            modes.push(labels::CAP_FOUR_CHANNEL);
        }
        if self.is_seven_channel() {
            modes.push(labels::CAP_SEVEN_CHANNEL);
        }
        modes
    }
}

impl fmt::Display for PLogicMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PLogicMode {
    type Err = TigerError;

    /// Accepts the host label or the snake_case config spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PLogicMode::ALL
            .into_iter()
            .find(|mode| mode.label() == s || mode.config_key() == s)
            .ok_or_else(|| TigerError::invalid_value(labels::PLOGIC_MODE, s, "unknown mode"))
    }
}

// =============================================================================
// Device extension
// =============================================================================

/// PLogic-specific device state.
#[derive(Debug, Clone)]
pub struct PLogicExt {
    /// Pre-init mode
    pub mode: PLogicMode,
    /// Pointer axis letter
    pub axis: char,
    /// Logic cells on this card
    pub num_cells: u32,
    /// Refresh the edit properties when the pointer moves
    pub edit_cell_updates: bool,
    /// Per-cell and per-IO properties installed
    pub advanced_enabled: bool,
    /// Last requested shutter state
    pub shutter_open: bool,
}

impl PLogicExt {
    fn new(mode: PLogicMode, axis: char, num_cells: u32) -> Self {
        Self {
            mode,
            axis,
            num_cells,
            edit_cell_updates: true,
            advanced_enabled: false,
            shutter_open: false,
        }
    }
}

/// Cell count from a build name such as `PLOGIC_24`.
pub fn cells_from_build(build_name: &str) -> u32 {
    RawResponse::new(build_name)
        .field::<u32>(Marker::AfterUnderscore)
        .unwrap_or(PLOGIC_DEFAULT_CELLS)
}

/// Name of the advanced property `suffix` of cell `index`.
pub fn cell_property(index: u32, suffix: &str) -> String {
    format!("PCell_{:02}{}", index, suffix)
}

/// Name of the advanced property `suffix` of physical IO `address`.
pub fn io_property(address: u32, suffix: &str) -> String {
    if address <= tiger_core::limits::PLOGIC_FRONTPANEL_END {
        format!("IOFrontpanel_{}{}", address - 32, suffix)
    } else {
        format!("IOBackplane_{}{}", address - 41, suffix)
    }
}

const CELL_TYPE_SUFFIX: &str = "_CellType";
const CELL_CONFIG_SUFFIX: &str = "_Config";
const CELL_INPUT_SUFFIXES: [&str; 4] = ["_Input1", "_Input2", "_Input3", "_Input4"];
const IO_TYPE_SUFFIX: &str = "_IOType";
const IO_SOURCE_SUFFIX: &str = "_SourceAddress";

// =============================================================================
// Cell fields
// =============================================================================

/// One register of a cell or IO, addressed through the pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellField {
    /// `CCA Y`
    Type,
    /// `CCA Z`
    Config,
    /// `CCB X|Y|Z|F`
    Input(usize),
}

impl CellField {
    const INPUT_AXES: [char; 4] = ['X', 'Y', 'Z', 'F'];

    fn register(self) -> (&'static str, char) {
        match self {
            CellField::Type => ("CCA", 'Y'),
            CellField::Config => ("CCA", 'Z'),
            CellField::Input(n) => ("CCB", Self::INPUT_AXES[n]),
        }
    }

    /// Whether the field exists at `position` on a card with `cells` cells.
    fn exists_at(self, position: u32, cells: u32) -> bool {
        match self {
            CellField::Type | CellField::Config => position <= cells || is_physical_io(position),
            CellField::Input(_) => position <= cells,
        }
    }

    async fn read(self, device: &Device<PLogicExt>) -> TigerResult<i64> {
        let (verb, slot) = self.register();
        device
            .wire()
            .send_and_verify(
                &format!("{}{} {}?", device.address(), verb, slot),
                &format!(":A {}=", slot),
            )
            .await?
            .integer(Marker::AfterEquals)
    }

    async fn write(self, device: &Device<PLogicExt>, code: i64) -> TigerResult<()> {
        let (verb, slot) = self.register();
        device
            .wire()
            .send_and_verify(&format!("{}{} {}={}", device.address(), verb, slot, code), ACK_PREFIX)
            .await?;
        Ok(())
    }
}

/// Map a raw `CCA Y` code to its host label. IO types are offered with
/// [`labels::IO_TYPE_OFFSET`] added so they do not collide with cell types.
fn type_label(descriptor: &PropertyDescriptor, raw: i64, io: bool) -> Option<PropertyValue> {
    let code = if io { raw + labels::IO_TYPE_OFFSET } else { raw };
    descriptor.label_of(code).ok().map(PropertyValue::Text)
}

/// Inverse of [`type_label`]; rejects a cell type on an IO and vice versa.
fn type_code(descriptor: &PropertyDescriptor, value: &PropertyValue, io: bool) -> TigerResult<i64> {
    let code = descriptor.code_of(&value.to_string())?;
    match (io, code >= labels::IO_TYPE_OFFSET) {
        (true, true) => Ok(code - labels::IO_TYPE_OFFSET),
        (false, false) => Ok(code),
        (true, false) => Err(TigerError::invalid_value(
            &descriptor.name,
            value,
            "cell types cannot be applied to a physical IO",
        )),
        (false, true) => Err(TigerError::invalid_value(
            &descriptor.name,
            value,
            "IO types cannot be applied to a logic cell",
        )),
    }
}

// =============================================================================
// Pointer helpers
// =============================================================================

/// Move the pointer without going through the `PointerPosition` write path.
async fn set_position_directly(device: &mut Device<PLogicExt>, position: u32) -> TigerResult<()> {
    if device.state().pointer_position == position {
        return Ok(());
    }
    let axis = device.ext().axis;
    device
        .wire()
        .send_and_verify(&format!("M {}={}", axis, position), ACK_PREFIX)
        .await?;
    device.state_mut().pointer_position = position;
    device
        .state_mut()
        .store(labels::POINTER_POSITION, PropertyValue::Integer(position.into()));
    Ok(())
}

/// Re-read whichever edit properties exist at the current pointer.
async fn refresh_edit_cells(device: &mut Device<PLogicExt>) -> TigerResult<()> {
    if !device.ext().edit_cell_updates {
        return Ok(());
    }
    let position = device.state().pointer_position;
    let cells = device.ext().num_cells;
    let mut names = vec![labels::EDIT_CELL_TYPE.to_string(), labels::EDIT_CELL_CONFIG.to_string()];
    if position <= cells {
        names.extend(labels::EDIT_CELL_INPUTS.iter().map(|n| n.to_string()));
    } else if !is_physical_io(position) {
        return Ok(());
    }
    device.refresh_with(&names).await
}

/// Drive cell 8 through presets 10/11. No-op outside shutter modes.
async fn set_shutter(device: &mut Device<PLogicExt>, open: bool) -> TigerResult<()> {
    if !device.ext().mode.is_shutter() {
        return Ok(());
    }
    device.ext_mut().shutter_open = open;
    let preset = if open {
        labels::PRESET_CELL8_HIGH
    } else {
        labels::PRESET_CELL8_LOW
    };
    device.set_code(labels::SET_CARD_PRESET, preset).await
}

fn offers(device: &Device<PLogicExt>, name: &str, label: &str) -> bool {
    device
        .descriptor(name)
        .map(|d| d.labels().iter().any(|l| l == label))
        .unwrap_or(false)
}

// =============================================================================
// Property groups
// =============================================================================

fn plogic_group(axis: char, address: char, num_cells: u32, mode: PLogicMode) -> PropertyGroup<PLogicExt> {
    let mut group = PropertyGroup::new();

    let mut mode_candidate = PropertyCandidate::enumeration(labels::PLOGIC_MODE, mode.label()).read_only();
    for (code, each) in PLogicMode::ALL.iter().enumerate() {
        mode_candidate = mode_candidate.value(each.label(), code as i64);
    }
    group.add_static(mode_candidate);
    group.add_static(PropertyCandidate::integer(labels::NUM_LOGIC_CELLS, num_cells.into()).read_only());

    group.add(
        PropertyCandidate::integer(labels::POINTER_POSITION, 0)
            .limits(0.0, f64::from(PLOGIC_ADDRESSES - 1)),
        PointerHandler,
    );

    let output = |query: String| {
        WireBinding::query(query, ACK_PREFIX).at(Marker::AfterPosition(2))
    };
    group.add(
        PropertyCandidate::integer(labels::OUTPUT_STATE, 0).read_only().always_live(),
        output(format!("{}RA Z?", address)),
    );
    group.add(
        PropertyCandidate::integer(labels::OUTPUT_STATE_UPPER, 0)
            .read_only()
            .always_live()
            .gate(Gate::when(num_cells > 16)),
        output(format!("{}RA F?", address)),
    );
    group.add(
        PropertyCandidate::integer(labels::FRONTPANEL_OUTPUT_STATE, 0).read_only().always_live(),
        output(format!("{}RA X?", address)),
    );
    group.add(
        PropertyCandidate::integer(labels::BACKPLANE_OUTPUT_STATE, 0).read_only().always_live(),
        output(format!("{}RA Y?", address)),
    );

    let mut trigger = PropertyCandidate::enumeration(labels::TRIGGER_SOURCE, labels::TRIGGER_SOURCES[0].1);
    for (code, label) in labels::TRIGGER_SOURCES {
        trigger = trigger.value(*label, *code);
    }
    group.add(
        trigger,
        WireBinding::query(format!("PM {}?", axis), axis.to_string())
            .command(format!("PM {}={{}}", axis))
            .codec(Codec::labels()),
    );

    let mut preset = PropertyCandidate::enumeration(labels::SET_CARD_PRESET, labels::PRESET_NONE)
        .value(labels::PRESET_NONE, -1);
    for p in labels::PRESETS {
        preset = if p.code == labels::PRESET_CELL10_TTL1_AND_CELL8 {
            preset.value_relabelled(p.label, p.code, labels::PRESET_12_RENAMED_IN, labels::PRESET_12_LEGACY)
        } else {
            let gate = match p.mode {
                Some(m) => Gate::since(p.since).and_mode(m),
                None => Gate::since(p.since),
            };
            preset.value_gated(p.label, p.code, gate)
        };
    }
    group.add(preset, PresetHandler);

    group.add(
        ActionHandler::candidate(labels::CLEAR_ALL_CELL_STATES),
        ActionHandler::new(format!("! {}", axis)),
    );

    let mut cell_type = PropertyCandidate::enumeration(labels::EDIT_CELL_TYPE, labels::CELL_TYPES[0].1);
    for (code, label, since) in labels::CELL_TYPES {
        cell_type = cell_type.value_gated(*label, *code, Gate::since(*since));
    }
    for (code, label) in labels::IO_TYPES {
        cell_type = cell_type.value(*label, *code);
    }
    group.add(cell_type, EditCellHandler { field: CellField::Type });
    group.add(
        PropertyCandidate::integer(labels::EDIT_CELL_CONFIG, 0),
        EditCellHandler { field: CellField::Config },
    );
    for (n, name) in labels::EDIT_CELL_INPUTS.iter().enumerate() {
        group.add(
            PropertyCandidate::integer(*name, 0),
            EditCellHandler { field: CellField::Input(n) },
        );
    }

    group.add(
        PropertyCandidate::enumeration(labels::EDIT_CELL_UPDATES, YES).yes_no(),
        EditCellUpdatesHandler,
    );
    group.add(
        PropertyCandidate::enumeration(labels::ADVANCED_PROPERTIES, NO).yes_no(),
        AdvancedHandler,
    );

    let mut four = PropertyCandidate::enumeration(labels::PLOGIC_CHANNEL, labels::CHANNEL_NONE_4CH)
        .in_mode(labels::CAP_FOUR_CHANNEL);
    for (code, label, since) in labels::CHANNELS_4CH {
        four = four.value_gated(*label, *code, Gate::since(*since));
    }
    group.add(four, ChannelHandler);

    let mut seven = PropertyCandidate::enumeration(labels::PLOGIC_CHANNEL, labels::CHANNEL_NONE_7CH)
        .in_mode(labels::CAP_SEVEN_CHANNEL);
    for (code, label, since) in labels::CHANNELS_7CH {
        seven = seven.value_gated(*label, *code, Gate::since(*since));
    }
    group.add(seven, ChannelHandler);

    group
}

/// Highest cell type offered on the per-cell properties. The edit cell
/// property alone goes on to 18.
const ADVANCED_CELL_TYPE_LAST: i64 = 17;

/// Per-cell and per-IO properties, installed when `AdvancedProperties`
/// is switched on.
fn advanced_group(num_cells: u32) -> PropertyGroup<PLogicExt> {
    let mut group = PropertyGroup::new();
    for index in 1..=num_cells {
        let mut cell_type =
            PropertyCandidate::enumeration(cell_property(index, CELL_TYPE_SUFFIX), labels::CELL_TYPES[0].1);
        let cell_types = labels::CELL_TYPES
            .iter()
            .filter(|(code, ..)| *code <= ADVANCED_CELL_TYPE_LAST);
        for (code, label, since) in cell_types {
            cell_type = cell_type.value_gated(*label, *code, Gate::since(*since));
        }
        group.add(cell_type, AddressedHandler::cell(index, CellField::Type));
        group.add(
            PropertyCandidate::integer(cell_property(index, CELL_CONFIG_SUFFIX), 0),
            AddressedHandler::cell(index, CellField::Config),
        );
        for (n, suffix) in CELL_INPUT_SUFFIXES.iter().enumerate() {
            group.add(
                PropertyCandidate::integer(cell_property(index, suffix), 0),
                AddressedHandler::cell(index, CellField::Input(n)),
            );
        }
    }

    let io_range = tiger_core::limits::PLOGIC_FRONTPANEL_START..=tiger_core::limits::PLOGIC_BACKPLANE_END;
    for address in io_range {
        let mut io_type = PropertyCandidate::enumeration(io_property(address, IO_TYPE_SUFFIX), labels::IO_TYPES[0].1);
        for (code, label) in labels::IO_TYPES {
            io_type = io_type.value(*label, *code);
        }
        group.add(io_type, AddressedHandler::io(address, CellField::Type));
        group.add(
            PropertyCandidate::integer(io_property(address, IO_SOURCE_SUFFIX), 0),
            AddressedHandler::io(address, CellField::Config),
        );
    }
    group
}

// =============================================================================
// Handlers
// =============================================================================

/// `M`/`W` pointer; a read also refreshes the edit properties.
struct PointerHandler;

#[async_trait]
impl PropertyHandler<PLogicExt> for PointerHandler {
    async fn read(
        &self,
        device: &mut Device<PLogicExt>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let axis = device.ext().axis;
        let position = device
            .wire()
            .send_and_verify(&format!("W {}", axis), ACK_PREFIX)
            .await?
            .field::<u32>(Marker::AfterPosition(2))?;
        device.state_mut().pointer_position = position;
        refresh_edit_cells(device).await?;
        Ok(Some(PropertyValue::Integer(position.into())))
    }

    async fn write(
        &self,
        device: &mut Device<PLogicExt>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let position = value
            .as_i64()
            .ok_or_else(|| TigerError::invalid_value(&descriptor.name, value, "expected an integer"))?;
        let position = u32::try_from(position)
            .map_err(|_| TigerError::invalid_value(&descriptor.name, value, "pointer cannot be negative"))?;
        let axis = device.ext().axis;
        device
            .wire()
            .send_and_verify(&format!("M {}={}", axis, position), ACK_PREFIX)
            .await?;
        // The card has moved even if the read-back below fails.
        device.state_mut().pointer_position = position;
        let resolved = device.reread(labels::POINTER_POSITION).await?;
        Ok(WriteOutcome::Resolved(resolved))
    }
}

/// `CCA X=<n>`; preset 14 in a TTL mode also parks the channel selector.
struct PresetHandler;

#[async_trait]
impl PropertyHandler<PLogicExt> for PresetHandler {
    async fn read(
        &self,
        _device: &mut Device<PLogicExt>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        Ok(None)
    }

    async fn write(
        &self,
        device: &mut Device<PLogicExt>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let code = descriptor.code_of(&value.to_string())?;
        if code < 0 {
            return Ok(WriteOutcome::Ignored);
        }
        device
            .wire()
            .send_and_verify(&format!("{}CCA X={}", device.address(), code), ACK_PREFIX)
            .await?;
        debug!(device = device.name(), preset = code, "card preset applied");

        let mode = device.ext().mode;
        if mode.is_dispim() && code == labels::PRESET_DISPIM_TTL {
            if let Some(none) = mode.channel_none() {
                if offers(device, labels::PLOGIC_CHANNEL, none) {
                    device.set(labels::PLOGIC_CHANNEL, none.into()).await?;
                }
            }
        }
        Ok(WriteOutcome::Applied)
    }
}

/// Shutter channel; each channel is a card preset.
struct ChannelHandler;

#[async_trait]
impl PropertyHandler<PLogicExt> for ChannelHandler {
    async fn read(
        &self,
        _device: &mut Device<PLogicExt>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        Ok(None)
    }

    async fn write(
        &self,
        device: &mut Device<PLogicExt>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let code = descriptor.code_of(&value.to_string())?;
        if code < 0 {
            return Ok(WriteOutcome::Ignored);
        }
        device
            .wire()
            .send_and_verify(&format!("{}CCA X={}", device.address(), code), ACK_PREFIX)
            .await?;
        Ok(WriteOutcome::Applied)
    }
}

/// Edit properties: act on whatever the pointer addresses.
struct EditCellHandler {
    field: CellField,
}

#[async_trait]
impl PropertyHandler<PLogicExt> for EditCellHandler {
    async fn read(
        &self,
        device: &mut Device<PLogicExt>,
        descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let position = device.state().pointer_position;
        let cells = device.ext().num_cells;
        if !self.field.exists_at(position, cells) {
            return Ok(None);
        }
        let raw = self.field.read(device).await?;
        Ok(match self.field {
            CellField::Type => type_label(descriptor, raw, position > cells),
            _ => Some(PropertyValue::Integer(raw)),
        })
    }

    async fn write(
        &self,
        device: &mut Device<PLogicExt>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let position = device.state().pointer_position;
        let cells = device.ext().num_cells;
        if !self.field.exists_at(position, cells) {
            return Ok(WriteOutcome::Ignored);
        }
        let code = match self.field {
            CellField::Type => type_code(descriptor, value, position > cells)?,
            _ => value
                .as_i64()
                .ok_or_else(|| TigerError::invalid_value(&descriptor.name, value, "expected an integer"))?,
        };
        self.field.write(device, code).await?;
        if self.field == CellField::Type {
            refresh_edit_cells(device).await?;
        }
        Ok(WriteOutcome::Applied)
    }
}

/// Host-only switch for the pointer refresh.
struct EditCellUpdatesHandler;

#[async_trait]
impl PropertyHandler<PLogicExt> for EditCellUpdatesHandler {
    async fn read(
        &self,
        _device: &mut Device<PLogicExt>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        Ok(None)
    }

    async fn write(
        &self,
        device: &mut Device<PLogicExt>,
        _descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        device.ext_mut().edit_cell_updates = value.as_str() == Some(YES);
        Ok(WriteOutcome::Applied)
    }
}

/// Writing Yes installs the per-cell and per-IO properties once.
struct AdvancedHandler;

#[async_trait]
impl PropertyHandler<PLogicExt> for AdvancedHandler {
    async fn read(
        &self,
        _device: &mut Device<PLogicExt>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        Ok(None)
    }

    async fn write(
        &self,
        device: &mut Device<PLogicExt>,
        _descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        if value.as_str() != Some(YES) || device.ext().advanced_enabled {
            return Ok(WriteOutcome::Applied);
        }
        device.ext_mut().advanced_enabled = true;
        let added = device.install(advanced_group(device.ext().num_cells));
        let failed = device.prime(&added).await;
        info!(
            device = device.name(),
            added = added.len(),
            failed,
            "logic cell properties added"
        );
        Ok(WriteOutcome::Applied)
    }
}

/// Advanced property bound to one cell or IO; moves the pointer first.
struct AddressedHandler {
    position: u32,
    field: CellField,
    io: bool,
}

impl AddressedHandler {
    fn cell(position: u32, field: CellField) -> Self {
        Self { position, field, io: false }
    }

    fn io(position: u32, field: CellField) -> Self {
        Self { position, field, io: true }
    }

    fn dependents(&self) -> Vec<String> {
        let mut names = vec![cell_property(self.position, CELL_CONFIG_SUFFIX)];
        names.extend(CELL_INPUT_SUFFIXES.iter().map(|s| cell_property(self.position, s)));
        names
    }
}

#[async_trait]
impl PropertyHandler<PLogicExt> for AddressedHandler {
    async fn read(
        &self,
        device: &mut Device<PLogicExt>,
        descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        set_position_directly(device, self.position).await?;
        let raw = self.field.read(device).await?;
        Ok(match self.field {
            CellField::Type => type_label(descriptor, raw, self.io),
            _ => Some(PropertyValue::Integer(raw)),
        })
    }

    async fn write(
        &self,
        device: &mut Device<PLogicExt>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let code = match self.field {
            CellField::Type => type_code(descriptor, value, self.io)?,
            _ => value
                .as_i64()
                .ok_or_else(|| TigerError::invalid_value(&descriptor.name, value, "expected an integer"))?,
        };
        set_position_directly(device, self.position).await?;
        self.field.write(device, code).await?;
        if self.field == CellField::Type && !self.io {
            device.refresh_with(&self.dependents()).await?;
        }
        Ok(WriteOutcome::Applied)
    }
}

// =============================================================================
// Device
// =============================================================================

/// An initialized PLogic card.
pub struct PLogic {
    device: Device<PLogicExt>,
}

impl PLogic {
    /// Query the card, build its properties and apply the mode's setup.
    #[instrument(skip(config, wire), fields(device = %config.id, address = %config.address))]
    pub async fn initialize(config: &PLogicConfig, wire: Arc<dyn WireAdapter>) -> TigerResult<Self> {
        let axis = config.axis()?;
        let identity = wire.card_identity(config.address).await?;
        let num_cells = cells_from_build(&identity.build.name);
        let context = config.mode.capability_modes().into_iter().fold(
            CapabilityContext::new(identity.version).with_build(identity.build.clone()),
            |ctx, mode| ctx.with_mode(mode),
        );

        let mut device = Device::new(
            config.id.clone(),
            DeviceCapabilities::new(config.address, [axis]),
            wire,
            context,
            PLogicExt::new(config.mode, axis, num_cells),
        );
        let description = format!("ASI Programmable Logic HexAddr={}", config.address);
        device.install(card_group(&description, &identity, None));
        device.install(plogic_group(axis, config.address, num_cells, config.mode));

        let names = device.property_names();
        let failed = device.prime(&names).await;
        apply_mode_setup(&mut device).await?;
        device.mark_initialized();

        info!(
            device = device.name(),
            version = identity.version.value(),
            cells = num_cells,
            mode = %config.mode,
            failed,
            "PLogic card initialized"
        );
        Ok(Self { device })
    }

    /// Open or close the shutter (presets 11/10). No-op outside shutter modes.
    pub async fn set_open(&mut self, open: bool) -> TigerResult<()> {
        set_shutter(&mut self.device, open).await
    }

    /// Last requested shutter state; always false outside shutter modes.
    pub fn is_open(&self) -> bool {
        self.device.ext().mode.is_shutter() && self.device.ext().shutter_open
    }

    /// Pre-init mode.
    pub fn mode(&self) -> PLogicMode {
        self.device.ext().mode
    }

    /// Underlying device.
    pub fn device(&self) -> &Device<PLogicExt> {
        &self.device
    }

    /// Underlying device, mutably.
    pub fn device_mut(&mut self) -> &mut Device<PLogicExt> {
        &mut self.device
    }
}

/// Leave the card in the state its mode expects.
async fn apply_mode_setup(device: &mut Device<PLogicExt>) -> TigerResult<()> {
    let mode = device.ext().mode;
    if let Some(none) = mode.channel_none() {
        if offers(device, labels::PLOGIC_CHANNEL, none) {
            device.set(labels::PLOGIC_CHANNEL, none.into()).await?;
        }
        set_shutter(device, false).await?;
    }

    if mode.is_dispim() {
        device.set_code(labels::TRIGGER_SOURCE, 1).await?;
        if mode.is_four_channel() {
            device.set_code(labels::SET_CARD_PRESET, labels::PRESET_DISPIM_TTL).await?;
        } else {
            // Cell 10 drives backplane TTL1 as a push-pull output.
            device
                .set_code(labels::SET_CARD_PRESET, labels::PRESET_CELL10_TTL1_AND_CELL8)
                .await?;
            device.set(labels::POINTER_POSITION, PropertyValue::Integer(40)).await?;
            device.set_code(labels::EDIT_CELL_TYPE, labels::IO_TYPE_OFFSET + 2).await?;
            device.set(labels::EDIT_CELL_CONFIG, PropertyValue::Integer(41)).await?;
        }
    } else if mode.is_shutter() {
        if device.context().at_least(3.27) {
            device
                .set_code(labels::SET_CARD_PRESET, labels::PRESET_CELL10_FOLLOWS_CELL8)
                .await?;
        } else {
            // Build "cell 10 = cell 8" by hand: an AND of cell 8 with constant high.
            device.set(labels::POINTER_POSITION, PropertyValue::Integer(10)).await?;
            device.set_code(labels::EDIT_CELL_TYPE, 5).await?;
            device.set(labels::EDIT_CELL_INPUTS[0], PropertyValue::Integer(64)).await?;
            device.set(labels::EDIT_CELL_INPUTS[1], PropertyValue::Integer(8)).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl PropertySurface for PLogic {
    fn device_name(&self) -> &str {
        self.device.name()
    }

    fn descriptors(&self) -> Vec<PropertyDescriptor> {
        self.device.descriptors()
    }

    async fn get_property(&mut self, name: &str) -> TigerResult<PropertyValue> {
        self.device.get(name).await
    }

    async fn set_property(&mut self, name: &str, text: &str) -> TigerResult<()> {
        self.device.set_text(name, text).await
    }
}

// =============================================================================
// Configuration and factory
// =============================================================================

/// Configuration for a PLogic card.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PLogicConfig {
    /// Device name
    pub id: String,
    /// Card address
    pub address: char,
    /// Pointer axis letter; exactly one
    pub axes: Vec<char>,
    /// Pre-init mode
    #[serde(default)]
    pub mode: PLogicMode,
}

impl PLogicConfig {
    /// Plain logic card at `address` with pointer axis `axis`.
    pub fn new(id: impl Into<String>, address: char, axis: char) -> Self {
        Self {
            id: id.into(),
            address,
            axes: vec![axis],
            mode: PLogicMode::None,
        }
    }

    /// Set the pre-init mode.
    pub fn with_mode(mut self, mode: PLogicMode) -> Self {
        self.mode = mode;
        self
    }

    fn axis(&self) -> TigerResult<char> {
        match self.axes.as_slice() {
            [axis] => Ok(*axis),
            _ => Err(TigerError::invalid_value(
                "axes",
                format!("{:?}", self.axes),
                "a PLogic card has exactly one axis letter",
            )),
        }
    }
}

/// Factory for [`PLogic`].
pub struct PLogicFactory;

static PLOGIC_ROLES: &[DeviceRole] = &[DeviceRole::LogicCard, DeviceRole::Shutter];

impl DriverFactory for PLogicFactory {
    fn driver_type(&self) -> &'static str {
        "plogic"
    }

    fn name(&self) -> &'static str {
        "ASI Tiger Programmable Logic"
    }

    fn roles(&self) -> &'static [DeviceRole] {
        PLOGIC_ROLES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: PLogicConfig = config.clone().try_into()?;
        check_address(cfg.address)?;
        match cfg.axes.as_slice() {
            [axis] => check_axis(*axis),
            other => Err(anyhow!(
                "PLogic '{}' needs exactly one axis letter, got {}",
                cfg.id,
                other.len()
            )),
        }
    }

    fn build(
        &self,
        config: toml::Value,
        wire: Arc<dyn WireAdapter>,
    ) -> BoxFuture<'static, Result<Box<dyn PropertySurface>>> {
        Box::pin(async move {
            let cfg: PLogicConfig = config.try_into().context("Invalid PLogic config")?;
            let card = PLogic::initialize(&cfg, wire)
                .await
                .with_context(|| format!("Failed to initialize PLogic '{}'", cfg.id))?;
            Ok(Box::new(card) as Box<dyn PropertySurface>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiger_core::ErrorKind;
    use tiger_driver_mock::MockWire;

    async fn card(wire: Arc<MockWire>, mode: PLogicMode) -> PLogic {
        let config = PLogicConfig::new("plogic", '1', 'E').with_mode(mode);
        PLogic::initialize(&config, wire).await.unwrap()
    }

    fn wire(version: f64) -> Arc<MockWire> {
        MockWire::new()
            .with_card('1', version, "PLOGIC_24\rAxis Props: 0\r")
            .shared()
    }

    #[test]
    fn test_cells_from_build() {
        assert_eq!(cells_from_build("PLOGIC_24"), 24);
        assert_eq!(cells_from_build("PLOGIC"), PLOGIC_DEFAULT_CELLS);
    }

    #[test]
    fn test_advanced_names() {
        assert_eq!(cell_property(3, CELL_TYPE_SUFFIX), "PCell_03_CellType");
        assert_eq!(io_property(33, IO_TYPE_SUFFIX), "IOFrontpanel_1_IOType");
        assert_eq!(io_property(41, IO_SOURCE_SUFFIX), "IOBackplane_0_SourceAddress");
        assert_eq!(io_property(48, IO_TYPE_SUFFIX), "IOBackplane_7_IOType");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("diSPIM Shutter".parse::<PLogicMode>().unwrap(), PLogicMode::DispimShutter);
        assert_eq!(
            "seven_channel_ttl_shutter".parse::<PLogicMode>().unwrap(),
            PLogicMode::SevenChannelTtlShutter
        );
        assert!("eight_channel".parse::<PLogicMode>().is_err());
        assert_eq!(PLogicMode::DispimShutter.capability_modes(), vec!["dispim", "four_channel"]);
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = PLogicFactory;
        assert_eq!(factory.driver_type(), "plogic");

        let valid = toml::Value::Table(toml::toml! {
            id = "shutter"
            address = "3"
            axes = ["E"]
            mode = "four_channel_shutter"
        });
        assert!(factory.validate(&valid).is_ok());

        let two_axes = toml::Value::Table(toml::toml! {
            id = "shutter"
            address = "3"
            axes = ["E", "F"]
        });
        assert!(factory.validate(&two_axes).is_err());

        let bad_mode = toml::Value::Table(toml::toml! {
            id = "shutter"
            address = "3"
            axes = ["E"]
            mode = "ten_channel"
        });
        assert!(factory.validate(&bad_mode).is_err());
    }

    #[tokio::test]
    async fn test_cell_count_gates_upper_outputs() {
        let card = card(wire(3.30), PLogicMode::None).await;
        assert!(card.device().has_property(labels::OUTPUT_STATE_UPPER));

        let small = MockWire::new()
            .with_card('1', 3.30, "PLOGIC\rAxis Props: 0\r")
            .shared();
        let small = self::card(small, PLogicMode::None).await;
        assert!(!small.device().has_property(labels::OUTPUT_STATE_UPPER));
        assert_eq!(
            small.device().cached_text(labels::NUM_LOGIC_CELLS).as_deref(),
            Some("16")
        );
    }

    #[tokio::test]
    async fn test_edit_cell_out_of_range_sends_nothing() {
        let wire = wire(3.30);
        let mut card = card(wire.clone(), PLogicMode::None).await;
        card.device_mut()
            .set(labels::POINTER_POSITION, PropertyValue::Integer(30))
            .await
            .unwrap();
        wire.clear_log();

        card.device_mut()
            .set(labels::EDIT_CELL_CONFIG, PropertyValue::Integer(7))
            .await
            .unwrap();
        card.device_mut().state_mut().refresh_enabled = true;
        card.device_mut().get(labels::EDIT_CELL_TYPE).await.unwrap();
        assert_eq!(wire.command_count(), 0);
    }

    #[tokio::test]
    async fn test_io_type_write_subtracts_offset() {
        let wire = wire(3.30);
        let mut card = card(wire.clone(), PLogicMode::None).await;
        card.device_mut()
            .set(labels::POINTER_POSITION, PropertyValue::Integer(35))
            .await
            .unwrap();
        card.device_mut()
            .set(labels::EDIT_CELL_TYPE, labels::IO_TYPES[1].1.into())
            .await
            .unwrap();
        assert!(wire.commands().contains(&"1CCA Y=1".to_string()));

        let err = card
            .device_mut()
            .set(labels::EDIT_CELL_TYPE, labels::CELL_TYPES[5].1.into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[tokio::test]
    async fn test_negative_preset_is_ignored() {
        let wire = wire(3.30);
        let mut card = card(wire.clone(), PLogicMode::None).await;
        wire.clear_log();
        card.device_mut()
            .set(labels::SET_CARD_PRESET, labels::PRESET_NONE.into())
            .await
            .unwrap();
        assert_eq!(wire.command_count(), 0);
    }

    #[tokio::test]
    async fn test_preset_12_relabelled_on_old_firmware() {
        let old = card(wire(3.05), PLogicMode::None).await;
        let offered = old.device().descriptor(labels::SET_CARD_PRESET).unwrap().labels();
        assert!(offered.iter().any(|l| l == labels::PRESET_12_LEGACY));
        assert!(!offered.iter().any(|l| l.starts_with("15 ")));

        let new = card(wire(3.30), PLogicMode::None).await;
        let offered = new.device().descriptor(labels::SET_CARD_PRESET).unwrap().labels();
        assert!(offered.iter().any(|l| l == "12 - cell 10 = TTL1 AND cell 8"));
        assert!(!offered.iter().any(|l| l.starts_with("5 ")));
    }

    #[tokio::test]
    async fn test_shutter_toggles_cell8_presets() {
        let wire = wire(3.30);
        let mut card = card(wire.clone(), PLogicMode::FourChannelShutter).await;
        assert!(!card.is_open());

        wire.clear_log();
        card.set_open(true).await.unwrap();
        assert!(card.is_open());
        assert_eq!(wire.commands(), vec!["1CCA X=11"]);

        card.set_open(false).await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("1CCA X=10"));
    }

    #[tokio::test]
    async fn test_set_open_without_shutter_mode_is_noop() {
        let wire = wire(3.30);
        let mut card = card(wire.clone(), PLogicMode::None).await;
        wire.clear_log();
        card.set_open(true).await.unwrap();
        assert!(!card.is_open());
        assert_eq!(wire.command_count(), 0);
    }

    #[tokio::test]
    async fn test_pointer_tracks_move_when_readback_fails() {
        let wire = wire(3.30);
        let mut card = card(wire.clone(), PLogicMode::None).await;
        card.device_mut()
            .set(labels::ADVANCED_PROPERTIES, YES.into())
            .await
            .unwrap();
        card.device_mut()
            .set(labels::POINTER_POSITION, PropertyValue::Integer(7))
            .await
            .unwrap();

        wire.fail_on("W E");
        let err = card
            .device_mut()
            .set(labels::POINTER_POSITION, PropertyValue::Integer(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(card.device().state().pointer_position, 5);

        wire.clear_failures();
        wire.clear_log();
        card.device_mut()
            .set("PCell_07_Config", PropertyValue::Integer(3))
            .await
            .unwrap();
        assert_eq!(wire.commands(), vec!["M E=7", "1CCA Z=3"]);
    }

    #[tokio::test]
    async fn test_advanced_cell_types_stop_at_17() {
        let mut card = card(wire(3.51), PLogicMode::None).await;
        let edit = card.device().descriptor(labels::EDIT_CELL_TYPE).unwrap().labels();
        assert!(edit.iter().any(|l| l.starts_with("18 ")));

        card.device_mut()
            .set(labels::ADVANCED_PROPERTIES, YES.into())
            .await
            .unwrap();
        let cell = card.device().descriptor("PCell_01_CellType").unwrap().labels();
        assert!(cell.iter().any(|l| l.starts_with("17 ")));
        assert!(!cell.iter().any(|l| l.starts_with("18 ")));
    }

    #[tokio::test]
    async fn test_advanced_properties_prime_each_cell() {
        let wire = wire(3.30);
        let mut card = card(wire.clone(), PLogicMode::None).await;
        assert!(!card.device().has_property("PCell_01_CellType"));

        card.device_mut()
            .set(labels::ADVANCED_PROPERTIES, YES.into())
            .await
            .unwrap();
        assert!(card.device().has_property("PCell_24_Input4"));
        assert!(card.device().has_property("IOBackplane_7_SourceAddress"));
        assert!(wire.commands().contains(&"M E=48".to_string()));

        wire.clear_log();
        card.device_mut()
            .set("IOFrontpanel_2_IOType", labels::IO_TYPES[2].1.into())
            .await
            .unwrap();
        assert_eq!(wire.commands(), vec!["M E=34", "1CCA Y=2"]);
    }
}
