//! Property names and enumeration labels shared by the ASI Tiger devices.
//!
//! Labels carrying a wire code start with that code (`"14 - diSPIM TTL"`)
//! so the host list reads in firmware order.

// =============================================================================
// Common
// =============================================================================

/// `No` label of Yes/No properties.
pub const NO: &str = "No";
/// `Yes` label of Yes/No properties.
pub const YES: &str = "Yes";

/// Idle label of "do it" actions.
pub const IDLE: &str = "not triggered";
/// Trigger label of "do it" actions.
pub const DO_IT: &str = "do it";
/// Label an action settles on after running.
pub const DONE: &str = "done";

/// Read-only description of the device.
pub const DESCRIPTION: &str = "Description";
/// Read-only firmware version of the card.
pub const FIRMWARE_VERSION: &str = "FirmwareVersion";
/// Read-only build name of the card.
pub const FIRMWARE_BUILD: &str = "FirmwareBuild";
/// Refresh toggle.
pub const REFRESH_PROPERTY_VALUES: &str = "RefreshPropertyValues";
/// Save settings to controller NVRAM.
pub const SAVE_CARD_SETTINGS: &str = "SaveCardSettings";

/// `SS X`.
pub const SAVE_SETTINGS_X: &str = "save settings (X)";
/// `SS X` as well; Y shares X's slot.
pub const SAVE_SETTINGS_Y: &str = "save settings (Y)";
/// `SS Z`.
pub const SAVE_SETTINGS_Z: &str = "save settings (Z)";
/// `SS Z` after assigning the joystick to nothing.
pub const SAVE_SETTINGS_Z_JOYSTICK: &str = "save settings (Z + joystick)";
/// Idle label.
pub const SAVE_SETTINGS_NONE: &str = "no action";
/// Label after a successful save.
pub const SAVE_SETTINGS_DONE: &str = "save settings done";

/// Name of a per-axis property, e.g. `Backlash(um)-X`.
pub fn axis_property(base: &str, axis: char) -> String {
    format!("{}-{}", base, axis)
}

// =============================================================================
// PLogic
// =============================================================================

/// Pre-init mode selector.
pub const PLOGIC_MODE: &str = "PLogicMode";
/// Read-only cell count.
pub const NUM_LOGIC_CELLS: &str = "NumLogicCells";
/// Pointer to the cell or IO being edited.
pub const POINTER_POSITION: &str = "PointerPosition";
/// Outputs of cells 1-16.
pub const OUTPUT_STATE: &str = "PLogicOutputState";
/// Outputs of cells 17-32.
pub const OUTPUT_STATE_UPPER: &str = "PLogicOutputStateUpper";
/// Front panel BNC states.
pub const FRONTPANEL_OUTPUT_STATE: &str = "FrontpanelOutputState";
/// Backplane TTL states.
pub const BACKPLANE_OUTPUT_STATE: &str = "BackplaneOutputState";
/// Clock source of the card.
pub const TRIGGER_SOURCE: &str = "TriggerSource";
/// Card-wide preset selector.
pub const SET_CARD_PRESET: &str = "SetCardPreset";
/// Clear every cell's state.
pub const CLEAR_ALL_CELL_STATES: &str = "ClearAllCellStates";
/// Type of the cell or IO under the pointer.
pub const EDIT_CELL_TYPE: &str = "EditCellType";
/// Config of the cell or IO under the pointer.
pub const EDIT_CELL_CONFIG: &str = "EditCellConfig";
/// Inputs 1 to 4 of the cell under the pointer.
pub const EDIT_CELL_INPUTS: [&str; 4] = [
    "EditCellInput1",
    "EditCellInput2",
    "EditCellInput3",
    "EditCellInput4",
];
/// Refresh edit properties when the pointer moves.
pub const EDIT_CELL_UPDATES: &str = "EditCellUpdates";
/// Create per-cell and per-IO properties.
pub const ADVANCED_PROPERTIES: &str = "AdvancedProperties";
/// Shutter channel selector.
pub const PLOGIC_CHANNEL: &str = "PLogicChannel";

/// Mode labels, in the order offered.
pub const MODE_NONE: &str = "None";
/// Four-channel shutter triggered by backplane TTL1.
pub const MODE_DISPIM_SHUTTER: &str = "diSPIM Shutter";
/// Four-channel shutter.
pub const MODE_FOUR_CHANNEL_SHUTTER: &str = "Four-channel shutter";
/// Seven-channel shutter.
pub const MODE_SEVEN_CHANNEL_SHUTTER: &str = "Seven-channel shutter";
/// Seven-channel shutter triggered by backplane TTL1.
pub const MODE_SEVEN_CHANNEL_TTL_SHUTTER: &str = "Seven-channel TTL shutter";

/// Capability mode: triggered from backplane TTL1.
pub const CAP_DISPIM: &str = "dispim";
/// Capability mode: four-channel shutter.
pub const CAP_FOUR_CHANNEL: &str = "four_channel";
/// Capability mode: seven-channel shutter.
pub const CAP_SEVEN_CHANNEL: &str = "seven_channel";

/// Preset used when nothing has been chosen.
pub const PRESET_NONE: &str = "no preset";

/// Card preset: wire code, label, minimum firmware, required mode.
pub struct Preset {
    /// `CCA X` code
    pub code: i64,
    /// Host label
    pub label: &'static str,
    /// Minimum firmware version
    pub since: f64,
    /// Mode the preset is restricted to
    pub mode: Option<&'static str>,
}

const fn preset(code: i64, label: &'static str, since: f64) -> Preset {
    Preset {
        code,
        label,
        since,
        mode: None,
    }
}

const fn preset_in(code: i64, label: &'static str, since: f64, mode: &'static str) -> Preset {
    Preset {
        code,
        label,
        since,
        mode: Some(mode),
    }
}

/// Label of preset 12 on firmware before 3.08.
pub const PRESET_12_LEGACY: &str = "12 - cell 10 = (TTL1 AND cell 8)";
/// Firmware that renamed preset 12.
pub const PRESET_12_RENAMED_IN: f64 = 3.08;

/// Preset 10: cell 8 low (shutter closed).
pub const PRESET_CELL8_LOW: i64 = 10;
/// Preset 11: cell 8 high (shutter open).
pub const PRESET_CELL8_HIGH: i64 = 11;
/// Preset 12: cell 10 follows TTL1 and cell 8.
pub const PRESET_CELL10_TTL1_AND_CELL8: i64 = 12;
/// Preset 14: diSPIM TTL setup.
pub const PRESET_DISPIM_TTL: i64 = 14;
/// Preset 36: cell 10 follows cell 8, TTL1 ignored.
pub const PRESET_CELL10_FOLLOWS_CELL8: i64 = 36;

/// Every card preset the firmware may offer.
pub const PRESETS: &[Preset] = &[
    preset(0, "0 - cells all low", 0.0),
    preset(1, "1 - original SPIM TTL card", 0.0),
    preset(2, "2 - cell 1 low", 0.0),
    preset(3, "3 - cell 1 high", 0.0),
    preset(4, "4 - 16 logic cells, no inputs", 0.0),
    preset_in(5, "5 - BNC5 enabled", 0.0, CAP_FOUR_CHANNEL),
    preset_in(6, "6 - BNC6 enabled", 0.0, CAP_FOUR_CHANNEL),
    preset_in(7, "7 - BNC7 enabled", 0.0, CAP_FOUR_CHANNEL),
    preset_in(8, "8 - BNC8 enabled", 0.0, CAP_FOUR_CHANNEL),
    preset_in(9, "9 - BNC5-8 all disabled", 0.0, CAP_FOUR_CHANNEL),
    preset(10, "10 - cell 8 low", 0.0),
    preset(11, "11 - cell 8 high", 0.0),
    preset(12, "12 - cell 10 = TTL1 AND cell 8", 0.0),
    preset(13, "13 - BNC1-8 outputs, cells 1-8", 0.0),
    preset(14, "14 - diSPIM TTL", 0.0),
    preset(15, "15 - mod2 on BNC5-8", 3.06),
    preset(16, "16 - BNC1-8 each toggle on TTL", 3.06),
    preset(17, "17 - counter clock = falling TTL1", 3.06),
    preset(18, "18 - counter clock = rising TTL1", 3.06),
    preset(19, "19 - counter clock = rising TTL3", 3.06),
    preset(20, "20 - cell 11 = TTL1 AND cell 8", 3.07),
    preset(21, "21 - mod3 on BNC5-7", 3.07),
    preset(22, "22 - mod3 on BNC5-7 with TTL1", 3.07),
    preset(23, "23 - mod4 on BNC5-8", 3.09),
    preset(24, "24 - mod4 on BNC5-8 with TTL1", 3.09),
    preset(25, "25 - mod2 on BNC6-7", 3.09),
    preset(26, "26 - mod2 on BNC6-7 with TTL1", 3.09),
    preset(27, "27 - BNC1 = cell 1", 3.17),
    preset(28, "28 - BNC6 and BNC7 enabled", 3.19),
    preset(29, "29 - BNC5-7 enabled", 3.19),
    preset(30, "30 - BNC5-8 enabled", 3.19),
    preset(31, "31 - BNC5-8 enabled, alternate", 3.19),
    preset(32, "32 - counter reset = cell 8", 3.19),
    preset(33, "33 - counter reset = TTL1", 3.19),
    preset(34, "34 - mod2 on BNC6-7 with TTL2", 3.23),
    preset(35, "35 - mod2 on BNC6-7 with TTL3", 3.23),
    preset(36, "36 - cell 10 = cell 8", 3.27),
    preset_in(37, "37 - BNC1 only", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(38, "38 - BNC2 only", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(39, "39 - BNC3 only", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(40, "40 - BNC4 only", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(41, "41 - BNC5 only", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(42, "42 - BNC6 only", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(43, "43 - BNC7 only", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(44, "44 - BNC2 and BNC4", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(45, "45 - BNC3 and BNC5", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(46, "46 - BNC4 and BNC6", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(47, "47 - BNC5 and BNC7", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(48, "48 - BNC1, BNC3 and BNC5", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(49, "49 - BNC2, BNC4 and BNC6", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(50, "50 - BNC1-7 all disabled", 3.29, CAP_SEVEN_CHANNEL),
    preset_in(51, "51 - BNC8 = TTL0", 3.29, CAP_SEVEN_CHANNEL),
    preset(52, "52 - BNC1-8 all low", 3.31),
    preset_in(53, "53 - BNC1 and BNC6", 3.35, CAP_SEVEN_CHANNEL),
    preset_in(54, "54 - BNC1, BNC4 and BNC6", 3.35, CAP_SEVEN_CHANNEL),
    preset_in(55, "55 - BNC1 and BNC4", 3.37, CAP_SEVEN_CHANNEL),
    preset_in(56, "56 - BNC2 and BNC5", 3.37, CAP_SEVEN_CHANNEL),
    preset_in(57, "57 - BNC3 and BNC6", 3.37, CAP_SEVEN_CHANNEL),
    preset_in(58, "58 - BNC1 and BNC5", 3.37, CAP_SEVEN_CHANNEL),
    preset_in(59, "59 - BNC2 and BNC6", 3.37, CAP_SEVEN_CHANNEL),
    preset(60, "60 - cells 17-32 reset", 3.51),
];

/// Cell types: code, label, minimum firmware.
pub const CELL_TYPES: &[(i64, &str, f64)] = &[
    (0, "0 - constant", 0.0),
    (1, "1 - D flop", 0.0),
    (2, "2 - 2-input LUT", 0.0),
    (3, "3 - 3-input LUT", 0.0),
    (4, "4 - 4-input LUT", 0.0),
    (5, "5 - 2-input AND", 0.0),
    (6, "6 - 2-input OR", 0.0),
    (7, "7 - 2-input XOR", 0.0),
    (8, "8 - one shot", 0.0),
    (9, "9 - delay", 0.0),
    (10, "10 - 4-input AND", 0.0),
    (11, "11 - 4-input OR", 0.0),
    (12, "12 - D flop (sync)", 0.0),
    (13, "13 - JK flop", 0.0),
    (14, "14 - one shot (NRT)", 0.0),
    (15, "15 - delay (NRT)", 0.0),
    (16, "16 - one shot OR2 (NRT)", 3.50),
    (17, "17 - delay OR2 (NRT)", 3.50),
    (18, "18 - D flop (sync NRT)", 3.51),
];

/// IO types as offered on the edit cell type property (code + 100).
pub const IO_TYPES: &[(i64, &str)] = &[
    (100, "0 - input"),
    (101, "1 - output (open-drain)"),
    (102, "2 - output (push-pull)"),
];

/// Offset between IO type labels and their `CCA Y` codes.
pub const IO_TYPE_OFFSET: i64 = 100;

/// Trigger sources.
pub const TRIGGER_SOURCES: &[(i64, &str)] = &[
    (0, "0 - internal 4kHz"),
    (1, "1 - Micro-mirror card"),
    (2, "2 - backplane TTL5"),
    (3, "3 - backplane TTL7"),
    (4, "4 - frontpanel BNC 1"),
];

/// Four-channel shutter "none" label.
pub const CHANNEL_NONE_4CH: &str = "none of outputs 5-8";
/// Seven-channel shutter "none" label.
pub const CHANNEL_NONE_7CH: &str = "none of outputs 1-7";

/// Four-channel shutter channels: code, label, minimum firmware.
pub const CHANNELS_4CH: &[(i64, &str, f64)] = &[
    (9, CHANNEL_NONE_4CH, 0.0),
    (5, "output 5 only", 0.0),
    (6, "output 6 only", 0.0),
    (7, "output 7 only", 0.0),
    (8, "output 8 only", 0.0),
    (28, "output 6 and 7", 3.19),
    (29, "outputs 5-7", 3.19),
    (30, "outputs 5-8", 3.19),
    (31, "outputs 5-8 alternate", 3.19),
];

/// Seven-channel shutter channels: code, label, minimum firmware.
pub const CHANNELS_7CH: &[(i64, &str, f64)] = &[
    (37, "output 1 only", 3.29),
    (38, "output 2 only", 3.29),
    (39, "output 3 only", 3.29),
    (40, "output 4 only", 3.29),
    (41, "output 5 only", 3.29),
    (42, "output 6 only", 3.29),
    (43, "output 7 only", 3.29),
    (44, "output 2 and 4", 3.29),
    (45, "output 3 and 5", 3.29),
    (46, "output 4 and 6", 3.29),
    (47, "output 5 and 7", 3.29),
    (48, "output 1 and 3 and 5", 3.29),
    (49, "output 2 and 4 and 6", 3.29),
    (50, CHANNEL_NONE_7CH, 3.29),
    (53, "output 1 and 6", 3.35),
    (54, "output 1 and 4 and 6", 3.35),
    (55, "output 1 and 4", 3.37),
    (56, "output 2 and 5", 3.37),
    (57, "output 3 and 6", 3.37),
    (58, "output 1 and 5", 3.37),
    (59, "output 2 and 6", 3.37),
];

// =============================================================================
// Stages
// =============================================================================

/// Joystick fast speed, percent.
pub const JOYSTICK_FAST_SPEED: &str = "JoystickFastSpeed";
/// Joystick slow speed, percent.
pub const JOYSTICK_SLOW_SPEED: &str = "JoystickSlowSpeed";
/// Joystick direction mirrored.
pub const JOYSTICK_REVERSE: &str = "JoystickReverse";
/// Joystick drives the XY axes.
pub const JOYSTICK_ENABLED: &str = "JoystickEnabled";
/// Joystick X/Y swapped.
pub const JOYSTICK_ROTATE: &str = "JoystickRotate";
/// Input device assigned to a single axis.
pub const JOYSTICK_INPUT: &str = "JoystickInput";
/// Wheel fast speed, percent.
pub const WHEEL_FAST_SPEED: &str = "WheelFastSpeed";
/// Wheel slow speed, percent.
pub const WHEEL_SLOW_SPEED: &str = "WheelSlowSpeed";
/// Wheel direction mirrored.
pub const WHEEL_REVERSE: &str = "WheelReverse";

/// Inputs a single axis can be assigned to.
pub const JOYSTICK_INPUTS: &[(i64, &str)] = &[
    (0, "0 - none"),
    (2, "2 - joystick X"),
    (3, "3 - joystick Y"),
    (22, "22 - right wheel"),
    (23, "23 - left wheel"),
];

/// Joystick assignment codes for `J`.
pub const JOYSTICK_CODE_X: i64 = 2;
/// Joystick Y assignment.
pub const JOYSTICK_CODE_Y: i64 = 3;
/// Added to a `J` code to park the assignment while saving settings.
pub const JOYSTICK_PARK_OFFSET: i64 = 100;

/// Motor speed, mm/s.
pub const MOTOR_SPEED: &str = "MotorSpeed(mm/s)";
/// Motor speed mirror, um/s.
pub const MOTOR_SPEED_MICRONS: &str = "MotorSpeedMicrons(um/s)";
/// Slowest speed the axis accepts, um/s.
pub const MIN_MOTOR_SPEED: &str = "MinMotorSpeed(um/s)";
/// Fastest speed the axis accepts, mm/s.
pub const MAX_MOTOR_SPEED: &str = "MaxMotorSpeed(mm/s)";
/// Backlash, um.
pub const BACKLASH: &str = "Backlash(um)";
/// Drift error, um.
pub const DRIFT_ERROR: &str = "DriftError(um)";
/// Finish error, um.
pub const FINISH_ERROR: &str = "FinishError(um)";
/// Lower software limit, mm.
pub const LOWER_LIMIT: &str = "LowerLim(mm)";
/// Upper software limit, mm.
pub const UPPER_LIMIT: &str = "UpperLim(mm)";
/// Acceleration ramp, ms.
pub const ACCELERATION: &str = "Acceleration(ms)";
/// Behaviour after a move.
pub const MAINTAIN_STATE: &str = "MaintainState";
/// Motor power.
pub const MOTOR_CONTROL: &str = "MotorOnOff";
/// Constant-velocity move, mm/s.
pub const VECTOR_MOVE: &str = "VectorMove-VE(mm/s)";
/// Axis direction relative to the unit multiplier.
pub const AXIS_POLARITY: &str = "AxisPolarity";
/// Settle time after moves, ms.
pub const WAIT_TIME: &str = "WaitTime(ms)";
/// Host step size per axis, read-only.
pub const STEP_SIZE: &str = "StepSize(um)";

/// `MA` codes.
pub const MAINTAIN_STATES: &[(i64, &str)] = &[
    (0, "0 - default"),
    (1, "1 - motors on indefinitely"),
    (2, "2 - motors on during wait time"),
    (3, "3 - overshoot and settle"),
];

/// Motor on.
pub const ON: &str = "On";
/// Motor off.
pub const OFF: &str = "Off";

/// Axis polarity matches the unit multiplier.
pub const POLARITY_NORMAL: &str = "Normal";
/// Axis polarity reversed.
pub const POLARITY_REVERSED: &str = "Reversed";

/// Enable the advanced stage properties.
pub const ADVANCED_STAGE_PROPERTIES: &str = "EnableAdvancedProperties";
/// Overshoot, um.
pub const OVERSHOOT: &str = "Overshoot(um)";
/// Servo integral gain.
pub const KI: &str = "ServoIntegral-KI";
/// Servo proportional gain.
pub const KP: &str = "ServoProportional-KP";
/// Servo derivative gain.
pub const KD: &str = "ServoIntegral-KD";
/// Servo velocity feed-forward.
pub const KV: &str = "ServoKV-KV";
/// Servo acceleration feed-forward.
pub const KA: &str = "ServoKA-KA";
/// Drive strength.
pub const DRIVE_STRENGTH: &str = "DriveStrength-AA";
/// Auto-zero of the drive.
pub const AUTO_ZERO: &str = "AutoZero-AZ";
/// Extra move repetitions, 0-3.
pub const EXTRA_MOVE_REPS: &str = "NrExtraMoveReps";

// =============================================================================
// Single-axis function generator
// =============================================================================

/// Amplitude, um.
pub const SA_AMPLITUDE: &str = "SingleAxisAmplitude(um)";
/// Offset, um.
pub const SA_OFFSET: &str = "SingleAxisOffset(um)";
/// Period, ms.
pub const SA_PERIOD: &str = "SingleAxisPeriod(ms)";
/// Mode.
pub const SA_MODE: &str = "SingleAxisMode";
/// Waveform pattern.
pub const SA_PATTERN: &str = "SingleAxisPattern";
/// Enable the advanced function generator properties.
pub const SA_ADVANCED: &str = "SingleAxisAdvancedEnable";
/// Clock source.
pub const SA_CLOCK_SOURCE: &str = "SingleAxisClockSource";
/// Clock polarity.
pub const SA_CLOCK_POLARITY: &str = "SingleAxisClockPolarity";
/// TTL output.
pub const SA_TTL_OUT: &str = "SingleAxisTTLOut";
/// TTL polarity.
pub const SA_TTL_POLARITY: &str = "SingleAxisTTLPolarity";
/// Raw pattern byte.
pub const SA_PATTERN_BYTE: &str = "SingleAxisPatternByte";

/// `SAM` codes.
pub const SA_MODES: &[(i64, &str)] = &[
    (0, "0 - Disabled"),
    (1, "1 - Enabled"),
    (2, "2 - Armed for TTL trigger"),
    (3, "3 - Enabled with axes synced"),
];

/// `SAP` waveform codes; code 3 needs newer firmware.
pub const SA_PATTERNS: &[(i64, &str, f64)] = &[
    (0, "0 - Ramp", 0.0),
    (1, "1 - Triangle", 0.0),
    (2, "2 - Square", 0.0),
    (3, "3 - Sine", 3.14),
];

/// Mask of the waveform bits of `SAP`.
pub const SA_PATTERN_MASK: i64 = 0b111;

/// Single-bit `SAP` switches: property, bit, label when clear, label when set.
pub const SA_PATTERN_BITS: &[(&str, u32, &str, &str)] = &[
    (SA_CLOCK_SOURCE, 7, "0 - internal 4kHz", "1 - external Axis"),
    (SA_CLOCK_POLARITY, 6, "0 - positive rising", "1 - negative falling"),
    (SA_TTL_OUT, 5, "0 - output disabled", "1 - output enabled"),
    (SA_TTL_POLARITY, 4, "0 - output active high", "1 - output active low"),
];

// =============================================================================
// Ring buffer and scan
// =============================================================================

/// Ring buffer mode.
pub const RB_MODE: &str = "RingBufferMode";
/// Ring buffer delay between points, ms.
pub const RB_DELAY: &str = "RingBufferDelayBetweenPoints(ms)";
/// Move to the next ring buffer point.
pub const RB_TRIGGER: &str = "RingBufferTrigger";
/// Whether the ring buffer is playing.
pub const RB_AUTOPLAY_RUNNING: &str = "RingBufferAutoplayRunning";
/// Ring buffer capacity.
pub const RB_CAPACITY: &str = "RingBufferCapacity";
/// Allow hardware sequencing through the ring buffer.
pub const USE_SEQUENCE: &str = "UseSequence";

/// `RM` mode codes.
pub const RB_MODES: &[(i64, &str)] = &[
    (1, "1 - One Point"),
    (2, "2 - Play Once"),
    (3, "3 - Repeat"),
];

/// Offset added to the mode code while the buffer plays.
pub const RB_RUNNING_FLAG: i64 = 128;

/// Scan state.
pub const SCAN_STATE: &str = "ScanState";
/// Fast scan axis.
pub const SCAN_FAST_AXIS: &str = "ScanFastAxis";
/// Slow scan axis.
pub const SCAN_SLOW_AXIS: &str = "ScanSlowAxis";
/// Raster or serpentine.
pub const SCAN_PATTERN: &str = "ScanPattern";
/// Fast axis start, mm.
pub const SCAN_FAST_START: &str = "ScanFastAxisStartPosition(mm)";
/// Fast axis stop, mm.
pub const SCAN_FAST_STOP: &str = "ScanFastAxisStopPosition(mm)";
/// Slow axis start, mm.
pub const SCAN_SLOW_START: &str = "ScanSlowAxisStartPosition(mm)";
/// Slow axis stop, mm.
pub const SCAN_SLOW_STOP: &str = "ScanSlowAxisStopPosition(mm)";
/// Number of lines.
pub const SCAN_NUM_LINES: &str = "ScanNumLines";
/// Settling time, ms.
pub const SCAN_SETTLING_TIME: &str = "ScanSettlingTime(ms)";
/// Overshoot distance, um.
pub const SCAN_OVERSHOOT: &str = "ScanOvershootDistance(um)";
/// Retrace speed, percent of the scan speed.
pub const SCAN_RETRACE_SPEED: &str = "ScanRetraceSpeedPercent";

/// Scan states as characters on the wire.
pub const SCAN_STATES: &[(char, &str)] = &[('I', "Idle"), ('K', "Running")];
/// Character written to stop a scan.
pub const SCAN_STOP: char = 'P';
/// Fast axis choices.
pub const SCAN_FAST_AXES: &[(char, &str)] = &[('0', "1st axis"), ('1', "2nd axis")];
/// Slow axis choices; `'9'` disables the slow axis.
pub const SCAN_SLOW_AXES: &[(char, &str)] =
    &[('0', "1st axis"), ('1', "2nd axis"), ('9', "Null (1D scan)")];
/// Scan patterns.
pub const SCAN_PATTERNS: &[(char, &str)] = &[('0', "Raster"), ('1', "Serpentine")];

// =============================================================================
// PMT
// =============================================================================

/// PMT gain, 0-1000.
pub const PMT_GAIN: &str = "PMTGain";
/// Samples averaged, 0-5.
pub const PMT_AVERAGE: &str = "PMTAverage";
/// Clear the overload latch.
pub const PMT_OVERLOAD_RESET: &str = "PMTOverloadReset";
/// Live signal.
pub const PMT_SIGNAL: &str = "PMTSignal";
/// Whether the PMT is overloaded.
pub const PMT_OVERLOAD: &str = "PMTOverload";
/// Label after an overload reset.
pub const OVERLOAD_RESET_DONE: &str = "overload reset done";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_codes_are_unique_and_sorted() {
        let codes: Vec<i64> = PRESETS.iter().map(|p| p.code).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(codes, sorted);
        assert_eq!(codes.len(), 61);
    }

    #[test]
    fn preset_labels_start_with_code() {
        for preset in PRESETS {
            assert!(preset.label.starts_with(&format!("{} - ", preset.code)));
        }
    }

    #[test]
    fn axis_property_names() {
        assert_eq!(axis_property(BACKLASH, 'X'), "Backlash(um)-X");
    }
}
