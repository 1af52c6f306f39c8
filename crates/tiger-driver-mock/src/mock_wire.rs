//! Scriptable in-memory Tiger controller.
//!
//! [`MockWire`] implements [`WireAdapter`] without any I/O. It records every
//! command and answers in one of three ways, checked in order:
//!
//! 1. an injected failure whose prefix matches the command,
//! 2. a scripted reply for the exact command text,
//! 3. register echo: `VERB A=v` stores `v` under `(VERB, A)` and a later
//!    `VERB A?` replies with it, formatted in the reply style the real
//!    controller uses for that verb. Unknown registers read as `0`.
//!
//! `W <axis>` reports the value last written with `M <axis>=`, so pointer
//! moves on a logic card read back as the controller would.
//!
//! Card identities are configured up front and returned by
//! [`WireAdapter::card_identity`] without touching the command log.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tiger_core::capability::{BuildInfo, FirmwareVersion};
use tiger_core::error::{TigerError, TigerResult};
use tiger_core::wire::{CardIdentity, RawResponse, WireAdapter, ACK_PREFIX};
use tracing::trace;

/// How a register query is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStyle {
    /// `:A X=5`
    AckFirst,
    /// `X=5 :A`
    AxisFirst,
    /// `:X=5 A`
    ColonAxis,
    /// `:A 5`
    ValueOnly,
}

impl ReplyStyle {
    fn format(self, axis: char, value: &str) -> String {
        match self {
            ReplyStyle::AckFirst => format!(":A {}={}", axis, value),
            ReplyStyle::AxisFirst => format!("{}={} :A", axis, value),
            ReplyStyle::ColonAxis => format!(":{}={} A", axis, value),
            ReplyStyle::ValueOnly => format!(":A {}", value),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    log: Vec<String>,
    scripted: HashMap<String, VecDeque<String>>,
    registers: HashMap<(String, char), String>,
    styles: HashMap<String, ReplyStyle>,
    failures: Vec<String>,
}

/// In-memory controller for tests and demos.
#[derive(Debug, Default)]
pub struct MockWire {
    identities: Mutex<HashMap<char, CardIdentity>>,
    state: Mutex<MockState>,
}

impl MockWire {
    /// Controller with the stock reply styles and no cards.
    pub fn new() -> Self {
        let wire = Self::default();
        {
            let mut state = wire.state.lock();
            for verb in ["B", "E", "AC", "WT"] {
                state.styles.insert(verb.to_string(), ReplyStyle::ColonAxis);
            }
            for verb in ["PM", "WRDAC"] {
                state.styles.insert(verb.to_string(), ReplyStyle::AxisFirst);
            }
            for verb in ["RA", "LK", "SN", "MC"] {
                state.styles.insert(verb.to_string(), ReplyStyle::ValueOnly);
            }
        }
        wire
    }

    /// Register a card at `address` with firmware `version` and a raw
    /// CR-delimited build dump.
    pub fn with_card(self, address: char, version: f64, build: &str) -> Self {
        self.identities.lock().insert(
            address,
            CardIdentity {
                version: FirmwareVersion::new(version),
                build: BuildInfo::parse(build),
            },
        );
        self
    }

    /// Wrap in an `Arc` for sharing with devices.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Always answer `command` with `reply`.
    pub fn script(&self, command: &str, reply: &str) {
        let mut state = self.state.lock();
        let queue = state.scripted.entry(command.to_string()).or_default();
        queue.clear();
        queue.push_back(reply.to_string());
    }

    /// Queue `reply` for `command`; queued replies are used in order and the
    /// last one sticks.
    pub fn script_next(&self, command: &str, reply: &str) {
        self.state
            .lock()
            .scripted
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Override the reply style of `verb` (address prefix excluded).
    pub fn reply_style(&self, verb: &str, style: ReplyStyle) {
        self.state.lock().styles.insert(verb.to_string(), style);
    }

    /// Preset a register as if `verb axis=value` had been sent. `verb`
    /// includes any card address prefix, e.g. `"2CCA"`.
    pub fn set_register(&self, verb: &str, axis: char, value: &str) {
        self.state
            .lock()
            .registers
            .insert((verb.to_string(), axis), value.to_string());
    }

    /// Current register value.
    pub fn register(&self, verb: &str, axis: char) -> Option<String> {
        self.state
            .lock()
            .registers
            .get(&(verb.to_string(), axis))
            .cloned()
    }

    /// Fail every command starting with `prefix` with a transport error.
    pub fn fail_on(&self, prefix: &str) {
        self.state.lock().failures.push(prefix.to_string());
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Number of commands received so far.
    pub fn command_count(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Most recent command.
    pub fn last_command(&self) -> Option<String> {
        self.state.lock().log.last().cloned()
    }

    /// Forget the command log.
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    fn echo(state: &mut MockState, command: &str) -> String {
        let mut tokens = command.split_whitespace();
        let Some(verb) = tokens.next() else {
            return ACK_PREFIX.to_string();
        };
        let bare_verb = verb.trim_start_matches(|c: char| c.is_ascii_digit());

        if bare_verb == "W" {
            let axis = tokens.next().and_then(|t| t.chars().next()).unwrap_or('X');
            let value = state
                .registers
                .get(&("M".to_string(), axis))
                .cloned()
                .unwrap_or_else(|| "0".to_string());
            return format!("{} {}", ACK_PREFIX, value);
        }

        let style = state
            .styles
            .get(bare_verb)
            .copied()
            .unwrap_or(ReplyStyle::AckFirst);
        let mut reply = None;
        for token in tokens {
            if let Some(axis) = token.strip_suffix('?').and_then(|a| a.chars().next()) {
                let value = state
                    .registers
                    .get(&(verb.to_string(), axis))
                    .cloned()
                    .unwrap_or_else(|| "0".to_string());
                reply.get_or_insert_with(|| style.format(axis, &value));
            } else if let Some((axis, value)) = token.split_once('=') {
                if let Some(axis) = axis.chars().next() {
                    state
                        .registers
                        .insert((verb.to_string(), axis), value.to_string());
                }
            }
        }
        reply.unwrap_or_else(|| ACK_PREFIX.to_string())
    }
}

#[async_trait]
impl WireAdapter for MockWire {
    async fn send(&self, command: &str) -> TigerResult<RawResponse> {
        let mut state = self.state.lock();
        state.log.push(command.to_string());

        if state.failures.iter().any(|p| command.starts_with(p.as_str())) {
            return Err(TigerError::Transport(format!(
                "injected failure for '{}'",
                command
            )));
        }

        let scripted = state.scripted.get_mut(command).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        let reply = match scripted {
            Some(reply) => reply,
            None => Self::echo(&mut state, command),
        };
        trace!(command, reply = %reply, "mock tiger");
        Ok(RawResponse::new(reply))
    }

    async fn card_identity(&self, address: char) -> TigerResult<CardIdentity> {
        self.identities
            .lock()
            .get(&address)
            .cloned()
            .ok_or_else(|| TigerError::Transport(format!("no card at address '{}'", address)))
    }
}
