//! Declarative query/command bindings.
//!
//! Most Tiger properties are "send a query, check the prefix, parse one
//! field, convert" on read and "format a command with the converted value"
//! on write. [`WireBinding`] captures that shape so device code only states
//! the strings and the [`Codec`].
//!
//! Command templates substitute every `{}` with the encoded value, so a
//! write to both axes of a stage is simply `"KP X={} Y={}"`.

use crate::dispatch::{Device, PropertyHandler, WriteOutcome};
use crate::error::{TigerError, TigerResult};
use crate::property::{PropertyDescriptor, PropertyValue};
use crate::wire::{format_number, Marker, ACK_PREFIX};
use async_trait::async_trait;

/// Conversion between wire numbers and host values.
#[derive(Debug, Clone, PartialEq)]
pub enum Codec {
    /// Integer on both sides
    Integer,
    /// Host value = wire value × `scale`
    Float {
        /// Wire to host factor
        scale: f64,
    },
    /// Host integer = round(wire value × `scale`); written as host / `scale`
    RoundedInteger {
        /// Wire to host factor
        scale: f64,
    },
    /// Wire code ↔ enumeration label through the allowed set. When
    /// `lenient`, codes without a label leave the cache unchanged instead of
    /// failing the read.
    Labels {
        /// Tolerate unlabelled codes
        lenient: bool,
    },
    /// Non-zero wire value ↔ `on` label, zero ↔ `off` label
    Flag {
        /// Label for non-zero
        on: String,
        /// Label for zero
        off: String,
    },
}

impl Codec {
    /// Strict label codec.
    pub fn labels() -> Self {
        Codec::Labels { lenient: false }
    }

    /// Float codec with no scaling.
    pub fn float() -> Self {
        Codec::Float { scale: 1.0 }
    }

    /// Float codec, host unit = wire unit × `scale`.
    pub fn scaled(scale: f64) -> Self {
        Codec::Float { scale }
    }

    fn decode(&self, descriptor: &PropertyDescriptor, wire: f64) -> TigerResult<Option<PropertyValue>> {
        Ok(Some(match self {
            Codec::Integer => PropertyValue::Integer(wire.round() as i64),
            Codec::Float { scale } => PropertyValue::Float(wire * scale),
            Codec::RoundedInteger { scale } => PropertyValue::Integer((wire * scale + 0.5).floor() as i64),
            Codec::Labels { lenient } => {
                let code = wire.round() as i64;
                match descriptor.label_of(code) {
                    Ok(label) => PropertyValue::Text(label),
                    Err(_) if *lenient => return Ok(None),
                    Err(e) => return Err(e),
                }
            }
            Codec::Flag { on, off } => {
                PropertyValue::Text(if wire != 0.0 { on.clone() } else { off.clone() })
            }
        }))
    }

    fn encode(&self, descriptor: &PropertyDescriptor, value: &PropertyValue) -> TigerResult<String> {
        let number = |v: &PropertyValue| {
            v.as_f64()
                .ok_or_else(|| TigerError::invalid_value(&descriptor.name, v, "expected a number"))
        };
        Ok(match self {
            Codec::Integer => format_number(number(value)?.round()),
            Codec::Float { scale } => format_number(number(value)? / scale),
            Codec::RoundedInteger { scale } => format_number(number(value)? / scale),
            Codec::Labels { .. } => {
                let label = value.to_string();
                descriptor.code_of(&label)?.to_string()
            }
            Codec::Flag { on, .. } => {
                if value.to_string() == *on {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            }
        })
    }
}

/// Generic handler: one query for reads, one command template for writes.
#[derive(Debug, Clone)]
pub struct WireBinding {
    query: Option<String>,
    reply_prefix: String,
    marker: Marker,
    command: Option<String>,
    command_prefix: String,
    codec: Codec,
    reread_after_write: bool,
}

impl WireBinding {
    /// Read by sending `query` and requiring `reply_prefix`; the field is
    /// taken after `=` unless [`at`](WireBinding::at) says otherwise.
    pub fn query(query: impl Into<String>, reply_prefix: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            reply_prefix: reply_prefix.into(),
            marker: Marker::AfterEquals,
            command: None,
            command_prefix: ACK_PREFIX.to_string(),
            codec: Codec::Integer,
            reread_after_write: false,
        }
    }

    /// Write-only binding.
    pub fn command_only(template: impl Into<String>) -> Self {
        Self {
            query: None,
            reply_prefix: String::new(),
            marker: Marker::AfterEquals,
            command: Some(template.into()),
            command_prefix: ACK_PREFIX.to_string(),
            codec: Codec::Integer,
            reread_after_write: false,
        }
    }

    /// Field marker for reads.
    pub fn at(mut self, marker: Marker) -> Self {
        self.marker = marker;
        self
    }

    /// Command template for writes.
    pub fn command(mut self, template: impl Into<String>) -> Self {
        self.command = Some(template.into());
        self
    }

    /// Prefix the write reply must start with (default `:A`).
    pub fn command_reply(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    /// Value conversion.
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// After a write, re-read the property from the controller.
    pub fn reread_after_write(mut self) -> Self {
        self.reread_after_write = true;
        self
    }
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for WireBinding {
    async fn read(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let Some(query) = &self.query else {
            return Ok(None);
        };
        let reply = device
            .wire()
            .send_and_verify(query, &self.reply_prefix)
            .await?;
        let wire = reply.number(self.marker)?;
        self.codec.decode(descriptor, wire)
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let Some(template) = &self.command else {
            return Err(TigerError::Unsupported(format!(
                "'{}' has no write command",
                descriptor.name
            )));
        };
        let encoded = self.codec.encode(descriptor, value)?;
        let command = template.replace("{}", &encoded);
        device
            .wire()
            .send_and_verify(&command, &self.command_prefix)
            .await?;
        if self.reread_after_write {
            let resolved = device.reread(&descriptor.name).await?;
            return Ok(WriteOutcome::Resolved(resolved));
        }
        Ok(WriteOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{AllowedValueSet, PropertyKind};

    fn maintain() -> PropertyDescriptor {
        let mut allowed = AllowedValueSet::new();
        allowed.push("0 - default", 0);
        allowed.push("3 - overshoot", 3);
        let mut desc =
            PropertyDescriptor::new("MaintainState", PropertyKind::Enumeration, "0 - default".into());
        desc.allowed = Some(allowed);
        desc
    }

    #[test]
    fn label_codec_round_trip() {
        let desc = maintain();
        let codec = Codec::labels();
        assert_eq!(
            codec.decode(&desc, 3.0).unwrap(),
            Some(PropertyValue::Text("3 - overshoot".into()))
        );
        assert!(codec.decode(&desc, 2.0).is_err());
        assert_eq!(Codec::Labels { lenient: true }.decode(&desc, 2.0).unwrap(), None);
        assert_eq!(codec.encode(&desc, &"3 - overshoot".into()).unwrap(), "3");
    }

    #[test]
    fn scaled_codecs() {
        let desc = PropertyDescriptor::new("Backlash", PropertyKind::Float, 0.0.into());
        let um = Codec::scaled(1000.0);
        assert_eq!(um.decode(&desc, 0.04).unwrap(), Some(PropertyValue::Float(40.0)));
        assert_eq!(um.encode(&desc, &PropertyValue::Float(40.0)).unwrap(), "0.04");

        let overshoot = Codec::RoundedInteger { scale: 1000.0 };
        assert_eq!(
            overshoot.decode(&desc, 0.0127).unwrap(),
            Some(PropertyValue::Integer(13))
        );
        assert_eq!(overshoot.encode(&desc, &PropertyValue::Integer(25)).unwrap(), "0.025");
    }

    #[test]
    fn flag_codec() {
        let desc = PropertyDescriptor::new("Running", PropertyKind::Enumeration, "No".into());
        let flag = Codec::Flag {
            on: "Yes".into(),
            off: "No".into(),
        };
        assert_eq!(flag.decode(&desc, 5.0).unwrap(), Some("Yes".into()));
        assert_eq!(flag.encode(&desc, &"No".into()).unwrap(), "0");
    }
}
