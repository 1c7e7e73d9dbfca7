//! Canonical position record.
//!
//! Every protocol decoder, text or binary, funnels into this one shape. A
//! `Position` can only be constructed with a resolved device id; frames that
//! fail identification never produce a record at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Attribute keys shared across decoders. Protocol-specific extras go into
/// the open attribute map under these names so downstream consumers see one
/// vocabulary.
pub mod keys {
    pub const ODOMETER: &str = "odometer";
    pub const INPUT: &str = "input";
    pub const OUTPUT: &str = "output";
    pub const ADC1: &str = "adc1";
    pub const ADC2: &str = "adc2";
    pub const BATTERY: &str = "battery";
    pub const HDOP: &str = "hdop";
    pub const EVENT: &str = "event";
    pub const GSM: &str = "gsm";
    pub const POWER: &str = "power";
    pub const SATELLITES: &str = "sat";
    pub const STATUS: &str = "status";
    pub const DESCRIPTION: &str = "description";
}

/// Typed value for protocol-specific extras. A small closed union instead of
/// free-form strings, so consumers keep type information without the decoder
/// framework having to know every vendor field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Number(value as f64)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Number(value as f64)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

/// A normalized position report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Short protocol name the frame arrived on.
    pub protocol: String,
    /// Internal device id, resolved before construction.
    pub device_id: Uuid,
    /// Fix timestamp reported by the device (UTC).
    pub time: DateTime<Utc>,
    /// The device's own GNSS fix status. An invalid fix is still a report.
    pub valid: bool,
    /// Signed decimal degrees.
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    /// Course over ground, degrees.
    pub course: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Protocol-specific extras keyed by the names in [`keys`].
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, AttributeValue>,
}

impl Position {
    pub fn new(protocol: &str, device_id: Uuid) -> Self {
        Self {
            protocol: protocol.to_string(),
            device_id,
            time: Utc::now(),
            valid: false,
            latitude: 0.0,
            longitude: 0.0,
            speed: 0.0,
            course: 0.0,
            altitude: None,
            attributes: HashMap::new(),
        }
    }

    /// Attach a protocol-specific attribute.
    pub fn set(&mut self, key: &str, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}
