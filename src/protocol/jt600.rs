//! JT600 protocol, binary and text variants.
//!
//! Binary frames start with `$`: a 5 byte BCD device id, a version byte, a
//! big-endian payload length, then BCD date/time, packed-decimal coordinates
//! in degrees and ten-thousandths of minutes, a flags nibble (fix valid,
//! north, east), BCD speed, course in 2 degree steps, battery and GSM
//! levels, and a trailing checksum that is not verified. The same devices
//! also send parenthesis-framed `W01` text reports with longitude first.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::date_builder::DateBuilder;
use crate::pattern::Pattern;
use crate::position::{Position, keys};
use crate::registry::DeviceRegistry;
use crate::session::Connection;

use super::{Frame, ProtocolDecoder};

static PATTERN_W01: Lazy<Pattern> = Lazy::new(|| {
    Pattern::builder()
        .text("(")
        .number("(d+),") // device id
        .text("W01,")
        .number("(ddd)(dd.dddd),") // longitude
        .expression("([EW]),")
        .number("(dd)(dd.dddd),") // latitude
        .expression("([NS]),")
        .expression("([AV]),") // fix flag
        .number("(dd)(dd)(dd),") // date (ddmmyy)
        .number("(dd)(dd)(dd),") // time
        .number("(d+),") // speed
        .number("(d+),") // power
        .number("(d+),") // gsm signal
        .any()
        .build()
});

/// Packed decimal byte, two digits per byte.
fn bcd(byte: u8) -> u32 {
    u32::from(byte >> 4) * 10 + u32::from(byte & 0x0f)
}

/// Decimal value stored as packed digits across several bytes.
fn packed_decimal(bytes: &[u8]) -> Result<u64> {
    hex::encode(bytes)
        .parse()
        .context("malformed packed decimal field")
}

pub struct Jt600Decoder {
    registry: Arc<DeviceRegistry>,
}

impl Jt600Decoder {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    fn decode_binary(&self, connection: &mut Connection, buf: &[u8]) -> Result<Vec<Position>> {
        if buf.len() < 26 {
            return Ok(Vec::new());
        }

        let identifier = packed_decimal(&buf[1..6])?.to_string();
        if !self.identify(&identifier, connection) {
            return Ok(Vec::new());
        }
        let device_id = connection.session.device_id().unwrap_or_default();

        let mut position = Position::new(self.protocol_name(), device_id);

        position.time = DateBuilder::new()
            .date(bcd(buf[11]) as i32, bcd(buf[10]), bcd(buf[9]))
            .time(bcd(buf[12]), bcd(buf[13]), bcd(buf[14]))
            .build()?;

        // ddmm.mmmm packed into four bytes, longitude with a ninth digit
        // taken from the high nibble of the flags byte.
        let lat_raw = packed_decimal(&buf[15..19])?;
        let mut latitude = (lat_raw / 1_000_000) as f64 + (lat_raw % 1_000_000) as f64 / 600_000.0;
        let lon_raw = packed_decimal(&buf[19..23])? * 10 + u64::from(buf[23] >> 4);
        let mut longitude =
            (lon_raw / 1_000_000) as f64 + (lon_raw % 1_000_000) as f64 / 600_000.0;

        let flags = buf[23] & 0x0f;
        position.valid = flags & 0b001 != 0;
        if flags & 0b010 == 0 {
            latitude = -latitude;
        }
        if flags & 0b100 == 0 {
            longitude = -longitude;
        }
        position.latitude = latitude;
        position.longitude = longitude;

        position.speed = f64::from(bcd(buf[24]));
        position.course = f64::from(buf[25]) * 2.0;

        if buf.len() >= 28 {
            position.set(keys::POWER, bcd(buf[26]) as i32);
            position.set(keys::GSM, bcd(buf[27]) as i32);
        }

        Ok(vec![position])
    }

    fn decode_w01(&self, connection: &mut Connection, sentence: &str) -> Result<Vec<Position>> {
        let Some(mut parser) = PATTERN_W01.parser(sentence) else {
            return Ok(Vec::new());
        };

        let Some(id) = parser.next() else {
            return Ok(Vec::new());
        };
        if !self.identify(id, connection) {
            return Ok(Vec::new());
        }
        let device_id = connection.session.device_id().unwrap_or_default();

        let mut position = Position::new(self.protocol_name(), device_id);

        position.longitude = parser.next_coordinate()?;
        position.latitude = parser.next_coordinate()?;
        position.valid = parser.next() == Some("A");
        let day = parser.next_int()? as u32;
        let month = parser.next_int()? as u32;
        position.time = DateBuilder::new()
            .date(parser.next_int()?, month, day)
            .time(
                parser.next_int()? as u32,
                parser.next_int()? as u32,
                parser.next_int()? as u32,
            )
            .build()?;
        position.speed = parser.next_double()?;
        position.set(keys::POWER, parser.next_int()?);
        position.set(keys::GSM, parser.next_int()?);

        Ok(vec![position])
    }
}

impl ProtocolDecoder for Jt600Decoder {
    fn protocol_name(&self) -> &'static str {
        "jt600"
    }

    fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn decode(&self, connection: &mut Connection, frame: &Frame) -> Result<Vec<Position>> {
        match frame {
            Frame::Binary(buf) if buf.first() == Some(&b'$') => {
                self.decode_binary(connection, buf)
            }
            Frame::Binary(buf) => {
                let text = String::from_utf8_lossy(buf);
                self.decode_w01(connection, text.trim())
            }
            Frame::Text(text) => self.decode_w01(connection, text.trim()),
            Frame::Http(_) => Ok(Vec::new()),
        }
    }
}
