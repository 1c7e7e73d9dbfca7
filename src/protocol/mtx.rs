//! MTX comma-delimited text protocol.
//!
//! One frame per report, marker first:
//! `#MTX,<imei>,<yyyymmdd>,<hhmmss>,<lat>,<lon>,<speed>,<course>,<odometer>,
//! <d|X>,<input>,<output>,<adc1>,<adc2>`
//! Coordinates are already signed decimal degrees. The firmware expects an
//! `#ACK` after every frame and stops transmitting without it, so the reply
//! goes out before parsing and regardless of the outcome.

use anyhow::Result;
use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::date_builder::DateBuilder;
use crate::pattern::Pattern;
use crate::position::{Position, keys};
use crate::registry::DeviceRegistry;
use crate::session::Connection;

use super::{Frame, ProtocolDecoder};

static PATTERN: Lazy<Pattern> = Lazy::new(|| {
    Pattern::builder()
        .text("#MTX,")
        .number("(d+),") // IMEI
        .number("(dddd)(dd)(dd),") // date
        .number("(dd)(dd)(dd),") // time
        .number("(-?d+.d+),") // latitude
        .number("(-?d+.d+),") // longitude
        .number("(d+.?d*),") // speed
        .number("(d+),") // course
        .number("(d+.?d*),") // odometer
        .group_begin()
        .number("d+")
        .or()
        .text("X")
        .group_end(false)
        .text(",")
        .expression("([01]+),") // input
        .expression("([01]+),") // output
        .number("(d+),") // ADC1
        .number("(d+)") // ADC2
        .any()
        .build()
});

pub struct MtxDecoder {
    registry: Arc<DeviceRegistry>,
}

impl MtxDecoder {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }
}

impl ProtocolDecoder for MtxDecoder {
    fn protocol_name(&self) -> &'static str {
        "mtx"
    }

    fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn decode(&self, connection: &mut Connection, frame: &Frame) -> Result<Vec<Position>> {
        let Frame::Text(sentence) = frame else {
            return Ok(Vec::new());
        };

        // Unconditional, or the device stops reporting.
        connection.send("#ACK");

        let Some(mut parser) = PATTERN.parser(sentence.trim()) else {
            return Ok(Vec::new());
        };

        let Some(imei) = parser.next() else {
            return Ok(Vec::new());
        };
        if !self.identify(imei, connection) {
            return Ok(Vec::new());
        }
        let device_id = connection.session.device_id().unwrap_or_default();

        let mut position = Position::new(self.protocol_name(), device_id);

        position.time = DateBuilder::new()
            .date(parser.next_int()?, parser.next_int()? as u32, parser.next_int()? as u32)
            .time(
                parser.next_int()? as u32,
                parser.next_int()? as u32,
                parser.next_int()? as u32,
            )
            .build()?;

        position.valid = true;
        position.latitude = parser.next_double()?;
        position.longitude = parser.next_double()?;
        position.speed = parser.next_double()?;
        position.course = parser.next_double()?;

        position.set(keys::ODOMETER, parser.next_double()?);
        if let Some(input) = parser.next() {
            position.set(keys::INPUT, input);
        }
        if let Some(output) = parser.next() {
            position.set(keys::OUTPUT, output);
        }
        position.set(keys::ADC1, parser.next_int()?);
        position.set(keys::ADC2, parser.next_int()?);

        Ok(vec![position])
    }
}
