//! V680 hash-delimited text protocol.
//!
//! Frames look like
//! `#<imei>#<user>#<fix>#<password>#<event>#<packet>#<gsm>#<lon>,<E|W>,<lat>,<N|S>,<speed>,<course>#<ddmmyy>#<hhmmss>`
//! with longitude before latitude. The IMEI block is optional: devices send
//! it on the first frame of a connection and may omit it afterwards, relying
//! on the session binding established earlier. A bare 16 character `#<imei>`
//! frame is identification only and carries no fix.

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
        .group_begin()
        .number("#(d+)#") // imei
        .expression("([^#]*)#") // user
        .group_end(false)
        .number("(d+)#") // fix flag
        .expression("([^#]+)#") // password
        .expression("([^#]+)#") // event
        .number("(d+)#") // packet number
        .expression("([^#]+)?#?") // gsm base station
        .expression("(?:[^#]+#)?") // imsi on some firmwares
        .number("(d+)?(dd.d+),") // longitude
        .expression("([EW]),")
        .number("(d+)?(dd.d+),") // latitude
        .expression("([NS]),")
        .number("(d+.d+),") // speed
        .number("(d+.?d*)?#") // course
        .number("(dd)(dd)(dd)#") // date (ddmmyy)
        .number("(dd)(dd)(dd)") // time
        .any()
        .build()
});

pub struct V680Decoder {
    registry: Arc<DeviceRegistry>,
}

impl V680Decoder {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }
}

impl ProtocolDecoder for V680Decoder {
    fn protocol_name(&self) -> &'static str {
        "v680"
    }

    fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn decode(&self, connection: &mut Connection, frame: &Frame) -> Result<Vec<Position>> {
        let Frame::Text(raw) = frame else {
            return Ok(Vec::new());
        };
        let sentence = raw.trim();

        // Identification-only frame: a lone '#' followed by a 15 digit imei.
        if sentence.len() == 16 && sentence.starts_with('#') {
            self.identify(&sentence[1..], connection);
            return Ok(Vec::new());
        }

        let Some(mut parser) = PATTERN.parser(sentence) else {
            return Ok(Vec::new());
        };

        if let Some(imei) = parser.next() {
            self.identify(imei, connection);
        }
        let Some(device_id) = connection.session.device_id() else {
            return Ok(Vec::new());
        };

        let mut position = Position::new(self.protocol_name(), device_id);

        if let Some(user) = parser.next() {
            position.set("user", user);
        }
        position.valid = parser.next_int()? > 0;
        if let Some(password) = parser.next() {
            position.set("password", password);
        }
        if let Some(event) = parser.next() {
            position.set(keys::EVENT, event);
        }
        if let Some(packet) = parser.next() {
            position.set("packet", packet);
        }
        if let Some(gsm) = parser.next() {
            position.set(keys::GSM, gsm);
        }

        position.longitude = parser.next_coordinate()?;
        position.latitude = parser.next_coordinate()?;
        position.speed = parser.next_double()?;
        if let Some(course) = parser.next() {
            position.course = course.parse().unwrap_or(0.0);
        }

        let day = parser.next_int()?;
        let month = parser.next_int()?;
        // An all-zero date means the receiver has no fix yet.
        if day == 0 && month == 0 {
            return Ok(Vec::new());
        }
        position.time = DateBuilder::new()
            .date(parser.next_int()?, month as u32, day as u32)
            .time(
                parser.next_int()? as u32,
                parser.next_int()? as u32,
                parser.next_int()? as u32,
            )
            .build()?;

        Ok(vec![position])
    }
}
