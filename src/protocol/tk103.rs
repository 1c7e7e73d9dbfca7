//! TK103 parenthesis-framed text protocol.
//!
//! `(<id><type>[imei]<yymmdd><A|V><lat><N|S><lon><E|W><speed><hhmmss><course>[state][Lodometer])`
//! with a comma-delimited firmware variant carrying the same fields. The
//! message type drives the handshake: `BP00` frames are answered with
//! `(<id>AP01<suffix>)` and `BP05` login frames with `(<id>AP05)`, both
//! before and independent of parsing. Coordinates are degrees plus decimal
//! minutes with the hemisphere letter after the digits. The trailing
//! `L`-prefixed hex odometer is captured but not verified.

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
        .text("(")
        .number("(d+),?") // device id
        .expression("(?:.{4}),?") // message type
        .number("d*") // repeated IMEI on some firmwares
        .number("(dd)(dd)(dd),?") // date (yymmdd)
        .expression("([AV]),?") // fix flag
        .number("(d+)(dd.d+)") // latitude
        .expression("([NS]),?")
        .number("(d+)(dd.d+)") // longitude
        .expression("([EW]),?")
        .number("(d+.d)(?:d*,)?") // speed
        .number("(dd)(dd)(dd),?") // time
        .number("(d+.?d{1,2}),?") // course
        .group_begin()
        .expression("([01]{8}),?") // status bits
        .group_end(false)
        .group_begin()
        .text("L")
        .number("(x+)") // odometer
        .group_end(false)
        .any()
        .build()
});

pub struct Tk103Decoder {
    registry: Arc<DeviceRegistry>,
}

impl Tk103Decoder {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Handshake and login frames must be answered or the device goes
    /// silent. Replies key off the fixed-offset message type, so they go out
    /// for unparseable frames too.
    fn acknowledge(sentence: &str, connection: &Connection) {
        if !sentence.is_ascii() || sentence.len() < 17 {
            return;
        }
        let id = &sentence[1..13];
        match &sentence[13..17] {
            "BP00" if sentence.len() >= 20 => {
                let suffix = &sentence[sentence.len() - 3..];
                connection.send(format!("({id}AP01{suffix})"));
            }
            "BP05" => {
                connection.send(format!("({id}AP05)"));
            }
            _ => {}
        }
    }
}

impl ProtocolDecoder for Tk103Decoder {
    fn protocol_name(&self) -> &'static str {
        "tk103"
    }

    fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn decode(&self, connection: &mut Connection, frame: &Frame) -> Result<Vec<Position>> {
        let Frame::Text(raw) = frame else {
            return Ok(Vec::new());
        };

        // Some firmwares prepend stray newlines; the frame starts at '('.
        let trimmed = raw.trim();
        let Some(start) = trimmed.find('(') else {
            return Ok(Vec::new());
        };
        let sentence = &trimmed[start..];

        Self::acknowledge(sentence, connection);

        let Some(mut parser) = PATTERN.parser(sentence) else {
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

        let date = DateBuilder::new().date(
            parser.next_int()?,
            parser.next_int()? as u32,
            parser.next_int()? as u32,
        );

        position.valid = parser.next() == Some("A");
        position.latitude = parser.next_coordinate()?;
        position.longitude = parser.next_coordinate()?;
        position.speed = parser.next_double()?;

        position.time = date
            .time(
                parser.next_int()? as u32,
                parser.next_int()? as u32,
                parser.next_int()? as u32,
            )
            .build()?;

        position.course = parser.next_double()?;

        if let Some(status) = parser.next() {
            position.set(keys::STATUS, status);
        }
        if let Some(odometer) = parser.next() {
            position.set(keys::ODOMETER, odometer);
        }

        Ok(vec![position])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::AttributeValue;
    use crate::protocol::testing::{fixture_registry, test_connection};

    fn decode_one(decoder: &Tk103Decoder, connection: &mut Connection, frame: &str) -> Vec<Position> {
        decoder.decode(connection, &Frame::text(frame)).unwrap()
    }

    #[test]
    fn decodes_br00_report() {
        let (registry, ids) = fixture_registry(&["088048003342"]);
        let decoder = Tk103Decoder::new(registry);
        let (mut connection, _rx) = test_connection();

        let positions = decode_one(
            &decoder,
            &mut connection,
            "(088048003342BR00150917A1352.9801N10030.9050E000.0103224000.0000010000L000003F9)",
        );

        assert_eq!(positions.len(), 1);
        let position = &positions[0];
        assert_eq!(position.device_id, ids[0]);
        assert!(position.valid);
        assert_eq!(position.time.to_rfc3339(), "2015-09-17T10:32:24+00:00");
        assert!((position.latitude - (13.0 + 52.9801 / 60.0)).abs() < 1e-9);
        assert!((position.longitude - (100.0 + 30.9050 / 60.0)).abs() < 1e-9);
        assert!((position.speed - 0.0).abs() < f64::EPSILON);
        assert_eq!(
            position.attribute(keys::ODOMETER),
            Some(&AttributeValue::Text("000003F9".to_string()))
        );
    }

    #[test]
    fn southern_and_western_hemispheres_negate() {
        let (registry, _ids) = fixture_registry(&["012345678901"]);
        let decoder = Tk103Decoder::new(registry);
        let (mut connection, _rx) = test_connection();

        let positions = decode_one(
            &decoder,
            &mut connection,
            "(012345678901BR00130520A3439.9629S05826.3504W000.1175622323.8700000000L000450AC",
        );

        assert_eq!(positions.len(), 1);
        assert!((positions[0].latitude + (34.0 + 39.9629 / 60.0)).abs() < 1e-9);
        assert!((positions[0].longitude + (58.0 + 26.3504 / 60.0)).abs() < 1e-9);
    }

    #[test]
    fn invalid_fix_is_still_emitted() {
        let (registry, _ids) = fixture_registry(&["013632782450"]);
        let decoder = Tk103Decoder::new(registry);
        let (mut connection, _rx) = test_connection();

        let positions = decode_one(
            &decoder,
            &mut connection,
            "(013632782450BP05000013632782450120803V0000.0000N00000.0000E000.0174654000.0000000000L00000000",
        );

        assert_eq!(positions.len(), 1);
        assert!(!positions[0].valid);
        assert_eq!(positions[0].latitude, 0.0);
        assert_eq!(positions[0].longitude, 0.0);
    }

    #[test]
    fn login_frame_is_acknowledged() {
        let (registry, _ids) = fixture_registry(&["088048003342"]);
        let decoder = Tk103Decoder::new(registry);
        let (mut connection, rx) = test_connection();

        decode_one(
            &decoder,
            &mut connection,
            "(088048003342BP05354188048003342150917A1352.9801N10030.9050E000.0103115265.5600010000L000003F9)",
        );

        assert_eq!(rx.try_recv().unwrap(), b"(088048003342AP05)");
    }

    #[test]
    fn handshake_replies_but_emits_nothing() {
        let (registry, _ids) = fixture_registry(&["090411121854"]);
        let decoder = Tk103Decoder::new(registry);
        let (mut connection, rx) = test_connection();

        let positions = decode_one(
            &decoder,
            &mut connection,
            "(090411121854BP0000001234567890HSO",
        );

        assert!(positions.is_empty());
        assert_eq!(rx.try_recv().unwrap(), b"(090411121854AP01HSO)");
    }

    #[test]
    fn comma_delimited_variant() {
        let (registry, _ids) = fixture_registry(&["352606090042050"]);
        let decoder = Tk103Decoder::new(registry);
        let (mut connection, _rx) = test_connection();

        let positions = decode_one(
            &decoder,
            &mut connection,
            "(352606090042050,BP05,240414,A,4527.3513N,00909.9758E,4.80,112825,155.49",
        );

        assert_eq!(positions.len(), 1);
        assert!(positions[0].valid);
        assert!((positions[0].latitude - (45.0 + 27.3513 / 60.0)).abs() < 1e-9);
        assert!((positions[0].longitude - (9.0 + 9.9758 / 60.0)).abs() < 1e-9);
        assert!((positions[0].course - 155.49).abs() < 1e-9);
    }

    #[test]
    fn leading_garbage_is_stripped() {
        let (registry, _ids) = fixture_registry(&["088045133878"]);
        let decoder = Tk103Decoder::new(registry);
        let (mut connection, _rx) = test_connection();

        let positions = decode_one(
            &decoder,
            &mut connection,
            "\n\n\n(088045133878BR00130228A5124.5526N00117.7152W000.0233614352.2200000000L01B0CF1C",
        );

        assert_eq!(positions.len(), 1);
        assert!(positions[0].longitude < 0.0);
    }

    #[test]
    fn unrecognized_frame_yields_nothing() {
        let (registry, _ids) = fixture_registry(&["013632651491"]);
        let decoder = Tk103Decoder::new(registry);
        let (mut connection, _rx) = test_connection();

        let positions = decode_one(
            &decoder,
            &mut connection,
            "(013632651491,ZC20,040613,040137,6,42,112,0)",
        );
        assert!(positions.is_empty());
    }
}
