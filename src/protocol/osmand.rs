//! OsmAnd HTTP protocol.
//!
//! Phone clients report over plain HTTP with form-encoded key/value pairs,
//! either in the request query string or as one record per line in the body.
//! Every record is self-identifying (`id` or `deviceid`), so no session
//! state is kept. Timestamps are unix epoch values, in seconds or
//! milliseconds depending on magnitude, or a `yyyy-MM-dd HH:mm:ss` string.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::position::{Position, keys};
use crate::registry::DeviceRegistry;
use crate::session::Connection;

use super::{Frame, ProtocolDecoder};

pub struct OsmAndDecoder {
    registry: Arc<DeviceRegistry>,
}

impl OsmAndDecoder {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    fn decode_record(
        &self,
        connection: &mut Connection,
        record: &str,
    ) -> Result<Option<Position>> {
        let params: Vec<(String, String)> = url::form_urlencoded::parse(record.as_bytes())
            .into_owned()
            .collect();
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .filter(|v| !v.is_empty())
        };

        let identifier = get("id")
            .or_else(|| get("deviceid"))
            .context("record has no device identifier")?;
        if !self.identify(identifier, connection) {
            return Ok(None);
        }
        let device_id = connection.session.device_id().unwrap_or_default();

        let mut position = Position::new(self.protocol_name(), device_id);
        position.valid = true;

        position.time = match get("timestamp") {
            Some(value) => parse_timestamp(value)?,
            None => Utc::now(),
        };
        position.latitude = get("lat")
            .context("record has no latitude")?
            .parse()
            .context("bad latitude")?;
        position.longitude = get("lon")
            .context("record has no longitude")?
            .parse()
            .context("bad longitude")?;

        if let Some(speed) = get("speed") {
            position.speed = speed.parse().context("bad speed")?;
        }
        if let Some(course) = get("bearing").or_else(|| get("heading")) {
            position.course = course.parse().context("bad course")?;
        }
        if let Some(altitude) = get("altitude") {
            position.altitude = Some(altitude.parse().context("bad altitude")?);
        }
        if let Some(hdop) = get("hdop") {
            position.set(keys::HDOP, hdop.parse::<f64>().context("bad hdop")?);
        }
        if let Some(battery) = get("batt") {
            position.set(keys::BATTERY, battery.parse::<f64>().context("bad battery")?);
        }
        if let Some(accuracy) = get("vacc") {
            position.set("vacc", accuracy.parse::<f64>().context("bad vacc")?);
        }
        if let Some(accuracy) = get("hacc") {
            position.set("hacc", accuracy.parse::<f64>().context("bad hacc")?);
        }
        if let Some(description) = get("desc") {
            position.set(keys::DESCRIPTION, description);
        }

        Ok(Some(position))
    }
}

/// Epoch seconds below `i32::MAX`, epoch milliseconds above it. Clients
/// disagree on the unit and the ranges do not overlap for plausible dates.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(number) = value.parse::<i64>() {
        let parsed = if number < i64::from(i32::MAX) {
            DateTime::from_timestamp(number, 0)
        } else {
            DateTime::from_timestamp_millis(number)
        };
        return parsed.context("timestamp out of range");
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .context("unparseable timestamp")?;
    Ok(naive.and_utc())
}

impl ProtocolDecoder for OsmAndDecoder {
    fn protocol_name(&self) -> &'static str {
        "osmand"
    }

    fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn decode(&self, connection: &mut Connection, frame: &Frame) -> Result<Vec<Position>> {
        let Frame::Http(request) = frame else {
            return Ok(Vec::new());
        };

        let records: Vec<&str> = if !request.query.is_empty() {
            vec![request.query.as_str()]
        } else {
            request
                .body
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect()
        };

        let mut positions = Vec::new();
        for record in records {
            // One bad record must not sink the rest of the batch.
            match self.decode_record(connection, record) {
                Ok(Some(position)) => positions.push(position),
                Ok(None) => {}
                Err(error) => {
                    debug!(%error, "skipping malformed osmand record");
                    metrics::counter!("decoder.records.malformed", "protocol" => "osmand")
                        .increment(1);
                }
            }
        }
        Ok(positions)
    }
}
