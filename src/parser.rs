//! Cursor over one pattern match.
//!
//! A [`Parser`] is created by [`crate::pattern::Pattern::parser`] and lives
//! for the duration of a single decode call. Typed accessors consume capture
//! groups strictly in declaration order; asking for more groups than the
//! grammar declares is a decoder-authoring bug and simply yields `None` /
//! an error rather than panicking.

use anyhow::{Context, Result};
use regex::Captures;

pub struct Parser<'t> {
    captures: Captures<'t>,
    position: usize,
}

impl<'t> Parser<'t> {
    pub(crate) fn new(captures: Captures<'t>) -> Self {
        // Group 0 is the whole match; real groups start at 1.
        Self {
            captures,
            position: 1,
        }
    }

    /// Whether the next group participated in the match. Optional trailing
    /// groups must be guarded with this before consumption.
    pub fn has_next(&self) -> bool {
        self.captures.get(self.position).is_some()
    }

    /// Consume the next group as text. `None` when the group is optional and
    /// did not participate in the match (the cursor still advances).
    pub fn next(&mut self) -> Option<&'t str> {
        let group = self.captures.get(self.position);
        self.position += 1;
        group.map(|m| m.as_str())
    }

    pub fn next_int(&mut self) -> Result<i32> {
        let text = self.next().context("missing numeric field")?;
        text.parse()
            .with_context(|| format!("invalid integer field {text:?}"))
    }

    /// Parse the next group as a float. The grammar guarantees `.` as the
    /// decimal separator, independent of host locale.
    pub fn next_double(&mut self) -> Result<f64> {
        let text = self.next().context("missing numeric field")?;
        text.parse()
            .with_context(|| format!("invalid decimal field {text:?}"))
    }

    /// Consume a coordinate: an optional integer-degrees group, a value
    /// group, and a hemisphere letter group. With degrees present the value
    /// is decimal minutes; without, the value is already signed decimal
    /// degrees. `S` and `W` negate the magnitude.
    pub fn next_coordinate(&mut self) -> Result<f64> {
        let degrees = self.next();
        let value = self.next_double()?;
        let coordinate = match degrees {
            Some(text) => {
                let degrees: f64 = text
                    .parse()
                    .with_context(|| format!("invalid degrees field {text:?}"))?;
                degrees + value / 60.0
            }
            None => value,
        };
        match self.next() {
            Some("S") | Some("W") => Ok(-coordinate),
            _ => Ok(coordinate),
        }
    }
}
