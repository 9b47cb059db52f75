//! Gaze point record and upstream frame decoding
//!
//! Upstream frames are JSON objects carrying `GazeX`/`GazeY` among other fields.
//! Subscribers receive the normalized form `{"x":..,"y":..}`.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// A single gaze coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Shape required of an upstream data frame. Extra fields are ignored.
#[derive(Deserialize)]
struct GazeFrame {
    #[serde(rename = "GazeX")]
    gaze_x: f64,
    #[serde(rename = "GazeY")]
    gaze_y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Decode an authorized upstream frame into a point.
    ///
    /// Malformed JSON and JSON without numeric `GazeX`/`GazeY` are reported
    /// separately so callers can log them apart.
    pub fn from_frame(text: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        // Derived structs also accept sequences; only objects carry named fields.
        if !value.is_object() {
            return Err(DecodeError::MissingFields);
        }

        let frame: GazeFrame =
            serde_json::from_value(value).map_err(|_| DecodeError::MissingFields)?;

        Ok(Self::new(frame.gaze_x, frame.gaze_y))
    }

    /// Serialize to the downstream wire form
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
