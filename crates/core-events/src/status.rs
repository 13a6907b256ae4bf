//! Station status payload.
//!
//! The event log carries station state as a single text field of the form
//! `<COLOR>|<label>|<delayed>`. Rather than scatter string formatting over
//! the engine, the variants live in one struct with one serializer; the
//! visualization contract is pinned by the tests below.

use std::fmt;

/// Display color for a station lane: idle, outbound work, inbound work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColor {
    White,
    Blue,
    Green,
}

impl StatusColor {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusColor::White => "WHITE",
            StatusColor::Blue => "BLUE",
            StatusColor::Green => "GREEN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationStatus {
    pub color: StatusColor,
    pub label: String,
    pub delayed: bool,
}

impl StationStatus {
    pub fn idle() -> Self {
        Self {
            color: StatusColor::White,
            label: "IDLE".to_string(),
            delayed: false,
        }
    }

    pub fn working(inbound: bool, label: impl Into<String>, delayed: bool) -> Self {
        Self {
            color: if inbound {
                StatusColor::Green
            } else {
                StatusColor::Blue
            },
            label: label.into(),
            delayed,
        }
    }
}

impl fmt::Display for StationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.color.as_str(),
            self.label,
            if self.delayed { "Y" } else { "N" }
        )
    }
}
