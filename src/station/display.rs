//! Display projection of a station's buffer.
//!
//! Charts show a trailing time window. Pausing freezes the window where it was, which
//! lets the operator inspect (and average over) a past range while the station keeps
//! polling and writing to disk. Pause never touches the acquisition loop.

use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Readings above this are sensor-open codes, not temperatures.
const DISPLAY_LIMIT: f64 = 999.0;

/// Width of the chart's time axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayWindow {
    /// Last 30 minutes
    #[default]
    #[serde(rename = "30min")]
    ThirtyMinutes,
    /// Last 3 hours
    #[serde(rename = "3hrs")]
    ThreeHours,
    /// Last 12 hours
    #[serde(rename = "12hrs")]
    TwelveHours,
    /// Last 24 hours, the whole retention horizon
    #[serde(rename = "24hrs")]
    TwentyFourHours,
}

impl DisplayWindow {
    /// Every window, narrowest first.
    pub const ALL: [DisplayWindow; 4] = [
        DisplayWindow::ThirtyMinutes,
        DisplayWindow::ThreeHours,
        DisplayWindow::TwelveHours,
        DisplayWindow::TwentyFourHours,
    ];

    /// Width of the window.
    pub fn duration(self) -> TimeDelta {
        match self {
            DisplayWindow::ThirtyMinutes => TimeDelta::minutes(30),
            DisplayWindow::ThreeHours => TimeDelta::hours(3),
            DisplayWindow::TwelveHours => TimeDelta::hours(12),
            DisplayWindow::TwentyFourHours => TimeDelta::hours(24),
        }
    }

    /// Label used in settings files and on the chart selector.
    pub fn label(self) -> &'static str {
        match self {
            DisplayWindow::ThirtyMinutes => "30min",
            DisplayWindow::ThreeHours => "3hrs",
            DisplayWindow::TwelveHours => "12hrs",
            DisplayWindow::TwentyFourHours => "24hrs",
        }
    }
}

impl fmt::Display for DisplayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DisplayWindow {
    type Err = DaqError;

    fn from_str(s: &str) -> AppResult<Self> {
        DisplayWindow::ALL
            .into_iter()
            .find(|w| w.label() == s.trim())
            .ok_or_else(|| {
                DaqError::Config(format!(
                    "Invalid display window '{}'. Must be one of: 30min, 3hrs, 12hrs, 24hrs",
                    s
                ))
            })
    }
}

/// Whether the chart follows the clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayMode {
    /// Trailing window ending now
    #[default]
    Live,
    /// Range frozen at the moment of pausing
    Paused,
}

/// Per-station chart state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayState {
    window: DisplayWindow,
    mode: DisplayMode,
    frozen: Option<(DateTime<Local>, DateTime<Local>)>,
}

impl DisplayState {
    /// Live view with the given window.
    pub fn new(window: DisplayWindow) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }

    /// Current window width.
    pub fn window(&self) -> DisplayWindow {
        self.window
    }

    /// Live or paused.
    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Change the window width. A paused view keeps its frozen range until resumed.
    pub fn set_window(&mut self, window: DisplayWindow) {
        self.window = window;
    }

    /// Flip between live and paused; pausing freezes the range visible at `now`.
    pub fn toggle_pause(&mut self, now: DateTime<Local>) -> DisplayMode {
        match self.mode {
            DisplayMode::Live => {
                self.frozen = Some(self.live_range(now));
                self.mode = DisplayMode::Paused;
            }
            DisplayMode::Paused => {
                self.frozen = None;
                self.mode = DisplayMode::Live;
            }
        }
        self.mode
    }

    /// Back to a live view.
    pub fn resume(&mut self) {
        self.frozen = None;
        self.mode = DisplayMode::Live;
    }

    /// Time range the chart should show.
    pub fn visible_range(&self, now: DateTime<Local>) -> (DateTime<Local>, DateTime<Local>) {
        match (self.mode, self.frozen) {
            (DisplayMode::Paused, Some(range)) => range,
            _ => self.live_range(now),
        }
    }

    fn live_range(&self, now: DateTime<Local>) -> (DateTime<Local>, DateTime<Local>) {
        (now - self.window.duration(), now)
    }
}

/// Text for a temperature cell: one decimal, `--` when missing or out of range.
pub fn format_temperature(value: Option<f64>) -> String {
    match value {
        Some(v) if v <= DISPLAY_LIMIT => format!("{:.1}", v),
        _ => "--".to_string(),
    }
}
