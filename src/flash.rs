// SPDX-License-Identifier: GPL-3.0-only

//! Torch control through Linux sysfs flash LEDs
//!
//! Flash LEDs show up as `/sys/class/leds/*:flash`. Writing the
//! `brightness` file drives them in torch mode, which only needs group
//! write access (usually `feedbackd`) rather than root.

use crate::backends::camera::types::TorchMode;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LEDS_DIR: &str = "/sys/class/leds";

/// One writable flash LED
#[derive(Debug, Clone)]
pub struct TorchLed {
    path: PathBuf,
    max_brightness: u32,
    name: String,
}

impl TorchLed {
    /// LED name, e.g. `white:flash`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_brightness(&self) -> u32 {
        self.max_brightness
    }

    /// Raw brightness, clamped to the LED maximum
    pub fn set_brightness(&self, value: u32) -> io::Result<()> {
        let clamped = value.min(self.max_brightness);
        std::fs::write(self.path.join("brightness"), clamped.to_string())
    }

    /// Current raw brightness
    pub fn brightness(&self) -> io::Result<u32> {
        std::fs::read_to_string(self.path.join("brightness"))?
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Fraction of full brightness (0.0 = off, 1.0 = full)
    pub fn set_level(&self, level: f32) -> io::Result<()> {
        let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };
        self.set_brightness((level * self.max_brightness as f32).round() as u32)
    }
}

/// All flash LEDs found on the system
#[derive(Debug, Clone, Default)]
pub struct TorchBank {
    leds: Vec<TorchLed>,
    /// Set when LEDs exist but none of them is writable
    permission_error: Option<String>,
}

impl TorchBank {
    /// Scan the system LED class directory
    pub fn detect() -> Self {
        Self::detect_in(Path::new(LEDS_DIR))
    }

    /// Scan `leds_dir` for `*:flash` entries
    pub fn detect_in(leds_dir: &Path) -> Self {
        let Ok(entries) = std::fs::read_dir(leds_dir) else {
            debug!(dir = %leds_dir.display(), "No LED class directory, torch unavailable");
            return Self::default();
        };

        let mut leds = Vec::new();
        let mut unwritable = Vec::new();

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.ends_with(":flash") {
                continue;
            }

            let path = entry.path();
            let max_path = path.join("max_brightness");
            let max_brightness = match std::fs::read_to_string(&max_path) {
                Ok(s) => match s.trim().parse::<u32>() {
                    Ok(v) if v > 0 => v,
                    _ => {
                        warn!(path = %max_path.display(), "Invalid max_brightness value");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(path = %max_path.display(), error = %e, "Cannot read max_brightness");
                    continue;
                }
            };

            let brightness_path = path.join("brightness");
            match std::fs::OpenOptions::new().write(true).open(&brightness_path) {
                Ok(_) => {
                    info!(name, max_brightness, "Discovered flash LED");
                    leds.push(TorchLed {
                        path,
                        max_brightness,
                        name: name.to_string(),
                    });
                }
                Err(e) => {
                    warn!(path = %brightness_path.display(), error = %e, "Flash LED not writable");
                    unwritable.push(brightness_path);
                }
            }
        }

        leds.sort_by(|a, b| a.name.cmp(&b.name));
        let permission_error = if leds.is_empty() && !unwritable.is_empty() {
            Some(permission_hint(&unwritable))
        } else {
            None
        };
        Self {
            leds,
            permission_error,
        }
    }

    pub fn leds(&self) -> &[TorchLed] {
        &self.leds
    }

    /// At least one LED can be driven
    pub fn is_available(&self) -> bool {
        !self.leds.is_empty()
    }

    pub fn permission_error(&self) -> Option<&str> {
        self.permission_error.as_deref()
    }

    /// Drive every LED; the first failure is returned after trying all
    pub fn apply(&self, mode: TorchMode) -> Result<(), String> {
        if self.leds.is_empty() {
            return Err(self
                .permission_error
                .clone()
                .unwrap_or_else(|| "no flash LED present".to_string()));
        }
        let level = match mode {
            TorchMode::Off => 0.0,
            TorchMode::On(level) => level,
        };
        let mut first_error = None;
        for led in &self.leds {
            if let Err(e) = led.set_level(level) {
                warn!(led = led.name(), error = %e, "Failed to set torch level");
                first_error.get_or_insert_with(|| format!("{}: {}", led.name(), e));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Message telling the user how to gain write access to the LEDs
fn permission_hint(unwritable: &[PathBuf]) -> String {
    let username = std::env::var("USER").unwrap_or_else(|_| "user".to_string());
    let escalation = if Path::new("/usr/bin/doas").exists() {
        "doas"
    } else {
        "sudo"
    };
    let group = unwritable
        .first()
        .and_then(|path| {
            let gid = std::fs::metadata(path).ok()?.gid();
            let groups = std::fs::read_to_string("/etc/group").ok()?;
            groups.lines().find_map(|line| {
                let mut parts = line.split(':');
                let name = parts.next()?;
                let id = parts.nth(1)?.parse::<u32>().ok()?;
                (id == gid).then(|| name.to_string())
            })
        })
        .unwrap_or_else(|| "feedbackd".to_string());
    format!(
        "Flash LEDs detected but cannot be controlled. Run: {escalation} adduser {username} {group}, then log in again."
    )
}
