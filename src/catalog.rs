/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! User-configurable table of command strings.

use crate::consts::JOYSTICK_DEADZONE;
use crate::error::RemoteError;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Placeholder substituted by [`CommandCatalog::format_speed`].
pub const SPEED_PLACEHOLDER: &str = "{level}";

/// Logical actions the catalog maps to command strings.
/// Declaration order is the catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandKey {
    JoystickForward,
    JoystickBackward,
    JoystickLeft,
    JoystickRight,
    JoystickStop,
    LightsOn,
    LightsOff,
    HornOn,
    HornOff,
    SpeedTemplate,
    GripperOpen,
    GripperClose,
}

impl CommandKey {
    pub const ALL: [CommandKey; 12] = [
        CommandKey::JoystickForward,
        CommandKey::JoystickBackward,
        CommandKey::JoystickLeft,
        CommandKey::JoystickRight,
        CommandKey::JoystickStop,
        CommandKey::LightsOn,
        CommandKey::LightsOff,
        CommandKey::HornOn,
        CommandKey::HornOff,
        CommandKey::SpeedTemplate,
        CommandKey::GripperOpen,
        CommandKey::GripperClose,
    ];

    /// Key under which the value is persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKey::JoystickForward => "joystickForward",
            CommandKey::JoystickBackward => "joystickBackward",
            CommandKey::JoystickLeft => "joystickLeft",
            CommandKey::JoystickRight => "joystickRight",
            CommandKey::JoystickStop => "joystickStop",
            CommandKey::LightsOn => "lightsOn",
            CommandKey::LightsOff => "lightsOff",
            CommandKey::HornOn => "hornOn",
            CommandKey::HornOff => "hornOff",
            CommandKey::SpeedTemplate => "speedTemplate",
            CommandKey::GripperOpen => "gripperOpen",
            CommandKey::GripperClose => "gripperClose",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            CommandKey::JoystickForward => "F",
            CommandKey::JoystickBackward => "B",
            CommandKey::JoystickLeft => "L",
            CommandKey::JoystickRight => "R",
            CommandKey::JoystickStop => "S",
            CommandKey::LightsOn => "L1_ON",
            CommandKey::LightsOff => "L1_OFF",
            CommandKey::HornOn => "H_ON",
            CommandKey::HornOff => "H_OFF",
            CommandKey::SpeedTemplate => "SPEED_{level}",
            CommandKey::GripperOpen => "G_OPEN",
            CommandKey::GripperClose => "G_CLOSE",
        }
    }

    /// Check a candidate value for this key.
    pub fn validate(&self, value: &str) -> Result<(), RemoteError> {
        if value.is_empty() {
            return Err(RemoteError::InvalidCatalog(format!(
                "{} must not be empty",
                self.as_str()
            )));
        }
        if *self == CommandKey::SpeedTemplate && !value.contains(SPEED_PLACEHOLDER) {
            return Err(RemoteError::InvalidCatalog(format!(
                "{} must contain {}",
                self.as_str(),
                SPEED_PLACEHOLDER
            )));
        }
        Ok(())
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKey {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKey::ALL
            .iter()
            .find(|key| key.as_str() == s)
            .copied()
            .ok_or_else(|| RemoteError::InvalidCatalog(format!("unknown key {}", s)))
    }
}

/// Robot speed selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedLevel {
    #[default]
    Slow = 1,
    Normal = 2,
    Fast = 3,
}

impl SpeedLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Cycles 1 -> 2 -> 3 -> 1.
    pub fn next(self) -> Self {
        match self {
            SpeedLevel::Slow => SpeedLevel::Normal,
            SpeedLevel::Normal => SpeedLevel::Fast,
            SpeedLevel::Fast => SpeedLevel::Slow,
        }
    }
}

impl TryFrom<u8> for SpeedLevel {
    type Error = RemoteError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            1 => Ok(SpeedLevel::Slow),
            2 => Ok(SpeedLevel::Normal),
            3 => Ok(SpeedLevel::Fast),
            _ => Err(RemoteError::OutOfBounds),
        }
    }
}

/// Every key of [`CommandKey::ALL`] is always present and valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCatalog {
    entries: BTreeMap<CommandKey, String>,
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self {
            entries: CommandKey::ALL
                .iter()
                .map(|key| (*key, key.default_value().to_string()))
                .collect(),
        }
    }
}

impl CommandCatalog {
    /// Build a catalog from persisted pairs. Missing, unknown or invalid
    /// entries fall back to the compiled defaults.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut catalog = Self::default();
        for (name, value) in pairs {
            let key = match name.parse::<CommandKey>() {
                Ok(key) => key,
                Err(_) => {
                    debug!("Ignoring unknown catalog key {}", name);
                    continue;
                }
            };
            if let Err(e) = catalog.set(key, value) {
                warn!("Persisted value rejected, using default: {}", e);
            }
        }
        catalog
    }

    pub fn to_pairs(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str().to_string(), value.clone()))
            .collect()
    }

    pub fn get(&self, key: CommandKey) -> &str {
        self.entries
            .get(&key)
            .map(String::as_str)
            .unwrap_or_else(|| key.default_value())
    }

    pub fn set(&mut self, key: CommandKey, value: &str) -> Result<(), RemoteError> {
        key.validate(value)?;
        self.entries.insert(key, value.to_string());
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (CommandKey, &str)> {
        self.entries.iter().map(|(key, value)| (*key, value.as_str()))
    }

    pub fn validate(&self) -> Result<(), RemoteError> {
        CommandKey::ALL
            .iter()
            .try_for_each(|key| key.validate(self.get(*key)))
    }

    pub fn format_speed(&self, level: SpeedLevel) -> String {
        self.get(CommandKey::SpeedTemplate)
            .replace(SPEED_PLACEHOLDER, &level.as_u8().to_string())
    }

    /// Discrete joystick classifier: the dominant axis wins, ties go to the
    /// vertical axis, and both axes inside the deadzone mean stop.
    /// Screen coordinates, so negative `y` is forward.
    pub fn directional_command(&self, x: f64, y: f64) -> &str {
        let key = classify_direction(x, y);
        self.get(key)
    }
}

pub(crate) fn classify_direction(x: f64, y: f64) -> CommandKey {
    if !x.is_finite() || !y.is_finite() {
        return CommandKey::JoystickStop;
    }
    if x.abs() <= JOYSTICK_DEADZONE && y.abs() <= JOYSTICK_DEADZONE {
        return CommandKey::JoystickStop;
    }

    if y.abs() >= x.abs() {
        if y < 0.0 {
            CommandKey::JoystickForward
        } else {
            CommandKey::JoystickBackward
        }
    } else if x < 0.0 {
        CommandKey::JoystickLeft
    } else {
        CommandKey::JoystickRight
    }
}
