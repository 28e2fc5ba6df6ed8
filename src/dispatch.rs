/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::catalog::{CommandCatalog, CommandKey, SpeedLevel};
use crate::error::RemoteError;
use crate::link::TransportLink;
use crate::transport::BlePlatform;
use log::{debug, warn};

pub const CUSTOM_BUTTON_COUNT: usize = 3;

/// Discrete control surface actions.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Lights(bool),
    Horn(bool),
    Gripper { open: bool },
    Speed(SpeedLevel),
    /// Custom button slot, zero based.
    Custom(usize),
    /// Legacy discrete joystick screen.
    Directional { x: f64, y: f64 },
    /// Opaque passthrough.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomButtonSlot {
    pub label: String,
    pub command: String,
}

impl CustomButtonSlot {
    fn new(label: &str, command: &str) -> Self {
        Self {
            label: label.to_string(),
            command: command.to_string(),
        }
    }
}

/// User-editable buttons. Lives only as long as the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomButtons {
    slots: [CustomButtonSlot; CUSTOM_BUTTON_COUNT],
}

impl Default for CustomButtons {
    fn default() -> Self {
        Self {
            slots: [
                CustomButtonSlot::new("Start", "BYTE_START"),
                CustomButtonSlot::new("Light 1", "L1_ON"),
                CustomButtonSlot::new("Light 1 off", "L1_OFF"),
            ],
        }
    }
}

impl CustomButtons {
    pub fn get(&self, slot: usize) -> Result<&CustomButtonSlot, RemoteError> {
        self.slots.get(slot).ok_or(RemoteError::OutOfBounds)
    }

    pub fn set(&mut self, slot: usize, label: &str, command: &str) -> Result<(), RemoteError> {
        let target = self.slots.get_mut(slot).ok_or(RemoteError::OutOfBounds)?;
        *target = CustomButtonSlot::new(label, command);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CustomButtonSlot> {
        self.slots.iter()
    }
}

/// UI side toggle state. Each press flips a flag and yields the action to send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlToggles {
    pub lights_on: bool,
    pub horn_on: bool,
    pub gripper_open: bool,
    pub speed: SpeedLevel,
}

impl ControlToggles {
    pub fn toggle_lights(&mut self) -> Action {
        self.lights_on = !self.lights_on;
        Action::Lights(self.lights_on)
    }

    pub fn toggle_horn(&mut self) -> Action {
        self.horn_on = !self.horn_on;
        Action::Horn(self.horn_on)
    }

    pub fn toggle_gripper(&mut self) -> Action {
        self.gripper_open = !self.gripper_open;
        Action::Gripper {
            open: self.gripper_open,
        }
    }

    pub fn cycle_speed(&mut self) -> Action {
        self.speed = self.speed.next();
        Action::Speed(self.speed)
    }
}

/// Stateless action to command mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActionDispatcher;

impl ActionDispatcher {
    pub fn resolve(
        &self,
        action: &Action,
        catalog: &CommandCatalog,
        buttons: &CustomButtons,
    ) -> Result<String, RemoteError> {
        let key = match action {
            Action::Lights(true) => CommandKey::LightsOn,
            Action::Lights(false) => CommandKey::LightsOff,
            Action::Horn(true) => CommandKey::HornOn,
            Action::Horn(false) => CommandKey::HornOff,
            Action::Gripper { open: true } => CommandKey::GripperOpen,
            Action::Gripper { open: false } => CommandKey::GripperClose,
            Action::Speed(level) => return Ok(catalog.format_speed(*level)),
            Action::Custom(slot) => return Ok(buttons.get(*slot)?.command.clone()),
            Action::Directional { x, y } => return Ok(catalog.directional_command(*x, *y).to_string()),
            Action::Raw(command) => return Ok(command.clone()),
        };
        Ok(catalog.get(key).to_string())
    }

    /// Fire and forget. Failures are already in the session log; they are
    /// only reported back as `false` so the UI never blocks on them.
    pub async fn dispatch<P: BlePlatform>(
        &self,
        link: &mut TransportLink<P>,
        action: &Action,
        catalog: &CommandCatalog,
        buttons: &CustomButtons,
    ) -> bool {
        let command = match self.resolve(action, catalog, buttons) {
            Ok(command) => command,
            Err(e) => {
                warn!("Cannot resolve {:?}: {}", action, e);
                link.log().error(&e.to_string());
                return false;
            }
        };

        debug!("Dispatching {:?} as {:?}", action, command);
        match link.send(&command).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Dispatch of {:?} failed: {}", action, e);
                false
            }
        }
    }
}
