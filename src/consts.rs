/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::time::Duration;
use uuid::Uuid;

lazy_static! {
    /// Serial service advertised by the robot's radio module.
    /// Only the preferred match during discovery, see `link::select_characteristic`.
    pub static ref BLE_COMMAND_SERVICE_UUID: Uuid =
        Uuid::parse_str("4fafc201-1fb5-459e-8fcc-c5c9c331914b").unwrap();
    /// Command characteristic inside `BLE_COMMAND_SERVICE_UUID`.
    pub static ref BLE_COMMAND_CHARACTERISTIC_UUID: Uuid =
        Uuid::parse_str("beb5483e-36e1-4688-b7f5-ea07361b26a8").unwrap();
}

/// Largest value a single ATT write can carry.
pub const MAX_COMMAND_LENGTH: usize = 512;

pub const SCAN_TIMEOUT: Duration = Duration::from_secs(15);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Period of the motion flush tick.
pub const MOTION_TICK: Duration = Duration::from_millis(100);
/// A joystick sample must move further than this on some axis to be forwarded.
pub const MOTION_CHANGE_THRESHOLD: f64 = 0.05;
/// Joystick magnitude treated as "no input" on both axes.
pub const JOYSTICK_DEADZONE: f64 = 0.3;

pub const SESSION_LOG_CAPACITY: usize = 50;
