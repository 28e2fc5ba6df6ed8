/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Continuous joystick input to rate limited `M,<linear>,<angular>` commands.

use crate::consts::{JOYSTICK_DEADZONE, MOTION_CHANGE_THRESHOLD};

/// Command that halts the robot.
pub const STOP_COMMAND: &str = "M,0,0\n";

/// Quantized drive vector, both components in [-1, 1] with two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionVector {
    pub linear: f64,
    pub angular: f64,
}

fn quantize(value: f64) -> f64 {
    let q = (value.clamp(-1.0, 1.0) * 100.0).round() / 100.0;
    // Normalise -0.0 so it never renders as "-0.00".
    if q == 0.0 {
        0.0
    } else {
        q
    }
}

fn hundredths(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

impl MotionVector {
    pub const ZERO: MotionVector = MotionVector {
        linear: 0.0,
        angular: 0.0,
    };

    /// Screen coordinates in, robot frame out: pushing up (negative `y`)
    /// drives forward. Inside the deadzone on both axes the vector is zero.
    pub fn from_joystick(x: f64, y: f64) -> Self {
        if !x.is_finite() || !y.is_finite() {
            return Self::ZERO;
        }
        if x.abs() <= JOYSTICK_DEADZONE && y.abs() <= JOYSTICK_DEADZONE {
            return Self::ZERO;
        }
        Self {
            linear: quantize(-y),
            angular: quantize(x),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.linear == 0.0 && self.angular == 0.0
    }

    /// Compared in whole hundredths so a step of exactly the threshold is
    /// judged the same in both directions.
    fn differs_from(&self, other: &MotionVector) -> bool {
        let threshold = hundredths(MOTION_CHANGE_THRESHOLD);
        (hundredths(self.linear) - hundredths(other.linear)).abs() > threshold
            || (hundredths(self.angular) - hundredths(other.angular)).abs() > threshold
    }

    pub fn to_command(&self) -> String {
        if self.is_zero() {
            return STOP_COMMAND.to_string();
        }
        format!("M,{:.2},{:.2}\n", self.linear, self.angular)
    }
}

/// Change-gate plus trailing-edge coalescing. The owner drives `tick` on a
/// fixed period; at most one command leaves per tick.
#[derive(Debug, Default)]
pub struct MotionThrottler {
    last_forwarded: MotionVector,
    last_sent: MotionVector,
    pending: Option<MotionVector>,
}

impl MotionThrottler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw pointer sample. Returns whether it passed the change gate.
    pub fn sample(&mut self, x: f64, y: f64) -> bool {
        let vector = MotionVector::from_joystick(x, y);
        if !vector.differs_from(&self.last_forwarded) {
            return false;
        }
        self.last_forwarded = vector;
        self.pending = Some(vector);
        true
    }

    /// Flush the latest forwarded sample, if any arrived since the last tick.
    pub fn tick(&mut self) -> Option<String> {
        let vector = self.pending.take()?;
        if vector == self.last_sent {
            return None;
        }
        self.last_sent = vector;
        Some(vector.to_command())
    }

    /// Pointer lifted. Bypasses both gates: if the robot was last told to
    /// move, the stop command is returned for immediate sending.
    pub fn release(&mut self) -> Option<String> {
        self.pending = None;
        self.last_forwarded = MotionVector::ZERO;
        if self.last_sent.is_zero() {
            return None;
        }
        self.last_sent = MotionVector::ZERO;
        Some(STOP_COMMAND.to_string())
    }

    pub fn last_sent(&self) -> MotionVector {
        self.last_sent
    }

    /// Forget everything, e.g. after the link was lost.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
