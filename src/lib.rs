/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Core of a Bluetooth LE robot remote: link management, motion
//! throttling, command catalog and the session log.

mod codec;

pub mod catalog;
pub mod consts;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod motion;
pub mod session;
pub mod session_log;
pub mod settings;
pub mod transport;

#[macro_use]
extern crate lazy_static;
