/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("Scan failed: {0}")]
    ScanFailed(String),
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    #[error("No writable characteristic on the connected device.")]
    NoWritableCharacteristic,
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("Link lost: {0}")]
    Disconnected(String),
    #[error("Not connected to any device.")]
    NotConnected,
    #[error("Data too large to send: {0}")]
    DataTooLarge(usize),
    #[error("Invalid command catalog: {0}")]
    InvalidCatalog(String),
    #[error("Settings storage failure: {0}")]
    Storage(String),
    #[error("Failed to do I/O: {0}")]
    IOFailure(String),
    #[error("Index out of bounds.")]
    OutOfBounds,
}

impl From<std::io::Error> for RemoteError {
    fn from(e: std::io::Error) -> Self {
        RemoteError::IOFailure(e.to_string())
    }
}

impl RemoteError {
    /// Errors after which the live link can no longer be trusted.
    pub fn is_link_loss(&self) -> bool {
        matches!(
            self,
            RemoteError::WriteFailed(_) | RemoteError::Disconnected(_)
        )
    }
}
