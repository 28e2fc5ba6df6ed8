/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::error::RemoteError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

#[cfg(feature = "ble")]
pub mod ble;
pub mod mock;

/// One advertisement as reported by the platform, before filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Stable hardware address.
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub services: Vec<Uuid>,
}

/// A named peripheral seen in the latest scan batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredDevice {
    pub name: String,
    pub id: String,
    /// dBm
    pub signal_strength: i16,
    pub advertised_services: BTreeSet<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// A characteristic found during service discovery, with the capabilities
/// the link cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub service: Uuid,
    pub uuid: Uuid,
    /// Write with acknowledgement.
    pub write: bool,
    /// Write without acknowledgement.
    pub write_without_response: bool,
    pub notify: bool,
}

impl GattCharacteristic {
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }

    /// Mode every write on this characteristic must use.
    pub fn write_mode(&self) -> WriteMode {
        if self.write {
            WriteMode::WithResponse
        } else {
            WriteMode::WithoutResponse
        }
    }
}

/// Platform BLE capability set. One implementation per radio stack; the
/// link picks one at construction and never inspects which.
#[async_trait]
pub trait BlePlatform: Send + Sync + 'static {
    /// Platform handle of a peripheral.
    type Peripheral: Clone + Send + Sync + 'static;

    /// Check that a usable adapter exists and is powered.
    async fn initialize(&self) -> Result<(), RemoteError>;
    /// Start scanning. Every item is the full set of peripherals the platform
    /// currently knows about.
    async fn start_scan(&self) -> Result<BoxStream<'static, Vec<Advertisement>>, RemoteError>;
    async fn stop_scan(&self) -> Result<(), RemoteError>;
    /// Resolve a hardware address to a live handle.
    async fn find_peripheral(&self, id: &str) -> Option<Self::Peripheral>;
    async fn connect(&self, peripheral: &Self::Peripheral) -> Result<(), RemoteError>;
    /// Enumerate every characteristic of every service.
    async fn discover_characteristics(
        &self,
        peripheral: &Self::Peripheral,
    ) -> Result<Vec<GattCharacteristic>, RemoteError>;
    async fn write(
        &self,
        peripheral: &Self::Peripheral,
        characteristic: &GattCharacteristic,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), RemoteError>;
    /// Subscribe to notifications. The stream ends when the link drops.
    async fn subscribe(
        &self,
        peripheral: &Self::Peripheral,
        characteristic: &GattCharacteristic,
    ) -> Result<BoxStream<'static, Vec<u8>>, RemoteError>;
    async fn disconnect(&self, peripheral: &Self::Peripheral) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod test {
    use super::*;

    fn characteristic(write: bool, write_without_response: bool) -> GattCharacteristic {
        GattCharacteristic {
            service: Uuid::nil(),
            uuid: Uuid::nil(),
            write,
            write_without_response,
            notify: false,
        }
    }

    #[test]
    fn acknowledged_write_preferred_when_available() {
        assert_eq!(characteristic(true, true).write_mode(), WriteMode::WithResponse);
        assert_eq!(
            characteristic(false, true).write_mode(),
            WriteMode::WithoutResponse
        );
        assert!(!characteristic(false, false).is_writable());
    }
}
