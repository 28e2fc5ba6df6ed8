/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Scripted in-memory platform. Used by the test suite and by the CLI's
//! `--transport mock` for driving the UI without a robot.

use super::{Advertisement, BlePlatform, GattCharacteristic, WriteMode};
use crate::error::RemoteError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Scripted peripheral behaviour.
#[derive(Debug, Clone, Default)]
pub struct MockPeripheral {
    pub characteristics: Vec<GattCharacteristic>,
    /// `connect` fails with this message.
    pub connect_error: Option<String>,
    /// `connect` never completes.
    pub connect_hangs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub peripheral: String,
    pub characteristic: GattCharacteristic,
    pub data: Vec<u8>,
    pub mode: WriteMode,
}

#[derive(Default)]
struct MockState {
    adapter_missing: bool,
    scan_error: Option<String>,
    batches: Vec<Vec<Advertisement>>,
    peripherals: HashMap<String, MockPeripheral>,
    write_error: Option<RemoteError>,
    discovery_error: Option<String>,
    writes: Vec<MockWrite>,
    notifiers: Vec<mpsc::UnboundedSender<Vec<u8>>>,
    scanning: bool,
    connected: Option<String>,
}

/// Clones share state, so a test can keep one while the link owns another.
#[derive(Clone, Default)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Batches published, in order, by the next scan.
    pub fn with_batches(self, batches: Vec<Vec<Advertisement>>) -> Self {
        self.state().batches = batches;
        self
    }

    pub fn with_peripheral(self, id: &str, peripheral: MockPeripheral) -> Self {
        self.state().peripherals.insert(id.to_string(), peripheral);
        self
    }

    pub fn without_adapter(self) -> Self {
        self.state().adapter_missing = true;
        self
    }

    pub fn with_scan_error(self, message: &str) -> Self {
        self.state().scan_error = Some(message.to_string());
        self
    }

    /// Every following scan start fails with `message`, `None` restores success.
    pub fn fail_scans(&self, message: Option<&str>) {
        self.state().scan_error = message.map(str::to_string);
    }

    /// Service discovery fails with `message`, `None` restores success.
    pub fn fail_discovery(&self, message: Option<&str>) {
        self.state().discovery_error = message.map(str::to_string);
    }

    /// Every following write fails with `error`, `None` restores success.
    pub fn fail_writes(&self, error: Option<RemoteError>) {
        self.state().write_error = error;
    }

    /// Deliver a notification to every subscriber.
    pub fn notify(&self, data: &[u8]) {
        self.state()
            .notifiers
            .retain(|tx| tx.send(data.to_vec()).is_ok());
    }

    /// End every notification stream, as a dropped link would.
    pub fn drop_link(&self) {
        let mut state = self.state();
        state.notifiers.clear();
        state.connected = None;
    }

    pub fn writes(&self) -> Vec<MockWrite> {
        self.state().writes.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    pub fn connected(&self) -> Option<String> {
        self.state().connected.clone()
    }
}

#[async_trait]
impl BlePlatform for MockPlatform {
    type Peripheral = String;

    async fn initialize(&self) -> Result<(), RemoteError> {
        if self.state().adapter_missing {
            return Err(RemoteError::AdapterUnavailable(
                "Adapter does not exist.".to_string(),
            ));
        }
        Ok(())
    }

    async fn start_scan(&self) -> Result<BoxStream<'static, Vec<Advertisement>>, RemoteError> {
        let mut state = self.state();
        if let Some(message) = state.scan_error.clone() {
            return Err(RemoteError::ScanFailed(message));
        }
        state.scanning = true;
        // A real radio keeps listening after the last advertisement.
        Ok(stream::iter(state.batches.clone())
            .chain(stream::pending())
            .boxed())
    }

    async fn stop_scan(&self) -> Result<(), RemoteError> {
        self.state().scanning = false;
        Ok(())
    }

    async fn find_peripheral(&self, id: &str) -> Option<String> {
        self.state()
            .peripherals
            .contains_key(id)
            .then(|| id.to_string())
    }

    async fn connect(&self, peripheral: &String) -> Result<(), RemoteError> {
        let script = self
            .state()
            .peripherals
            .get(peripheral)
            .cloned()
            .ok_or_else(|| RemoteError::ConnectFailed("Unknown peripheral".to_string()))?;
        if script.connect_hangs {
            futures::future::pending::<()>().await;
        }
        if let Some(message) = script.connect_error {
            return Err(RemoteError::ConnectFailed(message));
        }
        debug!("Mock connected to {}", peripheral);
        self.state().connected = Some(peripheral.clone());
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        peripheral: &String,
    ) -> Result<Vec<GattCharacteristic>, RemoteError> {
        let state = self.state();
        if let Some(message) = state.discovery_error.clone() {
            return Err(RemoteError::ConnectFailed(message));
        }
        Ok(state
            .peripherals
            .get(peripheral)
            .map(|p| p.characteristics.clone())
            .unwrap_or_default())
    }

    async fn write(
        &self,
        peripheral: &String,
        characteristic: &GattCharacteristic,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        if let Some(error) = state.write_error.clone() {
            return Err(error);
        }
        if state.connected.as_ref() != Some(peripheral) {
            return Err(RemoteError::Disconnected("Peripheral not connected".to_string()));
        }
        state.writes.push(MockWrite {
            peripheral: peripheral.clone(),
            characteristic: characteristic.clone(),
            data: data.to_vec(),
            mode,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        _peripheral: &String,
        _characteristic: &GattCharacteristic,
    ) -> Result<BoxStream<'static, Vec<u8>>, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().notifiers.push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn disconnect(&self, peripheral: &String) -> Result<(), RemoteError> {
        let mut state = self.state();
        if state.connected.as_ref() == Some(peripheral) {
            state.connected = None;
        }
        state.notifiers.clear();
        Ok(())
    }
}
