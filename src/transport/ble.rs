/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{Advertisement, BlePlatform, GattCharacteristic, WriteMode};
use crate::error::RemoteError;
use async_stream::stream;
use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use log::{debug, info, trace, warn};
use pretty_hex::*;
use tokio::sync::OnceCell;

/// Fetch adapters present in system
pub async fn get_adapter_names() -> Result<Vec<String>, RemoteError> {
    let manager = Manager::new()
        .await
        .map_err(|e| -> RemoteError { RemoteError::AdapterUnavailable(e.to_string()) })?;
    let adapters = manager
        .adapters()
        .await
        .map_err(|e| -> RemoteError { RemoteError::AdapterUnavailable(e.to_string()) })?;

    let mut ret: Vec<String> = vec![];
    for adapter in adapters.iter() {
        let info = adapter
            .adapter_info()
            .await
            .map_err(|e| -> RemoteError { RemoteError::AdapterUnavailable(e.to_string()) })?;
        ret.push(info);
    }

    Ok(ret)
}

/// btleplug backed platform, bound to one host adapter.
pub struct BTLEPlatform {
    adapter_idx: usize,
    adapter: OnceCell<Adapter>,
}

impl BTLEPlatform {
    pub fn new(adapter_idx: usize) -> Self {
        Self {
            adapter_idx,
            adapter: OnceCell::new(),
        }
    }

    fn adapter(&self) -> Result<&Adapter, RemoteError> {
        self.adapter.get().ok_or_else(|| {
            RemoteError::AdapterUnavailable("Adapter not initialized.".to_string())
        })
    }

    async fn open_adapter(&self) -> Result<Adapter, RemoteError> {
        let manager = Manager::new()
            .await
            .map_err(|e| -> RemoteError { RemoteError::AdapterUnavailable(e.to_string()) })?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| -> RemoteError { RemoteError::AdapterUnavailable(e.to_string()) })?
            .into_iter()
            .nth(self.adapter_idx)
            .ok_or_else(|| {
                RemoteError::AdapterUnavailable(format!(
                    "Adapter {} does not exist.",
                    self.adapter_idx
                ))
            })?;

        // Querying the adapter fails when the radio is off.
        let info = adapter
            .adapter_info()
            .await
            .map_err(|e| -> RemoteError { RemoteError::AdapterUnavailable(e.to_string()) })?;
        info!("Using adapter {}", info);

        Ok(adapter)
    }

    /// Platform characteristic matching one found by `discover_characteristics`.
    fn platform_characteristic(
        peripheral: &Peripheral,
        characteristic: &GattCharacteristic,
    ) -> Result<Characteristic, RemoteError> {
        peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == characteristic.service)
            .flat_map(|s| s.characteristics.into_iter())
            .find(|c| c.uuid == characteristic.uuid)
            .ok_or(RemoteError::NoWritableCharacteristic)
    }
}

/// Stable device id. CoreBluetooth hides hardware addresses and reports
/// all zeroes, so the platform identifier is used there instead.
fn device_id(address: BDAddr, platform_id: &impl std::fmt::Debug) -> String {
    if address == BDAddr::default() {
        format!("{:?}", platform_id)
    } else {
        address.to_string()
    }
}

fn peripheral_id(p: &Peripheral) -> String {
    device_id(p.address(), &p.id())
}

async fn snapshot(adapter: &Adapter) -> Result<Vec<Advertisement>, btleplug::Error> {
    let mut batch = vec![];
    for p in adapter.peripherals().await? {
        if let Some(props) = p.properties().await? {
            batch.push(Advertisement {
                id: peripheral_id(&p),
                name: props.local_name,
                rssi: props.rssi,
                services: props.services,
            });
        }
    }
    Ok(batch)
}

#[async_trait]
impl BlePlatform for BTLEPlatform {
    type Peripheral = Peripheral;

    async fn initialize(&self) -> Result<(), RemoteError> {
        self.adapter
            .get_or_try_init(|| self.open_adapter())
            .await
            .map(|_| ())
    }

    async fn start_scan(&self) -> Result<BoxStream<'static, Vec<Advertisement>>, RemoteError> {
        let adapter = self.adapter()?.clone();
        let mut events = adapter
            .events()
            .await
            .map_err(|e| -> RemoteError { RemoteError::ScanFailed(e.to_string()) })?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| -> RemoteError { RemoteError::ScanFailed(e.to_string()) })?;

        Ok(Box::pin(stream! {
            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(_) | CentralEvent::DeviceUpdated(_) => {
                        match snapshot(&adapter).await {
                            Ok(batch) => yield batch,
                            Err(e) => warn!("Failed to collect scan batch: {}", e),
                        }
                    }
                    _ => {}
                }
            }
        }))
    }

    async fn stop_scan(&self) -> Result<(), RemoteError> {
        self.adapter()?
            .stop_scan()
            .await
            .map_err(|e| -> RemoteError { RemoteError::ScanFailed(e.to_string()) })
    }

    async fn find_peripheral(&self, id: &str) -> Option<Peripheral> {
        let peripherals = self.adapter().ok()?.peripherals().await.ok()?;
        peripherals
            .into_iter()
            .find(|p| peripheral_id(p).eq_ignore_ascii_case(id))
    }

    async fn connect(&self, peripheral: &Peripheral) -> Result<(), RemoteError> {
        peripheral
            .connect()
            .await
            .map_err(|e| -> RemoteError { RemoteError::ConnectFailed(e.to_string()) })
    }

    async fn discover_characteristics(
        &self,
        peripheral: &Peripheral,
    ) -> Result<Vec<GattCharacteristic>, RemoteError> {
        peripheral
            .discover_services()
            .await
            .map_err(|e| -> RemoteError { RemoteError::ConnectFailed(e.to_string()) })?;

        let mut found = vec![];
        for service in peripheral.services() {
            for c in service.characteristics.iter() {
                debug!("Service {} characteristic {} {:?}", service.uuid, c.uuid, c.properties);
                found.push(GattCharacteristic {
                    service: service.uuid,
                    uuid: c.uuid,
                    write: c.properties.contains(CharPropFlags::WRITE),
                    write_without_response: c
                        .properties
                        .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
                    notify: c.properties.contains(CharPropFlags::NOTIFY),
                });
            }
        }
        Ok(found)
    }

    async fn write(
        &self,
        peripheral: &Peripheral,
        characteristic: &GattCharacteristic,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), RemoteError> {
        let target = Self::platform_characteristic(peripheral, characteristic)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        trace!("BTLE TX: {:?}\n", data.hex_dump());

        match peripheral.write(&target, data, write_type).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if peripheral.is_connected().await.unwrap_or(false) {
                    Err(RemoteError::WriteFailed(e.to_string()))
                } else {
                    Err(RemoteError::Disconnected(e.to_string()))
                }
            }
        }
    }

    async fn subscribe(
        &self,
        peripheral: &Peripheral,
        characteristic: &GattCharacteristic,
    ) -> Result<BoxStream<'static, Vec<u8>>, RemoteError> {
        let target = Self::platform_characteristic(peripheral, characteristic)?;
        peripheral
            .subscribe(&target)
            .await
            .map_err(|e| -> RemoteError { RemoteError::Disconnected(e.to_string()) })?;
        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| -> RemoteError { RemoteError::Disconnected(e.to_string()) })?;

        let uuid = target.uuid;
        Ok(notifications
            .filter_map(move |n| async move {
                if n.uuid == uuid {
                    trace!("BTLE RX: {:?}\n", n.value.hex_dump());
                    Some(n.value)
                } else {
                    None
                }
            })
            .boxed())
    }

    async fn disconnect(&self, peripheral: &Peripheral) -> Result<(), RemoteError> {
        peripheral
            .disconnect()
            .await
            .map_err(|e| -> RemoteError { RemoteError::Disconnected(e.to_string()) })
    }
}
