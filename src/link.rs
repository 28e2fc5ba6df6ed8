/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! BLE session lifecycle: scan, connect, characteristic selection and writes.
//!
//! Scanning (`Idle -> Scanning -> Idle`) runs independently of the connection
//! state machine (`Disconnected -> Connecting -> DiscoveringServices -> Ready
//! -> Disconnected | Lost`). At most one connection is live at a time.

use crate::codec::LineCodec;
use crate::consts::{
    BLE_COMMAND_CHARACTERISTIC_UUID, BLE_COMMAND_SERVICE_UUID, CONNECT_TIMEOUT, SCAN_TIMEOUT,
};
use crate::error::RemoteError;
use crate::session_log::SessionLog;
use crate::transport::{
    Advertisement, BlePlatform, DiscoveredDevice, GattCharacteristic, WriteMode,
};
use async_stream::stream;
use bytes::BytesMut;
use futures::stream::{BoxStream, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Reported when the platform gives no signal strength.
const RSSI_UNKNOWN: i16 = -127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    DiscoveringServices,
    Ready,
    Lost,
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Preferred service, first choice during characteristic selection.
    pub service_uuid: Uuid,
    /// Preferred characteristic inside `service_uuid`.
    pub characteristic_uuid: Uuid,
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_uuid: *BLE_COMMAND_SERVICE_UUID,
            characteristic_uuid: *BLE_COMMAND_CHARACTERISTIC_UUID,
            scan_timeout: SCAN_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

/// Pick the characteristic commands are written to, in priority order:
/// the configured service/characteristic pair, then anything accepting
/// acknowledged writes, then anything accepting unacknowledged writes.
/// The returned mode is fixed for the lifetime of the connection.
pub fn select_characteristic(
    characteristics: &[GattCharacteristic],
    service: &Uuid,
    characteristic: &Uuid,
) -> Option<(GattCharacteristic, WriteMode)> {
    characteristics
        .iter()
        .find(|c| c.service == *service && c.uuid == *characteristic && c.is_writable())
        .or_else(|| characteristics.iter().find(|c| c.write))
        .or_else(|| characteristics.iter().find(|c| c.write_without_response))
        .map(|c| (c.clone(), c.write_mode()))
}

/// Named, de-duplicated view of one advertisement batch. A later entry for
/// the same id replaces an earlier one.
fn publish_batch(batch: Vec<Advertisement>) -> Vec<DiscoveredDevice> {
    let mut devices: Vec<DiscoveredDevice> = vec![];
    let mut index: HashMap<String, usize> = HashMap::new();

    for adv in batch {
        let name = match adv.name {
            Some(name) if !name.is_empty() => name,
            _ => continue,
        };
        let device = DiscoveredDevice {
            name,
            id: adv.id,
            signal_strength: adv.rssi.unwrap_or(RSSI_UNKNOWN),
            advertised_services: adv.services.into_iter().collect(),
        };
        match index.get(&device.id) {
            Some(i) => devices[*i] = device,
            None => {
                index.insert(device.id.clone(), devices.len());
                devices.push(device);
            }
        }
    }

    devices
}

struct ActiveLink<H> {
    peripheral: H,
    selected: Option<(GattCharacteristic, WriteMode)>,
    rx_task: Option<JoinHandle<()>>,
}

pub struct TransportLink<P: BlePlatform> {
    platform: Arc<P>,
    config: LinkConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    log: SessionLog,
    active: Option<ActiveLink<P::Peripheral>>,
    shutdown: CancellationToken,
    scan_token: Option<CancellationToken>,
    codec: LineCodec,
}

impl<P: BlePlatform> TransportLink<P> {
    pub fn new(platform: P, config: LinkConfig) -> Self {
        Self::with_log(platform, config, SessionLog::default())
    }

    pub fn with_log(platform: P, config: LinkConfig, log: SessionLog) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            platform: Arc::new(platform),
            config,
            state: Arc::new(state),
            log,
            active: None,
            shutdown: CancellationToken::new(),
            scan_token: None,
            codec: LineCodec::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn write_mode(&self) -> Option<WriteMode> {
        self.active
            .as_ref()
            .and_then(|a| a.selected.as_ref())
            .map(|(_, mode)| *mode)
    }

    pub fn selected_characteristic(&self) -> Option<&GattCharacteristic> {
        self.active
            .as_ref()
            .and_then(|a| a.selected.as_ref())
            .map(|(c, _)| c)
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_token
            .as_ref()
            .map_or(false, |token| !token.is_cancelled())
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    fn report(&self, e: &RemoteError) {
        error!("{}", e);
        self.log.error(&e.to_string());
    }

    pub async fn initialize(&mut self) -> Result<(), RemoteError> {
        match self.platform.initialize().await {
            Ok(()) => {
                info!("Bluetooth adapter ready");
                Ok(())
            }
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Start a scan session. Each item of the returned stream replaces the
    /// previous device list. The stream ends on `stop_scan`, `dispose`, or
    /// after the configured scan timeout. Calling `scan` again ends the
    /// previous session and starts a fresh one. If the fresh one cannot be
    /// started, the previous session keeps running.
    pub async fn scan(&mut self) -> Result<BoxStream<'static, Vec<DiscoveredDevice>>, RemoteError> {
        let mut batches = match self.platform.start_scan().await {
            Ok(batches) => batches,
            Err(e) => {
                let e = match e {
                    RemoteError::AdapterUnavailable(_) | RemoteError::ScanFailed(_) => e,
                    other => RemoteError::ScanFailed(other.to_string()),
                };
                self.report(&e);
                return Err(e);
            }
        };
        info!("Scanning for {:?}", self.config.scan_timeout);

        // The radio now belongs to the new session.
        if let Some(previous) = self.scan_token.take() {
            previous.cancel();
        }
        let token = self.shutdown.child_token();
        self.scan_token = Some(token.clone());
        let platform = self.platform.clone();
        let timeout = self.config.scan_timeout;

        Ok(Box::pin(stream! {
            let deadline = tokio::time::sleep(timeout);
            pin_utils::pin_mut!(deadline);

            loop {
                let batch = tokio::select! {
                    _ = token.cancelled() => break,
                    _ = &mut deadline => {
                        info!("Scan timed out");
                        None
                    }
                    batch = batches.next() => batch,
                };
                match batch {
                    Some(batch) => yield publish_batch(batch),
                    None => break,
                }
            }

            // Whoever cancelled the token owns stopping the radio.
            if !token.is_cancelled() {
                token.cancel();
                if let Err(e) = platform.stop_scan().await {
                    warn!("Failed to stop scan: {}", e);
                }
            }
        }))
    }

    pub async fn stop_scan(&mut self) -> Result<(), RemoteError> {
        if let Some(token) = self.scan_token.take() {
            token.cancel();
            if let Err(e) = self.platform.stop_scan().await {
                self.report(&e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Connect to a device seen by the platform and select the command
    /// characteristic. Failures are logged once and leave the link
    /// `Disconnected`; there is no retry.
    pub async fn connect(&mut self, id: &str) -> bool {
        if self.active.is_some() {
            self.disconnect().await;
        }

        let peripheral = match self.platform.find_peripheral(id).await {
            Some(p) => p,
            None => {
                self.report(&RemoteError::ConnectFailed(format!("Unknown device {}", id)));
                return false;
            }
        };

        info!("Connecting to {}", id);
        self.set_state(ConnectionState::Connecting);
        let connected =
            match tokio::time::timeout(self.config.connect_timeout, self.platform.connect(&peripheral))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(RemoteError::ConnectFailed(format!(
                    "Timed out after {:?}",
                    self.config.connect_timeout
                ))),
            };
        if let Err(e) = connected {
            self.set_state(ConnectionState::Disconnected);
            self.report(&e);
            return false;
        }

        self.set_state(ConnectionState::DiscoveringServices);
        let characteristics = match self.platform.discover_characteristics(&peripheral).await {
            Ok(c) => c,
            Err(e) => {
                if let Err(e) = self.platform.disconnect(&peripheral).await {
                    debug!("Disconnect after failed discovery failed: {}", e);
                }
                let e = match e {
                    RemoteError::ConnectFailed(_) => e,
                    other => RemoteError::ConnectFailed(other.to_string()),
                };
                self.set_state(ConnectionState::Disconnected);
                self.report(&e);
                return false;
            }
        };

        let selected = select_characteristic(
            &characteristics,
            &self.config.service_uuid,
            &self.config.characteristic_uuid,
        );
        match &selected {
            Some((c, mode)) => info!("Commands go to {} / {} ({:?})", c.service, c.uuid, mode),
            None => {
                warn!("{} exposes no writable characteristic", id);
                self.log.error(&RemoteError::NoWritableCharacteristic.to_string());
            }
        }

        let rx_task = self
            .spawn_receiver(&peripheral, &characteristics, selected.as_ref())
            .await;
        self.active = Some(ActiveLink {
            peripheral,
            selected,
            rx_task,
        });
        self.set_state(ConnectionState::Ready);
        self.log.info(&format!("Connected to {}", id));
        true
    }

    /// Record inbound lines. The selected characteristic is preferred when
    /// it notifies, otherwise the first notifying one.
    async fn spawn_receiver(
        &self,
        peripheral: &P::Peripheral,
        characteristics: &[GattCharacteristic],
        selected: Option<&(GattCharacteristic, WriteMode)>,
    ) -> Option<JoinHandle<()>> {
        let source = selected
            .map(|(c, _)| c)
            .filter(|c| c.notify)
            .or_else(|| characteristics.iter().find(|c| c.notify))?;

        let mut notifications = match self.platform.subscribe(peripheral, source).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Notifications unavailable: {}", e);
                return None;
            }
        };

        let log = self.log.clone();
        let state = self.state.clone();
        Some(tokio::spawn(async move {
            let mut codec = LineCodec::default();
            while let Some(data) = notifications.next().await {
                let mut buf = BytesMut::from(&data[..]);
                loop {
                    match codec.decode(&mut buf) {
                        Ok(Some(line)) => log.rx(&line),
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Dropping notification data: {}", e);
                            log.error(&e.to_string());
                            break;
                        }
                    }
                }
            }

            let lost = state.send_if_modified(|s| {
                if *s == ConnectionState::Ready {
                    *s = ConnectionState::Lost;
                    true
                } else {
                    false
                }
            });
            if lost {
                let e = RemoteError::Disconnected("Notification stream ended".to_string());
                error!("{}", e);
                log.error(&e.to_string());
            }
        }))
    }

    /// Write one command. Nothing is retried; a transport failure marks the
    /// link `Lost` and the caller has to `connect` again.
    pub async fn send(&mut self, command: &str) -> Result<(), RemoteError> {
        let (peripheral, selected) = match (&self.active, self.state()) {
            (Some(active), ConnectionState::Ready) => {
                (active.peripheral.clone(), active.selected.clone())
            }
            (Some(_), ConnectionState::Lost) => {
                let e = RemoteError::Disconnected("Link lost".to_string());
                self.report(&e);
                self.drop_link().await;
                return Err(e);
            }
            _ => {
                self.report(&RemoteError::NotConnected);
                return Err(RemoteError::NotConnected);
            }
        };

        let (characteristic, mode) = match selected {
            Some(selected) => selected,
            None => {
                self.report(&RemoteError::NoWritableCharacteristic);
                return Err(RemoteError::NoWritableCharacteristic);
            }
        };

        let mut frame = BytesMut::new();
        if let Err(e) = self.codec.encode(command, &mut frame) {
            self.report(&e);
            return Err(e);
        }

        match self
            .platform
            .write(&peripheral, &characteristic, &frame, mode)
            .await
        {
            Ok(()) => {
                self.log.tx(command);
                Ok(())
            }
            Err(e) => {
                self.report(&e);
                if e.is_link_loss() {
                    self.drop_link().await;
                    self.set_state(ConnectionState::Lost);
                }
                Err(e)
            }
        }
    }

    /// Tear down the active link without touching the state.
    async fn drop_link(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(task) = active.rx_task {
                task.abort();
            }
            if let Err(e) = self.platform.disconnect(&active.peripheral).await {
                debug!("Disconnect after link loss failed: {}", e);
            }
        }
    }

    pub async fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(task) = active.rx_task {
                task.abort();
            }
            match self.platform.disconnect(&active.peripheral).await {
                Ok(()) => self.log.info("Disconnected"),
                Err(e) => self.report(&e),
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Cancel any scan, sever the connection and refuse further scans.
    pub async fn dispose(&mut self) {
        if let Err(e) = self.stop_scan().await {
            debug!("Stop scan during dispose failed: {}", e);
        }
        self.shutdown.cancel();
        self.disconnect().await;
    }
}

impl<P: BlePlatform> Drop for TransportLink<P> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.active.as_ref().and_then(|a| a.rx_task.as_ref()) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::mock::{MockPeripheral, MockPlatform};

    const ROBOT: &str = "AA:BB";

    fn characteristic(
        service: Uuid,
        uuid: Uuid,
        write: bool,
        write_without_response: bool,
    ) -> GattCharacteristic {
        GattCharacteristic {
            service,
            uuid,
            write,
            write_without_response,
            notify: false,
        }
    }

    fn configured(notify: bool) -> GattCharacteristic {
        GattCharacteristic {
            notify,
            ..characteristic(
                *BLE_COMMAND_SERVICE_UUID,
                *BLE_COMMAND_CHARACTERISTIC_UUID,
                false,
                true,
            )
        }
    }

    fn generic_writable() -> GattCharacteristic {
        characteristic(Uuid::from_u128(1), Uuid::from_u128(2), true, false)
    }

    fn without_ack_only() -> GattCharacteristic {
        characteristic(Uuid::from_u128(3), Uuid::from_u128(4), false, true)
    }

    fn advert(id: &str, name: Option<&str>, rssi: i16) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: name.map(str::to_string),
            rssi: Some(rssi),
            services: vec![*BLE_COMMAND_SERVICE_UUID],
        }
    }

    fn robot(characteristics: Vec<GattCharacteristic>) -> MockPlatform {
        MockPlatform::new().with_peripheral(
            ROBOT,
            MockPeripheral {
                characteristics,
                ..Default::default()
            },
        )
    }

    #[test]
    fn configured_pair_wins() {
        let chars = vec![generic_writable(), configured(false)];
        let (c, mode) = select_characteristic(
            &chars,
            &BLE_COMMAND_SERVICE_UUID,
            &BLE_COMMAND_CHARACTERISTIC_UUID,
        )
        .unwrap();
        assert_eq!(c, configured(false));
        assert_eq!(mode, WriteMode::WithoutResponse);
    }

    #[test]
    fn acknowledged_before_unacknowledged() {
        let chars = vec![without_ack_only(), generic_writable()];
        let (c, mode) = select_characteristic(
            &chars,
            &BLE_COMMAND_SERVICE_UUID,
            &BLE_COMMAND_CHARACTERISTIC_UUID,
        )
        .unwrap();
        assert_eq!(c, generic_writable());
        assert_eq!(mode, WriteMode::WithResponse);
    }

    #[test]
    fn nothing_writable() {
        let read_only = characteristic(Uuid::from_u128(5), Uuid::from_u128(6), false, false);
        assert_eq!(
            select_characteristic(
                &[read_only],
                &BLE_COMMAND_SERVICE_UUID,
                &BLE_COMMAND_CHARACTERISTIC_UUID
            ),
            None
        );
    }

    #[test]
    fn batch_is_deduplicated_and_named() {
        let devices = publish_batch(vec![
            advert("AA:BB", Some("ESP32-Robot"), -70),
            advert("CC:DD", None, -40),
            advert("EE:FF", Some(""), -40),
            advert("AA:BB", Some("ESP32-Robot"), -45),
        ]);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "AA:BB");
        assert_eq!(devices[0].signal_strength, -45);
        assert!(devices[0]
            .advertised_services
            .contains(&*BLE_COMMAND_SERVICE_UUID));
    }

    #[tokio::test]
    async fn scan_connect_send_scenario() {
        let mock = robot(vec![configured(true)]).with_batches(vec![vec![advert(
            ROBOT,
            Some("ESP32-Robot"),
            -45,
        )]]);
        let mut link = TransportLink::new(mock.clone(), LinkConfig::default());
        link.initialize().await.unwrap();

        let mut scan = link.scan().await.unwrap();
        let devices = scan.next().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "ESP32-Robot");
        link.stop_scan().await.unwrap();
        assert_eq!(scan.next().await, None);
        assert!(!mock.is_scanning());

        assert!(link.connect(&devices[0].id).await);
        assert_eq!(link.state(), ConnectionState::Ready);

        let before = link.log().len();
        link.send("M,0.50,-0.20\n").await.unwrap();
        let entries = link.log().entries();
        assert_eq!(entries.len(), before + 1);
        assert_eq!(entries.last().unwrap().to_string(), "TX: M,0.50,-0.20");

        let writes = mock.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].data, b"M,0.50,-0.20\n".to_vec());
        assert_eq!(writes[0].characteristic, configured(true));
    }

    #[tokio::test]
    async fn without_ack_characteristic_is_used_exclusively() {
        let mock = robot(vec![without_ack_only()]);
        let mut link = TransportLink::new(mock.clone(), LinkConfig::default());
        assert!(link.connect(ROBOT).await);
        assert_eq!(link.write_mode(), Some(WriteMode::WithoutResponse));

        link.send("L1_ON").await.unwrap();
        link.send("L1_OFF").await.unwrap();
        assert!(mock
            .writes()
            .iter()
            .all(|w| w.mode == WriteMode::WithoutResponse));
    }

    #[tokio::test]
    async fn ready_without_writable_characteristic() {
        let read_only = characteristic(Uuid::from_u128(5), Uuid::from_u128(6), false, false);
        let mut link = TransportLink::new(robot(vec![read_only]), LinkConfig::default());
        assert!(link.connect(ROBOT).await);
        assert_eq!(link.state(), ConnectionState::Ready);
        assert_eq!(
            link.send("S").await,
            Err(RemoteError::NoWritableCharacteristic)
        );
        assert_eq!(link.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn unknown_device_is_rejected() {
        let mut link = TransportLink::new(MockPlatform::new(), LinkConfig::default());
        assert!(!link.connect("11:22").await);
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(link.send("S").await, Err(RemoteError::NotConnected));
        assert_eq!(link.log().len(), 2);
    }

    #[tokio::test]
    async fn connect_failure_is_reported_once() {
        let mock = MockPlatform::new().with_peripheral(
            ROBOT,
            MockPeripheral {
                connect_error: Some("rejected".to_string()),
                ..Default::default()
            },
        );
        let mut link = TransportLink::new(mock, LinkConfig::default());
        assert!(!link.connect(ROBOT).await);
        assert_eq!(link.state(), ConnectionState::Disconnected);
        let entries = link.log().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].to_string(), "ERR: Connect failed: rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out() {
        let mock = MockPlatform::new().with_peripheral(
            ROBOT,
            MockPeripheral {
                connect_hangs: true,
                ..Default::default()
            },
        );
        let mut link = TransportLink::new(mock, LinkConfig::default());
        let started = tokio::time::Instant::now();
        assert!(!link.connect(ROBOT).await);
        assert!(started.elapsed() >= CONNECT_TIMEOUT);
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn write_failure_loses_link() {
        let mock = robot(vec![generic_writable()]);
        let mut link = TransportLink::new(mock.clone(), LinkConfig::default());
        assert!(link.connect(ROBOT).await);

        mock.fail_writes(Some(RemoteError::WriteFailed("GATT error".to_string())));
        assert_eq!(
            link.send("F").await,
            Err(RemoteError::WriteFailed("GATT error".to_string()))
        );
        assert_eq!(link.state(), ConnectionState::Lost);
        assert_eq!(
            link.log().entries().last().unwrap().to_string(),
            "ERR: Write failed: GATT error"
        );

        // No automatic reconnection.
        mock.fail_writes(None);
        assert_eq!(link.send("F").await, Err(RemoteError::NotConnected));
        assert!(link.connect(ROBOT).await);
        link.send("F").await.unwrap();
    }

    #[tokio::test]
    async fn notifications_are_logged_and_loss_detected() {
        let mock = robot(vec![configured(true)]);
        let mut link = TransportLink::new(mock.clone(), LinkConfig::default());
        assert!(link.connect(ROBOT).await);

        let mut log_rx = link.log().subscribe();
        mock.notify(b"BAT,7");
        mock.notify(b"4\r\n");
        let entry = log_rx.recv().await.unwrap();
        assert_eq!(entry.to_string(), "RX: BAT,74");

        let mut state = link.subscribe_state();
        mock.drop_link();
        while *state.borrow_and_update() != ConnectionState::Lost {
            state.changed().await.unwrap();
        }
        assert_eq!(
            link.send("F").await,
            Err(RemoteError::Disconnected("Link lost".to_string()))
        );
    }

    #[tokio::test]
    async fn batches_replace_previous_list() {
        let mock = MockPlatform::new().with_batches(vec![
            vec![advert("AA:BB", Some("ESP32-Robot"), -45)],
            vec![advert("CC:DD", Some("Other"), -80)],
        ]);
        let mut link = TransportLink::new(mock, LinkConfig::default());
        let mut scan = link.scan().await.unwrap();
        assert_eq!(scan.next().await.unwrap()[0].id, "AA:BB");
        let second = scan.next().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "CC:DD");
    }

    #[tokio::test(start_paused = true)]
    async fn scan_times_out() {
        let mock = MockPlatform::new().with_batches(vec![vec![advert(ROBOT, Some("R"), -50)]]);
        let mut link = TransportLink::new(mock.clone(), LinkConfig::default());
        let mut scan = link.scan().await.unwrap();
        assert!(scan.next().await.is_some());
        assert_eq!(scan.next().await, None);
        assert!(!link.is_scanning());
        assert!(!mock.is_scanning());
    }

    #[tokio::test]
    async fn scan_and_adapter_errors() {
        let mut link = TransportLink::new(MockPlatform::new().without_adapter(), LinkConfig::default());
        assert!(matches!(
            link.initialize().await,
            Err(RemoteError::AdapterUnavailable(_))
        ));

        let mut link = TransportLink::new(
            MockPlatform::new().with_scan_error("radio busy"),
            LinkConfig::default(),
        );
        assert!(matches!(
            link.scan().await,
            Err(RemoteError::ScanFailed(_))
        ));
        assert!(!link.is_scanning());
        assert_eq!(link.log().len(), 1);
    }

    #[tokio::test]
    async fn dispose_tears_everything_down() {
        let mock = robot(vec![generic_writable()]).with_batches(vec![vec![advert(
            ROBOT,
            Some("ESP32-Robot"),
            -45,
        )]]);
        let mut link = TransportLink::new(mock.clone(), LinkConfig::default());
        let mut scan = link.scan().await.unwrap();
        scan.next().await.unwrap();
        assert!(link.connect(ROBOT).await);

        link.dispose().await;
        assert_eq!(scan.next().await, None);
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(mock.connected(), None);
        assert!(!mock.is_scanning());
    }

    #[tokio::test]
    async fn rescan_replaces_previous_session() {
        let mock = MockPlatform::new().with_batches(vec![vec![advert(ROBOT, Some("R"), -50)]]);
        let mut link = TransportLink::new(mock.clone(), LinkConfig::default());
        let mut first = link.scan().await.unwrap();
        assert!(first.next().await.is_some());

        let mut second = link.scan().await.unwrap();
        assert_eq!(first.next().await, None);
        assert_eq!(second.next().await.unwrap()[0].id, ROBOT);
        // The ended session must not have stopped the radio under the new one.
        assert!(link.is_scanning());
        assert!(mock.is_scanning());

        link.stop_scan().await.unwrap();
        assert_eq!(second.next().await, None);
        assert!(!link.is_scanning());
        assert!(!mock.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_after_timeout_is_harmless() {
        let mock = MockPlatform::new();
        let mut link = TransportLink::new(mock.clone(), LinkConfig::default());
        let mut scan = link.scan().await.unwrap();
        assert_eq!(scan.next().await, None);
        assert!(link.stop_scan().await.is_ok());
        assert!(!mock.is_scanning());
    }

    #[tokio::test]
    async fn failed_rescan_keeps_radio_owned() {
        let mock = MockPlatform::new().with_batches(vec![vec![advert(ROBOT, Some("R"), -50)]]);
        let mut link = TransportLink::new(mock.clone(), LinkConfig::default());
        let mut scan = link.scan().await.unwrap();
        assert!(scan.next().await.is_some());

        mock.fail_scans(Some("radio busy"));
        assert!(matches!(link.scan().await, Err(RemoteError::ScanFailed(_))));
        assert!(link.is_scanning());
        assert!(mock.is_scanning());

        link.dispose().await;
        assert_eq!(scan.next().await, None);
        assert!(!link.is_scanning());
        assert!(!mock.is_scanning());
    }

    #[tokio::test]
    async fn failed_discovery_releases_peripheral() {
        let mock = robot(vec![generic_writable()]);
        mock.fail_discovery(Some("GATT error"));
        let mut link = TransportLink::new(mock.clone(), LinkConfig::default());
        assert!(!link.connect(ROBOT).await);
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(mock.connected(), None);
        assert_eq!(
            link.log().entries().last().unwrap().to_string(),
            "ERR: Connect failed: GATT error"
        );
    }
}
