/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use ble_remote::consts::{BLE_COMMAND_CHARACTERISTIC_UUID, BLE_COMMAND_SERVICE_UUID};
use ble_remote::link::{LinkConfig, TransportLink};
use ble_remote::session::{ControlInput, RemoteSession};
use ble_remote::session_log::SessionLog;
use ble_remote::settings::{CatalogSettings, JsonFileStore, KeyValueStore, MemoryStore};
use ble_remote::transport::ble::{get_adapter_names, BTLEPlatform};
use ble_remote::transport::mock::{MockPeripheral, MockPlatform};
use ble_remote::transport::{Advertisement, BlePlatform, DiscoveredDevice, GattCharacteristic};

use clap::Parser;
use futures::StreamExt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

#[macro_use]
extern crate lazy_static;

#[derive(clap::Parser)]
#[clap(about, version, author)]
struct Args {
    #[clap(long, short = 't', value_name = "TRANSPORT")]
    transport: String,
    /// Host adapter index
    #[clap(long, short = 'a', default_value_t = 0)]
    adapter: usize,
    /// List host adapters and exit
    #[clap(long)]
    list_adapters: bool,
    /// Connect to this address as soon as it is seen
    #[clap(long, short = 'd')]
    device: Option<String>,
    /// Connect to the first device whose name contains this
    #[clap(long, short = 'n')]
    name: Option<String>,
    #[clap(long)]
    service_uuid: Option<Uuid>,
    #[clap(long)]
    characteristic_uuid: Option<Uuid>,
    #[clap(long)]
    scan_secs: Option<u64>,
    /// Print scan results as JSON
    #[clap(long)]
    json: bool,
}

lazy_static! {
    static ref ARGS: Args = Args::parse();
}

const HELP: &str = "joy X Y | release | lights | horn | grip | speed | btn N | \
set N LABEL COMMAND | dir X Y | raw TEXT | reset | log | disconnect | quit";

#[tokio::main]
async fn main() {
    env_logger::init();
    match ARGS.transport.as_str() {
        "ble" => {
            if ARGS.list_adapters {
                match get_adapter_names().await {
                    Ok(adapters) => println!("{:?}", adapters),
                    Err(e) => eprintln!("{}", e),
                }
                return;
            }
            let store = match JsonFileStore::default_location() {
                Ok(store) => store,
                Err(e) => {
                    eprintln!("{}", e);
                    return;
                }
            };
            run(BTLEPlatform::new(ARGS.adapter), store).await;
        }
        "mock" => {
            run(demo_platform(), MemoryStore::default()).await;
        }
        _ => {
            println!("Require transport type. Use --help for more information.");
        }
    }
}

fn link_config() -> LinkConfig {
    let mut config = LinkConfig::default();
    if let Some(uuid) = ARGS.service_uuid {
        config.service_uuid = uuid;
    }
    if let Some(uuid) = ARGS.characteristic_uuid {
        config.characteristic_uuid = uuid;
    }
    if let Some(secs) = ARGS.scan_secs {
        config.scan_timeout = Duration::from_secs(secs);
    }
    config
}

/// A robot that accepts every command, for trying the remote without hardware.
fn demo_platform() -> MockPlatform {
    let id = "24:0A:C4:00:00:01";
    MockPlatform::new()
        .with_batches(vec![vec![Advertisement {
            id: id.to_string(),
            name: Some("RoboRemote".to_string()),
            rssi: Some(-58),
            services: vec![*BLE_COMMAND_SERVICE_UUID],
        }]])
        .with_peripheral(
            id,
            MockPeripheral {
                characteristics: vec![GattCharacteristic {
                    service: *BLE_COMMAND_SERVICE_UUID,
                    uuid: *BLE_COMMAND_CHARACTERISTIC_UUID,
                    write: true,
                    write_without_response: true,
                    notify: true,
                }],
                ..Default::default()
            },
        )
}

async fn run<P: BlePlatform, S: KeyValueStore>(platform: P, store: S) {
    let log = SessionLog::default();
    let mut link = TransportLink::with_log(platform, link_config(), log.clone());
    if let Err(e) = link.initialize().await {
        eprintln!("{}", e);
        return;
    }

    let device = match pick_device(&mut link).await {
        Some(device) => device,
        None => {
            println!("No matching device found.");
            return;
        }
    };
    println!("Connecting to {} ({})", device.name, device.id);
    if !link.connect(&device.id).await {
        if let Some(entry) = log.entries().last() {
            println!("{}", entry);
        }
        return;
    }

    let mut states = WatchStream::new(link.subscribe_state());
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            println!("[{:?}]", state);
        }
    });
    let mut entries = log.subscribe();
    tokio::spawn(async move {
        loop {
            match entries.recv().await {
                Ok(entry) => println!("{}", entry),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    println!("{}", HELP);
    let (tx, rx) = mpsc::channel(64);
    let mut session = RemoteSession::new(link, CatalogSettings::new(store));
    futures::join!(session.run(rx), read_commands(tx, log));
}

fn device_matches(device: &DiscoveredDevice) -> bool {
    if let Some(id) = &ARGS.device {
        return device.id.eq_ignore_ascii_case(id);
    }
    if let Some(name) = &ARGS.name {
        return device.name.contains(name.as_str());
    }
    false
}

/// Scan until a device matching the filters shows up. Without filters the
/// whole scan window runs and the first device of the final list is used.
async fn pick_device<P: BlePlatform>(link: &mut TransportLink<P>) -> Option<DiscoveredDevice> {
    let mut devices = match link.scan().await {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("{}", e);
            return None;
        }
    };

    let mut latest = vec![];
    while let Some(batch) = devices.next().await {
        print_devices(&batch);
        if let Some(found) = batch.iter().find(|d| device_matches(d)).cloned() {
            drop(devices);
            if let Err(e) = link.stop_scan().await {
                eprintln!("{}", e);
            }
            return Some(found);
        }
        latest = batch;
    }
    latest.into_iter().next()
}

fn print_devices(devices: &[DiscoveredDevice]) {
    if ARGS.json {
        match serde_json::to_string(devices) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}", e),
        }
        return;
    }
    println!("-- {} device(s)", devices.len());
    for device in devices.iter() {
        println!("{} ({}) {} dBm", device.name, device.id, device.signal_strength);
    }
}

fn parse_axes(args: &[&str]) -> Result<(f64, f64), String> {
    match args {
        [x, y] => {
            let x = x.parse::<f64>().map_err(|e| e.to_string())?;
            let y = y.parse::<f64>().map_err(|e| e.to_string())?;
            Ok((x, y))
        }
        _ => Err("Expected X Y".to_string()),
    }
}

fn parse_slot(arg: Option<&&str>) -> Result<usize, String> {
    let slot = arg
        .ok_or_else(|| "Expected a button number".to_string())?
        .parse::<usize>()
        .map_err(|e| e.to_string())?;
    // Buttons are numbered from one on screen.
    slot.checked_sub(1)
        .ok_or_else(|| "Buttons start at 1".to_string())
}

fn parse_command(line: &str) -> Result<ControlInput, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let (command, args) = match words.split_first() {
        Some(split) => split,
        None => return Err(HELP.to_string()),
    };

    match *command {
        "joy" => parse_axes(args).map(|(x, y)| ControlInput::Joystick { x, y }),
        "release" => Ok(ControlInput::Release),
        "lights" => Ok(ControlInput::ToggleLights),
        "horn" => Ok(ControlInput::ToggleHorn),
        "grip" => Ok(ControlInput::ToggleGripper),
        "speed" => Ok(ControlInput::CycleSpeed),
        "btn" => parse_slot(args.first()).map(ControlInput::Custom),
        "set" => {
            let slot = parse_slot(args.first())?;
            match args.get(1..) {
                Some([label, command, ..]) => Ok(ControlInput::SetCustom {
                    slot,
                    label: label.to_string(),
                    command: command.to_string(),
                }),
                _ => Err("Expected N LABEL COMMAND".to_string()),
            }
        }
        "dir" => parse_axes(args).map(|(x, y)| ControlInput::Directional { x, y }),
        "raw" => {
            let text = line.trim_start().trim_start_matches("raw").trim_start();
            Ok(ControlInput::Raw(format!("{}\n", text)))
        }
        "reset" => Ok(ControlInput::ResetCatalog),
        "disconnect" => Ok(ControlInput::Disconnect),
        "quit" => Ok(ControlInput::Shutdown),
        _ => Err(HELP.to_string()),
    }
}

async fn read_commands(tx: mpsc::Sender<ControlInput>, log: SessionLog) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("{}", e);
                break;
            }
        };

        if line.trim() == "log" {
            for entry in log.entries() {
                println!("{}", entry);
            }
            continue;
        }

        match parse_command(&line) {
            Ok(input) => {
                let quit = input == ControlInput::Shutdown;
                if tx.send(input).await.is_err() || quit {
                    break;
                }
            }
            Err(message) => println!("{}", message),
        }
    }
    // Dropping the sender ends the session.
}
