/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Owning root of a remote-control session. Presentation code talks to it
//! only through [`ControlInput`] messages and the link's observables.

use crate::catalog::CommandCatalog;
use crate::consts::MOTION_TICK;
use crate::dispatch::{Action, ActionDispatcher, ControlToggles, CustomButtons};
use crate::link::{ConnectionState, TransportLink};
use crate::motion::MotionThrottler;
use crate::settings::{CatalogSettings, KeyValueStore};
use crate::transport::BlePlatform;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlInput {
    /// Pointer moved; raw coordinates in [-1, 1].
    Joystick { x: f64, y: f64 },
    /// Pointer lifted.
    Release,
    ToggleLights,
    ToggleHorn,
    ToggleGripper,
    CycleSpeed,
    Custom(usize),
    SetCustom {
        slot: usize,
        label: String,
        command: String,
    },
    Directional { x: f64, y: f64 },
    Raw(String),
    UpdateCatalog(CommandCatalog),
    ResetCatalog,
    Disconnect,
    Shutdown,
}

pub struct RemoteSession<P: BlePlatform, S: KeyValueStore> {
    link: TransportLink<P>,
    settings: CatalogSettings<S>,
    throttler: MotionThrottler,
    dispatcher: ActionDispatcher,
    toggles: ControlToggles,
    buttons: CustomButtons,
}

impl<P: BlePlatform, S: KeyValueStore> RemoteSession<P, S> {
    pub fn new(link: TransportLink<P>, settings: CatalogSettings<S>) -> Self {
        Self {
            link,
            settings,
            throttler: MotionThrottler::new(),
            dispatcher: ActionDispatcher,
            toggles: ControlToggles::default(),
            buttons: CustomButtons::default(),
        }
    }

    pub fn link(&self) -> &TransportLink<P> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut TransportLink<P> {
        &mut self.link
    }

    pub fn catalog(&self) -> &CommandCatalog {
        self.settings.catalog()
    }

    pub fn toggles(&self) -> &ControlToggles {
        &self.toggles
    }

    pub fn buttons(&self) -> &CustomButtons {
        &self.buttons
    }

    /// Process inputs until `Shutdown` or until every sender is gone, then
    /// tear the session down.
    pub async fn run(&mut self, mut inputs: mpsc::Receiver<ControlInput>) {
        let mut ticker = tokio::time::interval(MOTION_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush_motion().await,
                input = inputs.recv() => match input {
                    Some(input) => {
                        if !self.handle(input).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.dispose().await;
    }

    /// Apply one input. Returns `false` once the session should end.
    pub async fn handle(&mut self, input: ControlInput) -> bool {
        match input {
            ControlInput::Joystick { x, y } => {
                self.throttler.sample(x, y);
            }
            ControlInput::Release => {
                if let Some(command) = self.throttler.release() {
                    self.send_motion(&command).await;
                }
            }
            ControlInput::ToggleLights => {
                let action = self.toggles.toggle_lights();
                self.dispatch(action).await;
            }
            ControlInput::ToggleHorn => {
                let action = self.toggles.toggle_horn();
                self.dispatch(action).await;
            }
            ControlInput::ToggleGripper => {
                let action = self.toggles.toggle_gripper();
                self.dispatch(action).await;
            }
            ControlInput::CycleSpeed => {
                let action = self.toggles.cycle_speed();
                self.dispatch(action).await;
            }
            ControlInput::Custom(slot) => self.dispatch(Action::Custom(slot)).await,
            ControlInput::SetCustom {
                slot,
                label,
                command,
            } => {
                if let Err(e) = self.buttons.set(slot, &label, &command) {
                    warn!("Cannot edit custom button {}: {}", slot, e);
                    self.link.log().error(&e.to_string());
                }
            }
            ControlInput::Directional { x, y } => {
                self.dispatch(Action::Directional { x, y }).await
            }
            ControlInput::Raw(command) => self.dispatch(Action::Raw(command)).await,
            ControlInput::UpdateCatalog(catalog) => {
                if let Err(e) = self.settings.update_settings(catalog) {
                    warn!("Catalog update rejected: {}", e);
                    self.link.log().error(&e.to_string());
                }
            }
            ControlInput::ResetCatalog => {
                if let Err(e) = self.settings.reset_to_defaults() {
                    warn!("Catalog reset failed: {}", e);
                    self.link.log().error(&e.to_string());
                }
            }
            ControlInput::Disconnect => {
                self.throttler.reset();
                self.link.disconnect().await;
            }
            ControlInput::Shutdown => return false,
        }
        true
    }

    /// One motion tick: send the coalesced joystick sample, if any.
    pub async fn flush_motion(&mut self) {
        if let Some(command) = self.throttler.tick() {
            self.send_motion(&command).await;
        }
    }

    async fn send_motion(&mut self, command: &str) {
        if let Err(e) = self.link.send(command).await {
            debug!("Motion command dropped: {}", e);
            if self.link.state() != ConnectionState::Ready {
                self.throttler.reset();
            }
        }
    }

    async fn dispatch(&mut self, action: Action) {
        self.dispatcher
            .dispatch(
                &mut self.link,
                &action,
                self.settings.catalog(),
                &self.buttons,
            )
            .await;
    }

    pub async fn dispose(&mut self) {
        info!("Shutting down session");
        self.throttler.reset();
        self.link.dispose().await;
    }
}
