//! The single logical thread that owns a [`FleetCore`].
//!
//! One task serializes operator commands, inbound coordinator messages, the
//! poll/probe/audio timers, probe completions and channel closure through a
//! `tokio::select!` loop. Probes run as separate tasks and re-enter the loop
//! as messages, so no handler ever waits on the network.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use fleetdeck_core::protocol::Inbound;
use fleetdeck_core::{AppConfig, DeviceAddress};
use fleetdeck_engine::audio::AudioError;
use fleetdeck_engine::engine::{FleetCore, FleetView};
use fleetdeck_engine::fleet::SelectionError;
use fleetdeck_engine::media::LocalFeed;
use fleetdeck_engine::readiness::ProbeTicket;
use fleetdeck_engine::recording::SessionError;
use fleetdeck_engine::traits::{LocalCamera, ReadinessProbe};
use fleetdeck_providers::coordinator::Subscription;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

const AUDIO_TICK: Duration = Duration::from_secs(1);
const COMMAND_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    pub poll_interval: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl DriverConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            probe_interval: cfg.probe_interval(),
            probe_timeout: cfg.probe_timeout(),
        }
    }
}

type Reply<T> = oneshot::Sender<T>;
type ProbeResult = (ProbeTicket, anyhow::Result<bool>);

enum Command {
    SelectDevice {
        address: DeviceAddress,
        selected: bool,
        respond_to: Reply<Result<(), SelectionError>>,
    },
    SetVisible {
        address: DeviceAddress,
        visible: bool,
        respond_to: Reply<Result<(), SelectionError>>,
    },
    StartRecording {
        respond_to: Reply<Result<(), SessionError>>,
    },
    StopRecording {
        respond_to: Reply<Result<(), SessionError>>,
    },
    UpdateAllSettings {
        respond_to: Reply<Result<(), SessionError>>,
    },
    RequestSnapshot {
        respond_to: Reply<anyhow::Result<()>>,
    },
    RefreshAudioDevices {
        respond_to: Reply<Result<(), AudioError>>,
    },
    SelectAudioDevice {
        index: u32,
        respond_to: Reply<Result<(), AudioError>>,
    },
    SelectAudioChannels {
        channels: Vec<u16>,
        respond_to: Reply<Result<(), AudioError>>,
    },
    StartAudio {
        respond_to: Reply<Result<(), AudioError>>,
    },
    StopAudio {
        respond_to: Reply<Result<u64, AudioError>>,
    },
    AttachLocalCamera {
        respond_to: Reply<LocalFeed>,
    },
    DetachLocalCamera {
        respond_to: Reply<()>,
    },
    Shutdown {
        respond_to: Reply<()>,
    },
}

/// Cloneable front door to a running [`FleetRuntime`].
#[derive(Clone)]
pub struct FleetHandle {
    tx: mpsc::Sender<Command>,
    view_rx: watch::Receiver<FleetView>,
}

impl FleetHandle {
    pub fn subscribe(&self) -> watch::Receiver<FleetView> {
        self.view_rx.clone()
    }

    pub fn view(&self) -> FleetView {
        self.view_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> anyhow::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| anyhow!("fleet runtime stopped"))?;
        rx.await.map_err(|_| anyhow!("fleet runtime stopped"))
    }

    pub async fn select_device(&self, address: DeviceAddress, selected: bool) -> anyhow::Result<()> {
        self.call(|respond_to| Command::SelectDevice {
            address,
            selected,
            respond_to,
        })
        .await??;
        Ok(())
    }

    pub async fn set_visible(&self, address: DeviceAddress, visible: bool) -> anyhow::Result<()> {
        self.call(|respond_to| Command::SetVisible {
            address,
            visible,
            respond_to,
        })
        .await??;
        Ok(())
    }

    pub async fn start_recording(&self) -> anyhow::Result<()> {
        self.call(|respond_to| Command::StartRecording { respond_to })
            .await??;
        Ok(())
    }

    pub async fn stop_recording(&self) -> anyhow::Result<()> {
        self.call(|respond_to| Command::StopRecording { respond_to })
            .await??;
        Ok(())
    }

    pub async fn update_all_settings(&self) -> anyhow::Result<()> {
        self.call(|respond_to| Command::UpdateAllSettings { respond_to })
            .await??;
        Ok(())
    }

    pub async fn request_snapshot(&self) -> anyhow::Result<()> {
        self.call(|respond_to| Command::RequestSnapshot { respond_to })
            .await?
    }

    pub async fn refresh_audio_devices(&self) -> anyhow::Result<()> {
        self.call(|respond_to| Command::RefreshAudioDevices { respond_to })
            .await??;
        Ok(())
    }

    pub async fn select_audio_device(&self, index: u32) -> anyhow::Result<()> {
        self.call(|respond_to| Command::SelectAudioDevice { index, respond_to })
            .await??;
        Ok(())
    }

    pub async fn select_audio_channels(&self, channels: Vec<u16>) -> anyhow::Result<()> {
        self.call(|respond_to| Command::SelectAudioChannels {
            channels,
            respond_to,
        })
        .await??;
        Ok(())
    }

    pub async fn start_audio(&self) -> anyhow::Result<()> {
        self.call(|respond_to| Command::StartAudio { respond_to })
            .await??;
        Ok(())
    }

    /// Returns the final elapsed seconds.
    pub async fn stop_audio(&self) -> anyhow::Result<u64> {
        Ok(self
            .call(|respond_to| Command::StopAudio { respond_to })
            .await??)
    }

    pub async fn attach_local_camera(&self) -> anyhow::Result<LocalFeed> {
        self.call(|respond_to| Command::AttachLocalCamera { respond_to })
            .await
    }

    pub async fn detach_local_camera(&self) -> anyhow::Result<()> {
        self.call(|respond_to| Command::DetachLocalCamera { respond_to })
            .await
    }

    /// Stops the loop after disposing every sink. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self
            .call(|respond_to| Command::Shutdown { respond_to })
            .await;
    }
}

pub struct FleetRuntime {
    core: FleetCore,
    probe: Arc<dyn ReadinessProbe>,
    camera: Arc<dyn LocalCamera>,
    cfg: DriverConfig,
    subscriptions: Vec<Subscription>,
}

enum Flow {
    Continue(Vec<ProbeTicket>),
    Shutdown(Reply<()>),
}

impl FleetRuntime {
    pub fn new(
        core: FleetCore,
        probe: Arc<dyn ReadinessProbe>,
        camera: Arc<dyn LocalCamera>,
        cfg: DriverConfig,
    ) -> Self {
        Self {
            core,
            probe,
            camera,
            cfg,
            subscriptions: Vec::new(),
        }
    }

    /// Channel subscriptions feeding `inbound`; held for the life of the loop.
    pub fn with_subscriptions(mut self, subscriptions: Vec<Subscription>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Starts the driver task. `closed` resolves when the coordinator channel
    /// is lost.
    pub fn spawn<C>(self, inbound: mpsc::UnboundedReceiver<Inbound>, closed: C) -> FleetHandle
    where
        C: Future<Output = ()> + Send + 'static,
    {
        let (tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let view_rx = self.core.subscribe();
        tokio::spawn(self.run(cmd_rx, inbound, closed));
        FleetHandle { tx, view_rx }
    }

    async fn run<C>(
        self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
        closed: C,
    ) where
        C: Future<Output = ()> + Send + 'static,
    {
        let FleetRuntime {
            mut core,
            probe,
            camera,
            cfg,
            subscriptions,
        } = self;

        let (probe_tx, mut probe_rx) = mpsc::unbounded_channel::<ProbeResult>();
        let mut poll = interval_after(cfg.poll_interval);
        let mut probe_tick = interval_after(cfg.probe_interval);
        let mut audio_tick: Option<Interval> = None;

        let mut closed = std::pin::pin!(closed);
        let mut channel_open = true;
        let mut inbound_open = true;

        core.start_polling();
        log::info!("fleet runtime started");

        loop {
            let tickets = tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        core.shutdown();
                        break;
                    };
                    match handle_command(&mut core, camera.as_ref(), cmd) {
                        Flow::Continue(tickets) => tickets,
                        Flow::Shutdown(respond_to) => {
                            core.shutdown();
                            let _ = respond_to.send(());
                            break;
                        }
                    }
                }
                msg = inbound.recv(), if inbound_open => match msg {
                    Some(msg) => core.handle_inbound(msg),
                    None => {
                        inbound_open = false;
                        Vec::new()
                    }
                },
                Some((ticket, result)) = probe_rx.recv() => {
                    core.on_probe_result(&ticket, result);
                    Vec::new()
                }
                _ = poll.tick() => {
                    core.on_poll_tick();
                    Vec::new()
                }
                _ = probe_tick.tick() => core.on_probe_tick(),
                _ = next_tick(&mut audio_tick) => {
                    core.on_audio_tick();
                    Vec::new()
                }
                _ = closed.as_mut(), if channel_open => {
                    channel_open = false;
                    core.on_channel_lost();
                    Vec::new()
                }
            };

            for ticket in tickets {
                spawn_probe(probe.clone(), cfg.probe_timeout, ticket, probe_tx.clone());
            }
            sync_audio_tick(&core, &mut audio_tick);
        }

        drop(subscriptions);
        log::info!("fleet runtime stopped");
    }
}

fn handle_command(core: &mut FleetCore, camera: &dyn LocalCamera, cmd: Command) -> Flow {
    let mut tickets = Vec::new();
    match cmd {
        Command::SelectDevice {
            address,
            selected,
            respond_to,
        } => {
            let _ = respond_to.send(core.select_device(&address, selected));
        }
        Command::SetVisible {
            address,
            visible,
            respond_to,
        } => {
            let _ = respond_to.send(core.set_visible(&address, visible));
        }
        Command::StartRecording { respond_to } => {
            let res = core.start_recording().map(|t| tickets = t);
            let _ = respond_to.send(res);
        }
        Command::StopRecording { respond_to } => {
            let _ = respond_to.send(core.stop_recording());
        }
        Command::UpdateAllSettings { respond_to } => {
            let _ = respond_to.send(core.update_all_settings());
        }
        Command::RequestSnapshot { respond_to } => {
            let _ = respond_to.send(core.request_snapshot());
        }
        Command::RefreshAudioDevices { respond_to } => {
            let _ = respond_to.send(core.refresh_audio_devices());
        }
        Command::SelectAudioDevice { index, respond_to } => {
            let _ = respond_to.send(core.select_audio_device(index));
        }
        Command::SelectAudioChannels {
            channels,
            respond_to,
        } => {
            let _ = respond_to.send(core.select_audio_channels(channels));
        }
        Command::StartAudio { respond_to } => {
            let _ = respond_to.send(core.start_audio());
        }
        Command::StopAudio { respond_to } => {
            let _ = respond_to.send(core.stop_audio());
        }
        Command::AttachLocalCamera { respond_to } => {
            let _ = respond_to.send(core.attach_local_camera(camera));
        }
        Command::DetachLocalCamera { respond_to } => {
            core.detach_local_camera();
            let _ = respond_to.send(());
        }
        Command::Shutdown { respond_to } => return Flow::Shutdown(respond_to),
    }
    Flow::Continue(tickets)
}

fn interval_after(period: Duration) -> Interval {
    let mut i = tokio::time::interval_at(Instant::now() + period, period);
    i.set_missed_tick_behavior(MissedTickBehavior::Delay);
    i
}

async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// The audio tick exists only while audio records, counted from the local
/// start call.
fn sync_audio_tick(core: &FleetCore, tick: &mut Option<Interval>) {
    match (core.audio().is_recording(), tick.is_some()) {
        (true, false) => {
            let mut i = tokio::time::interval_at(Instant::now() + AUDIO_TICK, AUDIO_TICK);
            i.set_missed_tick_behavior(MissedTickBehavior::Burst);
            *tick = Some(i);
        }
        (false, true) => *tick = None,
        _ => {}
    }
}

fn spawn_probe(
    probe: Arc<dyn ReadinessProbe>,
    timeout: Duration,
    ticket: ProbeTicket,
    tx: mpsc::UnboundedSender<ProbeResult>,
) {
    tokio::spawn(async move {
        let result = match tokio::time::timeout(timeout, probe.is_ready(&ticket.address)).await {
            Ok(r) => r,
            Err(_) => Err(anyhow!("readiness probe timed out after {timeout:?}")),
        };
        let _ = tx.send((ticket, result));
    });
}
