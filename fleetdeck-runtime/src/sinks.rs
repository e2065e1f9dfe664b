//! Video sink implementations.
//!
//! [`HeadlessSinkFactory`] keeps a registry of live attachments and decodes
//! nothing; [`PlayerSinkFactory`] runs one external player process per sink.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use fleetdeck_core::{PlaybackPolicy, PlayerConfig, StreamLocator};
use fleetdeck_engine::traits::{SinkFactory, SinkTarget, VideoSink};
use tokio::process::{Child, Command};

fn target_label(target: &SinkTarget) -> String {
    match target {
        SinkTarget::Device(addr) => addr.to_string(),
        SinkTarget::LocalCamera => "local camera".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub target: SinkTarget,
    pub locator: StreamLocator,
}

type Registry = Arc<Mutex<HashMap<u64, Attachment>>>;

#[derive(Clone, Default)]
pub struct HeadlessSinkFactory {
    live: Registry,
    next_id: Arc<AtomicU64>,
}

impl HeadlessSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live attachments, oldest first.
    pub fn attachments(&self) -> Vec<Attachment> {
        let Ok(live) = self.live.lock() else {
            return Vec::new();
        };
        let mut entries: Vec<_> = live.iter().map(|(id, a)| (*id, a.clone())).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, a)| a).collect()
    }
}

impl SinkFactory for HeadlessSinkFactory {
    fn create(
        &self,
        target: &SinkTarget,
        locator: &StreamLocator,
        _policy: &PlaybackPolicy,
    ) -> anyhow::Result<Box<dyn VideoSink>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let attachment = Attachment {
            target: target.clone(),
            locator: locator.clone(),
        };
        self.live
            .lock()
            .map_err(|_| anyhow::anyhow!("sink registry poisoned"))?
            .insert(id, attachment);
        log::info!("attached {} -> {locator}", target_label(target));
        Ok(Box::new(HeadlessSink {
            id,
            locator: locator.clone(),
            live: self.live.clone(),
        }))
    }
}

struct HeadlessSink {
    id: u64,
    locator: StreamLocator,
    live: Registry,
}

impl VideoSink for HeadlessSink {
    fn locator(&self) -> &StreamLocator {
        &self.locator
    }

    fn set_source(&mut self, locator: &StreamLocator) -> anyhow::Result<()> {
        let mut live = self
            .live
            .lock()
            .map_err(|_| anyhow::anyhow!("sink registry poisoned"))?;
        if let Some(a) = live.get_mut(&self.id) {
            a.locator = locator.clone();
        }
        self.locator = locator.clone();
        Ok(())
    }

    fn dispose(self: Box<Self>) {
        if let Ok(mut live) = self.live.lock() {
            if let Some(a) = live.remove(&self.id) {
                log::info!("detached {}", target_label(&a.target));
            }
        }
    }
}

/// Whether `player` is ffplay, the only player whose flags are known.
fn is_ffplay(player: &PlayerConfig) -> bool {
    Path::new(&player.program)
        .file_stem()
        .is_some_and(|stem| stem.eq_ignore_ascii_case("ffplay"))
}

/// Player command line: configured args, then for ffplay the policy flags and
/// window title, then the locator. Other players get only their configured
/// args and the locator.
pub fn player_args(
    player: &PlayerConfig,
    target: &SinkTarget,
    locator: &StreamLocator,
    policy: &PlaybackPolicy,
) -> Vec<String> {
    let mut args = player.args.clone();
    if is_ffplay(player) {
        if policy.muted {
            args.push("-an".into());
        }
        if policy.low_latency {
            args.extend(["-fflags", "nobuffer", "-flags", "low_delay"].map(String::from));
        }
        args.push("-window_title".into());
        args.push(target_label(target));
    } else {
        log::debug!("{}: playback policy not mapped; passing configured args only", player.program);
    }
    if !policy.autoplay {
        log::debug!("external players always start playing; autoplay=false ignored");
    }
    args.push(locator.as_str().to_string());
    args
}

#[derive(Debug, Clone)]
pub struct PlayerSinkFactory {
    player: PlayerConfig,
}

impl PlayerSinkFactory {
    pub fn new(player: PlayerConfig) -> Self {
        Self { player }
    }
}

impl SinkFactory for PlayerSinkFactory {
    fn create(
        &self,
        target: &SinkTarget,
        locator: &StreamLocator,
        policy: &PlaybackPolicy,
    ) -> anyhow::Result<Box<dyn VideoSink>> {
        let sink = PlayerSink::launch(self.player.clone(), target.clone(), locator.clone(), *policy)?;
        Ok(Box::new(sink))
    }
}

/// One external player process. Replacing the source relaunches the process
/// behind the same handle.
pub struct PlayerSink {
    player: PlayerConfig,
    target: SinkTarget,
    locator: StreamLocator,
    policy: PlaybackPolicy,
    child: Child,
}

impl PlayerSink {
    pub fn launch(
        player: PlayerConfig,
        target: SinkTarget,
        locator: StreamLocator,
        policy: PlaybackPolicy,
    ) -> anyhow::Result<Self> {
        let child = spawn_player(&player, &target, &locator, &policy)?;
        Ok(Self {
            player,
            target,
            locator,
            policy,
            child,
        })
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

fn spawn_player(
    player: &PlayerConfig,
    target: &SinkTarget,
    locator: &StreamLocator,
    policy: &PlaybackPolicy,
) -> anyhow::Result<Child> {
    let args = player_args(player, target, locator, policy);
    let child = Command::new(&player.program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawn player {}", player.program))?;
    log::info!(
        "player started for {} (pid {:?})",
        target_label(target),
        child.id()
    );
    Ok(child)
}

impl VideoSink for PlayerSink {
    fn locator(&self) -> &StreamLocator {
        &self.locator
    }

    /// The old process is killed before the new one starts, so one target
    /// never has two players.
    fn set_source(&mut self, locator: &StreamLocator) -> anyhow::Result<()> {
        if let Err(e) = self.child.start_kill() {
            log::debug!("player for {} already gone: {e}", target_label(&self.target));
        }
        self.child = spawn_player(&self.player, &self.target, locator, &self.policy)?;
        self.locator = locator.clone();
        Ok(())
    }

    fn dispose(mut self: Box<Self>) {
        if let Err(e) = self.child.start_kill() {
            log::debug!("player for {} already gone: {e}", target_label(&self.target));
        }
    }
}
