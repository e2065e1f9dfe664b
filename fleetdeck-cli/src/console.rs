use anyhow::{Context, anyhow};
use fleetdeck_core::DeviceAddress;
use fleetdeck_runtime::driver::FleetHandle;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::render::{render_audio, render_fleet};

const HELP: &str = "\
commands:
  status                      fleet overview
  select <addr> | deselect <addr>
  show <addr> | hide <addr>   toggle a live view
  start | stop                recording session over the selection
  poll                        request a status snapshot now
  settings                    push settings to the selection (or everyone)
  audio                       audio overview
  audio-refresh               ask for the audio device list
  audio-select <index>
  audio-channels <n,n,...>    empty to reset
  audio-start | audio-stop
  camera | camera-off         local camera preview
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Status,
    Select(DeviceAddress, bool),
    Visible(DeviceAddress, bool),
    Start,
    Stop,
    Poll,
    Settings,
    Audio,
    AudioRefresh,
    AudioSelect(u32),
    AudioChannels(Vec<u16>),
    AudioStart,
    AudioStop,
    CameraOn,
    CameraOff,
    Quit,
}

pub fn parse_line(line: &str) -> anyhow::Result<Option<ConsoleCommand>> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();
    let addr = || {
        arg.map(DeviceAddress::new)
            .ok_or_else(|| anyhow!("{cmd}: missing device address"))
    };

    let parsed = match cmd {
        "help" | "?" => ConsoleCommand::Help,
        "status" | "ls" => ConsoleCommand::Status,
        "select" => ConsoleCommand::Select(addr()?, true),
        "deselect" => ConsoleCommand::Select(addr()?, false),
        "show" => ConsoleCommand::Visible(addr()?, true),
        "hide" => ConsoleCommand::Visible(addr()?, false),
        "start" => ConsoleCommand::Start,
        "stop" => ConsoleCommand::Stop,
        "poll" => ConsoleCommand::Poll,
        "settings" => ConsoleCommand::Settings,
        "audio" => ConsoleCommand::Audio,
        "audio-refresh" => ConsoleCommand::AudioRefresh,
        "audio-select" => {
            let raw = arg.ok_or_else(|| anyhow!("audio-select: missing device index"))?;
            ConsoleCommand::AudioSelect(
                raw.parse()
                    .with_context(|| format!("audio-select: bad index {raw:?}"))?,
            )
        }
        "audio-channels" => {
            let channels = arg
                .unwrap_or_default()
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    s.trim()
                        .parse::<u16>()
                        .with_context(|| format!("audio-channels: bad channel {s:?}"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            ConsoleCommand::AudioChannels(channels)
        }
        "audio-start" => ConsoleCommand::AudioStart,
        "audio-stop" => ConsoleCommand::AudioStop,
        "camera" => ConsoleCommand::CameraOn,
        "camera-off" => ConsoleCommand::CameraOff,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(anyhow!("unknown command: {other} (try `help`)")),
    };
    Ok(Some(parsed))
}

/// Runs one command. Returns `false` when the console should exit.
async fn execute(handle: &FleetHandle, cmd: ConsoleCommand) -> anyhow::Result<bool> {
    match cmd {
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Status => print!("{}", render_fleet(&handle.view())),
        ConsoleCommand::Select(addr, on) => handle.select_device(addr, on).await?,
        ConsoleCommand::Visible(addr, on) => handle.set_visible(addr, on).await?,
        ConsoleCommand::Start => handle.start_recording().await?,
        ConsoleCommand::Stop => handle.stop_recording().await?,
        ConsoleCommand::Poll => handle.request_snapshot().await?,
        ConsoleCommand::Settings => handle.update_all_settings().await?,
        ConsoleCommand::Audio => print!("{}", render_audio(&handle.view())),
        ConsoleCommand::AudioRefresh => handle.refresh_audio_devices().await?,
        ConsoleCommand::AudioSelect(index) => handle.select_audio_device(index).await?,
        ConsoleCommand::AudioChannels(channels) => handle.select_audio_channels(channels).await?,
        ConsoleCommand::AudioStart => handle.start_audio().await?,
        ConsoleCommand::AudioStop => {
            let secs = handle.stop_audio().await?;
            println!("stopped after {}", fleetdeck_core::format_elapsed(secs));
        }
        ConsoleCommand::CameraOn => println!("{:?}", handle.attach_local_camera().await?),
        ConsoleCommand::CameraOff => handle.detach_local_camera().await?,
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

pub async fn run_console(handle: &FleetHandle) -> anyhow::Result<()> {
    println!("fleetdeck console; `help` for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let cmd = match parse_line(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e:#}");
                continue;
            }
        };
        match execute(handle, cmd).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_commands() {
        assert_eq!(
            parse_line("select 172.21.100.51").unwrap(),
            Some(ConsoleCommand::Select(DeviceAddress::new("172.21.100.51"), true))
        );
        assert_eq!(
            parse_line("  hide 10.0.0.2 ").unwrap(),
            Some(ConsoleCommand::Visible(DeviceAddress::new("10.0.0.2"), false))
        );
        assert!(parse_line("select").is_err());
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn parses_audio_commands() {
        assert_eq!(
            parse_line("audio-channels 1,3").unwrap(),
            Some(ConsoleCommand::AudioChannels(vec![1, 3]))
        );
        assert_eq!(
            parse_line("audio-channels").unwrap(),
            Some(ConsoleCommand::AudioChannels(vec![]))
        );
        assert!(parse_line("audio-channels 1,x").is_err());
        assert_eq!(
            parse_line("audio-select 4").unwrap(),
            Some(ConsoleCommand::AudioSelect(4))
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = parse_line("launch").unwrap_err();
        assert!(err.to_string().contains("unknown command"));
    }
}
