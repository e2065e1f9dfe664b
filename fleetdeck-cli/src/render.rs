use fleetdeck_core::{Connectivity, DeviceRecordingState, StreamReadiness};
use fleetdeck_engine::audio::AudioAvailability;
use fleetdeck_engine::engine::FleetView;
use fleetdeck_engine::media::LocalFeed;
use std::fmt::Write;

fn connectivity(c: Connectivity) -> &'static str {
    match c {
        Connectivity::Connected => "online",
        Connectivity::Disconnected => "offline",
    }
}

fn recording(r: DeviceRecordingState) -> &'static str {
    match r {
        DeviceRecordingState::Idle => "idle",
        DeviceRecordingState::Recording => "REC",
        DeviceRecordingState::Error => "ERROR",
    }
}

fn readiness(r: StreamReadiness) -> &'static str {
    match r {
        StreamReadiness::Unknown => "-",
        StreamReadiness::Checking => "checking",
        StreamReadiness::Ready => "ready",
        StreamReadiness::Unreachable => "unreachable",
    }
}

pub fn render_fleet(view: &FleetView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "session: {}", view.session.label());
    if view.devices.is_empty() {
        let _ = writeln!(out, "  (no devices seen yet)");
    }
    for d in &view.devices {
        let live = view.live_views.contains(&d.address);
        let _ = writeln!(
            out,
            "  {sel} {addr:<18} {conn:<8} {rec:<6} stream:{ready:<11}{live}{hidden}",
            sel = if d.selected { "[x]" } else { "[ ]" },
            addr = d.address.as_str(),
            conn = connectivity(d.connectivity),
            rec = recording(d.recording),
            ready = readiness(d.readiness),
            live = if live { " LIVE" } else { "" },
            hidden = if d.visible { "" } else { " (hidden)" },
        );
    }
    match &view.local_feed {
        LocalFeed::Off => {}
        LocalFeed::Live(loc) => {
            let _ = writeln!(out, "local camera: live ({loc})");
        }
        LocalFeed::Unavailable(reason) => {
            let _ = writeln!(out, "local camera: unavailable ({reason})");
        }
    }
    out
}

pub fn render_audio(view: &FleetView) -> String {
    let audio = &view.audio;
    let mut out = String::new();
    match audio.availability {
        AudioAvailability::Unknown => {
            let _ = writeln!(out, "audio: waiting for device list");
        }
        AudioAvailability::Unavailable => {
            let _ = writeln!(out, "audio: unavailable (no input devices)");
        }
        AudioAvailability::Available => {
            for d in &audio.devices {
                let sel = audio.selected.as_ref().is_some_and(|s| s.index == d.index);
                let _ = writeln!(
                    out,
                    "  {} #{:<3} {} ({} ch)",
                    if sel { "*" } else { " " },
                    d.index,
                    d.name,
                    d.channel_count
                );
            }
        }
    }
    if audio.recording {
        let _ = writeln!(out, "audio recording: {}", audio.elapsed);
    } else if let Some(total) = &audio.final_elapsed {
        let _ = writeln!(out, "last take: {total}");
    }
    if let Some(path) = &audio.artifact_path {
        let _ = writeln!(out, "saved: {path}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetdeck_core::{AudioDevice, DeviceAddress, DeviceRecord};
    use fleetdeck_engine::session::SessionState;

    #[test]
    fn renders_devices_with_live_marker() {
        let mut rec = DeviceRecord::new(DeviceAddress::new("10.0.0.1"));
        rec.connectivity = Connectivity::Connected;
        rec.recording = DeviceRecordingState::Recording;
        rec.readiness = StreamReadiness::Ready;
        rec.selected = true;
        rec.visible = true;

        let view = FleetView {
            session: SessionState::Recording,
            live_views: vec![rec.address.clone()],
            devices: vec![rec],
            ..FleetView::default()
        };
        let text = render_fleet(&view);
        assert!(text.starts_with("session: recording"));
        assert!(text.contains("[x] 10.0.0.1"));
        assert!(text.contains("REC"));
        assert!(text.contains("LIVE"));
    }

    #[test]
    fn renders_audio_take() {
        let mut view = FleetView::default();
        view.audio.availability = AudioAvailability::Available;
        view.audio.devices = vec![AudioDevice {
            index: 2,
            name: "USB".into(),
            channel_count: 2,
        }];
        view.audio.final_elapsed = Some("01:01".into());
        let text = render_audio(&view);
        assert!(text.contains("#2"));
        assert!(text.contains("last take: 01:01"));
    }
}
