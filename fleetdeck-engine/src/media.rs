use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use fleetdeck_core::{
    DeviceAddress, DeviceRecord, PlaybackPolicy, StreamEndpoints, StreamLocator, StreamReadiness,
};
use serde::Serialize;

use crate::fleet::FleetReconciler;
use crate::traits::{LocalCamera, SinkFactory, SinkTarget, VideoSink};

/// State of the local camera preview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum LocalFeed {
    #[default]
    Off,
    Live(StreamLocator),
    Unavailable(String),
}

/// Media Session Manager. Sole owner of every live sink.
///
/// A device has a sink exactly when it is `Ready`, visible, and a streaming
/// session is active. Sinks are never duplicated: a stale one is disposed and
/// removed before a new one is considered.
pub struct MediaSessionManager {
    factory: Arc<dyn SinkFactory>,
    policy: PlaybackPolicy,
    endpoints: StreamEndpoints,
    sinks: HashMap<DeviceAddress, Box<dyn VideoSink>>,
    // Wanted a sink but the factory refused; retried by `retry_pending`.
    pending: BTreeSet<DeviceAddress>,

    local: Option<Box<dyn VideoSink>>,
    local_feed: LocalFeed,
}

impl MediaSessionManager {
    pub fn new(factory: Arc<dyn SinkFactory>, policy: PlaybackPolicy, endpoints: StreamEndpoints) -> Self {
        Self {
            factory,
            policy,
            endpoints,
            sinks: HashMap::new(),
            pending: BTreeSet::new(),
            local: None,
            local_feed: LocalFeed::Off,
        }
    }

    pub fn live_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn has_sink(&self, address: &DeviceAddress) -> bool {
        self.sinks.contains_key(address)
    }

    pub fn sink_locator(&self, address: &DeviceAddress) -> Option<&StreamLocator> {
        self.sinks.get(address).map(|s| s.locator())
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn live_addresses(&self) -> Vec<DeviceAddress> {
        let mut out: Vec<_> = self.sinks.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn local_feed(&self) -> &LocalFeed {
        &self.local_feed
    }

    /// Explicit locator from the coordinator, or the derived playlist.
    pub fn locator_for(&self, rec: &DeviceRecord) -> StreamLocator {
        rec.stream
            .clone()
            .unwrap_or_else(|| self.endpoints.playlist(&rec.address))
    }

    /// Recomputes the sink predicate for `addresses` only.
    pub fn reconcile(&mut self, addresses: &[DeviceAddress], fleet: &FleetReconciler, streaming: bool) {
        for addr in addresses {
            let wanted = fleet.get(addr).filter(|rec| {
                streaming && rec.visible && rec.readiness == StreamReadiness::Ready
            });

            let Some(rec) = wanted else {
                self.pending.remove(addr);
                if let Some(sink) = self.sinks.remove(addr) {
                    log::info!("live view closed: {addr}");
                    sink.dispose();
                }
                continue;
            };

            let locator = self.locator_for(rec);
            if let Some(sink) = self.sinks.get_mut(addr) {
                if sink.locator() == &locator {
                    continue;
                }
                log::info!("live view source changed: {addr} -> {locator}");
                if let Err(e) = sink.set_source(&locator) {
                    log::warn!("could not switch live view source for {addr}: {e:#}");
                    if let Some(sink) = self.sinks.remove(addr) {
                        sink.dispose();
                    }
                }
                continue;
            }

            match self
                .factory
                .create(&SinkTarget::Device(addr.clone()), &locator, &self.policy)
            {
                Ok(sink) => {
                    log::info!("live view opened: {addr} ({locator})");
                    self.pending.remove(addr);
                    self.sinks.insert(addr.clone(), sink);
                }
                Err(e) => {
                    log::warn!("could not open live view for {addr}: {e:#}");
                    self.pending.insert(addr.clone());
                }
            }
        }
    }

    /// Reconciles the devices whose sink could not be created. Returns whether
    /// any of them got a sink or stopped wanting one.
    pub fn retry_pending(&mut self, fleet: &FleetReconciler, streaming: bool) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let before = self.pending.len();
        let addrs: Vec<DeviceAddress> = self.pending.iter().cloned().collect();
        self.reconcile(&addrs, fleet, streaming);
        self.pending.len() != before
    }

    /// Disposes every device sink, regardless of visibility. Returns how many
    /// were disposed.
    pub fn teardown_all(&mut self) -> usize {
        self.pending.clear();
        let n = self.sinks.len();
        for (addr, sink) in self.sinks.drain() {
            log::debug!("disposing live view: {addr}");
            sink.dispose();
        }
        if n > 0 {
            log::info!("closed {n} live view(s)");
        }
        n
    }

    /// Opens the local preview. Failure degrades to [`LocalFeed::Unavailable`].
    pub fn attach_local_camera(&mut self, camera: &dyn LocalCamera) -> &LocalFeed {
        self.detach_local_camera();

        let opened = camera.open().and_then(|locator| {
            self.factory
                .create(&SinkTarget::LocalCamera, &locator, &self.policy)
                .map(|sink| (locator, sink))
        });
        self.local_feed = match opened {
            Ok((locator, sink)) => {
                log::info!("local camera live: {locator}");
                self.local = Some(sink);
                LocalFeed::Live(locator)
            }
            Err(e) => {
                log::warn!("local camera unavailable: {e:#}");
                LocalFeed::Unavailable(format!("{e:#}"))
            }
        };
        &self.local_feed
    }

    pub fn detach_local_camera(&mut self) {
        if let Some(sink) = self.local.take() {
            sink.dispose();
        }
        self.local_feed = LocalFeed::Off;
    }
}

impl Drop for MediaSessionManager {
    fn drop(&mut self) {
        self.teardown_all();
        self.detach_local_camera();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use fleetdeck_core::Connectivity;
    use fleetdeck_core::protocol::StatusUpdate;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Create(String),
        SetSource(String),
        Dispose(String),
    }

    #[derive(Default)]
    struct Log {
        calls: Mutex<Vec<Call>>,
        fail_create: Mutex<bool>,
    }

    struct FakeSink {
        locator: StreamLocator,
        log: Arc<Log>,
    }

    impl VideoSink for FakeSink {
        fn locator(&self) -> &StreamLocator {
            &self.locator
        }

        fn set_source(&mut self, locator: &StreamLocator) -> anyhow::Result<()> {
            self.log.calls.lock().unwrap().push(Call::SetSource(locator.to_string()));
            self.locator = locator.clone();
            Ok(())
        }

        fn dispose(self: Box<Self>) {
            self.log.calls.lock().unwrap().push(Call::Dispose(self.locator.to_string()));
        }
    }

    struct FakeFactory(Arc<Log>);

    impl SinkFactory for FakeFactory {
        fn create(
            &self,
            _target: &SinkTarget,
            locator: &StreamLocator,
            _policy: &PlaybackPolicy,
        ) -> anyhow::Result<Box<dyn VideoSink>> {
            if *self.0.fail_create.lock().unwrap() {
                return Err(anyhow!("no decoder"));
            }
            self.0.calls.lock().unwrap().push(Call::Create(locator.to_string()));
            Ok(Box::new(FakeSink {
                locator: locator.clone(),
                log: self.0.clone(),
            }))
        }
    }

    struct Camera(Option<&'static str>);

    impl LocalCamera for Camera {
        fn open(&self) -> anyhow::Result<StreamLocator> {
            self.0
                .map(StreamLocator::new)
                .ok_or_else(|| anyhow!("no camera attached"))
        }
    }

    fn setup() -> (Arc<Log>, MediaSessionManager, FleetReconciler) {
        let log = Arc::new(Log::default());
        let mgr = MediaSessionManager::new(
            Arc::new(FakeFactory(log.clone())),
            PlaybackPolicy::default(),
            StreamEndpoints::new("http://h"),
        );
        let mut fleet = FleetReconciler::new();
        fleet.apply_status(
            vec![StatusUpdate {
                address: DeviceAddress::new("1.1.1.1"),
                connectivity: Some(Connectivity::Connected),
                recording: None,
                stream: None,
            }],
            true,
        );
        let a = DeviceAddress::new("1.1.1.1");
        let rec = fleet.record_mut(&a).unwrap();
        rec.readiness = StreamReadiness::Ready;
        rec.visible = true;
        (log, mgr, fleet)
    }

    #[test]
    fn creates_once_while_predicate_holds() {
        let (log, mut mgr, fleet) = setup();
        let a = [DeviceAddress::new("1.1.1.1")];
        mgr.reconcile(&a, &fleet, true);
        mgr.reconcile(&a, &fleet, true);
        assert_eq!(mgr.live_count(), 1);
        assert_eq!(
            *log.calls.lock().unwrap(),
            vec![Call::Create("http://h/hls_streams/gopro_1_1_1_1.m3u8".into())]
        );
    }

    #[test]
    fn visibility_toggle_disposes_then_recreates() {
        let (log, mut mgr, mut fleet) = setup();
        let a = DeviceAddress::new("1.1.1.1");
        mgr.reconcile(std::slice::from_ref(&a), &fleet, true);

        fleet.set_visible(&a, false).unwrap();
        mgr.reconcile(std::slice::from_ref(&a), &fleet, true);
        assert_eq!(mgr.live_count(), 0);

        fleet.set_visible(&a, true).unwrap();
        mgr.reconcile(std::slice::from_ref(&a), &fleet, true);
        assert_eq!(mgr.live_count(), 1);

        let calls = log.calls.lock().unwrap();
        let kinds: Vec<_> = calls
            .iter()
            .map(|c| match c {
                Call::Create(_) => "create",
                Call::SetSource(_) => "set_source",
                Call::Dispose(_) => "dispose",
            })
            .collect();
        assert_eq!(kinds, vec!["create", "dispose", "create"]);
    }

    #[test]
    fn locator_change_updates_in_place() {
        let (log, mut mgr, mut fleet) = setup();
        let a = DeviceAddress::new("1.1.1.1");
        mgr.reconcile(std::slice::from_ref(&a), &fleet, true);

        fleet.record_mut(&a).unwrap().stream = Some(StreamLocator::new("http://h/other.m3u8"));
        mgr.reconcile(std::slice::from_ref(&a), &fleet, true);

        assert_eq!(mgr.live_count(), 1);
        assert_eq!(mgr.sink_locator(&a).unwrap().as_str(), "http://h/other.m3u8");
        let calls = log.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], Call::SetSource("http://h/other.m3u8".into()));
    }

    #[test]
    fn session_end_tears_down_visible_sinks() {
        let (_log, mut mgr, fleet) = setup();
        let a = DeviceAddress::new("1.1.1.1");
        mgr.reconcile(std::slice::from_ref(&a), &fleet, true);
        assert_eq!(mgr.teardown_all(), 1);
        assert!(fleet.get(&a).unwrap().visible);

        mgr.reconcile(std::slice::from_ref(&a), &fleet, false);
        assert_eq!(mgr.live_count(), 0);
    }

    #[test]
    fn create_failure_leaves_no_sink() {
        let (log, mut mgr, fleet) = setup();
        *log.fail_create.lock().unwrap() = true;
        mgr.reconcile(&[DeviceAddress::new("1.1.1.1")], &fleet, true);
        assert_eq!(mgr.live_count(), 0);
        assert!(mgr.has_pending());
    }

    #[test]
    fn failed_create_is_retried_until_it_succeeds() {
        let (log, mut mgr, fleet) = setup();
        *log.fail_create.lock().unwrap() = true;
        mgr.reconcile(&[DeviceAddress::new("1.1.1.1")], &fleet, true);

        assert!(!mgr.retry_pending(&fleet, true));
        assert_eq!(mgr.live_count(), 0);

        *log.fail_create.lock().unwrap() = false;
        assert!(mgr.retry_pending(&fleet, true));
        assert_eq!(mgr.live_count(), 1);
        assert!(!mgr.has_pending());
        assert!(!mgr.retry_pending(&fleet, true));
    }

    #[test]
    fn pending_retry_is_dropped_when_session_ends() {
        let (log, mut mgr, fleet) = setup();
        *log.fail_create.lock().unwrap() = true;
        mgr.reconcile(&[DeviceAddress::new("1.1.1.1")], &fleet, true);
        *log.fail_create.lock().unwrap() = false;

        assert!(mgr.retry_pending(&fleet, false));
        assert_eq!(mgr.live_count(), 0);
        assert!(!mgr.has_pending());
    }

    #[test]
    fn local_camera_degrades_to_unavailable() {
        let (_log, mut mgr, _fleet) = setup();
        assert!(matches!(
            mgr.attach_local_camera(&Camera(None)),
            LocalFeed::Unavailable(reason) if reason.contains("no camera")
        ));

        assert_eq!(
            mgr.attach_local_camera(&Camera(Some("/dev/video0"))),
            &LocalFeed::Live(StreamLocator::new("/dev/video0"))
        );
        mgr.detach_local_camera();
        assert_eq!(mgr.local_feed(), &LocalFeed::Off);
    }
}
