use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use grid_core::{
    parse_game_radius, EntitySnapshot, PointerState, SamplingScheduler, SchedulerState,
    SchedulerStats, TickOutcome,
};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    sink::FrameSink,
    source::{SnapshotSource, SourceReading},
};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug)]
pub struct CollectorOptions {
    /// Start when an observer appears and stop when it disappears.
    pub auto_start: bool,
    pub send_timeout: Duration,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            auto_start: false,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollectorStatus {
    pub state: SchedulerState,
    pub session_id: Option<String>,
    pub game_radius: Option<f64>,
    pub stats: SchedulerStats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Control {
    Idle,
    Collecting,
    Shutdown,
}

pub struct CollectorHandle {
    control: watch::Sender<Control>,
    status: watch::Receiver<CollectorStatus>,
    task: JoinHandle<()>,
}

impl CollectorHandle {
    pub fn start(&self) {
        self.control.send_replace(Control::Collecting);
    }

    pub fn stop(&self) {
        self.control.send_replace(Control::Idle);
    }

    pub fn status(&self) -> CollectorStatus {
        self.status.borrow().clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.status.borrow().stats
    }

    pub fn subscribe(&self) -> watch::Receiver<CollectorStatus> {
        self.status.clone()
    }

    /// Stop the timer loop. In-flight sends are left to finish on their own.
    pub async fn shutdown(self) {
        self.control.send_replace(Control::Shutdown);
        if let Err(err) = self.task.await {
            warn!("collector task ended abnormally: {err}");
        }
    }
}

pub struct Collector;

impl Collector {
    pub fn spawn<S, K>(
        scheduler: SamplingScheduler,
        source: S,
        sink: K,
        options: CollectorOptions,
    ) -> CollectorHandle
    where
        S: SnapshotSource,
        K: FrameSink,
    {
        let (control_tx, control_rx) = watch::channel(Control::Idle);
        let (status_tx, status_rx) = watch::channel(status_of(&scheduler));
        let task = tokio::spawn(run_loop(
            scheduler,
            source,
            Arc::new(sink),
            options,
            control_rx,
            status_tx,
        ));
        CollectorHandle {
            control: control_tx,
            status: status_rx,
            task,
        }
    }
}

async fn run_loop<S: SnapshotSource>(
    mut scheduler: SamplingScheduler,
    mut source: S,
    sink: Arc<dyn FrameSink>,
    options: CollectorOptions,
    mut control: watch::Receiver<Control>,
    status: watch::Sender<CollectorStatus>,
) {
    let (failure_tx, mut failure_rx) = mpsc::unbounded_channel::<()>();
    let mut ticker = interval(scheduler.config().tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        rate_hz = scheduler.config().sample_rate_hz,
        auto_start = options.auto_start,
        "collector loop started"
    );

    loop {
        tokio::select! {
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                let command = *control.borrow_and_update();
                match command {
                    Control::Shutdown => break,
                    Control::Collecting => {
                        if scheduler.state() == SchedulerState::Idle {
                            begin_session(&mut scheduler);
                        }
                    }
                    Control::Idle => end_session(&mut scheduler),
                }
            }
            Some(()) = failure_rx.recv() => {
                scheduler.record_transport_error();
            }
            _ = ticker.tick() => {
                let reading = source.read();
                if let Some(packet) = source.take_setup_packet() {
                    learn_radius(&mut scheduler, &packet);
                }
                if options.auto_start {
                    follow_activity(&mut scheduler, reading.as_ref());
                }
                tick_once(&mut scheduler, reading, &sink, options.send_timeout, &failure_tx);
            }
        }
        status.send_replace(status_of(&scheduler));
    }

    end_session(&mut scheduler);
    status.send_replace(status_of(&scheduler));
    info!("collector loop stopped");
}

fn tick_once(
    scheduler: &mut SamplingScheduler,
    reading: Option<SourceReading>,
    sink: &Arc<dyn FrameSink>,
    send_timeout: Duration,
    failures: &mpsc::UnboundedSender<()>,
) {
    let (snapshot, pointer) = match reading {
        Some(reading) => (reading.snapshot, reading.pointer),
        None => (EntitySnapshot::default(), PointerState::default()),
    };

    match scheduler.tick(now_ms(), &snapshot, &pointer) {
        TickOutcome::Idle | TickOutcome::Skipped => {}
        TickOutcome::Failed(err) => {
            warn!(error = %err, "tick failed");
        }
        TickOutcome::Emitted(frame) => {
            let sink = Arc::clone(sink);
            let failures = failures.clone();
            let frame_index = frame.frame_index;
            tokio::spawn(async move {
                let result = tokio::time::timeout(send_timeout, sink.send(frame)).await;
                let reason = match result {
                    Ok(Ok(())) => return,
                    Ok(Err(err)) => err,
                    Err(_) => format!("timed out after {}ms", send_timeout.as_millis()),
                };
                warn!(frame_index, reason = %reason, "frame dispatch failed");
                let _ = failures.send(());
            });
        }
    }
}

fn follow_activity(scheduler: &mut SamplingScheduler, reading: Option<&SourceReading>) {
    let active = reading.is_some_and(SourceReading::has_observer);
    match (scheduler.state(), active) {
        (SchedulerState::Idle, true) => begin_session(scheduler),
        (SchedulerState::Collecting, false) => end_session(scheduler),
        _ => {}
    }
}

fn begin_session(scheduler: &mut SamplingScheduler) {
    let session_id = scheduler.start(now_ms()).to_string();
    info!(session_id = %session_id, "collection started");
}

fn end_session(scheduler: &mut SamplingScheduler) {
    let Some(session_id) = scheduler.session_id().map(str::to_string) else {
        return;
    };
    let stats = scheduler.stats();
    scheduler.stop();
    info!(
        session_id = %session_id,
        frames = stats.frames_emitted,
        skipped = stats.ticks_skipped,
        tick_errors = stats.tick_errors,
        transport_errors = stats.transport_errors,
        "collection stopped"
    );
}

fn learn_radius(scheduler: &mut SamplingScheduler, packet: &[u8]) {
    match parse_game_radius(packet) {
        Some(radius) => {
            scheduler.learn_game_radius(radius);
            info!(radius, "learned game radius");
        }
        None => debug!(len = packet.len(), "ignoring non-setup packet"),
    }
}

fn status_of(scheduler: &SamplingScheduler) -> CollectorStatus {
    CollectorStatus {
        state: scheduler.state(),
        session_id: scheduler.session_id().map(str::to_string),
        game_radius: scheduler.game_radius(),
        stats: scheduler.stats(),
    }
}

pub fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, SendFuture};
    use grid_core::snapshot::{Food, Observer};
    use grid_core::CollectionConfig;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_scheduler() -> SamplingScheduler {
        let config = CollectionConfig {
            sample_rate_hz: 50,
            ..CollectionConfig::default()
        };
        SamplingScheduler::new(config).unwrap()
    }

    fn reading() -> SourceReading {
        SourceReading {
            snapshot: EntitySnapshot {
                observer: Some(Observer {
                    id: Some(1),
                    x: Some(10_000.0),
                    y: Some(10_000.0),
                    heading: Some(0.0),
                    ..Observer::default()
                }),
                bodies: Vec::new(),
                food: vec![Food {
                    x: Some(10_300.0),
                    y: Some(10_000.0),
                    size: Some(2.0),
                }],
            },
            pointer: PointerState::default(),
        }
    }

    /// Shared switch so a test can make the observer disappear.
    #[derive(Clone)]
    struct ToggleSource {
        present: Arc<AtomicBool>,
        packet: Arc<Mutex<Option<Vec<u8>>>>,
    }

    impl ToggleSource {
        fn new(present: bool) -> Self {
            Self {
                present: Arc::new(AtomicBool::new(present)),
                packet: Arc::new(Mutex::new(None)),
            }
        }
    }

    impl SnapshotSource for ToggleSource {
        fn read(&mut self) -> Option<SourceReading> {
            self.present.load(Ordering::SeqCst).then(reading)
        }

        fn take_setup_packet(&mut self) -> Option<Vec<u8>> {
            self.packet.lock().unwrap().take()
        }
    }

    struct FailingSink;

    impl FrameSink for FailingSink {
        fn send(&self, _frame: grid_core::FrameRecord) -> SendFuture {
            Box::pin(async { Err("connection refused".to_string()) })
        }
    }

    async fn wait_for(
        handle: &CollectorHandle,
        predicate: impl FnMut(&CollectorStatus) -> bool,
    ) -> CollectorStatus {
        let mut rx = handle.subscribe();
        let status = tokio::time::timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("status condition not reached in time")
            .expect("collector status channel closed");
        status.clone()
    }

    #[tokio::test]
    async fn explicit_start_emits_frames_in_order() {
        let (sink, mut frames) = ChannelSink::new(64);
        let handle = Collector::spawn(
            fast_scheduler(),
            ToggleSource::new(true),
            sink,
            CollectorOptions::default(),
        );

        handle.start();
        let first = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert!(second.frame_index > first.frame_index);
        assert_eq!(first.debug.splats.food_splats, 1);

        handle.stop();
        let status = wait_for(&handle, |s| s.state == SchedulerState::Idle).await;
        assert!(status.stats.frames_emitted >= 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stays_idle_without_a_start() {
        let (sink, mut frames) = ChannelSink::new(8);
        let handle = Collector::spawn(
            fast_scheduler(),
            ToggleSource::new(true),
            sink,
            CollectorOptions::default(),
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(frames.try_recv().is_err());
        assert_eq!(handle.status().state, SchedulerState::Idle);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn auto_start_follows_observer_presence() {
        let (sink, _frames) = ChannelSink::new(256);
        let source = ToggleSource::new(true);
        let switch = Arc::clone(&source.present);
        let handle = Collector::spawn(
            fast_scheduler(),
            source,
            sink,
            CollectorOptions {
                auto_start: true,
                ..CollectorOptions::default()
            },
        );

        let status = wait_for(&handle, |s| s.stats.frames_emitted >= 1).await;
        assert_eq!(status.state, SchedulerState::Collecting);
        assert!(status.session_id.is_some());

        switch.store(false, Ordering::SeqCst);
        let status = wait_for(&handle, |s| s.state == SchedulerState::Idle).await;
        assert_eq!(status.session_id, None);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn transport_failures_are_counted_not_fatal() {
        let handle = Collector::spawn(
            fast_scheduler(),
            ToggleSource::new(true),
            FailingSink,
            CollectorOptions::default(),
        );
        handle.start();

        let status = wait_for(&handle, |s| s.stats.transport_errors >= 3).await;
        assert_eq!(status.state, SchedulerState::Collecting);
        assert!(status.stats.frames_emitted >= 3);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn setup_packet_feeds_game_radius() {
        let (sink, mut frames) = ChannelSink::new(64);
        let source = ToggleSource::new(true);
        *source.packet.lock().unwrap() = Some(vec![0, 0, b'a', 0x00, 0x40, 0x00]);
        let handle = Collector::spawn(
            fast_scheduler(),
            source,
            sink,
            CollectorOptions::default(),
        );

        wait_for(&handle, |s| s.game_radius == Some(16_384.0)).await;
        handle.start();
        let frame = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
        assert_eq!(frame.metadata.game_radius, 16_384.0);
        assert!(frame.validation.game_radius_known);
        handle.shutdown().await;
    }
}
