use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::{Duration, Instant},
};

use grid_core::FrameRecord;

use crate::store::{FrameStore, SessionClose, SessionInfo};
use crate::validate::{validate_frame, IncomingFrame, RejectReason};
use crate::{now_unix_s, BufferSettings, CloseReason, IngestPolicy, SessionStats, SessionSummary};

/// Unflushed frames a session may hold, in multiples of the flush threshold,
/// before the oldest are dropped.
const MAX_PENDING_FLUSHES: usize = 5;

/// Where a frame came from, as far as the HTTP layer can tell.
#[derive(Debug, Clone)]
pub(crate) struct ClientOrigin {
    pub(crate) ip: String,
}

#[derive(Debug)]
pub(crate) enum IngestOutcome {
    Accepted {
        session_id: String,
        buffered: usize,
        flushed: bool,
    },
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlushReport {
    pub(crate) frames_flushed: usize,
    pub(crate) frames_written: u64,
}

struct SessionBuffer {
    info: SessionInfo,
    frames: Vec<FrameRecord>,
    /// Most recent frame that already left `frames` through a flush.
    last_flushed: Option<FrameRecord>,
    frame_count: u64,
    valid_frames: u64,
    errors: u64,
    frames_written: u64,
    frames_dropped: u64,
    stats: SessionStats,
    last_frame_at: Instant,
    last_frame_time: f64,
    closed: bool,
}

impl SessionBuffer {
    fn new(info: SessionInfo) -> Self {
        let start = info.start_time;
        Self {
            info,
            frames: Vec::new(),
            last_flushed: None,
            frame_count: 0,
            valid_frames: 0,
            errors: 0,
            frames_written: 0,
            frames_dropped: 0,
            stats: SessionStats::default(),
            last_frame_at: Instant::now(),
            last_frame_time: start,
            closed: false,
        }
    }

    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_frame_at) > timeout
    }

    fn latest(&self) -> Option<&FrameRecord> {
        self.frames.last().or(self.last_flushed.as_ref())
    }

    fn summary(&self, now: Instant, timeout: Duration) -> SessionSummary {
        let validity_rate = if self.frame_count == 0 {
            0.0
        } else {
            self.valid_frames as f64 / self.frame_count as f64
        };
        SessionSummary {
            session_id: self.info.session_id.clone(),
            username: self.info.username.clone(),
            client_ip: self.info.client_ip.clone(),
            start_time: self.info.start_time,
            last_frame_time: self.last_frame_time,
            frame_count: self.frame_count,
            valid_frames: self.valid_frames,
            errors: self.errors,
            frames_written: self.frames_written,
            frames_dropped: self.frames_dropped,
            buffer_size: self.frames.len(),
            validity_rate,
            is_expired: self.is_expired(now, timeout),
            stats: self.stats.clone(),
        }
    }
}

/// In-memory frame buffers keyed by session id.
///
/// The map lock is only held to find or remove a session; every per-session
/// mutation, including the flush to storage, happens under that session's
/// own mutex, so sessions never wait on each other's I/O. A closing session
/// stays in the map until its finalize returns, so a late frame for the same
/// id waits on that mutex instead of writing alongside the close.
pub(crate) struct IngestBuffer {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionBuffer>>>>,
    store: Arc<dyn FrameStore>,
    policy: IngestPolicy,
    settings: BufferSettings,
    rejected: AtomicU64,
}

impl IngestBuffer {
    pub(crate) fn new(
        store: Arc<dyn FrameStore>,
        policy: IngestPolicy,
        settings: BufferSettings,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            policy,
            settings,
            rejected: AtomicU64::new(0),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.session_timeout_secs)
    }

    pub(crate) fn ingest(&self, incoming: IncomingFrame, origin: &ClientOrigin) -> IngestOutcome {
        let key = incoming.session_key().map(str::to_string);
        let frame = match validate_frame(incoming, &self.policy) {
            Ok(frame) => frame,
            Err(reason) => {
                self.record_rejection(key.as_deref(), &reason);
                return IngestOutcome::Rejected(reason);
            }
        };

        loop {
            let entry = self.session_entry(&frame, origin);
            let mut session = entry.lock().unwrap();
            if session.closed {
                // Closed between lookup and lock; the next lookup opens a new one.
                drop(session);
                self.remove_if_same(&frame.session_id, &entry);
                continue;
            }

            session.frame_count += 1;
            session.valid_frames += 1;
            let valid_frames = session.valid_frames;
            session.stats.record(&frame, valid_frames);
            session.last_frame_at = Instant::now();
            session.last_frame_time = now_unix_s();
            session.frames.push(frame);

            let flushed = session.frames.len() >= self.settings.buffer_size
                && self.flush_locked(&mut session).is_ok();
            if !flushed {
                self.shed_backlog(&mut session);
            }

            return IngestOutcome::Accepted {
                session_id: session.info.session_id.clone(),
                buffered: session.frames.len(),
                flushed,
            };
        }
    }

    fn session_entry(
        &self,
        frame: &FrameRecord,
        origin: &ClientOrigin,
    ) -> Arc<Mutex<SessionBuffer>> {
        if let Some(entry) = self.sessions.read().unwrap().get(&frame.session_id) {
            return Arc::clone(entry);
        }

        let mut sessions = self.sessions.write().unwrap();
        let entry = sessions
            .entry(frame.session_id.clone())
            .or_insert_with(|| {
                tracing::info!(
                    session_id = %frame.session_id,
                    username = %frame.username,
                    client_ip = %origin.ip,
                    "new session"
                );
                Arc::new(Mutex::new(SessionBuffer::new(SessionInfo {
                    session_id: frame.session_id.clone(),
                    username: frame.username.clone(),
                    client_ip: origin.ip.clone(),
                    start_time: now_unix_s(),
                })))
            });
        Arc::clone(entry)
    }

    fn remove_if_same(&self, session_id: &str, entry: &Arc<Mutex<SessionBuffer>>) {
        let mut sessions = self.sessions.write().unwrap();
        if sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            sessions.remove(session_id);
        }
    }

    /// Drop the oldest unflushed frames once the store has fallen too far behind.
    fn shed_backlog(&self, session: &mut SessionBuffer) {
        let cap = self
            .settings
            .buffer_size
            .max(1)
            .saturating_mul(MAX_PENDING_FLUSHES);
        if session.frames.len() <= cap {
            return;
        }
        let excess = session.frames.len() - cap;
        session.frames.drain(..excess);
        session.frames_dropped += excess as u64;
        tracing::warn!(
            session_id = %session.info.session_id,
            dropped = excess,
            total_dropped = session.frames_dropped,
            pending = cap,
            "store behind, dropping oldest buffered frames"
        );
    }

    fn record_rejection(&self, session_id: Option<&str>, reason: &RejectReason) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        let entry = session_id.and_then(|id| self.sessions.read().unwrap().get(id).cloned());
        if let Some(entry) = entry {
            let mut session = entry.lock().unwrap();
            if !session.closed {
                session.frame_count += 1;
                session.errors += 1;
            }
        }
        tracing::warn!(
            session_id = session_id.unwrap_or("-"),
            code = reason.code(),
            "rejected frame: {reason}"
        );
    }

    /// On failure the buffer is left intact so the next flush retries it in order.
    fn flush_locked(&self, session: &mut SessionBuffer) -> Result<usize, String> {
        if session.frames.is_empty() {
            return Ok(0);
        }
        let count = session.frames.len();
        match self
            .store
            .append(&session.info, &session.frames, &session.stats)
        {
            Ok(total) => {
                session.last_flushed = session.frames.pop();
                session.frames.clear();
                session.frames_written = total;
                tracing::info!(
                    session_id = %session.info.session_id,
                    frames = count,
                    total,
                    "flushed session buffer"
                );
                Ok(count)
            }
            Err(e) => {
                tracing::error!(
                    session_id = %session.info.session_id,
                    frames = count,
                    "flush failed: {e}"
                );
                Err(e)
            }
        }
    }

    /// Flush one active session now. `Ok(None)` when the session is unknown.
    pub(crate) fn flush(&self, session_id: &str) -> Result<Option<FlushReport>, String> {
        let Some(entry) = self.sessions.read().unwrap().get(session_id).cloned() else {
            return Ok(None);
        };
        let mut session = entry.lock().unwrap();
        if session.closed {
            return Ok(None);
        }
        let frames_flushed = self.flush_locked(&mut session)?;
        Ok(Some(FlushReport {
            frames_flushed,
            frames_written: session.frames_written,
        }))
    }

    /// Close every session idle for longer than the timeout as of `now`.
    /// Returns how many were closed.
    pub(crate) fn sweep_expired(&self, now: Instant) -> usize {
        let timeout = self.timeout();
        let candidates: Vec<(String, Arc<Mutex<SessionBuffer>>)> = self
            .sessions
            .read()
            .unwrap()
            .iter()
            // A session whose lock is held is mid-ingest or mid-flush, so not idle.
            .filter(|(_, entry)| {
                entry
                    .try_lock()
                    .is_ok_and(|session| session.is_expired(now, timeout))
            })
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();

        let mut closed = 0;
        for (session_id, entry) in candidates {
            let mut session = entry.lock().unwrap();
            if session.closed || !session.is_expired(now, timeout) {
                continue;
            }
            self.close_locked(&mut session, CloseReason::Expired);
            drop(session);
            self.remove_if_same(&session_id, &entry);
            closed += 1;
        }
        closed
    }

    /// Flush and close every session, for shutdown.
    pub(crate) fn close_all(&self, reason: CloseReason) -> usize {
        let all: Vec<(String, Arc<Mutex<SessionBuffer>>)> = self
            .sessions
            .read()
            .unwrap()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();

        let mut closed = 0;
        for (session_id, entry) in all {
            let mut session = entry.lock().unwrap();
            if !session.closed {
                self.close_locked(&mut session, reason);
                closed += 1;
            }
            drop(session);
            self.remove_if_same(&session_id, &entry);
        }
        closed
    }

    fn close_locked(&self, session: &mut SessionBuffer, reason: CloseReason) {
        if let Err(e) = self.flush_locked(session) {
            tracing::error!(
                session_id = %session.info.session_id,
                lost = session.frames.len(),
                "dropping unflushed frames on close: {e}"
            );
        }
        session.closed = true;

        let close = SessionClose {
            end_time: now_unix_s(),
            reason,
            frame_count: session.frame_count,
            valid_frames: session.valid_frames,
            errors: session.errors,
            stats: session.stats.clone(),
        };
        match self.store.finalize(&session.info, &close) {
            Ok(()) => tracing::info!(
                session_id = %session.info.session_id,
                reason = reason.as_str(),
                frames_written = session.frames_written,
                "session closed"
            ),
            Err(e) => tracing::error!(
                session_id = %session.info.session_id,
                "failed to finalize session: {e}"
            ),
        }
    }

    pub(crate) fn list(&self, now: Instant) -> Vec<SessionSummary> {
        let timeout = self.timeout();
        let entries: Vec<Arc<Mutex<SessionBuffer>>> =
            self.sessions.read().unwrap().values().cloned().collect();
        let mut summaries: Vec<SessionSummary> = entries
            .iter()
            .map(|entry| entry.lock().unwrap().summary(now, timeout))
            .collect();
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        summaries
    }

    pub(crate) fn summary(&self, session_id: &str, now: Instant) -> Option<SessionSummary> {
        let entry = self.sessions.read().unwrap().get(session_id).cloned()?;
        let session = entry.lock().unwrap();
        Some(session.summary(now, self.timeout()))
    }

    /// Most recent frame across all active sessions, by frame timestamp.
    pub(crate) fn latest(&self) -> Option<FrameRecord> {
        let entries: Vec<Arc<Mutex<SessionBuffer>>> =
            self.sessions.read().unwrap().values().cloned().collect();
        entries
            .iter()
            .filter_map(|entry| entry.lock().unwrap().latest().cloned())
            .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))
    }

    pub(crate) fn active_sessions(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub(crate) fn rejected_frames(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::fixtures::{frame_json, incoming, policy};
    use std::sync::{atomic::AtomicBool, mpsc};

    #[derive(Default)]
    struct RecordingStore {
        appends: Mutex<Vec<(String, Vec<u64>)>>,
        finalized: Mutex<Vec<(String, CloseReason, u64, u64)>>,
        fail: AtomicBool,
    }

    impl FrameStore for RecordingStore {
        fn append(
            &self,
            session: &SessionInfo,
            frames: &[FrameRecord],
            _stats: &SessionStats,
        ) -> Result<u64, String> {
            if self.fail.load(Ordering::SeqCst) {
                return Err("disk full".to_string());
            }
            let mut appends = self.appends.lock().unwrap();
            appends.push((
                session.session_id.clone(),
                frames.iter().map(|f| f.frame_index).collect(),
            ));
            Ok(appends
                .iter()
                .filter(|(id, _)| *id == session.session_id)
                .map(|(_, indices)| indices.len() as u64)
                .sum())
        }

        fn finalize(&self, session: &SessionInfo, close: &SessionClose) -> Result<(), String> {
            self.finalized.lock().unwrap().push((
                session.session_id.clone(),
                close.reason,
                close.frame_count,
                close.errors,
            ));
            Ok(())
        }
    }

    /// Logs store calls in order and can hold the first append until released.
    struct GatedStore {
        events: Mutex<Vec<String>>,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        gated: AtomicBool,
    }

    impl FrameStore for GatedStore {
        fn append(
            &self,
            _session: &SessionInfo,
            frames: &[FrameRecord],
            _stats: &SessionStats,
        ) -> Result<u64, String> {
            if self.gated.swap(false, Ordering::SeqCst) {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            let indices: Vec<u64> = frames.iter().map(|f| f.frame_index).collect();
            self.events
                .lock()
                .unwrap()
                .push(format!("append {indices:?}"));
            Ok(indices.len() as u64)
        }

        fn finalize(&self, _session: &SessionInfo, _close: &SessionClose) -> Result<(), String> {
            self.events.lock().unwrap().push("finalize".to_string());
            Ok(())
        }
    }

    fn buffer_with(buffer_size: usize) -> (IngestBuffer, Arc<RecordingStore>) {
        let store = Arc::new(RecordingStore::default());
        let buffer = IngestBuffer::new(
            store.clone(),
            policy(),
            BufferSettings {
                buffer_size,
                session_timeout_secs: 30,
            },
        );
        (buffer, store)
    }

    fn origin() -> ClientOrigin {
        ClientOrigin {
            ip: "10.0.0.7".to_string(),
        }
    }

    fn send(buffer: &IngestBuffer, session: &str, index: u64) -> IngestOutcome {
        buffer.ingest(incoming(frame_json(session, index)), &origin())
    }

    fn too_fast(session: &str, index: u64) -> IncomingFrame {
        let mut value = frame_json(session, index);
        value["metadata"]["velocity"] = serde_json::json!(5000.0);
        incoming(value)
    }

    #[test]
    fn flushes_exactly_once_at_threshold_in_order() {
        let (buffer, store) = buffer_with(5);
        for index in 0..4 {
            match send(&buffer, "s1", index) {
                IngestOutcome::Accepted {
                    buffered, flushed, ..
                } => {
                    assert_eq!(buffered, index as usize + 1);
                    assert!(!flushed);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(store.appends.lock().unwrap().is_empty());

        match send(&buffer, "s1", 4) {
            IngestOutcome::Accepted {
                session_id,
                buffered,
                flushed,
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(buffered, 0);
                assert!(flushed);
            }
            other => panic!("unexpected {other:?}"),
        }

        let appends = store.appends.lock().unwrap();
        assert_eq!(appends.len(), 1);
        assert_eq!(appends[0], ("s1".to_string(), vec![0, 1, 2, 3, 4]));

        let summary = buffer.summary("s1", Instant::now()).unwrap();
        assert_eq!(summary.buffer_size, 0);
        assert_eq!(summary.frames_written, 5);
    }

    #[test]
    fn rejected_frame_is_never_stored() {
        let (buffer, store) = buffer_with(200);
        send(&buffer, "s1", 0);
        match buffer.ingest(too_fast("s1", 1), &origin()) {
            IngestOutcome::Rejected(reason) => assert_eq!(reason.code(), "velocity_too_high"),
            other => panic!("unexpected {other:?}"),
        }
        send(&buffer, "s1", 2);

        let report = buffer.flush("s1").unwrap().unwrap();
        assert_eq!(report.frames_flushed, 2);
        assert_eq!(
            store.appends.lock().unwrap()[0],
            ("s1".to_string(), vec![0, 2])
        );

        let summary = buffer.summary("s1", Instant::now()).unwrap();
        assert_eq!(summary.frame_count, 3);
        assert_eq!(summary.valid_frames, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(buffer.rejected_frames(), 1);
    }

    #[test]
    fn rejection_for_unknown_session_creates_nothing() {
        let (buffer, _store) = buffer_with(200);
        assert!(matches!(
            buffer.ingest(too_fast("ghost", 0), &origin()),
            IngestOutcome::Rejected(_)
        ));
        assert_eq!(buffer.active_sessions(), 0);
        assert_eq!(buffer.rejected_frames(), 1);
    }

    #[test]
    fn failed_flush_keeps_frames_for_retry() {
        let (buffer, store) = buffer_with(3);
        store.fail.store(true, Ordering::SeqCst);
        for index in 0..3 {
            send(&buffer, "s1", index);
        }
        assert_eq!(buffer.summary("s1", Instant::now()).unwrap().buffer_size, 3);

        store.fail.store(false, Ordering::SeqCst);
        match send(&buffer, "s1", 3) {
            IngestOutcome::Accepted {
                buffered, flushed, ..
            } => {
                assert!(flushed);
                assert_eq!(buffered, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            store.appends.lock().unwrap().as_slice(),
            &[("s1".to_string(), vec![0, 1, 2, 3])]
        );
    }

    #[test]
    fn flush_unknown_session_is_none() {
        let (buffer, _store) = buffer_with(200);
        assert_eq!(buffer.flush("nope").unwrap(), None);
    }

    #[test]
    fn sweep_closes_idle_sessions_and_finalizes() {
        let (buffer, store) = buffer_with(200);
        send(&buffer, "idle", 0);
        send(&buffer, "idle", 1);

        assert_eq!(buffer.sweep_expired(Instant::now()), 0);
        assert_eq!(buffer.active_sessions(), 1);

        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(buffer.sweep_expired(later), 1);
        assert_eq!(buffer.active_sessions(), 0);
        assert_eq!(
            store.appends.lock().unwrap().as_slice(),
            &[("idle".to_string(), vec![0, 1])]
        );
        assert_eq!(
            store.finalized.lock().unwrap().as_slice(),
            &[("idle".to_string(), CloseReason::Expired, 2, 0)]
        );

        // A late frame reopens the session under the same id.
        send(&buffer, "idle", 2);
        assert_eq!(buffer.active_sessions(), 1);
    }

    #[test]
    fn sessions_buffer_independently() {
        let (buffer, store) = buffer_with(2);
        send(&buffer, "a", 0);
        send(&buffer, "b", 0);
        send(&buffer, "a", 1);

        assert_eq!(
            store.appends.lock().unwrap().as_slice(),
            &[("a".to_string(), vec![0, 1])]
        );
        assert_eq!(buffer.summary("b", Instant::now()).unwrap().buffer_size, 1);
        let ids: Vec<String> = buffer
            .list(Instant::now())
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn concurrent_sessions_keep_their_own_order() {
        let (buffer, store) = buffer_with(10);
        std::thread::scope(|scope| {
            for session in ["t0", "t1", "t2", "t3"] {
                let buffer = &buffer;
                scope.spawn(move || {
                    for index in 0..50 {
                        send(buffer, session, index);
                    }
                });
            }
        });

        let appends = store.appends.lock().unwrap();
        assert_eq!(appends.len(), 20);
        for session in ["t0", "t1", "t2", "t3"] {
            let indices: Vec<u64> = appends
                .iter()
                .filter(|(id, _)| id == session)
                .flat_map(|(_, indices)| indices.iter().copied())
                .collect();
            assert_eq!(indices, (0..50).collect::<Vec<u64>>());
        }
    }

    #[test]
    fn stats_follow_accepted_frames() {
        let (buffer, _store) = buffer_with(200);
        send(&buffer, "s1", 0);
        let mut slower = frame_json("s1", 1);
        slower["metadata"]["velocity"] = serde_json::json!(50.0);
        slower["metadata"]["boost"] = serde_json::json!(false);
        buffer.ingest(incoming(slower), &origin());

        let summary = buffer.summary("s1", Instant::now()).unwrap();
        assert!((summary.stats.avg_velocity - 100.0).abs() < 1e-9);
        assert!((summary.stats.boost_time - 0.1).abs() < 1e-9);
        assert_eq!(summary.stats.total_food_seen, 14);
        assert_eq!(summary.stats.total_enemies_seen, 8);
        assert_eq!(summary.stats.game_radius, Some(21_600.0));
        assert_eq!(summary.client_ip, "10.0.0.7");
        assert_eq!(summary.username, "alice");
        assert!((summary.validity_rate - 1.0).abs() < 1e-12);
    }

    #[test]
    fn latest_prefers_newest_timestamp_and_survives_flush() {
        let (buffer, _store) = buffer_with(2);
        assert!(buffer.latest().is_none());

        send(&buffer, "a", 5);
        send(&buffer, "b", 1);
        assert_eq!(buffer.latest().unwrap().session_id, "a");

        send(&buffer, "a", 6);
        let latest = buffer.latest().unwrap();
        assert_eq!(latest.session_id, "a");
        assert_eq!(latest.frame_index, 6);
    }

    #[test]
    fn close_all_flushes_everything() {
        let (buffer, store) = buffer_with(200);
        send(&buffer, "a", 0);
        send(&buffer, "b", 0);
        assert_eq!(buffer.close_all(CloseReason::Shutdown), 2);
        assert_eq!(store.appends.lock().unwrap().len(), 2);
        assert!(store
            .finalized
            .lock()
            .unwrap()
            .iter()
            .all(|(_, reason, _, _)| *reason == CloseReason::Shutdown));
    }

    #[test]
    fn late_frame_waits_for_the_expiring_session_to_close() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(GatedStore {
            events: Mutex::new(Vec::new()),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            gated: AtomicBool::new(false),
        });
        let buffer = IngestBuffer::new(
            store.clone(),
            policy(),
            BufferSettings {
                buffer_size: 200,
                session_timeout_secs: 30,
            },
        );
        send(&buffer, "s1", 0);
        store.gated.store(true, Ordering::SeqCst);
        let later = Instant::now() + Duration::from_secs(31);

        std::thread::scope(|scope| {
            let sweeper = scope.spawn(|| buffer.sweep_expired(later));
            // The sweep is now inside the final append for s1.
            entered_rx.recv().unwrap();
            let late = scope.spawn(|| {
                send(&buffer, "s1", 1);
                buffer.flush("s1").unwrap()
            });
            std::thread::sleep(Duration::from_millis(50));
            release_tx.send(()).unwrap();

            assert_eq!(sweeper.join().unwrap(), 1);
            let report = late.join().unwrap().unwrap();
            assert_eq!(report.frames_flushed, 1);
        });

        assert_eq!(
            store.events.lock().unwrap().as_slice(),
            &["append [0]", "finalize", "append [1]"]
        );
        assert_eq!(buffer.active_sessions(), 1);
    }

    #[test]
    fn sweep_skips_a_session_that_was_already_closed() {
        let (buffer, store) = buffer_with(200);
        send(&buffer, "a", 0);
        assert_eq!(buffer.close_all(CloseReason::Shutdown), 1);
        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(buffer.sweep_expired(later), 0);
        assert_eq!(buffer.active_sessions(), 0);
        assert_eq!(store.finalized.lock().unwrap().len(), 1);
    }

    #[test]
    fn failing_store_caps_the_backlog_by_dropping_oldest() {
        let (buffer, store) = buffer_with(2);
        store.fail.store(true, Ordering::SeqCst);
        for index in 0..13 {
            assert!(matches!(
                send(&buffer, "s1", index),
                IngestOutcome::Accepted { flushed: false, .. }
            ));
        }

        let summary = buffer.summary("s1", Instant::now()).unwrap();
        assert_eq!(summary.buffer_size, 2 * MAX_PENDING_FLUSHES);
        assert_eq!(summary.frames_dropped, 3);
        assert_eq!(summary.frame_count, 13);

        store.fail.store(false, Ordering::SeqCst);
        match send(&buffer, "s1", 13) {
            IngestOutcome::Accepted {
                buffered, flushed, ..
            } => {
                assert!(flushed);
                assert_eq!(buffered, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            store.appends.lock().unwrap().as_slice(),
            &[("s1".to_string(), (3..14).collect::<Vec<u64>>())]
        );
    }
}
