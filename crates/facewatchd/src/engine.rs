use crate::alerts::{Alert, AlertSender};
use crate::capability::{FaceAnalyzer, FrameSource, FrameSourceOpener, LabeledBox, Overlay};
use crate::recent::{RecentList, RECENT_CAPACITY};
use crate::registry::{NewKnownFace, Registry};
use crate::settings::SettingsManager;
use chrono::{DateTime, Utc};
use facewatch_core::{
    estimate_distance, AccessLevel, AnalyzerError, DetectionRecord, DetectionThrottle,
    EuclideanMatcher, FaceAnalysis, KnownFace, MatchResult, Matcher, NotificationRecord, Settings,
    SettingsError, SettingsPatch, UnknownKeyPolicy,
};
use facewatch_hw::{capture_snapshot, Frame, FramePoll};
use facewatch_store::{Store, StoreError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Upper bound on faces taken from one detailed pass.
const MAX_FACES_PER_FRAME: usize = 20;
/// Floor for the coarse scan threshold.
const MIN_SCAN_THRESHOLD: f32 = 0.05;
/// The coarse scan runs this far below the configured minimum confidence.
const SCAN_THRESHOLD_SLACK: f32 = 0.2;
/// Wait before polling again when no new frame was available.
const IDLE_POLL_DELAY: Duration = Duration::from_millis(20);
/// Throttle keys idle this long are forgotten.
const THROTTLE_MAX_AGE: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Capture(#[from] facewatch_hw::CameraError),
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalyzerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<SettingsError> for EngineError {
    fn from(e: SettingsError) -> Self {
        EngineError::InvalidInput(e.to_string())
    }
}

/// Where the pipeline is within its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Capturing,
    Analyzing,
    Filtering,
    Throttling,
    Recording,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub version: &'static str,
    pub state: PipelineState,
    pub running: bool,
    pub settings: Settings,
    pub known_faces: usize,
    pub recent_detections: usize,
    pub unread_notifications: usize,
}

/// Everything the engine needs from the outside.
pub struct EngineDeps {
    pub store: Store,
    pub opener: Box<dyn FrameSourceOpener>,
    pub analyzer: Box<dyn FaceAnalyzer>,
    pub overlay: Box<dyn Overlay>,
    pub alerts: Option<AlertSender>,
    pub unknown_policy: UnknownKeyPolicy,
}

/// Pipeline state and the operations on it. Owned by the engine thread.
pub struct Engine {
    store: Store,
    opener: Box<dyn FrameSourceOpener>,
    analyzer: Box<dyn FaceAnalyzer>,
    overlay: Box<dyn Overlay>,
    alerts: Option<AlertSender>,
    unknown_policy: UnknownKeyPolicy,
    matcher: EuclideanMatcher,
    registry: Registry,
    settings: SettingsManager,
    throttle: DetectionThrottle,
    detections: RecentList<DetectionRecord>,
    notifications: RecentList<NotificationRecord>,
    source: Option<Box<dyn FrameSource>>,
    state: PipelineState,
    last_sequence: Option<u32>,
    starved: bool,
}

impl Engine {
    /// Load the registry, settings and recent lists from the store.
    pub async fn load(deps: EngineDeps) -> Result<Self, EngineError> {
        let registry = Registry::load(deps.store.clone()).await?;
        let settings = SettingsManager::load(deps.store.clone()).await?;
        let detections: RecentList<DetectionRecord> =
            RecentList::seeded(deps.store.get_all().await?, RECENT_CAPACITY);
        let notifications: RecentList<NotificationRecord> =
            RecentList::seeded(deps.store.get_all().await?, RECENT_CAPACITY);

        Ok(Self {
            store: deps.store,
            opener: deps.opener,
            analyzer: deps.analyzer,
            overlay: deps.overlay,
            alerts: deps.alerts,
            unknown_policy: deps.unknown_policy,
            matcher: EuclideanMatcher::default(),
            registry,
            settings,
            throttle: DetectionThrottle::new(),
            detections,
            notifications,
            source: None,
            state: PipelineState::Idle,
            last_sequence: None,
            starved: false,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.source.is_some()
    }

    /// (Re)start detection. A running pipeline is stopped first.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            tracing::info!("restarting pipeline");
            self.stop();
        }
        let source = match self.opener.open() {
            Ok(source) => source,
            Err(e) => {
                self.state = PipelineState::Stopped;
                return Err(e.into());
            }
        };
        self.source = Some(source);
        self.last_sequence = None;
        self.starved = false;
        self.state = PipelineState::Capturing;
        tracing::info!("pipeline started");
        Ok(())
    }

    /// Stop detection and release the frame source. Safe in any state.
    pub fn stop(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            tracing::info!("pipeline stopped");
        }
        self.state = PipelineState::Stopped;
    }

    /// Delay before the next cycle.
    fn next_delay(&self) -> Duration {
        let delay = self.settings.current().scan_frequency.scan_delay();
        if self.starved {
            delay.max(IDLE_POLL_DELAY)
        } else {
            delay
        }
    }

    /// Run one detection cycle stamped with `now`. Returns how many
    /// detections were recorded.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> usize {
        let Some(source) = self.source.as_mut() else {
            return 0;
        };

        self.state = PipelineState::Capturing;
        let frame = match source.poll() {
            FramePoll::Ready(frame) if self.last_sequence != Some(frame.sequence) => frame,
            FramePoll::Ready(_) | FramePoll::NotReady => {
                self.starved = true;
                return 0;
            }
            FramePoll::Closed => {
                tracing::warn!("frame source closed");
                self.stop();
                return 0;
            }
        };
        self.starved = false;
        self.last_sequence = Some(frame.sequence);

        let settings = self.settings.current();
        self.state = PipelineState::Analyzing;
        let faces = match self.analyze(&frame, &settings) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "analysis failed; skipping frame");
                self.state = PipelineState::Capturing;
                return 0;
            }
        };

        self.state = PipelineState::Filtering;
        let mut boxes = Vec::with_capacity(faces.len());
        let mut candidates = Vec::with_capacity(faces.len());
        for face in faces {
            let distance = estimate_distance(face.bbox.face_size(), frame.width);
            if distance > settings.detection_range_meters {
                tracing::debug!(distance, range = settings.detection_range_meters, "face out of range");
                continue;
            }
            let matched = self.matcher.best_match(&face.descriptor, self.registry.list());
            let key = self.unknown_policy.identity_key(
                &matched.label,
                matched.is_known(),
                &face.bbox,
                frame.width,
                frame.height,
            );
            boxes.push(LabeledBox::new(&face, &matched.label, matched.is_known(), distance));
            candidates.push((face, matched, key, distance));
        }
        self.overlay.draw(frame.width, frame.height, &boxes);

        self.state = PipelineState::Throttling;
        let mut recorded = 0;
        for (face, matched, key, distance) in candidates {
            if !self.throttle.should_process(&key, now, settings.scan_frequency) {
                tracing::trace!(key = %key, "throttled");
                continue;
            }
            self.state = PipelineState::Recording;
            if self.record(&frame, face, &matched, distance, now).await {
                recorded += 1;
            }
            // Throttled even when the write failed.
            self.throttle.record(&key, now);
        }
        self.throttle.prune(now, THROTTLE_MAX_AGE);

        self.state = PipelineState::Capturing;
        recorded
    }

    /// Coarse scan first; the detailed pass only runs when it finds something.
    fn analyze(&mut self, frame: &Frame, settings: &Settings) -> Result<Vec<FaceAnalysis>, AnalyzerError> {
        let threshold = (settings.min_confidence - SCAN_THRESHOLD_SLACK).max(MIN_SCAN_THRESHOLD);
        if self.analyzer.scan(frame, threshold)?.is_empty() {
            return Ok(Vec::new());
        }
        self.analyzer
            .analyze(frame, settings.min_confidence, MAX_FACES_PER_FRAME)
    }

    /// Snapshot, persist and publish one accepted face. Returns whether the
    /// detection reached the store.
    async fn record(
        &mut self,
        frame: &Frame,
        face: FaceAnalysis,
        matched: &MatchResult,
        distance: f32,
        now: DateTime<Utc>,
    ) -> bool {
        let snapshot = match capture_snapshot(frame, &face.bbox) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "snapshot failed; recording without images");
                None
            }
        };
        let (expression, expression_confidence) = face.expressions.dominant();
        let person_details = matched
            .face_id
            .as_deref()
            .and_then(|id| self.registry.get(id))
            .map(KnownFace::details);

        let detection = DetectionRecord {
            id: DetectionRecord::new_id(now),
            timestamp: now,
            confidence: face.bbox.confidence,
            dominant_expression: expression,
            expression_confidence,
            face_thumbnail: snapshot.as_ref().map(|s| s.face.clone()),
            context_image: snapshot.map(|s| s.context),
            person_name: matched.label.clone(),
            is_known: matched.is_known(),
            estimated_distance_meters: distance,
            person_details,
            face_descriptor: face.descriptor,
        };

        if let Err(e) = self.store.put(&detection).await {
            tracing::warn!(id = %detection.id, error = %e, "failed to persist detection");
            return false;
        }
        tracing::info!(
            id = %detection.id,
            person = %detection.person_name,
            known = detection.is_known,
            distance_m = distance,
            "detection recorded"
        );

        let notification = NotificationRecord::for_detection(&detection);
        match self.store.put(&notification).await {
            Ok(()) => self.notifications.push(notification),
            Err(e) => tracing::warn!(id = %notification.id, error = %e, "failed to persist notification"),
        }

        if !detection.is_known {
            if let Some(alerts) = &self.alerts {
                alerts.send(Alert::from_detection(&detection));
            }
        }

        self.detections.push(detection);
        true
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            state: self.state(),
            running: self.is_running(),
            settings: self.settings.current(),
            known_faces: self.registry.list().len(),
            recent_detections: self.detections.len(),
            unread_notifications: self.unread_count(),
        }
    }

    pub fn recent_detections(&self) -> Vec<DetectionRecord> {
        self.detections.to_vec()
    }

    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.notifications.to_vec()
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }

    /// Mark a notification read in the store and in memory. Returns false
    /// when the id is unknown to both.
    pub async fn mark_notification_read(&mut self, id: &str) -> Result<bool, EngineError> {
        let stored: Option<NotificationRecord> = self.store.get_by_id(id).await?;
        let found = match stored {
            Some(mut n) => {
                n.is_read = true;
                self.store.put(&n).await?;
                true
            }
            None => false,
        };
        let mut in_memory = false;
        for n in self.notifications.iter_mut().filter(|n| n.id == id) {
            n.is_read = true;
            in_memory = true;
        }
        Ok(found || in_memory)
    }

    pub async fn clear_notifications(&mut self) -> Result<(), EngineError> {
        self.store.clear::<NotificationRecord>().await?;
        self.notifications.clear();
        Ok(())
    }

    pub fn known_faces(&self) -> Vec<KnownFace> {
        self.registry.list().to_vec()
    }

    pub async fn add_known_face(
        &mut self,
        detection_id: &str,
        name: &str,
        role: &str,
        access_level: AccessLevel,
    ) -> Result<KnownFace, EngineError> {
        self.registry
            .add_from_detection(detection_id, name, role, access_level, Utc::now())
            .await
    }

    pub async fn enroll_known_face(&mut self, face: NewKnownFace) -> Result<KnownFace, EngineError> {
        self.registry.add(face, Utc::now()).await
    }

    pub async fn remove_known_face(&mut self, id: &str) -> Result<bool, EngineError> {
        self.registry.remove(id).await
    }

    pub async fn reset_known_faces(&mut self) -> Result<usize, EngineError> {
        self.registry.reset().await
    }

    pub fn settings(&self) -> Settings {
        self.settings.current()
    }

    pub async fn update_settings(&mut self, patch: &SettingsPatch) -> Result<Settings, EngineError> {
        self.settings.update(patch).await
    }

    async fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Start { reply } => {
                let _ = reply.send(self.start());
            }
            EngineRequest::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
            EngineRequest::RecentDetections { reply } => {
                let _ = reply.send(self.recent_detections());
            }
            EngineRequest::Notifications { reply } => {
                let _ = reply.send(self.notifications());
            }
            EngineRequest::UnreadCount { reply } => {
                let _ = reply.send(self.unread_count());
            }
            EngineRequest::MarkNotificationRead { id, reply } => {
                let _ = reply.send(self.mark_notification_read(&id).await);
            }
            EngineRequest::ClearNotifications { reply } => {
                let _ = reply.send(self.clear_notifications().await);
            }
            EngineRequest::ListKnownFaces { reply } => {
                let _ = reply.send(self.known_faces());
            }
            EngineRequest::AddKnownFace {
                detection_id,
                name,
                role,
                access_level,
                reply,
            } => {
                let result = self
                    .add_known_face(&detection_id, &name, &role, access_level)
                    .await;
                let _ = reply.send(result);
            }
            EngineRequest::EnrollKnownFace { face, reply } => {
                let _ = reply.send(self.enroll_known_face(face).await);
            }
            EngineRequest::RemoveKnownFace { id, reply } => {
                let _ = reply.send(self.remove_known_face(&id).await);
            }
            EngineRequest::ResetKnownFaces { reply } => {
                let _ = reply.send(self.reset_known_faces().await);
            }
            EngineRequest::GetSettings { reply } => {
                let _ = reply.send(self.settings());
            }
            EngineRequest::UpdateSettings { patch, reply } => {
                let _ = reply.send(self.update_settings(&patch).await);
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Start {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    RecentDetections {
        reply: oneshot::Sender<Vec<DetectionRecord>>,
    },
    Notifications {
        reply: oneshot::Sender<Vec<NotificationRecord>>,
    },
    UnreadCount {
        reply: oneshot::Sender<usize>,
    },
    MarkNotificationRead {
        id: String,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    ClearNotifications {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    ListKnownFaces {
        reply: oneshot::Sender<Vec<KnownFace>>,
    },
    AddKnownFace {
        detection_id: String,
        name: String,
        role: String,
        access_level: AccessLevel,
        reply: oneshot::Sender<Result<KnownFace, EngineError>>,
    },
    EnrollKnownFace {
        face: NewKnownFace,
        reply: oneshot::Sender<Result<KnownFace, EngineError>>,
    },
    RemoveKnownFace {
        id: String,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    ResetKnownFaces {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    GetSettings {
        reply: oneshot::Sender<Settings>,
    },
    UpdateSettings {
        patch: SettingsPatch,
        reply: oneshot::Sender<Result<Settings, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Start { reply }).await?
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Stop { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    pub async fn recent_detections(&self) -> Result<Vec<DetectionRecord>, EngineError> {
        self.request(|reply| EngineRequest::RecentDetections { reply })
            .await
    }

    pub async fn notifications(&self) -> Result<Vec<NotificationRecord>, EngineError> {
        self.request(|reply| EngineRequest::Notifications { reply }).await
    }

    pub async fn unread_count(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::UnreadCount { reply }).await
    }

    pub async fn mark_notification_read(&self, id: &str) -> Result<bool, EngineError> {
        let id = id.to_string();
        self.request(|reply| EngineRequest::MarkNotificationRead { id, reply })
            .await?
    }

    pub async fn clear_notifications(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::ClearNotifications { reply })
            .await?
    }

    pub async fn known_faces(&self) -> Result<Vec<KnownFace>, EngineError> {
        self.request(|reply| EngineRequest::ListKnownFaces { reply }).await
    }

    pub async fn add_known_face(
        &self,
        detection_id: &str,
        name: &str,
        role: &str,
        access_level: AccessLevel,
    ) -> Result<KnownFace, EngineError> {
        let (detection_id, name, role) = (detection_id.to_string(), name.to_string(), role.to_string());
        self.request(|reply| EngineRequest::AddKnownFace {
            detection_id,
            name,
            role,
            access_level,
            reply,
        })
        .await?
    }

    pub async fn enroll_known_face(&self, face: NewKnownFace) -> Result<KnownFace, EngineError> {
        self.request(|reply| EngineRequest::EnrollKnownFace { face, reply })
            .await?
    }

    pub async fn remove_known_face(&self, id: &str) -> Result<bool, EngineError> {
        let id = id.to_string();
        self.request(|reply| EngineRequest::RemoveKnownFace { id, reply })
            .await?
    }

    pub async fn reset_known_faces(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::ResetKnownFaces { reply })
            .await?
    }

    pub async fn settings(&self) -> Result<Settings, EngineError> {
        self.request(|reply| EngineRequest::GetSettings { reply }).await
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings, EngineError> {
        self.request(|reply| EngineRequest::UpdateSettings { patch, reply })
            .await?
    }
}

/// Spawn the engine on a dedicated OS thread with its own runtime.
///
/// State is loaded from the store before this returns, so a broken
/// database fails startup rather than the first request. The thread exits
/// and releases the frame source once every handle is dropped.
pub async fn spawn_engine(deps: EngineDeps) -> Result<EngineHandle, EngineError> {
    let (tx, rx) = mpsc::channel::<EngineRequest>(16);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), EngineError>>();

    std::thread::Builder::new()
        .name("facewatch-engine".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(EngineError::InvalidInput(format!(
                        "failed to build engine runtime: {e}"
                    ))));
                    return;
                }
            };

            runtime.block_on(async move {
                let engine = match Engine::load(deps).await {
                    Ok(engine) => engine,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                tracing::info!("engine thread started");
                run(engine, rx).await;
            });
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    ready_rx.await.map_err(|_| EngineError::ChannelClosed)??;
    Ok(EngineHandle { tx })
}

/// Serve requests; while running, interleave detection cycles.
async fn run(mut engine: Engine, mut rx: mpsc::Receiver<EngineRequest>) {
    loop {
        if engine.is_running() {
            let delay = engine.next_delay();
            tokio::select! {
                req = rx.recv() => match req {
                    Some(req) => engine.handle(req).await,
                    None => break,
                },
                _ = tokio::time::sleep(delay) => {
                    engine.run_cycle(Utc::now()).await;
                }
            }
        } else {
            match rx.recv().await {
                Some(req) => engine.handle(req).await,
                None => break,
            }
        }
    }
    engine.stop();
}
