//! Shared helpers for integration tests: scripted transport, fake devices and
//! a notification collector.

use async_trait::async_trait;
use duplex_agent::audio::{AudioInputDevice, AudioOutputDevice};
use duplex_agent::bridge::{Notification, SessionOutcome};
use duplex_agent::capture::FrameDevice;
use duplex_agent::config::CaptureMode;
use duplex_agent::devices::DeviceProvider;
use duplex_agent::error::{Result, SessionError};
use duplex_agent::pipeline::messages::{
    InboundEvent, MediaChunk, OutboundMessage, StreamRead,
};
use duplex_agent::transport::{SessionConnector, SessionHandle, SessionTransport};
use duplex_agent::{SessionConfig, SessionState};
use image::{DynamicImage, RgbImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Short drain timeout so failing tests fail fast.
pub(crate) fn test_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.shutdown.drain_timeout_ms = 500;
    config
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Transport whose inbound side is fed by the test through [`ScriptHandle`].
/// Receive waits forever once the script sender is dropped.
pub(crate) struct MockTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamRead<InboundEvent>>>,
    sent: Mutex<Vec<(Instant, OutboundMessage)>>,
    closed: AtomicBool,
}

/// Test-side handle that pushes inbound reads.
#[derive(Clone)]
pub(crate) struct ScriptHandle {
    tx: mpsc::UnboundedSender<StreamRead<InboundEvent>>,
}

impl ScriptHandle {
    pub(crate) fn push(&self, read: StreamRead<InboundEvent>) {
        self.tx.send(read).expect("transport still receiving");
    }

    pub(crate) fn event(&self, event: InboundEvent) {
        self.push(StreamRead::Item(event));
    }
}

impl MockTransport {
    pub(crate) fn new() -> (Arc<Self>, ScriptHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            inbound: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        (transport, ScriptHandle { tx })
    }

    pub(crate) fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Send times of image chunks.
    pub(crate) fn image_times(&self) -> Vec<Instant> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .filter(|(_, m)| matches!(m, OutboundMessage::Realtime(chunk) if chunk.is_image()))
            .map(|(t, _)| *t)
            .collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::Transport("session closed".into()));
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((Instant::now(), message));
        Ok(())
    }

    async fn receive(&self) -> StreamRead<InboundEvent> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(read) => read,
            None => std::future::pending().await,
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out one prepared transport, or failing.
pub(crate) struct MockConnector {
    transport: Option<Arc<MockTransport>>,
    pub(crate) attempts: AtomicUsize,
}

impl MockConnector {
    pub(crate) fn new(transport: Arc<MockTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport: Some(transport),
            attempts: AtomicUsize::new(0),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            transport: None,
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self) -> Result<SessionHandle> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match &self.transport {
            Some(t) => Ok(Arc::clone(t) as SessionHandle),
            None => Err(SessionError::Transport("connection refused".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Microphone producing a silent chunk every 20 ms, optionally failing after
/// a number of reads.
pub(crate) struct MockMic {
    fail_after: Option<usize>,
    reads: AtomicUsize,
    pub(crate) closed: AtomicBool,
}

impl MockMic {
    pub(crate) fn new(fail_after: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            fail_after,
            reads: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl AudioInputDevice for MockMic {
    async fn read_chunk(&self) -> StreamRead<Vec<u8>> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        match self.fail_after {
            Some(limit) if n >= limit => StreamRead::Failed("microphone unplugged".into()),
            _ => StreamRead::Item(vec![0; 64]),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Speaker recording every write.
#[derive(Default)]
pub(crate) struct MockSpeaker {
    pub(crate) written: Mutex<Vec<Vec<u8>>>,
    pub(crate) closed: AtomicBool,
}

#[async_trait]
impl AudioOutputDevice for MockSpeaker {
    async fn write(&self, pcm: &[u8]) -> Result<()> {
        self.written.lock().expect("written lock").push(pcm.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Camera replaying scripted reads, then end of stream.
pub(crate) struct MockCamera {
    reads: Mutex<VecDeque<StreamRead<DynamicImage>>>,
    pub(crate) closed: AtomicBool,
}

impl MockCamera {
    pub(crate) fn with_frames(count: usize) -> Arc<Self> {
        Self::scripted((0..count).map(|_| StreamRead::Item(full_hd_frame())).collect())
    }

    /// `count` frames, then a failed read.
    pub(crate) fn failing_after(count: usize) -> Arc<Self> {
        let mut reads: VecDeque<_> = (0..count).map(|_| StreamRead::Item(full_hd_frame())).collect();
        reads.push_back(StreamRead::Failed("camera unplugged".into()));
        Self::scripted(reads)
    }

    fn scripted(reads: VecDeque<StreamRead<DynamicImage>>) -> Arc<Self> {
        Arc::new(Self {
            reads: Mutex::new(reads),
            closed: AtomicBool::new(false),
        })
    }
}

fn full_hd_frame() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::new(1920, 1080))
}

#[async_trait]
impl FrameDevice for MockCamera {
    async fn read_frame(&self) -> StreamRead<DynamicImage> {
        let next = self.reads.lock().expect("reads lock").pop_front();
        next.unwrap_or(StreamRead::EndOfStream)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Device provider over the mocks above.
pub(crate) struct MockDevices {
    pub(crate) mic: Arc<MockMic>,
    pub(crate) speaker: Arc<MockSpeaker>,
    pub(crate) camera: Option<Arc<MockCamera>>,
    pub(crate) opened: AtomicUsize,
    output_delay: Option<Duration>,
}

impl MockDevices {
    pub(crate) fn new(mic: Arc<MockMic>) -> Arc<Self> {
        Arc::new(Self {
            mic,
            speaker: Arc::new(MockSpeaker::default()),
            camera: None,
            opened: AtomicUsize::new(0),
            output_delay: None,
        })
    }

    /// Opening the speaker takes `delay`.
    pub(crate) fn with_slow_output(mic: Arc<MockMic>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mic,
            speaker: Arc::new(MockSpeaker::default()),
            camera: None,
            opened: AtomicUsize::new(0),
            output_delay: Some(delay),
        })
    }

    pub(crate) fn with_camera(mic: Arc<MockMic>, camera: Arc<MockCamera>) -> Arc<Self> {
        Arc::new(Self {
            mic,
            speaker: Arc::new(MockSpeaker::default()),
            camera: Some(camera),
            opened: AtomicUsize::new(0),
            output_delay: None,
        })
    }

    pub(crate) fn all_closed(&self) -> bool {
        self.mic.closed.load(Ordering::SeqCst)
            && self.speaker.closed.load(Ordering::SeqCst)
            && self
                .camera
                .as_ref()
                .is_none_or(|c| c.closed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl DeviceProvider for MockDevices {
    async fn open_input(
        &self,
        _sample_rate: u32,
        _channels: u16,
        _chunk_frames: usize,
    ) -> Result<Arc<dyn AudioInputDevice>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.mic) as Arc<dyn AudioInputDevice>)
    }

    async fn open_output(
        &self,
        _sample_rate: u32,
        _channels: u16,
    ) -> Result<Arc<dyn AudioOutputDevice>> {
        if let Some(delay) = self.output_delay {
            tokio::time::sleep(delay).await;
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.speaker) as Arc<dyn AudioOutputDevice>)
    }

    async fn open_capture(&self, mode: CaptureMode) -> Result<Option<Arc<dyn FrameDevice>>> {
        if mode == CaptureMode::None {
            return Ok(None);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        match &self.camera {
            Some(camera) => Ok(Some(Arc::clone(camera) as Arc<dyn FrameDevice>)),
            None => Err(SessionError::Device(format!("no {mode} device"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Wait for a notification matching `pred`, collecting state changes seen on
/// the way.
pub(crate) async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    states: &mut Vec<SessionState>,
    pred: impl Fn(&Notification) -> bool,
) -> Notification {
    let found = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(n) = rx.recv().await {
            if let Notification::State(s) = &n {
                states.push(*s);
            }
            if pred(&n) {
                return Some(n);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(n)) => n,
        Ok(None) => panic!("notification channel closed before match"),
        Err(_) => panic!("timed out waiting for notification"),
    }
}

/// Wait for the final notification and return the outcome.
pub(crate) async fn wait_for_end(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    states: &mut Vec<SessionState>,
) -> SessionOutcome {
    match wait_for(rx, states, |n| matches!(n, Notification::SessionEnded(_))).await {
        Notification::SessionEnded(outcome) => outcome,
        other => unreachable!("unexpected notification {other:?}"),
    }
}

/// Number of realtime audio chunks sent.
pub(crate) fn audio_chunks(sent: &[OutboundMessage]) -> usize {
    sent.iter()
        .filter(|m| matches!(m, OutboundMessage::Realtime(MediaChunk::Audio { .. })))
        .count()
}
