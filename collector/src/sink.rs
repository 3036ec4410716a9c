use std::{future::Future, pin::Pin};

use grid_core::FrameRecord;
use tokio::sync::mpsc;

pub type SendFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'static>>;

/// Destination for emitted frames, typically the ingest endpoint.
///
/// Each call is awaited on its own task, so an implementation must not rely
/// on being called in order relative to earlier sends completing.
pub trait FrameSink: Send + Sync + 'static {
    fn send(&self, frame: FrameRecord) -> SendFuture;
}

/// In-process sink backed by a bounded channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<FrameRecord>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FrameRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn send(&self, frame: FrameRecord) -> SendFuture {
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send(frame)
                .await
                .map_err(|_| "frame channel closed".to_string())
        })
    }
}
