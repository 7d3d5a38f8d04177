// Socket event sink
//
// Broadcasts every tracker event to all connected TCP clients in the
// 2-byte wire format. The accept loop and the per-client writers run
// as tokio tasks; publishing never blocks the tick loop, and a client
// that stops reading is disconnected when its broadcast queue laps.

use futures::Stream;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::events::TrackerEvent;
use crate::wire;

/// Outstanding frames buffered per subscriber before it is lapped.
const CHANNEL_CAPACITY: usize = 256;

/// Per-kind mute switches, mirroring the reference consumer options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkMutes {
    pub beats: bool,
    pub onsets: bool,
    pub bpm: bool,
}

pub struct SocketSink {
    frames: broadcast::Sender<[u8; 2]>,
    mutes: SinkMutes,
    local_addr: std::net::SocketAddr,
}

impl SocketSink {
    /// Bind a listener and start accepting clients. Must be called
    /// within a tokio runtime.
    pub async fn bind(addr: &str, mutes: SinkMutes) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (frames, _) = broadcast::channel::<[u8; 2]>(CHANNEL_CAPACITY);
        log::info!("[SocketSink] Listening at {}", local_addr);

        let accept_frames = frames.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        log::info!("[SocketSink] Client connected: {}", peer);
                        let mut rx = accept_frames.subscribe();
                        tokio::spawn(async move {
                            let mut stream = stream;
                            loop {
                                match rx.recv().await {
                                    Ok(frame) => {
                                        if stream.write_all(&frame).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                        log::warn!(
                                            "[SocketSink] Client {} lagged, skipped {} frames",
                                            peer,
                                            skipped
                                        );
                                    }
                                    Err(broadcast::error::RecvError::Closed) => break,
                                }
                            }
                            log::info!("[SocketSink] Client disconnected: {}", peer);
                        });
                    }
                    Err(err) => {
                        log::warn!("[SocketSink] Accept failed: {}", err);
                    }
                }
            }
        });

        Ok(Self {
            frames,
            mutes,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Forward one event to every connected client; muted kinds and
    /// subscriber-free sends are dropped silently.
    pub fn publish(&self, event: &TrackerEvent) {
        let muted = match event {
            TrackerEvent::Beat { .. } => self.mutes.beats,
            TrackerEvent::Onset { .. } => self.mutes.onsets,
            TrackerEvent::Bpm { .. } => self.mutes.bpm,
        };
        if muted {
            return;
        }
        let _ = self.frames.send(wire::encode(event));
    }

    /// In-process subscription to the outgoing frames.
    pub fn subscribe(&self) -> impl Stream<Item = [u8; 2]> {
        BroadcastStream::new(self.frames.subscribe()).filter_map(|frame| frame.ok())
    }
}
