//! Connected client sets and per-connection writer tasks

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Notify};
use tracing::{trace, warn};

/// Blocks queued per audio client before it is disconnected; a few
/// seconds of PCM at the default block size
const AUDIO_QUEUE_DEPTH: usize = 128;

/// Outcome of one video fan-out pass
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PushOutcome {
    pub delivered: usize,
    pub lagged: usize,
}

/// One-slot hand-off between the fan-out pass and a video writer task.
///
/// A newer part replaces an unconsumed older one, so a stalled client
/// never accumulates a backlog and always resumes at the newest frame.
pub(crate) struct FrameMailbox {
    slot: Mutex<MailboxSlot>,
    signal: Notify,
}

struct MailboxSlot {
    part: Option<Bytes>,
    closed: bool,
}

impl FrameMailbox {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(MailboxSlot {
                part: None,
                closed: false,
            }),
            signal: Notify::new(),
        })
    }

    /// Stores a part, returning whether it evicted an unconsumed one
    fn replace(&self, part: Bytes) -> bool {
        let evicted = {
            let mut slot = self.slot.lock();
            if slot.closed {
                return false;
            }
            slot.part.replace(part).is_some()
        };
        self.signal.notify_one();
        evicted
    }

    fn close(&self) {
        self.slot.lock().closed = true;
        self.signal.notify_one();
    }

    /// Takes the newest part, or `None` once the mailbox is closed
    pub(crate) async fn recv(&self) -> Option<Bytes> {
        loop {
            {
                let mut slot = self.slot.lock();
                if slot.closed {
                    return None;
                }
                if let Some(part) = slot.part.take() {
                    return Some(part);
                }
            }
            self.signal.notified().await;
        }
    }
}

struct Roster<T> {
    entries: HashMap<u64, T>,
    closed: bool,
}

impl<T> Roster<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            closed: false,
        }
    }
}

/// Client sets for both streams.
///
/// The locks cover registration bookkeeping only. Fan-out clones the
/// handles under the lock, releases it, and then delivers, so no network
/// I/O ever happens while a lock is held. Once a roster is closed by
/// shutdown, later registrations get an already-closed queue and their
/// writer tasks exit immediately.
pub(crate) struct ClientRegistry {
    video: Mutex<Roster<Arc<FrameMailbox>>>,
    audio: Mutex<Roster<mpsc::Sender<Bytes>>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            video: Mutex::new(Roster::new()),
            audio: Mutex::new(Roster::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register_video(&self) -> (u64, Arc<FrameMailbox>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mailbox = FrameMailbox::new();

        let mut roster = self.video.lock();
        if roster.closed {
            mailbox.close();
        } else {
            roster.entries.insert(id, mailbox.clone());
        }

        (id, mailbox)
    }

    pub fn register_audio(&self) -> (u64, mpsc::Receiver<Bytes>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);

        let mut roster = self.audio.lock();
        if !roster.closed {
            roster.entries.insert(id, tx);
        }

        (id, rx)
    }

    pub fn remove_video(&self, id: u64) {
        if let Some(mailbox) = self.video.lock().entries.remove(&id) {
            mailbox.close();
        }
    }

    pub fn remove_audio(&self, id: u64) {
        self.audio.lock().entries.remove(&id);
    }

    pub fn video_count(&self) -> usize {
        self.video.lock().entries.len()
    }

    pub fn audio_count(&self) -> usize {
        self.audio.lock().entries.len()
    }

    /// Delivers one multipart part to every video client.
    ///
    /// Every client gets the part; a client still holding an unconsumed
    /// older one has it evicted and is counted as lagged, so its next
    /// write is always the newest frame.
    pub fn push_video(&self, part: &Bytes) -> PushOutcome {
        let targets: Vec<(u64, Arc<FrameMailbox>)> = {
            let roster = self.video.lock();
            roster
                .entries
                .iter()
                .map(|(id, mailbox)| (*id, mailbox.clone()))
                .collect()
        };

        let mut outcome = PushOutcome::default();
        for (id, mailbox) in targets {
            if mailbox.replace(part.clone()) {
                outcome.lagged += 1;
                trace!(client_id = id, "viewer lagging, replaced unread frame");
            }
            outcome.delivered += 1;
        }

        outcome
    }

    /// Delivers one PCM block to every audio client, in order, no skips.
    ///
    /// A client whose queue is full has stopped reading and is
    /// disconnected; blocks accepted before the cut still drain to it in
    /// order. Returns the number of clients reached.
    pub fn push_audio(&self, block: &Bytes) -> usize {
        let targets: Vec<(u64, mpsc::Sender<Bytes>)> = {
            let roster = self.audio.lock();
            roster
                .entries
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, tx) in targets {
            match tx.try_send(block.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client_id = id, "audio client stopped reading, disconnecting");
                    dead.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut roster = self.audio.lock();
            for id in &dead {
                roster.entries.remove(id);
            }
        }

        delivered
    }

    /// Drops every audio client and refuses new ones
    pub fn close_audio(&self) {
        let mut roster = self.audio.lock();
        roster.closed = true;
        roster.entries.clear();
    }

    /// Closes every client on both streams and refuses new ones
    pub fn close_all(&self) {
        {
            let mut roster = self.video.lock();
            roster.closed = true;
            for mailbox in roster.entries.values() {
                mailbox.close();
            }
            roster.entries.clear();
        }
        self.close_audio();
    }
}

/// Queue half handed to a client's writer task
pub(crate) enum ClientQueue {
    Video(Arc<FrameMailbox>),
    Audio(mpsc::Receiver<Bytes>),
}

impl ClientQueue {
    async fn recv(&mut self) -> Option<Bytes> {
        match self {
            ClientQueue::Video(mailbox) => mailbox.recv().await,
            ClientQueue::Audio(rx) => rx.recv().await,
        }
    }
}

/// Streams queued payloads to one client socket.
///
/// Runs until the queue ends (shutdown, or the registry cut the client
/// off), a write fails, or the peer closes its end; the inbound half of
/// the socket is watched purely to notice disconnection. Returns the
/// reason the stream ended.
pub(crate) async fn run_client_writer(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut queue: ClientQueue,
) -> &'static str {
    let mut drain = [0u8; 512];

    loop {
        tokio::select! {
            payload = queue.recv() => match payload {
                Some(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        return "write failed";
                    }
                }
                None => return "stream ended",
            },
            inbound = reader.read(&mut drain) => match inbound {
                Ok(0) => return "peer closed",
                Ok(_) => {} // stray bytes after the request are ignored
                Err(_) => return "read failed",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_register_and_remove() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.video_count(), 0);

        let (id_a, _mailbox_a) = registry.register_video();
        let (id_b, _mailbox_b) = registry.register_video();
        assert_ne!(id_a, id_b);
        assert_eq!(registry.video_count(), 2);

        registry.remove_video(id_a);
        assert_eq!(registry.video_count(), 1);
    }

    #[tokio::test]
    async fn test_push_video_reaches_every_client() {
        let registry = ClientRegistry::new();
        let (_, mailbox_a) = registry.register_video();
        let (_, mailbox_b) = registry.register_video();

        let part = Bytes::from_static(b"part-1");
        let outcome = registry.push_video(&part);

        assert_eq!(outcome.delivered, 2);
        assert_eq!(mailbox_a.recv().await.unwrap(), part);
        assert_eq!(mailbox_b.recv().await.unwrap(), part);
    }

    #[tokio::test]
    async fn test_slow_viewer_resumes_at_newest_frame() {
        let registry = ClientRegistry::new();
        let (_, mailbox) = registry.register_video();

        // Burst with no reads in between: each later part evicts the one
        // before it
        for i in 1..=5u8 {
            let outcome = registry.push_video(&Bytes::from(vec![i]));
            assert_eq!(outcome.delivered, 1);
            assert_eq!(outcome.lagged, usize::from(i > 1));
        }

        assert_eq!(mailbox.recv().await.unwrap(), Bytes::from(vec![5]));

        // Only the final frame survived the burst
        let idle = tokio::time::timeout(Duration::from_millis(50), mailbox.recv()).await;
        assert!(idle.is_err(), "no further frame should be pending");
    }

    #[tokio::test]
    async fn test_remove_video_ends_client_stream() {
        let registry = ClientRegistry::new();
        let (id, mailbox) = registry.register_video();
        let (_, live) = registry.register_video();

        registry.remove_video(id);
        assert!(mailbox.recv().await.is_none());
        assert_eq!(registry.video_count(), 1);

        let outcome = registry.push_video(&Bytes::from_static(b"x"));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(live.recv().await.unwrap(), Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn test_push_audio_preserves_order() {
        let registry = ClientRegistry::new();
        let (_, mut rx) = registry.register_audio();

        for i in 0..16u8 {
            registry.push_audio(&Bytes::from(vec![i]));
        }

        for i in 0..16u8 {
            assert_eq!(rx.recv().await.unwrap(), Bytes::from(vec![i]));
        }
    }

    #[tokio::test]
    async fn test_stalled_audio_client_is_disconnected() {
        let registry = ClientRegistry::new();
        let (_, mut stalled) = registry.register_audio();
        let (_, mut healthy) = registry.register_audio();

        // Fill the stalled client's queue exactly, then overflow it
        for i in 0..AUDIO_QUEUE_DEPTH {
            assert_eq!(registry.push_audio(&Bytes::from(vec![i as u8])), 2);
            assert_eq!(healthy.recv().await.unwrap(), Bytes::from(vec![i as u8]));
        }
        assert_eq!(registry.push_audio(&Bytes::from_static(b"overflow")), 1);
        assert_eq!(registry.audio_count(), 1);

        // Everything accepted before the cut still drains, in order
        for i in 0..AUDIO_QUEUE_DEPTH {
            assert_eq!(stalled.recv().await.unwrap(), Bytes::from(vec![i as u8]));
        }
        assert!(stalled.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_all_ends_streams_and_refuses() {
        let registry = ClientRegistry::new();
        let (_, mailbox) = registry.register_video();

        registry.close_all();
        assert!(mailbox.recv().await.is_none());
        assert_eq!(registry.video_count(), 0);

        // A late registration gets an already-closed queue
        let (_, late) = registry.register_video();
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_audio_leaves_video_running() {
        let registry = ClientRegistry::new();
        let (_, video_mailbox) = registry.register_video();
        let (_, mut audio_rx) = registry.register_audio();

        registry.close_audio();
        assert!(audio_rx.recv().await.is_none());

        registry.push_video(&Bytes::from_static(b"still-on"));
        assert_eq!(
            video_mailbox.recv().await.unwrap(),
            Bytes::from_static(b"still-on")
        );
    }
}
