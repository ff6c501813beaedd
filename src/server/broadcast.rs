//! Fan-out loops: video push and audio relay

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::audio::AudioSource;
use crate::http;

use super::Shared;

/// Bounded wait for the next frame; doubles as the shutdown poll interval
const FRAME_WAIT: Duration = Duration::from_millis(50);

/// Retry delay when the audio source has nothing ready
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(5);

/// Video fan-out: await the next frame past the last pushed sequence,
/// frame it once, deliver to every video client.
///
/// The bounded wait in `await_next` is what lets the loop notice the
/// cleared running flag; there is no separate cancellation token.
pub(crate) async fn run_push_loop(shared: Arc<Shared>) {
    debug!("push loop started");

    let mut last_sequence = 0u64;
    while shared.running.load(Ordering::Relaxed) {
        let frame = match shared.exchange.await_next(last_sequence, FRAME_WAIT).await {
            Some(frame) => frame,
            None => continue,
        };
        last_sequence = frame.sequence;

        if shared.clients.video_count() == 0 {
            continue;
        }

        let part = http::frame_part(&frame.payload);
        let outcome = shared.clients.push_video(&part);

        if outcome.lagged > 0 {
            shared
                .counters
                .frames_lagged
                .fetch_add(outcome.lagged as u64, Ordering::Relaxed);
        }

        trace!(
            sequence = %frame.sequence,
            delivered = %outcome.delivered,
            lagged = %outcome.lagged,
            age_ms = %frame.age().as_millis(),
            "frame pushed"
        );
    }

    debug!("push loop stopped");
}

/// Audio fan-out: read PCM blocks and relay each to every audio client
/// in exact order.
///
/// Runs on its own thread since `read_block` blocks at the source's real
/// pace. A read error kills only this channel: existing audio clients are
/// dropped, later `/audio` requests are refused, video keeps running.
pub(crate) fn run_audio_relay(
    mut source: Box<dyn AudioSource>,
    block_bytes: usize,
    shared: Arc<Shared>,
) {
    debug!(block_bytes = %block_bytes, "audio relay started");

    let mut block = vec![0u8; block_bytes];
    while shared.running.load(Ordering::Relaxed) {
        match source.read_block(&mut block) {
            Ok(0) => std::thread::sleep(EMPTY_READ_BACKOFF),
            Ok(n) => {
                shared.counters.audio_blocks.fetch_add(1, Ordering::Relaxed);

                if shared.clients.audio_count() == 0 {
                    continue;
                }

                let payload = Bytes::copy_from_slice(&block[..n]);
                let delivered = shared.clients.push_audio(&payload);
                trace!(bytes = %n, delivered = %delivered, "audio block relayed");
            }
            Err(e) => {
                warn!(error = %e, "audio source failed, disabling audio channel");
                shared.audio_live.store(false, Ordering::Relaxed);
                shared.clients.close_audio();
                break;
            }
        }
    }

    debug!("audio relay stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioError, AudioFormat};
    use crate::exchange::FrameExchange;
    use crate::server::clients::ClientRegistry;
    use crate::stats::Counters;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::watch;

    fn test_shared(audio_format: Option<AudioFormat>) -> Arc<Shared> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Shared {
            exchange: Arc::new(FrameExchange::new()),
            clients: ClientRegistry::new(),
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(true)),
            shutdown,
            audio_live: AtomicBool::new(audio_format.is_some()),
            audio_format,
        })
    }

    /// Emits blocks stamped with a running counter, then errors
    struct NumberedSource {
        next: u8,
        fail_after: u8,
    }

    impl AudioSource for NumberedSource {
        fn format(&self) -> AudioFormat {
            AudioFormat::default()
        }

        fn read_block(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
            if self.next >= self.fail_after {
                return Err(AudioError::Source("scripted failure".into()));
            }
            let stamp = self.next;
            self.next += 1;

            buf.fill(stamp);
            Ok(buf.len())
        }
    }

    #[tokio::test]
    async fn test_push_loop_delivers_framed_parts() {
        let shared = test_shared(None);
        let (_, mailbox) = shared.clients.register_video();

        let loop_task = tokio::spawn(run_push_loop(shared.clone()));

        shared.exchange.publish(Bytes::from_static(b"JPEG"));

        let part = tokio::time::timeout(Duration::from_secs(1), mailbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
        );

        shared.running.store(false, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(1), loop_task)
            .await
            .expect("push loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_push_loop_counts_lagged_deliveries() {
        let shared = test_shared(None);
        // This client never reads, so each later frame evicts the one
        // sitting in its mailbox
        let (_, _mailbox) = shared.clients.register_video();

        let loop_task = tokio::spawn(run_push_loop(shared.clone()));

        for i in 0..5u8 {
            shared.exchange.publish(Bytes::from(vec![i]));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        shared.running.store(false, Ordering::Relaxed);
        loop_task.await.unwrap();

        assert!(shared.counters.frames_lagged.load(Ordering::Relaxed) >= 1);
    }

    #[tokio::test]
    async fn test_audio_relay_exact_order_then_failure_isolates() {
        let shared = test_shared(Some(AudioFormat::default()));
        let (_, mut rx) = shared.clients.register_audio();
        let (_, video_mailbox) = shared.clients.register_video();

        let relay = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                run_audio_relay(
                    Box::new(NumberedSource {
                        next: 0,
                        fail_after: 4,
                    }),
                    64,
                    shared,
                )
            })
        };

        for expected in 0..4u8 {
            let block = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(block.len(), 64);
            assert!(block.iter().all(|b| *b == expected), "block out of order");
        }

        // The scripted failure closes the audio roster
        assert!(
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .is_none()
        );
        relay.join().unwrap();

        assert!(!shared.audio_live.load(Ordering::Relaxed));

        // Video clients are untouched
        shared.clients.push_video(&Bytes::from_static(b"v"));
        assert_eq!(
            video_mailbox.recv().await.unwrap(),
            Bytes::from_static(b"v")
        );
    }
}
