use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::time::Instant;

/// One block of mono float32 samples at the capture rate. Created by the
/// audio callback, consumed exactly once by the STT worker.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub samples: Vec<f32>,
    pub timestamp: Instant,
    pub sample_rate: u32,
}

/// Capacity of the callback→consumer PCM ring (§5 threading model: bounded,
/// drop-oldest-on-full).
pub const PCM_RING_CAPACITY: usize = 64;

/// Producer handle. The audio callback holds exactly one of these; `push`
/// never blocks and performs at most one extra `try_recv` to make room.
#[derive(Clone)]
pub struct PcmProducer {
    tx: Sender<PcmFrame>,
    rx: Receiver<PcmFrame>,
}

/// Consumer handle. The STT worker holds exactly one of these.
#[derive(Clone)]
pub struct PcmConsumer {
    rx: Receiver<PcmFrame>,
}

/// Build a bounded, drop-oldest PCM ring of `PCM_RING_CAPACITY` frames.
pub fn pcm_ring() -> (PcmProducer, PcmConsumer) {
    let (tx, rx) = crossbeam_channel::bounded(PCM_RING_CAPACITY);
    (
        PcmProducer {
            tx,
            rx: rx.clone(),
        },
        PcmConsumer { rx },
    )
}

impl PcmProducer {
    /// Push a frame. On overflow, drop the single oldest frame and retry
    /// once — the newest frame always wins. Returns `true` if an older
    /// frame was dropped to make room.
    pub fn push(&self, frame: PcmFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => false,
            Err(TrySendError::Full(frame)) => {
                let _ = self.rx.try_recv();
                // Another producer could race us between the pop and this
                // send, but there is exactly one producer (the audio
                // callback) by construction.
                let _ = self.tx.try_send(frame);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl PcmConsumer {
    /// Block with a short timeout for the next frame (§5: STT consumer
    /// blocks with a short timeout, never indefinitely).
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<PcmFrame> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Result<PcmFrame, TryRecvError> {
        self.rx.try_recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(tag: f32) -> PcmFrame {
        PcmFrame {
            samples: vec![tag],
            timestamp: Instant::now(),
            sample_rate: 24_000,
        }
    }

    #[test]
    fn drops_oldest_on_overflow() {
        let (producer, consumer) = pcm_ring();
        for i in 0..PCM_RING_CAPACITY {
            assert!(!producer.push(frame(i as f32)));
        }
        assert!(producer.push(frame(999.0)));

        let first = consumer.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(first.samples[0], 1.0);

        let mut last = None;
        while let Some(f) = consumer.recv_timeout(Duration::from_millis(10)) {
            last = Some(f);
        }
        assert_eq!(last.unwrap().samples[0], 999.0);
    }

    #[test]
    fn fifo_order_within_capacity() {
        let (producer, consumer) = pcm_ring();
        producer.push(frame(1.0));
        producer.push(frame(2.0));
        producer.push(frame(3.0));

        assert_eq!(
            consumer.recv_timeout(Duration::from_millis(10)).unwrap().samples[0],
            1.0
        );
        assert_eq!(
            consumer.recv_timeout(Duration::from_millis(10)).unwrap().samples[0],
            2.0
        );
        assert_eq!(
            consumer.recv_timeout(Duration::from_millis(10)).unwrap().samples[0],
            3.0
        );
    }
}
