use crossbeam_channel::{Receiver, Sender, TrySendError};

/// A bounded, drop-oldest channel for `TextToken` fan-out to Fast Brain
/// (§5: STT → Fast Brain is bounded capacity 64, drop-oldest-on-full, to
/// preserve recency over completeness).
pub fn fast_token_channel<T: Send>(capacity: usize) -> (DropOldestSender<T>, Receiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (DropOldestSender { tx, rx: rx.clone() }, rx)
}

pub struct DropOldestSender<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for DropOldestSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> DropOldestSender<T> {
    /// Send, dropping the oldest queued item to make room on overflow.
    /// Returns `true` if an item was dropped.
    pub fn send(&self, value: T) -> bool {
        match self.tx.try_send(value) {
            Ok(()) => false,
            Err(TrySendError::Full(value)) => {
                let _ = self.rx.try_recv();
                let _ = self.tx.try_send(value);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let (tx, rx) = fast_token_channel::<i32>(2);
        tx.send(1);
        tx.send(2);
        assert!(tx.send(3));
        let mut seen = Vec::new();
        while let Ok(v) = rx.try_recv() {
            seen.push(v);
        }
        assert_eq!(seen, vec![2, 3]);
    }
}
