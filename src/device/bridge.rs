//! Callback-to-await bridging
//!
//! A hardware operation completes through a callback on some other
//! thread. `result_slot` pairs a fulfil-once slot the callback writes into
//! with a future the issuing task awaits.

use crate::errors::CameraError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Write side of a pending hardware result. Clones share one slot.
pub struct ResultSlot<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<Result<T, CameraError>>>>>,
}

impl<T> Clone for ResultSlot<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> ResultSlot<T> {
    /// Deliver the outcome. Only the first call lands; the value is handed
    /// back when the slot was already fulfilled or the waiter is gone, so
    /// the caller can release whatever it carries.
    pub fn fulfill(&self, outcome: Result<T, CameraError>) -> Result<(), Result<T, CameraError>> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => sender.send(outcome),
            None => Err(outcome),
        }
    }

    /// True while a fulfil would still reach a live waiter.
    pub fn is_waiting(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.is_closed())
    }
}

/// Read side. Resolves with the delivered outcome; if every slot handle
/// is dropped without delivering, resolves with `Backend`.
pub struct PendingResult<T> {
    receiver: oneshot::Receiver<Result<T, CameraError>>,
    operation: &'static str,
}

impl<T> Future for PendingResult<T> {
    type Output = Result<T, CameraError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let operation = self.operation;
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CameraError::Backend(format!(
                "{} callback dropped without a result",
                operation
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub fn result_slot<T>(operation: &'static str) -> (ResultSlot<T>, PendingResult<T>) {
    let (tx, rx) = oneshot::channel();
    (
        ResultSlot {
            sender: Arc::new(Mutex::new(Some(tx))),
        },
        PendingResult {
            receiver: rx,
            operation,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_fulfillment_wins() {
        let (slot, pending) = result_slot::<u32>("test");
        let other = slot.clone();

        assert!(slot.fulfill(Ok(1)).is_ok());
        let rejected = other.fulfill(Ok(2));
        assert!(matches!(rejected, Err(Ok(2))));

        assert_eq!(pending.await.unwrap(), 1);
    }

    #[test]
    fn test_value_handed_back_when_waiter_gone() {
        let (slot, pending) = result_slot::<String>("open");
        assert!(slot.is_waiting());
        drop(pending);
        assert!(!slot.is_waiting());

        match slot.fulfill(Ok("device".to_string())) {
            Err(Ok(value)) => assert_eq!(value, "device"),
            other => panic!("expected value back, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_dropped_slot_resolves_backend_error() {
        let (slot, pending) = result_slot::<u32>("configure");
        drop(slot);
        let outcome = tokio_test::block_on(pending);
        match outcome {
            Err(CameraError::Backend(msg)) => assert!(msg.contains("configure")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
