use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Resolves once the primitive that handed it out reaches the awaited state.
///
/// Dropping a `Completion` is fine; nothing waits on the other side.
#[derive(Debug)]
pub struct Completion {
    rx: Option<oneshot::Receiver<()>>,
}

impl Completion {
    pub(crate) fn ready() -> Self {
        Self { rx: None }
    }

    pub(crate) fn pending() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx: Some(rx) })
    }

    pub fn is_ready(&self) -> bool {
        self.rx.is_none()
    }
}

impl Future for Completion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(());
        };
        // A dropped sender means the owner went away; there is nothing left to wait for.
        match Pin::new(rx).poll(cx) {
            Poll::Ready(_) => {
                self.rx = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Wakes every registered party in registration order.
pub(crate) fn notify_all(parties: &mut Vec<oneshot::Sender<()>>) {
    for tx in parties.drain(..) {
        let _ = tx.send(());
    }
}
