//! Suspense
//!
//! The three states a render-time read can end in. `Pending` carries an
//! awaitable signal that resolves when the load behind it settles.

use super::error::BindingException;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Resolves when the load a read is waiting on settles
#[derive(Clone)]
pub struct Suspended(Shared<BoxFuture<'static, ()>>);

impl Suspended {
    pub(crate) fn new<F>(load: F) -> Self
    where
        F: Future + Send + 'static,
    {
        Self(load.map(|_| ()).boxed().shared())
    }
}

impl Future for Suspended {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl std::fmt::Debug for Suspended {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Suspended")
    }
}

/// Result of a suspense-aware read
#[derive(Debug)]
pub enum Suspense<T> {
    Pending(Suspended),
    Ready(T),
    Failed(BindingException),
}

impl<T> Suspense<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Suspense<U> {
        match self {
            Self::Pending(signal) => Suspense::Pending(signal),
            Self::Ready(value) => Suspense::Ready(f(value)),
            Self::Failed(exception) => Suspense::Failed(exception),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_suspended_resolves_with_its_load() {
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let mut signal = task::spawn(Suspended::new(rx));

        assert_pending!(signal.poll());
        tx.send(7).unwrap();
        assert!(signal.is_woken());
        assert_ready!(signal.poll());
    }

    #[test]
    fn test_map_keeps_state() {
        let ready: Suspense<u32> = Suspense::Ready(2);
        assert_eq!(ready.map(|v| v * 2).ready(), Some(4));
    }
}
