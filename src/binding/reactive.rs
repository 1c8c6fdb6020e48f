//! Reactive Values
//!
//! A memoized value with subscribe/notify semantics: subscribers are only
//! woken when the value actually changes.

use tokio::sync::watch;

/// Derived value published through a watch channel
pub struct Computed<T> {
    sender: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Computed<T> {
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Replace the value; returns whether subscribers were notified
    pub fn set(&self, value: T) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_equal_values_do_not_notify() {
        let computed = Computed::new(1);
        let mut rx = computed.subscribe();

        assert!(!computed.set(1));
        assert!(!rx.has_changed().unwrap());

        assert!(computed.set(2));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 2);
        assert_eq!(computed.get(), 2);
    }
}
