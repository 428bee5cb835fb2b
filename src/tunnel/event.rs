use std::sync::Arc;

use tokio::sync::watch;

/// One-shot, clonable stop flag. Any clone can set it; every waiter wakes
/// and stays woken. Setting twice is a no-op.
#[derive(Clone, Debug)]
pub struct Event {
    tx: Arc<watch::Sender<bool>>,
}

impl Event {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Event { tx: Arc::new(tx) }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for returns immediately when the value is already true
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_wakes_all_waiters() {
        let event = Event::new();
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let waiter = event.clone();
            tasks.push(tokio::spawn(async move {
                waiter.wait().await;
            }));
        }

        event.set();
        for task in tasks {
            tokio::time::timeout(std::time::Duration::from_secs(2), task)
                .await
                .expect("waiter did not wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_after_set_returns_immediately() {
        let event = Event::new();
        event.set();
        assert!(event.is_set());
        event.wait().await;

        // Setting again changes nothing
        event.set();
        event.wait().await;
    }
}
