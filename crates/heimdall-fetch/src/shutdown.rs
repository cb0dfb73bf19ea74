//! Cooperative shutdown signal.
//!
//! A [`ShutdownHandle`] is held by whoever decides when to stop (the
//! scheduler's signal handler, or `main`); [`Shutdown`] receivers are cloned
//! into every task with a suspension point. Dropping the handle counts as a
//! trigger, so orphaned tasks never wait forever.

use tokio::sync::watch;

/// Sender side; triggering is idempotent.
pub struct ShutdownHandle {
  tx: watch::Sender<bool>,
}

impl ShutdownHandle {
  pub fn trigger(&self) {
    self.tx.send_replace(true);
  }
}

/// Receiver side; cheap to clone.
#[derive(Clone)]
pub struct Shutdown {
  rx: watch::Receiver<bool>,
}

impl Shutdown {
  pub fn new() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
  }

  /// A signal that never fires — for one-shot commands and tests that have
  /// no shutdown path.
  pub fn never() -> Shutdown {
    let (tx, rx) = watch::channel(false);
    std::mem::forget(tx);
    Shutdown { rx }
  }

  pub fn is_triggered(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves when the signal fires (or the handle is dropped).
  pub async fn triggered(&self) {
    let mut rx = self.rx.clone();
    if *rx.borrow() {
      return;
    }
    while rx.changed().await.is_ok() {
      if *rx.borrow() {
        return;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn trigger_wakes_waiters() {
    let (handle, shutdown) = Shutdown::new();
    assert!(!shutdown.is_triggered());

    let waiter = {
      let shutdown = shutdown.clone();
      tokio::spawn(async move { shutdown.triggered().await })
    };

    handle.trigger();
    waiter.await.unwrap();
    assert!(shutdown.is_triggered());
  }

  #[tokio::test]
  async fn dropped_handle_counts_as_trigger() {
    let (handle, shutdown) = Shutdown::new();
    drop(handle);
    shutdown.triggered().await;
  }

  #[tokio::test]
  async fn never_stays_pending() {
    let shutdown = Shutdown::never();
    let raced = tokio::time::timeout(
      std::time::Duration::from_millis(20),
      shutdown.triggered(),
    )
    .await;
    assert!(raced.is_err());
  }
}
