//! Concurrency pipeline primitives.
//!
//! [`generator`] turns a fixed set of values into a lazy sequence and
//! [`fan_in`] merges independently-produced sequences into one. Both observe
//! a shared [`CancellationToken`] at every blocking point, so a driver that
//! hits a failure can cancel once and every in-flight stage winds down
//! instead of leaking.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Produce the given values as a lazy sequence.
///
/// The sequence is finite and not restartable. Each element is emitted only
/// if the token has not been cancelled first; a pre-cancelled token yields an
/// empty sequence.
pub fn generator<T: Send + 'static>(
  cancel: CancellationToken,
  values: Vec<T>,
) -> mpsc::Receiver<T> {
  let (tx, rx) = mpsc::channel(1);

  tokio::spawn(async move {
    for value in values {
      tokio::select! {
        _ = cancel.cancelled() => return,
        sent = tx.send(value) => {
          if sent.is_err() {
            return;
          }
        }
      }
    }
  });

  rx
}

/// Merge independently-produced sequences into one interleaved sequence.
///
/// The merged sequence closes once every source has closed or the token is
/// cancelled. Relative interleaving order across sources is unspecified; each
/// element of each source is forwarded exactly once.
pub fn fan_in<T: Send + 'static>(
  cancel: CancellationToken,
  sources: Vec<mpsc::Receiver<T>>,
) -> mpsc::Receiver<T> {
  let (tx, rx) = mpsc::channel(1);

  for mut source in sources {
    let tx = tx.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move {
      loop {
        let value = tokio::select! {
          _ = cancel.cancelled() => return,
          value = source.recv() => match value {
            Some(value) => value,
            None => return,
          },
        };

        tokio::select! {
          _ = cancel.cancelled() => return,
          sent = tx.send(value) => {
            if sent.is_err() {
              return;
            }
          }
        }
      }
    });
  }

  // The merged stream closes when the last forwarder drops its sender.
  rx
}
