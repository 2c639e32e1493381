use std::time::Duration;
use tokio::sync::watch;

pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

pub fn is_requested(shutdown: &ShutdownReceiver) -> bool {
    *shutdown.borrow()
}

/// Sleep for `dur` unless shutdown is requested first. Returns true on shutdown.
///
/// A dropped sender can no longer request shutdown, so the full sleep is served.
pub async fn sleep_or_shutdown(dur: Duration, shutdown: &mut ShutdownReceiver) -> bool {
    if is_requested(shutdown) {
        return true;
    }
    let sleep = tokio::time::sleep(dur);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            res = shutdown.changed() => match res {
                Ok(()) if is_requested(shutdown) => return true,
                Ok(()) => continue,
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleeps_full_duration_without_signal() {
        let (_tx, mut rx) = channel();
        let start = tokio::time::Instant::now();
        assert!(!sleep_or_shutdown(Duration::from_secs(30), &mut rx).await);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_early_on_shutdown() {
        let (tx, mut rx) = channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = tx.send(true);
        });
        let start = tokio::time::Instant::now();
        assert!(sleep_or_shutdown(Duration::from_secs(300), &mut rx).await);
        assert!(start.elapsed() < Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_is_not_shutdown() {
        let (tx, mut rx) = channel();
        drop(tx);
        assert!(!sleep_or_shutdown(Duration::from_secs(1), &mut rx).await);
    }
}
