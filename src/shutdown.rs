//! Cooperative shutdown for the waits between probes

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Sleep until `wake`, returning `true` early once shutdown is requested
pub async fn sleep_until_or_shutdown(wake: Instant, shutdown: &watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    let mut watcher = shutdown.clone();
    tokio::select! {
        _ = sleep_until(wake) => *shutdown.borrow(),
        changed = watcher.wait_for(|stop| *stop) => match changed {
            Ok(_) => true,
            // Sender gone: nobody can request shutdown any more
            Err(_) => {
                sleep_until(wake).await;
                false
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_full_interval_without_shutdown() {
        let (_tx, rx) = watch::channel(false);
        let start = Instant::now();
        assert!(!sleep_until_or_shutdown(start + Duration::from_secs(10), &rx).await);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wakes_early_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            sleep(Duration::from_secs(2)).await;
            let _ = tx.send(true);
        });

        let start = Instant::now();
        assert!(sleep_until_or_shutdown(start + Duration::from_secs(60), &rx).await);
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_still_sleeps() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let start = Instant::now();
        assert!(!sleep_until_or_shutdown(start + Duration::from_secs(5), &rx).await);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
