//! Pong-driven liveness deadline for a session's read side.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep};

/// A deadline that is pushed forward every time the peer answers a ping.
///
/// Only pongs refresh it; other inbound frames do not count as liveness.
pub struct Liveness {
    window: Duration,
    deadline: Pin<Box<Sleep>>,
    pongs: u64,
}

impl Liveness {
    /// Start a deadline `window` from now.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: Box::pin(sleep(window)),
            pongs: 0,
        }
    }

    /// Record a pong and move the deadline to `window` from now.
    pub fn mark_alive(&mut self) {
        self.pongs += 1;
        self.deadline.as_mut().reset(Instant::now() + self.window);
    }

    /// Resolves once the deadline passes without a pong.
    pub async fn expired(&mut self) {
        self.deadline.as_mut().await;
    }

    /// Pongs observed so far.
    pub fn pongs(&self) -> u64 {
        self.pongs
    }

    /// Length of the liveness window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_after_window() {
        let start = Instant::now();
        let mut liveness = Liveness::new(Duration::from_secs(60));
        liveness.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(liveness.pongs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_pushes_deadline_forward() {
        let start = Instant::now();
        let mut liveness = Liveness::new(Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(6)).await;
        liveness.mark_alive();
        assert_eq!(liveness.pongs(), 1);
        liveness.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(16));
        assert!(start.elapsed() < Duration::from_secs(17));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_pongs_keep_it_alive() {
        let mut liveness = Liveness::new(Duration::from_millis(300));
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(200)).await;
            liveness.mark_alive();
        }
        let expired = tokio::time::timeout(Duration::from_millis(250), liveness.expired()).await;
        assert!(expired.is_err(), "deadline should still be pending");
        assert_eq!(liveness.pongs(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_after_pongs_stop() {
        let start = Instant::now();
        let mut liveness = Liveness::new(Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(50)).await;
        liveness.mark_alive();
        liveness.expired().await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn window_reported() {
        let liveness = Liveness::new(Duration::from_secs(3));
        assert_eq!(liveness.window(), Duration::from_secs(3));
    }
}
