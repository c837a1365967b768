//! Service-side half of registration.
//!
//! A backend announces itself by posting its reachable address to the
//! router's registration listener, retrying until the router answers.

use std::time::Duration;

use rand::Rng;
use reqwest::Client;

use crate::api::NotifyReq;

use super::{http::base_url, RemoteError};

/// Exponential backoff with optional jitter.
#[derive(Clone, Debug)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: bool,
    attempt: i32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(400), Duration::from_secs(5), 1.2, true)
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, factor: f64, jitter: bool) -> Self {
        Self {
            min,
            max,
            factor,
            jitter,
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt, always within `[min, max]`.
    pub fn next_delay(&mut self) -> Duration {
        let min = self.min.as_millis() as f64;
        let max = self.max.as_millis() as f64;
        let mut delay = (min * self.factor.powi(self.attempt)).min(max);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter && delay > min {
            delay = rand::thread_rng().gen_range(min..=delay);
        }
        Duration::from_millis(delay.max(min) as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Posts `service_address` to the router until it is acknowledged.
pub async fn register_on_router(
    client: &Client,
    router_address: &str,
    service_address: &str,
    backoff: &mut Backoff,
) {
    loop {
        match notify(client, router_address, service_address).await {
            Ok(()) => {
                log::info!("registered {service_address} on router {router_address}");
                backoff.reset();
                return;
            }
            Err(e) => {
                let delay = backoff.next_delay();
                log::warn!(
                    "notify router {router_address} failed: {e}, retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn notify(client: &Client, router_address: &str, service_address: &str) -> Result<(), RemoteError> {
    let resp = client
        .post(format!("{}/notify", base_url(router_address)))
        .json(&NotifyReq {
            service_address: service_address.to_string(),
        })
        .send()
        .await
        .map_err(|e| RemoteError::Transport(e.to_string()))?;

    if resp.status().is_success() {
        Ok(())
    } else {
        Err(RemoteError::Transport(format!("router answered {}", resp.status())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_until_max() {
        let mut bo = Backoff::new(Duration::from_millis(400), Duration::from_secs(5), 1.2, false);
        let delays: Vec<_> = (0..30).map(|_| bo.next_delay()).collect();

        assert_eq!(delays[0], Duration::from_millis(400));
        assert_eq!(delays[1], Duration::from_millis(480));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let mut bo = Backoff::default();
        for _ in 0..100 {
            let d = bo.next_delay();
            assert!(d >= Duration::from_millis(400));
            assert!(d <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_backoff_reset() {
        let mut bo = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 2.0, false);
        bo.next_delay();
        bo.next_delay();
        bo.reset();
        assert_eq!(bo.next_delay(), Duration::from_millis(100));
    }
}
