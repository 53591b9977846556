use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::fetch::{HttpFetch, TransportError};
use crate::backoff::Backoff;

/// Client for the connection box's `sendmsg.lua` command endpoint
///
/// Every call is retried up to `retries` extra times, sleeping for the next
/// delay of a backoff sequence shared by all calls. Once the budget is spent
/// the call yields `None`: callers treat that as "no data this cycle".
pub struct Transport<F: HttpFetch> {
    fetch: F,
    backoff: Mutex<Backoff>,
    retries: u32,
}

/// URL for one remote command; the command string goes in verbatim
pub fn command_url(hostname: &str, command: &str) -> String {
    format!("http://{}/cgi-bin/sendmsg.lua?cmd={}", hostname, command)
}

impl<F: HttpFetch> Transport<F> {
    pub fn new(fetch: F, backoff: Backoff, retries: u32) -> Self {
        Self {
            fetch,
            backoff: Mutex::new(backoff),
            retries,
        }
    }

    pub async fn send_command(&self, hostname: &str, command: &str) -> Option<Value> {
        let url = command_url(hostname, command);
        let mut attempt: u32 = 0;

        loop {
            debug!("API call: {}", url);
            match self.get_json(&url).await {
                Ok(body) => {
                    debug!("API response: {}", body);
                    return Some(body);
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    let delay = self.next_delay();
                    debug!(
                        "API call to {} failed ({}), retry {}/{} in {:?}",
                        hostname, e, attempt, self.retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("API call to {} failed ({}), no more retries", hostname, e);
                    return None;
                }
            }
        }
    }

    pub async fn fetch_state(&self, hostname: &str) -> Option<Value> {
        self.send_command(hostname, "GET ALLS").await
    }

    pub async fn set_power_state(&self, hostname: &str, on: bool) -> Option<Value> {
        let command = if on { "CMD ON" } else { "CMD OFF" };
        self.send_command(hostname, command).await
    }

    pub async fn set_target_temperature(&self, hostname: &str, temperature: f64) -> Option<Value> {
        self.send_command(hostname, &format!("SET SETP {}", temperature))
            .await
    }

    async fn get_json(&self, url: &str) -> Result<Value, TransportError> {
        let response = self.fetch.get(url).await?;
        if response.status != 200 {
            return Err(TransportError::Status(response.status));
        }
        Ok(serde_json::from_str(&response.body)?)
    }

    fn next_delay(&self) -> Duration {
        self.backoff
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .next_duration()
    }
}
