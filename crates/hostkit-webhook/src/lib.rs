//! Alert channel delivery for HostKit lifecycle events.
//!
//! A project's [`AlertChannel`](hostkit_types::AlertChannel) rows point at
//! webhook URLs; this crate turns an [`AlertEvent`] into a signed HTTP POST.
//! Delivery is fire-and-forget (spawned on its own thread) so a slow or
//! unreachable alert endpoint never blocks a deploy — the caller supplies an
//! `on_result` callback to persist the outcome into `AlertHistory`.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub secret: Option<String>,
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            secret: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Lifecycle events that can trigger an alert delivery, matching
/// [`hostkit_types::EventCategory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    DeployStarted {
        project: String,
        release_id: String,
    },
    DeployCompleted {
        project: String,
        release_id: String,
        duration_ms: u64,
    },
    DeployFailed {
        project: String,
        release_id: String,
        error_code: String,
        message: String,
    },
    ProjectPaused {
        project: String,
        failure_count: u32,
        window_minutes: u32,
    },
    HealthDegraded {
        project: String,
        reason: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertPayload {
    pub timestamp: DateTime<Utc>,
    pub event: AlertEvent,
}

/// Fire-and-forget webhook client for alert delivery.
pub struct WebhookClient {
    client: reqwest::blocking::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .context("webhook URL is required when the channel is enabled")?;
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url,
            secret: config.secret.clone(),
        })
    }

    /// Sends `event`, invoking `on_result(success)` from the delivery thread
    /// once the attempt finishes, so the caller can record it in AlertHistory.
    pub fn send_event(&self, event: AlertEvent, on_result: impl FnOnce(bool) + Send + 'static) {
        let payload = AlertPayload {
            timestamp: Utc::now(),
            event,
        };
        let client = self.client.clone();
        let url = self.url.clone();
        let secret = self.secret.clone();

        std::thread::spawn(move || {
            let result = do_send_event(&client, &url, secret.as_deref(), &payload);
            let success = result.is_ok();
            if let Err(e) = result {
                eprintln!("[warn] alert delivery failed (non-blocking): {:#}", e);
            }
            on_result(success);
        });
    }
}

fn do_send_event(
    client: &reqwest::blocking::Client,
    url: &str,
    secret: Option<&str>,
    payload: &AlertPayload,
) -> Result<()> {
    let json = serde_json::to_string(payload).context("failed to serialize alert payload")?;
    let mut request = client.post(url).header("Content-Type", "application/json");

    if let Some(secret) = secret {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;
        type HmacSha256 = Hmac<Sha256>;
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
        mac.update(json.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        request = request.header("X-HostKit-Signature", format!("sha256={signature}"));
    }

    let response = request
        .body(json)
        .send()
        .context("failed to send alert request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        anyhow::bail!("alert endpoint returned {}: {}", status, body);
    }
    Ok(())
}

/// Convenience wrapper: sends `event` only if `config.enabled` and a URL is
/// set, returning silently otherwise. `on_result` is only invoked if a send
/// was actually attempted.
pub fn maybe_send_event(
    config: &WebhookConfig,
    event: AlertEvent,
    on_result: impl FnOnce(bool) + Send + 'static,
) {
    if !config.enabled {
        return;
    }
    let client = match WebhookClient::new(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[warn] failed to build alert client: {:#}", e);
            return;
        }
    };
    client.send_event(event, on_result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn spawn_counter_server() -> (String, Arc<AtomicUsize>, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let handle = thread::spawn(move || {
            for stream in listener.incoming().take(10) {
                let mut stream = stream.expect("stream");
                let counter = counter_clone.clone();
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                counter.fetch_add(1, Ordering::SeqCst);
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });

        (format!("http://{addr}"), counter, handle)
    }

    #[test]
    fn webhook_config_defaults_are_disabled() {
        let config = WebhookConfig::default();
        assert!(!config.enabled);
        assert!(config.url.is_none());
    }

    #[test]
    fn alert_payload_round_trips_through_json() {
        let payload = AlertPayload {
            timestamp: Utc::now(),
            event: AlertEvent::DeployStarted {
                project: "blog".into(),
                release_id: "20260729-1".into(),
            },
        };
        let json = serde_json::to_string(&payload).expect("serialize");
        let parsed: AlertPayload = serde_json::from_str(&json).expect("deserialize");
        match parsed.event {
            AlertEvent::DeployStarted { project, release_id } => {
                assert_eq!(project, "blog");
                assert_eq!(release_id, "20260729-1");
            }
            _ => panic!("unexpected event type"),
        }
    }

    #[test]
    fn webhook_client_requires_url() {
        let config = WebhookConfig {
            enabled: true,
            url: None,
            ..Default::default()
        };
        assert!(WebhookClient::new(&config).is_err());
    }

    #[test]
    fn send_event_delivers_and_reports_success() {
        let (url, counter, _handle) = spawn_counter_server();
        let config = WebhookConfig {
            enabled: true,
            url: Some(url),
            secret: Some("shh".into()),
            timeout: Duration::from_secs(5),
        };
        let client = WebhookClient::new(&config).expect("client");

        let (tx, rx) = std::sync::mpsc::channel();
        client.send_event(
            AlertEvent::ProjectPaused {
                project: "blog".into(),
                failure_count: 5,
                window_minutes: 10,
            },
            move |success| {
                let _ = tx.send(success);
            },
        );

        let success = rx.recv_timeout(Duration::from_secs(2)).expect("callback fired");
        assert!(success);
        assert!(counter.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn maybe_send_event_skips_when_disabled() {
        let config = WebhookConfig::default();
        maybe_send_event(
            &config,
            AlertEvent::HealthDegraded {
                project: "blog".into(),
                reason: "4xx on /api/health".into(),
            },
            |_| panic!("callback must not fire when disabled"),
        );
    }
}
