//! Deletion notice sent to an external HTTP endpoint
//!
//! Fire-and-forget: the request runs on a small tokio runtime owned by the
//! notifier, and its outcome is only logged. HTTP 200 and 404 both count as
//! delivered.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::core::TrackSummary;
use crate::error::NotifyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDispatch {
    /// Request handed to the runtime
    Dispatched,
    /// No endpoint configured
    Disabled,
}

pub trait Notifier: Send {
    fn notify(&self, track: &TrackSummary) -> Result<NotifyDispatch, NotifyError>;

    /// Delivery counters, for notifiers that send anything
    fn stats(&self) -> Option<Arc<NotifyStats>> {
        None
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct DeletionNotice {
    #[serde(rename = "artistString")]
    artist: String,
    #[serde(rename = "titleString")]
    title: String,
}

/// Outcome counters for requests already dispatched
#[derive(Debug, Default)]
pub struct NotifyStats {
    pub delivered: AtomicUsize,
    pub failed: AtomicUsize,
}

impl NotifyStats {
    pub fn delivered_count(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

pub struct HttpNotifier {
    url: String,
    client: reqwest::Client,
    runtime: Option<tokio::runtime::Runtime>,
    timeout: Duration,
    stats: Arc<NotifyStats>,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("notifier")
            .enable_all()
            .build()
            .map_err(|e| NotifyError::Setup(format!("Failed to create tokio runtime: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Setup(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            client,
            runtime: Some(runtime),
            timeout,
            stats: Arc::new(NotifyStats::default()),
        })
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, track: &TrackSummary) -> Result<NotifyDispatch, NotifyError> {
        let (Some(artist), Some(title)) = (&track.artist, &track.title) else {
            log::info!(
                "Missing artist or title, skipping deletion notice for {}",
                track.path.display()
            );
            return Err(NotifyError::MissingIdentity(track.path.clone()));
        };
        let Some(runtime) = &self.runtime else {
            return Err(NotifyError::Setup("notifier is shut down".to_string()));
        };

        let notice = DeletionNotice {
            artist: artist.clone(),
            title: title.clone(),
        };
        let request = self
            .client
            .delete(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&notice);
        let stats = self.stats.clone();

        log::info!(
            "Sending deletion notice: Artist='{}', Title='{}'",
            notice.artist,
            notice.title
        );

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::OK {
                        log::info!("Deletion notice delivered");
                        stats.delivered.fetch_add(1, Ordering::SeqCst);
                    } else if status == reqwest::StatusCode::NOT_FOUND {
                        log::warn!("Track not known to the endpoint (HTTP 404)");
                        stats.delivered.fetch_add(1, Ordering::SeqCst);
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        log::error!("Deletion notice rejected. Status: {}, Response: {}", status, body);
                        stats.failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Err(e) => {
                    log::error!("Deletion notice failed: {}", e);
                    stats.failed.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        Ok(NotifyDispatch::Dispatched)
    }

    fn stats(&self) -> Option<Arc<NotifyStats>> {
        Some(self.stats.clone())
    }
}

impl Drop for HttpNotifier {
    fn drop(&mut self) {
        // Give in-flight requests up to one timeout before abandoning them
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.timeout);
        }
    }
}

/// Used when no endpoint is configured or notifications are turned off
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNotifier;

impl Notifier for DisabledNotifier {
    fn notify(&self, _track: &TrackSummary) -> Result<NotifyDispatch, NotifyError> {
        Ok(NotifyDispatch::Disabled)
    }
}
