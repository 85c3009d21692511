//! # Network Monitor
//!
//! Debounced connectivity tracking. Raw reachability samples come either
//! from a polling [`ReachabilityProbe`] or from a platform callback calling
//! [`ConnectivityMonitor::observe`]. A transition is published only after
//! the new state has been seen in enough consecutive samples AND has held
//! for a minimum duration, so a single blip never fires an event.
//!
//! The monitor only publishes; it never triggers a sync itself.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let monitor = Arc::new(ConnectivityMonitor::from_settings(&config.connectivity));
//! let mut events = monitor.subscribe();
//! let _polling = monitor.spawn_polling(Arc::new(HttpProbe::new(&url, timeout)?), interval);
//! while let Ok(state) = events.recv().await {
//!     println!("now {:?}", state.status);
//! }
//! ```

use crate::shared::config::ConnectivitySettings;
use crate::shared::SyncError;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

/// Confirmed connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NetworkStatus {
    Online,
    Offline,
}

/// Result of a single reachability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
    /// No signal available; counted as online, call failures decide
    Unknown,
}

impl Reachability {
    fn as_status(self) -> NetworkStatus {
        match self {
            Reachability::Reachable | Reachability::Unknown => NetworkStatus::Online,
            Reachability::Unreachable => NetworkStatus::Offline,
        }
    }
}

/// Debounced state plus the time of the last confirmed transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    pub status: NetworkStatus,
    pub since: DateTime<Utc>,
}

impl ConnectivityState {
    pub fn is_online(&self) -> bool {
        self.status == NetworkStatus::Online
    }
}

/// Stabilization window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Consecutive contrary samples required
    pub min_samples: u32,
    /// Time the contrary state must hold, measured from its first sample
    pub min_duration: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::from(&ConnectivitySettings::default())
    }
}

impl From<&ConnectivitySettings> for DebounceConfig {
    fn from(settings: &ConnectivitySettings) -> Self {
        Self {
            min_samples: settings.stabilization_samples.max(1),
            min_duration: Duration::from_millis(settings.stabilization_window_ms),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    status: NetworkStatus,
    first_seen: DateTime<Utc>,
    samples: u32,
}

#[derive(Debug)]
struct Debouncer {
    current: ConnectivityState,
    candidate: Option<Candidate>,
}

/// Connectivity monitor
///
/// Construct once per session and share it behind an `Arc`.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    config: DebounceConfig,
    debouncer: Mutex<Debouncer>,
    events: broadcast::Sender<ConnectivityState>,
    state_tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(config: DebounceConfig, initial: NetworkStatus) -> Self {
        let state = ConnectivityState {
            status: initial,
            since: Utc::now(),
        };
        let (events, _) = broadcast::channel(16);
        let (state_tx, _) = watch::channel(state);
        Self {
            config,
            debouncer: Mutex::new(Debouncer {
                current: state,
                candidate: None,
            }),
            events,
            state_tx,
        }
    }

    pub fn from_settings(settings: &ConnectivitySettings) -> Self {
        let initial = if settings.assume_online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };
        Self::new(DebounceConfig::from(settings), initial)
    }

    /// Feed one sample taken at `at`
    ///
    /// Returns the new state when this sample confirms a transition.
    pub fn observe(&self, sample: Reachability, at: DateTime<Utc>) -> Option<ConnectivityState> {
        let status = sample.as_status();
        let confirmed = {
            let mut debouncer = self.debouncer.lock().unwrap_or_else(|e| e.into_inner());
            if status == debouncer.current.status {
                if debouncer.candidate.take().is_some() {
                    tracing::debug!("Connectivity blip to the other state ignored");
                }
                return None;
            }

            let candidate = match debouncer.candidate {
                Some(mut c) if c.status == status => {
                    c.samples += 1;
                    c
                }
                _ => Candidate {
                    status,
                    first_seen: at,
                    samples: 1,
                },
            };

            let held = (at - candidate.first_seen).to_std().unwrap_or(Duration::ZERO);
            if candidate.samples >= self.config.min_samples && held >= self.config.min_duration {
                debouncer.current = ConnectivityState { status, since: at };
                debouncer.candidate = None;
                debouncer.current
            } else {
                debouncer.candidate = Some(candidate);
                return None;
            }
        };

        tracing::info!("Connectivity changed to {:?}", confirmed.status);
        self.state_tx.send_replace(confirmed);
        // no subscribers is fine
        let _ = self.events.send(confirmed);
        Some(confirmed)
    }

    pub fn state(&self) -> ConnectivityState {
        self.debouncer.lock().unwrap_or_else(|e| e.into_inner()).current
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Transition events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityState> {
        self.events.subscribe()
    }

    /// Latest confirmed state
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    /// Sample `probe` every `interval` until the handle is stopped or dropped
    pub fn spawn_polling(self: &Arc<Self>, probe: Arc<dyn ReachabilityProbe>, interval: Duration) -> MonitorHandle {
        let monitor = Arc::clone(self);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = &mut stop_rx => break,
                }
                let sample = probe.probe().await;
                tracing::trace!("Reachability sample: {:?}", sample);
                monitor.observe(sample, Utc::now());
            }
            tracing::debug!("Connectivity polling stopped");
        });

        MonitorHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// Handle to a polling task
#[derive(Debug)]
pub struct MonitorHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop polling and wait for the task to exit
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Connectivity polling task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Source of raw reachability samples
pub trait ReachabilityProbe: Send + Sync {
    fn probe(&self) -> BoxFuture<'_, Reachability>;
}

/// Probe issuing a HEAD request against the remote base URL
///
/// Any HTTP response counts as reachable.
#[derive(Debug)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::validation("HTTP_CLIENT", format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl ReachabilityProbe for HttpProbe {
    fn probe(&self) -> BoxFuture<'_, Reachability> {
        Box::pin(async move {
            match self.client.head(&self.url).send().await {
                Ok(_) => Reachability::Reachable,
                Err(e) if e.is_timeout() || e.is_connect() => Reachability::Unreachable,
                Err(e) => {
                    tracing::debug!("Reachability probe inconclusive: {}", e);
                    Reachability::Unknown
                }
            }
        })
    }
}
