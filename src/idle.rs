//! Page quiescence detection.
//!
//! The browser never says "done loading", so we infer it: every navigation
//! start and resource request bumps a counter, every completed or timed-out
//! resource drops it, and each event re-arms a debounce deadline. When the
//! deadline passes with the counter at zero, the page is stable.
//!
//! An [`IdleDetector`] covers exactly one wait episode. A second navigation
//! (such as the diff-rendering page) gets a fresh detector.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::{Result, WatchError};

/// Location of a page before its first real navigation.
pub const BLANK_URL: &str = "about:blank";

/// Outcome of a main-document load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Success,
    Fail(String),
}

/// Lifecycle and network events a page reports while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// The main frame committed to a new location.
    Navigated { url: String },
    LoadStarted,
    LoadFinished(LoadStatus),
    ResourceRequested { id: Option<String> },
    /// A resource finished downloading (stage = end).
    ResourceReceived { id: Option<String> },
    ResourceTimeout { id: Option<String> },
}

/// What an event did to the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Counter updated and debounce re-armed to the given deadline.
    Rearmed(Instant),
    /// Event did not count (blank document, duplicate completion, or the
    /// episode is already over).
    Ignored,
    /// The main document failed; the episode is over.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Quiet period elapsed with nothing pending.
    Stable,
    /// Deadline passed but requests are still open.
    Pending(i64),
    /// Nothing was due yet.
    NotDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Stable,
    Failed,
}

#[derive(Debug)]
pub struct IdleDetector {
    delay: Duration,
    resource_timeout: Option<Duration>,
    pending: i64,
    deadline: Option<Instant>,
    location: String,
    /// Counted `LoadStarted` events not yet balanced by a successful load.
    open_loads: u32,
    in_flight: HashMap<String, Instant>,
    expired: HashSet<String>,
    phase: Phase,
}

impl IdleDetector {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            resource_timeout: None,
            pending: 0,
            deadline: None,
            location: BLANK_URL.to_string(),
            open_loads: 0,
            in_flight: HashMap::new(),
            expired: HashSet::new(),
            phase: Phase::Waiting,
        }
    }

    /// Expire requests that stay open longer than `timeout`.
    pub fn with_resource_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resource_timeout = timeout;
        self
    }

    pub fn pending(&self) -> i64 {
        self.pending
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_stable(&self) -> bool {
        self.phase == Phase::Stable
    }

    /// Earliest instant at which [`IdleDetector::on_timer`] has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        if self.phase != Phase::Waiting {
            return None;
        }
        let expiry = self
            .resource_timeout
            .and_then(|limit| self.in_flight.values().min().map(|start| *start + limit));
        match (self.deadline, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn on_event(&mut self, event: PageEvent, now: Instant) -> Transition {
        if self.phase != Phase::Waiting {
            return Transition::Ignored;
        }
        match event {
            PageEvent::Navigated { url } => {
                self.location = url;
                return Transition::Ignored;
            }
            PageEvent::LoadStarted => {
                if self.location == BLANK_URL {
                    return Transition::Ignored;
                }
                self.pending += 1;
                self.open_loads += 1;
            }
            PageEvent::LoadFinished(LoadStatus::Fail(reason)) => {
                self.phase = Phase::Failed;
                self.deadline = None;
                return Transition::Failed(reason);
            }
            PageEvent::LoadFinished(LoadStatus::Success) => {
                if self.open_loads > 0 {
                    self.open_loads -= 1;
                    self.pending -= 1;
                }
            }
            PageEvent::ResourceRequested { id } => {
                if let Some(id) = id {
                    if self.resource_timeout.is_some() {
                        self.in_flight.insert(id, now);
                    }
                }
                self.pending += 1;
            }
            PageEvent::ResourceReceived { id } | PageEvent::ResourceTimeout { id } => {
                if let Some(id) = id {
                    if self.expired.remove(&id) {
                        return Transition::Ignored;
                    }
                    self.in_flight.remove(&id);
                }
                self.pending -= 1;
            }
        }
        trace!(pending = self.pending, "page event counted");
        Transition::Rearmed(self.rearm(now))
    }

    /// Handles a timer wakeup at `now`.
    pub fn on_timer(&mut self, now: Instant) -> TimerOutcome {
        if self.phase != Phase::Waiting {
            return TimerOutcome::NotDue;
        }

        if let Some(limit) = self.resource_timeout {
            let overdue: Vec<String> = self
                .in_flight
                .iter()
                .filter(|(_, start)| **start + limit <= now)
                .map(|(id, _)| id.clone())
                .collect();
            if !overdue.is_empty() {
                for id in overdue {
                    debug!(request = %id, "resource timed out");
                    self.in_flight.remove(&id);
                    self.expired.insert(id);
                    self.pending -= 1;
                }
                self.rearm(now);
                return TimerOutcome::NotDue;
            }
        }

        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                if self.pending == 0 {
                    self.phase = Phase::Stable;
                    TimerOutcome::Stable
                } else {
                    TimerOutcome::Pending(self.pending)
                }
            }
            _ => TimerOutcome::NotDue,
        }
    }

    fn rearm(&mut self, now: Instant) -> Instant {
        let deadline = now + self.delay;
        self.deadline = Some(deadline);
        deadline
    }
}

/// Report of a completed wait episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub location: String,
    pub events: usize,
    pub elapsed: Duration,
}

/// Drives `detector` from `events` until the page settles.
///
/// Fails with [`WatchError::PageLoad`] when the main document fails and with
/// [`WatchError::Timeout`] when `max_wait` passes first.
pub async fn wait_for_quiescence(
    mut detector: IdleDetector,
    events: &mut UnboundedReceiver<PageEvent>,
    url: &str,
    max_wait: Duration,
) -> Result<Settled> {
    let started = Instant::now();
    let give_up = started + max_wait;
    let mut seen = 0usize;

    loop {
        let wakeup = detector.next_wakeup();
        tokio::select! {
            biased;

            event = events.recv() => {
                let Some(event) = event else {
                    return Err(WatchError::browser(format!(
                        "event stream for {url} closed before the page settled"
                    )));
                };
                seen += 1;
                if let Transition::Failed(reason) = detector.on_event(event, Instant::now()) {
                    return Err(WatchError::page_load(url, reason));
                }
            }
            _ = sleep_until_opt(wakeup) => {
                match detector.on_timer(Instant::now()) {
                    TimerOutcome::Stable => {
                        debug!(url, events = seen, "page settled");
                        return Ok(Settled {
                            location: detector.location().to_string(),
                            events: seen,
                            elapsed: started.elapsed(),
                        });
                    }
                    TimerOutcome::Pending(pending) => {
                        debug!(url, pending, "quiet period elapsed with requests open");
                    }
                    TimerOutcome::NotDue => {}
                }
            }
            _ = sleep_until(give_up) => {
                return Err(WatchError::Timeout {
                    url: url.to_string(),
                    waited: max_wait,
                });
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
