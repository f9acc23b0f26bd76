//! Version lifecycle: `installing → waiting → active`.
//!
//! The controller is a plain state machine. Every transition is a
//! synchronous method that returns what happened; storage side effects
//! (recording versions, deleting stale caches) are the caller's job. Events
//! for the embedding application go out on a broadcast channel.
//!
//! A waiting version takes over when the active version has no open
//! sessions left, or immediately on [`LifecycleController::skip_waiting`].
//! On takeover every open session is claimed by the new version.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::Error;

const EVENT_CAPACITY: usize = 16;

/// Lifecycle state of one layer version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Installing,
    Waiting,
    Active,
    /// Superseded by a newer version.
    Redundant,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installing" => Ok(LifecycleState::Installing),
            "waiting" => Ok(LifecycleState::Waiting),
            "active" => Ok(LifecycleState::Active),
            "redundant" => Ok(LifecycleState::Redundant),
            other => Err(Error::CorruptEntry(format!("unknown lifecycle state: {other}"))),
        }
    }
}

/// Observable lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A new version is installed and waiting to take control.
    UpdateWaiting { version: String },
    /// A version now controls every open session.
    UpdateActivated { version: String, previous: Option<String> },
}

/// Identifier of an open page session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A completed `waiting → active` transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub version: String,
    pub previous: Option<String>,
    pub claimed_sessions: usize,
}

/// What a finished install did besides moving its version to waiting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Set when the new version took over at once.
    pub activation: Option<Activation>,
    /// The older waiting version the new one displaced, now redundant.
    pub superseded: Option<String>,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct LifecycleSnapshot {
    pub active: Option<String>,
    pub waiting: Option<String>,
    pub installing: Option<String>,
    pub open_sessions: usize,
}

/// Explicit three-state lifecycle for layer versions.
#[derive(Debug)]
pub struct LifecycleController {
    active: Option<String>,
    waiting: Option<String>,
    installing: Option<String>,
    /// Session → controlling version (`None` = uncontrolled).
    sessions: BTreeMap<SessionId, Option<String>>,
    next_session: u64,
    events: broadcast::Sender<LifecycleEvent>,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LifecycleController {
    /// Start with `active` already in control (e.g. restored from storage).
    pub fn new(active: Option<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { active, waiting: None, installing: None, sessions: BTreeMap::new(), next_session: 1, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn waiting(&self) -> Option<&str> {
        self.waiting.as_deref()
    }

    pub fn state_of(&self, version: &str) -> Option<LifecycleState> {
        if self.active.as_deref() == Some(version) {
            Some(LifecycleState::Active)
        } else if self.waiting.as_deref() == Some(version) {
            Some(LifecycleState::Waiting)
        } else if self.installing.as_deref() == Some(version) {
            Some(LifecycleState::Installing)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            active: self.active.clone(),
            waiting: self.waiting.clone(),
            installing: self.installing.clone(),
            open_sessions: self.sessions.len(),
        }
    }

    /// Start installing `version`. Only one install may run at a time.
    pub fn begin_install(&mut self, version: &str) -> Result<(), Error> {
        if let Some(current) = &self.installing {
            return Err(Error::Lifecycle(format!("version {current} is already installing")));
        }
        if self.active.as_deref() == Some(version) {
            return Err(Error::Lifecycle(format!("version {version} is already active")));
        }
        self.installing = Some(version.to_string());
        tracing::info!(version, "installing layer version");
        Ok(())
    }

    /// Precache succeeded: `version` becomes waiting, and takes over at
    /// once if the active version has no sessions to drain.
    pub fn finish_install(&mut self, version: &str) -> Result<InstallOutcome, Error> {
        if self.installing.as_deref() != Some(version) {
            return Err(Error::Lifecycle(format!("version {version} is not installing")));
        }
        self.installing = None;
        let superseded = self.waiting.replace(version.to_string());
        if let Some(replaced) = &superseded {
            tracing::info!(version = %replaced, "waiting version superseded");
        }
        tracing::info!(version, "layer version waiting");
        self.emit(LifecycleEvent::UpdateWaiting { version: version.to_string() });

        let activation = if self.controlled_sessions() == 0 { self.activate() } else { None };
        Ok(InstallOutcome { activation, superseded })
    }

    /// Precache failed; the previous version keeps serving.
    pub fn fail_install(&mut self, version: &str) {
        if self.installing.as_deref() == Some(version) {
            self.installing = None;
            tracing::warn!(version, "layer version install failed");
        }
    }

    /// The explicit "activate now" signal. `None` when nothing is waiting.
    pub fn skip_waiting(&mut self) -> Option<Activation> {
        self.activate()
    }

    /// Register a page session, controlled by the active version if any.
    pub fn open_session(&mut self) -> SessionId {
        let id = SessionId(self.next_session);
        self.next_session += 1;
        self.sessions.insert(id, self.active.clone());
        id
    }

    /// Close a session; the waiting version activates once the active
    /// version's last session is gone.
    pub fn close_session(&mut self, id: SessionId) -> Result<Option<Activation>, Error> {
        if self.sessions.remove(&id).is_none() {
            return Err(Error::Lifecycle(format!("unknown session {id}")));
        }
        if self.waiting.is_some() && self.controlled_sessions() == 0 {
            return Ok(self.activate());
        }
        Ok(None)
    }

    /// Version controlling `id`, if the session exists and is controlled.
    pub fn controller_of(&self, id: SessionId) -> Option<&str> {
        self.sessions.get(&id).and_then(|v| v.as_deref())
    }

    fn controlled_sessions(&self) -> usize {
        match &self.active {
            Some(active) => self.sessions.values().filter(|v| v.as_deref() == Some(active.as_str())).count(),
            None => 0,
        }
    }

    fn activate(&mut self) -> Option<Activation> {
        let version = self.waiting.take()?;
        let previous = self.active.replace(version.clone());
        for controller in self.sessions.values_mut() {
            *controller = Some(version.clone());
        }
        let claimed_sessions = self.sessions.len();
        tracing::info!(version, previous = ?previous, claimed_sessions, "layer version active");
        self.emit(LifecycleEvent::UpdateActivated { version: version.clone(), previous: previous.clone() });
        Some(Activation { version, previous, claimed_sessions })
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_install_activates_immediately() {
        let mut lc = LifecycleController::default();
        let mut rx = lc.subscribe();

        lc.begin_install("v1").unwrap();
        assert_eq!(lc.state_of("v1"), Some(LifecycleState::Installing));
        let activation = lc.finish_install("v1").unwrap().activation.unwrap();

        assert_eq!(activation, Activation { version: "v1".into(), previous: None, claimed_sessions: 0 });
        assert_eq!(lc.state_of("v1"), Some(LifecycleState::Active));
        assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::UpdateWaiting { version: "v1".into() });
        assert_eq!(
            rx.try_recv().unwrap(),
            LifecycleEvent::UpdateActivated { version: "v1".into(), previous: None }
        );
    }

    #[test]
    fn test_update_waits_for_open_sessions() {
        let mut lc = LifecycleController::new(Some("v1".into()));
        let session = lc.open_session();

        lc.begin_install("v2").unwrap();
        assert_eq!(lc.finish_install("v2").unwrap(), InstallOutcome::default());
        assert_eq!(lc.state_of("v2"), Some(LifecycleState::Waiting));
        assert_eq!(lc.controller_of(session), Some("v1"));

        let activation = lc.close_session(session).unwrap().unwrap();
        assert_eq!(activation.version, "v2");
        assert_eq!(activation.previous.as_deref(), Some("v1"));
        assert_eq!(lc.active(), Some("v2"));
    }

    #[test]
    fn test_skip_waiting_claims_sessions() {
        let mut lc = LifecycleController::new(Some("v1".into()));
        let a = lc.open_session();
        let b = lc.open_session();
        lc.begin_install("v2").unwrap();
        lc.finish_install("v2").unwrap();

        let activation = lc.skip_waiting().unwrap();
        assert_eq!(activation.claimed_sessions, 2);
        assert_eq!(lc.controller_of(a), Some("v2"));
        assert_eq!(lc.controller_of(b), Some("v2"));
        assert!(lc.waiting().is_none());
    }

    #[test]
    fn test_skip_waiting_without_waiting_version() {
        let mut lc = LifecycleController::new(Some("v1".into()));
        assert!(lc.skip_waiting().is_none());
        assert_eq!(lc.active(), Some("v1"));
    }

    #[test]
    fn test_failed_install_leaves_active() {
        let mut lc = LifecycleController::new(Some("v1".into()));
        lc.begin_install("v2").unwrap();
        lc.fail_install("v2");
        assert_eq!(lc.state_of("v2"), None);
        assert_eq!(lc.active(), Some("v1"));
        assert!(lc.finish_install("v2").is_err());
    }

    #[test]
    fn test_single_install_at_a_time() {
        let mut lc = LifecycleController::default();
        lc.begin_install("v1").unwrap();
        assert!(matches!(lc.begin_install("v2"), Err(Error::Lifecycle(_))));
    }

    #[test]
    fn test_reinstalling_active_rejected() {
        let mut lc = LifecycleController::new(Some("v1".into()));
        assert!(lc.begin_install("v1").is_err());
    }

    #[test]
    fn test_uncontrolled_sessions_do_not_block() {
        let mut lc = LifecycleController::default();
        let s = lc.open_session();
        assert_eq!(lc.controller_of(s), None);

        lc.begin_install("v1").unwrap();
        let activation = lc.finish_install("v1").unwrap().activation.unwrap();
        assert_eq!(activation.claimed_sessions, 1);
        assert_eq!(lc.controller_of(s), Some("v1"));
    }

    #[test]
    fn test_newer_waiting_version_replaces_older() {
        let mut lc = LifecycleController::new(Some("v1".into()));
        lc.open_session();
        lc.begin_install("v2").unwrap();
        assert_eq!(lc.finish_install("v2").unwrap().superseded, None);
        lc.begin_install("v3").unwrap();
        let outcome = lc.finish_install("v3").unwrap();
        assert_eq!(outcome.superseded.as_deref(), Some("v2"));
        assert!(outcome.activation.is_none());
        assert_eq!(lc.waiting(), Some("v3"));
        assert_eq!(lc.state_of("v2"), None);
        assert_eq!(lc.skip_waiting().unwrap().version, "v3");
    }

    #[test]
    fn test_close_unknown_session() {
        let mut lc = LifecycleController::default();
        assert!(lc.close_session(SessionId(42)).is_err());
    }

    #[test]
    fn test_state_round_trip_names() {
        for state in [
            LifecycleState::Installing,
            LifecycleState::Waiting,
            LifecycleState::Active,
            LifecycleState::Redundant,
        ] {
            assert_eq!(state.as_str().parse::<LifecycleState>().unwrap(), state);
        }
    }
}
