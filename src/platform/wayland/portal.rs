//! Remote-desktop portal session state machine
//!
//! The portal handshake is three asynchronous request/response round trips:
//! CreateSession, SelectDevices, Start. Each response carries a numeric code
//! (0 = success, 1 = user cancelled) and a result map. This module holds the
//! handshake as an explicit state machine consuming plain response values, so
//! it is testable without a live compositor; the bus plumbing lives in the
//! parent module.

use crate::error::AutoTypeError;
use tracing::{debug, info, warn};

/// Keyboard | pointer device bitmask requested from the portal
pub const DEVICE_MASK: u32 = 3;

/// Ask the portal to persist the grant across application restarts
pub const PERSIST_MODE: u32 = 2;

/// Handshake progress; only `Ready` permits input injection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    AwaitingSessionCreated,
    AwaitingDeviceSelection,
    AwaitingStart,
    Ready,
}

/// Next bus call the backend must issue to advance the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalCommand {
    CreateSession,
    SelectDevices {
        session_handle: String,
    },
    /// Presenting a cached restore token skips interactive consent
    Start {
        session_handle: String,
        restore_token: Option<String>,
    },
}

/// A portal response reduced to the fields the handshake consumes
#[derive(Debug, Clone, Default)]
pub struct PortalResponse {
    pub code: u32,
    pub session_handle: Option<String>,
    pub restore_token: Option<String>,
}

impl PortalResponse {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// The portal session: handle, restore token, handshake state
///
/// Process-lifetime with possible reconnection; the restore token survives
/// session invalidation and process restarts.
#[derive(Debug)]
pub struct PortalStateMachine {
    state: SessionState,
    session_handle: Option<String>,
    restore_token: Option<String>,
}

impl PortalStateMachine {
    pub fn new(restore_token: Option<String>) -> Self {
        Self {
            state: SessionState::Unstarted,
            session_handle: None,
            restore_token,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn session_handle(&self) -> Option<&str> {
        self.session_handle.as_deref()
    }

    pub fn restore_token(&self) -> Option<&str> {
        self.restore_token.as_deref()
    }

    /// Begin the handshake
    ///
    /// A mid-handshake state here means a previous attempt was abandoned
    /// (the caller gave up waiting on a portal response that will never be
    /// consumed); discard it and recreate the session from scratch rather
    /// than staying wedged.
    pub fn start(&mut self) -> PortalCommand {
        if self.state != SessionState::Unstarted {
            warn!(state = ?self.state, "restarting abandoned portal handshake");
            self.reset();
        }
        self.state = SessionState::AwaitingSessionCreated;
        PortalCommand::CreateSession
    }

    /// Consume one portal response; returns the next command to issue, or
    /// `None` once the session is ready
    ///
    /// Any failure response resets the session to `Unstarted` and aborts the
    /// run. The restore token is kept so the next attempt can still skip
    /// consent if the grant is intact.
    pub fn handle_response(
        &mut self,
        response: PortalResponse,
    ) -> Result<Option<PortalCommand>, AutoTypeError> {
        if !response.success() {
            let stage = self.state.clone();
            self.reset();
            warn!(?stage, code = response.code, "portal handshake failed");
            return Err(if response.code == 1 {
                AutoTypeError::PermissionDenied(format!(
                    "remote-desktop consent cancelled during {stage:?}"
                ))
            } else {
                AutoTypeError::Unsupported(format!(
                    "portal refused request during {stage:?} (code {})",
                    response.code
                ))
            });
        }

        match self.state {
            SessionState::AwaitingSessionCreated => {
                let handle = response.session_handle.ok_or_else(|| {
                    self.reset();
                    AutoTypeError::Portal("CreateSession response lacked a session handle".into())
                })?;
                debug!("portal session created");
                self.session_handle = Some(handle.clone());
                self.state = SessionState::AwaitingDeviceSelection;
                Ok(Some(PortalCommand::SelectDevices {
                    session_handle: handle,
                }))
            }
            SessionState::AwaitingDeviceSelection => {
                let handle = self.session_handle.clone().ok_or_else(|| {
                    AutoTypeError::Portal("device selection without a session handle".into())
                })?;
                self.state = SessionState::AwaitingStart;
                Ok(Some(PortalCommand::Start {
                    session_handle: handle,
                    restore_token: self.restore_token.clone(),
                }))
            }
            SessionState::AwaitingStart => {
                if let Some(token) = response.restore_token {
                    self.restore_token = Some(token);
                }
                self.state = SessionState::Ready;
                info!("portal session ready");
                Ok(None)
            }
            SessionState::Unstarted | SessionState::Ready => {
                // Unsolicited response; a stale signal after a reset
                warn!(state = ?self.state, "ignoring unexpected portal response");
                Ok(None)
            }
        }
    }

    /// Compositor reported the session dead; it will be recreated lazily
    pub fn invalidate(&mut self) {
        if self.state != SessionState::Unstarted {
            info!("portal session invalidated by compositor");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = SessionState::Unstarted;
        self.session_handle = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_response(session_handle: Option<&str>, restore_token: Option<&str>) -> PortalResponse {
        PortalResponse {
            code: 0,
            session_handle: session_handle.map(str::to_string),
            restore_token: restore_token.map(str::to_string),
        }
    }

    fn complete_handshake(fsm: &mut PortalStateMachine) {
        assert_eq!(fsm.start(), PortalCommand::CreateSession);
        let cmd = fsm
            .handle_response(ok_response(Some("/session/1"), None))
            .unwrap();
        assert!(matches!(cmd, Some(PortalCommand::SelectDevices { .. })));
        let cmd = fsm.handle_response(ok_response(None, None)).unwrap();
        assert!(matches!(cmd, Some(PortalCommand::Start { .. })));
        let cmd = fsm
            .handle_response(ok_response(None, Some("token-abc")))
            .unwrap();
        assert!(cmd.is_none());
    }

    #[test]
    fn test_full_handshake_reaches_ready() {
        let mut fsm = PortalStateMachine::new(None);
        complete_handshake(&mut fsm);
        assert!(fsm.is_ready());
        assert_eq!(fsm.session_handle(), Some("/session/1"));
        assert_eq!(fsm.restore_token(), Some("token-abc"));
    }

    #[test]
    fn test_create_session_failure_stays_unstarted() {
        let mut fsm = PortalStateMachine::new(None);
        fsm.start();
        let err = fsm
            .handle_response(PortalResponse {
                code: 1,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, AutoTypeError::PermissionDenied(_)));
        // Never advanced to device selection
        assert_eq!(*fsm.state(), SessionState::Unstarted);
        assert!(fsm.session_handle().is_none());
    }

    #[test]
    fn test_cached_token_presented_at_start() {
        let mut fsm = PortalStateMachine::new(Some("cached".to_string()));
        fsm.start();
        fsm.handle_response(ok_response(Some("/session/2"), None))
            .unwrap();
        let cmd = fsm.handle_response(ok_response(None, None)).unwrap();
        match cmd {
            Some(PortalCommand::Start { restore_token, .. }) => {
                assert_eq!(restore_token.as_deref(), Some("cached"));
            }
            other => panic!("expected Start command, got {other:?}"),
        }
    }

    #[test]
    fn test_mid_handshake_failure_resets_but_keeps_token() {
        let mut fsm = PortalStateMachine::new(Some("cached".to_string()));
        fsm.start();
        fsm.handle_response(ok_response(Some("/session/3"), None))
            .unwrap();
        let err = fsm
            .handle_response(PortalResponse {
                code: 2,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, AutoTypeError::Unsupported(_)));
        assert_eq!(*fsm.state(), SessionState::Unstarted);
        assert_eq!(fsm.restore_token(), Some("cached"));
    }

    #[test]
    fn test_invalidate_returns_to_unstarted_and_allows_restart() {
        let mut fsm = PortalStateMachine::new(None);
        complete_handshake(&mut fsm);
        assert!(fsm.is_ready());

        fsm.invalidate();
        assert_eq!(*fsm.state(), SessionState::Unstarted);
        // Token from the first handshake is presented on the next one
        fsm.start();
        fsm.handle_response(ok_response(Some("/session/9"), None))
            .unwrap();
        let cmd = fsm.handle_response(ok_response(None, None)).unwrap();
        match cmd {
            Some(PortalCommand::Start { restore_token, .. }) => {
                assert_eq!(restore_token.as_deref(), Some("token-abc"));
            }
            other => panic!("expected Start command, got {other:?}"),
        }
    }

    #[test]
    fn test_abandoned_handshake_restarts_cleanly() {
        // A caller that gives up waiting on a portal response leaves the
        // machine mid-handshake; the next run must recreate the session,
        // not stay wedged
        let mut fsm = PortalStateMachine::new(Some("cached".to_string()));
        fsm.start();
        fsm.handle_response(ok_response(Some("/session/4"), None))
            .unwrap();
        assert_eq!(*fsm.state(), SessionState::AwaitingDeviceSelection);

        assert_eq!(fsm.start(), PortalCommand::CreateSession);
        assert_eq!(*fsm.state(), SessionState::AwaitingSessionCreated);
        // The stale handle from the abandoned attempt is gone, the token kept
        assert!(fsm.session_handle().is_none());
        assert_eq!(fsm.restore_token(), Some("cached"));

        complete_handshake(&mut fsm);
        assert!(fsm.is_ready());
    }
}
