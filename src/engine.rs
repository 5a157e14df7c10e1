//! Execution engine
//!
//! Owns the one-run-at-a-time auto-type lifecycle: acquire exclusivity,
//! snapshot and hide the invoking window, resolve the sequence against the
//! live entry, replay actions through the platform executor, and restore the
//! invoking window on every exit path. Also hosts the global-trigger flow
//! that matches the focused window against open databases and hands
//! ambiguous results to an external selector.

use crate::config::AutoTypeConfig;
use crate::error::{AutoTypeError, Result};
use crate::matching::{find_matches, AutoTypeMatch};
use crate::platform::{PlatformInterface, WindowId, WindowInfo, WindowState};
use crate::sequence::{parse_sequence, Action};
use crate::store::{Database, Entry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Completion signal for one auto-type trigger
///
/// Exactly one event is emitted per run; a trigger refused before its run
/// begins (no matches, cancelled selection, busy engine) is `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoTypeEvent {
    Performed,
    Rejected,
}

/// External collaborator that disambiguates multiple matches
///
/// Called synchronously from the global-trigger flow while the selection
/// lock is held; returning `None` cancels the operation.
pub trait MatchSelector: Send + Sync {
    fn select_match(&self, matches: &[AutoTypeMatch]) -> Option<AutoTypeMatch>;
}

pub struct AutoTypeEngine {
    platform: Arc<dyn PlatformInterface>,
    config: AutoTypeConfig,
    in_auto_type: Mutex<()>,
    in_dialog: Mutex<()>,
    events: mpsc::UnboundedSender<AutoTypeEvent>,
}

impl AutoTypeEngine {
    /// Create the engine and the event stream the UI collaborator consumes
    pub fn new(
        platform: Arc<dyn PlatformInterface>,
        config: AutoTypeConfig,
    ) -> (Self, mpsc::UnboundedReceiver<AutoTypeEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                platform,
                config,
                in_auto_type: Mutex::new(()),
                in_dialog: Mutex::new(()),
                events,
            },
            receiver,
        )
    }

    pub async fn is_available(&self) -> bool {
        self.platform.is_available().await
    }

    /// Titles of the currently open top-level windows, for UI pickers
    pub async fn window_titles(&self) -> Result<Vec<WindowInfo>> {
        self.platform.enumerate_windows().await
    }

    /// Type an entry's default effective sequence into the focused window
    ///
    /// `hide_window` is the invoking UI window to minimize for the duration
    /// of the run; it is restored to its snapshotted state afterwards.
    pub async fn perform_auto_type(
        &self,
        entry: &Entry,
        hide_window: Option<WindowId>,
    ) -> Result<()> {
        let sequence = entry.effective_sequence();
        self.run(entry, &sequence, None, hide_window).await
    }

    /// Type an explicit sequence for an entry into the focused window
    pub async fn perform_auto_type_with_sequence(
        &self,
        entry: &Entry,
        sequence: &str,
        hide_window: Option<WindowId>,
    ) -> Result<()> {
        self.run(entry, sequence, None, hide_window).await
    }

    /// Global-trigger flow: match the focused window, then execute
    ///
    /// Exactly one match with no always-ask policy executes immediately;
    /// otherwise the selector is asked for a choice. A duplicate trigger
    /// while a selection is pending is dropped without an event.
    pub async fn perform_global_auto_type(
        &self,
        databases: &[Database],
        selector: &dyn MatchSelector,
    ) -> Result<()> {
        let _dialog_guard = self
            .in_dialog
            .try_lock()
            .map_err(|_| AutoTypeError::SelectionInProgress)?;

        let target = match self.platform.active_window().await? {
            Some(window) => window,
            None => {
                warn!("no active window to match against");
                self.emit(AutoTypeEvent::Rejected);
                return Err(AutoTypeError::TargetLost);
            }
        };
        debug!(window_id = target.id, "global auto-type triggered");

        let matches = find_matches(&target.title, databases);
        if matches.is_empty() {
            info!("no entries match the active window");
            self.emit(AutoTypeEvent::Rejected);
            return Ok(());
        }

        let chosen = if matches.len() == 1 && !self.config.always_ask {
            matches.into_iter().next()
        } else {
            selector.select_match(&matches)
        };
        let chosen = match chosen {
            Some(m) => m,
            None => {
                debug!("selection cancelled");
                self.emit(AutoTypeEvent::Rejected);
                return Ok(());
            }
        };

        let entry = match chosen.entry.upgrade() {
            Some(entry) => entry,
            None => {
                warn!("matched entry no longer exists");
                self.emit(AutoTypeEvent::Rejected);
                return Ok(());
            }
        };

        self.run(&entry, &chosen.sequence, Some(target.id), None)
            .await
    }

    /// One Preparing → Executing → Restoring run
    ///
    /// The invoking window's state is restored and exactly one completion
    /// event is emitted on every path out of this function once the
    /// exclusivity lock is held.
    async fn run(
        &self,
        entry: &Entry,
        sequence: &str,
        target: Option<WindowId>,
        hide_window: Option<WindowId>,
    ) -> Result<()> {
        // Preparing: a second trigger while a run is active is rejected,
        // never interleaved.
        let _guard = match self.in_auto_type.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("auto-type already in progress, rejecting trigger");
                self.emit(AutoTypeEvent::Rejected);
                return Err(AutoTypeError::AutoTypeInProgress);
            }
        };

        let snapshot = self.hide_invoking_window(hide_window).await;

        // Secrets are read from the live entry here, never earlier.
        let result = match parse_sequence(sequence, entry, false) {
            Ok(mut actions) => {
                actions.insert(0, Action::Begin { window: target });
                self.execute(actions).await
            }
            Err(e) => Err(AutoTypeError::Parse(e)),
        };

        // Restoring runs regardless of the Executing outcome.
        if let Some((id, state)) = snapshot {
            if let Err(e) = self.platform.set_window_state(id, state).await {
                warn!("failed to restore invoking window: {e}");
            }
        }

        match &result {
            Ok(()) => {
                info!(entry = %entry.title, "auto-type performed");
                self.emit(AutoTypeEvent::Performed);
            }
            Err(e) => {
                warn!(entry = %entry.title, "auto-type rejected: {e}");
                self.emit(AutoTypeEvent::Rejected);
            }
        }
        result
    }

    /// Snapshot and minimize the invoking window, returning what to restore
    async fn hide_invoking_window(
        &self,
        hide_window: Option<WindowId>,
    ) -> Option<(WindowId, WindowState)> {
        let id = hide_window?;
        if !self.config.hide_invoking_window {
            return None;
        }
        let state = match self.platform.window_state(id).await {
            Ok(state) => state,
            Err(e) => {
                warn!("could not snapshot invoking window state: {e}");
                return None;
            }
        };
        if let Err(e) = self.platform.set_window_state(id, WindowState::Minimized).await {
            warn!("could not hide invoking window: {e}");
        }
        Some((id, state))
    }

    /// Executing: replay the action list, aborting on the first failure
    async fn execute(&self, actions: Vec<Action>) -> Result<()> {
        let mut executor = self.platform.create_executor().await?;

        if self.config.start_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.start_delay_ms)).await;
        }

        debug!(actions = actions.len(), "executing auto-type actions");
        for action in &actions {
            match action {
                Action::Begin { window } => {
                    self.begin(executor.as_mut(), *window).await?;
                }
                Action::TypeKey { key, modifiers } => {
                    executor.type_key(*key, *modifiers).await?;
                }
                Action::TypeText(text) => {
                    executor.type_text(text).await?;
                }
                Action::Delay(ms) => {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                }
                Action::ClearField => {
                    executor.clear_field().await?;
                }
            }
        }
        Ok(())
    }

    /// Raise the target window and verify it still has focus
    ///
    /// The user may have switched focus during the hide delay; typing into
    /// the wrong window is worse than aborting. Verification is skipped on
    /// backends that cannot identify windows.
    async fn begin(
        &self,
        executor: &mut dyn crate::platform::Executor,
        target: Option<WindowId>,
    ) -> Result<()> {
        executor.begin(target).await?;

        let Some(id) = target else { return Ok(()) };
        if !self.platform.raise_window(id).await {
            warn!(window_id = id, "target window no longer exists");
            return Err(AutoTypeError::TargetLost);
        }
        match self.platform.active_window().await? {
            Some(active) if active.id != id => {
                warn!(
                    expected = id,
                    actual = active.id,
                    "focus moved away from target window"
                );
                Err(AutoTypeError::TargetLost)
            }
            _ => Ok(()),
        }
    }

    fn emit(&self, event: AutoTypeEvent) {
        // The UI collaborator may have gone away; dropped events are fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Executor, KeyResult};
    use crate::sequence::{Key, Modifiers};
    use async_trait::async_trait;
    use secrecy::{ExposeSecret, SecretString};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockState {
        log: Vec<String>,
        window_states: Vec<(WindowId, WindowState)>,
    }

    struct MockPlatform {
        state: Arc<StdMutex<MockState>>,
        active: Option<WindowInfo>,
        fail_typing: bool,
        type_delay: Option<Duration>,
    }

    impl MockPlatform {
        fn new() -> Self {
            Self {
                state: Arc::new(StdMutex::new(MockState::default())),
                active: Some(WindowInfo {
                    id: 7,
                    title: "Sign in - Example".to_string(),
                }),
                fail_typing: false,
                type_delay: None,
            }
        }

        fn log(&self) -> Vec<String> {
            self.state.lock().unwrap().log.clone()
        }

        fn restored_states(&self) -> Vec<(WindowId, WindowState)> {
            self.state.lock().unwrap().window_states.clone()
        }
    }

    struct MockExecutor {
        state: Arc<StdMutex<MockState>>,
        fail_typing: bool,
        type_delay: Option<Duration>,
    }

    #[async_trait]
    impl Executor for MockExecutor {
        async fn type_key(&mut self, key: Key, _modifiers: Modifiers) -> KeyResult {
            if self.fail_typing {
                return Err(AutoTypeError::TargetLost);
            }
            if let Some(delay) = self.type_delay {
                tokio::time::sleep(delay).await;
            }
            self.state.lock().unwrap().log.push(format!("key:{key:?}"));
            Ok(())
        }

        async fn type_text(&mut self, text: &SecretString) -> KeyResult {
            if self.fail_typing {
                return Err(AutoTypeError::TargetLost);
            }
            if let Some(delay) = self.type_delay {
                tokio::time::sleep(delay).await;
            }
            self.state
                .lock()
                .unwrap()
                .log
                .push(format!("text:{}", text.expose_secret()));
            Ok(())
        }
    }

    #[async_trait]
    impl PlatformInterface for MockPlatform {
        async fn is_available(&self) -> bool {
            true
        }

        async fn enumerate_windows(&self) -> Result<Vec<WindowInfo>> {
            Ok(self.active.clone().into_iter().collect())
        }

        async fn active_window(&self) -> Result<Option<WindowInfo>> {
            Ok(self.active.clone())
        }

        async fn raise_window(&self, _id: WindowId) -> bool {
            true
        }

        async fn window_state(&self, _id: WindowId) -> Result<WindowState> {
            Ok(WindowState::Normal)
        }

        async fn set_window_state(&self, id: WindowId, state: WindowState) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .window_states
                .push((id, state));
            Ok(())
        }

        async fn create_executor(&self) -> Result<Box<dyn Executor>> {
            Ok(Box::new(MockExecutor {
                state: Arc::clone(&self.state),
                fail_typing: self.fail_typing,
                type_delay: self.type_delay,
            }))
        }
    }

    fn test_config() -> AutoTypeConfig {
        AutoTypeConfig {
            start_delay_ms: 0,
            ..AutoTypeConfig::default()
        }
    }

    fn test_entry() -> Entry {
        Entry::new("Example", "alice", "s3cret")
    }

    struct FixedSelector(Option<AutoTypeMatch>);

    impl MatchSelector for FixedSelector {
        fn select_match(&self, _matches: &[AutoTypeMatch]) -> Option<AutoTypeMatch> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_default_sequence_run() {
        let platform = Arc::new(MockPlatform::new());
        let (engine, mut events) = AutoTypeEngine::new(platform.clone(), test_config());

        engine
            .perform_auto_type(&test_entry(), None)
            .await
            .unwrap();

        assert_eq!(
            platform.log(),
            vec!["text:alice", "key:Tab", "text:s3cret", "key:Enter"]
        );
        assert_eq!(events.try_recv().unwrap(), AutoTypeEvent::Performed);
    }

    #[tokio::test]
    async fn test_invoking_window_restored_on_failure() {
        let mut platform = MockPlatform::new();
        platform.fail_typing = true;
        let platform = Arc::new(platform);
        let (engine, mut events) = AutoTypeEngine::new(platform.clone(), test_config());

        let result = engine.perform_auto_type(&test_entry(), Some(42)).await;

        assert!(matches!(result, Err(AutoTypeError::TargetLost)));
        // Minimized during the run, restored to the snapshotted Normal after.
        assert_eq!(
            platform.restored_states(),
            vec![(42, WindowState::Minimized), (42, WindowState::Normal)]
        );
        assert_eq!(events.try_recv().unwrap(), AutoTypeEvent::Rejected);
    }

    #[tokio::test]
    async fn test_invoking_window_restored_on_parse_error() {
        let platform = Arc::new(MockPlatform::new());
        let (engine, mut events) = AutoTypeEngine::new(platform.clone(), test_config());

        let result = engine
            .perform_auto_type_with_sequence(&test_entry(), "{NOSUCHFIELD}", Some(42))
            .await;

        assert!(matches!(result, Err(AutoTypeError::Parse(_))));
        assert_eq!(
            platform.restored_states(),
            vec![(42, WindowState::Minimized), (42, WindowState::Normal)]
        );
        assert_eq!(events.try_recv().unwrap(), AutoTypeEvent::Rejected);
        // Nothing was typed.
        assert!(platform.log().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_trigger_rejected() {
        let mut platform = MockPlatform::new();
        platform.type_delay = Some(Duration::from_millis(50));
        let platform = Arc::new(platform);
        let (engine, _events) = AutoTypeEngine::new(platform.clone(), test_config());
        let engine = Arc::new(engine);

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.perform_auto_type(&test_entry(), None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = engine.perform_auto_type(&test_entry(), None).await;
        assert!(matches!(second, Err(AutoTypeError::AutoTypeInProgress)));

        first.await.unwrap().unwrap();
        // Only the first run's keystrokes were delivered.
        assert_eq!(platform.log().len(), 4);
    }

    #[tokio::test]
    async fn test_global_single_match_executes() {
        let platform = Arc::new(MockPlatform::new());
        let (engine, mut events) = AutoTypeEngine::new(platform.clone(), test_config());

        let databases = vec![Database::new("personal", vec![Arc::new(test_entry())])];
        engine
            .perform_global_auto_type(&databases, &FixedSelector(None))
            .await
            .unwrap();

        assert_eq!(events.try_recv().unwrap(), AutoTypeEvent::Performed);
        assert_eq!(platform.log().len(), 4);
    }

    #[tokio::test]
    async fn test_global_no_match_rejected() {
        let platform = Arc::new(MockPlatform::new());
        let (engine, mut events) = AutoTypeEngine::new(platform.clone(), test_config());

        let entry = Arc::new(Entry::new("Unrelated", "bob", "pw"));
        let databases = vec![Database::new("personal", vec![entry])];
        engine
            .perform_global_auto_type(&databases, &FixedSelector(None))
            .await
            .unwrap();

        assert_eq!(events.try_recv().unwrap(), AutoTypeEvent::Rejected);
        assert!(platform.log().is_empty());
    }

    #[tokio::test]
    async fn test_global_cancelled_selection_rejected() {
        let platform = Arc::new(MockPlatform::new());
        let config = AutoTypeConfig {
            always_ask: true,
            start_delay_ms: 0,
            ..AutoTypeConfig::default()
        };
        let (engine, mut events) = AutoTypeEngine::new(platform.clone(), config);

        let databases = vec![Database::new("personal", vec![Arc::new(test_entry())])];
        engine
            .perform_global_auto_type(&databases, &FixedSelector(None))
            .await
            .unwrap();

        assert_eq!(events.try_recv().unwrap(), AutoTypeEvent::Rejected);
        assert!(platform.log().is_empty());
    }

    #[tokio::test]
    async fn test_global_no_active_window() {
        let mut platform = MockPlatform::new();
        platform.active = None;
        let platform = Arc::new(platform);
        let (engine, mut events) = AutoTypeEngine::new(platform.clone(), test_config());

        let databases = vec![Database::new("personal", vec![Arc::new(test_entry())])];
        let result = engine
            .perform_global_auto_type(&databases, &FixedSelector(None))
            .await;

        assert!(matches!(result, Err(AutoTypeError::TargetLost)));
        assert_eq!(events.try_recv().unwrap(), AutoTypeEvent::Rejected);
    }
}
