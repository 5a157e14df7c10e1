//! Wayland backend
//!
//! Wayland compositors expose no global window surface and refuse synthetic
//! input from ordinary clients; typing goes through the sandboxed
//! remote-desktop portal instead. This module owns the bus plumbing for the
//! portal handshake (the state machine itself lives in [`portal`]) and
//! injects keysyms into whichever window the compositor has focused.

pub mod portal;

use super::{Executor, KeyResult, PlatformInterface, WindowId, WindowInfo, WindowState};
use crate::error::{AutoTypeError, Result};
use crate::sequence::{Key, Modifiers};
use crate::token_store;
use async_trait::async_trait;
use portal::{PortalCommand, PortalResponse, PortalStateMachine, DEVICE_MASK, PERSIST_MODE};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use zbus::zvariant::{ObjectPath, OwnedValue, Value};
use zbus::Connection;

/// Bound on every portal round trip, interactive consent dialogs included.
/// A stuck compositor fails the run instead of hanging it.
const PORTAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Key press/release state values for NotifyKeyboardKeysym
const KEY_RELEASED: u32 = 0;
const KEY_PRESSED: u32 = 1;

const XKB_SHIFT: u32 = 0xffe1;
const XKB_CTRL: u32 = 0xffe3;
const XKB_ALT: u32 = 0xffe9;
const XKB_SUPER: u32 = 0xffeb;

#[zbus::proxy(
    interface = "org.freedesktop.portal.RemoteDesktop",
    default_service = "org.freedesktop.portal.Desktop",
    default_path = "/org/freedesktop/portal/desktop"
)]
trait RemoteDesktop {
    fn create_session(
        &self,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<zbus::zvariant::OwnedObjectPath>;

    fn select_devices(
        &self,
        session_handle: &ObjectPath<'_>,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<zbus::zvariant::OwnedObjectPath>;

    fn start(
        &self,
        session_handle: &ObjectPath<'_>,
        parent_window: &str,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<zbus::zvariant::OwnedObjectPath>;

    fn notify_keyboard_keysym(
        &self,
        session_handle: &ObjectPath<'_>,
        options: HashMap<&str, Value<'_>>,
        keysym: i32,
        state: u32,
    ) -> zbus::Result<()>;
}

#[zbus::proxy(
    interface = "org.freedesktop.portal.Request",
    default_service = "org.freedesktop.portal.Desktop"
)]
trait Request {
    #[zbus(signal)]
    fn response(&self, response: u32, results: HashMap<String, OwnedValue>) -> zbus::Result<()>;
}

#[zbus::proxy(
    interface = "org.freedesktop.portal.Session",
    default_service = "org.freedesktop.portal.Desktop"
)]
trait Session {
    #[zbus(signal)]
    fn closed(&self, details: HashMap<String, OwnedValue>) -> zbus::Result<()>;
}

/// Counter feeding unique portal handle tokens; process-wide so request
/// paths never collide across executor clones
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct WaylandPlatform {
    connection: Connection,
    remote_desktop: RemoteDesktopProxy<'static>,
    session: Arc<Mutex<PortalStateMachine>>,
    keystroke_delay_ms: u64,
}

impl WaylandPlatform {
    /// Connect to the session bus and load any persisted restore token
    pub async fn connect(keystroke_delay_ms: u64) -> Result<Self> {
        let connection = Connection::session()
            .await
            .map_err(|e| AutoTypeError::Portal(format!("session bus unavailable: {e}")))?;
        let remote_desktop = RemoteDesktopProxy::new(&connection)
            .await
            .map_err(|e| AutoTypeError::Portal(e.to_string()))?;

        let restore_token = match token_store::load_restore_token() {
            Ok(token) => token,
            Err(e) => {
                warn!("failed to load portal restore token: {e}");
                None
            }
        };

        Ok(Self {
            connection,
            remote_desktop,
            session: Arc::new(Mutex::new(PortalStateMachine::new(restore_token))),
            keystroke_delay_ms,
        })
    }

    /// The unique-name-derived sender part of portal request object paths
    fn sender_path_component(&self) -> Result<String> {
        let name = self
            .connection
            .unique_name()
            .ok_or_else(|| AutoTypeError::Portal("connection has no unique name".into()))?;
        Ok(name.trim_start_matches(':').replace('.', "_"))
    }

    /// Issue one portal method call and await its Response signal
    ///
    /// The request path is derived from our handle token, and the signal
    /// stream is subscribed before the call goes out, so a fast response
    /// cannot be missed.
    async fn execute_command(&self, command: &PortalCommand) -> Result<PortalResponse> {
        let token = format!(
            "vault_autotype_{}",
            REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let request_path = format!(
            "/org/freedesktop/portal/desktop/request/{}/{}",
            self.sender_path_component()?,
            token
        );

        let request = RequestProxy::builder(&self.connection)
            .path(request_path.as_str())
            .map_err(|e| AutoTypeError::Portal(e.to_string()))?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await
            .map_err(|e| AutoTypeError::Portal(e.to_string()))?;
        let mut responses = request
            .receive_response()
            .await
            .map_err(|e| AutoTypeError::Portal(e.to_string()))?;

        self.issue_call(command, &token).await?;

        let signal = timeout(PORTAL_TIMEOUT, responses.next())
            .await
            .map_err(|_| {
                AutoTypeError::Unsupported("portal did not respond within the wait bound".into())
            })?
            .ok_or_else(|| AutoTypeError::Portal("portal response stream closed".into()))?;
        let args = signal
            .args()
            .map_err(|e| AutoTypeError::Portal(e.to_string()))?;

        Ok(PortalResponse {
            code: *args.response(),
            session_handle: string_result(args.results(), "session_handle"),
            restore_token: string_result(args.results(), "restore_token"),
        })
    }

    async fn issue_call(&self, command: &PortalCommand, token: &str) -> Result<()> {
        let map_err = |e: zbus::Error| match &e {
            zbus::Error::MethodError(name, _, _)
                if name.as_str().ends_with("AccessDenied") =>
            {
                AutoTypeError::PermissionDenied(e.to_string())
            }
            _ => AutoTypeError::Portal(e.to_string()),
        };

        match command {
            PortalCommand::CreateSession => {
                let session_token = format!("{token}_s");
                let mut options: HashMap<&str, Value<'_>> = HashMap::new();
                options.insert("handle_token", Value::from(token));
                options.insert("session_handle_token", Value::from(session_token.as_str()));
                self.remote_desktop
                    .create_session(options)
                    .await
                    .map_err(map_err)?;
            }
            PortalCommand::SelectDevices { session_handle } => {
                let handle = object_path(session_handle)?;
                let mut options: HashMap<&str, Value<'_>> = HashMap::new();
                options.insert("handle_token", Value::from(token));
                options.insert("types", Value::from(DEVICE_MASK));
                options.insert("persist_mode", Value::from(PERSIST_MODE));
                self.remote_desktop
                    .select_devices(&handle, options)
                    .await
                    .map_err(map_err)?;
            }
            PortalCommand::Start {
                session_handle,
                restore_token,
            } => {
                let handle = object_path(session_handle)?;
                let mut options: HashMap<&str, Value<'_>> = HashMap::new();
                options.insert("handle_token", Value::from(token));
                if let Some(restore) = restore_token {
                    options.insert("restore_token", Value::from(restore.as_str()));
                }
                self.remote_desktop
                    .start(&handle, "", options)
                    .await
                    .map_err(map_err)?;
            }
        }
        Ok(())
    }

    /// Drive the handshake to `Ready`, creating the session lazily
    ///
    /// Calls attempted before the session is ready wait here for the bounded
    /// handshake instead of failing immediately.
    async fn ensure_ready(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_ready() {
            return Ok(());
        }

        let mut command = session.start();
        loop {
            let response = match self.execute_command(&command).await {
                Ok(response) => response,
                Err(e) => {
                    session.invalidate();
                    return Err(e);
                }
            };
            match session.handle_response(response) {
                Ok(Some(next)) => command = next,
                Ok(None) => break,
                Err(e) => {
                    // A denied grant can mean the persisted restore token has
                    // gone stale; drop it so the next attempt prompts fresh
                    if matches!(e, AutoTypeError::PermissionDenied(_)) {
                        if let Err(clear_err) = token_store::clear_restore_token() {
                            warn!("failed to clear stale restore token: {clear_err}");
                        }
                    }
                    return Err(e);
                }
            }
        }

        if let Some(token) = session.restore_token() {
            if let Err(e) = token_store::save_restore_token(token) {
                warn!("failed to persist portal restore token: {e}");
            }
        }
        self.watch_session_closed(&mut session).await;
        Ok(())
    }

    /// Reset the state machine when the compositor reports the session dead
    async fn watch_session_closed(&self, session: &mut PortalStateMachine) {
        let handle = match session.session_handle() {
            Some(handle) => handle.to_string(),
            None => return,
        };
        let builder = match SessionProxy::builder(&self.connection).path(handle) {
            Ok(builder) => builder.cache_properties(zbus::proxy::CacheProperties::No),
            Err(e) => {
                warn!("cannot watch portal session: {e}");
                return;
            }
        };
        let proxy = match builder.build().await {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!("cannot watch portal session: {e}");
                return;
            }
        };

        let state = Arc::clone(&self.session);
        tokio::spawn(async move {
            if let Ok(mut closed) = proxy.receive_closed().await {
                if closed.next().await.is_some() {
                    state.lock().await.invalidate();
                }
            }
        });
    }

    /// Inject one keysym press+release, with modifier keysyms held around it
    async fn send_keysym(&self, keysym: u32, modifiers: Modifiers) -> KeyResult {
        // Each handshake round trip inside is already bounded; no outer
        // timeout here, since cancelling the handshake future mid-flight
        // would strand the state machine between states
        self.ensure_ready().await?;

        let session_handle = {
            let session = self.session.lock().await;
            session
                .session_handle()
                .map(str::to_string)
                .ok_or_else(|| AutoTypeError::Portal("session lost before injection".into()))?
        };
        let handle = object_path(&session_handle)?;

        let mut held: Vec<u32> = Vec::new();
        if modifiers.shift {
            held.push(XKB_SHIFT);
        }
        if modifiers.ctrl {
            held.push(XKB_CTRL);
        }
        if modifiers.alt {
            held.push(XKB_ALT);
        }
        if modifiers.meta {
            held.push(XKB_SUPER);
        }

        for modifier in &held {
            self.notify_key(&handle, *modifier, KEY_PRESSED).await?;
        }
        self.notify_key(&handle, keysym, KEY_PRESSED).await?;
        self.notify_key(&handle, keysym, KEY_RELEASED).await?;
        for modifier in held.iter().rev() {
            self.notify_key(&handle, *modifier, KEY_RELEASED).await?;
        }
        Ok(())
    }

    async fn notify_key(&self, handle: &ObjectPath<'_>, keysym: u32, state: u32) -> KeyResult {
        let result = self
            .remote_desktop
            .notify_keyboard_keysym(handle, HashMap::new(), keysym as i32, state)
            .await;
        if let Err(e) = result {
            warn!("keysym injection failed: {e}");
            self.session.lock().await.invalidate();
            return Err(AutoTypeError::Portal(e.to_string()));
        }
        Ok(())
    }
}

fn object_path(handle: &str) -> Result<ObjectPath<'_>> {
    ObjectPath::try_from(handle)
        .map_err(|e| AutoTypeError::Portal(format!("bad session handle: {e}")))
}

fn string_result(results: &HashMap<String, OwnedValue>, key: &str) -> Option<String> {
    results
        .get(key)
        .and_then(|value| value.try_clone().ok())
        .and_then(|value| String::try_from(value).ok())
}

#[async_trait]
impl PlatformInterface for WaylandPlatform {
    async fn is_available(&self) -> bool {
        // The portal may still deny remote-desktop capability; that surfaces
        // as PermissionDenied on first use
        std::env::var_os("WAYLAND_DISPLAY").is_some()
    }

    async fn enumerate_windows(&self) -> Result<Vec<WindowInfo>> {
        // Compositors do not expose foreign toplevels to us
        Ok(Vec::new())
    }

    async fn active_window(&self) -> Result<Option<WindowInfo>> {
        Ok(None)
    }

    async fn raise_window(&self, _id: WindowId) -> bool {
        false
    }

    async fn window_state(&self, _id: WindowId) -> Result<WindowState> {
        Ok(WindowState::Normal)
    }

    async fn set_window_state(&self, _id: WindowId, _state: WindowState) -> Result<()> {
        Ok(())
    }

    async fn create_executor(&self) -> Result<Box<dyn Executor>> {
        // The executor shares the platform's portal session state machine,
        // so a session brought up for one run is reused by the next
        Ok(Box::new(WaylandExecutor {
            platform: self.clone(),
        }))
    }
}

struct WaylandExecutor {
    platform: WaylandPlatform,
}

#[async_trait]
impl Executor for WaylandExecutor {
    async fn begin(&mut self, _target: Option<WindowId>) -> KeyResult {
        // The portal session is the per-run state this executor carries;
        // bring it up before the first keystroke
        debug!("preparing portal session for auto-type run");
        self.platform.ensure_ready().await
    }

    async fn type_key(&mut self, key: Key, modifiers: Modifiers) -> KeyResult {
        self.platform.send_keysym(key.keysym(), modifiers).await?;
        tokio::time::sleep(Duration::from_millis(self.platform.keystroke_delay_ms)).await;
        Ok(())
    }

    async fn type_text(&mut self, text: &SecretString) -> KeyResult {
        for ch in text.expose_secret().chars() {
            self.platform
                .send_keysym(Key::Char(ch).keysym(), Modifiers::NONE)
                .await?;
            tokio::time::sleep(Duration::from_millis(self.platform.keystroke_delay_ms)).await;
        }
        info!(
            chars = text.expose_secret().chars().count(),
            "typed text through portal"
        );
        Ok(())
    }
}
