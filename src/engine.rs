//! Session engine.
//!
//! Wires the connection manager, frame classifier, correlator, agent request
//! handler and session reducer together. Inbound frames are processed by one
//! event loop in arrival order; user intents become outbound frames and/or
//! actions. The current [`SessionState`] is published on a watch channel so a
//! view layer can render it and await changes.

use crate::QuestId;
use crate::acp::handler::{self, AgentRequestHandler, Disposition};
use crate::acp::types::{InitializeResult, PromptResult, SessionNewResult, SessionNotification};
use crate::acp::{
    Correlator, Frame, FrameBuilder, Notification, PendingResponse, Request, RequestIdSequence,
    methods,
};
use crate::config::ReconnectConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionStatus, Transport};
use crate::error::{ConnectionError, Error, Result};
use crate::state::{Action, SessionState};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Stop reason recorded when the prompt request itself was rejected.
pub const STOP_REASON_ERROR: &str = "error";

/// Stop reason recorded when the agent's result carried none.
pub const STOP_REASON_UNKNOWN: &str = "unknown";

struct EngineInner {
    connection: ConnectionManager,
    builder: FrameBuilder,
    correlator: Mutex<Correlator>,
    state: watch::Sender<SessionState>,
    handler: Arc<dyn AgentRequestHandler>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running session engine. Cheap to clone.
///
/// Dropping the last clone stops the engine as [`Engine::shutdown`] does.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
    _lifetime: Arc<Lifetime>,
}

/// Owned only by [`Engine`] handles, never by the engine's own tasks, so it
/// drops with the last handle even though those tasks keep `EngineInner` alive.
struct Lifetime {
    inner: Arc<EngineInner>,
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("connection", &self.inner.connection)
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

/// Completion of one `session/prompt`.
#[derive(Debug)]
pub struct PromptHandle {
    quest_id: QuestId,
    completion: oneshot::Receiver<String>,
}

impl PromptHandle {
    pub fn quest_id(&self) -> &str {
        &self.quest_id
    }

    /// Wait for the prompt to settle and return its stop reason.
    pub async fn finished(self) -> Result<String> {
        self.completion.await.map_err(|_| {
            ConnectionError::Closed {
                id: format!("prompt for {}", self.quest_id),
            }
            .into()
        })
    }
}

impl Engine {
    /// Start an engine over `transport`. Nothing is dialed until [`Engine::connect`].
    pub fn spawn(
        transport: Arc<dyn Transport>,
        reconnect: ReconnectConfig,
        handler: Arc<dyn AgentRequestHandler>,
    ) -> Self {
        Self::with_request_ids(transport, reconnect, handler, Arc::new(RequestIdSequence::new()))
    }

    pub fn with_request_ids(
        transport: Arc<dyn Transport>,
        reconnect: ReconnectConfig,
        handler: Arc<dyn AgentRequestHandler>,
        ids: Arc<RequestIdSequence>,
    ) -> Self {
        let (connection, events) = ConnectionManager::new(transport, reconnect);
        let (state, _) = watch::channel(SessionState::new());
        let inner = Arc::new(EngineInner {
            connection,
            builder: FrameBuilder::new(ids),
            correlator: Mutex::new(Correlator::new()),
            state,
            handler,
            event_loop: Mutex::new(None),
        });

        let task = tokio::spawn(Arc::clone(&inner).run(events));
        *inner.event_loop.lock() = Some(task);
        Self {
            _lifetime: Arc::new(Lifetime {
                inner: Arc::clone(&inner),
            }),
            inner,
        }
    }

    pub fn connect(&self) {
        self.inner.connection.connect();
    }

    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Copy of the current read model.
    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Requests sent but not yet answered, including any orphaned by a reconnect.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.lock().len()
    }

    /// Resolves once the protocol handshake on the current connection finished.
    /// Fails once the connection is down with no reconnect attempts left.
    pub async fn wait_until_initialized(&self) -> Result<()> {
        let connection = &self.inner.connection;
        let mut state = self.inner.state.subscribe();
        let mut status = connection.subscribe_status();

        loop {
            if connection.is_exhausted() {
                return Err(ConnectionError::Exhausted {
                    url: connection.endpoint().to_string(),
                    attempts: connection.reconnect_attempts(),
                }
                .into());
            }
            tokio::select! {
                initialized = state.wait_for(|state| state.initialized) => {
                    return initialized
                        .map(|_| ())
                        .map_err(|_| ConnectionError::NotConnected.into());
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(ConnectionError::NotConnected.into());
                    }
                }
            }
        }
    }

    /// Open a new quest rooted at `cwd` and make it active.
    pub async fn create_quest(&self, cwd: &Path) -> Result<QuestId> {
        let pending = self.inner.call(self.inner.builder.session_new(cwd))?;
        let result: SessionNewResult = pending.decode(methods::SESSION_NEW).await?;
        let quest_id = result.session_id.clone();

        self.inner.dispatch(Action::QuestCreated {
            quest_id: result.session_id,
            cwd: cwd.to_path_buf(),
            models: result.models,
            modes: result.modes,
            created_at: Utc::now(),
        });
        tracing::info!(%quest_id, cwd = %cwd.display(), "quest created");
        Ok(quest_id)
    }

    /// Prompt the active quest.
    ///
    /// The quest is marked processing until the agent answers the prompt; the
    /// returned handle yields the stop reason.
    pub fn send_prompt(&self, text: &str) -> Result<PromptHandle> {
        let mut sent = Err(Error::NoActiveQuest);
        self.inner.state.send_if_modified(|state| {
            let Some(quest_id) = state.active_quest_id.clone() else {
                return false;
            };
            match self.inner.call(self.inner.builder.prompt(&quest_id, text)) {
                Ok(pending) => {
                    state.apply(Action::UserPromptSent {
                        text: text.to_string(),
                    });
                    sent = Ok((quest_id, pending));
                    true
                }
                Err(error) => {
                    sent = Err(error);
                    false
                }
            }
        });
        let (quest_id, pending) = sent?;

        let (done, completion) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let waiting_on = quest_id.clone();
        tokio::spawn(async move {
            let stop_reason = match pending.decode::<PromptResult>(methods::SESSION_PROMPT).await {
                Ok(result) => result
                    .stop_reason
                    .unwrap_or_else(|| STOP_REASON_UNKNOWN.to_string()),
                Err(error) => {
                    tracing::warn!(quest_id = %waiting_on, %error, "prompt failed");
                    STOP_REASON_ERROR.to_string()
                }
            };
            tracing::debug!(quest_id = %waiting_on, %stop_reason, "prompt completed");
            inner.dispatch(Action::PromptCompleted {
                quest_id: waiting_on,
                stop_reason: stop_reason.clone(),
            });
            let _ = done.send(stop_reason);
        });

        Ok(PromptHandle {
            quest_id,
            completion,
        })
    }

    /// Ask the agent to stop the active quest's turn. Best effort: the quest
    /// stays processing until the original prompt settles.
    pub fn cancel_prompt(&self) -> Result<()> {
        let quest_id = self.active_quest_id()?;
        if !self
            .inner
            .connection
            .send(&Frame::from(FrameBuilder::cancel(&quest_id)))
        {
            return Err(ConnectionError::NotConnected.into());
        }
        tracing::info!(%quest_id, "cancel requested");
        Ok(())
    }

    pub fn switch_quest(&self, quest_id: &str) {
        self.inner.dispatch(Action::QuestSwitched {
            quest_id: quest_id.to_string(),
        });
    }

    pub fn close_quest(&self, quest_id: &str) {
        self.inner.dispatch(Action::QuestClosed {
            quest_id: quest_id.to_string(),
        });
    }

    pub fn rename_quest(&self, quest_id: &str, title: &str) {
        self.inner.dispatch(Action::QuestRenamed {
            quest_id: quest_id.to_string(),
            title: title.to_string(),
        });
    }

    pub fn select_tool_call(&self, tool_call_id: Option<&str>) {
        self.inner.dispatch(Action::ToolCallSelected {
            tool_call_id: tool_call_id.map(str::to_string),
        });
    }

    /// Switch the active quest's model. The local selection applies immediately.
    pub fn set_model(&self, model_id: &str) -> Result<PendingResponse> {
        let quest_id = self.active_quest_id()?;
        let pending = self
            .inner
            .call(self.inner.builder.set_model(&quest_id, model_id))?;
        self.inner.dispatch(Action::ModelSelected {
            model_id: model_id.to_string(),
        });
        Ok(pending)
    }

    /// Switch the active quest's mode. The local selection applies immediately.
    pub fn set_mode(&self, mode_id: &str) -> Result<PendingResponse> {
        let quest_id = self.active_quest_id()?;
        let pending = self
            .inner
            .call(self.inner.builder.set_mode(&quest_id, mode_id))?;
        self.inner.dispatch(Action::ModeSelected {
            mode_id: mode_id.to_string(),
        });
        Ok(pending)
    }

    pub fn set_config_option(&self, key: &str, value: Value) -> Result<PendingResponse> {
        let quest_id = self.active_quest_id()?;
        self.inner
            .call(self.inner.builder.set_config_option(&quest_id, key, value))
    }

    /// Answer the pending permission prompt with `option_id` and clear it.
    pub fn respond_permission(&self, option_id: &str) -> Result<()> {
        let mut answered = Err(Error::NoPendingPermission);
        self.inner.state.send_if_modified(|state| {
            let Some(pending) = &state.pending_permission else {
                return false;
            };
            if pending.request.option(option_id).is_none() {
                answered = Err(Error::UnknownPermissionOption {
                    option_id: option_id.to_string(),
                });
                return false;
            }

            let response = FrameBuilder::permission_selected(pending.request_id.clone(), option_id);
            if !self.inner.connection.send(&Frame::from(response)) {
                tracing::warn!(
                    request_id = %pending.request_id,
                    "permission answer dropped, socket not open"
                );
            }
            state.apply(Action::PermissionResolved);
            answered = Ok(());
            true
        });
        answered
    }

    /// Disconnect and stop processing events. Requests still in flight fail
    /// with [`ConnectionError::Closed`].
    pub fn shutdown(&self) {
        self.inner.stop();
    }

    fn active_quest_id(&self) -> Result<QuestId> {
        self.inner
            .state
            .borrow()
            .active_quest_id
            .clone()
            .ok_or(Error::NoActiveQuest)
    }
}

impl EngineInner {
    fn stop(&self) {
        self.connection.disconnect();
        if let Some(task) = self.event_loop.lock().take() {
            task.abort();
        }
        let abandoned = self.correlator.lock().abandon_all();
        if abandoned > 0 {
            tracing::debug!(abandoned, "engine stopped with requests in flight");
        }
    }

    async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Opened => {
                    self.dispatch(Action::Connected);
                    self.initialize();
                }
                ConnectionEvent::Closed => {
                    self.dispatch(Action::Disconnected);
                    let orphaned = self.correlator.lock().len();
                    if orphaned > 0 {
                        tracing::warn!(orphaned, "connection lost with requests in flight");
                    }
                }
                ConnectionEvent::Message(text) => self.handle_message(&text),
            }
        }
        tracing::debug!("engine event loop exited");
    }

    fn dispatch(&self, action: Action) {
        tracing::trace!(?action, "applying action");
        self.state.send_modify(|state| state.apply(action));
    }

    /// Register `request` with the correlator, then send it.
    fn call(&self, request: Request) -> Result<PendingResponse> {
        let id = request.id.clone();
        let pending = self.correlator.lock().register(id.clone());
        if self.connection.send(&Frame::Request(request)) {
            Ok(pending)
        } else {
            self.correlator.lock().forget(&id);
            Err(ConnectionError::NotConnected.into())
        }
    }

    fn initialize(self: &Arc<Self>) {
        let pending = match self.call(self.builder.initialize()) {
            Ok(pending) => pending,
            Err(error) => {
                tracing::warn!(%error, "could not send initialize");
                return;
            }
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match pending.decode::<InitializeResult>(methods::INITIALIZE).await {
                Ok(result) => {
                    tracing::info!(
                        protocol_version = ?result.protocol_version,
                        "protocol initialized"
                    );
                    inner.dispatch(Action::ProtocolInitialized {
                        models: result.models.unwrap_or_default(),
                        modes: result.modes.unwrap_or_default(),
                    });
                }
                Err(error) => tracing::warn!(%error, "initialize failed"),
            }
        });
    }

    fn handle_message(self: &Arc<Self>, text: &str) {
        let Some(frame) = Frame::parse(text) else {
            tracing::debug!(frame = %text, "dropping undecodable frame");
            return;
        };

        match frame {
            Frame::Response(response) => {
                self.correlator.lock().resolve(response);
            }
            Frame::Notification(notification) => self.handle_notification(notification),
            Frame::Request(request) => self.handle_agent_request(request),
        }
    }

    fn handle_notification(&self, notification: Notification) {
        if notification.method != methods::SESSION_UPDATE {
            tracing::debug!(method = %notification.method, "ignoring notification");
            return;
        }

        let params = notification.params.unwrap_or(Value::Null);
        match serde_json::from_value::<SessionNotification>(params) {
            Ok(SessionNotification { session_id, update }) => {
                self.dispatch(Action::SessionUpdate {
                    quest_id: session_id,
                    update,
                });
            }
            Err(error) => tracing::debug!(%error, "dropping malformed session/update"),
        }
    }

    fn handle_agent_request(self: &Arc<Self>, request: Request) {
        match handler::triage(request) {
            Disposition::Respond(response) => {
                self.connection.send(&Frame::from(response));
            }
            Disposition::Escalate { id, request } => {
                tracing::info!(
                    request_id = %id,
                    quest_id = %request.session_id,
                    tool_call_id = %request.tool_call.tool_call_id,
                    "agent requested permission"
                );
                self.dispatch(Action::PermissionRequested {
                    request_id: id,
                    quest_id: request.session_id.clone(),
                    request,
                });
            }
            Disposition::Handle { id, request } => {
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let response = handler::answer(inner.handler.as_ref(), id, request).await;
                    inner.connection.send(&Frame::from(response));
                });
            }
        }
    }
}
