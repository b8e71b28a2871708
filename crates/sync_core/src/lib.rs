use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{ChatroomId, MessageId, UserId},
    protocol::{ChannelEvent, MessagePayload, ReadMark},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

pub mod api;
pub mod connection;
pub mod error;
pub mod receipts;
pub mod router;
pub mod unread;
pub mod window;

pub use api::{HttpMessageApi, MessageApi};
pub use connection::{
    ConnectionLifecycle, ConnectionState, EventChannel, SubscriptionScope, TransportEvent,
    WsEventChannel,
};
pub use error::SyncError;
pub use receipts::{read_status, PendingReconciliation, ReadStatus};
pub use router::{Dispatch, EventRouter, RouterPhase};
pub use unread::{UnreadBoundary, UnreadTracker, DEFAULT_UNREAD_THRESHOLD};
pub use window::MessageWindow;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub initial_page_size: u32,
    pub page_size: u32,
    pub unread_threshold: usize,
    pub update_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_page_size: 50,
            page_size: 30,
            unread_threshold: DEFAULT_UNREAD_THRESHOLD,
            update_capacity: 256,
        }
    }
}

/// Notification pushed to the presentation layer.
#[derive(Debug, Clone)]
pub enum SyncUpdate {
    WindowChanged,
    UnreadBoundarySet(Option<UnreadBoundary>),
    ConnectionChanged(ConnectionState),
    ChatroomDeleted(ChatroomId),
    GlobalEvent(ChannelEvent),
    Notice(String),
}

#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub messages: Vec<MessagePayload>,
    pub has_more: bool,
    pub loading_initial: bool,
    pub loading_more: bool,
    pub unread_count: u64,
    pub total_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadPhase {
    Idle,
    InFlight,
    Loaded,
}

struct SyncState {
    // bumped on every subscription change; late results carrying an older
    // generation are discarded
    visit: u64,
    chatroom_id: Option<ChatroomId>,
    auth_token: Option<String>,
    window: MessageWindow,
    tracker: UnreadTracker,
    router: Option<EventRouter>,
    lifecycle: ConnectionLifecycle,
    initial_load: LoadPhase,
    loading_more: bool,
    // parked between subscribe success and initial-load success; live
    // events queue here in arrival order until the window is authoritative
    pending_events: Option<mpsc::Receiver<TransportEvent>>,
    pending: Vec<PendingReconciliation>,
    pump: Option<JoinHandle<()>>,
}

/// Realtime message synchronization engine for one conversation at a time.
/// Network calls never hold the state lock.
pub struct ChatroomSync {
    api: Arc<dyn MessageApi>,
    channel: Arc<dyn EventChannel>,
    config: SyncConfig,
    current_user: UserId,
    current_username: String,
    inner: Mutex<SyncState>,
    updates: broadcast::Sender<SyncUpdate>,
}

impl ChatroomSync {
    pub fn new(
        api: Arc<dyn MessageApi>,
        channel: Arc<dyn EventChannel>,
        current_user: UserId,
        current_username: impl Into<String>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(config.update_capacity);
        Arc::new(Self {
            api,
            channel,
            config,
            current_user,
            current_username: current_username.into(),
            inner: Mutex::new(SyncState {
                visit: 0,
                chatroom_id: None,
                auth_token: None,
                window: MessageWindow::new(),
                tracker: UnreadTracker::new(),
                router: None,
                lifecycle: ConnectionLifecycle::new(),
                initial_load: LoadPhase::Idle,
                loading_more: false,
                pending_events: None,
                pending: Vec::new(),
                pump: None,
            }),
            updates,
        })
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<SyncUpdate> {
        self.updates.subscribe()
    }

    /// Subscribe to a conversation's event feed, load the initial window,
    /// and start live dispatch.
    pub async fn enter_chatroom(
        self: &Arc<Self>,
        chatroom_id: ChatroomId,
        auth_token: &str,
    ) -> Result<(), SyncError> {
        self.teardown_visit().await;
        self.channel.unsubscribe().await;

        let visit = {
            let mut state = self.inner.lock().await;
            state.visit += 1;
            state.chatroom_id = Some(chatroom_id.clone());
            state.auth_token = Some(auth_token.to_owned());
            let mut router = EventRouter::new(chatroom_id.clone(), self.current_user.clone());
            router.mark_subscribing();
            state.router = Some(router);
            state
                .lifecycle
                .begin_connect(SubscriptionScope::Chatroom(chatroom_id.clone()));
            state.visit
        };
        self.emit(SyncUpdate::ConnectionChanged(ConnectionState::Connecting));

        let scope = SubscriptionScope::Chatroom(chatroom_id.clone());
        let events = match self.channel.subscribe(scope, auth_token).await {
            Ok(events) => events,
            Err(source) => {
                let mut state = self.inner.lock().await;
                if state.visit == visit {
                    state.lifecycle.reset_idle();
                    if let Some(router) = state.router.as_mut() {
                        router.teardown();
                    }
                }
                drop(state);
                self.emit(SyncUpdate::ConnectionChanged(ConnectionState::Idle));
                return Err(SyncError::Subscription { source });
            }
        };

        {
            let mut state = self.inner.lock().await;
            if state.visit != visit {
                return Ok(());
            }
            state.lifecycle.confirm_connected();
            state.pending_events = Some(events);
        }
        self.emit(SyncUpdate::ConnectionChanged(ConnectionState::Connected));

        self.load_initial().await
    }

    /// Fetch the initial window. A second call while one is in flight, or
    /// after a successful load, is a no-op; on failure the window is
    /// unchanged and the call may be retried.
    pub async fn load_initial(self: &Arc<Self>) -> Result<(), SyncError> {
        let (chatroom_id, visit) = {
            let mut state = self.inner.lock().await;
            let chatroom_id = state.chatroom_id.clone().ok_or(SyncError::NotInChatroom)?;
            match state.initial_load {
                LoadPhase::InFlight | LoadPhase::Loaded => return Ok(()),
                LoadPhase::Idle => {}
            }
            state.initial_load = LoadPhase::InFlight;
            (chatroom_id, state.visit)
        };

        let page = match self
            .api
            .fetch_messages(&chatroom_id, self.config.initial_page_size, None)
            .await
        {
            Ok(page) => page,
            Err(source) => {
                let mut state = self.inner.lock().await;
                if state.visit == visit {
                    state.initial_load = LoadPhase::Idle;
                }
                return Err(SyncError::Fetch {
                    chatroom_id,
                    source,
                });
            }
        };

        let boundary = {
            let mut state = self.inner.lock().await;
            if state.visit != visit {
                debug!(chatroom_id = %chatroom_id, "stale initial fetch discarded");
                return Ok(());
            }
            state.initial_load = LoadPhase::Loaded;
            state.window.apply_initial(page);

            let SyncState {
                window,
                tracker,
                router,
                pending_events,
                pump,
                ..
            } = &mut *state;
            let boundary = tracker
                .snapshot(
                    window.messages(),
                    &self.current_user,
                    window.has_more(),
                    self.config.unread_threshold,
                )
                .cloned();

            // Live dispatch starts only now; events that raced the fetch sat
            // queued in the transport channel and are replayed in order.
            if let Some(events) = pending_events.take() {
                if let Some(router) = router.as_mut() {
                    router.mark_subscribed();
                }
                *pump = Some(self.spawn_pump(events, visit));
            }
            boundary
        };

        self.emit(SyncUpdate::WindowChanged);
        self.emit(SyncUpdate::UnreadBoundarySet(boundary));
        Ok(())
    }

    pub async fn load_more(&self) -> Result<(), SyncError> {
        let (chatroom_id, cursor, visit) = {
            let mut state = self.inner.lock().await;
            let chatroom_id = state.chatroom_id.clone().ok_or(SyncError::NotInChatroom)?;
            if state.initial_load != LoadPhase::Loaded
                || state.loading_more
                || !state.window.has_more()
            {
                return Ok(());
            }
            state.loading_more = true;
            (
                chatroom_id,
                state.window.cursor().map(str::to_owned),
                state.visit,
            )
        };

        let result = self
            .api
            .fetch_messages(&chatroom_id, self.config.page_size, cursor.as_deref())
            .await;

        let mut state = self.inner.lock().await;
        if state.visit != visit {
            debug!(chatroom_id = %chatroom_id, "stale pagination result discarded");
            return Ok(());
        }
        state.loading_more = false;
        match result {
            Ok(page) => {
                state.window.apply_older(page);
                drop(state);
                self.emit(SyncUpdate::WindowChanged);
                Ok(())
            }
            Err(source) => Err(SyncError::Fetch {
                chatroom_id,
                source,
            }),
        }
    }

    /// Optimistic read mark plus server confirmation. On rejection only
    /// this `(message, user)` mark is reverted.
    pub async fn mark_read(&self, message_id: &MessageId) -> Result<(), SyncError> {
        let visit = {
            let mut state = self.inner.lock().await;
            if state.chatroom_id.is_none() {
                return Err(SyncError::NotInChatroom);
            }
            let Some(message) = state.window.get(message_id) else {
                return Ok(());
            };
            if message.sender_id == self.current_user || message.is_read_by(&self.current_user) {
                return Ok(());
            }
            let applied = state.window.apply_read_mark(
                message_id,
                ReadMark {
                    user_id: self.current_user.clone(),
                    username: self.current_username.clone(),
                    is_read: true,
                    read_at: Utc::now(),
                },
            );
            if applied {
                state.window.decrement_unread();
            }
            state.visit
        };
        self.emit(SyncUpdate::WindowChanged);

        if let Err(source) = self.api.mark_read(message_id).await {
            let err = SyncError::Confirmation {
                message_id: message_id.clone(),
                user_id: self.current_user.clone(),
                source,
            };
            warn!(message_id = %message_id, "read confirmation rejected; reverting mark: {err}");
            {
                let mut state = self.inner.lock().await;
                if state.visit == visit
                    && state.window.remove_read_mark(message_id, &self.current_user)
                {
                    state.window.increment_unread();
                }
            }
            self.emit(SyncUpdate::WindowChanged);
            self.emit(SyncUpdate::Notice(err.to_string()));
        }
        Ok(())
    }

    /// Bulk optimistic read marks plus one confirmation call. A rejected
    /// confirmation keeps the marks and records a [`PendingReconciliation`]
    /// entry instead of reverting.
    pub async fn mark_all_read(&self) -> Result<(), SyncError> {
        let (chatroom_id, visit, touched) = {
            let mut state = self.inner.lock().await;
            let chatroom_id = state.chatroom_id.clone().ok_or(SyncError::NotInChatroom)?;
            let touched = state.window.apply_bulk_read(
                &self.current_user,
                &self.current_username,
                Utc::now(),
            );
            state.window.clear_unread();
            (chatroom_id, state.visit, touched)
        };
        if touched > 0 {
            self.emit(SyncUpdate::WindowChanged);
        }

        if let Err(err) = self.api.mark_all_read(&chatroom_id).await {
            warn!(
                chatroom_id = %chatroom_id,
                "bulk read confirmation rejected; keeping optimistic marks: {err}"
            );
            let mut state = self.inner.lock().await;
            if state.visit == visit {
                state.pending.push(PendingReconciliation {
                    chatroom_id,
                    user_id: self.current_user.clone(),
                    requested_at: Utc::now(),
                    attempts: 1,
                });
            }
        }
        Ok(())
    }

    /// Retry every queued bulk confirmation once; failures are re-queued
    /// with their attempt count bumped.
    pub async fn retry_pending(&self) -> usize {
        let entries = std::mem::take(&mut self.inner.lock().await.pending);
        let mut resolved = 0;
        for mut entry in entries {
            match self.api.mark_all_read(&entry.chatroom_id).await {
                Ok(()) => resolved += 1,
                Err(err) => {
                    entry.attempts += 1;
                    warn!(
                        chatroom_id = %entry.chatroom_id,
                        attempts = entry.attempts,
                        "pending read reconciliation retry failed: {err}"
                    );
                    self.inner.lock().await.pending.push(entry);
                }
            }
        }
        resolved
    }

    pub async fn pending_reconciliations(&self) -> Vec<PendingReconciliation> {
        self.inner.lock().await.pending.clone()
    }

    pub async fn dismiss_unread(&self) {
        self.inner.lock().await.tracker.dismiss();
        self.emit(SyncUpdate::UnreadBoundarySet(None));
    }

    pub async fn unread_boundary(&self) -> Option<UnreadBoundary> {
        self.inner.lock().await.tracker.boundary().cloned()
    }

    pub async fn window(&self) -> WindowSnapshot {
        let state = self.inner.lock().await;
        WindowSnapshot {
            messages: state.window.messages().to_vec(),
            has_more: state.window.has_more(),
            loading_initial: state.initial_load == LoadPhase::InFlight,
            loading_more: state.loading_more,
            unread_count: state.window.unread_count(),
            total_count: state.window.total_count(),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.lifecycle.state()
    }

    /// Close the conversation and hand the channel back to the global feed.
    /// Live dispatch stops first so nothing touches the discarded store.
    pub async fn leave_chatroom(self: &Arc<Self>) -> Result<(), SyncError> {
        let (pending, auth_token) = {
            let mut state = self.inner.lock().await;
            if state.chatroom_id.is_none() {
                return Ok(());
            }
            state.visit += 1;
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
            if let Some(mut router) = state.router.take() {
                router.teardown();
            }
            state.pending_events = None;
            state.chatroom_id = None;
            state.window.reset();
            state.tracker.reset();
            state.initial_load = LoadPhase::Idle;
            state.loading_more = false;
            (std::mem::take(&mut state.pending), state.auth_token.clone())
        };

        for entry in pending {
            if let Err(err) = self.api.mark_all_read(&entry.chatroom_id).await {
                warn!(
                    chatroom_id = %entry.chatroom_id,
                    attempts = entry.attempts,
                    "pending read reconciliation dropped on exit: {err}"
                );
            }
        }

        self.channel.unsubscribe().await;
        self.inner.lock().await.lifecycle.reset_idle();
        self.emit(SyncUpdate::ConnectionChanged(ConnectionState::Idle));

        match auth_token {
            Some(token) => self.connect_global(&token).await,
            None => Ok(()),
        }
    }

    /// Subscribe to the channel-agnostic global feed, active whenever no
    /// conversation is open.
    pub async fn connect_global(self: &Arc<Self>, auth_token: &str) -> Result<(), SyncError> {
        let visit = {
            let mut state = self.inner.lock().await;
            state.visit += 1;
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
            state.auth_token = Some(auth_token.to_owned());
            state.lifecycle.begin_connect(SubscriptionScope::Global);
            state.visit
        };
        self.emit(SyncUpdate::ConnectionChanged(ConnectionState::Connecting));

        let events = match self
            .channel
            .subscribe(SubscriptionScope::Global, auth_token)
            .await
        {
            Ok(events) => events,
            Err(source) => {
                let mut state = self.inner.lock().await;
                if state.visit == visit {
                    state.lifecycle.reset_idle();
                }
                drop(state);
                self.emit(SyncUpdate::ConnectionChanged(ConnectionState::Idle));
                return Err(SyncError::Subscription { source });
            }
        };

        {
            let mut state = self.inner.lock().await;
            if state.visit != visit {
                return Ok(());
            }
            state.lifecycle.confirm_connected();
            state.pump = Some(self.spawn_global_pump(events, visit));
        }
        self.emit(SyncUpdate::ConnectionChanged(ConnectionState::Connected));
        Ok(())
    }

    fn emit(&self, update: SyncUpdate) {
        let _ = self.updates.send(update);
    }

    async fn teardown_visit(&self) {
        let mut state = self.inner.lock().await;
        state.visit += 1;
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        if let Some(mut router) = state.router.take() {
            router.teardown();
        }
        state.pending_events = None;
        state.chatroom_id = None;
        state.window.reset();
        state.tracker.reset();
        state.initial_load = LoadPhase::Idle;
        state.loading_more = false;
        state.lifecycle.reset_idle();
    }

    fn spawn_pump(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        visit: u64,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                client.handle_transport_event(event, visit).await;
            }
        })
    }

    fn spawn_global_pump(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        visit: u64,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Opened => debug!("global feed open"),
                    TransportEvent::Event(event) => {
                        client.emit(SyncUpdate::GlobalEvent(event));
                    }
                    TransportEvent::Errored(reason) => {
                        warn!("global feed error: {reason}");
                        client.emit(SyncUpdate::Notice(reason));
                    }
                    TransportEvent::Closed => {
                        let mut state = client.inner.lock().await;
                        if state.visit == visit {
                            state.lifecycle.reset_idle();
                        }
                        drop(state);
                        client.emit(SyncUpdate::ConnectionChanged(ConnectionState::Idle));
                        break;
                    }
                }
            }
        })
    }

    async fn handle_transport_event(self: &Arc<Self>, event: TransportEvent, visit: u64) {
        match event {
            TransportEvent::Opened => debug!("event channel open"),
            TransportEvent::Event(event) => self.handle_channel_event(event, visit).await,
            TransportEvent::Errored(reason) => {
                warn!("event channel error: {reason}");
                self.emit(SyncUpdate::Notice(reason));
            }
            TransportEvent::Closed => {
                let mut state = self.inner.lock().await;
                if state.visit == visit {
                    state.lifecycle.reset_idle();
                    drop(state);
                    self.emit(SyncUpdate::ConnectionChanged(ConnectionState::Idle));
                }
            }
        }
    }

    async fn handle_channel_event(self: &Arc<Self>, event: ChannelEvent, visit: u64) {
        let dispatch = {
            let mut state = self.inner.lock().await;
            if state.visit != visit {
                return;
            }
            let Some(router) = state.router.as_mut() else {
                return;
            };
            router.route(event)
        };
        let Some(dispatch) = dispatch else {
            return;
        };

        match dispatch {
            Dispatch::Insert {
                mut message,
                needs_local_read,
            } => {
                // The user is looking at this conversation right now: mark
                // the message read locally before it ever renders, then
                // confirm in the background.
                let confirm_id = needs_local_read.then(|| message.message_id.clone());
                if needs_local_read {
                    message.upsert_read_mark(ReadMark {
                        user_id: self.current_user.clone(),
                        username: self.current_username.clone(),
                        is_read: true,
                        read_at: Utc::now(),
                    });
                }
                let inserted = {
                    let mut state = self.inner.lock().await;
                    if state.visit != visit {
                        return;
                    }
                    state.window.insert(message)
                };
                if inserted {
                    self.emit(SyncUpdate::WindowChanged);
                }
                if let Some(message_id) = confirm_id {
                    let client = Arc::clone(self);
                    tokio::spawn(async move {
                        if let Err(err) = client.api.mark_read(&message_id).await {
                            warn!(message_id = %message_id, "auto read confirmation failed: {err}");
                        }
                    });
                }
            }
            Dispatch::Patch { message_id, patch } => {
                let changed = {
                    let mut state = self.inner.lock().await;
                    if state.visit != visit {
                        return;
                    }
                    state.window.patch(&message_id, &patch)
                };
                if changed {
                    self.emit(SyncUpdate::WindowChanged);
                }
            }
            Dispatch::Remove { message_id } => {
                let changed = {
                    let mut state = self.inner.lock().await;
                    if state.visit != visit {
                        return;
                    }
                    let was_unread = state.window.get(&message_id).is_some_and(|m| {
                        m.sender_id != self.current_user && !m.is_read_by(&self.current_user)
                    });
                    let removed = state.window.remove(&message_id);
                    if removed && was_unread {
                        state.window.decrement_unread();
                    }
                    removed
                };
                if changed {
                    self.emit(SyncUpdate::WindowChanged);
                }
            }
            Dispatch::ApplyRead { message_id, mark } => {
                // a receipt for the current user means another device read it
                let own_read = mark.user_id == self.current_user && mark.is_read;
                let changed = {
                    let mut state = self.inner.lock().await;
                    if state.visit != visit {
                        return;
                    }
                    let changed = state.window.apply_read_mark(&message_id, mark);
                    if changed && own_read {
                        state.window.decrement_unread();
                    }
                    changed
                };
                if changed {
                    self.emit(SyncUpdate::WindowChanged);
                }
            }
            Dispatch::ApplyBulkRead {
                user_id,
                username,
                read_at,
            } => {
                let touched = {
                    let mut state = self.inner.lock().await;
                    if state.visit != visit {
                        return;
                    }
                    let touched = state.window.apply_bulk_read(&user_id, &username, read_at);
                    if user_id == self.current_user {
                        state.window.clear_unread();
                    }
                    touched
                };
                if touched > 0 {
                    self.emit(SyncUpdate::WindowChanged);
                }
            }
            Dispatch::ChatroomDeleted => {
                let chatroom_id = {
                    let state = self.inner.lock().await;
                    if state.visit != visit {
                        return;
                    }
                    state.chatroom_id.clone()
                };
                let Some(chatroom_id) = chatroom_id else {
                    return;
                };
                error!(chatroom_id = %chatroom_id, "active chatroom deleted; forcing exit");
                self.emit(SyncUpdate::ChatroomDeleted(chatroom_id));
                let client = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(err) = client.leave_chatroom().await {
                        warn!("teardown after chatroom deletion failed: {err}");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
