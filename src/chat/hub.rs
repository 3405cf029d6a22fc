//! The chat room: one process-scoped object owning presence, moderation,
//! the message ring, the broadcast bus and the store handle.
//!
//! Room state sits behind a single `std::sync::Mutex`. It is never held across
//! an `.await`, so every in-memory mutation between two store calls is atomic
//! with respect to other handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use super::bus::{BroadcastBus, ConnId, Outbound};
use super::command::validate_color;
use super::ledger::ModerationLedger;
use super::message::{MessageRing, PrivateMessage};
use super::registry::SessionRegistry;
use super::tier::AdminTier;
use crate::clock::{Clock, SystemClock};
use crate::config::ChatConfig;
use crate::rate_limit::{ActionRateLimiter, RateLimitConfig};
use crate::store::{Account, ChatStore, ProfileUpdate, DEFAULT_COLOR};
use crate::web::events::ServerEvent;
use crate::{ParlorError, Result};

/// Maximum status text length in characters.
pub const MAX_STATUS_LENGTH: usize = 100;

/// Maximum theme name length in characters.
pub const MAX_THEME_LENGTH: usize = 32;

/// Per-connection state.
#[derive(Debug, Clone)]
pub struct Session {
    /// Logged-in identity, if any.
    pub identity: Option<String>,
    /// Tier granted at login.
    pub tier: AdminTier,
    /// Client address.
    pub ip: String,
    /// Message color.
    pub color: String,
}

impl Session {
    fn new(ip: &str) -> Self {
        Self {
            identity: None,
            tier: AdminTier::Regular,
            ip: ip.to_string(),
            color: DEFAULT_COLOR.to_string(),
        }
    }
}

/// A logged-in connection acting on the room.
#[derive(Debug, Clone)]
pub struct Actor {
    /// Originating connection.
    pub conn: ConnId,
    /// Identity.
    pub identity: String,
    /// Tier of the originating connection.
    pub tier: AdminTier,
    /// Message color.
    pub color: String,
}

/// Login request.
#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    /// Account name.
    pub username: String,
    /// Password, for a password login.
    pub password: Option<String>,
    /// Session token, for a token login.
    pub token: Option<String>,
    /// Admin override password.
    pub admin_password: Option<String>,
}

/// Mutable room state guarded by the hub's mutex.
#[derive(Debug)]
pub(crate) struct RoomState {
    pub(crate) sessions: HashMap<ConnId, Session>,
    pub(crate) registry: SessionRegistry,
    pub(crate) ledger: ModerationLedger,
    pub(crate) ring: MessageRing,
}

/// The chat room.
pub struct ChatHub {
    pub(crate) config: ChatConfig,
    pub(crate) store: Arc<dyn ChatStore>,
    pub(crate) bus: BroadcastBus,
    state: Mutex<RoomState>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rng: Mutex<StdRng>,
    pub(crate) limiter: ActionRateLimiter,
}

impl ChatHub {
    /// Create a room using the system clock and an OS-seeded RNG.
    pub fn new(config: ChatConfig, store: Arc<dyn ChatStore>) -> Self {
        let limiter = ActionRateLimiter::new(RateLimitConfig::new(
            config.rate_limit_messages,
            config.rate_limit_window_secs,
        ));
        let state = RoomState {
            sessions: HashMap::new(),
            registry: SessionRegistry::new(),
            ledger: ModerationLedger::new(),
            ring: MessageRing::new(config.max_history),
        };
        Self {
            config,
            store,
            bus: BroadcastBus::new(),
            state: Mutex::new(state),
            clock: Arc::new(SystemClock),
            rng: Mutex::new(StdRng::from_os_rng()),
            limiter,
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed the RNG used by games and fortunes.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Chat configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Store handle.
    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    /// Fill the ring from the store. Called once at startup.
    pub async fn load_history(&self) -> Result<usize> {
        let messages = self.store.get_messages(self.config.max_history).await?;
        let mut state = self.lock();
        state.ring.fill(messages);
        Ok(state.ring.len())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Register a new connection from `ip`.
    pub fn open_connection(&self, ip: &str) -> (ConnId, UnboundedReceiver<Outbound>) {
        let (conn, rx) = self.bus.register();
        self.lock().sessions.insert(conn, Session::new(ip));
        debug!(conn, ip, "Connection opened");
        (conn, rx)
    }

    /// Tear down a connection, logging its identity out first.
    pub fn close_connection(&self, conn: ConnId) {
        {
            let mut state = self.lock();
            self.detach(&mut state, conn);
            state.sessions.remove(&conn);
        }
        self.bus.unregister(conn);
        debug!(conn, "Connection closed");
    }

    /// Whether an address is on the persisted ban list.
    pub async fn is_ip_banned(&self, ip: &str) -> Result<bool> {
        Ok(self.store.is_ip_banned(ip).await?)
    }

    /// Resolve the logged-in actor behind a connection.
    pub fn actor(&self, conn: ConnId) -> Result<Actor> {
        let state = self.lock();
        let session = state.sessions.get(&conn).ok_or(ParlorError::NotAuthenticated)?;
        let identity = session
            .identity
            .clone()
            .ok_or(ParlorError::NotAuthenticated)?;
        Ok(Actor {
            conn,
            identity,
            tier: session.tier,
            color: session.color.clone(),
        })
    }

    /// Snapshot of online identities.
    pub fn online_users(&self) -> Vec<String> {
        self.lock().registry.list_identities()
    }

    /// Connections currently owned by an identity.
    pub fn connections_of(&self, identity: &str) -> Vec<ConnId> {
        self.lock().registry.connections(identity).to_vec()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.bus.len()
    }

    /// Create an account. Does not log the connection in.
    pub async fn signup(&self, username: &str, password: &str) -> Result<Account> {
        let account = self.store.signup(username, password).await?;
        info!(user = %account.username, "Account created");
        Ok(account)
    }

    /// Authenticate a connection and bring its identity online.
    pub async fn login(&self, conn: ConnId, request: LoginRequest) -> Result<Account> {
        let username = request.username.trim().to_string();
        if username.is_empty() {
            return Err(ParlorError::Validation("username is required".to_string()));
        }

        let ip = {
            let state = self.lock();
            if state.ledger.is_banned(&username) {
                return Err(ParlorError::Banned(format!("{username} is banned")));
            }
            state
                .sessions
                .get(&conn)
                .map(|s| s.ip.clone())
                .ok_or(ParlorError::NotAuthenticated)?
        };
        if self.store.is_ip_banned(&ip).await? {
            return Err(ParlorError::Banned("your address is banned".to_string()));
        }

        let account = match (&request.password, &request.token) {
            (Some(password), _) => self.store.login(&username, password).await?,
            (None, Some(token)) => self.store.login_with_token(&username, token).await?,
            (None, None) => {
                return Err(ParlorError::Validation(
                    "a password or token is required".to_string(),
                ))
            }
        };

        let tier = AdminTier::resolve(
            &self.config,
            &account.username,
            account.is_admin,
            request.admin_password.as_deref(),
        );

        let private_history = if tier.is_privileged() {
            self.store.get_all_private_messages().await?
        } else {
            self.store
                .get_all_private_messages_for_user(&account.username)
                .await?
        };

        self.attach(conn, &account, tier, &ip, private_history)?;
        info!(conn, user = %account.username, ?tier, ip = %ip, "User logged in");
        Ok(account)
    }

    fn attach(
        &self,
        conn: ConnId,
        account: &Account,
        tier: AdminTier,
        ip: &str,
        private_history: Vec<PrivateMessage>,
    ) -> Result<()> {
        let identity = account.username.clone();
        let mut state = self.lock();

        // The ban may have landed while the store was being consulted.
        if state.ledger.is_banned(&identity) {
            return Err(ParlorError::Banned(format!("{identity} is banned")));
        }
        if !state.sessions.contains_key(&conn) {
            return Err(ParlorError::NotAuthenticated);
        }
        self.detach(&mut state, conn);

        if let Some(session) = state.sessions.get_mut(&conn) {
            session.identity = Some(identity.clone());
            session.tier = tier;
            session.color = account.color.clone();
        }

        let first = state.registry.add_connection(&identity, conn);
        state.registry.set_status(&identity, account.status_text.clone());
        state.registry.record_ip(&identity, ip);

        self.bus.send_to(
            conn,
            ServerEvent::History {
                messages: state.ring.to_vec(),
            },
        );
        self.bus.send_to(
            conn,
            ServerEvent::PrivateHistory {
                messages: private_history,
            },
        );

        let users = state.registry.list_identities();
        if first {
            self.bus.broadcast(&ServerEvent::UserJoined {
                username: identity,
                user_count: users.len(),
                users,
            });
        } else {
            self.bus.send_to(
                conn,
                ServerEvent::OnlineUsers {
                    user_count: users.len(),
                    users,
                },
            );
        }
        self.notify_ip_monitors(&state);
        Ok(())
    }

    /// Drop the connection's identity without closing the socket.
    pub fn logout(&self, conn: ConnId) -> Result<()> {
        let mut state = self.lock();
        match self.detach(&mut state, conn) {
            Some(identity) => {
                info!(conn, user = %identity, "User logged out");
                Ok(())
            }
            None => Err(ParlorError::NotAuthenticated),
        }
    }

    /// Detach the identity from a connection. Broadcasts `userLeft` when it
    /// was the identity's last connection.
    fn detach(&self, state: &mut RoomState, conn: ConnId) -> Option<String> {
        let session = state.sessions.get_mut(&conn)?;
        let identity = session.identity.take()?;
        session.tier = AdminTier::Regular;
        session.color = DEFAULT_COLOR.to_string();

        if state.registry.remove_connection(&identity, conn) {
            self.limiter.cleanup(self.clock.as_ref());
            self.broadcast_left(state, &identity);
            self.notify_ip_monitors(state);
        }
        Some(identity)
    }

    fn broadcast_left(&self, state: &RoomState, identity: &str) {
        let users = state.registry.list_identities();
        self.bus.broadcast(&ServerEvent::UserLeft {
            username: identity.to_string(),
            user_count: users.len(),
            users,
        });
    }

    /// Forcibly remove an identity: every connection gets `banned` and is
    /// closed, caches are purged, and the room sees `userLeft`.
    pub(crate) fn evict(&self, state: &mut RoomState, identity: &str, reason: &str) -> bool {
        let conns = state.registry.remove_identity(identity);
        if conns.is_empty() {
            return false;
        }
        for conn in &conns {
            if let Some(session) = state.sessions.get_mut(conn) {
                session.identity = None;
                session.tier = AdminTier::Regular;
                session.color = DEFAULT_COLOR.to_string();
            }
            self.bus.send_to(
                *conn,
                ServerEvent::Banned {
                    reason: reason.to_string(),
                },
            );
            self.bus.close(*conn);
        }
        self.limiter.cleanup(self.clock.as_ref());
        self.broadcast_left(state, identity);
        info!(user = %identity, connections = conns.len(), "User evicted");
        true
    }

    /// Connections held by privileged admins.
    pub(crate) fn privileged_conns(&self, state: &RoomState) -> Vec<ConnId> {
        state
            .sessions
            .iter()
            .filter(|(_, s)| s.identity.is_some() && s.tier.is_privileged())
            .map(|(conn, _)| *conn)
            .collect()
    }

    /// Send the IP list and IP history to every privileged admin.
    pub(crate) fn notify_ip_monitors(&self, state: &RoomState) {
        let monitors = self.privileged_conns(state);
        if monitors.is_empty() {
            return;
        }
        self.bus.send_to_many(
            &monitors,
            &ServerEvent::UserIpList {
                users: state.registry.ip_list(),
            },
        );
        self.bus.send_to_many(
            &monitors,
            &ServerEvent::UserIpHistory {
                history: state.registry.ip_history(),
            },
        );
    }

    /// Effective tier of a moderation target.
    ///
    /// Static privileged membership always counts; otherwise the highest tier
    /// among its open connections.
    pub(crate) fn target_tier(&self, state: &RoomState, name: &str) -> AdminTier {
        let base = if self.config.is_privileged(name) {
            AdminTier::PrivilegedAdmin
        } else {
            AdminTier::Regular
        };
        state
            .registry
            .connections(name)
            .iter()
            .filter_map(|conn| state.sessions.get(conn))
            .map(|s| s.tier)
            .fold(base, AdminTier::max)
    }

    /// Apply a profile update and broadcast the new status text.
    pub async fn update_profile(
        &self,
        conn: ConnId,
        mut update: ProfileUpdate,
    ) -> Result<Account> {
        let actor = self.actor(conn)?;
        if let Some(color) = &update.color {
            validate_color(color)?;
        }
        if let Some(status) = update.status_text.as_mut() {
            *status = status.trim().to_string();
            if status.chars().count() > MAX_STATUS_LENGTH {
                return Err(ParlorError::Validation(format!(
                    "status text must be at most {MAX_STATUS_LENGTH} characters"
                )));
            }
        }
        if let Some(theme) = &update.theme {
            let len = theme.chars().count();
            if len == 0 || len > MAX_THEME_LENGTH {
                return Err(ParlorError::Validation(format!(
                    "theme must be 1 to {MAX_THEME_LENGTH} characters"
                )));
            }
        }

        let account = self
            .store
            .update_account_profile(&actor.identity, &update)
            .await?;

        let mut state = self.lock();
        self.set_identity_color(&mut state, &actor.identity, &account.color);
        if state.registry.is_present(&actor.identity) {
            state
                .registry
                .set_status(&actor.identity, account.status_text.clone());
        }
        self.bus.broadcast(&ServerEvent::UserStatusUpdate {
            username: actor.identity.clone(),
            status_text: account.status_text.clone(),
        });
        Ok(account)
    }

    pub(crate) fn set_identity_color(&self, state: &mut RoomState, identity: &str, color: &str) {
        for session in state.sessions.values_mut() {
            if session.identity.as_deref() == Some(identity) {
                session.color = color.to_string();
            }
        }
    }

    /// Tell everyone else this identity is typing.
    pub fn typing(&self, conn: ConnId) -> Result<()> {
        let actor = self.actor(conn)?;
        self.broadcast_except_identity(
            &actor.identity,
            ServerEvent::UserTyping {
                username: actor.identity.clone(),
            },
        );
        Ok(())
    }

    /// Tell everyone else this identity stopped typing.
    pub fn stop_typing(&self, conn: ConnId) -> Result<()> {
        let actor = self.actor(conn)?;
        self.broadcast_except_identity(
            &actor.identity,
            ServerEvent::UserStoppedTyping {
                username: actor.identity.clone(),
            },
        );
        Ok(())
    }

    fn broadcast_except_identity(&self, identity: &str, event: ServerEvent) {
        let targets: Vec<ConnId> = {
            let state = self.lock();
            state
                .sessions
                .iter()
                .filter(|(_, s)| s.identity.as_deref() != Some(identity))
                .map(|(conn, _)| *conn)
                .collect()
        };
        self.bus.send_to_many(&targets, &event);
    }

    /// Log a persistence failure that does not fail the request.
    pub(crate) fn degraded(&self, what: &str, err: impl std::fmt::Display) {
        warn!(error = %err, "Persistence failed for {}", what);
    }
}
