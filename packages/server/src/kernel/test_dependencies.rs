// TestDependencies - mock implementations for testing
//
// Provides in-memory stores, a controllable clock and a recording SMS gateway
// that can be injected into ServerDeps for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    BaseChallengeStore, BaseClock, BaseIdentityTransaction, BaseSessionStore, BaseSmsGateway,
    BaseUnitOfWork, ServerDeps, SmsError,
};
use crate::common::{DeviceId, SessionId, UserId};
use crate::config::AuthSettings;
use crate::domains::auth::models::{Session, SessionRotation};
use crate::domains::directory::{Device, User};

// =============================================================================
// Mock Clock
// =============================================================================

/// Clock that only moves when told to
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    /// Starts at 2025-01-01T00:00:00Z
    pub fn new() -> Self {
        Self::at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseClock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// =============================================================================
// In-memory Challenge Store
// =============================================================================

/// Key/value store with per-key expiry judged against a [`MockClock`]
pub struct InMemoryChallengeStore {
    clock: Arc<MockClock>,
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    failing: Mutex<bool>,
    yielding: Mutex<bool>,
}

impl InMemoryChallengeStore {
    pub fn new(clock: Arc<MockClock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            failing: Mutex::new(false),
            yielding: Mutex::new(false),
        }
    }

    /// Make every subsequent call fail with a store error
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Yield to the scheduler before every read or delete, so concurrent
    /// callers interleave between their `get` and `delete`
    pub fn set_yielding(&self, yielding: bool) {
        *self.yielding.lock().unwrap() = yielding;
    }

    /// Live value under `key`, bypassing the failure switch
    pub fn raw(&self, key: &str) -> Option<String> {
        self.live(key).map(|(value, _)| value)
    }

    /// Remaining lifetime of a live key
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let (_, expires_at) = self.live(key)?;
        (expires_at - self.clock.now()).to_std().ok()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|(_, expires_at)| now < *expires_at)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<(String, DateTime<Utc>)> {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .filter(|(_, expires_at)| now < *expires_at)
            .cloned()
    }

    fn check(&self) -> Result<()> {
        if *self.failing.lock().unwrap() {
            return Err(anyhow!("challenge store unavailable"));
        }
        Ok(())
    }

    async fn pause(&self) {
        let yielding = *self.yielding.lock().unwrap();
        if yielding {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl BaseChallengeStore for InMemoryChallengeStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        let expires_at = self.clock.now() + chrono::Duration::from_std(ttl)?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.pause().await;
        self.check()?;
        Ok(self.raw(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.pause().await;
        self.check()?;
        let now = self.clock.now();
        let removed = self.entries.lock().unwrap().remove(key);
        Ok(removed.is_some_and(|(_, expires_at)| now < expires_at))
    }
}

// =============================================================================
// Mock SMS Gateway
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmsMode {
    Deliver,
    Unavailable,
    Fail,
    Hang(Duration),
}

/// Records delivered messages; can be switched to fail or stall
pub struct MockSmsGateway {
    sent: Mutex<Vec<(String, String)>>,
    mode: Mutex<SmsMode>,
}

impl MockSmsGateway {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            mode: Mutex::new(SmsMode::Deliver),
        }
    }

    /// Report the gateway as not configured / unreachable
    pub fn unavailable(self) -> Self {
        self.set_mode(SmsMode::Unavailable);
        self
    }

    /// Reject every message with a generic failure
    pub fn failing(self) -> Self {
        self.set_mode(SmsMode::Fail);
        self
    }

    /// Sleep for `delay` before delivering
    pub fn hanging(self, delay: Duration) -> Self {
        self.set_mode(SmsMode::Hang(delay));
        self
    }

    pub fn deliver(&self) {
        self.set_mode(SmsMode::Deliver);
    }

    /// All delivered `(destination, text)` pairs
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Code from the most recent delivered message
    pub fn last_code(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let (_, text) = sent.last()?;
        extract_code(text)
    }

    /// Code from the most recent message delivered to `destination`
    pub fn last_code_for(&self, destination: &str) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        sent.iter()
            .rev()
            .find(|(to, _)| to == destination)
            .and_then(|(_, text)| extract_code(text))
    }

    fn set_mode(&self, mode: SmsMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

impl Default for MockSmsGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_code(text: &str) -> Option<String> {
    text.strip_prefix("Verification code: ")
        .and_then(|rest| rest.get(..6))
        .map(str::to_string)
}

#[async_trait]
impl BaseSmsGateway for MockSmsGateway {
    async fn send_sms(&self, destination: &str, text: &str) -> std::result::Result<(), SmsError> {
        let mode = *self.mode.lock().unwrap();
        match mode {
            SmsMode::Unavailable => {
                return Err(SmsError::Unavailable("gateway not configured".to_string()))
            }
            SmsMode::Fail => return Err(SmsError::Failed(anyhow!("carrier rejected message"))),
            SmsMode::Hang(delay) => tokio::time::sleep(delay).await,
            SmsMode::Deliver => {}
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

// =============================================================================
// In-memory Session Store + Unit of Work
// =============================================================================

#[derive(Default)]
struct IdentityState {
    users: HashMap<UserId, User>,
    devices: HashMap<DeviceId, Device>,
    sessions: HashMap<SessionId, Session>,
}

#[derive(Default)]
struct Switches {
    fail_session_writes: bool,
    race_on_find: Option<SessionId>,
    yielding: bool,
    rollbacks: usize,
}

/// Users, devices and sessions in memory.
///
/// Also acts as the unit of work: transactions stage writes and apply them
/// on commit only.
pub struct InMemorySessionStore {
    clock: Arc<MockClock>,
    state: Arc<Mutex<IdentityState>>,
    switches: Arc<Mutex<Switches>>,
}

impl InMemorySessionStore {
    pub fn new(clock: Arc<MockClock>) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(IdentityState::default())),
            switches: Arc::new(Mutex::new(Switches::default())),
        }
    }

    /// Make session inserts and rotations fail with a store error
    pub fn fail_session_writes(&self, fail: bool) {
        self.switches.lock().unwrap().fail_session_writes = fail;
    }

    /// Let the next `find` for `id` return the current row, then rotate the
    /// stored digest behind the caller's back.
    pub fn rotate_behind_next_find(&self, id: SessionId) {
        self.switches.lock().unwrap().race_on_find = Some(id);
    }

    /// Yield to the scheduler before every `find` and `rotate`, so two
    /// refreshes of one token both read the row before either rotates it
    pub fn set_yielding(&self, yielding: bool) {
        self.switches.lock().unwrap().yielding = yielding;
    }

    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.state.lock().unwrap().sessions.get(&id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn users(&self) -> Vec<User> {
        self.state.lock().unwrap().users.values().cloned().collect()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.state.lock().unwrap().devices.values().cloned().collect()
    }

    pub fn rollback_count(&self) -> usize {
        self.switches.lock().unwrap().rollbacks
    }

    fn check_writes(&self) -> Result<()> {
        if self.switches.lock().unwrap().fail_session_writes {
            return Err(anyhow!("session store write failed"));
        }
        Ok(())
    }

    async fn pause(&self) {
        let yielding = self.switches.lock().unwrap().yielding;
        if yielding {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl BaseSessionStore for InMemorySessionStore {
    async fn upsert(&self, session: &Session) -> Result<()> {
        self.check_writes()?;
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find(&self, id: SessionId) -> Result<Option<Session>> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        let found = state.sessions.get(&id).cloned();

        let mut switches = self.switches.lock().unwrap();
        if switches.race_on_find == Some(id) {
            switches.race_on_find = None;
            if let Some(row) = state.sessions.get_mut(&id) {
                row.refresh_token_digest = vec![0xAB; 32];
            }
        }
        Ok(found)
    }

    async fn rotate(&self, rotation: &SessionRotation) -> Result<bool> {
        self.pause().await;
        self.check_writes()?;
        let mut state = self.state.lock().unwrap();
        Ok(state
            .sessions
            .get_mut(&rotation.id)
            .map(|row| row.apply(rotation))
            .unwrap_or(false))
    }

    async fn delete(&self, id: SessionId) -> Result<()> {
        self.state.lock().unwrap().sessions.remove(&id);
        Ok(())
    }

    async fn delete_matching(&self, id: SessionId, digest: &[u8]) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let matches = state
            .sessions
            .get(&id)
            .map(|row| row.refresh_token_digest == digest)
            .unwrap_or(false);
        if matches {
            state.sessions.remove(&id);
        }
        Ok(matches)
    }
}

#[async_trait]
impl BaseUnitOfWork for InMemorySessionStore {
    async fn begin(&self) -> Result<Box<dyn BaseIdentityTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            clock: self.clock.clone(),
            state: self.state.clone(),
            switches: self.switches.clone(),
            staged: IdentityState::default(),
        }))
    }
}

/// Staged writes of one in-memory unit of work
pub struct InMemoryTransaction {
    clock: Arc<MockClock>,
    state: Arc<Mutex<IdentityState>>,
    switches: Arc<Mutex<Switches>>,
    staged: IdentityState,
}

impl InMemoryTransaction {
    fn visible_user(&self, phone: &str) -> Option<User> {
        self.staged
            .users
            .values()
            .find(|u| u.phone == phone)
            .cloned()
            .or_else(|| {
                let state = self.state.lock().unwrap();
                state.users.values().find(|u| u.phone == phone).cloned()
            })
    }

    fn visible_device(&self, user_id: UserId, label: Option<&str>) -> Option<Device> {
        let same = |d: &&Device| {
            d.user_id == user_id && d.label.as_deref().unwrap_or("") == label.unwrap_or("")
        };
        self.staged
            .devices
            .values()
            .find(same)
            .cloned()
            .or_else(|| {
                let state = self.state.lock().unwrap();
                state.devices.values().find(same).cloned()
            })
    }
}

#[async_trait]
impl BaseIdentityTransaction for InMemoryTransaction {
    async fn upsert_user_and_device(
        &mut self,
        phone: &str,
        label: Option<&str>,
        push_token: Option<&str>,
    ) -> Result<(User, Device)> {
        let now = self.clock.now();

        let user = match self.visible_user(phone) {
            Some(mut user) => {
                user.updated_at = now;
                user
            }
            None => User {
                id: UserId::new(),
                phone: phone.to_string(),
                display_name: None,
                created_at: now,
                updated_at: now,
            },
        };

        let device = match self.visible_device(user.id, label) {
            Some(mut device) => {
                if push_token.is_some() {
                    device.push_token = push_token.map(str::to_string);
                }
                device.last_seen_at = now;
                device
            }
            None => Device {
                id: DeviceId::new(),
                user_id: user.id,
                label: label.map(str::to_string),
                push_token: push_token.map(str::to_string),
                created_at: now,
                last_seen_at: now,
            },
        };

        self.staged.users.insert(user.id, user.clone());
        self.staged.devices.insert(device.id, device.clone());
        Ok((user, device))
    }

    async fn insert_session(&mut self, session: &Session) -> Result<()> {
        if self.switches.lock().unwrap().fail_session_writes {
            return Err(anyhow!("session store write failed"));
        }
        self.staged.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTransaction { state, staged, .. } = *self;
        let mut state = state.lock().unwrap();
        state.users.extend(staged.users);
        state.devices.extend(staged.devices);
        state.sessions.extend(staged.sessions);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.switches.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

/// Settings with fixed test secrets: 5 minute codes, 15 minute access
/// tokens, 30 day refresh tokens.
pub fn test_settings() -> AuthSettings {
    AuthSettings {
        otp_secret: "otp-secret-for-tests-0123456789abcdef".to_string(),
        otp_ttl: Duration::from_secs(300),
        access_secret: "access-secret-for-tests-0123456789abcdef".to_string(),
        refresh_secret: "refresh-secret-for-tests-0123456789abcdef".to_string(),
        access_ttl: chrono::Duration::minutes(15),
        refresh_ttl: chrono::Duration::days(30),
        sms_timeout: Duration::from_secs(2),
    }
}

#[derive(Clone)]
pub struct TestDependencies {
    pub clock: Arc<MockClock>,
    pub challenge_store: Arc<InMemoryChallengeStore>,
    pub sms: Arc<MockSmsGateway>,
    pub sessions: Arc<InMemorySessionStore>,
    pub settings: AuthSettings,
}

impl TestDependencies {
    pub fn new() -> Self {
        let clock = Arc::new(MockClock::new());
        Self {
            challenge_store: Arc::new(InMemoryChallengeStore::new(clock.clone())),
            sms: Arc::new(MockSmsGateway::new()),
            sessions: Arc::new(InMemorySessionStore::new(clock.clone())),
            clock,
            settings: test_settings(),
        }
    }

    /// Set a mock SMS gateway
    pub fn mock_sms(mut self, gateway: MockSmsGateway) -> Self {
        self.sms = Arc::new(gateway);
        self
    }

    pub fn with_settings(mut self, settings: AuthSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Convert into ServerDeps for testing
    pub fn into_deps(self) -> ServerDeps {
        ServerDeps::new(
            &self.settings,
            self.challenge_store,
            self.sms,
            self.sessions.clone(),
            self.sessions,
            self.clock,
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
