use std::sync::{Arc, Mutex, PoisonError};

use crate::core::{CoreError, Principal, Result};
use crate::identity::SessionToken;
use crate::store::{EnumId, Store, TxnId, TxnMode};

/// Login bookkeeping carried by an active call
#[derive(Debug, Clone)]
pub(crate) struct ActiveLogin {
    pub token: SessionToken,
    pub principal: Principal,
    pub txn: TxnId,
    pub mode: TxnMode,
}

#[derive(Debug)]
enum LoginState {
    Idle,
    /// A fresh call has claimed the context but login has not finished
    Pending,
    Active(ActiveLogin),
}

/// Per-call identity state
///
/// Each logical chain of calls owns one context. A fresh privileged
/// call claims it for the duration of the call; nested calls read the
/// active login from it instead of creating their own. The state is an
/// explicit value handed to the executor, so a second login attempt on
/// the same context fails immediately instead of silently stacking.
#[derive(Debug, Clone)]
pub struct CallContext {
    state: Arc<Mutex<LoginState>>,
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoginState::Idle)),
        }
    }

    /// Whether a login is currently active on this context
    pub fn has_active_login(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(&*state, LoginState::Active(_))
    }

    /// Whether the context is claimed at all, including a login still
    /// in flight
    pub(crate) fn is_busy(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        !matches!(&*state, LoginState::Idle)
    }

    /// Claim the context for a fresh call. Fails when a login is already
    /// active or in flight.
    pub(crate) fn reserve_fresh(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        match &*state {
            LoginState::Idle => {
                *state = LoginState::Pending;
                Ok(())
            }
            LoginState::Pending | LoginState::Active(_) => Err(CoreError::State(
                "an identity is already active in this call context, \
                 nested calls must pass no principal"
                    .to_string(),
            )),
        }
    }

    /// Record the completed login on a previously claimed context
    pub(crate) fn activate(&self, login: ActiveLogin) -> Result<()> {
        let mut state = self.state.lock()?;
        match &*state {
            LoginState::Pending => {
                *state = LoginState::Active(login);
                Ok(())
            }
            _ => Err(CoreError::State(
                "call context was not claimed before activation".to_string(),
            )),
        }
    }

    /// The login a nested call reuses, if any
    pub(crate) fn active_login(&self) -> Option<ActiveLogin> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            LoginState::Active(login) => Some(login.clone()),
            _ => None,
        }
    }

    /// Drop a claim whose login never completed. Cleanup path, total.
    pub(crate) fn abort_reservation(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*state, LoginState::Pending) {
            *state = LoginState::Idle;
        }
    }

    /// Return the context to idle after a call ends. Cleanup path, total.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = LoginState::Idle;
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Transactional session handed to [`Work::run`]
///
/// Bundles the open transaction with the identity it runs under and the
/// call context, so work can issue nested calls through the same
/// executor.
///
/// [`Work::run`]: crate::core::Work::run
pub struct Session {
    store: Arc<dyn Store>,
    txn: TxnId,
    mode: TxnMode,
    token: SessionToken,
    principal: Principal,
    context: CallContext,
    nested: bool,
}

impl Session {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        txn: TxnId,
        mode: TxnMode,
        token: SessionToken,
        principal: Principal,
        context: CallContext,
        nested: bool,
    ) -> Self {
        Self {
            store,
            txn,
            mode,
            token,
            principal,
            context,
            nested,
        }
    }

    pub fn txn(&self) -> TxnId {
        self.txn
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// The call context this session runs in. Pass it back to the
    /// executor to issue a nested call.
    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// True when this session joined an enclosing call instead of
    /// opening its own transaction
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    pub async fn config_value(&self, key: &str) -> Result<Option<String>> {
        self.store.config_value(self.txn, key).await
    }

    pub async fn update_or_insert_config_value(&self, key: &str, value: &str) -> Result<()> {
        self.store
            .update_or_insert_config_value(self.txn, key, value)
            .await
    }

    pub async fn enum_id(&self, class: &str, value: &str) -> Result<Option<EnumId>> {
        self.store.enum_id(self.txn, class, value).await
    }

    pub async fn insert_enum(&self, class: &str, value: &str) -> Result<EnumId> {
        self.store.insert_enum(self.txn, class, value).await
    }
}

/// Bare transactional session handed to [`SqlWork::run`]
///
/// Carries the configuration surface of [`Session`] but no identity.
///
/// [`SqlWork::run`]: crate::core::SqlWork::run
pub struct StoreSession {
    store: Arc<dyn Store>,
    txn: TxnId,
    mode: TxnMode,
}

impl StoreSession {
    pub(crate) fn new(store: Arc<dyn Store>, txn: TxnId, mode: TxnMode) -> Self {
        Self { store, txn, mode }
    }

    pub fn txn(&self) -> TxnId {
        self.txn
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub async fn config_value(&self, key: &str) -> Result<Option<String>> {
        self.store.config_value(self.txn, key).await
    }

    pub async fn update_or_insert_config_value(&self, key: &str, value: &str) -> Result<()> {
        self.store
            .update_or_insert_config_value(self.txn, key, value)
            .await
    }
}
