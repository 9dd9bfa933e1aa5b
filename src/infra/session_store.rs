use crate::domain::Session;
use crate::error::{KarcherError, Result};
use crate::infra::signer::random_alphanumeric;
use parking_lot::{Mutex, MutexGuard, RwLock};

const REGISTER_ID_LEN: usize = 19;

/// Holds the current session. Readers always see a whole session; writers go through
/// [`SessionStore::begin_transition`] so login and logout never interleave.
#[derive(Debug, Default)]
pub struct SessionStore {
    session: RwLock<Session>,
    transition: Mutex<()>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Session {
        self.session.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_authenticated()
    }

    pub fn require_authenticated(&self) -> Result<Session> {
        let session = self.snapshot();
        if !session.is_authenticated() {
            return Err(KarcherError::NotAuthorized);
        }
        Ok(session)
    }

    pub fn require_broker_credentials(&self) -> Result<Session> {
        let session = self.snapshot();
        if !session.has_broker_credentials() {
            return Err(KarcherError::NotAuthorized);
        }
        Ok(session)
    }

    /// Serializes state transitions; hold the guard across the network call that decides them.
    pub fn begin_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock()
    }

    pub fn replace(&self, session: Session) {
        *self.session.write() = session;
    }

    pub fn clear(&self) -> Session {
        std::mem::take(&mut *self.session.write())
    }

    pub fn import_token(
        &self,
        auth_token: &str,
        mqtt_token: &str,
        register_id: Option<&str>,
    ) -> Result<Session> {
        let register_id = resolve_register_id(register_id);
        let session = Session::from_token(auth_token, mqtt_token, &register_id)?;
        let _guard = self.begin_transition();
        self.replace(session.clone());
        tracing::info!(user_id = %session.user_id, "session imported from tokens");
        Ok(session)
    }
}

pub fn resolve_register_id(register_id: Option<&str>) -> String {
    match register_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => random_alphanumeric(REGISTER_ID_LEN),
    }
}
