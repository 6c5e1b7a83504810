use crate::domain::models::Session;
use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

pub trait SessionStore: Send + Sync {
    fn save_session(&self, session: &Session) -> Result<(), InfraError>;
    fn load_session(&self) -> Result<Option<Session>, InfraError>;
    fn delete_session(&self) -> Result<(), InfraError>;
}

/// Persists the signed-in session in the OS credential vault.
#[derive(Debug, Clone)]
pub struct KeyringSessionStore {
    service_name: String,
    account_name: String,
}

impl KeyringSessionStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new("productivity-hub.auth.session", "default")
    }
}

impl SessionStore for KeyringSessionStore {
    fn save_session(&self, session: &Session) -> Result<(), InfraError> {
        let payload = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_session(&self) -> Result<Option<Session>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let session = serde_json::from_str::<Session>(&payload)
            .map_err(|error| InfraError::Credential(format!("stored session is unreadable: {error}")))?;
        Ok(Some(session))
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl InMemorySessionStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Session>>, InfraError> {
        self.session
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))
    }
}

impl SessionStore for InMemorySessionStore {
    fn save_session(&self, session: &Session) -> Result<(), InfraError> {
        *self.lock()? = Some(session.clone());
        Ok(())
    }

    fn load_session(&self) -> Result<Option<Session>, InfraError> {
        Ok(self.lock()?.clone())
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        *self.lock()? = None;
        Ok(())
    }
}
