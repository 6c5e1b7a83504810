/// Credentials a remote-backed store needs to scope its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteScope {
    pub owner_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Local,
    Remote(RemoteScope),
}

impl Backend {
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Same owner on both sides. Access tokens rotate on refresh and are
    /// not compared.
    pub fn same_owner(&self, other: &Backend) -> bool {
        match (self, other) {
            (Self::Local, Self::Local) => true,
            (Self::Remote(left), Self::Remote(right)) => left.owner_id == right.owner_id,
            _ => false,
        }
    }
}

/// Chooses the backend for every store operation. Implementations answer
/// from session presence only.
pub trait StoragePolicy: Send + Sync {
    fn backend(&self) -> Backend;
}

/// Used when no hosted backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOnlyPolicy;

impl StoragePolicy for LocalOnlyPolicy {
    fn backend(&self) -> Backend {
        Backend::Local
    }
}
