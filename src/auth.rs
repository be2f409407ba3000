//! Credential provider contract. The identity flow itself lives outside this
//! crate; the core only asks for the current session, if any.

use crate::model::OwnerInfo;
use async_trait::async_trait;
use std::fmt;

/// A bearer credential plus the identity it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub bearer: String,
    pub owner: OwnerInfo,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("bearer", &"[REDACTED]")
            .field("owner", &self.owner)
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `None` means unauthenticated; network work is skipped, not attempted.
    async fn session(&self) -> Option<Session>;
}

/// Fixed credentials, typically from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    session: Option<Session>,
}

impl StaticCredentials {
    pub fn new(session: Option<Session>) -> Self {
        Self { session }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn session(&self) -> Option<Session> {
        self.session.clone()
    }
}
