//! Session identity and the auth-driven connection lifecycle.
//!
//! [`SessionGate`] binds the connection to the authentication state: it
//! connects when the session becomes authenticated, disconnects when it
//! ends, and reconnects under the new identity when the user changes.

use std::fmt;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::LiveSyncClient;
use crate::error::Result;

/// Who the connection is opened for.
///
/// Only used as connect-time handshake metadata. The credential is redacted
/// from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    user_id: String,
    credential: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            credential: credential.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Bearer credential presented during the handshake.
    pub fn credential(&self) -> &str {
        &self.credential
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Authentication state as reported by the host application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub authenticated: bool,
    pub user: Option<Identity>,
}

impl AuthState {
    pub fn signed_in(identity: Identity) -> Self {
        Self {
            authenticated: true,
            user: Some(identity),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    /// The identity to connect as, if the session is authenticated with a known user.
    pub fn identity(&self) -> Option<&Identity> {
        if self.authenticated {
            self.user.as_ref()
        } else {
            None
        }
    }
}

/// Starts and stops a [`LiveSyncClient`] as authentication changes.
///
/// # Example
///
/// ```rust,ignore
/// let (auth_tx, auth_rx) = watch::channel(AuthState::signed_out());
/// let gate = SessionGate::new(client.clone()).spawn(auth_rx);
///
/// auth_tx.send_replace(AuthState::signed_in(Identity::new("user-7", token)));
/// // ... later
/// auth_tx.send_replace(AuthState::signed_out());
/// ```
#[derive(Debug)]
pub struct SessionGate {
    client: LiveSyncClient,
    active: Option<Identity>,
}

impl SessionGate {
    pub fn new(client: LiveSyncClient) -> Self {
        Self {
            client,
            active: None,
        }
    }

    /// Identity the gate last connected as, if any.
    pub fn active_identity(&self) -> Option<&Identity> {
        self.active.as_ref()
    }

    /// React to one observation of the auth state.
    ///
    /// Repeating an observation is a no-op. A changed identity disconnects
    /// the old session before connecting the new one.
    ///
    /// # Errors
    ///
    /// Returns [`LiveSyncError::ClientClosed`](crate::LiveSyncError::ClientClosed)
    /// if the client has been shut down.
    pub fn observe(&mut self, auth: &AuthState) -> Result<()> {
        let next = auth.identity().cloned();
        if next == self.active {
            return Ok(());
        }

        if let Some(previous) = self.active.take() {
            info!(user = %previous.user_id(), "session ended, stopping live connection");
            self.client.disconnect();
        }

        match next {
            Some(identity) => {
                info!(user = %identity.user_id(), "session authenticated, starting live connection");
                self.active = Some(identity.clone());
                self.client.connect(identity)
            }
            None => Ok(()),
        }
    }

    /// Follow `auth` until its sender is dropped, then disconnect.
    ///
    /// # Errors
    ///
    /// Stops early with [`LiveSyncError::ClientClosed`](crate::LiveSyncError::ClientClosed)
    /// if the client has been shut down.
    pub async fn run(mut self, mut auth: watch::Receiver<AuthState>) -> Result<()> {
        let current = auth.borrow_and_update().clone();
        self.observe(&current)?;

        while auth.changed().await.is_ok() {
            let current = auth.borrow_and_update().clone();
            self.observe(&current)?;
        }

        debug!("auth state sender dropped, stopping live connection");
        if self.active.take().is_some() {
            self.client.disconnect();
        }
        Ok(())
    }

    /// Run the gate on a new task. Must be called from within a Tokio runtime.
    pub fn spawn(self, auth: watch::Receiver<AuthState>) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(auth))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_credential() {
        let identity = Identity::new("user-1", "secret-token");
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("user-1"));
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn identity_requires_authenticated_flag() {
        let user = Identity::new("u", "t");
        let half = AuthState {
            authenticated: false,
            user: Some(user.clone()),
        };
        assert_eq!(half.identity(), None);

        let missing_user = AuthState {
            authenticated: true,
            user: None,
        };
        assert_eq!(missing_user.identity(), None);

        assert_eq!(AuthState::signed_in(user.clone()).identity(), Some(&user));
    }
}
