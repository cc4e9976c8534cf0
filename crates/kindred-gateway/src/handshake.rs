use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// External authority that issued the connection token.
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// True if `token` is valid and was issued to `user_id`.
    async fn verify(&self, token: &str, user_id: Uuid) -> bool;

    /// Decode the token into the identity it was issued to.
    async fn resolve_user_id(&self, token: &str) -> anyhow::Result<Uuid>;
}

/// Lookup of known accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// True if the user exists and is allowed to connect.
    async fn exists(&self, user_id: Uuid) -> anyhow::Result<bool>;
}

/// Query parameters of the upgrade request. Browser clients cannot set
/// custom headers on a WebSocket upgrade, so credentials travel here.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HandshakeParams {
    pub token: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

/// Why a handshake was refused. Only logged; the client sees a bare 401.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("missing token")]
    MissingToken,

    #[error("token rejected by authority")]
    InvalidToken,

    #[error("claimed identity does not match token")]
    IdentityMismatch,

    #[error("user unknown or disabled")]
    UnknownUser,

    #[error("handshake timed out")]
    Timeout,

    #[error("user directory unavailable: {0}")]
    Directory(anyhow::Error),
}

/// Admits a connection only when the token resolves to an active user.
///
/// The identity is always the token-derived one. A `userId` parameter is
/// accepted as a cross-check and refused if it disagrees with the token; it
/// is never used in place of it.
#[derive(Clone)]
pub struct HandshakeAuthenticator {
    tokens: Arc<dyn TokenAuthority>,
    directory: Arc<dyn UserDirectory>,
    timeout: Duration,
}

impl HandshakeAuthenticator {
    pub fn new(
        tokens: Arc<dyn TokenAuthority>,
        directory: Arc<dyn UserDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            tokens,
            directory,
            timeout,
        }
    }

    pub async fn validate(
        &self,
        params: &HandshakeParams,
    ) -> Result<AuthenticatedUser, HandshakeError> {
        let result = tokio::time::timeout(self.timeout, self.check(params))
            .await
            .unwrap_or(Err(HandshakeError::Timeout));

        match &result {
            Ok(user) => debug!(user_id = %user.user_id, "Handshake accepted"),
            Err(e) => warn!("Handshake refused: {}", e),
        }
        result
    }

    async fn check(&self, params: &HandshakeParams) -> Result<AuthenticatedUser, HandshakeError> {
        let token = params
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(HandshakeError::MissingToken)?;

        let user_id = self
            .tokens
            .resolve_user_id(token)
            .await
            .map_err(|_| HandshakeError::InvalidToken)?;

        if let Some(claimed) = params.user_id.as_deref().filter(|c| !c.is_empty()) {
            let claimed: Uuid = claimed
                .parse()
                .map_err(|_| HandshakeError::IdentityMismatch)?;
            if claimed != user_id || !self.tokens.verify(token, claimed).await {
                return Err(HandshakeError::IdentityMismatch);
            }
        }

        match self.directory.exists(user_id).await {
            Ok(true) => Ok(AuthenticatedUser { user_id }),
            Ok(false) => Err(HandshakeError::UnknownUser),
            Err(e) => Err(HandshakeError::Directory(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;

    struct StaticTokens(HashMap<String, Uuid>);

    #[async_trait]
    impl TokenAuthority for StaticTokens {
        async fn verify(&self, token: &str, user_id: Uuid) -> bool {
            self.0.get(token) == Some(&user_id)
        }

        async fn resolve_user_id(&self, token: &str) -> anyhow::Result<Uuid> {
            self.0
                .get(token)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("unknown token"))
        }
    }

    struct StaticDirectory(HashSet<Uuid>);

    #[async_trait]
    impl UserDirectory for StaticDirectory {
        async fn exists(&self, user_id: Uuid) -> anyhow::Result<bool> {
            Ok(self.0.contains(&user_id))
        }
    }

    struct SlowDirectory;

    #[async_trait]
    impl UserDirectory for SlowDirectory {
        async fn exists(&self, _user_id: Uuid) -> anyhow::Result<bool> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }
    }

    fn params(token: Option<&str>, user_id: Option<String>) -> HandshakeParams {
        HandshakeParams {
            token: token.map(str::to_string),
            user_id,
        }
    }

    fn authenticator(
        user: Uuid,
        directory: Arc<dyn UserDirectory>,
        timeout: Duration,
    ) -> HandshakeAuthenticator {
        let tokens = StaticTokens(HashMap::from([("good".to_string(), user)]));
        HandshakeAuthenticator::new(Arc::new(tokens), directory, timeout)
    }

    #[tokio::test]
    async fn valid_token_is_admitted() {
        let user = Uuid::new_v4();
        let auth = authenticator(
            user,
            Arc::new(StaticDirectory(HashSet::from([user]))),
            Duration::from_secs(1),
        );

        let admitted = auth.validate(&params(Some("good"), None)).await.unwrap();
        assert_eq!(admitted.user_id, user);

        let cross_checked = auth
            .validate(&params(Some("good"), Some(user.to_string())))
            .await
            .unwrap();
        assert_eq!(cross_checked.user_id, user);
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_refused() {
        let user = Uuid::new_v4();
        let auth = authenticator(
            user,
            Arc::new(StaticDirectory(HashSet::from([user]))),
            Duration::from_secs(1),
        );

        assert!(matches!(
            auth.validate(&params(None, Some(user.to_string()))).await,
            Err(HandshakeError::MissingToken)
        ));
        // A claimed id alone never stands in for a token.
        assert!(matches!(
            auth.validate(&params(Some("forged"), Some(user.to_string()))).await,
            Err(HandshakeError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn mismatched_claim_is_refused() {
        let user = Uuid::new_v4();
        let auth = authenticator(
            user,
            Arc::new(StaticDirectory(HashSet::from([user]))),
            Duration::from_secs(1),
        );

        let other = Uuid::new_v4().to_string();
        assert!(matches!(
            auth.validate(&params(Some("good"), Some(other))).await,
            Err(HandshakeError::IdentityMismatch)
        ));
        assert!(matches!(
            auth.validate(&params(Some("good"), Some("42".into()))).await,
            Err(HandshakeError::IdentityMismatch)
        ));
    }

    #[tokio::test]
    async fn unknown_user_is_refused() {
        let user = Uuid::new_v4();
        let auth = authenticator(
            user,
            Arc::new(StaticDirectory(HashSet::new())),
            Duration::from_secs(1),
        );
        assert!(matches!(
            auth.validate(&params(Some("good"), None)).await,
            Err(HandshakeError::UnknownUser)
        ));
    }

    #[tokio::test]
    async fn slow_directory_times_out() {
        let user = Uuid::new_v4();
        let auth = authenticator(user, Arc::new(SlowDirectory), Duration::from_millis(50));
        assert!(matches!(
            auth.validate(&params(Some("good"), None)).await,
            Err(HandshakeError::Timeout)
        ));
    }
}
