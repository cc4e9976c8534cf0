use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use kindred_db::Database;
use kindred_gateway::{TokenAuthority, UserDirectory};
use kindred_types::api::Claims;

/// Issues and checks the HS256 tokens used by both REST and the gateway.
#[derive(Clone)]
pub struct JwtAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: chrono::Duration,
}

impl JwtAuthority {
    pub fn new(secret: &str, ttl_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: chrono::Duration::days(ttl_days),
        }
    }

    pub fn issue(&self, user_id: Uuid, username: &str) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            exp: (chrono::Utc::now() + self.ttl).timestamp() as usize,
        };

        let token = encode(&Header::default(), &claims, &self.encoding)?;
        Ok(token)
    }

    pub fn decode(&self, token: &str) -> anyhow::Result<Claims> {
        let token_data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(token_data.claims)
    }
}

#[async_trait]
impl TokenAuthority for JwtAuthority {
    async fn verify(&self, token: &str, user_id: Uuid) -> bool {
        self.decode(token).is_ok_and(|claims| claims.sub == user_id)
    }

    async fn resolve_user_id(&self, token: &str) -> anyhow::Result<Uuid> {
        Ok(self.decode(token)?.sub)
    }
}

/// Account lookup against the users table.
#[derive(Clone)]
pub struct DbDirectory {
    db: Arc<Database>,
}

impl DbDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for DbDirectory {
    async fn exists(&self, user_id: Uuid) -> anyhow::Result<bool> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.is_active_user(user_id)).await?
    }
}
