//! Invitation token service: single-use, restaurant-scoped, time-limited
//! tokens that carry the role the invitee will receive.
//!
//! `resolve` does not consume a token; the registration flow re-validates it
//! at commit time and calls `revoke` itself once the user record exists, so
//! a partial failure never burns a token.

use anyhow::{anyhow, Result};
use log::warn;
use rand::{distributions::Alphanumeric, Rng};

use crate::auth::Role;
use crate::kv::ExpiringStore;

/// Default invitation lifetime: 15 minutes
pub const INVITE_TTL_SECONDS: i64 = 900;

/// 22 alphanumeric characters carry just over 128 bits of entropy
const TOKEN_LEN: usize = 22;

const KEY_PREFIX: &str = "invite:";

/// What an invitation token grants on redemption
#[derive(Debug, Clone, PartialEq)]
pub struct Invite {
    pub restaurant_id: i64,
    pub role: Role,
}

pub struct InviteTokenService {
    store: ExpiringStore,
}

impl InviteTokenService {
    pub fn new(store: ExpiringStore) -> Self {
        Self { store }
    }

    /// Generate a fresh URL-safe token
    pub fn generate_token() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect()
    }

    /// Issue a token granting `role` in `restaurant_id`, valid for
    /// `ttl_seconds`. Returns the opaque token string.
    pub async fn issue(&self, restaurant_id: i64, role: Role, ttl_seconds: i64) -> Result<String> {
        if role == Role::Superadmin {
            return Err(anyhow!("superadmin accounts are provisioned manually, not invited"));
        }

        let token = Self::generate_token();
        let payload = format!("{}:{}", role.as_str(), restaurant_id);
        self.store
            .set(&format!("{KEY_PREFIX}{token}"), &payload, ttl_seconds)
            .await?;

        Ok(token)
    }

    /// Look a token up without consuming it. Returns `None` for tokens that
    /// were never issued, already revoked, or expired; the caller cannot tell
    /// which.
    pub async fn resolve(&self, token: &str) -> Result<Option<Invite>> {
        let Some(payload) = self.store.get(&format!("{KEY_PREFIX}{token}")).await? else {
            return Ok(None);
        };

        match parse_payload(&payload) {
            Some(invite) => Ok(Some(invite)),
            None => {
                warn!("Discarding invite token with malformed payload");
                Ok(None)
            }
        }
    }

    /// Retire a token immediately. Idempotent.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        self.store.delete(&format!("{KEY_PREFIX}{token}")).await
    }
}

fn parse_payload(payload: &str) -> Option<Invite> {
    let (role_str, restaurant_str) = payload.split_once(':')?;
    let role = role_str.parse().ok()?;
    let restaurant_id = restaurant_str.parse().ok()?;
    Some(Invite { restaurant_id, role })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_database_schema, Db};
    use rusqlite::Connection;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn setup_service() -> Result<(InviteTokenService, NamedTempFile)> {
        let temp_file = NamedTempFile::new()?;
        let conn = Connection::open(temp_file.path())?;
        init_database_schema(&conn)?;
        let db: Db = Arc::new(tokio::sync::Mutex::new(conn));
        Ok((InviteTokenService::new(ExpiringStore::new(db)), temp_file))
    }

    #[test]
    fn test_token_shape() {
        let token = InviteTokenService::generate_token();
        assert_eq!(token.len(), 22);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));

        // Fresh generation, overwhelmingly unlikely to collide
        assert_ne!(token, InviteTokenService::generate_token());
    }

    #[tokio::test]
    async fn test_issue_and_resolve() -> Result<()> {
        let (service, _temp_file) = setup_service()?;

        let token = service.issue(7, Role::Waiter, INVITE_TTL_SECONDS).await?;
        let invite = service.resolve(&token).await?.unwrap();
        assert_eq!(invite.restaurant_id, 7);
        assert_eq!(invite.role, Role::Waiter);

        // Resolve does not consume
        assert!(service.resolve(&token).await?.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_unknown_token() -> Result<()> {
        let (service, _temp_file) = setup_service()?;
        assert!(service.resolve("not-a-real-token").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_revoked_token_stays_absent() -> Result<()> {
        let (service, _temp_file) = setup_service()?;

        let token = service.issue(7, Role::Admin, INVITE_TTL_SECONDS).await?;
        service.revoke(&token).await?;

        assert!(service.resolve(&token).await?.is_none());
        assert!(service.resolve(&token).await?.is_none());

        // Revoking again is a no-op
        service.revoke(&token).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_expired_token_resolves_to_none() -> Result<()> {
        let (service, _temp_file) = setup_service()?;

        let token = service.issue(7, Role::Waiter, 0).await?;
        assert!(service.resolve(&token).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_superadmin_invites_are_rejected() -> Result<()> {
        let (service, _temp_file) = setup_service()?;
        assert!(service.issue(7, Role::Superadmin, INVITE_TTL_SECONDS).await.is_err());
        Ok(())
    }

    #[test]
    fn test_malformed_payload_is_invalid() {
        assert!(parse_payload("waiter").is_none());
        assert!(parse_payload("owner:7").is_none());
        assert!(parse_payload("waiter:notanumber").is_none());
        assert!(parse_payload("admin:7").is_some());
    }
}
