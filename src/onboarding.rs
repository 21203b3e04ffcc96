//! Final commit of the token-gated self-registration flow.
//!
//! The token was already resolved when the flow was entered; it is resolved
//! again here so a token that expired mid-dialogue is rejected instead of
//! silently honored. The existence check and the insert are one atomic
//! statement, so at most one user record can exist per caller even when two
//! commits race.

use anyhow::Result;
use tracing::info;

use crate::db::{self, Db, User};
use crate::invites::InviteTokenService;

/// Outcome of a registration commit
#[derive(Debug)]
pub enum RegistrationOutcome {
    /// User created and the token revoked
    Registered(User),
    /// Caller already has a record; nothing was created
    AlreadyRegistered,
    /// Token no longer resolves (expired or already redeemed)
    TokenInvalid,
}

/// Create the invited user and retire the token.
#[allow(clippy::too_many_arguments)]
pub async fn complete_registration(
    db: &Db,
    invites: &InviteTokenService,
    token: &str,
    tg_id: &str,
    tg_username: Option<&str>,
    first_name: &str,
    last_name: &str,
) -> Result<RegistrationOutcome> {
    let Some(invite) = invites.resolve(token).await? else {
        return Ok(RegistrationOutcome::TokenInvalid);
    };

    let created = {
        let conn = db.lock().await;
        db::create_user_if_absent(
            &conn,
            first_name,
            last_name,
            tg_username,
            tg_id,
            invite.role,
            Some(invite.restaurant_id),
        )?
    };

    match created {
        Some(user) => {
            // Revoke only after the record exists; a failure before this
            // point leaves the token redeemable for a retry
            invites.revoke(token).await?;
            info!(
                user_id = %tg_id,
                restaurant_id = invite.restaurant_id,
                role = %invite.role,
                "Registered staff member via invitation"
            );
            Ok(RegistrationOutcome::Registered(user))
        }
        None => Ok(RegistrationOutcome::AlreadyRegistered),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::init_database_schema;
    use crate::invites::INVITE_TTL_SECONDS;
    use crate::kv::ExpiringStore;
    use rusqlite::Connection;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn setup() -> Result<(Db, InviteTokenService, NamedTempFile)> {
        let temp_file = NamedTempFile::new()?;
        let conn = Connection::open(temp_file.path())?;
        init_database_schema(&conn)?;
        let db: Db = Arc::new(tokio::sync::Mutex::new(conn));
        let service = InviteTokenService::new(ExpiringStore::new(Arc::clone(&db)));
        Ok((db, service, temp_file))
    }

    #[tokio::test]
    async fn test_successful_registration_revokes_token() -> Result<()> {
        let (db, invites, _temp_file) = setup()?;
        let restaurant = {
            let conn = db.lock().await;
            db::create_restaurant(&conn, "North")?
        };
        let token = invites.issue(restaurant.id, Role::Waiter, INVITE_TTL_SECONDS).await?;

        let outcome =
            complete_registration(&db, &invites, &token, "100", Some("ann"), "Ann", "Lee").await?;
        let user = match outcome {
            RegistrationOutcome::Registered(user) => user,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(user.role, Role::Waiter);
        assert_eq!(user.restaurant_id, Some(restaurant.id));

        // Token is single-use
        assert!(invites.resolve(&token).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_registration_aborts() -> Result<()> {
        let (db, invites, _temp_file) = setup()?;
        let restaurant = {
            let conn = db.lock().await;
            db::create_restaurant(&conn, "North")?
        };

        let first = invites.issue(restaurant.id, Role::Waiter, INVITE_TTL_SECONDS).await?;
        complete_registration(&db, &invites, &first, "100", None, "Ann", "Lee").await?;

        let second = invites.issue(restaurant.id, Role::Waiter, INVITE_TTL_SECONDS).await?;
        let outcome =
            complete_registration(&db, &invites, &second, "100", None, "Other", "Name").await?;
        assert!(matches!(outcome, RegistrationOutcome::AlreadyRegistered));

        let conn = db.lock().await;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM users WHERE tg_id = '100'", [], |r| r.get(0))?;
        assert_eq!(count, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_expired_token_rejected_at_commit() -> Result<()> {
        let (db, invites, _temp_file) = setup()?;
        let restaurant = {
            let conn = db.lock().await;
            db::create_restaurant(&conn, "North")?
        };

        let token = invites.issue(restaurant.id, Role::Waiter, 0).await?;
        let outcome =
            complete_registration(&db, &invites, &token, "100", None, "Ann", "Lee").await?;
        assert!(matches!(outcome, RegistrationOutcome::TokenInvalid));

        let conn = db.lock().await;
        assert!(db::get_user_by_tg_id(&conn, "100")?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_commits_create_at_most_one_user() -> Result<()> {
        let (db, invites, _temp_file) = setup()?;
        let restaurant = {
            let conn = db.lock().await;
            db::create_restaurant(&conn, "North")?
        };
        let token = invites.issue(restaurant.id, Role::Waiter, INVITE_TTL_SECONDS).await?;

        let (a, b) = tokio::join!(
            complete_registration(&db, &invites, &token, "100", None, "Ann", "Lee"),
            complete_registration(&db, &invites, &token, "100", None, "Ann", "Lee"),
        );

        let registered = [a?, b?]
            .iter()
            .filter(|o| matches!(o, RegistrationOutcome::Registered(_)))
            .count();
        assert_eq!(registered, 1);

        let conn = db.lock().await;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM users WHERE tg_id = '100'", [], |r| r.get(0))?;
        assert_eq!(count, 1);

        Ok(())
    }
}
