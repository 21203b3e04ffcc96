//! Authorization resolver: maps a Telegram identity to a role-bearing user
//! record and gates every role-sensitive operation through one check.

use anyhow::Result;
use rusqlite::Connection;

use crate::db::{self, User};

/// Closed set of staff roles. Role is fixed at user creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Role {
    Waiter,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Waiter => "waiter",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognized role strings coming from storage
#[derive(Debug)]
pub struct ParseRoleError(pub String);

impl std::fmt::Display for ParseRoleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown role: {}", self.0)
    }
}

impl std::error::Error for ParseRoleError {}

impl std::str::FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiter" => Ok(Role::Waiter),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::Superadmin),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// Look up the caller's user record by Telegram id.
///
/// Called once per inbound interaction, before any handler runs. The role is
/// evaluated fresh every time; nothing is cached across interactions.
pub fn resolve_caller(conn: &Connection, tg_id: &str) -> Result<Option<User>> {
    db::get_user_by_tg_id(conn, tg_id)
}

/// True iff the caller exists and its role is in the required set.
///
/// Every role-sensitive operation calls this before acting and short-circuits
/// with a user-visible "not authorized" reply on failure.
pub fn authorize(user: Option<&User>, required: &[Role]) -> bool {
    match user {
        Some(user) => required.contains(&user.role),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_user(role: Role, restaurant_id: Option<i64>) -> User {
        User {
            id: 1,
            first_name: "Ann".to_string(),
            last_name: "Lee".to_string(),
            tg_username: None,
            tg_id: "100".to_string(),
            role,
            restaurant_id,
        }
    }

    #[test]
    fn test_authorize_absent_user_always_fails() {
        assert!(!authorize(None, &[Role::Waiter]));
        assert!(!authorize(None, &[Role::Admin, Role::Superadmin]));
        assert!(!authorize(None, &[Role::Waiter, Role::Admin, Role::Superadmin]));
    }

    #[test]
    fn test_authorize_role_membership() {
        let waiter = make_user(Role::Waiter, Some(7));
        assert!(authorize(Some(&waiter), &[Role::Waiter]));
        assert!(!authorize(Some(&waiter), &[Role::Admin]));
        assert!(!authorize(Some(&waiter), &[Role::Admin, Role::Superadmin]));

        let admin = make_user(Role::Admin, Some(7));
        assert!(authorize(Some(&admin), &[Role::Admin, Role::Superadmin]));
        assert!(!authorize(Some(&admin), &[Role::Waiter]));
    }

    #[test]
    fn test_authorize_empty_role_set() {
        let admin = make_user(Role::Admin, Some(7));
        assert!(!authorize(Some(&admin), &[]));
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Waiter, Role::Admin, Role::Superadmin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("owner".parse::<Role>().is_err());
    }
}
