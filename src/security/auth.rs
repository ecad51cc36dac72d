// # Tool Authorization
//
// In-memory grant store for tools marked `requires_auth`. A grant binds a
// user to a tool with an access token, an optional refresh token, and an
// expiry. Expired grants with a refresh token get exactly one refresh
// attempt per validation; everything else fails hard.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::{FactError, Result};

/// One live authorization grant.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub user_id: String,
    pub tool_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub granted_at: DateTime<Utc>,
}

impl Authorization {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Grant store keyed by `(user_id, tool_name)`.
pub struct AuthorizationManager {
    grants: DashMap<(String, String), Authorization>,
}

impl Default for AuthorizationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorizationManager {
    pub fn new() -> Self {
        Self {
            grants: DashMap::new(),
        }
    }

    /// Install or replace a grant.
    pub fn grant(&self, authorization: Authorization) {
        let key = (
            authorization.user_id.clone(),
            authorization.tool_name.clone(),
        );
        tracing::info!(
            user_id = %authorization.user_id,
            tool_name = %authorization.tool_name,
            "authorization granted"
        );
        self.grants.insert(key, authorization);
    }

    /// Convenience constructor for a grant valid for `ttl_seconds`.
    pub fn grant_for(
        &self,
        user_id: &str,
        tool_name: &str,
        access_token: &str,
        ttl_seconds: i64,
    ) {
        self.grant(Authorization {
            user_id: user_id.to_string(),
            tool_name: tool_name.to_string(),
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() + Duration::seconds(ttl_seconds)),
            scopes: Vec::new(),
            granted_at: Utc::now(),
        });
    }

    /// Validate that `user_id` may run `tool_name`.
    ///
    /// An expired grant with a refresh token is refreshed in place once;
    /// an expired grant without one is removed and rejected.
    pub fn validate_authorization(&self, user_id: &str, tool_name: &str) -> Result<()> {
        let key = (user_id.to_string(), tool_name.to_string());

        let Some(mut entry) = self.grants.get_mut(&key) else {
            return Err(FactError::Unauthorized(format!(
                "no active authorization for tool '{tool_name}'"
            )));
        };

        if !entry.is_expired() {
            return Ok(());
        }

        match entry.refresh_token.clone() {
            Some(refresh_token) => {
                let refreshed = self.refresh_authorization(&entry, &refresh_token)?;
                tracing::info!(user_id, tool_name, "authorization refreshed");
                *entry = refreshed;
                Ok(())
            }
            None => {
                drop(entry);
                self.grants.remove(&key);
                Err(FactError::Unauthorized(format!(
                    "authorization for tool '{tool_name}' expired"
                )))
            }
        }
    }

    pub fn revoke(&self, user_id: &str, tool_name: &str) -> bool {
        let key = (user_id.to_string(), tool_name.to_string());
        let removed = self.grants.remove(&key).is_some();
        if removed {
            tracing::info!(user_id, tool_name, "authorization revoked");
        }
        removed
    }

    /// Drop every expired grant that cannot be refreshed. Returns the
    /// number removed.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.grants.len();
        self.grants
            .retain(|_, auth| !auth.is_expired() || auth.refresh_token.is_some());
        before - self.grants.len()
    }

    pub fn active_grants(&self, user_id: &str) -> Vec<Authorization> {
        self.grants
            .iter()
            .filter(|entry| entry.user_id == user_id && !entry.is_expired())
            .map(|entry| entry.clone())
            .collect()
    }

    // Production would exchange the refresh token with the identity
    // provider; the engine only models the rotation.
    fn refresh_authorization(
        &self,
        authorization: &Authorization,
        refresh_token: &str,
    ) -> Result<Authorization> {
        if refresh_token.is_empty() {
            return Err(FactError::Unauthorized(
                "authorization expired and refresh failed".to_string(),
            ));
        }

        Ok(Authorization {
            access_token: format!("refreshed_{}", authorization.access_token),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            granted_at: Utc::now(),
            ..authorization.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired_grant(refresh_token: Option<&str>) -> Authorization {
        Authorization {
            user_id: "alice".into(),
            tool_name: "SQL_QueryReadonly".into(),
            access_token: "tok".into(),
            refresh_token: refresh_token.map(String::from),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            scopes: vec!["read".into()],
            granted_at: Utc::now() - Duration::hours(2),
        }
    }

    #[test]
    fn test_missing_grant_is_unauthorized() {
        let manager = AuthorizationManager::new();
        let err = manager
            .validate_authorization("alice", "SQL_QueryReadonly")
            .unwrap_err();
        assert!(matches!(err, FactError::Unauthorized(_)));
    }

    #[test]
    fn test_live_grant_passes() {
        let manager = AuthorizationManager::new();
        manager.grant_for("alice", "SQL_QueryReadonly", "tok", 3_600);
        manager
            .validate_authorization("alice", "SQL_QueryReadonly")
            .unwrap();
    }

    #[test]
    fn test_expired_grant_without_refresh_fails_and_is_removed() {
        let manager = AuthorizationManager::new();
        manager.grant(expired_grant(None));

        assert!(manager
            .validate_authorization("alice", "SQL_QueryReadonly")
            .is_err());
        // Removed on rejection: the second failure is a missing grant.
        assert!(manager.active_grants("alice").is_empty());
    }

    #[test]
    fn test_expired_grant_with_refresh_token_refreshes_once() {
        let manager = AuthorizationManager::new();
        manager.grant(expired_grant(Some("refresh")));

        manager
            .validate_authorization("alice", "SQL_QueryReadonly")
            .unwrap();

        let grants = manager.active_grants("alice");
        assert_eq!(grants.len(), 1);
        assert!(grants[0].access_token.starts_with("refreshed_"));
        assert!(!grants[0].is_expired());
    }

    #[test]
    fn test_revoke_and_cleanup() {
        let manager = AuthorizationManager::new();
        manager.grant_for("alice", "SQL_QueryReadonly", "tok", 3_600);
        manager.grant(expired_grant(None));

        assert!(manager.revoke("alice", "SQL_QueryReadonly"));
        assert!(!manager.revoke("alice", "SQL_QueryReadonly"));

        manager.grant(expired_grant(None));
        assert_eq!(manager.cleanup_expired(), 1);
    }
}
