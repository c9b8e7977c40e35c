//! Authentication for WebSocket upgrades

use log::debug;
use serde::Deserialize;

use crate::auth::provider::Auth;
use crate::auth::token::extract_bearer_token;
use crate::auth::user::User;
use crate::error::{Result, RustyRoomsError};

const MAX_TOKEN_LEN: usize = 1000;
const MAX_NAME_LEN: usize = 50;

/// Query parameters accepted on the upgrade request
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UpgradeQuery {
    pub bearer: Option<String>,
    pub name: Option<String>,
}

/// Authorization header first, then the `bearer` query parameter
pub fn extract_token(auth_header: Option<&str>, query: &UpgradeQuery) -> Option<String> {
    if let Some(token) = auth_header.and_then(extract_bearer_token) {
        debug!("Token extracted from Authorization header");
        return Some(token);
    }

    query
        .bearer
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Resolve the identity of an upgrade request.
///
/// A token, when present, must be valid (`Forbidden` otherwise). Without a
/// token the `name` parameter yields an anonymous identity if anonymous
/// access is allowed; with neither the request is `Unauthorized`.
pub fn resolve_identity(
    auth_header: Option<&str>,
    query: &UpgradeQuery,
    auth: &dyn Auth,
    allow_anonymous: bool,
) -> Result<User> {
    if let Some(token) = extract_token(auth_header, query) {
        if token.len() > MAX_TOKEN_LEN || token.chars().any(|c| c.is_control()) {
            return Err(RustyRoomsError::Forbidden);
        }

        return auth.validate_token(&token).map_err(|e| {
            debug!("Rejected upgrade token: {}", e);
            RustyRoomsError::Forbidden
        });
    }

    let name = query
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    match name {
        Some(name) if allow_anonymous => {
            if name.chars().count() > MAX_NAME_LEN || name.chars().any(|c| c.is_control()) {
                return Err(RustyRoomsError::ValidationError(
                    "Invalid display name".to_string(),
                ));
            }
            Ok(auth.new_anonymous_user(name))
        }
        _ => Err(RustyRoomsError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{JwtAuth, PasswordPolicy, TokenManager};

    fn auth() -> JwtAuth {
        JwtAuth::new(
            TokenManager::new("handler-tests-2d6e8a1b-93c4-4f70"),
            PasswordPolicy::fast(),
        )
    }

    fn query(bearer: Option<&str>, name: Option<&str>) -> UpgradeQuery {
        UpgradeQuery {
            bearer: bearer.map(str::to_string),
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn test_header_token_wins_over_query() {
        let q = query(Some("from-query"), None);
        assert_eq!(
            extract_token(Some("Bearer from-header"), &q),
            Some("from-header".to_string())
        );
        assert_eq!(extract_token(None, &q), Some("from-query".to_string()));
        assert_eq!(extract_token(None, &query(Some("  "), None)), None);
    }

    #[test]
    fn test_valid_token_resolves_authenticated_user() {
        let auth = auth();
        let user = User::authenticated("7".to_string(), "alice".to_string());
        let token = auth.create_token(&user).unwrap();

        let header = format!("Bearer {}", token);
        let resolved =
            resolve_identity(Some(&header), &UpgradeQuery::default(), &auth, false).unwrap();
        assert_eq!(resolved, user);
    }

    #[test]
    fn test_invalid_token_is_forbidden_even_with_name() {
        let result = resolve_identity(None, &query(Some("garbage"), Some("bob")), &auth(), true);
        assert!(matches!(result, Err(RustyRoomsError::Forbidden)));
    }

    #[test]
    fn test_anonymous_fallback() {
        let user = resolve_identity(None, &query(None, Some("bob")), &auth(), true).unwrap();
        assert!(user.is_anonymous());
        assert_eq!(user.name, "bob");
    }

    #[test]
    fn test_missing_credentials_unauthorized() {
        let none = resolve_identity(None, &UpgradeQuery::default(), &auth(), true);
        assert!(matches!(none, Err(RustyRoomsError::Unauthorized)));

        let disabled = resolve_identity(None, &query(None, Some("bob")), &auth(), false);
        assert!(matches!(disabled, Err(RustyRoomsError::Unauthorized)));
    }
}
