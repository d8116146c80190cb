use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::BidderId;

/// Role attached to an authenticated caller. Dealers control auction
/// lifecycles; bidders place bids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Dealer,
    Bidder,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dealer => "dealer",
            Role::Bidder => "bidder",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved identity of an inbound request. The engine trusts this
/// result as given and does not re-validate credential format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: BidderId,
    pub role: Role,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("could not validate credentials")]
    InvalidToken,

    #[error("insufficient permissions: {role} role required")]
    Forbidden { role: Role },
}

/// Resolves an inbound credential to an authenticated caller.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError>;
}

/// Requires the caller to hold the given role.
pub fn require_role(caller: &Caller, role: Role) -> Result<(), AuthError> {
    if caller.role == role {
        Ok(())
    } else {
        Err(AuthError::Forbidden { role })
    }
}

/// A static token-to-identity map. Stands in for the marketplace's identity
/// service in local runs and tests.
#[derive(Default)]
pub struct TokenDirectory {
    tokens: HashMap<String, Caller>,
}

impl TokenDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, caller: Caller) {
        self.tokens.insert(token.into(), caller);
    }

    /// Parses a comma-separated list of `token:user_id:role` entries, e.g.
    /// `"d-1:1:dealer,b-7:7:bidder"`.
    pub fn from_spec(spec: &str) -> Result<Self, String> {
        let mut directory = TokenDirectory::new();
        for entry in spec.split(',').filter(|e| !e.trim().is_empty()) {
            let mut parts = entry.trim().splitn(3, ':');
            let token = parts
                .next()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| format!("missing token in entry {entry:?}"))?;
            let user_id = parts
                .next()
                .and_then(|id| id.parse::<BidderId>().ok())
                .ok_or_else(|| format!("invalid user id in entry {entry:?}"))?;
            let role = match parts.next() {
                Some("dealer") => Role::Dealer,
                Some("bidder") => Role::Bidder,
                _ => return Err(format!("invalid role in entry {entry:?}")),
            };
            directory.insert(token, Caller { user_id, role });
        }
        Ok(directory)
    }
}

#[async_trait]
impl IdentityProvider for TokenDirectory {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens.get(token).copied().ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_directory_resolves_known_tokens() {
        let directory = TokenDirectory::from_spec("d-1:1:dealer,b-7:7:bidder").unwrap();

        let dealer = directory.authenticate("d-1").await.unwrap();
        assert_eq!(dealer.user_id, 1);
        assert_eq!(dealer.role, Role::Dealer);

        let bidder = directory.authenticate("b-7").await.unwrap();
        assert_eq!(bidder.user_id, 7);
        assert_eq!(bidder.role, Role::Bidder);
    }

    #[tokio::test]
    async fn unknown_and_empty_tokens_are_rejected() {
        let directory = TokenDirectory::from_spec("d-1:1:dealer").unwrap();

        assert!(matches!(
            directory.authenticate("nope").await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            directory.authenticate("").await,
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn malformed_directory_specs_are_rejected() {
        assert!(TokenDirectory::from_spec("d-1:1:admiral").is_err());
        assert!(TokenDirectory::from_spec("d-1:one:dealer").is_err());
    }

    #[test]
    fn role_check() {
        let caller = Caller {
            user_id: 3,
            role: Role::Bidder,
        };
        assert!(require_role(&caller, Role::Bidder).is_ok());
        assert!(matches!(
            require_role(&caller, Role::Dealer),
            Err(AuthError::Forbidden { role: Role::Dealer })
        ));
    }
}
