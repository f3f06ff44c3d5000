//! Authentication policy and the token-validation seam.
//!
//! Token validation itself belongs to an external identity service; the
//! server only sees it through [`TokenValidator`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// How much authentication a method demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthRequirement {
    #[default]
    None,
    Optional,
    Required,
}

impl AuthRequirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Optional => "optional",
            Self::Required => "required",
        }
    }
}

impl fmt::Display for AuthRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthRequirement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "optional" => Ok(Self::Optional),
            "required" => Ok(Self::Required),
            other => Err(format!("unknown authentication requirement: {other}")),
        }
    }
}

/// Who a validated token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

/// Validates bearer tokens against an identity service.
pub trait TokenValidator: Send + Sync {
    fn validate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Identity, AuthError>> + Send;
}
