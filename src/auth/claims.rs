use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Purpose tag carried by every token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    EmailVerification,
}

/// JWT payload shared by all token kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,     // user email
    pub iat: u64,        // issued at (unix timestamp)
    pub exp: u64,        // expires at (unix timestamp)
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
    pub jti: Uuid,
}
