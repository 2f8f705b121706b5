//! Permission-scoped auth tokens.
//!
//! A full token is written `TYPE|secret`. The type decides what the token may do;
//! the secret only identifies the holder to the backend.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

pub const TOKEN_SEPARATOR: char = '|';

static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_]+)\|([A-Za-z0-9_-]{12,32})$").expect("auth token pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthTokenPermission {
    VerifyDiscord,
    GetClanRankUpdates,
}

impl AuthTokenPermission {
    pub const ALL: [AuthTokenPermission; 2] = [
        AuthTokenPermission::VerifyDiscord,
        AuthTokenPermission::GetClanRankUpdates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthTokenPermission::VerifyDiscord => "VERIFY_DISCORD",
            AuthTokenPermission::GetClanRankUpdates => "GET_CLAN_RANK_UPDATES",
        }
    }
}

impl fmt::Display for AuthTokenPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthTokenType {
    #[default]
    None,
    Dev,
    Mod,
    Discord,
    Clan,
}

impl AuthTokenType {
    pub const ALL: [AuthTokenType; 5] = [
        AuthTokenType::None,
        AuthTokenType::Dev,
        AuthTokenType::Mod,
        AuthTokenType::Discord,
        AuthTokenType::Clan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthTokenType::None => "NONE",
            AuthTokenType::Dev => "DEV",
            AuthTokenType::Mod => "MOD",
            AuthTokenType::Discord => "DISCORD",
            AuthTokenType::Clan => "CLAN",
        }
    }

    /// Case-insensitive lookup of a token prefix.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(prefix))
    }

    pub fn permissions(&self) -> &'static [AuthTokenPermission] {
        match self {
            AuthTokenType::None => &[],
            AuthTokenType::Dev => &AuthTokenPermission::ALL,
            AuthTokenType::Mod => &[AuthTokenPermission::VerifyDiscord],
            AuthTokenType::Discord => &[AuthTokenPermission::VerifyDiscord],
            AuthTokenType::Clan => &[AuthTokenPermission::GetClanRankUpdates],
        }
    }
}

impl fmt::Display for AuthTokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct AuthToken {
    token_type: AuthTokenType,
    secret: SecretString,
}

impl AuthToken {
    pub fn empty() -> Self {
        Self {
            token_type: AuthTokenType::None,
            secret: SecretString::new(String::new().into()),
        }
    }

    /// Total parse of a full token. Anything that does not match the grammar,
    /// or carries an unknown or `NONE` prefix, yields [`AuthToken::empty`].
    pub fn parse(full_token: Option<&str>) -> Self {
        let Some(full_token) = full_token else {
            return Self::empty();
        };
        let Some(captures) = TOKEN_PATTERN.captures(full_token) else {
            return Self::empty();
        };

        match AuthTokenType::from_prefix(&captures[1]) {
            Some(AuthTokenType::None) | None => Self::empty(),
            Some(token_type) => Self {
                token_type,
                secret: SecretString::new(captures[2].to_string().into()),
            },
        }
    }

    pub fn token_type(&self) -> AuthTokenType {
        self.token_type
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    pub fn is_empty(&self) -> bool {
        self.token_type == AuthTokenType::None
    }

    /// `TYPE|secret` with the canonical uppercase type name. The empty token renders as `NONE|`.
    pub fn to_full_token(&self) -> String {
        format!(
            "{}{}{}",
            self.token_type.as_str(),
            TOKEN_SEPARATOR,
            self.secret.expose_secret()
        )
    }

    pub fn has_permission(&self, permission: AuthTokenPermission) -> bool {
        self.token_type.permissions().contains(&permission)
    }

    pub fn require(&self, permission: AuthTokenPermission) -> AppResult<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(AppError::PermissionDenied {
                permission,
                token_type: self.token_type,
            })
        }
    }
}

impl Default for AuthToken {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for AuthToken {
    fn eq(&self, other: &Self) -> bool {
        self.token_type == other.token_type
            && self.secret.expose_secret() == other.secret.expose_secret()
    }
}

impl Eq for AuthToken {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_canonical_tokens() {
        for full in [
            "DEV|abcdefghijkl",
            "MOD|ABCDEFGHIJKLMNOPQRSTUVWXYZ012345",
            "DISCORD|a1-b2_c3-d4_e5",
            "CLAN|clan_token_0001",
        ] {
            let token = AuthToken::parse(Some(full));
            assert!(!token.is_empty(), "{full} should parse");
            assert_eq!(token.to_full_token(), full);
        }
    }

    #[test]
    fn prefix_match_is_case_insensitive() {
        let token = AuthToken::parse(Some("discord|abcdefghijkl"));
        assert_eq!(token.token_type(), AuthTokenType::Discord);
        assert_eq!(token.to_full_token(), "DISCORD|abcdefghijkl");
    }

    #[test]
    fn malformed_tokens_are_empty() {
        let too_long = format!("DEV|{}", "a".repeat(33));
        let cases = [
            None,
            Some(""),
            Some("DEV"),
            Some("DEV|"),
            Some("DEV|abcdefghijk"),
            Some(too_long.as_str()),
            Some("DEV|abcdefghijkl!"),
            Some("DEV|abc def ghijkl"),
            Some("DEV1|abcdefghijkl"),
            Some("DEV|abcdefghijkl|x"),
            Some("WIZARD|abcdefghijkl"),
            Some("NONE|abcdefghijkl"),
            Some(" DEV|abcdefghijkl"),
            Some("DEV|abcdefghijkl\n"),
        ];
        for case in cases {
            assert_eq!(AuthToken::parse(case), AuthToken::empty(), "{case:?}");
        }
    }

    #[test]
    fn empty_token_has_canonical_form() {
        let empty = AuthToken::empty();
        assert_eq!(empty.to_full_token(), "NONE|");
        assert_eq!(AuthToken::parse(Some(&empty.to_full_token())), empty);
    }

    #[test]
    fn permissions_follow_token_type() {
        let dev = AuthToken::parse(Some("DEV|abcdefghijkl"));
        for permission in AuthTokenPermission::ALL {
            assert!(dev.has_permission(permission));
        }

        for permission in AuthTokenPermission::ALL {
            assert!(!AuthToken::empty().has_permission(permission));
        }

        let clan = AuthToken::parse(Some("CLAN|abcdefghijkl"));
        assert!(clan.has_permission(AuthTokenPermission::GetClanRankUpdates));
        assert!(!clan.has_permission(AuthTokenPermission::VerifyDiscord));

        for kind in AuthTokenType::ALL {
            for permission in AuthTokenPermission::ALL {
                let token = AuthToken {
                    token_type: kind,
                    secret: SecretString::new("abcdefghijkl".into()),
                };
                assert_eq!(
                    token.has_permission(permission),
                    kind.permissions().contains(&permission)
                );
            }
        }
    }

    #[test]
    fn require_reports_missing_permission() {
        let discord = AuthToken::parse(Some("DISCORD|abcdefghijkl"));
        assert!(discord.require(AuthTokenPermission::VerifyDiscord).is_ok());
        let err = discord
            .require(AuthTokenPermission::GetClanRankUpdates)
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::PermissionDenied {
                permission: AuthTokenPermission::GetClanRankUpdates,
                token_type: AuthTokenType::Discord,
            }
        ));
    }

    #[test]
    fn debug_output_hides_secret() {
        let token = AuthToken::parse(Some("DEV|abcdefghijkl"));
        assert!(!format!("{token:?}").contains("abcdefghijkl"));
    }
}
