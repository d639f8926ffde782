use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(IssuerId);

string_newtype!(TransactionId);
string_newtype!(TokenHash);
string_newtype!(ContentId);

impl From<TransactionId> for TokenHash {
    /// The hash of the operation that minted an iteration is the key the
    /// signing server files its progress under.
    fn from(value: TransactionId) -> Self {
        TokenHash(value.0)
    }
}

const IPFS_SCHEME: &str = "ipfs://";

impl ContentId {
    /// `ipfs://<cid>` form stored in token metadata.
    pub fn ipfs_uri(&self) -> String {
        format!("{IPFS_SCHEME}{}", self.0)
    }

    pub fn from_ipfs_uri(uri: &str) -> Option<Self> {
        uri.strip_prefix(IPFS_SCHEME)
            .filter(|cid| !cid.is_empty())
            .map(ContentId::new)
    }
}

/// Amount in mutez (1 tez = 1_000_000 mutez).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mutez(pub u64);

impl Mutez {
    pub fn from_tez(tez: f64) -> Self {
        Mutez((tez.max(0.0) * 1_000_000.0).floor() as u64)
    }
}

/// Royalties in per-mille, the unit the contracts expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerMille(pub u32);

impl PerMille {
    pub fn from_percent(percent: f64) -> Self {
        PerMille((percent.max(0.0) * 10.0).floor() as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenTokFlag {
    None,
    Clean,
    Reported,
    AutoDetectedCopy,
    Malicious,
    Hidden,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The parts of a listed generative token the mint flow needs to decide
/// whether an iteration can be collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerativeTokenListing {
    pub id: IssuerId,
    pub name: String,
    pub author: UserSummary,
    pub price: Mutez,
    pub balance: u64,
    pub enabled: bool,
    pub flag: GenTokFlag,
    pub lock_end: DateTime<Utc>,
}

impl GenerativeTokenListing {
    pub fn is_hidden(&self) -> bool {
        matches!(self.flag, GenTokFlag::Malicious | GenTokFlag::Hidden) || self.balance == 0
    }
}
