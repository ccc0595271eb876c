use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalized (lower-cased) hexadecimal address.
///
/// Equality, hashing and ordering are all defined on the normalized string, so
/// `0xAbC` and `0xabc` index the same entry in every per-account mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Account(String);

impl Account {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Account {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Account {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Account> for String {
    fn from(value: Account) -> Self {
        value.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Account {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The two networks a snapshot is taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Gchain,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Mainnet, Network::Gchain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Gchain => "gchain",
        }
    }

    pub fn other(&self) -> Network {
        match self {
            Network::Mainnet => Network::Gchain,
            Network::Gchain => Network::Mainnet,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "gchain" | "xdai" | "gnosis" => Ok(Network::Gchain),
            other => Err(anyhow::anyhow!("unknown network \"{}\"", other)),
        }
    }
}
