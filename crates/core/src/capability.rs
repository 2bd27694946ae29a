//! Capability flags attached to permission grants.
//!
//! A capability is serialized as a fixed three-character string. Each
//! position is independent:
//!
//! | position | set | unset | meaning       |
//! |----------|-----|-------|---------------|
//! | 0        | `r` | `-`   | list / read   |
//! | 1        | `w` | `-`   | write/modify  |
//! | 2        | `d` | `-`   | download      |

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The single flag an operation requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// See the entry in listings, create directories under it.
    List,
    /// Upload, rename, move or remove.
    Write,
    /// Fetch file contents.
    Download,
}

impl Access {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Write => "write",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three independent permission flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capability {
    pub list: bool,
    pub write: bool,
    pub download: bool,
}

impl Capability {
    /// Length of the encoded form.
    pub const ENCODED_LEN: usize = 3;

    /// All flags set.
    pub const FULL: Self = Self {
        list: true,
        write: true,
        download: true,
    };

    /// No flags set.
    pub const NONE: Self = Self {
        list: false,
        write: false,
        download: false,
    };

    pub fn new(list: bool, write: bool, download: bool) -> Self {
        Self {
            list,
            write,
            download,
        }
    }

    /// Whether the flag for `access` is set.
    pub fn allows(&self, access: Access) -> bool {
        match access {
            Access::List => self.list,
            Access::Write => self.write,
            Access::Download => self.download,
        }
    }

    /// Parse the positional encoding (`rwd`, `r--`, `-w-`, ...).
    pub fn parse(s: &str) -> crate::Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != Self::ENCODED_LEN {
            return Err(crate::Error::InvalidCapability(format!(
                "expected {} characters, got {:?}",
                Self::ENCODED_LEN,
                s
            )));
        }

        let flag = |pos: usize, letter: u8| -> crate::Result<bool> {
            match bytes[pos] {
                b if b == letter => Ok(true),
                b'-' => Ok(false),
                other => Err(crate::Error::InvalidCapability(format!(
                    "position {pos} must be '{}' or '-', got {:?}",
                    letter as char, other as char
                ))),
            }
        };

        Ok(Self {
            list: flag(0, b'r')?,
            write: flag(1, b'w')?,
            download: flag(2, b'd')?,
        })
    }

    /// Canonical three-character encoding.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(Self::ENCODED_LEN);
        out.push(if self.list { 'r' } else { '-' });
        out.push(if self.write { 'w' } else { '-' });
        out.push(if self.download { 'd' } else { '-' });
        out
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Capability {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
