//! Identity normalization.
//!
//! Every caller-supplied identity is reduced to one canonical string before it
//! touches the store. Two spellings of the same client (`::ffff:10.0.0.1` and
//! `10.0.0.1`, `[::1]:443` and `::1`) must land on the same counter, otherwise
//! the limiter under-counts.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use thiserror::Error;

/// Longest opaque identity accepted, in bytes.
pub const MAX_OPAQUE_LEN: usize = 256;

/// Reasons an identity cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity is empty")]
    Empty,
    #[error("malformed identity: {0:?}")]
    Malformed(String),
    #[error("identity is {0} bytes long (max {max})", max = MAX_OPAQUE_LEN)]
    TooLong(usize),
}

/// A normalized, comparable rate limit key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    canonical: String,
}

impl Identity {
    /// Parse a network address in any of its usual textual forms.
    ///
    /// Accepts bare IPv4/IPv6, bracketed IPv6 and `ip:port` socket forms
    /// (the port is dropped). Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }

        if let Ok(ip) = trimmed.parse::<IpAddr>() {
            return Ok(ip.into());
        }

        if let Ok(socket) = trimmed.parse::<SocketAddr>() {
            return Ok(socket.into());
        }

        if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Ok(v6) = inner.parse::<Ipv6Addr>() {
                return Ok(IpAddr::V6(v6).into());
            }
        }

        Err(IdentityError::Malformed(trimmed.to_string()))
    }

    /// An identity that is not a network address, such as an API key.
    ///
    /// The value is used verbatim after trimming, so it must not contain
    /// whitespace or control characters.
    pub fn opaque(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }
        if trimmed.len() > MAX_OPAQUE_LEN {
            return Err(IdentityError::TooLong(trimmed.len()));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(IdentityError::Malformed(trimmed.to_string()));
        }

        Ok(Self {
            canonical: trimmed.to_string(),
        })
    }

    /// The canonical key text.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl From<IpAddr> for Identity {
    fn from(ip: IpAddr) -> Self {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        Self {
            canonical: ip.to_string(),
        }
    }
}

impl From<SocketAddr> for Identity {
    fn from(addr: SocketAddr) -> Self {
        addr.ip().into()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Conversion into a normalized [`Identity`].
///
/// Strings go through [`Identity::parse`]; use [`Identity::opaque`] first for
/// keys that are not addresses.
pub trait IntoIdentity {
    fn into_identity(self) -> Result<Identity, IdentityError>;
}

impl IntoIdentity for Identity {
    fn into_identity(self) -> Result<Identity, IdentityError> {
        Ok(self)
    }
}

impl IntoIdentity for &Identity {
    fn into_identity(self) -> Result<Identity, IdentityError> {
        Ok(self.clone())
    }
}

impl IntoIdentity for &str {
    fn into_identity(self) -> Result<Identity, IdentityError> {
        Identity::parse(self)
    }
}

impl IntoIdentity for &String {
    fn into_identity(self) -> Result<Identity, IdentityError> {
        Identity::parse(self)
    }
}

impl IntoIdentity for String {
    fn into_identity(self) -> Result<Identity, IdentityError> {
        Identity::parse(&self)
    }
}

impl IntoIdentity for IpAddr {
    fn into_identity(self) -> Result<Identity, IdentityError> {
        Ok(self.into())
    }
}

impl IntoIdentity for SocketAddr {
    fn into_identity(self) -> Result<Identity, IdentityError> {
        Ok(self.into())
    }
}
