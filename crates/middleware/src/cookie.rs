//! `Set-Cookie` style cookie codec.
//!
//! [`Cookie::parse`] reads a `name=value; Attr=...; Flag` string and [`Cookie`]'s `Display` writes
//! one back. `Expires` and `Max-Age` are kept side by side: a cookie carrying both serializes both,
//! leaving precedence to the user agent.

use crate::CookieError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use tracing::trace;

/// `Fri, 31 Dec 9999 23:59:59 GMT`, the last instant an http date can carry.
const MAX_HTTP_DATE_SECS: u64 = 253_402_300_799;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("strict") {
            Some(Self::Strict)
        } else if value.eq_ignore_ascii_case("lax") {
            Some(Self::Lax)
        } else if value.eq_ignore_ascii_case("none") {
            Some(Self::None)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// A single cookie and its attributes.
///
/// Fields are public and can be assigned directly; the wire form is computed on every
/// serialization and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expires: Option<SystemTime>,
    /// seconds
    pub max_age: Option<i64>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self { name: name.into(), value: value.into(), ..Self::default() }
    }

    /// Parses a cookie from its wire form.
    ///
    /// Attribute keys match case-insensitively; unknown attributes and unparsable `Expires` or
    /// `Max-Age` values are dropped rather than rejected. Only an empty name is an error.
    pub fn parse(s: &str) -> Result<Self, CookieError> {
        let mut segments = s.split(';');

        let pair = segments.next().unwrap_or_default();
        let (name, value) = match pair.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (pair.trim(), ""),
        };
        if name.is_empty() {
            return Err(CookieError::EmptyName);
        }

        let mut cookie = Cookie::new(name, value);
        for segment in segments {
            let (key, value) = match segment.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (segment.trim(), None),
            };

            match key.to_ascii_lowercase().as_str() {
                "expires" => cookie.expires = value.and_then(|v| httpdate::parse_http_date(v).ok()),
                "max-age" => cookie.max_age = value.and_then(|v| v.parse().ok()),
                "domain" => cookie.domain = value.map(str::to_owned),
                "path" => cookie.path = value.map(str::to_owned),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.same_site = value.and_then(SameSite::parse),
                _ => trace!(attribute = key, "ignore unknown cookie attribute"),
            }
        }

        Ok(cookie)
    }
}

impl FromStr for Cookie {
    type Err = CookieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cookie::parse(s)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;

        if let Some(expires) = self.expires {
            // http dates only span the epoch to the end of year 9999
            let latest = SystemTime::UNIX_EPOCH + Duration::from_secs(MAX_HTTP_DATE_SECS);
            let expires = expires.clamp(SystemTime::UNIX_EPOCH, latest);
            write!(f, "; Expires={}", httpdate::fmt_http_date(expires))?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={}", same_site.as_str())?;
        }

        Ok(())
    }
}
