use regex_lite::Regex;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CorsOptions {
    /// `None` allows every origin with a literal `*`
    pub allow_origins: Option<Vec<OriginMatcher>>,

    pub allow_credentials: bool,

    /// `None` answers preflight requests with [`DEFAULT_ALLOW_METHODS`]
    pub allow_methods: Option<Vec<String>>,

    /// `None` echoes the preflight's `access-control-request-headers`
    pub allow_headers: Option<Vec<String>>,

    pub expose_headers: Option<Vec<String>>,

    /// preflight cache time in seconds
    pub max_age: Option<u64>,
}

pub const DEFAULT_ALLOW_METHODS: [&str; 8] = ["GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "TRACE", "PATCH"];

/// One entry of the origin allow-list.
///
/// From configuration strings: `"*"` is [`OriginMatcher::Any`], a string starting with `^` is
/// compiled into a [`OriginMatcher::Pattern`], anything else is an [`OriginMatcher::Exact`] origin.
#[derive(Debug, Clone)]
pub enum OriginMatcher {
    Any,
    /// compared ascii case-insensitively
    Exact(String),
    /// tested against the raw `origin` header
    Pattern(Regex),
}

impl OriginMatcher {
    pub fn exact<S: Into<String>>(origin: S) -> Self {
        Self::Exact(origin.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex_lite::Error> {
        Ok(Self::Pattern(Regex::new(pattern)?))
    }

    pub fn parse(value: &str) -> Result<Self, regex_lite::Error> {
        match value {
            "*" => Ok(Self::Any),
            pattern if pattern.starts_with('^') => Self::pattern(pattern),
            origin => Ok(Self::exact(origin)),
        }
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(allowed) => allowed.eq_ignore_ascii_case(origin),
            Self::Pattern(regex) => regex.is_match(origin),
        }
    }
}

impl<'de> Deserialize<'de> for OriginMatcher {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(|e| serde::de::Error::custom(format!("invalid origin pattern {value}: {e}")))
    }
}
