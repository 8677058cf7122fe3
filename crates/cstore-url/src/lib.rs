//! # cstore-url
//!
//! Charm URL value type for the cstore artifact store.
//!
//! A charm URL names a published charm and optionally pins one revision:
//!
//! ```text
//! cs:oneiric/wordpress          latest revision
//! cs:oneiric/wordpress-2        revision 2
//! cs:~joe/oneiric/wordpress     user-scoped, latest revision
//! ```
//!
//! `CharmUrl` is a plain value: every transformation returns a new URL and
//! nothing mutates in place. The store keys its lock and revision records by
//! [`CharmUrl::key`], which is the canonical string with the revision slot
//! stripped, so `wordpress` and `wordpress-2` contend for the same lease.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing a charm URL.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlError {
    #[error("charm URL {0:?} has no schema (expected \"cs:\" prefix)")]
    MissingSchema(String),

    #[error("charm URL {0:?} must be of the form cs:[~user/]series/name[-revision]")]
    Malformed(String),

    #[error("charm URL {url:?} has invalid {what}: {value:?}")]
    InvalidPart {
        url: String,
        what: &'static str,
        value: String,
    },
}

pub type Result<T> = std::result::Result<T, UrlError>;

/// A parsed charm URL with an optional revision slot.
///
/// Comparison, hashing, and [`Display`](fmt::Display) include the revision;
/// use [`CharmUrl::key`] when the revisionless identity is wanted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharmUrl {
    user: Option<String>,
    series: String,
    name: String,
    revision: Option<u32>,
}

impl CharmUrl {
    /// Parse a URL of the form `cs:[~user/]series/name[-revision]`.
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("cs:")
            .ok_or_else(|| UrlError::MissingSchema(s.to_string()))?;

        let mut parts: Vec<&str> = rest.split('/').collect();

        let user = if parts.first().is_some_and(|p| p.starts_with('~')) {
            let raw = parts.remove(0);
            let user = &raw[1..];
            validate_part(s, "user", user)?;
            Some(user.to_string())
        } else {
            None
        };

        let &[series, name_rev] = parts.as_slice() else {
            return Err(UrlError::Malformed(s.to_string()));
        };
        validate_part(s, "series", series)?;

        let (name, revision) = split_revision(name_rev);
        validate_part(s, "name", name)?;

        Ok(Self {
            user,
            series: series.to_string(),
            name: name.to_string(),
            revision,
        })
    }

    /// The user segment, without the `~` sigil.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound revision, or `None` for "latest".
    pub fn revision(&self) -> Option<u32> {
        self.revision
    }

    /// Return a copy of this URL with the revision slot replaced.
    ///
    /// `self` is untouched; the revision slot is a value, not shared state.
    pub fn with_revision(&self, revision: Option<u32>) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }

    /// Canonical revisionless string, used as the lock and index key.
    pub fn key(&self) -> String {
        self.with_revision(None).to_string()
    }
}

impl fmt::Display for CharmUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cs:")?;
        if let Some(user) = &self.user {
            write!(f, "~{}/", user)?;
        }
        write!(f, "{}/{}", self.series, self.name)?;
        if let Some(rev) = self.revision {
            write!(f, "-{}", rev)?;
        }
        Ok(())
    }
}

impl FromStr for CharmUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split a trailing `-<digits>` revision off a name segment.
///
/// The digits must parse and must leave a non-empty name behind, so a charm
/// literally named `2048` keeps its name.
fn split_revision(name_rev: &str) -> (&str, Option<u32>) {
    if let Some(idx) = name_rev.rfind('-') {
        let (name, suffix) = (&name_rev[..idx], &name_rev[idx + 1..]);
        if !name.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(rev) = suffix.parse() {
                return (name, Some(rev));
            }
        }
    }
    (name_rev, None)
}

fn validate_part(url: &str, what: &'static str, value: &str) -> Result<()> {
    let valid = value.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(UrlError::InvalidPart {
            url: url.to_string(),
            what,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_without_revision() {
        let url = CharmUrl::parse("cs:oneiric/wordpress").unwrap();
        assert_eq!(url.series(), "oneiric");
        assert_eq!(url.name(), "wordpress");
        assert_eq!(url.revision(), None);
        assert_eq!(url.user(), None);
        assert_eq!(url.to_string(), "cs:oneiric/wordpress");
    }

    #[test]
    fn test_parse_with_revision() {
        let url = CharmUrl::parse("cs:oneiric/wordpress-a-1").unwrap();
        assert_eq!(url.name(), "wordpress-a");
        assert_eq!(url.revision(), Some(1));
        assert_eq!(url.to_string(), "cs:oneiric/wordpress-a-1");
    }

    #[test]
    fn test_parse_with_user() {
        let url = CharmUrl::parse("cs:~joe/oneiric/wordpress-7").unwrap();
        assert_eq!(url.user(), Some("joe"));
        assert_eq!(url.revision(), Some(7));
        assert_eq!(url.key(), "cs:~joe/oneiric/wordpress");
    }

    #[test]
    fn test_numeric_name_is_not_a_revision() {
        let url = CharmUrl::parse("cs:oneiric/2048").unwrap();
        assert_eq!(url.name(), "2048");
        assert_eq!(url.revision(), None);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            CharmUrl::parse("oneiric/wordpress"),
            Err(UrlError::MissingSchema(_))
        ));
        assert!(matches!(
            CharmUrl::parse("cs:wordpress"),
            Err(UrlError::Malformed(_))
        ));
        assert!(matches!(
            CharmUrl::parse("cs:oneiric/wordpress/extra"),
            Err(UrlError::Malformed(_))
        ));
        assert!(matches!(
            CharmUrl::parse("cs:oneiric/Wordpress"),
            Err(UrlError::InvalidPart { what: "name", .. })
        ));
    }

    #[test]
    fn test_with_revision_returns_new_value() {
        let url = CharmUrl::parse("cs:oneiric/wordpress-3").unwrap();
        let latest = url.with_revision(None);

        // The original is untouched.
        assert_eq!(url.revision(), Some(3));
        assert_eq!(latest.revision(), None);
        assert_eq!(latest.with_revision(Some(9)).revision(), Some(9));
        assert_eq!(latest.revision(), None);
    }

    #[test]
    fn test_key_strips_revision() {
        let a = CharmUrl::parse("cs:oneiric/wordpress-1").unwrap();
        let b = CharmUrl::parse("cs:oneiric/wordpress-2").unwrap();
        let c = CharmUrl::parse("cs:oneiric/wordpress").unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), c.key());
        assert_eq!(a.key(), "cs:oneiric/wordpress");
    }

    #[test]
    fn test_display_parse_roundtrip() {
        for s in ["cs:oneiric/wordpress", "cs:~joe/precise/mysql-12"] {
            assert_eq!(CharmUrl::parse(s).unwrap().to_string(), s);
        }
    }
}
