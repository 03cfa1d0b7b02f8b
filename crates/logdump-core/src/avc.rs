//! SELinux access vector cache denials.
//!
//! A kernel denial looks like:
//!
//! ```text
//! avc: denied { read write } for comm="foo" name="bar" scontext=u:r:a:s0 tcontext=u:object_r:b:s0 tclass=file permissive=0
//! ```

use std::{
    collections::BTreeSet,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;

/// Records collected by every [`AvcFilter`](crate::filter::AvcFilter), shared across tailer threads.
pub type AvcBuffer = Arc<Mutex<Vec<AvcRecord>>>;

pub fn new_buffer() -> AvcBuffer {
    Arc::new(Mutex::new(Vec::new()))
}

/// Lock the buffer, keeping whatever was collected even if a tailer panicked while holding it.
pub fn lock_buffer(buffer: &AvcBuffer) -> MutexGuard<'_, Vec<AvcRecord>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AvcParseError {
    #[error("permission list not found")]
    MissingPermissions,
    #[error("field '{0}' not found")]
    MissingField(&'static str),
    #[error("invalid security context '{0}'")]
    InvalidContext(String),
}

/// A `user:role:type[:level]` security label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    pub user: String,
    pub role: String,
    pub type_: String,
    pub level: Option<String>,
}

impl FromStr for SecurityContext {
    type Err = AvcParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The MLS level may contain colons itself ("s0:c512,c768").
        let mut parts = s.splitn(4, ':');
        let mut next = || {
            parts
                .next()
                .filter(|part| !part.is_empty())
                .map(str::to_string)
        };
        let invalid = || AvcParseError::InvalidContext(s.to_string());

        let user = next().ok_or_else(invalid)?;
        let role = next().ok_or_else(invalid)?;
        let type_ = next().ok_or_else(invalid)?;
        let level = next();
        Ok(Self {
            user,
            role,
            type_,
            level,
        })
    }
}

impl fmt::Display for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.user, self.role, self.type_)?;
        if let Some(level) = &self.level {
            write!(f, ":{level}")?;
        }
        Ok(())
    }
}

/// One denial, identified by its source context, target context and class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcRecord {
    pub source: SecurityContext,
    pub target: SecurityContext,
    pub class: String,
    pub permissions: BTreeSet<String>,
}

impl AvcRecord {
    /// Parse a log line carrying an `avc: denied` message. Text before the
    /// message (timestamps, logcat headers) is ignored.
    pub fn parse(line: &str) -> Result<Self, AvcParseError> {
        let open = line.find('{').ok_or(AvcParseError::MissingPermissions)?;
        let close = line[open..]
            .find('}')
            .map(|idx| open + idx)
            .ok_or(AvcParseError::MissingPermissions)?;
        let permissions: BTreeSet<String> = line[open + 1..close]
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if permissions.is_empty() {
            return Err(AvcParseError::MissingPermissions);
        }

        let fields = &line[close + 1..];
        let source: SecurityContext = field(fields, "scontext")?.parse()?;
        let target: SecurityContext = field(fields, "tcontext")?.parse()?;
        let class = field(fields, "tclass")?.to_string();

        Ok(Self {
            source,
            target,
            class,
            permissions,
        })
    }

    /// Whether both records describe the same access, regardless of the permissions asked.
    /// The full contexts are compared, MLS level included.
    pub fn same_denial(&self, other: &AvcRecord) -> bool {
        self.source == other.source && self.target == other.target && self.class == other.class
    }

    /// Add the permissions of `other` to this record.
    pub fn merge(&mut self, other: &AvcRecord) {
        self.permissions.extend(other.permissions.iter().cloned());
    }
}

/// Value of the first whitespace-separated `key=value` token for `key`.
fn field<'a>(fields: &'a str, key: &'static str) -> Result<&'a str, AvcParseError> {
    fields
        .split_whitespace()
        .find_map(|token| {
            token
                .strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .map(|value| value.trim_matches('"'))
        .filter(|value| !value.is_empty())
        .ok_or(AvcParseError::MissingField(key))
}
