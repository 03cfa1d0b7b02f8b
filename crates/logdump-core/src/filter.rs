//! Line filters attached to a [`StreamTailer`](crate::tailer::StreamTailer).
//!
//! Every line read by a tailer is offered to each of its filters. Lines a
//! filter accepts are copied to the filter's own sink, named
//! `<filter>.<stream>.txt`, so the name must be usable as a file name.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::avc::{AvcBuffer, AvcRecord, lock_buffer};

lazy_static! {
    /// Matches "avc: denied { ioctl } for comm=..." for example.
    static ref RE_AVC_DENIED: Regex = Regex::new(r"avc:\s+denied\s+\{(\s\w+)+\s\}\sfor\s").unwrap();
    /// Matches "libc : Access denied finding property "..." up to the opening quote.
    static ref RE_LIBC_PROPERTY: Regex = Regex::new(r#"libc\s+:\s+\w+\s\w+\s\w+\s\w+\s""#).unwrap();
}

pub trait LogFilter: Send {
    fn name(&self) -> &str;

    /// Returns whether `line` should be copied to this filter's output.
    fn filter(&mut self, line: &str) -> bool;
}

/// Selects SELinux denials, skipping the ones raised by untrusted apps.
pub struct AvcFilter {
    records: Option<AvcBuffer>,
}

impl AvcFilter {
    pub const NAME: &'static str = "avc";

    /// Every accepted denial is parsed and pushed into `records`.
    pub fn new(records: AvcBuffer) -> Self {
        Self {
            records: Some(records),
        }
    }

    /// Only select lines, without collecting records.
    pub fn without_records() -> Self {
        Self { records: None }
    }
}

impl LogFilter for AvcFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn filter(&mut self, line: &str) -> bool {
        if !RE_AVC_DENIED.is_match(line) || line.contains("untrusted_app") {
            return false;
        }
        if let Some(records) = &self.records {
            match AvcRecord::parse(line) {
                Ok(record) => lock_buffer(records).push(record),
                Err(err) => log::debug!("Ignoring denial '{line}': {err}"),
            }
        }
        true
    }
}

/// Selects denied property lookups reported by bionic.
///
/// Control properties (`ctl.*`) always pass since each one is a distinct
/// start/stop request. Any other property is reported only the first time
/// it is denied.
#[derive(Default)]
pub struct LibcPropFilter {
    denied: HashSet<String>,
}

impl LibcPropFilter {
    pub const NAME: &'static str = "libc_props";

    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the properties seen so far.
    pub fn reset(&mut self) {
        self.denied.clear();
    }
}

impl LogFilter for LibcPropFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn filter(&mut self, line: &str) -> bool {
        let Some(m) = RE_LIBC_PROPERTY.find(line) else {
            return false;
        };
        let rest = &line[m.end()..];
        let prop = rest.split('"').next().unwrap_or(rest);

        if prop.starts_with("ctl.") {
            return true;
        }
        self.denied.insert(prop.to_string())
    }
}
