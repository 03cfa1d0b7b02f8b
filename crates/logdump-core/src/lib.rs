//! Building blocks of the boot log collector.
//!
//! A [`StreamTailer`](tailer::StreamTailer) drains a [`LogSource`](tailer::LogSource)
//! line by line into a [`LogSink`](sink::LogSink). Every line is also offered to the
//! [`LogFilter`](filter::LogFilter)s attached to the tailer, each of which owns a
//! sink of its own for the lines it accepts.
//!
//! The [`AvcFilter`](filter::AvcFilter) additionally extracts SELinux denials into a
//! shared [`AvcBuffer`](avc::AvcBuffer), which the [`correlator`] turns into a
//! deduplicated list of `allow` rules once all tailers have stopped.

pub mod avc;
pub mod correlator;
pub mod filter;
pub mod sink;
pub mod tailer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
