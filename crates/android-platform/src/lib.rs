//! Access to the Android system the collector runs on: the property store,
//! the kernel configuration, the raw log streams and `/dev/kmsg`.

pub mod kernel_config;
pub mod kmsg;
pub mod properties;
pub mod sources;
