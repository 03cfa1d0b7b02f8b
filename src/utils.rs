use std::env;

fn show_backtrace() -> bool {
    if log::max_level() >= log::LevelFilter::Debug {
        return true;
    }

    matches!(env::var("RUST_BACKTRACE").as_deref(), Ok("1"))
}

/// Log an error with its whole chain of causes, and the backtrace when
/// debugging.
pub fn report_error(e: &anyhow::Error) {
    if show_backtrace() {
        log::error!("{e:?}");
    } else {
        log::error!("{e:#}");
    }
}
