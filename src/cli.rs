use std::{ffi::OsString, path::PathBuf};

use clap::{ArgAction, Parser, builder::NonEmptyStringValueParser};

pub const NAME: &str = "bootlogger";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME)]
#[clap(about = "Boot and system log collector")]
#[clap(version = crate::metadata::VERSION)]
#[clap(disable_help_subcommand = true)]
pub struct BootloggerOpts {
    /// Root directory of the logs, a `boot` or `system` directory is created inside
    #[clap(value_parser = NonEmptyStringValueParser::new())]
    pub log_dir: String,

    #[clap(long)]
    pub config_file: Option<PathBuf>,

    /// Pass many times for a more verbose output. Passing `-v` adds debug logs, `-vv` enables trace logging
    #[clap(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl BootloggerOpts {
    pub fn log_level(&self) -> log::LevelFilter {
        log_level_from_verbosity_flag_count(self.verbose)
    }
}

pub fn parse_from_args() -> BootloggerOpts {
    parse_from(std::env::args_os())
}

pub fn parse_from<I, T>(args: I) -> BootloggerOpts
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    BootloggerOpts::try_parse_from(args).unwrap_or_else(|e| e.exit())
}

fn log_level_from_verbosity_flag_count(num: u8) -> log::LevelFilter {
    match num {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2..=u8::MAX => log::LevelFilter::Trace,
    }
}
