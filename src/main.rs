use bootlogger::{cli, utils};

#[tokio::main]
async fn main() {
    // Usage errors exit with clap's status 2
    let options = cli::parse_from_args();

    bootlogger::init_logger(Some(options.log_level()));

    // Exit explicitly: a property waiter may still be blocked on its thread.
    match bootlogger::run(&options).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            utils::report_error(&e);
            std::process::exit(1);
        }
    }
}
