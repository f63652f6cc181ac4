use std::path::PathBuf;

use clap::Parser;

use rqferry::sender::{Config, SenderSession};

/// Send a file over the RaptorQ transfer protocol.
#[derive(Parser, Debug)]
#[command(name = "rqferry-sender", version, about)]
struct Args {
    /// Receiver host name or address
    host: String,

    /// File to transfer
    file: PathBuf,

    /// Receiver port
    #[arg(default_value_t = rqferry::DEFAULT_PORT)]
    port: u16,

    /// Log every symbol instead of drawing a progress bar
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut cfg = Config::new(&args.host, &args.file);
    cfg.port = args.port;
    cfg.debug = args.debug;

    let session = match SenderSession::connect(cfg) {
        Ok(session) => session,
        Err(err) => {
            log::error!("connection failed: {:?}", err.0);
            std::process::exit(1);
        }
    };

    match session.run() {
        Ok(report) => {
            log::info!(
                "sent {} blocks with {} source and {} repair symbols",
                report.nb_blocks,
                report.source_symbols_sent,
                report.repair_symbols_sent
            );
        }
        Err(err) => {
            log::error!("transfer failed: {:?}", err.0);
            std::process::exit(1);
        }
    }
}
