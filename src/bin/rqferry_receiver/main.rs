use std::path::PathBuf;

use clap::Parser;

use rqferry::receiver::{Config, ReceiverSession};

/// Receive one file over the RaptorQ transfer protocol.
#[derive(Parser, Debug)]
#[command(name = "rqferry-receiver", version, about)]
struct Args {
    /// Port to listen on, falling back to an OS-chosen port when taken
    #[arg(short, long, default_value_t = rqferry::DEFAULT_PORT)]
    port: u16,

    /// Directory the received file is written into
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Log per-symbol events instead of drawing a progress bar
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let cfg = Config {
        port: args.port,
        output_dir: args.output,
        debug: args.debug,
    };

    let session = match ReceiverSession::bind(cfg) {
        Ok(session) => session,
        Err(err) => {
            log::error!("bind failed: {:?}", err.0);
            std::process::exit(1);
        }
    };

    match session.local_addr() {
        Ok(addr) => println!("{} {}", addr.ip(), addr.port()),
        Err(err) => {
            log::error!("cannot read the bound address: {:?}", err.0);
            std::process::exit(1);
        }
    }

    match session.run() {
        Ok(path) => log::info!("received {:?}", path),
        Err(err) => {
            log::error!("transfer failed: {:?}", err.0);
            std::process::exit(1);
        }
    }
}
