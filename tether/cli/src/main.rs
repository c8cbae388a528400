#![deny(unused_crate_dependencies)]

use clap::Parser;
use tether_core::Tether;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{CliError, CliResult};

mod error;

/// Registers a TCP endpoint, connects it, optionally exchanges one message,
/// and walks the whole lifecycle back down.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host name or address literal to connect to.
    host: String,

    /// TCP port to connect to.
    port: u16,

    /// Message to send once connected; the reply is printed to stdout.
    #[arg(short, long)]
    message: Option<String>,

    /// Render the verbose endpoint description.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn run(args: Args) -> CliResult<()> {
    let tether = Tether::new();
    info!(version = tether.version(), "starting");
    tether.initialize().map_err(CliError::Lifecycle)?;

    let uid = tether
        .sockets()
        .generate_tcp(&args.host, args.port)
        .map_err(CliError::Lifecycle)?;
    let socket = tether.sockets().at(uid).map_err(CliError::Lifecycle)?;
    println!("{}", socket.describe(args.verbose));

    socket.open_tcp().map_err(|source| CliError::Connect {
        host: args.host.clone(),
        port: args.port,
        source,
    })?;
    println!("{}", socket.describe(args.verbose));

    if let Some(message) = &args.message {
        let sent = socket.write_text(message).map_err(CliError::Exchange)?;
        info!(sent, "message sent");
        let reply = socket.read_text().map_err(CliError::Exchange)?;
        println!("{reply}");
    }

    socket.close().map_err(CliError::Exchange)?;
    drop(socket);
    tether
        .sockets()
        .decrement_reference(uid)
        .map_err(CliError::Lifecycle)?;
    tether.uninitialize().map_err(CliError::Lifecycle)?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();
}

fn main() -> miette::Result<()> {
    init_tracing();
    let args = Args::parse();
    run(args)?;
    Ok(())
}
