//! Reference credential verifier
//!
//! Speaks the authorize protocol on stdin/stdout for one login. Exits with
//! the bridge's status after a handoff, and with the rejection status
//! otherwise.

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use wsgate_transport::BackendCommand;
use wsgate_verifier::{DEFAULT_SCOPE, VerifierOptions, run};

/// wsgate credential verifier
#[derive(Parser, Debug)]
#[command(name = "wsgate-verify")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host the login is for
    #[arg(default_value = DEFAULT_SCOPE)]
    host: String,

    /// Agent to hand the session to on escalated logins
    #[arg(long, default_value = "wsgate-bridge")]
    bridge: String,

    /// Argument for the agent; may be repeated
    #[arg(long = "bridge-arg")]
    bridge_args: Vec<String>,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // stdout carries frames, logs go to stderr
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logging: {}", e);
    }

    let mut bridge = BackendCommand::new(args.bridge);
    for arg in args.bridge_args {
        bridge = bridge.arg(arg);
    }

    let code = run(VerifierOptions {
        scope: args.host,
        bridge,
    })
    .await;

    std::process::exit(code);
}
