//! Tether CLI - serve and inspect object trees over RPC.

mod commands;
mod config;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::remote::Target;
use config::Config;

#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "Tether - remote access to live object trees", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Server address (overrides tether.toml)
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Use an observing (read-only) session
    #[arg(long, global = true)]
    observe: bool,
}

#[derive(Args)]
struct TargetArgs {
    /// Document id (default: first document)
    #[arg(short, long, default_value = "")]
    document: String,

    /// Uuid of the target object
    #[arg(short, long)]
    object: Option<String>,

    /// Child field of the document root holding the target object
    #[arg(short, long)]
    child: Option<String>,
}

impl From<TargetArgs> for Target {
    fn from(args: TargetArgs) -> Self {
        Target {
            document: args.document,
            object: args.object,
            child: args.child,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default tether.toml
    Init {
        /// Project directory (default: current directory)
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Serve the demo application
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show the server's application info
    Info,

    /// Check that the server answers
    Ping,

    /// List documents
    Documents,

    /// Read a field value
    Get {
        /// Script name of the field
        field: String,

        /// Read a single element of an array field
        #[arg(short, long)]
        index: Option<u64>,

        /// Download array fields in chunks
        #[arg(short, long)]
        stream: bool,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write a field value
    Set {
        /// Script name of the field
        field: String,

        /// JSON value
        value: String,

        /// Write a single element of an array field
        #[arg(short, long)]
        index: Option<u64>,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Execute a method
    Call {
        /// Method keyword
        method: String,

        /// JSON parameters (default: method defaults)
        params: Option<String>,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// List the methods of an object
    Methods {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Ask the server to shut down
    Quit,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let mut config = Config::load()?;
    if let Some(address) = cli.address {
        config.client.address = address;
    }
    if cli.observe {
        config.client.observing = true;
    }
    let remote = &config.client;

    match cli.command {
        Commands::Init { path } => commands::init::run(path),
        Commands::Serve { host, port } => commands::serve::run(config.clone(), host, port),
        Commands::Info => commands::remote::info(remote),
        Commands::Ping => commands::remote::ping(remote),
        Commands::Documents => commands::remote::documents(remote),
        Commands::Get {
            field,
            index,
            stream,
            target,
        } => commands::remote::get(remote, &target.into(), &field, index, stream),
        Commands::Set {
            field,
            value,
            index,
            target,
        } => commands::remote::set(remote, &target.into(), &field, &value, index),
        Commands::Call {
            method,
            params,
            target,
        } => commands::remote::call(remote, &target.into(), &method, params.as_deref()),
        Commands::Methods { target } => commands::remote::methods(remote, &target.into()),
        Commands::Quit => commands::remote::quit(remote),
    }
}
