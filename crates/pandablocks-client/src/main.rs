//! PandABlocks command line tool
//!
//! # Usage
//!
//! ```bash
//! # Interactive control prompt
//! pandablocks control panda
//!
//! # Save and restore the configuration of a device
//! pandablocks save panda state.sav
//! pandablocks load panda state.sav
//!
//! # Introspect blocks and fields
//! pandablocks blocks panda
//! pandablocks fields panda SEQ
//! ```

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pandablocks_client::{BlockingClient, ClientConfig};
use pandablocks_protocol::{
    is_multiline_command, GetBlockInfo, GetFieldInfo, GetState, Raw, SetState,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Talk to a PandABlocks device over its control port
#[derive(Parser, Debug)]
#[command(name = "pandablocks")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control port, overriding the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open an interactive prompt sending raw commands
    Control {
        /// Hostname of the device
        host: String,
    },
    /// Save the device state to a file
    Save {
        /// Hostname of the device
        host: String,
        /// File to write
        file: PathBuf,
    },
    /// Restore the device state from a file
    Load {
        /// Hostname of the device
        host: String,
        /// File written by `save`
        file: PathBuf,
    },
    /// List the blocks of the device
    Blocks {
        /// Hostname of the device
        host: String,
    },
    /// List the fields of a block
    Fields {
        /// Hostname of the device
        host: String,
        /// Block name without a number, e.g. SEQ
        block: String,
    },
}

impl Commands {
    fn host(&self) -> &str {
        match self {
            Commands::Control { host }
            | Commands::Save { host, .. }
            | Commands::Load { host, .. }
            | Commands::Blocks { host }
            | Commands::Fields { host, .. } => host,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    config.host = args.command.host().to_string();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    info!("connecting to {}:{}", config.host, config.port);
    let mut client = BlockingClient::from_config(&config)?;

    match args.command {
        Commands::Control { .. } => control(&mut client)?,
        Commands::Save { file, .. } => {
            let state = client.send(GetState::new())?;
            let mut text = state.join("\n");
            text.push('\n');
            fs::write(&file, text)?;
            info!("saved {} lines to {:?}", state.len(), file);
        }
        Commands::Load { file, .. } => {
            let text = fs::read_to_string(&file)?;
            let failures = client.send(SetState::new(text.lines()))?;
            if failures.is_empty() {
                info!("restored state from {:?}", file);
            } else {
                warn!("{} commands failed while restoring", failures.len());
            }
        }
        Commands::Blocks { .. } => {
            for (name, block) in client.send(GetBlockInfo::new())? {
                println!(
                    "{}[{}] {}",
                    name,
                    block.number,
                    block.description.unwrap_or_default()
                );
            }
        }
        Commands::Fields { block, .. } => {
            for (name, field) in client.send(GetFieldInfo::new(block))? {
                let kind = match &field.subtype {
                    Some(subtype) => format!("{} {}", field.field_type, subtype),
                    None => field.field_type.clone(),
                };
                println!(
                    "{} ({}) {}",
                    name,
                    kind,
                    field.description.unwrap_or_default()
                );
            }
        }
    }

    client.close()?;
    Ok(())
}

/// Send whatever is typed at the prompt, printing the raw reply.
///
/// A table write keeps reading lines until a blank one.
fn control(client: &mut BlockingClient) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = io::stdin();
    let mut input = stdin.lock().lines();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let Some(line) = input.next().transpose()? else {
            return Ok(());
        };
        let mut lines = vec![line.clone()];
        if is_multiline_command(&line) {
            loop {
                write!(stdout, "... ")?;
                stdout.flush()?;
                match input.next().transpose()? {
                    Some(more) if !more.is_empty() => lines.push(more),
                    _ => break,
                }
            }
            lines.push(String::new());
        }
        for reply in client.send(Raw::new(lines))? {
            writeln!(stdout, "{}", reply)?;
        }
        writeln!(stdout)?;
    }
}
