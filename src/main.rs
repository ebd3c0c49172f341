//! ltm CLI: inspect and drive a long-term memory store.
//!
//! Every command goes through the same `^ltm` command protocol a reasoning
//! engine uses: the CLI builds a state header in a scratch working memory,
//! writes the command, runs one cycle and prints the result region.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use ltm_kernel::chunks::ChunkFile;
use ltm_kernel::command::{ATTR_RETRIEVED, ATTR_STATUS};
use ltm_kernel::config::{DatabaseMode, LtmConfig};
use ltm_kernel::engine::Ltm;
use ltm_kernel::paths::LtmPaths;
use ltm_kernel::storage::StoreMode;
use ltm_kernel::symbol::{IdName, SymbolRef};
use ltm_kernel::wm::WorkingMemory;

#[derive(Parser)]
#[command(name = "ltm", version, about = "Long-term declarative memory store")]
struct Cli {
    /// Database file (defaults to the XDG data directory).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file (defaults to $XDG_CONFIG_HOME/ltm-kernel/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Commit every operation on its own instead of once at exit.
    #[arg(long, global = true)]
    eager: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store (or wipe it with --force).
    Init {
        #[arg(long)]
        force: bool,
    },

    /// Store every chunk of a JSON chunk file.
    Add {
        #[arg(long)]
        file: PathBuf,

        /// Store only the top-level chunks, not what they reach.
        #[arg(long)]
        single: bool,
    },

    /// Find the best chunk matching a cue.
    Query {
        /// Comma-separated attr=value pairs; `@B3` values refer to chunks.
        #[arg(long)]
        cue: String,

        /// Chunk name to exclude (repeatable).
        #[arg(long)]
        prohibit: Vec<String>,
    },

    /// Expand a chunk by the name it was stored under.
    Retrieve { name: String },

    /// Print every stored chunk.
    Print {
        #[arg(long)]
        json: bool,
    },

    /// Show store statistics.
    Info,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    let mut wm = WorkingMemory::new();

    match cli.command {
        Commands::Init { force } => {
            let mut ltm = Ltm::open(config.clone(), &mut wm)?;
            if force {
                ltm.reinit(&mut wm)?;
            }
            println!("Initialized long-term memory at {}", config.database_path().display());
            print!("{}", ltm.stats()?);
            ltm.close()?;
        }

        Commands::Add { file, single } => {
            let chunks = ChunkFile::load(&file)?;
            config.store_mode = if single {
                StoreMode::Single
            } else {
                StoreMode::Recursive
            };
            let mut ltm = Ltm::open(config, &mut wm)?;
            let roots = chunks.install(&mut wm, 1);
            let (state, command) = attach(&mut ltm, &mut wm);
            for root in &roots {
                wm.add_str_attr(&command, "store", root);
            }
            ltm.run_cycle(&mut wm);
            let status = status_of(&ltm, &wm, &state);
            println!("Stored {} chunks from {}: {status}", roots.len(), file.display());
            ltm.close()?;
        }

        Commands::Query { cue, prohibit } => {
            let mut ltm = Ltm::open(config, &mut wm)?;
            let q = wm.new_identifier('Q', 1);
            for pair in cue.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let Some((attr, value)) = pair.split_once('=') else {
                    miette::bail!("cue element {pair:?} is not attr=value");
                };
                let value = parse_value(&mut ltm, &mut wm, value.trim())?;
                wm.add_str_attr(&q, attr.trim(), &value);
            }

            let (state, command) = attach(&mut ltm, &mut wm);
            wm.add_str_attr(&command, "query", &q);
            for name in &prohibit {
                let id = lookup(&mut ltm, &mut wm, name)?;
                wm.add_str_attr(&command, "prohibit", &id);
            }
            ltm.run_cycle(&mut wm);
            report(&mut ltm, &wm, &state)?;
            ltm.close()?;
        }

        Commands::Retrieve { name } => {
            let mut ltm = Ltm::open(config, &mut wm)?;
            let id = lookup(&mut ltm, &mut wm, &name)?;
            let (state, command) = attach(&mut ltm, &mut wm);
            wm.add_str_attr(&command, "retrieve", &id);
            ltm.run_cycle(&mut wm);
            println!("status: {}", status_of(&ltm, &wm, &state));
            for wme in wm.wmes_of(&id) {
                println!("  {wme}");
            }
            ltm.close()?;
        }

        Commands::Print { json } => {
            let mut ltm = Ltm::open(config, &mut wm)?;
            let chunks = ltm.export_chunks()?;
            if json {
                let json = serde_json::to_string_pretty(&chunks).into_diagnostic()?;
                println!("{json}");
            } else if chunks.is_empty() {
                println!("No chunks stored.");
            } else {
                for chunk in &chunks {
                    println!("{chunk}");
                }
            }
            ltm.close()?;
        }

        Commands::Info => {
            let mut ltm = Ltm::open(config.clone(), &mut wm)?;
            println!("database: {}", config.database_path().display());
            print!("{}", ltm.stats()?);
            ltm.close()?;
        }
    }

    Ok(())
}

/// Config file (explicit or XDG), then command-line overrides. The CLI
/// always works on a file-backed store.
fn load_config(cli: &Cli) -> Result<LtmConfig> {
    let path = match &cli.config {
        Some(p) => Some(p.clone()),
        None => LtmPaths::resolve()
            .ok()
            .map(|p| p.config_file())
            .filter(|p| p.is_file()),
    };
    let mut config = match path {
        Some(p) => LtmConfig::load(&p)?,
        None => LtmConfig::default(),
    };
    config.database = DatabaseMode::File;
    if let Some(db) = &cli.db {
        config.path = Some(db.clone());
    }
    if cli.eager {
        config.lazy_commit = false;
    }
    Ok(config)
}

fn attach(ltm: &mut Ltm, wm: &mut WorkingMemory) -> (SymbolRef, SymbolRef) {
    let state = wm.new_identifier('S', 1);
    let command = ltm.attach_state(wm, &state).command.clone();
    (state, command)
}

fn lookup(ltm: &mut Ltm, wm: &mut WorkingMemory, name: &str) -> Result<SymbolRef> {
    let Some(parsed) = IdName::parse(name) else {
        miette::bail!("{name:?} is not a chunk name like B3");
    };
    match ltm.lookup(wm, parsed, 1)? {
        Some(id) => Ok(id),
        None => miette::bail!("no chunk named {parsed}"),
    }
}

fn parse_value(ltm: &mut Ltm, wm: &mut WorkingMemory, text: &str) -> Result<SymbolRef> {
    if let Some(name) = text.strip_prefix('@') {
        return lookup(ltm, wm, name);
    }
    Ok(if let Ok(i) = text.parse::<i64>() {
        wm.symbols_mut().int(i)
    } else if let Ok(x) = text.parse::<f64>() {
        wm.symbols_mut().float(x)
    } else {
        wm.symbols_mut().str(text)
    })
}

fn status_of(ltm: &Ltm, wm: &WorkingMemory, state: &SymbolRef) -> String {
    ltm.header(state)
        .and_then(|h| wm.values_of(&h.result, ATTR_STATUS).first().map(|s| s.to_string()))
        .unwrap_or_else(|| "no result".to_string())
}

fn report(ltm: &mut Ltm, wm: &WorkingMemory, state: &SymbolRef) -> Result<()> {
    println!("status: {}", status_of(ltm, wm, state));
    let retrieved = ltm
        .header(state)
        .and_then(|h| wm.values_of(&h.result, ATTR_RETRIEVED).first().cloned());
    if let Some(id) = retrieved {
        let chunk = match ltm.lti_of(&id)? {
            Some(lti) => ltm.chunk(lti)?,
            None => None,
        };
        if let Some(chunk) = chunk {
            println!("{chunk}");
        }
    }
    Ok(())
}
