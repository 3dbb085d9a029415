//! The C-- object server daemon.
//!
//! Boots the binary database (creating a minimal world when none exists),
//! wires the listening port or stdio, then runs the main loop: reap defunct
//! records, fire the heartbeat, pump the I/O bridge, and deliver each event
//! as an interpreter task. A `shutdown` request exits the loop; the daemon
//! then dumps the database and flushes connection output.

use anyhow::{Context, Result};
use clap::Parser;
use cmm_config::{Config, ROOT_DBREF, SYSTEM_DBREF};
use cmm_core::{ident, Dbref, List, Value};
use cmm_db::Db;
use cmm_net::Bridge;
use cmm_vm::Vm;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cmm-node", about = "C-- object server daemon", version)]
struct Cli {
    /// Port to listen on; without one, stdin/stdout become the connection
    /// on the system object.
    port: Option<u16>,

    /// Path to the TOML configuration file.
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Working directory holding binary/, backup/, scripts/ and text/.
    #[arg(long, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// Overrides the heartbeat frequency in seconds; 0 disables it.
    #[arg(long, value_name = "SECONDS")]
    heartbeat: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if let Some(dir) = &cli.base_dir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("cannot enter base dir {}", dir.display()))?;
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(freq) = cli.heartbeat {
        config.heartbeat_freq = (freq > 0).then_some(freq);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("tokio runtime")?;
    runtime.block_on(run(cli, config))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_owned(),
        None => {
            let default = PathBuf::from("cmm.toml");
            if !default.exists() {
                return Ok(Config::default());
            }
            default
        }
    };
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("cannot parse config {}", path.display()))
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let mut db = Db::open(&config).context("opening database")?;
    if db.is_empty() {
        seed_world(&mut db).context("creating fresh database")?;
    }

    let mut bridge = Bridge::new();
    match cli.port {
        Some(port) => {
            bridge
                .add_server(port, Dbref(SYSTEM_DBREF))
                .with_context(|| format!("cannot listen on port {port}"))?;
        }
        None => {
            bridge.add_stdio(Dbref(SYSTEM_DBREF));
            info!("no port given; stdio wired to the system object");
        }
    }

    let mut vm = Vm::new(db, bridge, &config);

    // Tell the system object the server is up.
    let startup = ident::ids().startup;
    if let Some(error) = vm.task(None, Dbref(SYSTEM_DBREF), startup, vec![])? {
        info!(error = %ident::name(error), "no startup method");
    }

    main_loop(&mut vm).await?;

    info!("shutting down");
    vm.db.dump().context("final dump")?;
    vm.bridge.flush_output().await;
    Ok(())
}

async fn main_loop(vm: &mut Vm) -> Result<()> {
    let mut last_heartbeat = Instant::now();
    while vm.running() {
        for event in vm.bridge.flush_defunct() {
            vm.handle_io_event(event)?;
        }

        let timeout = match vm.heartbeat_freq() {
            Some(freq) => {
                let period = Duration::from_secs(freq);
                let since = last_heartbeat.elapsed();
                if since >= period {
                    vm.heartbeat()?;
                    last_heartbeat = Instant::now();
                    period
                } else {
                    period - since
                }
            }
            None => Duration::from_secs(1),
        };

        // Interrupt cleanly on Ctrl-C.
        let events = tokio::select! {
            events = vm.bridge.pump(timeout) => events,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        };
        for event in events {
            vm.handle_io_event(event)?;
        }
    }
    Ok(())
}

/// A fresh database: `$root` (#1) at the top of the parent graph and
/// `$system` (#0) beneath it, both bound in the name table.
fn seed_world(db: &mut Db) -> Result<()> {
    warn!("no database found; seeding a minimal world");
    let system = db.create(List::new())?;
    if system.0 != SYSTEM_DBREF {
        anyhow::bail!("fresh database allocated {system} for the system object");
    }
    let root = db.create(List::new())?;
    if root.0 != ROOT_DBREF {
        anyhow::bail!("fresh database allocated {root} for the root object");
    }
    db.change_parents(system, &List::from_vec(vec![Value::Dbref(root)]))?
        .map_err(|_| anyhow::anyhow!("cannot parent the system object under root"))?;

    let system_name = ident::get("system");
    db.set_name(system_name, system);
    ident::discard(system_name);
    let root_name = ident::get("root");
    db.set_name(root_name, root);
    ident::discard(root_name);

    // The root object declares `name`, the parameter the portable pack
    // uses for reference translation.
    if let Some(obj) = db.fetch(root)? {
        obj.add_param(ident::ids().name);
    }
    db.sync()?;
    Ok(())
}
