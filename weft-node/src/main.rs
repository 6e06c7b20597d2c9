use std::{env, fs, net, path::PathBuf, process};

use anyhow::Context;
use crossbeam_channel as chan;

use weft::config::Config;
use weft::logger;
use weft_node::signals;
use weft_node::Runtime;

pub const NAME: &str = "weft-node";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const HELP_MSG: &str = r#"
Usage

   weft-node [<option>...]

   Runs one control plane node. Peers, trust domains and the listener port
   range come from the configuration file; routes and peers can be managed
   at runtime over the control socket.

Options

    --config             <path>         Config file to use (default config.json)
    --force                             Force start even if an existing control socket is found
    --listen             <address>      Address to listen on for peer connections
    --socket             <path>         Control socket path (default $WEFT_SOCKET or ./weft.sock)
    --version                           Print program version
    --help                              Print help
"#;

#[derive(Debug)]
struct Options {
    config: PathBuf,
    listen: Vec<net::SocketAddr>,
    socket: Option<PathBuf>,
    force: bool,
}

impl Options {
    fn from_env() -> Result<Self, anyhow::Error> {
        use lexopt::prelude::*;

        let mut parser = lexopt::Parser::from_env();
        let mut config = PathBuf::from("config.json");
        let mut listen = Vec::new();
        let mut socket = None;
        let mut force = false;

        while let Some(arg) = parser.next()? {
            match arg {
                Long("force") => {
                    force = true;
                }
                Long("config") => {
                    let value = parser.value()?;
                    config = PathBuf::from(value);
                }
                Long("listen") => {
                    let addr = parser.value()?.parse()?;
                    listen.push(addr);
                }
                Long("socket") => {
                    let value = parser.value()?;
                    socket = Some(PathBuf::from(value));
                }
                Long("help") | Short('h') => {
                    println!("{HELP_MSG}");
                    process::exit(0);
                }
                Long("version") => {
                    println!("{NAME} {VERSION}");
                    process::exit(0);
                }
                _ => anyhow::bail!(arg.unexpected()),
            }
        }

        Ok(Self {
            config,
            listen,
            socket,
            force,
        })
    }

    fn socket(&self) -> PathBuf {
        self.socket.clone().unwrap_or_else(|| {
            env::var_os("WEFT_SOCKET")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("weft.sock"))
        })
    }
}

fn execute() -> anyhow::Result<()> {
    logger::init(logger::env_level().unwrap_or(log::Level::Debug))?;

    let options = Options::from_env()?;

    log::info!(target: "node", "Starting node..");
    log::info!(target: "node", "Version {VERSION}");

    let mut config = Config::load(&options.config)
        .with_context(|| format!("couldn't load configuration from {:?}", options.config))?;

    if !options.listen.is_empty() {
        config.listen = options.listen.clone();
    }
    log::info!(target: "node", "Node name is {}", config.node_name);

    let (notify, signals) = chan::bounded(1);
    signals::install(notify)?;

    let socket = options.socket();
    if options.force {
        log::debug!(target: "node", "Removing existing control socket..");
        fs::remove_file(&socket).ok();
    }
    Runtime::init(config, socket, signals)?.run()?;

    Ok(())
}

fn main() {
    if let Err(err) = execute() {
        if let Some(src) = err.source() {
            log::error!(target: "node", "Fatal: {err}: {src}");
        } else {
            log::error!(target: "node", "Fatal: {err}");
        }
        process::exit(1);
    }
}
