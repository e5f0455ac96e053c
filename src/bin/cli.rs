//! `plasma-peer`: the CLI front end for a plasma peer (`§1` ambient stack),
//! following `sombra`'s `src/bin/cli.rs` shape (a flattened global-args
//! struct, a `Command` subcommand enum, `#[tokio::main] async fn main()`
//! delegating to a fallible `run()`).
//!
//! Subcommands cover the lifecycle a single peer process needs: `serve`
//! starts its RPC listener, `seed` loads fixture nodes into the in-memory
//! graph beforehand, `ping`/`node`/`query`/`recur-query`/`iter-n-query` drive
//! the same six operations `§4.H`'s facade exposes, against either a local
//! in-memory graph or a remote peer, and `explain` renders a plan's operator
//! tree without running it.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use plasma::config::Config;
use plasma::graph::InMemoryGraphAdapter;
use plasma::model::{root_id, Node, NodeId};
use plasma::peer::{HttpPeerLink, PeerFacade, PeerLink};
use plasma::plan::{explain, Plan};
use plasma::runtime::NoRemoteQuerier;

#[derive(Parser, Debug)]
#[command(name = "plasma-peer", version, about = "A peer-to-peer graph query engine")]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[command(subcommand)]
    command: Command,
}

/// Global flags every subcommand shares: how to reach the peer whose graph
/// and engine a command should act against.
#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file (see Config::load)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "JSON array of nodes to seed the in-memory graph with before running"
    )]
    seed_file: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "Run the command against a remote peer instead of a local in-memory graph"
    )]
    peer: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Start this peer's RPC listener and block until shutdown")]
    Serve {
        #[arg(long, value_name = "ADDR", help = "Override the configured listen address")]
        listen: Option<String>,
    },

    #[command(about = "Check that a peer is reachable")]
    Ping,

    #[command(about = "Look up a node by id")]
    Node {
        #[arg(value_name = "NODE-ID")]
        id: String,
    },

    #[command(about = "Run a one-shot query plan")]
    Query(PlanCmd),

    #[command(about = "Run a recur-query plan to its final terminal node set")]
    RecurQuery(PlanCmd),

    #[command(about = "Run an iter-n-query plan to its final round's node set")]
    IterNQuery(PlanCmd),

    #[command(about = "Print a plan's operator tree without running it")]
    Explain {
        #[arg(value_name = "PLAN-FILE")]
        plan_file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct PlanCmd {
    #[arg(value_name = "PLAN-FILE", help = "Path to a JSON-encoded Plan")]
    plan_file: PathBuf,

    #[arg(
        long = "seed",
        value_name = "VAR=NODE-ID",
        action = clap::ArgAction::Append,
        help = "Seed binding for a parameter operator, repeatable (defaults to ROOT-ID=<graph root>)"
    )]
    seeds: Vec<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    plasma::logging::init();
    let cli = Cli::parse();

    let config = match &cli.open.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Serve { listen } => serve(config, cli.open.seed_file.as_deref(), listen).await,
        Command::Ping => ping(&cli.open).await,
        Command::Node { id } => node_by_uuid(&cli.open, config, &id).await,
        Command::Query(cmd) => run_query(&cli.open, config, cmd).await,
        Command::RecurQuery(cmd) => run_recur_query(&cli.open, config, cmd).await,
        Command::IterNQuery(cmd) => run_iter_n_query(&cli.open, config, cmd).await,
        Command::Explain { plan_file } => explain_plan(&plan_file),
    }
}

async fn serve(config: Config, seed_file: Option<&std::path::Path>, listen: Option<String>) -> Result<(), Box<dyn Error>> {
    let graph = InMemoryGraphAdapter::new();
    load_seed_file(&graph, seed_file.or_else(|| config.seed_file.as_deref().map(std::path::Path::new))).await?;

    let mut config = config;
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    let listen_addr = config.listen_addr.clone();
    let facade = Arc::new(PeerFacade::new(Arc::new(graph), Arc::new(HttpPeerLink::new()), config));
    plasma::peer::serve(&listen_addr, facade).await?;
    Ok(())
}

async fn load_seed_file(graph: &InMemoryGraphAdapter, path: Option<&std::path::Path>) -> Result<(), Box<dyn Error>> {
    let Some(path) = path else { return Ok(()) };
    let text = std::fs::read_to_string(path)?;
    let nodes: Vec<Node> = serde_json::from_str(&text)?;
    for node in nodes {
        graph.insert(node).await;
    }
    Ok(())
}

async fn ping(open: &OpenArgs) -> Result<(), Box<dyn Error>> {
    match &open.peer {
        Some(peer_url) => {
            let reply = HttpPeerLink::new().ping(peer_url).await?;
            println!("{reply}");
        }
        None => {
            let facade = local_facade(open, Config::default()).await?;
            println!("{}", facade.ping().await?);
        }
    }
    Ok(())
}

async fn node_by_uuid(open: &OpenArgs, config: Config, id: &str) -> Result<(), Box<dyn Error>> {
    let node_id = NodeId::parse(id).ok_or_else(|| format!("malformed node id `{id}`"))?;
    let node = match &open.peer {
        Some(peer_url) => HttpPeerLink::new().node_by_uuid(peer_url, &node_id).await?,
        None => local_facade(open, config).await?.node_by_uuid(&node_id).await?,
    };
    match node {
        Some(node) => println!("{}", serde_json::to_string_pretty(&node)?),
        None => println!("null"),
    }
    Ok(())
}

async fn run_query(open: &OpenArgs, config: Config, cmd: PlanCmd) -> Result<(), Box<dyn Error>> {
    let plan = read_plan(&cmd.plan_file)?;
    let seeds = parse_seeds(&cmd.seeds)?;
    let records = match &open.peer {
        Some(peer_url) => HttpPeerLink::new().query(peer_url, plan, seeds).await?,
        None => local_facade(open, config).await?.query(plan, seeds).await?,
    };
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn run_recur_query(open: &OpenArgs, config: Config, cmd: PlanCmd) -> Result<(), Box<dyn Error>> {
    let plan = read_plan(&cmd.plan_file)?;
    let ids = match &open.peer {
        Some(peer_url) => {
            let records = HttpPeerLink::new().recur_query(peer_url, plan).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }
        None => local_facade(open, config).await?.recur_query(plan).await?,
    };
    println!("{}", serde_json::to_string_pretty(&ids)?);
    Ok(())
}

async fn run_iter_n_query(open: &OpenArgs, config: Config, cmd: PlanCmd) -> Result<(), Box<dyn Error>> {
    let plan = read_plan(&cmd.plan_file)?;
    match &open.peer {
        Some(peer_url) => {
            let records = HttpPeerLink::new().iter_n_query(peer_url, plan).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        None => {
            let ids = local_facade(open, config).await?.iter_n_query(plan).await?;
            println!("{}", serde_json::to_string_pretty(&ids)?);
        }
    }
    Ok(())
}

fn explain_plan(plan_file: &std::path::Path) -> Result<(), Box<dyn Error>> {
    let plan = read_plan(plan_file)?;
    let tree = explain::explain(&plan);
    print!("{}", explain::render(&tree));
    Ok(())
}

fn read_plan(path: &std::path::Path) -> Result<Plan, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Builds a facade over a fresh in-memory graph, seeded from
/// `--seed-file` if given. Used by every subcommand that omits `--peer`.
async fn local_facade(open: &OpenArgs, config: Config) -> Result<PeerFacade, Box<dyn Error>> {
    let graph = InMemoryGraphAdapter::new();
    load_seed_file(&graph, open.seed_file.as_deref()).await?;
    Ok(PeerFacade::new(Arc::new(graph), Arc::new(NoRemoteQuerier), config))
}

/// Parses `--seed VAR=NODE-ID` flags into a seed map, defaulting to binding
/// `ROOT-ID` to this peer's reserved graph root when none are given.
fn parse_seeds(raw: &[String]) -> Result<BTreeMap<String, Vec<NodeId>>, Box<dyn Error>> {
    if raw.is_empty() {
        let mut seeds = BTreeMap::new();
        seeds.insert("ROOT-ID".to_string(), vec![root_id()]);
        return Ok(seeds);
    }
    let mut seeds: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
    for entry in raw {
        let (var, id) = entry
            .split_once('=')
            .ok_or_else(|| format!("malformed --seed `{entry}`, expected VAR=NODE-ID"))?;
        let node_id = NodeId::parse(id).ok_or_else(|| format!("malformed node id `{id}`"))?;
        seeds.entry(var.to_string()).or_default().push(node_id);
    }
    Ok(seeds)
}
