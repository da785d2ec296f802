//! # Spacetime Counter
//!
//! A standalone CLI counter tracker. Every replica is a full node: its own
//! version graph, a heap committing to it, and an endpoint listening on a
//! loopback TCP port. Syncing two replicas fetches and pushes edges over a
//! real connection.
//!
//! ## Object model
//!
//! ```text
//! type Counter, oid = counter name
//!   count  →  counter dimension: concurrent increments add up
//!   label  →  plain dimension: concurrent writes resolve to one winner
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use serde_json::json;
use spacetime_core::{CounterDiff, ObjectState, Schema, TypeSchema};
use spacetime_delta::ResolverRegistry;
use spacetime_graph::{GraphConfig, VersionGraph};
use spacetime_heap::Dataframe;
use spacetime_remote::{Endpoint, Remote, RemoteConfig};
use tokio::net::TcpListener;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const COUNTER: &str = "Counter";

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "spacetime-counter")]
#[command(about = "Replicated counters over spacetime version graphs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: two replicas increment, sync, and converge
    Demo,
    /// Conflict scenario: concurrent updates across 3 replicas, merge-order independence
    Conflict,
    /// Network partition simulation: split, independent work, heal, full convergence
    Partition,
    /// Interactive REPL for manual experimentation
    Interactive,
}

// ─── Replica: a node with its own graph, heap and listener ─────────────────

struct Replica {
    id: String,
    heap: Dataframe,
    endpoint: Arc<Endpoint>,
    addr: SocketAddr,
    links: HashMap<String, Remote>,
}

impl Replica {
    async fn start(id: &str) -> AppResult<Self> {
        let schema = Schema::new().with_type(
            TypeSchema::new(COUNTER)
                .custom_dimension("count", Arc::new(CounterDiff))
                .dimension("label"),
        );
        let graph = Arc::new(VersionGraph::with_resolvers(
            id,
            GraphConfig::default(),
            schema,
            ResolverRegistry::new(),
        ));
        let endpoint = Endpoint::new(Arc::clone(&graph), RemoteConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(Arc::clone(&endpoint).serve(listener));
        Ok(Replica {
            id: id.to_string(),
            heap: Dataframe::new(format!("{}-heap", id), graph),
            endpoint,
            addr,
            links: HashMap::new(),
        })
    }

    fn value(&self, counter: &str) -> i64 {
        self.heap
            .read_dimension(COUNTER, counter, "count")
            .and_then(|value| value.as_i64())
            .unwrap_or(0)
    }

    fn label(&self, counter: &str) -> Option<String> {
        self.heap
            .read_dimension(COUNTER, counter, "label")
            .and_then(|value| value.as_str().map(str::to_string))
    }

    /// Counter names present in the local copy.
    fn counter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .heap
            .read_all(COUNTER)
            .into_iter()
            .map(|object| object.oid)
            .collect();
        names.sort();
        names
    }

    fn snapshot(&self) -> BTreeMap<String, (i64, Option<String>)> {
        self.counter_names()
            .into_iter()
            .map(|name| {
                let entry = (self.value(&name), self.label(&name));
                (name, entry)
            })
            .collect()
    }

    /// Add `amount` to a counter, creating it on first use.
    fn increment(&self, counter: &str, amount: i64) -> AppResult<()> {
        self.heap.checkout()?;
        if self.heap.read_one(COUNTER, counter).is_some() {
            let next = self.value(counter) + amount;
            self.heap.write_dimension(COUNTER, counter, "count", json!(next))?;
        } else {
            self.heap
                .add(ObjectState::new(COUNTER, counter).with_dimension("count", json!(amount)))?;
        }
        self.heap.commit()?;
        Ok(())
    }

    fn decrement(&self, counter: &str, amount: i64) -> AppResult<()> {
        self.increment(counter, -amount)
    }

    fn set_label(&self, counter: &str, label: &str) -> AppResult<()> {
        self.heap.checkout()?;
        self.heap.write_dimension(COUNTER, counter, "label", json!(label))?;
        self.heap.commit()?;
        Ok(())
    }

    /// Fetch from `other`, push back, and refresh both local copies.
    async fn sync_with(&mut self, other: &Replica) -> AppResult<()> {
        if !self.links.contains_key(&other.id) {
            let remote = Remote::connect(Arc::clone(&self.endpoint), other.addr).await?;
            self.links.insert(other.id.clone(), remote);
        }
        let remote = self
            .links
            .get(&other.id)
            .ok_or("link vanished")?;
        remote.sync().await?;
        self.heap.checkout()?;
        other.heap.checkout()?;
        Ok(())
    }

    fn head(&self) -> String {
        self.endpoint.graph().head().to_string()
    }
}

// ─── Output ───────────────────────────────────────────────────────────────

fn header(text: &str) {
    println!("\n{}", text.bold().bright_white());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn show_replica(replica: &Replica) {
    let head = replica.head();
    let counters: Vec<String> = replica
        .snapshot()
        .into_iter()
        .map(|(name, (value, label))| match label {
            Some(label) => format!("{}={} ({})", name, value, label),
            None => format!("{}={}", name, value),
        })
        .collect();
    println!(
        "  {} @ {}  {}",
        replica.id.bright_yellow(),
        head.get(..12).unwrap_or(head.as_str()).dimmed(),
        counters.join(", ")
    );
}

fn convergence_check(replicas: &[&Replica]) -> bool {
    let Some((base, rest)) = replicas.split_first() else {
        return true;
    };
    let expected = base.snapshot();
    let head = base.head();
    rest.iter().all(|r| r.snapshot() == expected && r.head() == head)
}

fn convergence_result(converged: bool) {
    if converged {
        println!("  {} converged: same head, same values", "✓".bright_green().bold());
    } else {
        println!("  {} replicas differ", "✗".bright_red().bold());
    }
}

// ─── Scenarios ─────────────────────────────────────────────────────────────

/// Two replicas increment the same counters independently, then sync.
async fn run_demo() -> AppResult<()> {
    header("Demo: two replicas, one sync");
    let mut alice = Replica::start("alice").await?;
    let bob = Replica::start("bob").await?;
    alice.increment("page_views", 0)?;
    alice.increment("likes", 0)?;
    alice.sync_with(&bob).await?;

    alice.increment("page_views", 5)?;
    alice.increment("page_views", 3)?;
    bob.increment("page_views", 10)?;
    bob.increment("likes", 2)?;
    show_replica(&alice);
    show_replica(&bob);

    alice.sync_with(&bob).await?;
    show_replica(&alice);
    show_replica(&bob);
    convergence_result(convergence_check(&[&alice, &bob]));
    step(&format!("page_views = {} (expected 18)", alice.value("page_views")));
    step(&format!("likes = {} (expected 2)", alice.value("likes")));
    Ok(())
}

/// Concurrent edits on three replicas, synced in a chain. Counts add up,
/// the label resolves to one writer everywhere and a repeated sync is a
/// no-op.
async fn run_conflict() -> AppResult<()> {
    header("Conflict: concurrent edits on three replicas");
    let mut r1 = Replica::start("node-1").await?;
    let mut r2 = Replica::start("node-2").await?;
    let r3 = Replica::start("node-3").await?;
    r1.increment("score", 0)?;
    r1.increment("bonus", 0)?;
    r1.set_label("score", "initial")?;
    r1.sync_with(&r2).await?;
    r1.sync_with(&r3).await?;

    r1.increment("score", 100)?;
    r1.decrement("score", 10)?;
    r1.set_label("score", "from node-1")?;
    r2.increment("score", 50)?;
    r2.increment("bonus", 25)?;
    r2.set_label("score", "from node-2")?;
    r3.increment("score", 75)?;
    r3.decrement("score", 5)?;
    r3.increment("bonus", 10)?;

    r2.sync_with(&r3).await?;
    r1.sync_with(&r2).await?;
    r2.sync_with(&r3).await?;
    show_replica(&r1);
    convergence_result(convergence_check(&[&r1, &r2, &r3]));
    step(&format!("score = {} (expected 210)", r1.value("score")));
    step(&format!("bonus = {} (expected 35)", r1.value("bonus")));

    let (before, head) = (r1.snapshot(), r1.head());
    r1.sync_with(&r3).await?;
    let unchanged = r1.snapshot() == before && r1.head() == head;
    step(&format!("repeated sync unchanged: {}", unchanged));
    Ok(())
}

/// Two groups of two replicas work apart, then a single bridge sync and one
/// hop inside each group bring all four together.
async fn run_partition() -> AppResult<()> {
    header("Partition: split, work apart, heal");
    let mut east1 = Replica::start("east-1").await?;
    let mut east2 = Replica::start("east-2").await?;
    let mut west1 = Replica::start("west-1").await?;
    let west2 = Replica::start("west-2").await?;
    east1.increment("requests", 100)?;
    east1.increment("errors", 0)?;
    east1.increment("latency_spikes", 0)?;
    east1.sync_with(&east2).await?;
    east1.sync_with(&west1).await?;
    west1.sync_with(&west2).await?;

    east1.increment("requests", 50)?;
    east1.increment("errors", 3)?;
    east2.increment("requests", 30)?;
    east2.decrement("errors", 1)?;
    east1.sync_with(&east2).await?;
    west1.increment("requests", 200)?;
    west1.increment("latency_spikes", 7)?;
    west2.increment("requests", 150)?;
    west2.increment("latency_spikes", 3)?;
    west1.sync_with(&west2).await?;
    show_replica(&east1);
    show_replica(&west1);

    east1.sync_with(&west1).await?;
    east2.sync_with(&east1).await?;
    west1.sync_with(&west2).await?;
    show_replica(&east1);
    convergence_result(convergence_check(&[&east1, &east2, &west1, &west2]));
    step(&format!("requests = {} (expected 530)", east1.value("requests")));
    step(&format!("errors = {} (expected 2)", east1.value("errors")));
    step(&format!("latency_spikes = {} (expected 10)", east1.value("latency_spikes")));
    Ok(())
}

// ─── Interactive REPL ──────────────────────────────────────────────────────

fn usage(text: &str) {
    println!("  {} Usage: {}", "!".bright_red(), text);
}

fn unknown(name: &str) {
    println!("  {} Unknown replica '{}'", "!".bright_red(), name);
}

fn print_help() {
    println!("  replica <name> | inc <r> <c> [n] | dec <r> <c> [n] | label <r> <c> <text>");
    println!("  sync <a> <b> | show <r> | list | check <r1> <r2> | quit");
}

async fn run_interactive() -> AppResult<()> {
    header("Spacetime counter REPL");

    let mut replicas: HashMap<String, Replica> = HashMap::new();
    print_help();

    loop {
        print!("{}", "spacetime> ".bright_cyan().bold());
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some(command) = parts.first() else {
            continue;
        };

        let outcome: AppResult<()> = match *command {
            "replica" | "r" => match parts.get(1) {
                None => Ok(usage("replica <name>")),
                Some(name) if replicas.contains_key(*name) => {
                    println!("  {} Replica '{}' already exists", "!".bright_yellow(), name);
                    Ok(())
                }
                Some(name) => match Replica::start(name).await {
                    Ok(replica) => {
                        step(&format!("Started replica '{}' on {}", name, replica.addr));
                        replicas.insert(name.to_string(), replica);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
            },

            "inc" | "+" | "dec" | "-" => {
                if parts.len() < 3 {
                    usage("inc|dec <replica> <counter> [amount]");
                    continue;
                }
                let amount: i64 = parts.get(3).and_then(|s| s.parse().ok()).unwrap_or(1);
                let amount = if matches!(*command, "dec" | "-") { -amount } else { amount };
                match replicas.get(parts[1]) {
                    Some(replica) => replica.increment(parts[2], amount).map(|()| {
                        step(&format!("{}.{} += {} → {}", parts[1], parts[2], amount, replica.value(parts[2])));
                    }),
                    None => Ok(unknown(parts[1])),
                }
            }

            "label" => {
                if parts.len() < 4 {
                    usage("label <replica> <counter> <text>");
                    continue;
                }
                let text = parts[3..].join(" ");
                match replicas.get(parts[1]) {
                    Some(replica) => replica.set_label(parts[2], &text),
                    None => Ok(unknown(parts[1])),
                }
            }

            "sync" => {
                if parts.len() < 3 {
                    usage("sync <a> <b>");
                    continue;
                }
                let (a, b) = (parts[1], parts[2]);
                if a == b || !replicas.contains_key(b) {
                    unknown(b);
                    continue;
                }
                match replicas.remove(a) {
                    None => Ok(unknown(a)),
                    Some(mut left) => {
                        let result = match replicas.get(b) {
                            Some(right) => left.sync_with(right).await,
                            None => Ok(()),
                        };
                        replicas.insert(a.to_string(), left);
                        result.map(|()| step(&format!("{} <-> {}", a, b)))
                    }
                }
            }

            "show" | "s" => match parts.get(1).map(|name| (name, replicas.get(*name))) {
                None => Ok(usage("show <name>")),
                Some((_, Some(replica))) => Ok(show_replica(replica)),
                Some((name, None)) => Ok(unknown(name)),
            },

            "list" | "ls" => {
                if replicas.is_empty() {
                    println!("  {}", "(no replicas)".dimmed());
                }
                let mut names: Vec<&String> = replicas.keys().collect();
                names.sort();
                for name in names {
                    show_replica(&replicas[name]);
                }
                Ok(())
            }

            "check" => {
                if parts.len() < 3 {
                    usage("check <r1> <r2>");
                    continue;
                }
                match (replicas.get(parts[1]), replicas.get(parts[2])) {
                    (Some(r1), Some(r2)) => Ok(convergence_result(convergence_check(&[r1, r2]))),
                    _ => {
                        println!("  {} One or both replicas not found", "!".bright_red());
                        Ok(())
                    }
                }
            }

            "quit" | "exit" | "q" => {
                break;
            }

            "help" | "h" | "?" => Ok(print_help()),

            other => {
                println!("  {} Unknown command '{}', type 'help'", "?".bright_yellow(), other);
                Ok(())
            }
        };

        if let Err(e) = outcome {
            println!("  {} {}", "✗".bright_red(), e.to_string().bright_red());
        }
    }
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Demo => run_demo().await,
        Commands::Conflict => run_conflict().await,
        Commands::Partition => run_partition().await,
        Commands::Interactive => run_interactive().await,
    };
    if let Err(e) = result {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}
