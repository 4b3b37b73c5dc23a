//! Timegraph CLI - inspect a temporal knowledge graph database

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use timegraph::config::{default_database_path_in, ensure_db_dir, load_config};
use timegraph::search::DEFAULT_SEARCH_LIMIT;
use timegraph::{EngineConfig, GraphEngine, RelationKey, RelationType, SemanticSearchOptions, ui};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "timegraph")]
#[command(version)]
#[command(about = "Temporal knowledge graph store - inspect entities, history and embeddings")]
#[command(long_about = r#"
Timegraph keeps a versioned knowledge graph of entities and relations.
This tool reads a graph database for maintenance and debugging:
  • Current, point-in-time and confidence-decayed graph dumps
  • Version history of entities and relations
  • Vector search diagnostics and entities missing embeddings

Example usage:
  timegraph stats
  timegraph history --name "Login"
  timegraph graph --at 1700000000000
  timegraph graph --decayed --half-life 14
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the database file (defaults to .timegraph/graph.db)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Path to the engine config file (defaults to timegraph.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show row counts
    Stats,

    /// Show every version of an entity, or of a relation when --to is given
    History {
        /// Entity name (relation source with --to)
        #[arg(short, long)]
        name: String,

        /// Relation target
        #[arg(long)]
        to: Option<String>,

        /// Relation type (depends_on, implements, part_of, relates_to)
        #[arg(long = "type", default_value = "depends_on")]
        relation_type: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump the graph as JSON
    Graph {
        /// Point in time, in epoch milliseconds
        #[arg(long, conflicts_with = "decayed")]
        at: Option<i64>,

        /// Apply confidence decay to relations
        #[arg(long)]
        decayed: bool,

        /// Half-life in days for --decayed
        #[arg(long)]
        half_life: Option<f64>,

        /// Confidence floor for --decayed
        #[arg(long)]
        min_confidence: Option<f64>,
    },

    /// Text search over entity names and observations
    Search {
        /// Search query
        #[arg(short, long)]
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },

    /// Report vector index health
    Diagnose {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List live entities without an embedding
    Missing {
        /// Maximum number of entities
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = load_config(cli.config.as_deref())?.unwrap_or_default();
    let database = match cli.database {
        Some(path) => path,
        None => default_database_path_in(&std::env::current_dir()?),
    };
    let engine = open_engine(&database, config)?;

    match cli.command {
        Commands::Stats => {
            let stats = engine.stats()?;
            println!("📊 Timegraph Statistics ({})", database.display());
            println!("{}", ui::stats_table(&stats));
        }

        Commands::History { name, to, relation_type, format } => match to {
            Some(to) => {
                let relation_type: RelationType = relation_type.parse()?;
                let key = RelationKey::new(name, to, relation_type);
                let history = engine.get_relation_history(&key)?;
                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&history)?);
                } else if history.is_empty() {
                    println!("∅ No history for {}", key);
                } else {
                    println!("{}", ui::relation_history_table(&history));
                }
            }
            None => {
                let history = engine.get_entity_history(&name)?;
                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&history)?);
                } else if history.is_empty() {
                    println!("∅ No history for {}", name);
                } else {
                    println!("{}", ui::entity_history_table(&history));
                }
            }
        },

        Commands::Graph { at, decayed, half_life, min_confidence } => {
            let graph = match at {
                Some(timestamp) => engine.get_graph_at_time(timestamp)?,
                None if decayed => engine.get_decayed_graph(None, half_life, min_confidence)?,
                None => engine.read_graph()?,
            };
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }

        Commands::Search { query, limit } => {
            let options = SemanticSearchOptions::default().with_limit(limit);
            let result = engine.semantic_search(&query, &options)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Diagnose { format } => {
            let report = engine.diagnose_vector_search()?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", ui::diagnostics_table(&report));
            }
        }

        Commands::Missing { limit } => {
            let missing = engine.entities_missing_embeddings(limit)?;
            if missing.is_empty() {
                println!("✅ Every live entity has an embedding.");
            } else {
                for entity in missing {
                    println!("- [{}] {} ({})", entity.entity_type, entity.name, entity.entity_id);
                }
            }
        }
    }

    Ok(())
}

fn open_engine(database: &std::path::Path, config: EngineConfig) -> anyhow::Result<GraphEngine> {
    ensure_db_dir(database)?;
    let engine = GraphEngine::open(database, config)?;
    tracing::debug!("Opened {} ({} dimensions)", database.display(), engine.config().dimensions);
    Ok(engine)
}
