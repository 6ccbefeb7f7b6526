//! lxref-cli: CLI entry point for the lxref source cross-referencer.

use clap::{Parser, Subcommand};
use lxref_core::{Family, Locations, ProjectConfig};
use lxref_index::{UpdateOptions, Updater};
use lxref_query::QueryEngine;
use lxref_repo::GitRepo;
use lxref_storage::Store;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

#[derive(Parser)]
#[command(name = "lxref", about = "Source-code cross-referencer over tagged releases")]
#[command(version, propagate_version = true)]
struct Cli {
    /// External repository store (overrides LXREF_REPO)
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Database directory (overrides LXREF_DATA)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Project name under LXREF_ROOT in multi-project mode
    #[arg(long, global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every tag not yet marked indexed
    Update {
        /// Worker pool size (minimum 5)
        #[arg(default_value_t = 10, value_parser = clap::value_parser!(u64).range(5..=512))]
        jobs: u64,
    },

    /// Query the cross-reference database for one tag
    Query {
        /// Release tag to query
        tag: String,

        #[command(subcommand)]
        what: QueryWhat,
    },

    /// List known tags and their indexed state
    Tags,

    /// Show database statistics
    Stats {
        /// Also sweep the cross-map invariants
        #[arg(long)]
        check: bool,
    },
}

#[derive(Subcommand)]
enum QueryWhat {
    /// Annotations of one file in the tag's tree
    File {
        /// Path within the tag
        path: String,
    },

    /// Definitions and references of one identifier
    Ident {
        /// Identifier name
        name: String,

        /// Language family (C, K, D, M)
        family: Family,

        /// Emit JSON instead of the line-oriented form
        #[arg(long)]
        json: bool,
    },

    /// Identifiers defined in the tag, by prefix
    Search {
        /// Identifier prefix
        prefix: String,

        /// Maximum results
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    // Progress and diagnostics go to stderr; stdout carries only
    // machine-readable output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lxref=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let locations = Locations::resolve(cli.repo, cli.data, cli.project.as_deref())?;
    let config = ProjectConfig::load_or_default(&locations.config_path());

    let repo = GitRepo::open(&locations.repo_dir)?.with_tag_prefix(config.tag_prefix.clone());
    let store = Store::open(&locations.data_dir.join("xref.db"))?;

    match cli.command {
        Commands::Update { jobs } => cmd_update(&repo, &store, &config, jobs as usize),
        Commands::Query { tag, what } => cmd_query(&repo, &store, &tag, what),
        Commands::Tags => cmd_tags(&store),
        Commands::Stats { check } => cmd_stats(&store, check),
    }
}

fn cmd_update(
    repo: &GitRepo,
    store: &Store,
    config: &ProjectConfig,
    jobs: usize,
) -> anyhow::Result<()> {
    let opts = UpdateOptions {
        workers: jobs,
        ..UpdateOptions::from_config(config)
    };
    let updater = Updater::new(repo, store, config, opts);
    let cancel = AtomicBool::new(false);

    let summary = updater.run_with(&cancel, |report| {
        // One completion line per committed tag.
        println!(
            "tag\t{}\t{}\t{}",
            report.tag, report.new_blobs, report.partial
        );
    })?;

    tracing::info!(
        "done: {} indexed, {} already current, {} failed",
        summary.indexed.len(),
        summary.skipped,
        summary.failed.len(),
    );
    let partial = store.partial_blobs()?;
    if !partial.is_empty() {
        tracing::warn!("{} blobs remain partial: {:?}", partial.len(), partial);
    }
    if !summary.ok() {
        for (tag, reason) in &summary.failed {
            tracing::error!("{tag}: {reason}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_query(repo: &GitRepo, store: &Store, tag: &str, what: QueryWhat) -> anyhow::Result<()> {
    let engine = QueryEngine::new(store, repo);
    match what {
        QueryWhat::File { path } => {
            let view = engine.file(tag, &path)?;
            for annotation in &view.annotations {
                match annotation.kind {
                    Some(kind) => println!("{}\t{}\t{}", annotation.line, kind, annotation.ident),
                    None => println!("{}\tref\t{}", annotation.line, annotation.ident),
                }
            }
        }
        QueryWhat::Ident { name, family, json } => {
            let doc = engine.ident(tag, &name, family)?;
            if json {
                println!("{}", serde_json::to_string(&doc)?);
            } else {
                for def in &doc.definitions {
                    println!("def\t{}\t{}\t{}", def.path, def.line, def.kind);
                }
                for reference in &doc.references {
                    println!("ref\t{}\t{}", reference.path, reference.line);
                }
            }
        }
        QueryWhat::Search { prefix, limit } => {
            for ident in engine.search(tag, &prefix, limit)? {
                println!("{ident}");
            }
        }
    }
    Ok(())
}

fn cmd_tags(store: &Store) -> anyhow::Result<()> {
    for tag in store.tags()? {
        let state = if tag.indexed { "indexed" } else { "pending" };
        println!("{}\t{}", tag.name, state);
    }
    Ok(())
}

fn cmd_stats(store: &Store, check: bool) -> anyhow::Result<()> {
    let stats = store.stats()?;
    println!("blobs\t{}", stats.blobs);
    println!("paths\t{}", stats.paths);
    println!("tags\t{}\t({} indexed)", stats.tags, stats.indexed_tags);
    println!("defs\t{}\t({} idents)", stats.defs, stats.def_idents);
    println!("refs\t{}", stats.refs);
    println!("partial\t{}", stats.partial_blobs);
    if check {
        store.check_invariants()?;
        tracing::info!("invariants hold");
    }
    Ok(())
}
