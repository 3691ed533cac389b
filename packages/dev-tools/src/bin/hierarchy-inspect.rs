//! Hierarchy Inspector
//!
//! Opens a hierarchy database, optionally imports a legacy adjacency list and
//! rebuilds a tenant, then prints the tenant's depth-indented preorder listing
//! and the verification verdict.
//!
//! # Usage
//!
//! ```bash
//! # Print tenant 1
//! cargo run --bin hierarchy-inspect -- ./data/hierarchy.db 1
//!
//! # Import a JSON array of {"id", "title", "parentId"} rows, then rebuild
//! cargo run --bin hierarchy-inspect -- ./data/hierarchy.db 1 --import legacy.json --rebuild
//!
//! # Machine-readable listing
//! cargo run --bin hierarchy-inspect -- ./data/hierarchy.db 1 --json
//! ```
//!
//! # Configuration
//!
//! Reads `HIERARCHY_*` environment variables (see `HierarchyConfig::from_env`).
//! Log verbosity follows `RUST_LOG`, defaulting to `info`.

use anyhow::{bail, Context};
use nodespace_hierarchy::{HierarchyConfig, HierarchyService, LegacyNode, TenantId};
use std::path::PathBuf;

struct Args {
    db_path: PathBuf,
    tenant: TenantId,
    import: Option<PathBuf>,
    rebuild: bool,
    json: bool,
}

fn usage() -> &'static str {
    "usage: hierarchy-inspect <db-path> <tenant> [--import <file.json>] [--rebuild] [--json]"
}

fn parse_args() -> anyhow::Result<Args> {
    let mut positional = Vec::new();
    let mut import = None;
    let mut rebuild = false;
    let mut json = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rebuild" => rebuild = true,
            "--json" => json = true,
            "--import" => {
                let file = args.next().context("--import needs a file path")?;
                import = Some(PathBuf::from(file));
            }
            "-h" | "--help" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown flag '{}'\n{}", other, usage()),
            _ => positional.push(arg),
        }
    }

    let [db_path, tenant]: [String; 2] = positional
        .try_into()
        .map_err(|_| anyhow::anyhow!("{}", usage()))?;

    Ok(Args {
        db_path: PathBuf::from(db_path),
        tenant: tenant
            .parse()
            .with_context(|| format!("tenant must be an integer, got '{}'", tenant))?,
        import,
        rebuild,
        json,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let config = HierarchyConfig::from_env();
    tracing::debug!("Using {:?}", config);

    let service = HierarchyService::new(args.db_path.clone(), config)
        .await
        .with_context(|| format!("Failed to open {}", args.db_path.display()))?;

    if let Some(path) = &args.import {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let nodes: Vec<LegacyNode> = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a JSON array of legacy nodes", path.display()))?;
        let imported = service.import_legacy(args.tenant, nodes).await?;
        eprintln!("📥 Imported {} legacy node(s)", imported);
    }

    if args.rebuild {
        let report = service.rebuild(args.tenant).await?;
        eprintln!(
            "🔧 Rebuilt tenant {}: {} node(s), {} root(s), {} rewritten",
            report.tenant, report.nodes, report.roots, report.rewritten
        );
    }

    let entries = service.list_tree(args.tenant).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!(
                "{}{} {}",
                "  ".repeat(entry.depth),
                entry.title(),
                entry.node.bounds
            );
        }
    }

    match service.verify(args.tenant).await {
        Ok(count) => {
            eprintln!("✅ Tenant {}: {} node(s), index valid", args.tenant, count);
            Ok(())
        }
        Err(e) if e.is_corruption() => {
            eprintln!("❌ {}", e);
            eprintln!("   Re-derive bounds from parent pointers with --rebuild");
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}
