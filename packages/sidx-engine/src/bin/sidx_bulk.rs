//! sidx-bulk - build an index over a JSON-lines file and report on it.
//!
//! Usage:
//!   sidx-bulk <docs.jsonl> --key a,b.c [--unique] [--drop-dups]
//!             [--config sidx.json] [--temp-dir /tmp/sidx]
//!
//! Every line is one document; its 1-based line number is its record id.
//! The index is built in memory through the external sorter and the
//! bottom-up builder, validated, and summarized as JSON on stdout.
//! SIGINT interrupts the build.

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context};
use serde_json::json;

use sidx::{
    EngineConfig, FieldPathExtractor, IndexAccessMethod, IndexCatalogEntry, IndexSpec,
    InsertDeleteOptions, LocalOperationContext, MemoryStore, OperationContext, RecordId,
};

fn print_usage() {
    eprintln!("Usage: sidx-bulk <docs.jsonl> --key <path[,path...]> [--unique] [--drop-dups]");
    eprintln!("                 [--config <file>] [--temp-dir <dir>]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <docs.jsonl>   One JSON document per line");
    eprintln!("  --key          Comma-separated key pattern, all ascending");
    eprintln!("  --unique       Build a unique index");
    eprintln!("  --drop-dups    With --unique, skip and report duplicate records");
    eprintln!("  --config       Engine config (JSON)");
    eprintln!("  --temp-dir     Spill directory for the external sort");
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sidx=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("sidx-bulk {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    if args.len() < 2 || args[1].starts_with("--") {
        print_usage();
        std::process::exit(1);
    }

    let docs_path = PathBuf::from(&args[1]);
    let Some(key_arg) = flag_value(&args, "--key") else {
        bail!("--key is required");
    };
    let paths: Vec<&str> = key_arg.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    let unique = args.iter().any(|a| a == "--unique");
    let drop_dups = args.iter().any(|a| a == "--drop-dups");

    let mut config = match flag_value(&args, "--config") {
        Some(path) => EngineConfig::load(path.as_ref())
            .with_context(|| format!("loading config {}", path))?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = flag_value(&args, "--temp-dir") {
        config.bulk_sort.temp_dir = PathBuf::from(dir);
    }

    let spec = IndexSpec::ascending("sidx_bulk.docs", &paths, unique)?;
    let entry = Arc::new(IndexCatalogEntry::building(spec.clone()));
    let store = MemoryStore::new(&spec);
    let am = IndexAccessMethod::new(
        Arc::clone(&entry),
        Arc::new(store.clone()),
        Arc::new(FieldPathExtractor::new(&spec)),
        config,
    );

    let ctx = LocalOperationContext::new();
    let interrupt = ctx.interrupt_flag();
    let mut signals = signal_hook::iterator::Signals::new([signal_hook::consts::SIGINT])
        .context("registering signal handler")?;
    thread::spawn(move || {
        for sig in signals.forever() {
            eprintln!("[sidx-bulk] Received signal {}, interrupting build", sig);
            interrupt.store(true, std::sync::atomic::Ordering::Release);
        }
    });

    // Phase 1: extract and sort.
    let file = std::fs::File::open(&docs_path)
        .with_context(|| format!("opening {}", docs_path.display()))?;
    let options = InsertDeleteOptions { dups_allowed: !unique };
    let mut bulk = am.initiate_bulk();
    let mut documents: u64 = 0;
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid JSON", i + 1))?;
        bulk.insert(&doc, RecordId::new(i as u64 + 1), &options)
            .with_context(|| format!("line {}", i + 1))?;
        documents += 1;
    }
    let spilled_runs = bulk.spilled_runs();
    eprintln!(
        "[sidx-bulk] Sorted {} keys from {} documents ({} spilled runs)",
        bulk.keys_inserted(),
        documents,
        spilled_runs
    );

    // Phase 2: bottom-up load.
    let mut dropped = BTreeSet::new();
    let sink = if unique && drop_dups { Some(&mut dropped) } else { None };
    let stats = am.commit_bulk(&ctx, bulk, true, !unique, sink)?;
    entry.set_ready();

    let report = am.validate(&ctx, true)?;
    if !report.is_valid() {
        bail!("index failed validation: {:?}", report.errors);
    }

    let mut store_stats = serde_json::Map::new();
    am.append_custom_stats(&ctx, &mut store_stats, 1.0);

    let summary = json!({
        "index": spec.index_namespace(),
        "documents": documents,
        "spilled_runs": spilled_runs,
        "multikey": entry.is_multikey(),
        "commit": stats,
        "progress": ctx.progress().map(|pm| pm.snapshot()),
        "dropped_record_ids": dropped.iter().map(|r| r.get()).collect::<Vec<_>>(),
        "validate": report,
        "store": store_stats,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
