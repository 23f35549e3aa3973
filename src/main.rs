//! Cassette CLI

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use cassette::codec;
use cassette::config::Config;
use cassette::{Entry, RecordedRequest};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Cassette v{}", env!("CARGO_PKG_VERSION"));
        eprintln!();
        eprintln!("Usage: cassette <command> [options]");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  inspect  <cassette>            List recorded entries");
        eprintln!("  sanitize <cassette> <config>   Re-apply configured sanitizers in place");
        eprintln!("  find     <cassette> <config> <method> <uri>");
        eprintln!("                                 Show the entry a request would replay");
        process::exit(1);
    }

    let command = &args[1];

    let result = match command.as_str() {
        "inspect" => {
            if args.len() < 3 {
                eprintln!("Usage: cassette inspect <cassette>");
                process::exit(1);
            }
            inspect(&PathBuf::from(&args[2]))
        }
        "sanitize" => {
            if args.len() < 4 {
                eprintln!("Usage: cassette sanitize <cassette> <config>");
                process::exit(1);
            }
            sanitize(&PathBuf::from(&args[2]), &PathBuf::from(&args[3]))
        }
        "find" => {
            if args.len() < 6 {
                eprintln!("Usage: cassette find <cassette> <config> <method> <uri>");
                process::exit(1);
            }
            find(
                &PathBuf::from(&args[2]),
                &PathBuf::from(&args[3]),
                &args[4],
                &args[5],
            )
        }
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'cassette' for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn inspect(path: &Path) -> Result<()> {
    let session =
        codec::load(path).with_context(|| format!("Failed to load {}", path.display()))?;

    println!("Cassette: {}", path.display());
    println!("Entries:  {}", session.len());
    println!();
    for entry in session.entries() {
        println!(
            "{:>4}  {:<7} {} -> {}",
            entry.index, entry.request.method, entry.request.uri, entry.response.status
        );
    }

    let variables = session.variables();
    if !variables.is_empty() {
        println!();
        println!("Variables:");
        for (name, value) in variables.iter() {
            println!("  {name} = {value}");
        }
    }

    Ok(())
}

fn sanitize(path: &Path, config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    let pipeline = config.pipeline()?;

    let session =
        codec::load(path).with_context(|| format!("Failed to load {}", path.display()))?;
    session.sanitize_all(&pipeline)?;
    codec::save(&session, path).with_context(|| format!("Failed to save {}", path.display()))?;

    println!(
        "Sanitized {} with {} rules ({} entries kept)",
        path.display(),
        pipeline.len(),
        session.remaining()
    );
    Ok(())
}

fn find(path: &Path, config_path: &Path, method: &str, uri: &str) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    let pipeline = config.pipeline()?;
    let matcher = config.matcher();

    let session =
        codec::load(path).with_context(|| format!("Failed to load {}", path.display()))?;
    let request = Entry::from_request(RecordedRequest {
        method: method.to_string(),
        uri: uri.to_string(),
        ..RecordedRequest::default()
    });
    let found = session.lookup(&request, &matcher, &pipeline, false)?;

    println!(
        "{:>4}  {:<7} {} -> {}",
        found.index, found.request.method, found.request.uri, found.response.status
    );
    Ok(())
}
