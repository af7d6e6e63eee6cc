//! PolyDB interactive shell.

use anyhow::Result;
use clap::Parser as ClapParser;
use polydb::{Config, Database, FsyncPolicy};
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// PolyDB - an embedded multi-model database
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./polydb_data")]
    data_dir: PathBuf,

    /// Buffer pool size in bytes
    #[arg(long, default_value = "4194304")]
    buffer_pool: usize,

    /// Sync the WAL on every commit
    #[arg(long, default_value = "true")]
    sync_commits: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = Config {
        buffer_pool_bytes: args.buffer_pool,
        fsync: if args.sync_commits {
            FsyncPolicy::EveryCommit
        } else {
            FsyncPolicy::Grouped
        },
        ..Default::default()
    };

    let db = if args.data_dir.join("MANIFEST").exists() {
        Database::open_with(&args.data_dir, config)?
    } else {
        Database::create(&args.data_dir, config)?
    };

    println!("PolyDB shell, data directory: {}", args.data_dir.display());
    println!("Type SQL, or .help for commands.");

    let stdin = std::io::stdin();
    let mut out = std::io::stdout();
    loop {
        print!("polydb> ");
        out.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input {
            ".exit" | ".quit" => break,
            ".help" => {
                println!(".tables        list tables");
                println!(".checkpoint    flush pages and truncate the wal");
                println!(".exit          leave the shell");
                continue;
            }
            ".tables" => {
                for table in db.list_tables() {
                    println!("{}", table);
                }
                continue;
            }
            ".checkpoint" => {
                match db.checkpoint() {
                    Ok(()) => println!("ok"),
                    Err(e) => eprintln!("error: {}", e),
                }
                continue;
            }
            _ => {}
        }

        match db.execute(input) {
            Ok(result) => {
                if result.columns.is_empty() {
                    println!("ok ({} rows affected)", result.rows_affected);
                } else {
                    let header: Vec<&str> =
                        result.columns.iter().map(|c| c.name.as_str()).collect();
                    println!("{}", header.join(" | "));
                    for row in &result.rows {
                        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                        println!("{}", cells.join(" | "));
                    }
                    println!("({} rows)", result.rows.len());
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    db.close()?;
    Ok(())
}
