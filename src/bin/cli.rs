//! Interactive REPL for `vectrsql`. A thin rustyline-driven shell over
//! `Database::execute`, kept around for manual poking-around.

use std::path::PathBuf;

use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Table as ComfyTable};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use vectrsql::Database;

/// vectrsql interactive shell
#[derive(Parser, Debug)]
#[command(name = "vectrsql")]
#[command(about = "Embeddable hybrid vector-relational database", long_about = None)]
struct Args {
    /// Directory for the write-ahead log (enables durability + crash recovery on startup).
    #[arg(long)]
    wal_dir: Option<PathBuf>,

    /// Directory for full-database snapshots (`save_all`/`load_all`).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Load the snapshot in `--data-dir` before accepting input.
    #[arg(long)]
    load: bool,

    /// Save a snapshot to `--data-dir` on exit.
    #[arg(long)]
    autosave: bool,

    /// HNSW neighbor degree for `init_vector_search`.
    #[arg(long, default_value_t = 16)]
    m: usize,

    /// HNSW build-time beam width for `init_vector_search`.
    #[arg(long, default_value_t = 200)]
    ef_construction: usize,
}

fn main() {
    let args = Args::parse();
    let db = Database::new();
    db.init_vector_search(args.m, args.ef_construction);

    if let Some(dir) = &args.data_dir {
        db.enable_persistence(dir, args.autosave);
        if args.load {
            if let Err(e) = db.load_all(dir) {
                eprintln!("warning: failed to load snapshot from {}: {e}", dir.display());
            }
        }
    }

    if let Some(dir) = &args.wal_dir {
        if let Err(e) = db.enable_wal(dir) {
            eprintln!("fatal: failed to enable WAL at {}: {e}", dir.display());
            std::process::exit(1);
        }
    }

    println!("vectrsql — type SQL statements, 'help' for meta-commands, 'quit' to exit.");

    let mut rl = DefaultEditor::new().expect("failed to initialize line editor");
    let history_path = dirs_history_path();
    if let Some(path) = &history_path {
        let _ = rl.load_history(path);
    }

    loop {
        match rl.readline("vectrsql> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match line {
                    "quit" | "exit" | "\\q" => break,
                    "help" | "\\?" | "\\h" => {
                        print_help();
                        continue;
                    }
                    _ => {}
                }

                match db.execute(line) {
                    Ok(result) => print_result(&result),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        let _ = rl.save_history(path);
    }

    if let Err(e) = db.close() {
        eprintln!("error during shutdown: {e}");
    }
}

fn dirs_history_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".vectrsql_history"))
}

fn print_help() {
    println!("Meta-commands:");
    println!("  quit, exit, \\q     - Exit the shell");
    println!("  help, \\?, \\h       - Show this help");
    println!();
    println!("SQL: CREATE TABLE, CREATE INDEX, INSERT, SELECT, UPDATE, DELETE,");
    println!("     ALTER TABLE, DROP TABLE, DROP INDEX, BEGIN/COMMIT/ROLLBACK, VACUUM.");
    println!("     SELECT ... ORDER BY SIMILARITY TO \"text\" LIMIT k  for vector search.");
}

fn print_result(result: &vectrsql::QueryResult) {
    if result.columns.is_empty() {
        println!("OK");
        return;
    }
    let mut table = ComfyTable::new();
    table.load_preset(UTF8_FULL).set_header(result.columns.clone());
    for row in &result.rows {
        table.add_row(row.iter().map(|v| v.to_string()));
    }
    println!("{table}");
    println!("({} row{})", result.rows.len(), if result.rows.len() == 1 { "" } else { "s" });
}
