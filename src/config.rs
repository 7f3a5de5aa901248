//! Runtime configuration, resolved from CLI flags and environment.

use std::path::{Path, PathBuf};

use clap::Parser;
use dotenv::dotenv;

/// Pari-mutuel poll betting backend
#[derive(Parser, Debug, Clone)]
#[command(name = "pollbet", version)]
pub struct Args {
    /// Path to the SQLite database file
    #[arg(long, env = "POLLBET_DB_PATH")]
    pub db_path: Option<String>,

    /// Address the API server binds to
    #[arg(long, env = "POLLBET_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub bind: String,
}

impl Config {
    pub fn from_args(args: Args) -> Self {
        Self {
            db_path: resolve_data_path(args.db_path, "pollbet.db"),
            bind: args.bind,
        }
    }
}

pub fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate directory so
    // running with --manifest-path from elsewhere still finds .env.
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}

fn resolve_data_path(value: Option<String>, default_filename: &str) -> String {
    // Anchor defaults and relative paths to the crate directory, not the
    // caller's cwd, so running from elsewhere doesn't create a stray DB.
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = value.filter(|v| !v.trim().is_empty()) else {
        return base.join(default_filename).to_string_lossy().to_string();
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }
    base.join(p).to_string_lossy().to_string()
}
