//! Seed-sweeping DST runner for write-stream sessions.
//!
//! Usage: write-stream-dst [start_seed] [count] [calm|moderate|chaos] [--sessions N] [--json]
//!
//! Exits with status 1 if any seed violates an invariant; rerun that seed
//! alone to reproduce it exactly.

use append_stream::observability::{init_logging, LogFormat};
use append_stream::write::{run_dst_batch, summarize_batch, WriteStreamDSTConfig};
use std::env;

struct Args {
    start_seed: u64,
    count: usize,
    mode: String,
    sessions: usize,
    json: bool,
}

impl Args {
    fn parse() -> Result<Args, String> {
        let mut positional = Vec::new();
        let mut sessions = 50;
        let mut json = false;

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--json" => json = true,
                "--sessions" => {
                    let value = args.next().ok_or("--sessions needs a value")?;
                    sessions = value
                        .parse()
                        .map_err(|_| format!("invalid session count: {}", value))?;
                }
                _ => positional.push(arg),
            }
        }

        let start_seed = match positional.first() {
            Some(s) => s.parse().map_err(|_| format!("invalid seed: {}", s))?,
            None => 0,
        };
        let count = match positional.get(1) {
            Some(s) => s.parse().map_err(|_| format!("invalid count: {}", s))?,
            None => 100,
        };
        let mode = positional
            .get(2)
            .cloned()
            .unwrap_or_else(|| "moderate".to_string());

        Ok(Args {
            start_seed,
            count,
            mode,
            sessions,
            json,
        })
    }

    fn config_fn(&self) -> Result<fn(u64) -> WriteStreamDSTConfig, String> {
        match self.mode.as_str() {
            "calm" => Ok(WriteStreamDSTConfig::calm),
            "moderate" => Ok(WriteStreamDSTConfig::moderate),
            "chaos" => Ok(WriteStreamDSTConfig::chaos),
            other => Err(format!(
                "Unknown mode: {}. Use 'calm', 'moderate', or 'chaos'",
                other
            )),
        }
    }
}

// Fault configuration is thread-local, so the whole batch runs on one thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let format = env::var("LOG_FORMAT")
        .ok()
        .and_then(|f| f.parse().ok())
        .unwrap_or(LogFormat::Pretty);
    init_logging(format)?;

    let args = Args::parse()?;
    let config_fn = args.config_fn()?;

    tracing::info!(
        start_seed = args.start_seed,
        count = args.count,
        mode = %args.mode,
        sessions = args.sessions,
        "starting write-stream DST batch"
    );

    let results = run_dst_batch(args.start_seed, args.count, args.sessions, config_fn).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in results.iter().filter(|r| !r.is_success()) {
            println!("{}", result.summary());
            for violation in &result.invariant_violations {
                println!("  - {}", violation);
            }
        }
        println!("{}", summarize_batch(&results));
    }

    if results.iter().any(|r| !r.is_success()) {
        std::process::exit(1);
    }
    Ok(())
}
