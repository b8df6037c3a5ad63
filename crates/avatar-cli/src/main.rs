use std::path::PathBuf;

use anyhow::{Context, Result};
use avatar_contracts::request::{BackendSelector, GenerationRequest, ThinkingMode};
use avatar_engine::{AvatarEngine, BackendOutcome, ResolveError, ResolveOutcome};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "avatar-rs", version, about = "Resolve concepts into avatar images")]
struct Cli {
    /// Directory holding references/, secondary_references/ and generated/.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Resolve(ResolveArgs),
    TestBackend(TestBackendArgs),
    Gallery,
}

#[derive(Debug, Parser)]
struct ResolveArgs {
    #[arg(long)]
    concept: String,
    /// Backend tag, or `all` to fan out.
    #[arg(long, default_value = "gemini")]
    backend: BackendSelector,
    #[arg(long, default_value = "full")]
    thinking: ThinkingMode,
    /// Shorthand for `--thinking fast`.
    #[arg(long, conflicts_with = "thinking")]
    fast: bool,
    /// Also write the image bytes here (single-backend results only).
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct TestBackendArgs {
    #[arg(long, default_value = "all")]
    backend: BackendSelector,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("avatar-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut engine = AvatarEngine::from_env(&cli.root);
    match cli.command {
        Command::Resolve(args) => run_resolve(&mut engine, args),
        Command::TestBackend(args) => run_test_backend(&engine, args),
        Command::Gallery => {
            print_json(&serde_json::to_value(engine.list_generated())?)?;
            Ok(0)
        }
    }
}

fn run_resolve(engine: &mut AvatarEngine, args: ResolveArgs) -> Result<i32> {
    let thinking = if args.fast {
        ThinkingMode::Fast
    } else {
        args.thinking
    };
    let request = GenerationRequest::new(args.concept, args.backend, thinking);
    let outcome = match engine.resolve(&request) {
        Ok(outcome) => outcome,
        Err(err) => {
            print_json(&error_body(&err))?;
            return Ok(match err {
                ResolveError::Storage(_) => 1,
                _ => 2,
            });
        }
    };

    if let (Some(path), ResolveOutcome::Single(result)) = (&args.save, &outcome) {
        std::fs::write(path, &result.image_bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    let code = match &outcome {
        ResolveOutcome::FanOut { results }
            if results
                .values()
                .all(|outcome| matches!(outcome, BackendOutcome::Failed { .. })) =>
        {
            2
        }
        _ => 0,
    };
    print_json(&serde_json::to_value(&outcome)?)?;
    Ok(code)
}

fn run_test_backend(engine: &AvatarEngine, args: TestBackendArgs) -> Result<i32> {
    match engine.test_backend(&args.backend) {
        Ok(checks) => {
            let all_ok = checks.iter().all(|check| check.ok);
            print_json(&serde_json::to_value(&checks)?)?;
            Ok(if all_ok { 0 } else { 2 })
        }
        Err(err) => {
            print_json(&error_body(&err))?;
            Ok(2)
        }
    }
}

fn error_body(err: &ResolveError) -> Value {
    json!({
        "error": err.kind(),
        "message": format!("{err:#}"),
    })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
