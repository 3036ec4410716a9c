use std::{
    env,
    fs::File,
    io::{BufReader, BufWriter},
    path::PathBuf,
    process,
};

use anyhow::{anyhow, Context, Result};
use collector::{load_config, replay};
use grid_core::SamplingScheduler;

#[derive(Debug)]
struct Cli {
    snapshots: PathBuf,
    frames_out: Option<PathBuf>,
    config: Option<PathBuf>,
    username: Option<String>,
    game_radius: Option<u32>,
}

impl Cli {
    fn parse() -> Result<Self> {
        let mut args = env::args().skip(1);
        let mut snapshots: Option<PathBuf> = None;
        let mut frames_out: Option<PathBuf> = None;
        let mut config: Option<PathBuf> = None;
        let mut username: Option<String> = None;
        let mut game_radius: Option<u32> = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--snapshots" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--snapshots requires a file path"))?;
                    snapshots = Some(PathBuf::from(value));
                }
                "--frames-out" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--frames-out requires a file path"))?;
                    frames_out = Some(PathBuf::from(value));
                }
                "--config" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--config requires a file path"))?;
                    config = Some(PathBuf::from(value));
                }
                "--username" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--username requires a value"))?;
                    username = Some(value);
                }
                "--game-radius" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--game-radius requires a number"))?;
                    game_radius = Some(
                        value
                            .parse::<u32>()
                            .with_context(|| format!("invalid --game-radius value: {value}"))?,
                    );
                }
                "-h" | "--help" => {
                    println!(
                        "Usage: cargo run -p collector --bin replay -- --snapshots <file.jsonl> [--frames-out <file.jsonl>] [--config <config.json>] [--username <name>] [--game-radius <n>]\n\nEach input line: {{\"timestampMs\": <ms>, \"snapshot\": {{...}}, \"pointer\": {{...}}}}"
                    );
                    process::exit(0);
                }
                other => return Err(anyhow!("unknown argument: {other}. Use --help for usage.")),
            }
        }

        let snapshots = snapshots.ok_or_else(|| anyhow!("--snapshots is required"))?;
        Ok(Self {
            snapshots,
            frames_out,
            config,
            username,
            game_radius,
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse()?;
    let config = load_config(cli.config.as_deref())?;
    let mut scheduler = SamplingScheduler::new(config)
        .map_err(|err| anyhow!("invalid collection config: {err}"))?;
    if let Some(username) = cli.username {
        scheduler = scheduler.with_username(username);
    }
    if let Some(radius) = cli.game_radius {
        scheduler.learn_game_radius(radius);
    }

    let input = File::open(&cli.snapshots)
        .with_context(|| format!("failed to open snapshots: {}", cli.snapshots.display()))?;
    let output = cli
        .frames_out
        .as_ref()
        .map(|path| {
            File::create(path)
                .map(BufWriter::new)
                .with_context(|| format!("failed to create frames output: {}", path.display()))
        })
        .transpose()?;

    let summary = replay(&mut scheduler, BufReader::new(input), output)?;

    println!("Replay complete.");
    println!(
        "  Session:          {}",
        summary.session_id.as_deref().unwrap_or("-")
    );
    println!("  Lines:            {}", summary.lines);
    println!("  Frames emitted:   {}", summary.stats.frames_emitted);
    println!("  Ticks skipped:    {}", summary.stats.ticks_skipped);
    println!("  Tick errors:      {}", summary.stats.tick_errors);
    if let Some(path) = cli.frames_out {
        println!("  Frames JSONL:     {}", path.display());
    }

    Ok(())
}
