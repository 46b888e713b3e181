use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;

use treewatch::{flatten_dirs, Exclusions, TreeWatcher, WatchConfig};

mod logger;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to directory (or file) to watch
    path: PathBuf,

    /// Skip entries with names matching this regex, absolute paths are skipped exactly
    #[arg(short, long = "exclude", value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Repeated changes of one file within this window (in ms) are printed once
    #[arg(long, value_parser(parse_duration), default_value("10"))]
    debounce: Duration,

    /// How often (in ms) new notifications are checked
    #[arg(short, long, value_parser(parse_duration), default_value("20"))]
    tick_rate: Duration,

    /// Print events as create/delete/modify flags
    #[arg(long)]
    legacy: bool,

    /// Print directories that would be watched and exit
    #[arg(long)]
    list: bool,

    /// One of off, error, warn, info, debug, trace
    #[arg(long, value_parser(parse_level), default_value("info"))]
    log_level: LevelFilter,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(args.log_level)?;

    if args.list {
        list(&args)
    } else {
        watch(&args)
    }
}

fn list(args: &Args) -> Result<()> {
    let exclusions = Exclusions::new(&args.exclude)?;
    let dirs = flatten_dirs(&args.path, &exclusions)
        .with_context(|| format!("Failed to list {}", args.path.display()))?;

    for dir in &dirs {
        println!("{} ({} entries)", dir.path.display(), dir.entries.len());
    }
    println!("{} directories", dirs.len());
    Ok(())
}

fn watch(args: &Args) -> Result<()> {
    let config = WatchConfig {
        debounce: args.debounce,
        tick_rate: args.tick_rate,
    };
    let watcher = args
        .exclude
        .iter()
        .fold(TreeWatcher::builder().config(config), |builder, pattern| {
            builder.exclude(pattern.as_str())
        })
        .build(&args.path)?;

    if args.legacy {
        treewatch::subscribe(&watcher, |event| println!("{}", event));
    } else {
        watcher.on_event(|event| println!("{}", event));
    }
    watcher.on_error(|error| log::error!("{}", error));

    watcher
        .init()
        .with_context(|| format!("Failed to watch {}", args.path.display()))?;
    log::info!(
        "{} watches active, press Enter to stop",
        watcher.watch_count()
    );

    // EOF ends session as well
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    watcher.end();

    Ok(())
}

fn parse_duration(arg: &str) -> Result<Duration, std::num::ParseIntError> {
    let millis = arg.parse()?;
    Ok(Duration::from_millis(millis))
}

fn parse_level(arg: &str) -> Result<LevelFilter, String> {
    arg.parse()
        .map_err(|_| format!("unknown log level '{}'", arg))
}
