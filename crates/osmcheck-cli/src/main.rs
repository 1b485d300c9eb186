mod args;
mod checks;
mod output;
mod pbf;

use anyhow::{Context, Result};
use args::{CommonArgs, UsageError};
use checks::colocated::ColocatedArgs;
use checks::orphans::OrphansArgs;
use checks::{colocated, multipolygon, orphans, relations, tags, RunContext};
use clap::{Parser, Subcommand};
use log::info;
use osmcheck::Timestamp;
use pbf::PbfSource;
use std::fs;
use std::process::ExitCode;

/// Find anomalies in OSM data files.
#[derive(Parser, Debug)]
#[command(name = "osmcheck", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find nodes sharing a location, and the ways and relations using them
    ColocatedNodes(ColocatedArgs),
    /// Find relations, multipolygons and boundaries with structural problems
    RelationProblems(CommonArgs),
    /// Find unreferenced objects without (meaningful) tags
    Orphans(OrphansArgs),
    /// Find unusual keys and values, and tags on the wrong kind of object
    UnusualTags(CommonArgs),
    /// Find multipolygons whose tags are repeated on their ways (needs locations on ways)
    MultipolygonProblems(CommonArgs),
}

impl Command {
    fn common(&self) -> &CommonArgs {
        match self {
            Command::ColocatedNodes(args) => &args.common,
            Command::Orphans(args) => &args.common,
            Command::RelationProblems(common)
            | Command::UnusualTags(common)
            | Command::MultipolygonProblems(common) => common,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::ColocatedNodes(_) => colocated::ANALYZER,
            Command::RelationProblems(_) => relations::ANALYZER,
            Command::Orphans(_) => orphans::ANALYZER,
            Command::UnusualTags(_) => tags::ANALYZER,
            Command::MultipolygonProblems(_) => multipolygon::ANALYZER,
        }
    }
}

fn run(command: &Command) -> Result<()> {
    let common = command.common();
    let before = common.cutoff(Timestamp::now());

    let source = PbfSource::open(&common.input)?;
    if matches!(command, Command::MultipolygonProblems(_)) && !source.has_locations_on_ways() {
        return Err(UsageError("Input file must have locations on ways.".to_string()).into());
    }

    fs::create_dir_all(&common.output_dir).with_context(|| {
        format!("can't create output directory '{}'", common.output_dir.display())
    })?;

    info!("Starting {}", command.name());
    info!("  Reading from file '{}'", source.path().display());
    info!("  Writing to directory '{}'", common.output_dir.display());
    if before == Timestamp::MAX {
        info!("  Using all objects independent of change timestamp");
    } else {
        info!("  Using only objects last changed before {}", before);
    }

    let ctx = RunContext {
        source: &source,
        output_dir: &common.output_dir,
        before,
        progress_every: common.progress_every,
    };

    match command {
        Command::ColocatedNodes(args) => colocated::run(&ctx, args)?,
        Command::RelationProblems(_) => relations::run(&ctx)?,
        Command::Orphans(args) => orphans::run(&ctx, args)?,
        Command::UnusualTags(_) => tags::run(&ctx)?,
        Command::MultipolygonProblems(_) => multipolygon::run(&ctx)?,
    }

    info!("Done with {}", command.name());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.command.common().quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(&cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if err.downcast_ref::<UsageError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
