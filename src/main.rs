use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use rusty_ephys::config::Settings;
use rusty_ephys::core::simulation::simulate;
use rusty_ephys::core::UnitId;
use rusty_ephys::error::EphysError;
use rusty_ephys::feed::Feed;
use rusty_ephys::jobs::builtin::{
    FetchAverageWaveformArgs, PrepareSnippetsArgs, UnitWaveformArgs, CREATEJOB_FETCH_AVERAGE_WAVEFORM,
    FETCH_AVERAGE_WAVEFORM, FETCH_AVERAGE_WAVEFORM_FROM_RECORDING, PREPARE_SNIPPETS,
};
use rusty_ephys::jobs::cache::JobCache;
use rusty_ephys::jobs::registry::{JobCall, JobRegistry};
use rusty_ephys::jobs::JobContext;
use rusty_ephys::storage::content::ContentStore;
use rusty_ephys::workspace::{import_recording, import_sorting, SortingEntry, Workspace};

#[derive(Parser, Debug)]
#[command(version, about = "Simulated recordings and average waveforms of sorted units")]
struct Args {
    /// The settings file (TOML); defaults are used if omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Do not use the job result cache
    #[arg(long, global = true)]
    no_cache: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate a recording with its ground-truth sorting and import both into the workspace
    Simulate {
        /// The recording id; the sorting id is the recording id followed by ":true"
        #[arg(long, default_value = "rec1")]
        recording_id: String,
        /// The duration of the recording, in seconds
        #[arg(long)]
        duration_sec: Option<f64>,
        /// The number of channels
        #[arg(long)]
        num_channels: Option<usize>,
        /// The number of units
        #[arg(long)]
        num_units: Option<usize>,
        /// The seed of the simulation
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Extract the snippets of a sorting and print the URI of the dataset
    PrepareSnippets {
        #[arg(long)]
        sorting_id: String,
    },
    /// Compute the average waveform of a unit from a snippet dataset
    AverageWaveform {
        /// The URI (or local path) of the snippet dataset
        #[arg(long)]
        snippets: String,
        #[arg(long)]
        unit_id: UnitId,
    },
    /// Compute the average waveform of a unit of a sorting in the workspace
    PlotData {
        #[arg(long)]
        sorting_id: String,
        #[arg(long)]
        unit_id: UnitId,
        /// Average over the first seconds of the recording instead of the snippets
        #[arg(long)]
        from_recording: bool,
    },
    /// List or run registered jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
    /// Print the recordings and sortings of the workspace
    Workspace,
}

#[derive(Subcommand, Debug)]
enum JobsCommand {
    /// Print the signatures of the registered jobs
    List,
    /// Run a job with JSON arguments
    Run {
        name: String,
        #[arg(default_value = "null")]
        args: String,
    },
    /// Run the jobs of a JSON file (a list of {"name", "args"} objects) in parallel
    Batch { file: PathBuf },
    /// Remove all cached job results
    ClearCache,
}

fn init_logging(args: &Args, settings: &Settings) -> Result<(), EphysError> {
    let mut hasher = Sha256::new();
    hasher.update(format!("{:?}", args));
    let hash = hasher.finalize();
    let log_path = settings.log.dir.join(format!("{:x}.log", hash));

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} - {m}\n")))
        .build(log_path)
        .map_err(|e| EphysError::IOError(e.to_string()))?;
    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{l} - {m}\n")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .appender(Appender::builder().build("console", Box::new(console)))
        .build(
            Root::builder()
                .appender("logfile")
                .appender("console")
                .build(settings.log.level_filter()?),
        )
        .map_err(|e| EphysError::IOError(e.to_string()))?;

    log4rs::init_config(config).map_err(|e| EphysError::IOError(e.to_string()))?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), EphysError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn sorting_entry<'a>(workspace: &'a Workspace, sorting_id: &str) -> Result<&'a SortingEntry, EphysError> {
    workspace
        .sorting(sorting_id)
        .ok_or_else(|| EphysError::InvalidParameter(format!("no sorting {} in the workspace", sorting_id)))
}

fn unit_args(workspace: &Workspace, sorting_id: &str, unit_id: UnitId) -> Result<UnitWaveformArgs, EphysError> {
    let sorting = sorting_entry(workspace, sorting_id)?;
    Ok(UnitWaveformArgs {
        recording_object: sorting.recording_object.clone(),
        sorting_object: sorting.sorting_object.clone(),
        unit_id,
    })
}

fn main() -> Result<(), EphysError> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;
    init_logging(&args, &settings)?;
    log::info!("{:?}", args);

    let store = ContentStore::new(&settings.store.root)?;
    let registry = JobRegistry::with_builtins()?;
    let cache = match (&settings.jobs.cache_dir, args.no_cache) {
        (Some(dir), false) => Some(JobCache::new(dir)?),
        _ => None,
    };
    let mut ctx = JobContext::new(&registry, &store, &settings.snippets);
    if let Some(cache) = cache.as_ref() {
        ctx = ctx.with_cache(cache);
    }

    let load_feed = |create: bool| Feed::load(&settings.feed.root, &settings.feed.name, create);
    let workspace_name = settings.feed.workspace.as_str();

    match &args.command {
        Command::Simulate {
            recording_id,
            duration_sec,
            num_channels,
            num_units,
            seed,
        } => {
            let mut config = settings.simulation.clone();
            config.duration_sec = duration_sec.unwrap_or(config.duration_sec);
            config.num_channels = num_channels.unwrap_or(config.num_channels);
            config.num_units = num_units.unwrap_or(config.num_units);
            config.seed = seed.unwrap_or(config.seed);

            let (recording, sorting) = simulate(&config)?;
            let sorting_id = format!("{}:true", recording_id);
            let feed = load_feed(true)?;
            println!("Feed URI: {}", feed.uri());
            import_recording(&feed, &store, workspace_name, &recording, recording_id)?;
            import_sorting(&feed, &store, workspace_name, &recording, &sorting, recording_id, &sorting_id)?;
            println!("Imported recording {} and sorting {}", recording_id, sorting_id);
        }
        Command::PrepareSnippets { sorting_id } => {
            let workspace = Workspace::load(&load_feed(false)?, workspace_name)?;
            let sorting = sorting_entry(&workspace, sorting_id)?;
            let uri: String = ctx.call(
                PREPARE_SNIPPETS,
                &PrepareSnippetsArgs {
                    recording_object: sorting.recording_object.clone(),
                    sorting_object: sorting.sorting_object.clone(),
                    snippet_len: None,
                    max_events_per_unit: None,
                    max_neighborhood_size: None,
                },
            )?;
            println!("{}", uri);
        }
        Command::AverageWaveform { snippets, unit_id } => {
            let plot_data: Value = ctx.call(
                FETCH_AVERAGE_WAVEFORM,
                &FetchAverageWaveformArgs {
                    snippets_h5: snippets.clone(),
                    unit_id: *unit_id,
                },
            )?;
            print_json(&plot_data)?;
        }
        Command::PlotData {
            sorting_id,
            unit_id,
            from_recording,
        } => {
            let workspace = Workspace::load(&load_feed(false)?, workspace_name)?;
            let job = if *from_recording {
                FETCH_AVERAGE_WAVEFORM_FROM_RECORDING
            } else {
                CREATEJOB_FETCH_AVERAGE_WAVEFORM
            };
            let plot_data: Value = ctx.call(job, &unit_args(&workspace, sorting_id, *unit_id)?)?;
            print_json(&plot_data)?;
        }
        Command::Jobs { command } => match command {
            JobsCommand::List => print_json(&registry.signatures())?,
            JobsCommand::Run { name, args } => {
                let args: Value = serde_json::from_str(args)?;
                print_json(&ctx.run(name, args)?)?;
            }
            JobsCommand::Batch { file } => {
                let calls: Vec<JobCall> = serde_json::from_slice(&std::fs::read(file)?)?;
                let results: Vec<Value> = registry
                    .run_batch(&calls, &ctx)
                    .into_iter()
                    .map(|result| match result {
                        Ok(value) => value,
                        Err(e) => serde_json::json!({ "error": e.to_string() }),
                    })
                    .collect();
                print_json(&results)?;
            }
            JobsCommand::ClearCache => match cache.as_ref() {
                Some(cache) => {
                    cache.clear()?;
                    println!("Cleared {}", cache.dir().display());
                }
                None => println!("No job cache configured"),
            },
        },
        Command::Workspace => {
            let feed = load_feed(false)?;
            let workspace = Workspace::load(&feed, workspace_name)?;
            println!("Feed URI: {}", feed.uri());
            for recording in workspace.recordings() {
                println!("{}\t{}", recording.recording_id, recording.description);
                for sorting in workspace.sortings_of(&recording.recording_id) {
                    println!("  {}\t{}", sorting.sorting_id, sorting.sorting_path);
                }
            }
        }
    }

    log::info!("Done!");
    Ok(())
}
