use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use refgenconf::app::{App, ProgressSink};
use refgenconf::config::SettingsLoader;
use refgenconf::domain::RegistryPath;
use refgenconf::error::RefgenError;
use refgenconf::fetch::ForcePolicy;
use refgenconf::output::{JsonOutput, OutputMode, TextOutput};
use refgenconf::prompt::{Confirm, FixedAnswer, TerminalPrompt};
use refgenconf::remote::{CatalogClient, CatalogHttpClient, RemoteAssetMetadata};
use refgenconf::resolve::Strictness;
use refgenconf::store::RegistryStore;

#[derive(Parser)]
#[command(name = "refgenie")]
#[command(about = "Reference genome asset manager")]
#[command(version, author)]
struct Cli {
    /// Genome configuration file; defaults to $REFGENIE.
    #[arg(short = 'c', long, global = true)]
    genome_config: Option<String>,

    /// Seconds to wait for the configuration lock.
    #[arg(long, global = true)]
    wait_max: Option<u64>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Initialize a genome configuration")]
    Init(InitArgs),
    #[command(about = "List available local assets")]
    List(ListArgs),
    #[command(about = "List available remote assets")]
    Listr(ListArgs),
    #[command(about = "Download assets")]
    Pull(PullArgs),
    #[command(about = "Get the path to a local asset")]
    Seek(SeekArgs),
    #[command(about = "Rename an asset tag")]
    Tag(TagArgs),
    #[command(about = "Remove a local asset")]
    Remove(RemoveArgs),
    #[command(about = "Set the default tag of an asset")]
    Default(DefaultArgs),
}

#[derive(Args)]
struct InitArgs {
    #[arg(short, long)]
    server: String,

    #[arg(short, long)]
    folder: Option<String>,
}

#[derive(Args)]
struct ListArgs {
    #[arg(short, long, num_args = 1..)]
    genome: Option<Vec<String>>,
}

#[derive(Args)]
struct PullArgs {
    /// One or more `genome/asset[:tag]` registry paths.
    #[arg(required = true)]
    assets: Vec<String>,

    /// Overwrite existing assets without asking.
    #[arg(long, conflicts_with = "no_overwrite")]
    force: bool,

    /// Keep existing assets without asking.
    #[arg(long)]
    no_overwrite: bool,
}

#[derive(Args)]
struct SeekArgs {
    /// `genome/asset[.seek_key][:tag]` registry path.
    asset: String,

    #[arg(short, long)]
    enclosing_dir: bool,

    /// Return the path even when it does not exist.
    #[arg(long)]
    no_check: bool,
}

#[derive(Args)]
struct TagArgs {
    asset: String,

    new_tag: String,

    #[arg(short, long)]
    yes: bool,
}

#[derive(Args)]
struct RemoveArgs {
    asset: String,

    #[arg(short, long)]
    yes: bool,
}

#[derive(Args)]
struct DefaultArgs {
    /// `genome/asset:tag` registry path.
    asset: String,

    #[arg(long)]
    force: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<RefgenError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RefgenError) -> u8 {
    match error {
        RefgenError::MissingConfig
        | RefgenError::ConfigRead(_)
        | RefgenError::MissingCollection(_)
        | RefgenError::MissingAsset { .. }
        | RefgenError::MissingTag { .. }
        | RefgenError::MissingSeekKey(_)
        | RefgenError::AssetPathMissing(_) => 2,
        RefgenError::RemoteMetadataFetchFailed { .. }
        | RefgenError::CatalogHttp(_)
        | RefgenError::ArchiveNotFound(_)
        | RefgenError::ConnectionRefused(_)
        | RefgenError::TruncatedDownload(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let settings = SettingsLoader::resolve(cli.genome_config.as_deref(), cli.wait_max)?;
    let store = RegistryStore::from_settings(&settings);

    match cli.command {
        Commands::Init(args) => {
            let app = App::new(store, NopCatalog);
            let result = app.init(&args.server, args.folder.as_deref())?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_init(&result),
            }
            .into_diagnostic()
        }
        Commands::List(args) => {
            let app = App::new(store, NopCatalog);
            let result = app.list_local(args.genome.as_deref())?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_list(&result),
            }
            .into_diagnostic()
        }
        Commands::Listr(args) => {
            let app = App::new(store.clone(), remote_catalog(&store)?);
            let sink = progress_sink(output_mode);
            let result = app.list_remote(args.genome.as_deref(), sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_list(&result),
            }
            .into_diagnostic()
        }
        Commands::Pull(args) => run_pull(args, store, output_mode),
        Commands::Seek(args) => {
            let app = App::new(store, NopCatalog);
            let path = args.asset.parse::<RegistryPath>()?;
            let strictness = if args.no_check {
                Strictness::Silent
            } else {
                Strictness::Fail
            };
            let result = app.seek(&path, args.enclosing_dir, strictness)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_seek(&result),
            }
            .into_diagnostic()
        }
        Commands::Tag(args) => {
            let app = App::new(store, NopCatalog);
            let path = args.asset.parse::<RegistryPath>()?;
            let confirm = confirmation(args.yes);
            let result = app.tag(&path, &args.new_tag, confirm.as_ref())?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_tag(&result),
            }
            .into_diagnostic()
        }
        Commands::Remove(args) => {
            let app = App::new(store, NopCatalog);
            let path = args.asset.parse::<RegistryPath>()?;
            let confirm = confirmation(args.yes);
            let result = app.remove(&path, confirm.as_ref())?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_remove(&result),
            }
            .into_diagnostic()
        }
        Commands::Default(args) => {
            let app = App::new(store, NopCatalog);
            let path = args.asset.parse::<RegistryPath>()?;
            let result = app.set_default(&path, args.force)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&result),
                OutputMode::Text => TextOutput::print_default(&result),
            }
            .into_diagnostic()
        }
    }
}

fn run_pull(args: PullArgs, store: RegistryStore, output_mode: OutputMode) -> miette::Result<()> {
    let paths = args
        .assets
        .iter()
        .map(|value| value.parse::<RegistryPath>())
        .collect::<Result<Vec<_>, _>>()?;
    let force = ForcePolicy::from(match (args.force, args.no_overwrite) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    });
    let app = App::new(store.clone(), remote_catalog(&store)?);
    let report = app.pull(&paths, force, &TerminalPrompt, progress_sink(output_mode))?;
    match output_mode {
        OutputMode::Json => JsonOutput::print(&report),
        OutputMode::Text => TextOutput::print_pull(&report),
    }
    .into_diagnostic()?;
    let failures = report.failures();
    if failures > 0 {
        return Err(miette::miette!(
            "{failures} of {} pulls failed",
            report.items.len()
        ));
    }
    Ok(())
}

fn remote_catalog(store: &RegistryStore) -> miette::Result<CatalogHttpClient> {
    let document = store.read()?;
    Ok(CatalogHttpClient::new(&document.genome_server)?)
}

fn progress_sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TextOutput,
    }
}

fn confirmation(yes: bool) -> Box<dyn Confirm> {
    if yes {
        Box::new(FixedAnswer(true))
    } else {
        Box::new(TerminalPrompt)
    }
}

struct NopCatalog;

impl CatalogClient for NopCatalog {
    fn fetch_listing(&self) -> Result<BTreeMap<String, Vec<String>>, RefgenError> {
        Err(RefgenError::CatalogHttp(
            "catalog client not configured".to_string(),
        ))
    }

    fn fetch_metadata(
        &self,
        _collection: &str,
        _asset: &str,
        _tag: &str,
    ) -> Result<RemoteAssetMetadata, RefgenError> {
        Err(RefgenError::CatalogHttp(
            "catalog client not configured".to_string(),
        ))
    }

    fn fetch_default_tag(&self, _collection: &str, _asset: &str) -> Result<String, RefgenError> {
        Err(RefgenError::CatalogHttp(
            "catalog client not configured".to_string(),
        ))
    }

    fn fetch_asset_digest(
        &self,
        _collection: &str,
        _asset: &str,
        _tag: &str,
    ) -> Result<String, RefgenError> {
        Err(RefgenError::CatalogHttp(
            "catalog client not configured".to_string(),
        ))
    }

    fn download_archive(
        &self,
        _collection: &str,
        _asset: &str,
        _tag: &str,
        _destination: &Path,
    ) -> Result<u64, RefgenError> {
        Err(RefgenError::CatalogHttp(
            "catalog client not configured".to_string(),
        ))
    }
}
