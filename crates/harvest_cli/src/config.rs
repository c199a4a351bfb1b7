use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use harvest_core::{HarvestConfig, SourceLabel, DEFAULT_PAGE_SIZE, DEFAULT_SHARD_CAPACITY};
use harvest_engine::{
    FetchSettings, HubSettings, RetryPolicy, SruSettings, DEFAULT_HUB_ENDPOINT,
    DEFAULT_PATH_PREFIX, DEFAULT_POLITENESS, DEFAULT_REVISION, DEFAULT_USER_AGENT,
};
use harvest_logging::LogDestination;
use log::LevelFilter;
use serde::Deserialize;

pub const DEFAULT_ENDPOINT: &str = "https://repository.overheid.nl/sru";
pub const DEFAULT_STATE_DIR: &str = "harvest_state";

#[derive(Parser, Debug)]
#[command(name = "harvest", version)]
#[command(about = "Resumable SRU harvest into deduplicated, contiguous JSONL shards")]
#[command(after_help = "Examples:
  harvest run --source lb --out-dir shards
  HF_TOKEN=... harvest run --source op --repo org/publications --max-records 5000
  harvest status --out-dir shards
  harvest reset

Settings file (RON, every field optional):
  (source: \"op\", page_size: 200, shard_capacity: 300, out_dir: Some(\"shards\"))")]
pub struct Cli {
    /// RON settings file; command line flags take precedence over it
    #[arg(long, env = "HARVEST_CONFIG", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding the cursor, seen keys and upload progress
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Where log output goes
    #[arg(long, value_enum, global = true, default_value = "terminal")]
    pub log: LogTarget,

    /// Log file for `--log file` and `--log both`
    #[arg(long, global = true, default_value = harvest_logging::DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    #[arg(long, value_enum, global = true, default_value = "info")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest pages and ship full shards until the listing is exhausted
    Run(RunArgs),
    /// Show local progress and what the remote store already holds
    Status(TargetArgs),
    /// Delete the local state files; shipped shards are left alone
    Reset,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Upstream collection
    #[arg(long, value_enum)]
    pub source: Option<SourceArg>,

    /// SRU endpoint
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// CQL query; defaults to the collection's product area
    #[arg(long)]
    pub query: Option<String>,

    #[arg(long)]
    pub record_schema: Option<String>,

    /// Download each record's document and ship its text
    #[arg(long)]
    pub documents: bool,

    #[arg(long)]
    pub page_size: Option<u32>,

    /// Records per shard
    #[arg(long)]
    pub shard_capacity: Option<usize>,

    /// Stop after accepting this many records
    #[arg(long)]
    pub max_records: Option<u64>,

    /// Ship records whose text is blank
    #[arg(long)]
    pub keep_empty: bool,

    /// Pause between listing and shipping calls, in milliseconds
    #[arg(long, value_name = "MS")]
    pub politeness_ms: Option<u64>,

    /// Attempts per request, including the first
    #[arg(long)]
    pub max_retries: Option<u32>,
}

#[derive(Args, Debug, Default, Clone)]
pub struct TargetArgs {
    /// Ship shards into this local directory
    #[arg(long, value_name = "DIR", conflicts_with = "repo")]
    pub out_dir: Option<PathBuf>,

    /// Dataset repository on the hub, as `owner/name`
    #[arg(long, value_name = "OWNER/NAME")]
    pub repo: Option<String>,

    /// Hub access token
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, value_name = "URL")]
    pub hub_endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// Officiële Publicaties
    Op,
    /// Lokale Bekendmakingen
    Lb,
}

impl From<SourceArg> for SourceLabel {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Op => SourceLabel::OfficielePublicaties,
            SourceArg::Lb => SourceLabel::LokaleBekendmakingen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    Terminal,
    File,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl Cli {
    pub fn log_destination(&self) -> LogDestination {
        match self.log {
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::File => LogDestination::File(self.log_file.clone()),
            LogTarget::Both => LogDestination::Both(self.log_file.clone()),
        }
    }

    /// Settings file named by `--config`/`HARVEST_CONFIG`, or the defaults.
    pub fn file_settings(&self) -> anyhow::Result<FileSettings> {
        match &self.config {
            Some(path) => FileSettings::load(path),
            None => Ok(FileSettings::default()),
        }
    }

    pub fn resolve_state_dir(&self, file: &FileSettings) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| file.state_dir.clone())
    }
}

/// Contents of the RON settings file. Missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub state_dir: PathBuf,
    /// `op`, `lb` or a full collection name.
    pub source: String,
    pub endpoint: String,
    pub query: Option<String>,
    pub record_schema: Option<String>,
    pub fetch_documents: bool,
    pub page_size: u32,
    pub shard_capacity: usize,
    pub max_records: Option<u64>,
    pub skip_empty_content: bool,
    pub politeness_ms: u64,
    pub document_interval_ms: u64,
    pub out_dir: Option<PathBuf>,
    pub repo: Option<String>,
    pub hub_endpoint: String,
    pub revision: String,
    pub path_prefix: String,
    pub user_agent: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub max_bytes: u64,
}

impl Default for FileSettings {
    fn default() -> Self {
        let fetch = FetchSettings::default();
        let retry = RetryPolicy::default();
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            source: "lb".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            query: None,
            record_schema: None,
            fetch_documents: false,
            page_size: DEFAULT_PAGE_SIZE,
            shard_capacity: DEFAULT_SHARD_CAPACITY.get(),
            max_records: None,
            skip_empty_content: true,
            politeness_ms: DEFAULT_POLITENESS.as_millis() as u64,
            document_interval_ms: 500,
            out_dir: None,
            repo: None,
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            revision: DEFAULT_REVISION.to_string(),
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: retry.max_retries,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            request_timeout_secs: fetch.request_timeout.as_secs(),
            max_bytes: fetch.max_bytes,
        }
    }
}

impl FileSettings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read settings file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid settings file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    pub fn fetch(&self) -> FetchSettings {
        FetchSettings {
            user_agent: self.user_agent.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_bytes: self.max_bytes,
            ..FetchSettings::default()
        }
    }

    pub fn retry(&self, max_retries: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            max_retries: max_retries.unwrap_or(self.max_retries).max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

/// Where shipped shards go.
#[derive(Debug, Clone)]
pub enum Target {
    Directory(PathBuf),
    Hub(HubSettings),
}

/// Flags first, then the settings file. A target flag replaces the file's
/// target entirely.
pub fn resolve_target(args: &TargetArgs, file: &FileSettings) -> anyhow::Result<Target> {
    let (out_dir, repo) = if args.out_dir.is_some() || args.repo.is_some() {
        (args.out_dir.clone(), args.repo.clone())
    } else {
        (file.out_dir.clone(), file.repo.clone())
    };

    match (out_dir, repo) {
        (Some(dir), None) => Ok(Target::Directory(dir)),
        (None, Some(repo)) => {
            let Some(token) = args.token.clone().filter(|token| !token.trim().is_empty()) else {
                bail!("shipping to {repo} needs a hub token (--token or HF_TOKEN)");
            };
            let mut settings = HubSettings::new(repo, token);
            settings.endpoint = args
                .hub_endpoint
                .clone()
                .unwrap_or_else(|| file.hub_endpoint.clone());
            settings.revision = file.revision.clone();
            settings.path_prefix = file.path_prefix.clone();
            Ok(Target::Hub(settings))
        }
        (Some(_), Some(_)) => bail!("choose either an output directory or a hub repository"),
        (None, None) => bail!("no shard target: pass --out-dir or --repo"),
    }
}

/// Everything `harvest run` needs.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub state_dir: PathBuf,
    pub sru: SruSettings,
    pub harvest: HarvestConfig,
    pub politeness: Duration,
    pub fetch: FetchSettings,
    pub retry: RetryPolicy,
    pub target: Target,
}

impl RunSettings {
    pub fn resolve(
        state_dir: PathBuf,
        args: &RunArgs,
        file: &FileSettings,
    ) -> anyhow::Result<Self> {
        let source = match args.source {
            Some(arg) => SourceLabel::from(arg),
            None => file
                .source
                .parse::<SourceLabel>()
                .context("invalid source in settings file")?,
        };
        let query = args
            .query
            .clone()
            .or_else(|| file.query.clone())
            .unwrap_or_else(|| default_query(source));

        let mut sru = SruSettings::new(
            args.endpoint.clone().unwrap_or_else(|| file.endpoint.clone()),
            query,
            source,
        );
        sru.record_schema = args
            .record_schema
            .clone()
            .or_else(|| file.record_schema.clone());
        sru.fetch_documents = args.documents || file.fetch_documents;
        sru.document_interval = Duration::from_millis(file.document_interval_ms);

        let page_size = args.page_size.unwrap_or(file.page_size);
        if page_size == 0 {
            bail!("page size must be at least 1");
        }
        let Some(shard_capacity) =
            NonZeroUsize::new(args.shard_capacity.unwrap_or(file.shard_capacity))
        else {
            bail!("shard capacity must be at least 1");
        };

        Ok(Self {
            state_dir,
            sru,
            harvest: HarvestConfig {
                page_size,
                shard_capacity,
                max_records: args.max_records.or(file.max_records),
                skip_empty_content: file.skip_empty_content && !args.keep_empty,
            },
            politeness: Duration::from_millis(args.politeness_ms.unwrap_or(file.politeness_ms)),
            fetch: file.fetch(),
            retry: file.retry(args.max_retries),
            target: resolve_target(&args.target, file)?,
        })
    }
}

/// CQL query selecting a whole collection.
pub fn default_query(source: SourceLabel) -> String {
    let area = match source {
        SourceLabel::OfficielePublicaties => "officielepublicaties",
        SourceLabel::LokaleBekendmakingen => "lokalebekendmakingen",
    };
    format!("c.product-area=={area}")
}
