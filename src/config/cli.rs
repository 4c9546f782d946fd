use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the quire binary.
#[derive(Debug, Parser)]
#[command(
    name = "quire",
    version,
    about = "Static page cache and media transform pipeline"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUIRE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the admin HTTP surface and the background job workers.
    Serve(Box<ServeArgs>),
    /// Remove every cached page.
    Clear(CommonArgs),
    /// Print the number of cached pages.
    Stats(CommonArgs),
    /// Fetch every sitemap URL so the origin regenerates its cached pages.
    Warm(WarmArgs),
    /// Purge URLs, or the whole zone, from the CDN.
    #[command(name = "purge-cdn")]
    PurgeCdn(PurgeCdnArgs),
    /// Generate missing media transforms for eligible assets.
    Transform(TransformArgs),
    /// Delete every generated media transform.
    #[command(name = "remove-transforms")]
    RemoveTransforms(CommonArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommonArgs {
    /// Override the static cache directory.
    #[arg(long = "cache-base-path", value_name = "PATH")]
    pub cache_base_path: Option<PathBuf>,

    /// Override the content snapshot used by the standalone content graph.
    #[arg(long = "content-snapshot", value_name = "PATH")]
    pub content_snapshot: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Override the admin listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub admin_host: Option<String>,

    /// Override the admin listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the static page cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the number of background job workers.
    #[arg(long = "jobs-workers", value_name = "COUNT")]
    pub jobs_workers: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WarmArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Maximum number of simultaneous warm requests.
    #[arg(long, value_name = "COUNT")]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PurgeCdnArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Purge the whole zone instead of individual URLs.
    #[arg(long, conflicts_with = "urls")]
    pub all: bool,

    /// Absolute URLs to purge.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct TransformArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Regenerate transforms even when an asset already has some.
    #[arg(long)]
    pub force: bool,

    /// Limit to these volume ids.
    #[arg(long = "volume", value_name = "ID")]
    pub volumes: Vec<u32>,
}

impl Command {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::Serve(args) => &args.overrides.common,
            Command::Clear(common)
            | Command::Stats(common)
            | Command::RemoveTransforms(common) => common,
            Command::Warm(args) => &args.common,
            Command::PurgeCdn(args) => &args.common,
            Command::Transform(args) => &args.common,
        }
    }
}
