//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::BTreeSet,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, CommonArgs, PurgeCdnArgs, ServeArgs, ServeOverrides, TransformArgs,
    WarmArgs,
};

use crate::{
    cache::CacheRelationMap,
    domain::{
        content::{Site, SiteId, VolumeId},
        transforms::MediaTransformSpec,
    },
    media::TransformAdapter,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quire";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_PORT: u16 = 3101;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_SITE_ID: SiteId = 1;
const DEFAULT_SITE_URL: &str = "http://127.0.0.1:3000/";
const DEFAULT_CACHE_BASE_PATH: &str = "web/static";
const DEFAULT_SITEMAP_PATH: &str = "sitemap.xml";
const DEFAULT_WARM_CONCURRENCY: usize = 10;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = concat!("quire/", env!("CARGO_PKG_VERSION"));
const DEFAULT_JOB_WORKERS: u32 = 2;
const DEFAULT_TRANSFORM_API_URL: &str = "https://wsrv.nl/";
const DEFAULT_TRANSFORM_DIR: &str = "web/media_optimised";
const DEFAULT_TRANSFORM_URL_PREFIX: &str = "/media_optimised";
const DEFAULT_MEDIA_PREFIX: &str = "media";
const DEFAULT_NO_TRANSFORM_EXTENSIONS: [&str; 4] = ["svg", "gif", "webp", "avif"];
const DEFAULT_IMAGE_PRESET_WIDTHS: [u32; 4] = [400, 800, 1200, 1600];
const DEFAULT_VIDEO_PRESET_WIDTHS: [u32; 2] = [720, 1280];
const DEFAULT_TRANSFORMS_FIELD: &str = "transformUrls";
const DEFAULT_CDN_API_BASE_URL: &str = "https://api.cloudflare.com/client/v4/";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub http: HttpSettings,
    pub jobs: JobsSettings,
    pub sites: Vec<Site>,
    pub content: ContentSettings,
    pub cache: CacheSettings,
    pub media: MediaSettings,
    pub cdn: CdnSettings,
}

impl Settings {
    /// The first configured site, used when a request names no other.
    pub fn primary_site(&self) -> &Site {
        // `build_sites` guarantees at least one entry.
        &self.sites[0]
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub workers: NonZeroU32,
}

#[derive(Debug, Clone, Default)]
pub struct ContentSettings {
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub excluded_sites: Vec<SiteId>,
    pub base_path: PathBuf,
    pub relations: CacheRelationMap,
    pub warm_sites: Vec<SiteId>,
    pub sitemap_path: String,
    pub warm_concurrency: NonZeroUsize,
}

/// Field handles on the asset entity, resolved once at load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldHandles {
    pub transforms: String,
}

impl Default for FieldHandles {
    fn default() -> Self {
        Self {
            transforms: DEFAULT_TRANSFORMS_FIELD.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub image_enabled: bool,
    pub video_enabled: bool,
    pub image_adapter: TransformAdapter,
    pub video_adapter: TransformAdapter,
    pub api_url: String,
    pub cdn_base_url: Option<String>,
    pub public_url: Option<String>,
    pub transform_dir: PathBuf,
    pub transform_url_prefix: String,
    pub media_prefix: String,
    pub allowed_volumes: Vec<VolumeId>,
    pub no_transform_extensions: Vec<String>,
    pub image_presets: Vec<MediaTransformSpec>,
    pub video_presets: Vec<MediaTransformSpec>,
    pub fields: FieldHandles,
}

#[derive(Debug, Clone)]
pub struct CdnSettings {
    pub enabled: bool,
    pub api_base_url: String,
    pub zone: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("QUIRE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.include")
            .with_list_parse_key("cache.exclude")
            .with_list_parse_key("cache.excluded_sites")
            .with_list_parse_key("cache.warm_sites")
            .with_list_parse_key("media.allowed_volumes")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Warm(args)) => {
            raw.apply_common_overrides(&args.common);
            if let Some(concurrency) = args.concurrency {
                raw.cache.warm_concurrency = Some(concurrency);
            }
        }
        Some(command) => raw.apply_common_overrides(command.common()),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    http: RawHttpSettings,
    jobs: RawJobsSettings,
    sites: Vec<RawSite>,
    content: RawContentSettings,
    cache: RawCacheSettings,
    media: RawMediaSettings,
    cdn: RawCdnSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(workers) = overrides.jobs_workers {
            self.jobs.workers = Some(workers);
        }

        self.apply_common_overrides(&overrides.common);
    }

    fn apply_common_overrides(&mut self, overrides: &CommonArgs) {
        if let Some(path) = overrides.cache_base_path.as_ref() {
            self.cache.base_path = Some(path.to_string_lossy().into_owned());
        }
        if let Some(path) = overrides.content_snapshot.as_ref() {
            self.content.snapshot_path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            http,
            jobs,
            sites,
            content,
            cache,
            media,
            cdn,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let http = build_http_settings(http)?;
        let jobs = build_jobs_settings(jobs)?;
        let sites = build_sites(sites)?;
        let content = ContentSettings {
            snapshot_path: content.snapshot_path,
        };
        let cache = build_cache_settings(cache, &sites)?;
        let media = build_media_settings(media)?;
        let cdn = build_cdn_settings(cdn);

        Ok(Self {
            server,
            logging,
            http,
            jobs,
            sites,
            content,
            cache,
            media,
            cdn,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());
    let port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }
    let admin_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let timeout_secs = http.timeout_seconds.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "http.timeout_seconds",
            "must be greater than zero",
        ));
    }
    let user_agent = non_empty(http.user_agent).unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    Ok(HttpSettings {
        timeout: Duration::from_secs(timeout_secs),
        user_agent,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let workers = jobs.workers.unwrap_or(DEFAULT_JOB_WORKERS);
    Ok(JobsSettings {
        workers: non_zero_u32(workers.into(), "jobs.workers")?,
    })
}

fn build_sites(raw: Vec<RawSite>) -> Result<Vec<Site>, LoadError> {
    if raw.is_empty() {
        return Ok(vec![Site::new(DEFAULT_SITE_ID, DEFAULT_SITE_URL)]);
    }

    let mut seen = BTreeSet::new();
    let mut sites = Vec::with_capacity(raw.len());
    for site in raw {
        let id = site
            .id
            .ok_or_else(|| LoadError::invalid("sites.id", "every site needs an id"))?;
        if !seen.insert(id) {
            return Err(LoadError::invalid(
                "sites.id",
                format!("site id {id} is configured twice"),
            ));
        }

        let base_url = non_empty(site.base_url)
            .ok_or_else(|| LoadError::invalid("sites.base_url", format!("site {id} has none")))?;
        let parsed = url::Url::parse(&base_url).map_err(|err| {
            LoadError::invalid("sites.base_url", format!("`{base_url}`: {err}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(LoadError::invalid(
                "sites.base_url",
                format!("`{base_url}` must be an absolute http(s) url"),
            ));
        }

        sites.push(Site::new(id, base_url));
    }

    Ok(sites)
}

fn build_cache_settings(cache: RawCacheSettings, sites: &[Site]) -> Result<CacheSettings, LoadError> {
    let raw_base = non_empty(cache.base_path).unwrap_or_else(|| DEFAULT_CACHE_BASE_PATH.to_string());
    let base_path = interpolate_env(&raw_base, |name| std::env::var(name).ok())
        .map(PathBuf::from)
        .map_err(|reason| LoadError::invalid("cache.base_path", reason))?;

    for site_id in &cache.warm_sites {
        if !sites.iter().any(|site| site.id == *site_id) {
            return Err(LoadError::invalid(
                "cache.warm_sites",
                format!("site {site_id} is not configured"),
            ));
        }
    }

    let concurrency = cache
        .warm_concurrency
        .unwrap_or(DEFAULT_WARM_CONCURRENCY);
    let warm_concurrency = NonZeroUsize::new(concurrency).ok_or_else(|| {
        LoadError::invalid("cache.warm_concurrency", "must be greater than zero")
    })?;

    let sitemap_path = non_empty(cache.sitemap_path)
        .unwrap_or_else(|| DEFAULT_SITEMAP_PATH.to_string())
        .trim_start_matches('/')
        .to_string();

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(false),
        include: cache.include,
        exclude: cache.exclude,
        excluded_sites: cache.excluded_sites,
        base_path,
        relations: cache.relations,
        warm_sites: cache.warm_sites,
        sitemap_path,
        warm_concurrency,
    })
}

fn build_media_settings(media: RawMediaSettings) -> Result<MediaSettings, LoadError> {
    let image_adapter = media.image_adapter.unwrap_or(TransformAdapter::RedirectImage);
    if image_adapter.is_video() {
        return Err(LoadError::invalid(
            "media.image_adapter",
            "a video adapter cannot transform images",
        ));
    }
    let video_adapter = media.video_adapter.unwrap_or(TransformAdapter::CdnVideo);
    if !video_adapter.is_video() {
        return Err(LoadError::invalid(
            "media.video_adapter",
            "only a video adapter can transform video",
        ));
    }

    let image_presets = build_presets(
        media.image_presets,
        &DEFAULT_IMAGE_PRESET_WIDTHS,
        "media.image_presets",
    )?;
    let video_presets = build_presets(
        media.video_presets,
        &DEFAULT_VIDEO_PRESET_WIDTHS,
        "media.video_presets",
    )?;

    let no_transform_extensions = media
        .no_transform_extensions
        .unwrap_or_else(|| {
            DEFAULT_NO_TRANSFORM_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect()
        })
        .into_iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();

    let transform_url_prefix = format!(
        "/{}",
        non_empty(media.transform_url_prefix)
            .unwrap_or_else(|| DEFAULT_TRANSFORM_URL_PREFIX.to_string())
            .trim_matches('/')
    );

    let mut fields = FieldHandles::default();
    if let Some(handle) = non_empty(media.fields.transforms) {
        fields.transforms = handle;
    }

    Ok(MediaSettings {
        image_enabled: media.image_enabled.unwrap_or(false),
        video_enabled: media.video_enabled.unwrap_or(false),
        image_adapter,
        video_adapter,
        api_url: non_empty(media.api_url).unwrap_or_else(|| DEFAULT_TRANSFORM_API_URL.to_string()),
        cdn_base_url: non_empty(media.cdn_base_url),
        public_url: non_empty(media.public_url),
        transform_dir: media
            .transform_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TRANSFORM_DIR)),
        transform_url_prefix,
        media_prefix: non_empty(media.media_prefix)
            .unwrap_or_else(|| DEFAULT_MEDIA_PREFIX.to_string())
            .trim_matches('/')
            .to_string(),
        allowed_volumes: media.allowed_volumes,
        no_transform_extensions,
        image_presets,
        video_presets,
        fields,
    })
}

fn build_presets(
    raw: Option<Vec<MediaTransformSpec>>,
    default_widths: &[u32],
    key: &'static str,
) -> Result<Vec<MediaTransformSpec>, LoadError> {
    let mut presets = match raw {
        Some(presets) => presets,
        None => default_widths
            .iter()
            .map(|width| MediaTransformSpec::width(*width))
            .collect(),
    };

    for preset in &presets {
        if preset.width.is_none_or(|width| width == 0) {
            return Err(LoadError::invalid(key, "every preset needs a positive width"));
        }
    }

    presets.sort_by_key(|preset| preset.width);
    Ok(presets)
}

fn build_cdn_settings(cdn: RawCdnSettings) -> CdnSettings {
    CdnSettings {
        enabled: cdn.enabled.unwrap_or(false),
        api_base_url: non_empty(cdn.api_base_url)
            .unwrap_or_else(|| DEFAULT_CDN_API_BASE_URL.to_string()),
        zone: non_empty(cdn.zone),
        token: non_empty(cdn.token),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    admin_host: Option<String>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    timeout_seconds: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    workers: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSite {
    id: Option<SiteId>,
    base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    include: Vec<String>,
    exclude: Vec<String>,
    excluded_sites: Vec<SiteId>,
    base_path: Option<String>,
    relations: CacheRelationMap,
    warm_sites: Vec<SiteId>,
    sitemap_path: Option<String>,
    warm_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMediaSettings {
    image_enabled: Option<bool>,
    video_enabled: Option<bool>,
    image_adapter: Option<TransformAdapter>,
    video_adapter: Option<TransformAdapter>,
    api_url: Option<String>,
    cdn_base_url: Option<String>,
    public_url: Option<String>,
    transform_dir: Option<PathBuf>,
    transform_url_prefix: Option<String>,
    media_prefix: Option<String>,
    allowed_volumes: Vec<VolumeId>,
    no_transform_extensions: Option<Vec<String>>,
    image_presets: Option<Vec<MediaTransformSpec>>,
    video_presets: Option<Vec<MediaTransformSpec>>,
    fields: RawFieldHandles,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFieldHandles {
    transforms: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCdnSettings {
    enabled: Option<bool>,
    api_base_url: Option<String>,
    zone: Option<String>,
    token: Option<String>,
}

/// Expand `$NAME` and `${NAME}` references using `lookup`.
fn interpolate_env<F>(raw: &str, lookup: F) -> Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices().peekable();

    while let Some((_, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }

        let braced = matches!(chars.peek(), Some((_, '{')));
        if braced {
            chars.next();
        }

        let mut name = String::new();
        while let Some((_, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || *next == '_' {
                name.push(*next);
                chars.next();
            } else {
                break;
            }
        }

        if braced {
            match chars.next() {
                Some((_, '}')) => {}
                _ => return Err(format!("unterminated `${{` in `{raw}`")),
            }
        }

        if name.is_empty() {
            if braced {
                return Err(format!("empty variable name in `{raw}`"));
            }
            out.push('$');
            continue;
        }

        let value = lookup(&name)
            .ok_or_else(|| format!("environment variable `{name}` is not set"))?;
        out.push_str(&value);
    }

    Ok(out)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
impl Settings {
    /// Built-in defaults with no file or environment layered on top.
    pub(crate) fn defaults() -> Self {
        Self::from_raw(RawSettings::default()).expect("default settings are valid")
    }
}
