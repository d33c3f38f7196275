//! Centralized configuration for Tidex.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Tidex components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct TidexConfig {
    pub fetch: FetchConfig,
    pub solver: SolverConfig,
    pub tracker: TrackerConfig,
    pub cache: CacheConfig,
}

/// Direct page fetching configuration.
///
/// Controls the browser-spoofing HTTP client and the short-lived page cache.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Timeout for a single direct page request
    pub request_timeout: Duration,
    /// Lifetime of validated pages in the short-lived cache
    pub short_lived_ttl: Duration,
    /// User agent presented to target sites
    pub user_agent: String,
    /// Referer sent when the caller supplies none
    pub default_referer: String,
    /// Solver attempts granted to a page whose direct fetch failed
    pub solver_attempts: u32,
    /// Idle keep-alive connections kept per host
    pub max_idle_per_host: usize,
    /// How long idle connections are kept alive
    pub idle_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            short_lived_ttl: Duration::from_secs(30 * 60), // 30 minutes
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_referer: "https://google.com/".to_string(),
            solver_attempts: 3,
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Desktop Chrome user agent used for direct requests.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Challenge solver backend configuration.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Base address of the solver service (None disables solving)
    pub address: Option<String>,
    /// Per-request budget handed to the solver, also used as HTTP timeout
    pub max_timeout: Duration,
    /// Number of browser sessions kept in the pool
    pub pool_size: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            address: None,
            max_timeout: Duration::from_millis(60_000),
            pool_size: 5,
        }
    }
}

/// Tracker list and scrape configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Per-tracker scrape timeout
    pub scrape_timeout: Duration,
    /// Timeout for downloading a public tracker list
    pub list_fetch_timeout: Duration,
    /// Lifetime of the downloaded tracker list
    pub list_ttl: Duration,
    /// Lifetime of cached peer counts
    pub peer_ttl: Duration,
    /// Mirrors serving newline-delimited tracker lists, tried in order
    pub list_mirrors: Vec<String>,
    /// Fallback trackers used when every mirror fails
    pub static_trackers: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            scrape_timeout: Duration::from_millis(500),
            list_fetch_timeout: Duration::from_secs(10),
            list_ttl: Duration::from_secs(24 * 60 * 60),
            peer_ttl: Duration::from_secs(24 * 60 * 60),
            list_mirrors: DEFAULT_TRACKER_LIST_MIRRORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            static_trackers: STATIC_TRACKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Key/value cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Expiration applied by plain `set` calls
    pub default_ttl: Duration,
    /// Maximum number of entries held in memory
    pub max_entries: usize,
    /// Maximum combined size of keys and values held in memory
    pub max_bytes: usize,
    /// Directory of the persistent cache (None keeps the cache in memory)
    pub directory: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            max_entries: 10_000,
            max_bytes: 64 * 1024 * 1024, // 64 MiB
            directory: None,
        }
    }
}

/// Public tracker list mirrors.
pub const DEFAULT_TRACKER_LIST_MIRRORS: &[&str] = &[
    "https://raw.githubusercontent.com/ngosang/trackerslist/master/trackers_best_ip.txt",
    "https://cdn.jsdelivr.net/gh/ngosang/trackerslist@master/trackers_best_ip.txt",
    "https://ngosang.github.io/trackerslist/trackers_best_ip.txt",
];

/// Trackers scraped when no mirror can be reached.
pub const STATIC_TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://p4p.arenabg.com:1337/announce",
    "udp://retracker.hotplug.ru:2710/announce",
    "http://tracker.bt4g.com:2095/announce",
    "http://bt.okmp3.ru:2710/announce",
    "udp://tracker.torrent.eu.org:451/announce",
    "http://tracker.mywaifu.best:6969/announce",
    "udp://ttk2.nbaonlineservice.com:6969/announce",
    "http://tracker.privateseedbox.xyz:2710/announce",
    "udp://evan.im:6969/announce",
    "https://tracker.yemekyedim.com:443/announce",
    "udp://retracker.lanta.me:2710/announce",
    "udp://martin-gebhardt.eu:25/announce",
    "http://tracker.beeimg.com:6969/announce",
    "udp://udp.tracker.projectk.org:23333/announce",
    "http://tracker.renfei.net:8080/announce",
    "https://tracker.expli.top:443/announce",
    "https://tr.nyacat.pw:443/announce",
    "udp://tracker.ducks.party:1984/announce",
    "udp://extracker.dahrkael.net:6969/announce",
    "http://ipv4.rer.lol:2710/announce",
    "udp://tracker.plx.im:6969/announce",
    "udp://tracker.tvunderground.org.ru:3218/announce",
    "http://tracker.tricitytorrents.com:2710/announce",
    "udp://open.stealth.si:80/announce",
    "udp://tracker.dler.com:6969/announce",
    "https://tracker.moeblog.cn:443/announce",
    "udp://d40969.acod.regrucolo.ru:6969/announce",
    "https://tracker.jdx3.org:443/announce",
    "http://ipv6.rer.lol:6969/announce",
    "udp://bandito.byterunner.io:6969/announce",
    "udp://tracker.gigantino.net:6969/announce",
    "http://tracker.netmap.top:6969/announce",
    "udp://tracker.yume-hatsuyuki.moe:6969/announce",
    "https://tracker.aburaya.live:443/announce",
    "udp://tracker.srv00.com:6969/announce",
    "udp://open.demonii.com:1337/announce",
    "udp://1c.premierzal.ru:6969/announce",
    "udp://tracker.fnix.net:6969/announce",
    "udp://tracker.kmzs123.cn:17272/announce",
    "https://tracker.home.kmzs123.cn:4443/announce",
    "udp://tracker-udp.gbitt.info:80/announce",
    "udp://tracker.torrust-demo.com:6969/announce",
    "udp://tracker.hifimarket.in:2710/announce",
    "udp://retracker01-msk-virt.corbina.net:80/announce",
    "https://tracker.ghostchu-services.top:443/announce",
    "udp://open.dstud.io:6969/announce",
    "udp://tracker.therarbg.to:6969/announce",
    "udp://tracker.bitcoinindia.space:6969/announce",
    "udp://www.torrent.eu.org:451/announce",
    "udp://tracker.hifitechindia.com:6969/announce",
    "udp://tracker.gmi.gd:6969/announce",
    "udp://tracker.skillindia.site:6969/announce",
    "http://tracker.ipv6tracker.ru:80/announce",
    "udp://tracker.tryhackx.org:6969/announce",
    "http://torrent.hificode.in:6969/announce",
    "http://open.trackerlist.xyz:80/announce",
    "http://taciturn-shadow.spb.ru:6969/announce",
    "http://shubt.net:2710/announce",
    "udp://tracker.valete.tf:9999/announce",
    "https://tracker.zhuqiy.top:443/announce",
    "https://tracker.leechshield.link:443/announce",
    "http://tracker.tritan.gg:8080/announce",
    "udp://t.overflow.biz:6969/announce",
    "udp://open.tracker.cl:1337/announce",
    "udp://explodie.org:6969/announce",
    "udp://exodus.desync.com:6969/announce",
    "udp://bt.ktrackers.com:6666/announce",
    "udp://wepzone.net:6969/announce",
    "udp://tracker2.dler.org:80/announce",
    "udp://tracker.theoks.net:6969/announce",
    "udp://tracker.ololosh.space:6969/announce",
    "udp://tracker.filemail.com:6969/announce",
    "udp://tracker.dump.cl:6969/announce",
    "udp://tracker.dler.org:6969/announce",
    "udp://tracker.bittor.pw:1337/announce",
];

impl TidexConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults. Unparseable values keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Fetch overrides
        if let Some(timeout) = env_duration("TIDEX_REQUEST_TIMEOUT") {
            config.fetch.request_timeout = timeout;
        }

        if let Some(ttl) = env_duration("SHORT_LIVED_CACHE_EXPIRATION") {
            config.fetch.short_lived_ttl = ttl;
        }

        if let Some(user_agent) = env_string("TIDEX_USER_AGENT") {
            config.fetch.user_agent = user_agent;
        }

        if let Ok(attempts) = std::env::var("TIDEX_SOLVER_ATTEMPTS") {
            if let Ok(count) = attempts.trim().parse::<u32>() {
                config.fetch.solver_attempts = count;
            }
        }

        // Solver overrides
        if let Some(address) = env_string("FLARESOLVERR_ADDRESS") {
            config.solver.address = Some(address.trim_end_matches('/').to_string());
        }

        if let Ok(max_timeout) = std::env::var("FLARESOLVERR_MAX_TIMEOUT") {
            if let Ok(millis) = max_timeout.trim().parse::<u64>() {
                config.solver.max_timeout = Duration::from_millis(millis);
            }
        }

        if let Ok(pool_size) = std::env::var("FLARESOLVERR_POOL_SIZE") {
            if let Ok(size) = pool_size.trim().parse::<usize>() {
                config.solver.pool_size = size;
            }
        }

        // Tracker overrides
        if let Ok(timeout) = std::env::var("TIDEX_SCRAPE_TIMEOUT_MS") {
            if let Ok(millis) = timeout.trim().parse::<u64>() {
                config.tracker.scrape_timeout = Duration::from_millis(millis);
            }
        }

        if let Some(ttl) = env_duration("TIDEX_PEER_CACHE_TTL") {
            config.tracker.peer_ttl = ttl;
        }

        if let Some(mirrors) = env_string("TIDEX_TRACKER_LIST_URLS") {
            let mirrors: Vec<String> = mirrors
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if !mirrors.is_empty() {
                config.tracker.list_mirrors = mirrors;
            }
        }

        // Cache overrides
        if let Some(ttl) = env_duration("LONG_LIVED_CACHE_EXPIRATION") {
            config.cache.default_ttl = ttl;
        }

        if let Ok(max_entries) = std::env::var("TIDEX_CACHE_MAX_ENTRIES") {
            if let Ok(count) = max_entries.trim().parse::<usize>() {
                config.cache.max_entries = count;
            }
        }

        if let Ok(max_bytes) = std::env::var("TIDEX_CACHE_MAX_BYTES") {
            if let Ok(bytes) = max_bytes.trim().parse::<usize>() {
                config.cache.max_bytes = bytes;
            }
        }

        if let Some(directory) = env_string("TIDEX_CACHE_DIR") {
            config.cache.directory = Some(PathBuf::from(directory));
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Short timeouts, a tiny solver pool, no public mirrors and a two-entry
    /// static tracker list keep tests fast and offline.
    pub fn for_testing() -> Self {
        Self {
            fetch: FetchConfig {
                request_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            solver: SolverConfig {
                address: None,
                max_timeout: Duration::from_secs(2),
                pool_size: 2,
            },
            tracker: TrackerConfig {
                scrape_timeout: Duration::from_millis(200),
                list_fetch_timeout: Duration::from_secs(1),
                list_mirrors: Vec::new(),
                static_trackers: vec![
                    "udp://tracker.invalid:1337/announce".to_string(),
                    "http://tracker.invalid/announce".to_string(),
                ],
                ..Default::default()
            },
            cache: CacheConfig {
                default_ttl: Duration::from_secs(60),
                max_entries: 128,
                max_bytes: 1024 * 1024,
                directory: None,
            },
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_duration(name: &str) -> Option<Duration> {
    env_string(name).and_then(|value| parse_duration(&value))
}

/// Parses `90`, `500ms`, `30s`, `30m`, `12h`, `7d` or `2w` into a duration.
///
/// A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount = digits.parse::<u64>().ok()?;

    let seconds_per_unit = match unit.trim() {
        "ms" => return Some(Duration::from_millis(amount)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        _ => return None,
    };

    amount.checked_mul(seconds_per_unit).map(Duration::from_secs)
}
