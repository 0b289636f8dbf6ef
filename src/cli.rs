//! Command-line interface parsing for pcd-cache
//!
//! This module handles parsing of CLI arguments using clap and turns them
//! into the startup configuration used to build the interception policy.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;
use url::Url;

use crate::data::Request;
use crate::policy::{PolicyConfig, CURRENT_CACHE_NAME, DEFAULT_ORIGIN};

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// The origin is not an absolute http(s) URL
    #[error("Invalid origin: '{0}'. Expected an absolute http:// or https:// URL")]
    InvalidOrigin(String),

    /// The fetch path could not be resolved against the origin
    #[error("Invalid path: '{0}'")]
    InvalidPath(String),

    /// A --header value is not in `Name: value` form
    #[error("Invalid header: '{0}'. Expected 'Name: value'")]
    InvalidHeader(String),

    /// No cache directory was given and none could be determined
    #[error("Could not determine a cache directory; pass --cache-dir")]
    NoCacheDir,
}

/// pcd-cache - network-first offline cache for a web app's static assets
#[derive(Parser, Debug)]
#[command(name = "pcd-cache")]
#[command(about = "Network-first offline cache; /api/ requests always go live")]
#[command(version)]
pub struct Cli {
    /// Origin of the web application
    #[arg(long, global = true, env = "PCD_ORIGIN", default_value = DEFAULT_ORIGIN)]
    pub origin: String,

    /// Directory holding the cache stores (defaults to the XDG cache dir)
    #[arg(long, global = true, env = "PCD_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Name of the current cache version
    #[arg(long, global = true, default_value = CURRENT_CACHE_NAME)]
    pub cache_name: String,

    /// Network timeout in seconds; a timed out request counts as a network failure
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Lifecycle events and inspection commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Install the current version: pre-cache `/`, then activate
    Install,
    /// Activate the current version: delete every other cache
    Activate,
    /// Handle one request through the cache policy
    Fetch {
        /// Path (or absolute URL) to request
        path: String,
        /// HTTP method
        #[arg(long, short = 'X', default_value = "GET")]
        method: String,
        /// Extra request header, `Name: value` (repeatable)
        #[arg(long = "header", short = 'H', value_name = "HEADER")]
        headers: Vec<String>,
        /// Write the response body to this file instead of stdout
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Treat the network as unreachable
        #[arg(long)]
        offline: bool,
    },
    /// List cache stores and their entries
    Caches,
}

/// Configuration derived from CLI arguments for startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Settings for the interception policy
    pub policy: PolicyConfig,
    /// Explicit cache directory, if given
    pub cache_dir: Option<PathBuf>,
    /// Network timeout, if given
    pub timeout: Option<Duration>,
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with the parsed origin and cache settings
    /// * `Err(CliError::InvalidOrigin)` if the origin is not an http(s) URL
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let origin = parse_origin(&cli.origin)?;
        Ok(StartupConfig {
            policy: PolicyConfig::new(origin).with_cache_name(cli.cache_name.clone()),
            cache_dir: cli.cache_dir.clone(),
            timeout: cli.timeout.map(Duration::from_secs),
        })
    }
}

/// Parses the origin argument, accepting only absolute http(s) URLs
pub fn parse_origin(s: &str) -> Result<Url, CliError> {
    let url = Url::parse(s).map_err(|_| CliError::InvalidOrigin(s.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(CliError::InvalidOrigin(s.to_string())),
    }
}

/// Parses a `Name: value` header argument
pub fn parse_header_arg(s: &str) -> Result<(String, String), CliError> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| CliError::InvalidHeader(s.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidHeader(s.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Builds the request for a `fetch` command
///
/// `path` is resolved against the origin, so both `/styles.css` and an
/// absolute URL are accepted.
pub fn build_request(origin: &Url, path: &str, method: &str, headers: &[String]) -> Result<Request, CliError> {
    let url = origin
        .join(path)
        .map_err(|_| CliError::InvalidPath(path.to_string()))?;
    let mut request = Request::new(method, url);
    for header in headers {
        let (name, value) = parse_header_arg(header)?;
        request = request.with_header(name, value);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origin_accepts_http_and_https() {
        assert!(parse_origin("http://127.0.0.1:5000").is_ok());
        assert!(parse_origin("https://deals.example.com").is_ok());
    }

    #[test]
    fn test_parse_origin_rejects_other_schemes() {
        let err = parse_origin("ftp://example.com").unwrap_err();
        assert!(err.to_string().contains("Invalid origin"));
        assert!(parse_origin("file:///tmp").is_err());
        assert!(parse_origin("localhost:5000/x").is_err());
        assert!(parse_origin("not a url").is_err());
    }

    #[test]
    fn test_parse_header_arg() {
        assert_eq!(
            parse_header_arg("Accept: text/css").unwrap(),
            ("Accept".to_string(), "text/css".to_string())
        );
        assert_eq!(
            parse_header_arg("X-Empty:").unwrap(),
            ("X-Empty".to_string(), String::new())
        );
        assert!(parse_header_arg("no-colon").is_err());
        assert!(parse_header_arg(": value").is_err());
    }

    #[test]
    fn test_build_request_resolves_against_origin() {
        let origin = parse_origin("http://localhost:5000").unwrap();
        let request = build_request(&origin, "/styles.css", "get", &["Accept: text/css".to_string()]).unwrap();
        assert_eq!(request.url.as_str(), "http://localhost:5000/styles.css");
        assert_eq!(request.method, "GET");
        assert_eq!(request.headers, vec![("Accept".to_string(), "text/css".to_string())]);
    }

    #[test]
    fn test_build_request_accepts_absolute_url() {
        let origin = parse_origin("http://localhost:5000").unwrap();
        let request = build_request(&origin, "http://cdn.example.com/lib.js", "GET", &[]).unwrap();
        assert_eq!(request.url.as_str(), "http://cdn.example.com/lib.js");
    }

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::parse_from(["pcd-cache", "--origin", "http://127.0.0.1:5000", "install"]);
        assert_eq!(cli.command, Command::Install);
        assert_eq!(cli.cache_name, "pcd-v1");
        assert!(cli.timeout.is_none());
    }

    #[test]
    fn test_cli_parse_fetch_with_options() {
        let cli = Cli::parse_from([
            "pcd-cache",
            "fetch",
            "/styles.css",
            "-H",
            "Accept: text/css",
            "--offline",
            "--cache-name",
            "pcd-v2",
        ]);
        match cli.command {
            Command::Fetch {
                path,
                method,
                headers,
                output,
                offline,
            } => {
                assert_eq!(path, "/styles.css");
                assert_eq!(method, "GET");
                assert_eq!(headers, vec!["Accept: text/css".to_string()]);
                assert!(output.is_none());
                assert!(offline);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.cache_name, "pcd-v2");
    }

    #[test]
    fn test_startup_config_from_cli() {
        let cli = Cli::parse_from([
            "pcd-cache",
            "--origin",
            "https://deals.example.com",
            "--timeout",
            "10",
            "--cache-dir",
            "/tmp/pcd",
            "activate",
        ]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.policy.origin.as_str(), "https://deals.example.com/");
        assert_eq!(config.policy.cache_name, "pcd-v1");
        assert_eq!(config.timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/pcd")));
    }

    #[test]
    fn test_startup_config_from_cli_invalid_origin() {
        let cli = Cli::parse_from(["pcd-cache", "--origin", "ftp://x", "caches"]);
        assert!(StartupConfig::from_cli(&cli).is_err());
    }
}
