use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};
use color_eyre::eyre::{Result, eyre};
use directories::ProjectDirs;

use manda_worker::ReconnectPolicy;

const BRIDGE_DIR_NAME: &str = "bridge";

#[derive(Debug, Clone, Parser)]
#[command(name = "manda-server", version, about = "Runs many messaging instances behind one API")]
pub struct Config {
    /// Address the HTTP and WebSocket server listens on.
    #[arg(long, env = "MANDA_ADDR", default_value = "0.0.0.0:3000")]
    pub addr: SocketAddr,

    /// SQLite database file. Defaults to the platform data directory.
    #[arg(long, env = "MANDA_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// HS256 secret used to validate bearer tokens.
    #[arg(long, env = "MANDA_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Lifetime of issued tokens.
    #[arg(long, env = "MANDA_JWT_TTL_SECS", default_value_t = 86_400)]
    pub jwt_ttl_secs: i64,

    /// Directory holding the protocol sidecar (`package.json`, `index.ts`).
    #[arg(long, env = "MANDA_BRIDGE_DIR")]
    pub bridge_dir: Option<PathBuf>,

    /// Reopen instances that were live when the server last stopped.
    #[arg(long, env = "MANDA_RESTORE", default_value_t = true, action = ArgAction::Set)]
    pub restore: bool,

    #[arg(long, env = "MANDA_RECONNECT_DELAY_MS", default_value_t = 1_000)]
    pub reconnect_delay_ms: u64,

    #[arg(long, env = "MANDA_RECONNECT_MULTIPLIER", default_value_t = 2.0)]
    pub reconnect_multiplier: f64,

    #[arg(long, env = "MANDA_RECONNECT_MAX_DELAY_MS", default_value_t = 60_000)]
    pub reconnect_max_delay_ms: u64,

    /// Attempts before an instance is marked `error`. 0 retries forever.
    #[arg(long, env = "MANDA_RECONNECT_MAX_ATTEMPTS", default_value_t = 10)]
    pub reconnect_max_attempts: u32,

    /// Timeout for one command round trip to the sidecar.
    #[arg(long, env = "MANDA_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect_delay_ms),
            multiplier: self.reconnect_multiplier.max(1.0),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: (self.reconnect_max_attempts > 0).then_some(self.reconnect_max_attempts),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured sidecar directory, or the first `bridge/` found next
    /// to the executable, in the working directory or in the platform data
    /// directory.
    pub fn resolve_bridge_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.bridge_dir {
            if !has_package_json(dir) {
                return Err(eyre!("No package.json in bridge directory {}", dir.display()));
            }
            return Ok(dir.clone());
        }

        let exe_path = std::env::current_exe()?;
        let mut current = exe_path.parent();
        while let Some(dir) = current {
            let bridge = dir.join(BRIDGE_DIR_NAME);
            if has_package_json(&bridge) {
                return Ok(bridge);
            }
            current = dir.parent();
        }

        let bridge = std::env::current_dir()?.join(BRIDGE_DIR_NAME);
        if has_package_json(&bridge) {
            return Ok(bridge);
        }

        if let Some(bridge) = installed_bridge_dir().filter(|dir| has_package_json(dir)) {
            return Ok(bridge);
        }

        Err(eyre!(
            "Could not find the bridge directory. Set MANDA_BRIDGE_DIR or run from the project root."
        ))
    }
}

/// Where an installed copy of the sidecar lives, next to the default database.
fn installed_bridge_dir() -> Option<PathBuf> {
    ProjectDirs::from("com.br", "manda", "manda").map(|dirs| dirs.data_dir().join(BRIDGE_DIR_NAME))
}

fn has_package_json(dir: &Path) -> bool {
    dir.join("package.json").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["manda-server", "--jwt-secret", "s3cret"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert_eq!(config.addr.port(), 3000);
        assert!(config.restore);
        assert_eq!(config.jwt_ttl_secs, 86_400);
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::default());
    }

    #[test]
    fn zero_attempts_means_unlimited() {
        let config = parse(&["--reconnect-max-attempts", "0", "--restore", "false"]);
        assert_eq!(config.reconnect_policy().max_attempts, None);
        assert!(!config.restore);
    }

    #[test]
    fn installed_bridge_sits_in_the_data_dir() {
        if let Some(dir) = installed_bridge_dir() {
            assert!(dir.ends_with(BRIDGE_DIR_NAME));
            assert!(dir.to_string_lossy().contains("manda"));
        }
    }

    #[test]
    fn explicit_bridge_dir_must_have_package_json() {
        let config = parse(&["--bridge-dir", "/definitely/not/here"]);
        assert!(config.resolve_bridge_dir().is_err());
    }
}
