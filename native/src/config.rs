//! Process-scoped configuration, installed once before first use.

use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Observed on Windows 10: environment blocks rarely exceed ~229 KiB.
pub const DEFAULT_ENV_BLOCK_CEILING: usize = 0x38000;
pub const DEFAULT_PIPE_NAME: &str = r"\\.\pipe\host-probe";
pub const DEFAULT_PIPE_BUFFER_SIZE: u32 = 4096;
pub const DEFAULT_PIPE_CLIENT_TIMEOUT_MS: u32 = 5000;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Hard upper bound on any single remote read, regardless of configuration.
pub const MAX_ENV_BLOCK_CEILING: usize = 16 * 1024 * 1024;

static CONFIG: OnceCell<ProbeConfig> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Upper bound on bytes copied out of a remote environment block.
    pub env_block_ceiling: usize,
    pub pipe_name: String,
    pub pipe_buffer_size: u32,
    pub pipe_max_instances: u32,
    pub pipe_client_timeout_ms: u32,
    /// Largest reassembled pipe message the server accepts.
    pub max_message_size: usize,
    /// Render account names as `DOMAIN\name`.
    pub prepend_domain: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            env_block_ceiling: DEFAULT_ENV_BLOCK_CEILING,
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            pipe_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
            pipe_max_instances: 1,
            pipe_client_timeout_ms: DEFAULT_PIPE_CLIENT_TIMEOUT_MS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            prepend_domain: true,
        }
    }
}

impl ProbeConfig {
    /// Build a config from `HOST_PROBE_*` variables, after loading `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    ///
    /// Unparsable values are logged and replaced by their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let env_block_ceiling = parse_or(
            &lookup,
            "HOST_PROBE_ENV_BLOCK_CEILING",
            defaults.env_block_ceiling,
        );
        let env_block_ceiling = if env_block_ceiling == 0 || env_block_ceiling > MAX_ENV_BLOCK_CEILING
        {
            warn!(
                "[CONFIG] HOST_PROBE_ENV_BLOCK_CEILING={} out of range, using {:#x}",
                env_block_ceiling, defaults.env_block_ceiling
            );
            defaults.env_block_ceiling
        } else {
            env_block_ceiling
        };

        let pipe_buffer_size = parse_or(
            &lookup,
            "HOST_PROBE_PIPE_BUFFER_SIZE",
            defaults.pipe_buffer_size,
        )
        .max(1);

        let pipe_max_instances = parse_or(
            &lookup,
            "HOST_PROBE_PIPE_MAX_INSTANCES",
            defaults.pipe_max_instances,
        )
        .clamp(1, 255);

        Self {
            env_block_ceiling,
            pipe_name: lookup("HOST_PROBE_PIPE_NAME")
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(defaults.pipe_name),
            pipe_buffer_size,
            pipe_max_instances,
            pipe_client_timeout_ms: parse_or(
                &lookup,
                "HOST_PROBE_PIPE_CLIENT_TIMEOUT_MS",
                defaults.pipe_client_timeout_ms,
            ),
            max_message_size: parse_or(
                &lookup,
                "HOST_PROBE_MAX_MESSAGE_SIZE",
                defaults.max_message_size,
            ),
            prepend_domain: parse_or(
                &lookup,
                "HOST_PROBE_PREPEND_DOMAIN",
                defaults.prepend_domain,
            ),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Debug,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => {
                debug!("[CONFIG] {} = {:?}", key, value);
                value
            }
            Err(_) => {
                warn!(
                    "[CONFIG] Ignoring invalid {}='{}', using {:?}",
                    key, raw, default
                );
                default
            }
        },
        None => default,
    }
}

/// Install the process configuration. Only the first call takes effect.
///
/// Returns the installed configuration, which differs from `config` when an
/// earlier call already won.
pub fn init(config: ProbeConfig) -> &'static ProbeConfig {
    let mut installed_now = false;
    let installed = CONFIG.get_or_init(|| {
        installed_now = true;
        config
    });

    if installed_now {
        info!("[CONFIG] Configuration installed: {:?}", installed);
    } else {
        debug!("[CONFIG] Configuration already installed, keeping existing values");
    }

    installed
}

/// Whether [`init`] has run.
pub fn is_initialized() -> bool {
    CONFIG.get().is_some()
}

/// The configuration [`init`] installed, if any.
pub fn installed() -> Option<&'static ProbeConfig> {
    CONFIG.get()
}

/// The installed configuration, or defaults when none was installed.
pub fn get() -> ProbeConfig {
    CONFIG.get().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_native_helper_constants() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.env_block_ceiling, 0x38000);
        assert_eq!(cfg.pipe_client_timeout_ms, 5000);
        assert_eq!(cfg.pipe_buffer_size, 4096);
        assert!(cfg.prepend_domain);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = ProbeConfig::from_lookup(lookup_from(&[
            ("HOST_PROBE_ENV_BLOCK_CEILING", "65536"),
            ("HOST_PROBE_PIPE_NAME", r"\\.\pipe\custom"),
            ("HOST_PROBE_PIPE_MAX_INSTANCES", "4"),
            ("HOST_PROBE_PREPEND_DOMAIN", "false"),
        ]));
        assert_eq!(cfg.env_block_ceiling, 65536);
        assert_eq!(cfg.pipe_name, r"\\.\pipe\custom");
        assert_eq!(cfg.pipe_max_instances, 4);
        assert!(!cfg.prepend_domain);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let cfg = ProbeConfig::from_lookup(lookup_from(&[
            ("HOST_PROBE_PIPE_BUFFER_SIZE", "lots"),
            ("HOST_PROBE_ENV_BLOCK_CEILING", "0"),
            ("HOST_PROBE_PIPE_NAME", "   "),
        ]));
        assert_eq!(cfg.pipe_buffer_size, DEFAULT_PIPE_BUFFER_SIZE);
        assert_eq!(cfg.env_block_ceiling, DEFAULT_ENV_BLOCK_CEILING);
        assert_eq!(cfg.pipe_name, DEFAULT_PIPE_NAME);
    }

    #[test]
    fn oversized_ceiling_is_rejected() {
        let too_big = (MAX_ENV_BLOCK_CEILING + 1).to_string();
        let cfg = ProbeConfig::from_lookup(lookup_from(&[(
            "HOST_PROBE_ENV_BLOCK_CEILING",
            too_big.as_str(),
        )]));
        assert_eq!(cfg.env_block_ceiling, DEFAULT_ENV_BLOCK_CEILING);
    }

    #[test]
    fn init_is_idempotent() {
        let first = init(ProbeConfig::default());
        let second = init(ProbeConfig {
            pipe_buffer_size: 1,
            ..ProbeConfig::default()
        });
        assert!(std::ptr::eq(first, second));
        assert!(is_initialized());
        assert_eq!(get(), *first);
        assert!(std::ptr::eq(installed().unwrap(), first));
    }
}
