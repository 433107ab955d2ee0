//! CLI-specific config resolution: profile + flag overrides.

use std::path::PathBuf;
use std::sync::Arc;

use totosync_api::{StaticEndpoint, StaticToken, TokenProvider, TransportConfig};
use totosync_config::{
    Config, Profile, ProfileTokenProvider, config_path, load_config_from, profile_endpoint,
    profile_to_sync_config, profile_to_transport_config, token_source,
};
use totosync_core::SyncConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything a command needs to talk to one backend.
pub struct Resolved {
    pub name: String,
    pub profile: Profile,
    pub endpoint: StaticEndpoint,
    pub token: Arc<dyn TokenProvider>,
    /// Where the token comes from (`flag`, `env:VAR`, `keyring`, ...).
    pub token_source: String,
    pub sync: SyncConfig,
    pub transport: TransportConfig,
}

/// The config file in effect: `--config` or the platform default.
pub fn effective_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Load the config file and apply flag overrides.
///
/// A missing profile is fine when `--endpoint` is given; the defaults
/// are used for everything else.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let path = effective_path(global);
    let cfg = load_config_from(&path)?;

    let (name, mut profile) = match cfg.profile(global.profile.as_deref()) {
        Ok((name, profile)) => (name, profile.clone()),
        Err(_) if global.endpoint.is_some() => (
            global.profile.clone().unwrap_or_else(|| "default".into()),
            Profile::default(),
        ),
        Err(_) => return Err(profile_not_found(&cfg, global, &path)),
    };

    if let Some(ref endpoint) = global.endpoint {
        profile.endpoint.clone_from(endpoint);
    }
    if global.insecure {
        profile.insecure = Some(true);
    }

    let (token, source): (Arc<dyn TokenProvider>, String) = match global.token {
        Some(ref token) => (Arc::new(StaticToken::new(token.clone())), "flag".into()),
        None => (
            Arc::new(ProfileTokenProvider::new(profile.clone(), name.clone())),
            token_source(&profile, &name).to_string(),
        ),
    };

    Ok(Resolved {
        endpoint: profile_endpoint(&profile)?,
        sync: profile_to_sync_config(&profile)?,
        transport: profile_to_transport_config(&profile)?,
        token,
        token_source: source,
        name,
        profile,
    })
}

fn profile_not_found(cfg: &Config, global: &GlobalOpts, path: &std::path::Path) -> CliError {
    let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    available.sort_unstable();
    CliError::ProfileNotFound {
        name: global
            .profile
            .clone()
            .or_else(|| cfg.default_profile.clone())
            .unwrap_or_else(|| "default".into()),
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
        path: path.display().to_string(),
    }
}
