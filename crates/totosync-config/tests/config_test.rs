#![allow(clippy::unwrap_used)]
// Integration tests for config loading and token resolution.

use std::path::Path;
use std::time::Duration;

use figment::Jail;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

use totosync_api::TokenProvider;
use totosync_config::{
    ConfigError, Profile, ProfileTokenProvider, TokenSource, load_config_from,
    profile_to_sync_config, resolve_token, token_source,
};
use totosync_core::BaselineOrdering;

const SAMPLE: &str = r#"
default_profile = "home"

[profiles.home]
endpoint = "http://192.168.1.1:8080"
token = "plain-token"
backoff_ms = [250, 500]
poll_interval_secs = 5
ordering = "push-wins"
latest_events = ["mqtt_log_new"]

[profiles.lab]
endpoint = "https://lab.local"
token_env = "LAB_TOKEN"
entity_prefix = "node"
entity_key = "id"
"#;

// ── Loading ─────────────────────────────────────────────────────────

#[test]
fn loads_profiles_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let cfg = load_config_from(&path).unwrap();
    assert_eq!(cfg.default_profile.as_deref(), Some("home"));
    assert_eq!(cfg.profiles.len(), 2);

    let (name, home) = cfg.profile(None).unwrap();
    assert_eq!(name, "home");
    assert_eq!(home.endpoint, "http://192.168.1.1:8080");
    assert_eq!(home.ordering, Some(BaselineOrdering::PushWins));

    let sync = profile_to_sync_config(home).unwrap();
    assert_eq!(sync.backoff.steps(), [Duration::from_millis(250), Duration::from_millis(500)]);
    assert_eq!(sync.poll_interval, Duration::from_secs(5));
    assert!(sync.latest_events.contains("mqtt_log_new"));

    let (_, lab) = cfg.profile(Some("lab")).unwrap();
    let sync = profile_to_sync_config(lab).unwrap();
    assert_eq!(sync.entity.upsert_event(), "node_upsert");
    assert_eq!(sync.entity.key_field, "id");
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(cfg.default_profile.as_deref(), Some("default"));
    assert!(matches!(
        cfg.profile(Some("home")),
        Err(ConfigError::UnknownProfile { .. })
    ));
}

#[test]
fn malformed_file_is_a_figment_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[profiles.home]\nendpoint = 42\n").unwrap();
    assert!(matches!(load_config_from(&path), Err(ConfigError::Figment(_))));
}

#[test]
fn environment_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", SAMPLE)?;
        jail.set_env("TOTOSYNC_DEFAULT_PROFILE", "lab");
        jail.set_env("TOTOSYNC_PROFILES__LAB__POLL_INTERVAL_SECS", "12");

        let cfg = load_config_from(Path::new("config.toml")).unwrap();
        let (name, lab) = cfg.profile(None).unwrap();
        assert_eq!(name, "lab");
        assert_eq!(lab.poll_interval_secs, Some(12));
        Ok(())
    });
}

// ── Token resolution ────────────────────────────────────────────────

#[test]
fn env_var_beats_plaintext() {
    Jail::expect_with(|jail| {
        jail.set_env("TOTOSYNC_TEST_TOKEN_A", "from-env");
        let profile = Profile {
            token: Some("from-file".into()),
            token_env: Some("TOTOSYNC_TEST_TOKEN_A".into()),
            ..Profile::new("http://h")
        };

        let token = resolve_token(&profile, "token-test-a").unwrap();
        assert_eq!(token.expose_secret(), "from-env");
        assert_eq!(
            token_source(&profile, "token-test-a"),
            TokenSource::Env("TOTOSYNC_TEST_TOKEN_A".into())
        );
        Ok(())
    });
}

#[test]
fn unset_env_var_falls_back_to_plaintext() {
    let profile = Profile {
        token: Some("from-file".into()),
        token_env: Some("TOTOSYNC_TEST_TOKEN_UNSET".into()),
        ..Profile::new("http://h")
    };
    let token = resolve_token(&profile, "token-test-b").unwrap();
    assert_eq!(token.expose_secret(), "from-file");
    assert_eq!(token_source(&profile, "token-test-b"), TokenSource::Plaintext);
}

#[test]
fn no_token_anywhere() {
    let profile = Profile::new("http://h");
    assert!(matches!(
        resolve_token(&profile, "token-test-c"),
        Err(ConfigError::NoToken { .. })
    ));
    assert_eq!(token_source(&profile, "token-test-c"), TokenSource::None);
    assert!(ProfileTokenProvider::new(profile, "token-test-c").token().is_none());
}

#[test]
fn provider_picks_up_rotated_token() {
    Jail::expect_with(|jail| {
        let profile = Profile {
            token_env: Some("TOTOSYNC_TEST_TOKEN_D".into()),
            ..Profile::new("http://h")
        };
        let provider = ProfileTokenProvider::new(profile, "token-test-d");

        jail.set_env("TOTOSYNC_TEST_TOKEN_D", "first");
        assert_eq!(provider.token().unwrap().expose_secret(), "first");
        jail.set_env("TOTOSYNC_TEST_TOKEN_D", "second");
        assert_eq!(provider.token().unwrap().expose_secret(), "second");
        Ok(())
    });
}
