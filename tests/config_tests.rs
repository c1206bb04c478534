//! Layered configuration loading and validation.

use camino::Utf8PathBuf;
use cloudvol::config::{
    CloudvolConfig, ConfigError, DEFAULT_MOUNT_ROOT, DEFAULT_PORT, DEFAULT_SOCKET_PATH,
    TCP_LISTEN_ADDRESS,
};
use cloudvol::plugin::ListenTarget;
use cloudvol::test_support::EnvGuard;
use rstest::rstest;
use std::net::SocketAddr;

const CLOUDVOL_VARS: [&str; 10] = [
    "CLOUDVOL_CONFIG_PATH",
    "CLOUDVOL_MODE",
    "CLOUDVOL_PORT",
    "CLOUDVOL_SOCK",
    "CLOUDVOL_SOCKET_PATH",
    "CLOUDVOL_MOUNT_ROOT",
    "CLOUDVOL_HOST_ROOT",
    "CLOUDVOL_PROJECT",
    "CLOUDVOL_ZONE",
    "CLOUDVOL_INSTANCE",
];

fn cleared_except(set: &[&str]) -> Vec<&'static str> {
    CLOUDVOL_VARS
        .iter()
        .copied()
        .filter(|key| !set.contains(key))
        .collect()
}

#[tokio::test]
async fn defaults_apply_without_sources() {
    let _guard = EnvGuard::apply(&[], &CLOUDVOL_VARS).await;

    let config = CloudvolConfig::load_without_cli_args().expect("defaults load");

    assert_eq!(config.mode, "gce");
    assert_eq!(config.port, DEFAULT_PORT);
    assert!(!config.sock);
    assert_eq!(config.socket_path, DEFAULT_SOCKET_PATH);
    assert_eq!(config.mount_root, DEFAULT_MOUNT_ROOT);
    assert!(config.validate().is_ok());
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let set = ["CLOUDVOL_PORT", "CLOUDVOL_MOUNT_ROOT", "CLOUDVOL_ZONE"];
    let _guard = EnvGuard::apply(
        &[
            ("CLOUDVOL_PORT", "9090"),
            ("CLOUDVOL_MOUNT_ROOT", "/srv/volumes"),
            ("CLOUDVOL_ZONE", "europe-west1-b"),
        ],
        &cleared_except(&set),
    )
    .await;

    let config = CloudvolConfig::load_without_cli_args().expect("environment loads");

    assert_eq!(config.port, 9090);
    assert_eq!(
        config.mount_root_path().expect("absolute root"),
        Utf8PathBuf::from("/srv/volumes")
    );
    assert_eq!(
        config.identity_overrides().zone.as_deref(),
        Some("europe-west1-b")
    );
}

#[tokio::test]
async fn unknown_mode_loads_but_fails_validation() {
    let _guard = EnvGuard::apply(&[("CLOUDVOL_MODE", "aws")], &cleared_except(&["CLOUDVOL_MODE"]))
        .await;

    let config = CloudvolConfig::load_without_cli_args().expect("mode is a plain string");

    assert_eq!(
        config.validate(),
        Err(ConfigError::UnknownMode(String::from("aws")))
    );
}

#[rstest]
#[case::empty("", "empty")]
#[case::relative("volumes", "absolute")]
fn unusable_mount_roots_are_rejected(#[case] root: &str, #[case] fragment: &str) {
    let config = CloudvolConfig {
        mount_root: root.to_owned(),
        ..CloudvolConfig::default()
    };

    let err = config.validate().expect_err("mount root rejected");
    let ConfigError::InvalidMountRoot(ref message) = err else {
        panic!("expected InvalidMountRoot, got {err:?}");
    };
    assert!(message.contains(fragment), "message: {message}");
}

#[test]
fn tcp_listener_uses_the_configured_port() {
    let config = CloudvolConfig {
        port: 9000,
        ..CloudvolConfig::default()
    };
    assert_eq!(
        config.listen_target(),
        Ok(ListenTarget::Tcp(SocketAddr::new(TCP_LISTEN_ADDRESS, 9000)))
    );
}

#[test]
fn socket_mode_ignores_the_port() {
    let config = CloudvolConfig {
        port: 0,
        sock: true,
        ..CloudvolConfig::default()
    };
    assert_eq!(
        config.listen_target(),
        Ok(ListenTarget::Unix(Utf8PathBuf::from(DEFAULT_SOCKET_PATH)))
    );
}

#[rstest]
#[case::zero_port(false, DEFAULT_SOCKET_PATH, 0, ConfigError::InvalidPort)]
#[case::blank_socket(true, " ", DEFAULT_PORT, ConfigError::InvalidSocketPath)]
fn unusable_listeners_are_rejected(
    #[case] sock: bool,
    #[case] socket_path: &str,
    #[case] port: u16,
    #[case] expected: ConfigError,
) {
    let config = CloudvolConfig {
        sock,
        socket_path: socket_path.to_owned(),
        port,
        ..CloudvolConfig::default()
    };
    assert_eq!(config.validate(), Err(expected));
}
