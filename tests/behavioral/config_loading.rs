// ABOUTME: Behavioral tests for loading configuration files from disk

use pretty_assertions::assert_eq;
use roomshell::config::AppConfig;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_explicit_file_overrides_defaults() {
    let file = config_file(
        r#"
        [rooms]
        rooms_path = "/srv/rooms"

        [container]
        image = "runner:2"
        release_grace_ms = 1500

        [local]
        shell = "zsh"
        cols = 120
        rows = 40
        "#,
    );

    let config = AppConfig::load(Some(file.path())).unwrap();

    assert_eq!(config.rooms.rooms_path, PathBuf::from("/srv/rooms"));
    assert_eq!(config.container.image, "runner:2");
    assert_eq!(config.container.release_grace(), Duration::from_millis(1500));
    assert_eq!(config.local.shell_program(), "zsh");
    assert_eq!((config.local.cols, config.local.rows), (120, 40));
    assert_eq!(config.host_path_for("r9"), PathBuf::from("/srv/rooms/r9"));
}

#[test]
fn test_unset_sections_keep_defaults() {
    let file = config_file("[session]\nidle_timeout_secs = 60\n");

    let config = AppConfig::load(Some(file.path())).unwrap();

    assert_eq!(config.session.idle_timeout(), Some(Duration::from_secs(60)));
    assert_eq!(config.container.network_mode, "none");
    assert_eq!(config.container.name_prefix, "collab-room-");
}

#[test]
fn test_layers_merge_field_by_field() {
    let system = config_file(
        r#"
        [container]
        memory_bytes = 1073741824
        network_mode = "bridge"

        [local]
        cols = 132
        "#,
    );
    let user = config_file(
        r#"
        [container]
        image = "custom"

        [local]
        shell = "zsh"
        "#,
    );

    let config = AppConfig::load_layered([system.path(), user.path()]).unwrap();

    assert_eq!(config.container.image, "custom");
    assert_eq!(config.container.memory_bytes, 1024 * 1024 * 1024);
    assert_eq!(config.container.network_mode, "bridge");
    assert_eq!(config.container.cpu_shares, 512);
    assert_eq!(config.local.shell_program(), "zsh");
    assert_eq!(config.local.cols, 132);
}

#[test]
fn test_later_layer_wins_on_same_field() {
    let system = config_file("[container]\nimage = \"base\"\nrelease_grace_ms = 200\n");
    let user = config_file("[container]\nimage = \"override\"\n");

    let config = AppConfig::load_layered([system.path(), user.path()]).unwrap();

    assert_eq!(config.container.image, "override");
    assert_eq!(config.container.release_grace(), Duration::from_millis(200));
}

#[test]
fn test_malformed_file_is_an_error() {
    let file = config_file("[container\nimage = ");

    let err = AppConfig::load(Some(file.path())).unwrap_err();

    assert!(err.to_string().contains("Failed to parse config"), "got: {err}");
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();

    let err = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();

    assert!(err.to_string().contains("Failed to read config"), "got: {err}");
}
