//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation, serialization and the
//! missing-file fallback.

use super::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = FluxConfig::default();
    config.validate().unwrap();

    assert_eq!(config.display.device, PathBuf::from("/dev/dri/card0"));
    assert_eq!(config.display.buffers, 3);
    assert_eq!(config.ipc.socket_path, PathBuf::from("/tmp/flux_comp.sock"));
    assert_eq!(config.scene.max_windows, 10);
    assert_eq!(config.shell.menu_key, 125);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_configuration_serialization_roundtrip() -> Result<()> {
    let mut original = FluxConfig::default();
    original.shell.font = Some(PathBuf::from("/usr/share/flux/roboto.toml"));
    original.shell.home_image = Some(PathBuf::from("/usr/share/flux/recent.png"));
    original.display.flip_retries = 5;

    let toml_string = toml::to_string(&original)?;
    let deserialized: FluxConfig = toml::from_str(&toml_string)?;

    assert_eq!(original, deserialized);
    Ok(())
}

#[test]
fn test_partial_file_keeps_defaults() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("flux.toml");

    let test_config = r##"
[display]
device = "/dev/dri/card1"
flip_timeout_ms = 50

[scene]
max_windows = 4

[shell]
font = "assets/roboto.toml"
home_image = "assets/recent.png"
background_color = "#102030ff"
"##;
    fs::write(&file_path, test_config)?;

    let config = FluxConfig::load(&file_path)?;
    assert_eq!(config.display.device, PathBuf::from("/dev/dri/card1"));
    assert_eq!(config.display.flip_timeout_ms, 50);
    assert_eq!(config.display.flip_timeout_cycles, 10);
    assert_eq!(config.scene.max_windows, 4);
    assert_eq!(config.scene.max_widgets, 256);
    assert_eq!(config.shell.font, Some(PathBuf::from("assets/roboto.toml")));
    assert_eq!(config.shell.home_image, Some(PathBuf::from("assets/recent.png")));
    assert_eq!(config.shell.menu_title, "Menu");
    assert_eq!(config.ipc, IpcConfig::default());
    Ok(())
}

#[test]
fn test_present_options_follow_display_section() {
    let display = DisplayConfig {
        buffers: 2,
        flip_timeout_ms: 40,
        flip_timeout_cycles: 3,
        ..DisplayConfig::default()
    };
    let options = display.present_options();
    assert_eq!(options.buffers, 2);
    assert_eq!(options.flip_timeout, Duration::from_millis(40));
    assert_eq!(options.flip_timeout_cycles, 3);
    assert_eq!(display.frame_interval(), Duration::from_millis(16));
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut config = FluxConfig::default();
    config.display.buffers = 1;
    assert!(config.validate().is_err());

    let mut config = FluxConfig::default();
    config.ipc.max_clients = 0;
    assert!(config.validate().is_err());

    let mut config = FluxConfig::default();
    config.shell.menu_color = "red".to_string();
    assert!(config.validate().is_err());

    let mut config = FluxConfig::default();
    config.shell.heading_size = 0.0;
    assert!(config.validate().is_err());

    let mut config = FluxConfig::default();
    config.display.frame_interval_ms = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_file_is_an_error() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("broken.toml");
    fs::write(&file_path, "[display\nbuffers = ")?;

    let err = FluxConfig::load(&file_path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));

    // A file that exists still has to parse when falling back.
    assert!(FluxConfig::load_or_default(&file_path).is_err());
    Ok(())
}

#[test]
fn test_missing_file_falls_back_to_defaults() -> Result<()> {
    let dir = tempdir()?;
    let config = FluxConfig::load_or_default(dir.path().join("absent.toml"))?;
    assert_eq!(config, FluxConfig::default());
    Ok(())
}

#[test]
fn test_save_then_load() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("saved.toml");

    let mut config = FluxConfig::default();
    config.input.enabled = false;
    config.logging.level = "debug".to_string();
    config.save(&file_path)?;

    assert_eq!(FluxConfig::load(&file_path)?, config);
    Ok(())
}
