use sarcoreg::{CoregistrationConfig, SarError};
use std::io::Write;
use tempfile::TempDir;

#[test]
fn test_config_json_round_trip() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("coregistration.json");

    let mut config = CoregistrationConfig {
        resampling_kernel: "bicubic".to_string(),
        dem_extension_samples: 12,
        output_elevation: true,
        no_data_value: -32768.0,
        ..Default::default()
    };
    config.solver.bistatic_correction = false;
    config.to_json_file(&path).expect("Failed to write config");

    let loaded = CoregistrationConfig::from_json_file(&path).expect("Failed to read config");
    assert_eq!(loaded, config);
}

#[test]
fn test_partial_config_uses_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("partial.json");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, r#"{{ "resampling_kernel": "bisinc-11-point", "solver": {{ "max_iterations": 20 }} }}"#).unwrap();

    let loaded = CoregistrationConfig::from_json_file(&path).unwrap();
    let defaults = CoregistrationConfig::default();
    assert_eq!(loaded.resampling_kernel, "bisinc-11-point");
    assert_eq!(loaded.solver.max_iterations, 20);
    assert_eq!(loaded.solver.time_tolerance, defaults.solver.time_tolerance);
    assert!(loaded.solver.bistatic_correction);
    assert_eq!(loaded.dem_extension_samples, 20);
    assert!(loaded.mask_out_no_elevation);
}

#[test]
fn test_invalid_config_files_are_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");

    let path = temp_dir.path().join("kernel.json");
    std::fs::write(&path, r#"{ "resampling_kernel": "spline-9" }"#).unwrap();
    assert!(matches!(CoregistrationConfig::from_json_file(&path), Err(SarError::Configuration(_))));

    let path = temp_dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(CoregistrationConfig::from_json_file(&path), Err(SarError::Json(_))));

    let missing = temp_dir.path().join("missing.json");
    assert!(matches!(CoregistrationConfig::from_json_file(&missing), Err(SarError::Io(_))));
}
