//! Coverage for config parsing and path resolution.

use std::path::Path;
use std::time::Duration;

use straylight::config::{load_config, AllocationMode, Config, RuntimePaths};

fn parse(toml: &str) -> Config {
    match toml::from_str(toml) {
        Ok(config) => config,
        Err(err) => panic!("config should parse: {err}"),
    }
}

#[test]
fn defaults_describe_a_shared_controller() {
    let config = Config::default();
    let allocation = &config.allocation;
    assert_eq!(allocation.mode, AllocationMode::Shared);
    assert_eq!(allocation.workers, 1);
    assert_eq!(allocation.max_retries, 5);
    assert_eq!(allocation.conflict_retries, 5);
    assert_eq!(allocation.record_name, "scc-uid");
    assert_eq!(allocation.repair_interval(), Duration::from_secs(600));
    assert_eq!(allocation.resync_interval(), Some(Duration::from_secs(30)));

    match allocation.uid_range() {
        Ok(range) => {
            assert_eq!(range.to_string(), "1000000000-1999999999/10000");
            assert_eq!(range.size(), 100_000);
        }
        Err(err) => panic!("default uid range should parse: {err}"),
    }
    match allocation.mcs_range() {
        Ok(labels) => assert_eq!(labels.to_string(), "s0:/2"),
        Err(err) => panic!("default mcs range should parse: {err}"),
    }

    assert_eq!(config.annotations.uid_range, "straylight.io/uid-range");
    assert_eq!(config.annotations.supplemental_groups, "straylight.io/supplemental-groups");
    assert_eq!(config.annotations.mcs, "straylight.io/mcs");
    assert_eq!(config.annotations.validated_policy, "straylight.io/policy");
}

#[test]
fn allocation_section_overrides_defaults() {
    let config = parse(
        r#"
[allocation]
uid_range = "10000-19999/100"
mcs_range = "s1:/3,128"
mcs_labels_per_project = 2
mode = "in-process"
workers = 4
resync_interval_secs = 0

[annotations]
mcs = "example.com/mcs"
"#,
    );
    let allocation = &config.allocation;
    assert_eq!(allocation.mode, AllocationMode::InProcess);
    assert_eq!(allocation.workers, 4);
    assert_eq!(allocation.mcs_labels_per_project, 2);
    assert_eq!(allocation.resync_interval(), None);
    assert_eq!(allocation.record_name, "scc-uid");
    match allocation.uid_range() {
        Ok(range) => assert_eq!(range.size(), 100),
        Err(err) => panic!("uid range should parse: {err}"),
    }
    match allocation.mcs_range() {
        Ok(labels) => assert_eq!(labels.to_string(), "s1:/3,128"),
        Err(err) => panic!("mcs range should parse: {err}"),
    }
    assert_eq!(config.annotations.mcs, "example.com/mcs");
    assert_eq!(config.annotations.uid_range, "straylight.io/uid-range");
}

#[test]
fn malformed_ranges_surface_on_use() {
    let config = parse("[allocation]\nuid_range = \"20-10/2\"\nmcs_range = \"s0\"\n");
    assert!(config.allocation.uid_range().is_err());
    assert!(config.allocation.mcs_range().is_err());
}

#[test]
fn unknown_mode_is_rejected() {
    assert!(toml::from_str::<Config>("[allocation]\nmode = \"clustered\"\n").is_err());
}

#[test]
fn runtime_paths_default_under_root() {
    let root = Path::new("/srv/straylight");
    let paths = RuntimePaths::resolve(root, &Config::default());
    assert_eq!(paths.root, root);
    assert_eq!(paths.config_toml, root.join("config.toml"));
    assert_eq!(paths.database, root.join("straylight.db"));
    assert_eq!(paths.policies_dir, root.join("policies"));
    assert_eq!(paths.logs_dir, root.join("logs"));
}

#[test]
fn runtime_paths_honour_overrides() {
    let config = parse(
        r#"
[store]
database = "/var/lib/straylight/state.db"

[policies]
dir = "/etc/straylight/policies"
"#,
    );
    let paths = RuntimePaths::resolve(Path::new("/srv/straylight"), &config);
    assert_eq!(paths.database, Path::new("/var/lib/straylight/state.db"));
    assert_eq!(paths.policies_dir, Path::new("/etc/straylight/policies"));
    assert_eq!(paths.logs_dir, Path::new("/srv/straylight/logs"));
}

#[test]
fn load_config_reports_the_path() {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => panic!("failed to create tempdir: {err}"),
    };
    let path = dir.path().join("config.toml");

    let missing = match load_config(&path) {
        Ok(_) => panic!("missing file should fail"),
        Err(err) => err.to_string(),
    };
    assert!(missing.contains("failed to read config"));

    if let Err(err) = std::fs::write(&path, "[allocation\n") {
        panic!("failed to write config: {err}");
    }
    let broken = match load_config(&path) {
        Ok(_) => panic!("broken file should fail"),
        Err(err) => err.to_string(),
    };
    assert!(broken.contains("failed to parse config"));

    if let Err(err) = std::fs::write(&path, "[allocation]\nworkers = 3\n") {
        panic!("failed to write config: {err}");
    }
    match load_config(&path) {
        Ok(config) => assert_eq!(config.allocation.workers, 3),
        Err(err) => panic!("config should load: {err}"),
    }
}
