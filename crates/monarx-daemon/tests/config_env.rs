// Environment overrides live in their own test binary: the process
// environment is shared by every test in a binary

use monarx_daemon::Config;
use std::fs;

#[test]
fn test_env_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        "[thresholds]\ncpu_limit = 70.0\nswap_limit = 40.0\n\n[monitoring]\ncheck_every_secs = 2\n",
    )
    .unwrap();

    std::env::set_var("MONARX_THRESHOLDS__CPU_LIMIT", "95");
    std::env::set_var("MONARX_MONITORING__TOP_N", "8");
    let loaded = Config::load(&path);
    std::env::remove_var("MONARX_THRESHOLDS__CPU_LIMIT");
    std::env::remove_var("MONARX_MONITORING__TOP_N");

    let config = loaded.unwrap();
    assert_eq!(config.thresholds.cpu_limit, 95.0);
    assert_eq!(config.thresholds.swap_limit, 40.0);
    assert_eq!(config.monitoring.check_every_secs, 2);
    assert_eq!(config.monitoring.top_n, 8);

    std::env::set_var("MONARX_THRESHOLDS__SWAP_LIMIT", "0");
    let rejected = Config::load(&path);
    std::env::remove_var("MONARX_THRESHOLDS__SWAP_LIMIT");
    assert!(rejected.is_err());
}

#[test]
fn test_from_file_ignores_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[thresholds]\ncpu_limit = 70.0\n").unwrap();

    std::env::set_var("MONARX_MONITORING__TOP_N", "8");
    let file_only = Config::from_file(&path);
    std::env::remove_var("MONARX_MONITORING__TOP_N");

    let updated = file_only.unwrap().with_thresholds(80.0, 75.0, 30.0).unwrap();
    updated.save_to_file(&path).unwrap();

    let saved = Config::from_toml(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved.thresholds.cpu_limit, 80.0);
    assert_eq!(saved.thresholds.mem_limit, 75.0);
    assert_eq!(saved.monitoring.top_n, Config::default().monitoring.top_n);
    assert_ne!(saved.monitoring.top_n, 8);
}
