use std::ffi::OsString;

use shadow_netcore::core::main::run_simulation;

const CONFIG: &str = r#"
general:
  stop_time: 20 s
  log_level: warning
network:
  latency: 5 ms
host_option_defaults:
  cpu_threshold: null
hosts:
  client: {}
  server:
    ip_addr: 11.0.0.100
transfers:
  - client: client
    server: server
    port: 8080
    size: 256 KiB
    start_time: 1 s
"#;

fn args(config: &std::path::Path, extra: &[&str]) -> Vec<OsString> {
    let mut args = vec![OsString::from("shadow-netcore")];
    args.extend(extra.iter().map(OsString::from));
    args.push(config.into());
    args
}

// the logger can only be installed once per process, so everything runs in one test
#[test]
fn run_bulk_transfer() {
    let path = std::env::temp_dir().join(format!("netcore-cli-{}.yaml", std::process::id()));
    std::fs::write(&path, CONFIG).unwrap();

    // doesn't run anything
    run_simulation(args(&path, &["--show-config"])).unwrap();

    // the configuration is checked before anything runs
    std::fs::write(&path, CONFIG.replace("server: server", "server: nobody")).unwrap();
    assert!(run_simulation(args(&path, &[])).is_err());

    std::fs::write(&path, CONFIG).unwrap();
    run_simulation(args(&path, &[])).unwrap();

    std::fs::remove_file(&path).unwrap();
}
