//! Common test utilities for proclaunch tests

#![allow(dead_code)]

use std::path::PathBuf;
use tempfile::TempDir;

/// Creates a temporary directory holding an executable script
pub fn create_script(script_name: &str, content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let script_path = dir.path().join(script_name);
    std::fs::write(&script_path, content).expect("Failed to write script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&script_path)
            .expect("Failed to get metadata")
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).expect("Failed to set permissions");
    }

    (dir, script_path)
}

/// Creates a temporary directory holding a config file
pub fn create_config(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = dir.path().join("proclaunch.toml");
    std::fs::write(&config_path, content).expect("Failed to write config");
    (dir, config_path)
}

/// Prints to both streams, then exits with the code given as `$1`
pub const MIXED_OUTPUT_SCRIPT: &str = r#"#!/bin/sh
echo "out one"
echo "err one" >&2
echo ""
echo "out two"
exit "${1:-0}"
"#;

/// Leaves a grandchild running that would outlive a plain kill
pub const TREE_SCRIPT: &str = r#"#!/bin/sh
sleep 30 &
echo "spawned $!"
wait
"#;

/// Runs for roughly `$1` seconds, printing a tick every 100ms
pub const TICKER_SCRIPT: &str = r#"#!/bin/sh
n=$(( ${1:-1} * 10 ))
i=0
while [ $i -lt $n ]; do
  echo "tick $i"
  i=$((i+1))
  sleep 0.1
done
"#;
