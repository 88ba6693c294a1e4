#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests for the live sync client.
//!
//! These tests parse `Cargo.toml` and fail when the panic-free lint policy,
//! the feature layout, or the demo registration drifts.
//!
//! All checks are synchronous filesystem reads; no network access or async
//! runtime needed.

use std::path::PathBuf;

use toml::Table;

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn manifest() -> Table {
    let path = project_root().join("Cargo.toml");
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read '{}': {e}", path.display()));
    text.parse::<Table>().expect("Cargo.toml must be valid TOML")
}

const REQUIRED_DENY_LINTS: &[&str] = &[
    "unwrap_used",
    "expect_used",
    "panic",
    "todo",
    "unimplemented",
    "indexing_slicing",
];

#[test]
fn panic_prone_lints_are_denied() {
    let manifest = manifest();
    let clippy = manifest["lints"]["clippy"]
        .as_table()
        .expect("Cargo.toml is missing a [lints.clippy] section");

    for lint in REQUIRED_DENY_LINTS {
        assert_eq!(
            clippy.get(*lint).and_then(|v| v.as_str()),
            Some("deny"),
            "`{lint}` must be set to \"deny\" in [lints.clippy] to keep library code panic-free"
        );
    }
}

#[test]
fn websocket_transport_is_default_and_gates_its_crates() {
    let manifest = manifest();
    let features = manifest["features"].as_table().unwrap();

    let default: Vec<&str> = features["default"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(default, vec!["transport-websocket"]);

    let gated: Vec<&str> = features["transport-websocket"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    for dep in ["tokio-tungstenite", "futures-util"] {
        assert!(
            gated.contains(&format!("dep:{dep}").as_str()),
            "transport-websocket must enable dep:{dep}"
        );
        let entry = &manifest["dependencies"][dep];
        assert_eq!(
            entry.get("optional").and_then(|v| v.as_bool()),
            Some(true),
            "{dep} must be optional so the core builds without a transport"
        );
    }
}

#[test]
fn core_tokio_features_stay_minimal() {
    let manifest = manifest();
    let features: Vec<&str> = manifest["dependencies"]["tokio"]["features"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(
        !features.contains(&"full"),
        "the library must not enable tokio/full; keep it to the features it uses"
    );
    for needed in ["sync", "macros", "rt", "time"] {
        assert!(features.contains(&needed), "tokio feature `{needed}` missing");
    }
}

#[test]
fn every_demo_is_registered_and_exists() {
    let manifest = manifest();
    let examples = manifest["example"].as_array().unwrap();
    assert!(!examples.is_empty());

    for example in examples {
        let path = example["path"].as_str().unwrap();
        assert!(
            path.starts_with("demos/"),
            "demo '{path}' must live under demos/"
        );
        assert!(
            project_root().join(path).is_file(),
            "demo '{path}' is registered in Cargo.toml but missing on disk"
        );
    }
}

#[test]
fn msrv_is_declared() {
    let manifest = manifest();
    let version = manifest["package"]["rust-version"]
        .as_str()
        .expect("Cargo.toml must declare a rust-version");
    let parts: Vec<u32> = version.split('.').map(|p| p.parse().unwrap()).collect();
    assert!(parts.len() >= 2, "rust-version '{version}' is malformed");
    assert!(
        parts[0] == 1 && parts[1] >= 85,
        "rust-version '{version}' must be at least 1.85"
    );
}
