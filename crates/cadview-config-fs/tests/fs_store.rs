// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used)]

use cadview_app_core::{ConfigError, ConfigService, ConfigStore, DefaultsStore, ViewerConfig};
use cadview_config_fs::FsConfigStore;

#[test]
fn missing_key_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsConfigStore::with_base(dir.path()).unwrap();
    assert!(matches!(store.load_raw("nothing"), Err(ConfigError::NotFound)));
}

#[test]
fn saved_blob_lands_in_a_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsConfigStore::with_base(dir.path().join("nested")).unwrap();
    store.save_raw("ports", b"[]").unwrap();
    let on_disk = std::fs::read(dir.path().join("nested").join("ports.json")).unwrap();
    assert_eq!(on_disk, b"[]");
    assert_eq!(store.load_raw("ports").unwrap(), b"[]");
}

#[test]
fn keys_cannot_escape_the_base_dir() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsConfigStore::with_base(dir.path()).unwrap();
    assert!(matches!(store.save_raw("../evil", b"{}"), Err(ConfigError::Other(_))));
    assert!(matches!(store.load_raw(""), Err(ConfigError::Other(_))));
}

#[test]
fn defaults_survive_a_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let svc = ConfigService::new(FsConfigStore::with_base(dir.path()).unwrap());
        let defaults = DefaultsStore::new();
        defaults
            .set_defaults(&ViewerConfig {
                deviation: Some(0.25),
                ..ViewerConfig::default()
            })
            .unwrap();
        defaults.persist(&svc).unwrap();
    }
    let svc = ConfigService::new(FsConfigStore::with_base(dir.path()).unwrap());
    let reloaded = DefaultsStore::new();
    assert!(reloaded.load(&svc).unwrap());
    assert_eq!(reloaded.get_defaults().deviation, Some(0.25));
    let raw: serde_json::Value = svc.load("defaults").unwrap().unwrap();
    assert_eq!(raw["deviation"], serde_json::json!(0.25));
}
