//! Unit tests for kioku-core

use kioku_core::config::{Config, LogFormat, LogLevel};
use kioku_core::crypto::{self, ENVELOPE_HEADER_LEN, TAG_LEN};
use kioku_core::{Error, SearchHit, StoreMetrics};
use proptest::prelude::*;

mod config_tests {
    use super::*;

    #[test]
    fn test_full_config_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("kioku.json");
        std::fs::write(
            &path,
            r#"{
                "store": { "quantization": true },
                "persistence": { "kdf_iterations": 5000, "sync_writes": false },
                "logging": { "level": "warn", "format": "json" }
            }"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.store.quantization);
        assert_eq!(config.persistence.kdf_iterations, 5000);
        assert!(!config.persistence.sync_writes);
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_config_serializes_back() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_bad_config_is_configuration_error() {
        let err = Config::from_json(r#"{"logging": {"level": "loud"}}"#).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_missing_config_file_is_io() {
        let err = Config::from_file("/nonexistent/kioku.json").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}

mod crypto_tests {
    use super::*;

    const ITERS: u32 = 1_000;

    #[test]
    fn test_envelope_size() {
        let sealed = crypto::seal(b"twelve bytes", "pw", ITERS).unwrap();
        assert_eq!(sealed.len(), ENVELOPE_HEADER_LEN + 12 + TAG_LEN);
        assert!(crypto::is_sealed(&sealed));
        assert!(!crypto::is_sealed(b"KVS1...."));
    }

    #[test]
    fn test_empty_plaintext() {
        let sealed = crypto::seal(b"", "pw", ITERS).unwrap();
        assert_eq!(crypto::open(&sealed, "pw").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_iterations_travel_with_envelope() {
        // Opening does not need to know the iteration count used to seal
        let sealed = crypto::seal(b"data", "pw", 2_345).unwrap();
        assert_eq!(crypto::open(&sealed, "pw").unwrap(), b"data");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_seal_open(data in prop::collection::vec(any::<u8>(), 0..512), key in "[a-zA-Z0-9]{1,24}") {
            let sealed = crypto::seal(&data, &key, ITERS).unwrap();
            prop_assert_eq!(crypto::open(&sealed, &key).unwrap(), data);
        }
    }
}

mod types_tests {
    use super::*;

    #[test]
    fn test_hit_json() {
        let hit = SearchHit::new("doc-1", 0.5);
        assert_eq!(serde_json::to_string(&hit).unwrap(), r#"{"id":"doc-1","score":0.5}"#);
    }

    #[test]
    fn test_metrics_snapshot_json() {
        let metrics = StoreMetrics::new();
        metrics.record_insert();
        metrics.record_save(128);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["inserts"], 1);
        assert_eq!(json["bytes_written"], 128);
    }
}
