#![no_main]

use std::collections::BTreeSet;

use libfuzzer_sys::fuzz_target;
use vdesk_provision::{validate_fleet_config, FleetConfig};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(config) = serde_json::from_str::<FleetConfig>(&raw) else {
        return;
    };
    if validate_fleet_config(&config).is_err() {
        return;
    }

    assert!(!config.families.is_empty());
    assert!(config.max_instances > 0);

    let mut keys = BTreeSet::new();
    for family in &config.families {
        assert!(!family.key.trim().is_empty());
        assert!(keys.insert(family.key.as_str()));
        assert_eq!(family.instance_dir(1), family.base_install_dir);
        for index in [2_u32, 7] {
            let dir = family.instance_dir(index);
            assert_ne!(dir, family.base_install_dir);
            assert!(dir.to_string_lossy().ends_with(&format!(" {index}")));
        }
    }

    // A validated config survives a serialize/parse round trip unchanged.
    let encoded = serde_json::to_string(&config).expect("encode fleet config");
    let decoded = serde_json::from_str::<FleetConfig>(&encoded).expect("reparse fleet config");
    assert_eq!(decoded, config);
});
