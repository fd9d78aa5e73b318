#![no_main]

use libfuzzer_sys::fuzz_target;
use vdesk_manifest::{parse_manifest, MANIFEST_SCHEMA_VERSION};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    match parse_manifest(&raw) {
        Ok(manifest) => {
            assert_eq!(manifest.schema_version, MANIFEST_SCHEMA_VERSION);
            let plugins = manifest
                .plugin_artifacts()
                .expect("validated manifests always resolve plugin artifacts");
            for plugin in &plugins {
                assert!(!plugin.name.trim().is_empty());
                assert!(!plugin.file_name.trim().is_empty());
                assert!(!plugin.url.trim().is_empty());
            }
            for descriptor in manifest.prerequisite_descriptors() {
                assert!(!descriptor.name.trim().is_empty());
                assert!(!descriptor.url.trim().is_empty());
            }
            for key in manifest.config_bundles.keys() {
                let index = key.parse::<u32>().expect("validated bundle keys are numeric");
                let descriptor = manifest
                    .config_bundle_descriptor(index)
                    .expect("validated manifests always resolve bundle urls")
                    .expect("bundle key resolves to its own index");
                assert!(!descriptor.url.trim().is_empty());
            }
        }
        Err(error) => {
            assert!(!error.to_string().trim().is_empty());
        }
    }
});
