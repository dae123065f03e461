//! Stop latency and rebuild safety

use ephys_core::{SourceKind, SourceSpec};
use ephys_simulation::{AcquisitionConfig, ClockSettings, GeneratorSettings, SimulatedSource, SourceCollection};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn stop_is_honoured_within_one_batch_period() {
    let settings = GeneratorSettings {
        batch_period_ms: 200,
        ..GeneratorSettings::seeded(1)
    };
    let spec = SourceSpec::new("slow", SourceKind::AnalogIn, 2, 1_000.0);
    let source = SimulatedSource::with_new_buffer(spec, &settings, ClockSettings::default()).unwrap();

    source.start();
    thread::sleep(Duration::from_millis(50));

    let requested = Instant::now();
    assert!(source.stop());
    assert!(source.join(Duration::from_millis(200) + Duration::from_millis(150)));
    assert!(requested.elapsed() < Duration::from_millis(350));
    assert!(!source.is_running());
}

#[test]
fn stop_never_blocks_the_caller() {
    let config = AcquisitionConfig {
        generator: GeneratorSettings {
            batch_period_ms: 500,
            ..GeneratorSettings::seeded(2)
        },
        ..AcquisitionConfig::minimal()
    };
    let collection = SourceCollection::from_config(&config).unwrap();
    collection.start_all();
    thread::sleep(Duration::from_millis(20));

    let requested = Instant::now();
    collection.stop_all();
    assert!(requested.elapsed() < Duration::from_millis(100));
    assert!(collection.join_all(Duration::from_secs(2)));
}

fn stress_config(probes: usize, seed: u64) -> AcquisitionConfig {
    AcquisitionConfig {
        num_probes: probes,
        channels_per_probe: 8,
        channels_per_nidaq: 2,
        buffer_frames: 2_000,
        generator: GeneratorSettings {
            batch_period_ms: 2,
            ..GeneratorSettings::seeded(seed)
        },
        ..AcquisitionConfig::default()
    }
}

#[test]
fn rebuild_under_load_releases_every_old_buffer() {
    let mut collection = SourceCollection::from_config(&stress_config(1, 0)).unwrap();

    for cycle in 0..40u64 {
        collection.start_all();
        thread::sleep(Duration::from_millis(cycle % 4));

        if cycle % 3 == 0 {
            collection.stop_all();
        }

        let old: Vec<_> = collection
            .handles()
            .into_iter()
            .filter_map(|h| collection.buffer(h).map(Arc::downgrade))
            .collect();

        let probes = 1 + (cycle % 3) as usize;
        collection.rebuild(&stress_config(probes, cycle)).unwrap();
        assert_eq!(collection.len(), probes * 2 + 1);
        assert!(!collection.is_running());

        // No thread may still hold a buffer from the previous set
        for weak in old {
            assert!(weak.upgrade().is_none(), "buffer outlived its source in cycle {}", cycle);
        }
    }
}

#[test]
fn failed_rebuild_keeps_running_sources() {
    let mut collection = SourceCollection::from_config(&stress_config(1, 9)).unwrap();
    collection.start_all();

    let invalid = AcquisitionConfig {
        channels_per_probe: 0,
        ..stress_config(2, 9)
    };
    assert!(collection.rebuild(&invalid).unwrap_err().is_invalid_config());
    assert!(collection.is_running());
    assert_eq!(collection.len(), 3);

    collection.stop_all();
    assert!(collection.join_all(Duration::from_secs(2)));
}
