//! Acquisition walkthrough
//!
//! Builds a two-probe rig, drains it like a host for half a second, gates
//! one clock, then rebuilds the collection with a different layout.

use ephys_core::{AcquisitionDevice, SimResult, SourceKind};
use ephys_simulation::{AcquisitionConfig, GeneratorSettings, SourceCollection, SYNC_LINE_BIT};
use std::thread;
use std::time::Duration;

fn main() -> SimResult<()> {
    println!("=== Simulated Acquisition ===\n");

    let config = AcquisitionConfig {
        num_probes: 2,
        channels_per_probe: 64,
        generator: GeneratorSettings::seeded(42),
        ..Default::default()
    };

    let mut collection = SourceCollection::from_config(&config)?;
    for stream in collection.streams() {
        println!(
            "   {:<12} {:>4} ch @ {:>6} Hz ({})",
            stream.name, stream.channel_count, stream.sample_rate, stream.kind
        );
    }

    println!("\n1. Draining for 500 ms");
    collection.start_acquisition()?;
    let mut totals = vec![0usize; collection.len()];
    for _ in 0..10 {
        thread::sleep(Duration::from_millis(50));
        for (total, handle) in totals.iter_mut().zip(collection.handles()) {
            if let Some(block) = collection.read_stream(handle, usize::MAX) {
                *total += block.frame_count();
            }
        }
    }
    for (stream, total) in collection.streams().iter().zip(&totals) {
        println!("   ✓ {:<12} {} frames", stream.name, total);
    }

    println!("\n2. Gating the NIDAQ clock");
    let nidaq = collection
        .streams()
        .into_iter()
        .find(|s| s.kind == SourceKind::AnalogIn)
        .map(|s| s.handle);
    if let Some(handle) = nidaq {
        collection.read_buffer(handle, usize::MAX);
        collection.set_clock_enabled(handle, false);
        thread::sleep(Duration::from_millis(100));
        let paused = collection.read_buffer(handle, usize::MAX).map(|b| b.frame_count());
        println!("   ✓ Frames while gated: {:?}", paused);

        collection.set_clock_enabled(handle, true);
        thread::sleep(Duration::from_millis(100));
        if let Some(block) = collection.read_buffer(handle, usize::MAX) {
            let high = block.event_words().iter().filter(|w| *w & SYNC_LINE_BIT != 0).count();
            println!("   ✓ Resumed: {} frames, sync high on {}", block.frame_count(), high);
        }
    }

    println!("\n3. Rebuilding with one probe");
    collection.stop_acquisition();
    collection.rebuild(&AcquisitionConfig::minimal())?;
    println!("   ✓ {} streams, running: {}", collection.len(), collection.is_running());

    println!("\n=== Done ===");
    Ok(())
}
