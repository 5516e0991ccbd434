#![no_main]

use blkprobe::{MemoryReader, ProbeOptions, Prober};
use libfuzzer_sys::fuzz_target;

// Checksums off so corrupted headers reach the deeper parsing paths.
fuzz_target!(|data: &[u8]| {
    let Ok(prober) = Prober::new(ProbeOptions::new().without_checksums().with_min_device_size(0))
    else {
        return;
    };
    let _ = prober.probe_all(&mut MemoryReader::new(data));
    let _ = prober.probe_safe(&mut MemoryReader::new(data));
});
