#![no_main]

use gephase::phase::diff_snapshot;
use gephase::{NetRole, PhaseSubsystem, PhaseTag};
use libfuzzer_sys::fuzz_target;

const POOL: [&str; 4] = ["Phase.A", "Phase.B", "Phase.A.Sub", "Phase.C"];

fn decode(bytes: &[u8]) -> Vec<PhaseTag> {
    bytes
        .iter()
        .map(|b| PhaseTag::parse(POOL[usize::from(*b) % POOL.len()]).expect("pool tags are valid"))
        .collect()
}

fuzz_target!(|data: &[u8]| {
    let client = PhaseSubsystem::new(NetRole::Client);
    let mut mirror: Vec<PhaseTag> = Vec::new();

    // each chunk is one replicated snapshot
    for chunk in data.split(|b| *b == 0xff) {
        let next = decode(chunk);
        let diff = diff_snapshot(&mirror, &next);
        assert!(diff.removed.windows(2).all(|w| w[0] < w[1]));

        client.apply_snapshot(&next).expect("client accepts valid snapshot");
        assert_eq!(client.replication_snapshot(), next);
        mirror = next;
    }
});
