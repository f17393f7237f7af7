#![no_main]

use libfuzzer_sys::fuzz_target;
use litcloak::{
    assembly::{Opcode, SequenceBuilder},
    obfuscate, verify, Policy,
};

fuzz_target!(|data: &[u8]| {
    let Some((&seed, body)) = data.split_first() else {
        return;
    };

    let mut builder = SequenceBuilder::new("fuzz");
    for pair in body.chunks_exact(2).take(64) {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        if builder.push_int(i32::from(value)).is_err() || builder.simple(Opcode::Pop).is_err() {
            return;
        }
    }
    if builder.ret().is_err() {
        return;
    }
    let Ok(sequence) = builder.build() else {
        return;
    };

    let policy = Policy::default()
        .with_seed(u64::from(seed))
        .with_max_nesting_depth(u32::from(seed % 3) + 1);
    let output = obfuscate(&sequence, &policy).expect("built-in strategies are sound");
    verify(&sequence, &output.sequence).expect("rewrite does not verify");
});
