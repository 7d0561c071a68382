#![no_main]

use codec_png::{decode_from_slice, DecodeOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let options = DecodeOptions {
        max_decoded_bytes: 1 << 24,
        ..DecodeOptions::default()
    };
    let _ = decode_from_slice(data, options);
    let _ = decode_from_slice(
        data,
        DecodeOptions {
            flip_vertically: true,
            ..options
        },
    );
});
