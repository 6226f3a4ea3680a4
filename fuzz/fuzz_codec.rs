//! Fuzz target for the wire codec.
//!
//! Run with: cargo +nightly fuzz run fuzz_codec
//!
//! Decoding must accept any byte sequence without panicking, and every
//! effect the decoder recognizes must survive a re-encode.

#![no_main]

use bytes::Bytes;
use ktrl_ipc::codec;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(fx_val) = codec::decode_command(data) {
        let encoded = codec::encode_command(&fx_val.effect, &fx_val.value);
        assert_eq!(codec::decode_command(&encoded), Some(fx_val));
    }

    let message = Bytes::copy_from_slice(data);
    let n = codec::decode_notification(message.clone());
    assert!(n.payload.len() <= message.len());

    let filter = std::str::from_utf8(&data[..data.len().min(5)]).unwrap_or("layer");
    let n = codec::decode_notification_for(filter, message);
    if !filter.is_empty() && data.starts_with(filter.as_bytes()) {
        assert_eq!(n.topic, filter);
    }
});
