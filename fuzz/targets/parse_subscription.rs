#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use zumq::{
    proxy::{describe_frame, rewrite, SubscriptionFrame},
    RewriteMarker,
};

fuzz_target!(|data: &[u8]| {
    let frame = Bytes::copy_from_slice(data);
    let _ = describe_frame(data);

    let Ok(parsed) = SubscriptionFrame::parse(&frame) else {
        assert!(data.is_empty());
        return;
    };
    assert_eq!(parsed.kind.marker(), data[0]);

    if let Ok(envelope) = parsed.envelope() {
        for marker in [RewriteMarker::MirrorInput, RewriteMarker::AlwaysSubscribe] {
            if let Ok(rewritten) = rewrite(parsed.kind, &envelope.channel_name, marker) {
                assert_eq!(&rewritten[1..], envelope.channel_name.as_bytes());
            }
        }
    }
});
