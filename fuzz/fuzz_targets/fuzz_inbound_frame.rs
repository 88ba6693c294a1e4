#![no_main]

use libfuzzer_sys::fuzz_target;
use live_sync_client::notification::describe;
use live_sync_client::{Frame, ServerEvent};

fuzz_target!(|data: &[u8]| {
    // Inbound frames arrive as text; invalid UTF-8 never reaches the parser.
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Any envelope must type into some event, and describing it must not panic.
    if let Ok(frame) = Frame::parse(text) {
        let name = frame.event.clone();
        let event = ServerEvent::from_frame(frame);
        assert_eq!(event.name(), name);
        let _ = describe(&event);
    }
});
