#![no_main]

use libfuzzer_sys::fuzz_target;
use mmaking_client::adapter::{route, Routed};
use mmaking_client::protocol::parse_bracket;
use mmaking_client::{Coordinator, MatchmakingEvent};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Routing and decoding must reject garbage without panicking.
    if let Ok(Routed::Matchmaking(envelope)) = route(text) {
        if let Some(opponents) = &envelope.body.opponents {
            let _ = parse_bracket(opponents);
        }
        let _ = envelope.body.decode(7);
    }

    // Whatever arrives, the coordinator only ever discards or applies it.
    let mut coordinator = Coordinator::new(7, Vec::<String>::new(), Vec::<MatchmakingEvent>::new());
    let _ = coordinator.join_queue(mmaking_client::QueueKind::Tournament);
    let _ = coordinator.dispatch_text(text);
    for line in text.lines() {
        let _ = coordinator.dispatch_text(line);
    }
});
