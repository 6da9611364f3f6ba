// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn fan_out_reaches_all_subscribers() {
    let bus = EventBus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    bus.emit(EngineEvent::ShutdownComplete);

    assert_eq!(a.try_recv().unwrap(), EngineEvent::ShutdownComplete);
    assert_eq!(b.try_recv().unwrap(), EngineEvent::ShutdownComplete);
}

#[tokio::test]
async fn dropped_subscribers_are_pruned() {
    let bus = EventBus::new();
    let a = bus.subscribe();
    drop(a);
    let mut b = bus.subscribe();

    // Must not error or block despite the dead subscriber
    bus.emit(EngineEvent::LoopIteration { n: 1 });
    bus.emit(EngineEvent::LoopIteration { n: 2 });

    assert_eq!(b.try_recv().unwrap(), EngineEvent::LoopIteration { n: 1 });
    assert_eq!(b.try_recv().unwrap(), EngineEvent::LoopIteration { n: 2 });
}

#[tokio::test]
async fn events_arrive_in_emission_order() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    for n in 0..5 {
        bus.emit(EngineEvent::LoopIteration { n });
    }
    for n in 0..5 {
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::LoopIteration { n });
    }
}
