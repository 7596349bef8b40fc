//! Poller scenarios: liveness, readiness accumulation, interest filtering,
//! and teardown from both sides.

use kwait::pipe::Pipe;
use kwait::poll::{PollEvents, PollHead, Poller, Resource};
use kwait::thread::ThreadBuilder;
use kwait::timer::Timer;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn wait_returns_once_an_interesting_event_fires() {
    let timer = Timer::new();
    let pipe = Arc::new(Pipe::new(&timer, 64).unwrap());
    pipe.open_reader();
    pipe.open_writer();

    let poller = Poller::new(&timer);
    let resource: Resource = pipe.clone();
    let token = poller.subscribe(resource, pipe.head(), PollEvents::IN);

    let writer = {
        let pipe = Arc::clone(&pipe);
        ThreadBuilder::new("producer").spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            pipe.write(b"ready", 5, None).unwrap();
        })
    };

    let events = poller.wait(None).unwrap();
    writer.join();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].token, token);
    assert!(events[0].events.contains(PollEvents::IN));

    pipe.close_writer();
    pipe.close_reader();
}

#[test]
fn wait_times_out_with_an_empty_set() {
    let timer = Timer::start(Duration::from_millis(5));
    let head = PollHead::new();
    let poller = Poller::new(&timer);
    poller.subscribe(Arc::new(()), &head, PollEvents::IN);

    let events = poller.wait(Some(Duration::from_millis(30))).unwrap();
    assert!(events.is_empty());
}

#[test]
fn readiness_accumulates_until_reported() {
    let timer = Timer::new();
    let head = PollHead::new();
    let poller = Poller::new(&timer);
    let token = poller.subscribe(
        Arc::new(()),
        &head,
        PollEvents::IN | PollEvents::OUT,
    );

    head.broadcast(PollEvents::IN);
    head.broadcast(PollEvents::OUT);

    let events = poller.wait(None).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].token, token);
    assert_eq!(events[0].events, PollEvents::IN | PollEvents::OUT);
}

#[test]
fn reported_subscription_is_rearmed() {
    let timer = Timer::new();
    let head = PollHead::new();
    let poller = Poller::new(&timer);
    let token = poller.subscribe(Arc::new(()), &head, PollEvents::IN);

    head.broadcast(PollEvents::IN);
    let first = poller.wait(None).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].events, PollEvents::IN);

    // Readiness was cleared on report; the next event starts fresh.
    head.broadcast(PollEvents::IN);
    let second = poller.wait(None).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].token, token);
    assert_eq!(second[0].events, PollEvents::IN);
}

#[test]
fn uninteresting_events_do_not_wake_the_poller() {
    let timer = Timer::start(Duration::from_millis(5));
    let head = PollHead::new();
    let poller = Poller::new(&timer);
    poller.subscribe(Arc::new(()), &head, PollEvents::IN);

    head.broadcast(PollEvents::OUT);
    let events = poller.wait(Some(Duration::from_millis(30))).unwrap();
    assert!(events.is_empty());
}

#[test]
fn tokens_distinguish_multiple_subscriptions() {
    let timer = Timer::new();
    let quiet = PollHead::new();
    let noisy = PollHead::new();
    let poller = Poller::new(&timer);
    let _quiet_token = poller.subscribe(Arc::new(()), &quiet, PollEvents::IN);
    let noisy_token = poller.subscribe(Arc::new(()), &noisy, PollEvents::IN);

    noisy.broadcast(PollEvents::IN);
    let events = poller.wait(None).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].token, noisy_token);
}

#[test]
#[should_panic(expected = "empty readiness mask")]
fn broadcasting_an_empty_mask_panics() {
    let head = PollHead::new();
    head.broadcast(PollEvents::empty());
}

#[test]
fn head_teardown_releases_subscriptions() {
    let timer = Timer::start(Duration::from_millis(5));
    let head = PollHead::new();
    let poller = Poller::new(&timer);
    let resource: Resource = Arc::new(42u32);
    poller.subscribe(Arc::clone(&resource), &head, PollEvents::IN);
    assert_eq!(Arc::strong_count(&resource), 2);

    drop(head);
    assert_eq!(Arc::strong_count(&resource), 1);

    // Nothing left to fire; the wait can only time out.
    let events = poller.wait(Some(Duration::from_millis(20))).unwrap();
    assert!(events.is_empty());
}

#[test]
fn poller_teardown_releases_subscriptions() {
    let timer = Timer::new();
    let head = PollHead::new();
    let poller = Poller::new(&timer);
    let resource: Resource = Arc::new("backing");
    poller.subscribe(Arc::clone(&resource), &head, PollEvents::IN);
    assert_eq!(Arc::strong_count(&resource), 2);

    drop(poller);
    assert_eq!(Arc::strong_count(&resource), 1);

    // The head no longer reaches any poller.
    head.broadcast(PollEvents::IN);
}
