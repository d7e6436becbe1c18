//! Timer behavior observed through a running reactor.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reflow::Reactor;

#[test]
fn zero_delay_timer_fires_on_the_next_iteration() {
    let mut reactor = Reactor::new(1).expect("reactor setup");
    let fired = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&fired);
    reactor.add_timer(Duration::ZERO, false, move |_| {
        flag.store(true, Ordering::SeqCst);
    });
    thread::spawn(move || reactor.run());

    let deadline = Instant::now() + Duration::from_secs(1);
    while !fired.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(fired.load(Ordering::SeqCst));
}

#[test]
fn recurring_timer_fires_at_its_interval() {
    let interval = Duration::from_millis(200);
    let mut reactor = Reactor::new(1).expect("reactor setup");
    let count = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&count);
    reactor.add_timer(interval, true, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let started = Instant::now();
    thread::spawn(move || reactor.run());
    thread::sleep(Duration::from_millis(1050));

    let fired = count.load(Ordering::SeqCst);
    let elapsed = started.elapsed();

    // Successive firings are at least one interval apart, so the count is
    // bounded by elapsed time; the lower bound leaves slack for scheduling.
    assert!(fired >= 3, "expected at least 3 firings, got {fired}");
    assert!(
        (fired as u128) <= elapsed.as_millis() / interval.as_millis() + 1,
        "{fired} firings in {elapsed:?} exceeds the interval bound"
    );
}

#[test]
fn cancelled_recurring_timer_stops_firing() {
    let mut reactor = Reactor::new(1).expect("reactor setup");
    let count = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&count);
    let id = reactor.add_timer(Duration::from_millis(50), true, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    // A timer callback may cancel another timer through the reactor.
    reactor.add_timer(Duration::from_millis(175), false, move |reactor| {
        assert!(reactor.cancel_timer(id));
    });
    thread::spawn(move || reactor.run());

    thread::sleep(Duration::from_millis(450));
    let after_cancel = count.load(Ordering::SeqCst);
    assert!(after_cancel >= 1, "timer ran before the cancel");
    assert!(after_cancel <= 4, "timer kept firing past the cancel");

    thread::sleep(Duration::from_millis(200));
    assert_eq!(
        count.load(Ordering::SeqCst),
        after_cancel,
        "cancelled timer fired again"
    );
}

#[test]
fn timer_callbacks_can_schedule_more_timers() {
    let mut reactor = Reactor::new(1).expect("reactor setup");
    let chained = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&chained);
    reactor.add_timer(Duration::from_millis(10), false, move |reactor| {
        let flag = Arc::clone(&flag);
        reactor.add_timer(Duration::from_millis(10), false, move |_| {
            flag.store(true, Ordering::SeqCst);
        });
    });
    thread::spawn(move || reactor.run());

    let deadline = Instant::now() + Duration::from_secs(1);
    while !chained.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(chained.load(Ordering::SeqCst));
}
