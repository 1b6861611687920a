//! 重放控制面集成测试：以 `MockClock` 手动推进时间，逐次轮询观察背压、取消与资源释放。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use futures::task::{ArcWake, noop_waker, waker};
use timed_replay::{Cancellation, Clock, MockClock, ReplayState, TimedReplay};

fn replay_on(clock: &MockClock) -> TimedReplay<i64> {
    TimedReplay::builder()
        .timestamp(|ts: &i64| *ts)
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("valid replay configuration")
}

#[test]
fn upstream_is_pulled_one_record_at_a_time() {
    let clock = MockClock::new();
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulled);
    let source = stream::iter((0_i64..).map(|n| n * 1_000)).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let mut stream = replay_on(&clock).replay_infallible(source);
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(Some(Ok(0)))));
    assert_eq!(pulled.load(Ordering::SeqCst), 1);

    for _ in 0..3 {
        assert!(stream.poll_next_unpin(&mut cx).is_pending());
    }
    assert_eq!(pulled.load(Ordering::SeqCst), 2, "no read-ahead while waiting");

    clock.advance(Duration::from_secs(1));
    assert!(matches!(
        stream.poll_next_unpin(&mut cx),
        Poll::Ready(Some(Ok(1_000)))
    ));
    assert_eq!(pulled.load(Ordering::SeqCst), 2);
}

#[test]
fn item_is_not_released_before_its_delay() {
    let clock = MockClock::new();
    let mut stream = replay_on(&clock).replay_infallible(stream::iter([0_i64, 250]));
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(Some(Ok(0)))));
    let started = clock.now();

    assert!(stream.poll_next_unpin(&mut cx).is_pending());
    clock.advance(Duration::from_millis(249));
    assert!(stream.poll_next_unpin(&mut cx).is_pending());
    clock.advance(Duration::from_millis(1));
    assert!(matches!(
        stream.poll_next_unpin(&mut cx),
        Poll::Ready(Some(Ok(250)))
    ));
    assert_eq!(clock.now() - started, Duration::from_millis(250));
}

#[test]
fn cancel_releases_the_pending_timer() {
    let clock = MockClock::new();
    let mut stream = replay_on(&clock).replay_infallible(stream::iter([0_i64, 5_000, 9_000]));
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(Some(Ok(0)))));
    assert!(stream.poll_next_unpin(&mut cx).is_pending());
    assert_eq!(clock.pending_sleepers(), 1);
    assert_eq!(stream.state(), ReplayState::Waiting);

    assert!(stream.cancel());
    assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(None)));
    assert_eq!(clock.pending_sleepers(), 0);
    assert_eq!(stream.state(), ReplayState::Cancelled);

    clock.advance(Duration::from_secs(60));
    assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(None)));
    assert_eq!(stream.stats().emitted, 1);
    assert!(!stream.cancel(), "cancelling twice is a no-op");
}

#[test]
fn dropping_the_stream_releases_the_pending_timer() {
    let clock = MockClock::new();
    let mut stream = replay_on(&clock).replay_infallible(stream::iter([0_i64, 5_000]));
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(Some(Ok(0)))));
    assert!(stream.poll_next_unpin(&mut cx).is_pending());
    assert_eq!(clock.pending_sleepers(), 1);

    drop(stream);
    assert_eq!(clock.pending_sleepers(), 0);
}

#[test]
fn shared_token_cancels_every_replay_built_from_it() {
    let clock = MockClock::new();
    let token = Cancellation::new();
    let replay = TimedReplay::builder()
        .timestamp(|ts: &i64| *ts)
        .clock(Arc::new(clock.clone()))
        .cancellation(token.clone())
        .build()
        .expect("valid replay configuration");
    let mut first = replay.replay_infallible(stream::iter([0_i64, 100]));
    let mut second = replay.replay_infallible(stream::iter([0_i64, 200]));
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    for stream in [&mut first, &mut second] {
        assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(Some(Ok(0)))));
        assert!(stream.poll_next_unpin(&mut cx).is_pending());
    }
    assert_eq!(clock.pending_sleepers(), 2);

    token.cancel();
    for stream in [&mut first, &mut second] {
        assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(None)));
        assert_eq!(stream.state(), ReplayState::Cancelled);
    }
    assert_eq!(clock.pending_sleepers(), 0);
}

#[test]
fn cancellation_before_first_poll_emits_nothing() {
    let clock = MockClock::new();
    let mut stream = replay_on(&clock).replay_infallible(stream::iter([1_i64, 2, 3]));
    stream.cancel();

    let out: Vec<_> = futures::executor::block_on(stream.by_ref().collect::<Vec<_>>());
    assert!(out.is_empty());
    assert_eq!(stream.state(), ReplayState::Cancelled);
    assert_eq!(clock.pending_sleepers(), 0);
}

#[test]
fn independent_replays_do_not_share_cancellation() {
    let clock = MockClock::new();
    let replay = replay_on(&clock);
    let mut cancelled = replay.replay_infallible(stream::iter([0_i64]));
    let mut running = replay.replay_infallible(stream::iter([0_i64]));

    cancelled.cancel();
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    assert!(matches!(cancelled.poll_next_unpin(&mut cx), Poll::Ready(None)));
    assert!(matches!(running.poll_next_unpin(&mut cx), Poll::Ready(Some(Ok(0)))));
}

#[test]
fn cancelling_while_upstream_is_pending_stops_pulling() {
    let clock = MockClock::new();
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&polls);
    // 首条记录之后上游一直挂起，模拟尚未产生下一条事件的实时来源。
    let source = stream::poll_fn(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Poll::Ready(Some(0_i64))
        } else {
            Poll::Pending
        }
    });
    let mut stream = replay_on(&clock).replay_infallible(source);
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(Some(Ok(0)))));
    assert!(stream.poll_next_unpin(&mut cx).is_pending());
    assert_eq!(stream.state(), ReplayState::Idle);
    assert_eq!(polls.load(Ordering::SeqCst), 2);

    assert!(stream.cancel());
    assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(None)));
    assert_eq!(stream.state(), ReplayState::Cancelled);
    assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(None)));
    assert_eq!(polls.load(Ordering::SeqCst), 2, "source must not be polled after cancel");
    assert_eq!(stream.cancellation().waiter_count(), 0);
}

struct Task;

impl ArcWake for Task {
    fn wake_by_ref(_: &Arc<Self>) {}
}

#[test]
fn finished_streams_do_not_pin_wakers_on_a_shared_token() {
    let clock = MockClock::new();
    let token = Cancellation::new();
    let replay = TimedReplay::builder()
        .timestamp(|ts: &i64| *ts)
        .clock(Arc::new(clock.clone()))
        .cancellation(token.clone())
        .build()
        .expect("valid replay configuration");

    let tasks: Vec<Arc<Task>> = (0..256).map(|_| Arc::new(Task)).collect();
    for (n, task) in tasks.iter().enumerate() {
        let waker = waker(Arc::clone(task));
        let mut cx = Context::from_waker(&waker);
        let mut stream = replay.replay_infallible(stream::iter([0_i64, 10]));
        assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(Some(Ok(0)))));
        // 偶数任务在等待中被丢弃，奇数任务完整跑完。
        assert!(stream.poll_next_unpin(&mut cx).is_pending());
        if n % 2 == 1 {
            clock.advance(Duration::from_millis(10));
            assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(Some(Ok(10)))));
            assert!(matches!(stream.poll_next_unpin(&mut cx), Poll::Ready(None)));
        }
    }

    assert_eq!(token.waiter_count(), 0);
    assert_eq!(clock.pending_sleepers(), 0);
    let retained = tasks.iter().filter(|task| Arc::strong_count(task) > 1).count();
    assert_eq!(retained, 0, "shared token still holds wakers of finished tasks");
}
