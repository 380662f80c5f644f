use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use recompose_core::*;
use web_time::Instant;

fn runtime() -> Runtime {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::with_config(RuntimeConfig::default().with_strict_reads(true)).unwrap()
}

/// Runs turns until `cond` holds or the deadline passes.
fn turn_until(rt: &Runtime, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        rt.frame().unwrap();
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

type Events = Arc<Mutex<Vec<String>>>;

#[test]
fn key_change_cancels_before_restart() {
    let rt = runtime();
    let key = rt.cell(String::from("K1"));
    let events: Events = Arc::default();
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    {
        let (events, active, max_active) = (events.clone(), active.clone(), max_active.clone());
        rt.set_content(move |cx| {
            let k = cx.get(key);
            let (events, active, max_active) = (events.clone(), active.clone(), max_active.clone());
            cx.launched_effect(k, move |fx| async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                events.lock().push(format!("start {}", fx.key()));
                fx.cancelled().await;
                events.lock().push(format!("cancelled {}", fx.key()));
                active.fetch_sub(1, Ordering::SeqCst);
            });
        });
    }
    rt.frame().unwrap();
    assert!(turn_until(&rt, || events.lock().len() == 1));

    rt.write(key, "K2".into());
    rt.frame().unwrap();
    assert!(turn_until(&rt, || events.lock().len() == 3));
    rt.write(key, "K1".into());
    rt.frame().unwrap();
    assert!(turn_until(&rt, || events.lock().len() == 5));

    assert_eq!(
        *events.lock(),
        vec!["start K1", "cancelled K1", "start K2", "cancelled K2", "start K1"]
    );
    assert_eq!(rt.effects_started(), 3);
    assert_eq!(max_active.load(Ordering::SeqCst), 1);

    rt.remove_scope(rt.root().unwrap()).unwrap();
    assert!(turn_until(&rt, || active.load(Ordering::SeqCst) == 0));
}

#[test]
fn equal_key_keeps_running_task() {
    let rt = runtime();
    let other = rt.cell(0);
    let starts = Arc::new(AtomicUsize::new(0));
    {
        let starts = starts.clone();
        rt.set_content(move |cx| {
            cx.get(other);
            let starts = starts.clone();
            cx.launched_effect("fixed", move |fx| async move {
                starts.fetch_add(1, Ordering::SeqCst);
                fx.cancelled().await;
            });
        });
    }
    rt.frame().unwrap();
    for i in 1..4 {
        rt.write(other, i);
        rt.frame().unwrap();
    }
    assert!(turn_until(&rt, || starts.load(Ordering::SeqCst) == 1));
    assert_eq!(rt.effects_started(), 1);
    assert_eq!(rt.running_effects(), 1);
}

#[test]
fn removing_owner_cancels_and_silences_tasks() {
    let rt = runtime();
    let show = rt.cell(true);
    let ticks = rt.cell(0u32);
    let stopped = Arc::new(AtomicBool::new(false));
    {
        let stopped = stopped.clone();
        rt.set_content(move |cx| {
            if cx.get(show) {
                let stopped = stopped.clone();
                cx.keyed("ticker", move |cx| {
                    let stopped = stopped.clone();
                    cx.launched_effect((), move |fx| async move {
                        let mut n = 0;
                        while fx.delay(Duration::from_millis(2)).await {
                            n += 1;
                            fx.write(ticks, n);
                        }
                        stopped.store(true, Ordering::SeqCst);
                    });
                });
            }
        });
    }
    assert!(turn_until(&rt, || rt.peek(ticks).unwrap() >= 3));
    assert_eq!(rt.running_effects(), 1);

    rt.write(show, false);
    rt.frame().unwrap();
    assert_eq!(rt.running_effects(), 0);
    assert!(turn_until(&rt, || stopped.load(Ordering::SeqCst)));

    let frozen = rt.peek(ticks).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    rt.frame().unwrap();
    assert_eq!(rt.peek(ticks).unwrap(), frozen);
}

#[test]
fn superseded_search_never_publishes() {
    let rt = runtime();
    let query = rt.cell(String::from("search:abc"));
    let results = rt.cell(String::new());
    let events: Events = Arc::default();
    {
        let events = events.clone();
        rt.set_content(move |cx| {
            let q = cx.get(query);
            let events = events.clone();
            cx.launched_effect(q, move |fx| async move {
                events.lock().push(format!("start {}", fx.key()));
                if !fx.delay(Duration::from_millis(200)).await {
                    events.lock().push(format!("cancelled {}", fx.key()));
                    return;
                }
                fx.write(results, format!("results for {}", fx.key()));
            });
        });
    }
    assert!(turn_until(&rt, || events.lock().len() == 1));
    rt.write(query, "search:abcd".into());
    rt.frame().unwrap();

    assert!(turn_until(&rt, || !rt.peek(results).unwrap().is_empty()));
    assert_eq!(rt.peek(results).unwrap(), "results for search:abcd");

    let events = events.lock().clone();
    let cancelled = events.iter().position(|e| e == "cancelled search:abc");
    let started = events.iter().position(|e| e == "start search:abcd");
    assert!(cancelled.is_some() && started.is_some());
    assert!(cancelled < started);
}

#[test]
fn latest_value_reaches_running_task() {
    let rt = runtime();
    let label = rt.cell(1u32);
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        rt.set_content(move |cx| {
            let current = cx.get(label);
            let latest = cx.latest(current);
            let seen = seen.clone();
            cx.launched_effect((), move |fx| async move {
                while fx.delay(Duration::from_millis(2)).await {
                    let v = *latest.get();
                    let mut seen = seen.lock();
                    if seen.last() != Some(&v) {
                        seen.push(v);
                    }
                }
            });
        });
    }
    assert!(turn_until(&rt, || seen.lock().contains(&1)));

    rt.write(label, 2);
    assert!(turn_until(&rt, || seen.lock().contains(&2)));
    assert_eq!(rt.effects_started(), 1);
}

#[test]
fn write_after_cancellation_is_reported() {
    let rt = runtime();
    let show = rt.cell(true);
    let target = rt.cell(0);
    let running = Arc::new(AtomicBool::new(false));
    let attempted = Arc::new(AtomicBool::new(false));
    let accepted = Arc::new(AtomicBool::new(true));
    {
        let flags = (running.clone(), attempted.clone(), accepted.clone());
        rt.set_content(move |cx| {
            if cx.get(show) {
                let flags = flags.clone();
                cx.keyed("owner", move |cx| {
                    let (running, attempted, accepted) = flags.clone();
                    cx.launched_effect((), move |fx| async move {
                        let writer = fx.writer();
                        running.store(true, Ordering::SeqCst);
                        fx.cancelled().await;
                        accepted.store(writer.write(target, 42), Ordering::SeqCst);
                        attempted.store(true, Ordering::SeqCst);
                    });
                });
            }
        });
    }
    assert!(turn_until(&rt, || running.load(Ordering::SeqCst)));
    rt.write(show, false);
    rt.frame().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !attempted.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(attempted.load(Ordering::SeqCst));
    assert!(!accepted.load(Ordering::SeqCst));

    let report = rt.end_turn().unwrap();
    assert!(
        report
            .diagnostics
            .iter()
            .any(|d| matches!(d, Error::EffectCancellationViolation { cell, .. } if *cell == target.id()))
    );
    assert_eq!(rt.peek(target).unwrap(), 0);
}

#[test]
fn remote_writes_apply_at_next_turn() {
    let rt = runtime();
    let c = rt.cell(0);
    let root = rt.set_content(move |cx| {
        cx.get(c);
    });
    rt.frame().unwrap();

    let writer = rt.remote_writer();
    std::thread::spawn(move || {
        assert!(writer.write(c, 7));
        assert!(writer.write(c, 8));
    })
    .join()
    .unwrap();

    assert_eq!(rt.peek(c).unwrap(), 0);
    assert!(rt.needs_frame());
    let report = rt.end_turn().unwrap();
    assert_eq!(rt.peek(c).unwrap(), 8);
    assert_eq!(report.composed, vec![root]);
}

#[test]
fn dropping_the_runtime_stops_its_effects() {
    let rt = runtime();
    let ticks = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicBool::new(false));
    let disposed = Arc::new(AtomicBool::new(false));
    {
        let (ticks, stopped, disposed) = (ticks.clone(), stopped.clone(), disposed.clone());
        rt.set_content(move |cx| {
            let (ticks, stopped) = (ticks.clone(), stopped.clone());
            cx.launched_effect((), move |fx| async move {
                while fx.delay(Duration::from_millis(2)).await {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
                stopped.store(true, Ordering::SeqCst);
            });
            let disposed = disposed.clone();
            cx.disposable_effect((), move || on_dispose(move || disposed.store(true, Ordering::SeqCst)));
        });
    }
    assert!(turn_until(&rt, || ticks.load(Ordering::SeqCst) >= 3));
    let writer = rt.remote_writer();
    let c = rt.cell(0);

    drop(rt);
    assert!(disposed.load(Ordering::SeqCst));
    assert!(!writer.is_live());
    assert!(!writer.write(c, 1));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !stopped.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(stopped.load(Ordering::SeqCst));
    let before = ticks.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(ticks.load(Ordering::SeqCst), before);
}

#[test]
fn panicking_task_does_not_block_its_successor() {
    let rt = runtime();
    let key = rt.cell(1u32);
    let finished = Arc::new(AtomicUsize::new(0));
    {
        let finished = finished.clone();
        rt.set_content(move |cx| {
            let k = cx.get(key);
            let finished = finished.clone();
            cx.launched_effect(k, move |fx| async move {
                if *fx.key() == 1 {
                    panic!("effect failed");
                }
                finished.fetch_add(1, Ordering::SeqCst);
            });
        });
    }
    assert!(turn_until(&rt, || rt.running_effects() == 0));

    rt.write(key, 2);
    assert!(turn_until(&rt, || finished.load(Ordering::SeqCst) == 1));
    assert_eq!(rt.effects_started(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn effects_use_the_ambient_tokio_runtime() {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = Runtime::with_handle(
        RuntimeConfig::default(),
        tokio::runtime::Handle::current(),
    )
    .unwrap();
    let done = rt.cell(false);
    rt.set_content(move |cx| {
        cx.launched_effect((), move |fx| async move {
            tokio::task::yield_now().await;
            fx.write(done, true);
        });
    });
    rt.frame().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !rt.peek(done).unwrap() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
        rt.frame().unwrap();
    }
    assert!(rt.peek(done).unwrap());
}
