//! Integration Tests for Lazy Memos
//!
//! These tests verify that lazy memos, signals, effects and owner scopes
//! work together correctly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use lazymemo_core::reactive::{
    create_root, on_cleanup, Effect, LazyMemo, LazyMemoOptions, LazyState, Owner, Signal,
};

/// Build a memo over `count` that counts its own invocations.
fn counted(count: &Signal<i32>) -> (LazyMemo<i32>, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let (count, runs_clone) = (count.clone(), runs.clone());
    let memo = LazyMemo::new(move |_| {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        count.get()
    });
    (memo, runs)
}

/// A memo nobody reads never runs.
#[test]
fn wont_run_if_not_accessed() {
    create_root(|root| {
        let count = Signal::new(0);
        let (_memo, runs) = counted(&count);

        count.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        count.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        root.dispose();
    });
}

/// The first read computes against the current inputs.
#[test]
fn runs_after_being_accessed() {
    create_root(|root| {
        let count = Signal::new(0);
        let (memo, runs) = counted(&count);

        count.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert_eq!(memo.get(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        root.dispose();
    });
}

/// Repeated reads hit the cache.
#[test]
fn runs_only_once_even_if_accessed_multiple_times() {
    create_root(|root| {
        let count = Signal::new(0);
        let (memo, runs) = counted(&count);
        count.set(1);

        assert_eq!(memo.get(), 1);
        assert_eq!(memo.get(), 1);
        assert_eq!(memo.get(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        root.dispose();
    });
}

/// Once the reading root is gone, upstream changes cost nothing.
#[test]
fn wont_run_if_the_reading_root_is_gone() {
    create_root(|root| {
        let count = Signal::new(0);
        let (memo, runs) = counted(&count);

        create_root(|reader| {
            assert_eq!(memo.get(), 0);
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            reader.dispose();
        });

        count.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(memo.state(), LazyState::Cold);
        root.dispose();
    });
}

/// Tracking survives as long as any reader remains.
#[test]
fn keeps_running_while_some_readers_remain() {
    create_root(|root| {
        let count = Signal::new(0);
        let (memo, runs) = counted(&count);

        let reader1 = create_root(|reader| {
            assert_eq!(memo.get(), 0);
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            reader
        });
        let reader2 = create_root(|reader| {
            assert_eq!(memo.get(), 0);
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            reader
        });
        assert_eq!(memo.reader_count(), 2);

        count.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        reader1.dispose();
        count.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        reader2.dispose();
        count.set(3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        root.dispose();
    });
}

/// Two scopes share one computation per change and both see the result.
#[test]
fn shared_recompute_across_scopes() {
    create_root(|root| {
        let count = Signal::new(0);
        let (memo, runs) = counted(&count);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut scopes = Vec::new();
        for _ in 0..2 {
            let (memo, seen) = (memo.clone(), seen.clone());
            scopes.push(create_root(move |scope| {
                Effect::new(move || seen.lock().push(memo.get()));
                scope
            }));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![0, 0]);

        count.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock(), vec![0, 0, 1, 1]);

        for scope in scopes {
            scope.dispose();
        }
        root.dispose();
    });
}

/// Without an initial value, the first `previous` is `None`.
#[test]
fn previous_without_initial_value() {
    create_root(|root| {
        let count = Signal::new(0);
        let captured_prev = Arc::new(Mutex::new(None));

        let (count_clone, prev_clone) = (count.clone(), captured_prev.clone());
        let memo = LazyMemo::new(move |prev: Option<&i32>| {
            *prev_clone.lock() = Some(prev.copied());
            count_clone.get()
        });

        let captured = Arc::new(Mutex::new(Vec::new()));
        let (memo_clone, captured_clone) = (memo.clone(), captured.clone());
        Effect::new(move || captured_clone.lock().push(memo_clone.get()));

        assert_eq!(*captured.lock(), vec![0]);
        assert_eq!(*captured_prev.lock(), Some(None));

        count.set(1);
        assert_eq!(*captured.lock(), vec![0, 1]);
        assert_eq!(*captured_prev.lock(), Some(Some(0)));
        root.dispose();
    });
}

/// With an initial value, it is passed to the first computation only.
#[test]
fn previous_with_initial_value() {
    create_root(|root| {
        let count = Signal::new(0);
        let captured_prev = Arc::new(Mutex::new(None));

        let (count_clone, prev_clone) = (count.clone(), captured_prev.clone());
        let memo = LazyMemo::with_options(
            LazyMemoOptions::default().with_initial(123),
            move |prev: Option<&i32>| {
                *prev_clone.lock() = prev.copied();
                count_clone.get()
            },
        );

        let captured = Arc::new(Mutex::new(Vec::new()));
        let (memo_clone, captured_clone) = (memo.clone(), captured.clone());
        Effect::new(move || captured_clone.lock().push(memo_clone.get()));

        assert_eq!(*captured.lock(), vec![0]);
        assert_eq!(*captured_prev.lock(), Some(123));

        count.set(1);
        assert_eq!(*captured.lock(), vec![0, 1]);
        assert_eq!(*captured_prev.lock(), Some(0));
        root.dispose();
    });
}

/// Reads after the owning scope is gone fail instead of returning stale data.
#[test]
fn read_after_owner_disposal_fails() {
    let count = Signal::new(0);
    let (memo, root) = create_root(|root| (counted(&count).0, root));

    let reader = Owner::new_root();
    assert_eq!(reader.with(|| memo.read().unwrap()), 0);

    root.dispose();
    let err = reader.with(|| memo.read()).unwrap_err();
    assert!(err.is_use_after_dispose());
    assert_eq!(count.subscriber_count(), 0);
    reader.dispose();
}

/// Each run subscribes to exactly what it read.
#[test]
fn dynamic_dependencies_are_resubscribed() {
    create_root(|root| {
        let use_left = Signal::new(true);
        let left = Signal::new(1);
        let right = Signal::new(2);
        let runs = Arc::new(AtomicUsize::new(0));

        let (flag, l, r, runs_clone) = (use_left.clone(), left.clone(), right.clone(), runs.clone());
        let memo = LazyMemo::new(move |_| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            if flag.get() {
                l.get()
            } else {
                r.get()
            }
        });

        assert_eq!(memo.get(), 1);
        assert_eq!(right.subscriber_count(), 0);

        use_left.set(false);
        assert_eq!(memo.get(), 2);
        assert_eq!(left.subscriber_count(), 0);
        assert_eq!(right.subscriber_count(), 1);

        // The old branch no longer triggers work.
        left.set(10);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        root.dispose();
    });
}

/// A lazy memo read by another lazy memo goes cold with it.
#[test]
fn chained_memos_go_cold_together() {
    create_root(|root| {
        let count = Signal::new(3);
        let (inner, inner_runs) = counted(&count);

        let inner_clone = inner.clone();
        let outer = LazyMemo::new(move |_| inner_clone.get() * 10);

        let reader = create_root(|reader| {
            assert_eq!(outer.get(), 30);
            reader
        });
        assert_eq!(inner.state(), LazyState::Active);
        assert_eq!(inner.reader_count(), 1);

        count.set(4);
        assert_eq!(outer.peek(), Some(40));
        assert_eq!(inner_runs.load(Ordering::SeqCst), 2);

        reader.dispose();
        assert_eq!(outer.state(), LazyState::Cold);
        assert_eq!(inner.state(), LazyState::Cold);

        count.set(5);
        assert_eq!(inner_runs.load(Ordering::SeqCst), 2);
        root.dispose();
    });
}

/// A diamond recomputes each node once per change.
#[test]
fn diamond_recomputes_once() {
    create_root(|root| {
        let count = Signal::new(1);
        let (base, base_runs) = counted(&count);

        let (b1, b2) = (base.clone(), base.clone());
        let left = LazyMemo::new(move |_| b1.get() + 1);
        let right = LazyMemo::new(move |_| b2.get() * 2);

        let sums = Arc::new(Mutex::new(Vec::new()));
        let (l, r, sums_clone) = (left.clone(), right.clone(), sums.clone());
        Effect::new(move || sums_clone.lock().push(l.get() + r.get()));

        count.set(2);

        assert_eq!(*sums.lock(), vec![4, 7]);
        assert_eq!(base_runs.load(Ordering::SeqCst), 2);
        root.dispose();
    });
}

/// An effect reading a failing memo keeps tracking it and sees the recovery.
#[test]
fn effect_reader_recovers_after_failed_recompute() {
    create_root(|root| {
        let count = Signal::new(1);
        let count_clone = count.clone();
        let memo = LazyMemo::try_new(move |_| {
            let value = count_clone.get();
            if value < 0 {
                Err(format!("negative input {value}"))
            } else {
                Ok(value)
            }
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (memo_clone, seen_clone) = (memo.clone(), seen.clone());
        Effect::new(move || seen_clone.lock().push(memo_clone.read().ok()));
        assert_eq!(*seen.lock(), vec![Some(1)]);

        count.set(-1);
        assert_eq!(seen.lock().last(), Some(&None));
        assert_eq!(memo.peek(), Some(1));
        assert_eq!(memo.state(), LazyState::Active);

        count.set(5);
        assert_eq!(seen.lock().last(), Some(&Some(5)));
        assert_eq!(memo.peek(), Some(5));

        count.set(6);
        assert_eq!(seen.lock().last(), Some(&Some(6)));
        root.dispose();
    });
}

/// An effect that stops reading a memo no longer keeps it active.
#[test]
fn effect_that_stops_reading_releases_the_memo() {
    create_root(|root| {
        let count = Signal::new(0);
        let (memo, runs) = counted(&count);
        let show = Signal::new(true);

        let (show_clone, memo_clone) = (show.clone(), memo.clone());
        Effect::new(move || {
            if show_clone.get() {
                memo_clone.get();
            }
        });
        assert_eq!(memo.state(), LazyState::Active);
        assert_eq!(memo.reader_count(), 1);

        show.set(false);
        assert_eq!(memo.state(), LazyState::Cold);
        assert_eq!(memo.reader_count(), 0);
        assert_eq!(count.subscriber_count(), 0);

        count.set(1);
        count.set(2);
        count.set(3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Reading again reactivates it.
        show.set(true);
        assert_eq!(memo.state(), LazyState::Active);
        assert_eq!(memo.peek(), Some(3));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        root.dispose();
    });
}

/// An effect that keeps reading a memo across reruns holds it without extra work.
#[test]
fn effect_rerun_keeps_its_reader_slot() {
    create_root(|root| {
        let count = Signal::new(0);
        let (memo, runs) = counted(&count);
        let other = Signal::new(0);

        let (other_clone, memo_clone) = (other.clone(), memo.clone());
        let effect = Effect::new(move || {
            other_clone.get();
            memo_clone.get();
        });

        other.set(1);
        other.set(2);

        assert_eq!(effect.run_count(), 3);
        assert_eq!(memo.state(), LazyState::Active);
        assert_eq!(memo.reader_count(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        root.dispose();
    });
}

/// A lazy memo that stops reading another releases it.
#[test]
fn memo_that_stops_reading_releases_inner_memo() {
    create_root(|root| {
        let count = Signal::new(1);
        let (inner, inner_runs) = counted(&count);
        let use_inner = Signal::new(true);

        let (flag, inner_clone) = (use_inner.clone(), inner.clone());
        let outer = LazyMemo::new(move |_| if flag.get() { inner_clone.get() } else { -1 });

        let reader = create_root(|reader| {
            assert_eq!(outer.get(), 1);
            reader
        });
        assert_eq!(inner.state(), LazyState::Active);

        use_inner.set(false);
        assert_eq!(outer.peek(), Some(-1));
        assert_eq!(inner.state(), LazyState::Cold);

        count.set(2);
        assert_eq!(inner_runs.load(Ordering::SeqCst), 1);

        reader.dispose();
        root.dispose();
    });
}

/// Cleanups registered by an effect run fire before the next run.
#[test]
fn effect_cleanups_run_between_reruns() {
    create_root(|root| {
        let count = Signal::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let (count_clone, log_clone) = (count.clone(), log.clone());
        Effect::new(move || {
            let value = count_clone.get();
            log_clone.lock().push(format!("run {value}"));
            let log = log_clone.clone();
            on_cleanup(move || log.lock().push(format!("cleanup {value}")));
        });

        count.set(1);
        count.set(2);
        root.dispose();

        assert_eq!(
            *log.lock(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1", "run 2", "cleanup 2"]
        );
    });
}
