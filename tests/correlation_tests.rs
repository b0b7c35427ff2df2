use std::{sync::Arc, time::Duration};

use anyhow::Result;
use notification_dispatcher::{
    models::status::{DeliveryResult, DeliveryStatus},
    registry::{CorrelationRegistry, RegistryError, deadline_after},
};
use tokio::time::{Instant, sleep};

/// Test: Resolving an id nobody waits for is a no-op
#[tokio::test]
async fn test_resolve_unknown_id_returns_false() -> Result<()> {
    let registry = CorrelationRegistry::new();

    assert!(!registry.resolve("never-registered", DeliveryResult::success("never-registered")));
    assert_eq!(registry.pending_count(), 0);

    Ok(())
}

/// Test: A reply delivered before the deadline reaches the waiting caller
#[tokio::test]
async fn test_registered_request_receives_reply() -> Result<()> {
    let registry = Arc::new(CorrelationRegistry::new());
    let timeout = Duration::from_secs(5);

    let handle = registry.register("c-1", Instant::now() + timeout)?;
    assert_eq!(handle.correlation_id(), "c-1");
    assert!(registry.is_pending("c-1"));

    let resolver = Arc::clone(&registry);
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        resolver.resolve("c-1", DeliveryResult::success("c-1"))
    });

    let result = registry.wait(handle, timeout).await;

    assert_eq!(result.status, DeliveryStatus::Success);
    assert_eq!(result.correlation_id, "c-1");
    assert!(!result.is_timeout());
    assert_eq!(registry.pending_count(), 0);

    Ok(())
}

/// Test: A failure reported by the worker keeps its cause
#[tokio::test]
async fn test_reported_failure_keeps_cause() -> Result<()> {
    let registry = CorrelationRegistry::new();
    let timeout = Duration::from_secs(5);

    let handle = registry.register("c-2", Instant::now() + timeout)?;
    assert!(registry.resolve("c-2", DeliveryResult::failed("c-2", "mailbox full")));

    let result = registry.wait(handle, timeout).await;

    assert_eq!(result.status, DeliveryStatus::Failed);
    assert_eq!(result.cause.as_deref(), Some("mailbox full"));
    assert!(!result.is_timeout());

    Ok(())
}

/// Test: Two outstanding requests may not share a correlation id
#[tokio::test]
async fn test_duplicate_registration_is_rejected() -> Result<()> {
    let registry = CorrelationRegistry::new();
    let deadline = Instant::now() + Duration::from_secs(5);

    let _first = registry.register("dup", deadline)?;
    let second = registry.register("dup", deadline);

    assert_eq!(
        second.unwrap_err(),
        RegistryError::DuplicateCorrelationId("dup".to_string())
    );
    assert_eq!(registry.pending_count(), 1);

    Ok(())
}

/// Test: Waiting past the timeout yields a timed-out failure and frees the slot
#[tokio::test(start_paused = true)]
async fn test_wait_times_out_and_removes_entry() -> Result<()> {
    let registry = CorrelationRegistry::new();
    let timeout = Duration::from_millis(200);

    let handle = registry.register("slow", Instant::now() + timeout)?;
    let started = Instant::now();

    let result = registry.wait(handle, timeout).await;

    assert!(result.is_timeout());
    assert_eq!(result.status, DeliveryStatus::Failed);
    assert_eq!(result.correlation_id, "slow");
    assert!(started.elapsed() >= timeout);
    assert!(!registry.is_pending("slow"));

    Ok(())
}

/// Test: The registered deadline bounds the wait even with a longer timeout
#[tokio::test(start_paused = true)]
async fn test_deadline_shorter_than_timeout_wins() -> Result<()> {
    let registry = CorrelationRegistry::new();
    let deadline = Instant::now() + Duration::from_millis(100);

    let handle = registry.register("short", deadline)?;
    let result = registry.wait(handle, Duration::from_secs(60)).await;

    assert!(result.is_timeout());
    assert!(Instant::now() < deadline + Duration::from_secs(1));

    Ok(())
}

/// Test: A reply arriving after the caller gave up is discarded
#[tokio::test(start_paused = true)]
async fn test_late_reply_is_discarded() -> Result<()> {
    let registry = CorrelationRegistry::new();
    let timeout = Duration::from_millis(100);

    let handle = registry.register("late", Instant::now() + timeout)?;
    let result = registry.wait(handle, timeout).await;
    assert!(result.is_timeout());

    assert!(!registry.resolve("late", DeliveryResult::success("late")));
    assert_eq!(registry.pending_count(), 0);

    Ok(())
}

/// Test: A reply past the deadline is refused even before anyone reaps it
#[tokio::test(start_paused = true)]
async fn test_resolve_after_deadline_is_refused() -> Result<()> {
    let registry = CorrelationRegistry::new();

    let _handle = registry.register("expired", Instant::now() + Duration::from_millis(10))?;
    sleep(Duration::from_millis(20)).await;

    assert!(!registry.resolve("expired", DeliveryResult::success("expired")));
    assert!(!registry.is_pending("expired"));

    Ok(())
}

/// Test: Only the first of two replies for the same id is delivered
#[tokio::test]
async fn test_second_resolve_is_ignored() -> Result<()> {
    let registry = CorrelationRegistry::new();
    let timeout = Duration::from_secs(5);

    let handle = registry.register("twice", Instant::now() + timeout)?;

    assert!(registry.resolve("twice", DeliveryResult::failed("twice", "first")));
    assert!(!registry.resolve("twice", DeliveryResult::success("twice")));

    let result = registry.wait(handle, timeout).await;
    assert_eq!(result.cause.as_deref(), Some("first"));

    Ok(())
}

/// Test: Cancelling withdraws the entry so a reply has nowhere to go
#[tokio::test]
async fn test_cancel_withdraws_entry() -> Result<()> {
    let registry = CorrelationRegistry::new();

    let _handle = registry.register("gone", Instant::now() + Duration::from_secs(5))?;

    assert!(registry.cancel("gone"));
    assert!(!registry.cancel("gone"));
    assert!(!registry.resolve("gone", DeliveryResult::success("gone")));

    Ok(())
}

/// Test: A maximal timeout saturates instead of overflowing the clock
#[tokio::test]
async fn test_maximal_timeout_saturates() -> Result<()> {
    let registry = Arc::new(CorrelationRegistry::new());

    let deadline = deadline_after(Duration::MAX);
    assert!(deadline > Instant::now() + Duration::from_secs(86_400 * 365));

    let handle = registry.register("forever", deadline)?;

    let resolver = Arc::clone(&registry);
    tokio::spawn(async move {
        sleep(Duration::from_millis(10)).await;
        resolver.resolve("forever", DeliveryResult::success("forever"))
    });

    let result = registry.wait(handle, Duration::MAX).await;
    assert!(result.is_success());

    Ok(())
}

/// Test: Closing releases every waiter at once and refuses new registrations
#[tokio::test(start_paused = true)]
async fn test_close_releases_waiters() -> Result<()> {
    let registry = Arc::new(CorrelationRegistry::new());
    let timeout = Duration::from_secs(30);
    let handle = registry.register("open", Instant::now() + timeout)?;

    let closer = Arc::clone(&registry);
    tokio::spawn(async move {
        sleep(Duration::from_millis(10)).await;
        closer.close()
    });

    let started = Instant::now();
    let result = registry.wait(handle, timeout).await;

    assert!(result.is_timeout());
    assert!(started.elapsed() < timeout);
    assert!(registry.is_closed());
    assert_eq!(registry.pending_count(), 0);
    assert_eq!(
        registry.register("late", Instant::now() + timeout).err(),
        Some(RegistryError::Closed)
    );

    Ok(())
}

/// Test: Reaping removes only entries past their deadline
#[tokio::test(start_paused = true)]
async fn test_reap_expired_keeps_live_entries() -> Result<()> {
    let registry = CorrelationRegistry::new();
    let now = Instant::now();

    let _a = registry.register("a", now + Duration::from_millis(50))?;
    let _b = registry.register("b", now + Duration::from_millis(50))?;
    let _c = registry.register("c", now + Duration::from_secs(10))?;

    sleep(Duration::from_millis(100)).await;

    assert_eq!(registry.reap_expired(), 2);
    assert_eq!(registry.pending_count(), 1);
    assert!(registry.is_pending("c"));

    Ok(())
}

/// Test: The background reaper clears abandoned entries and stops with the registry
#[tokio::test(start_paused = true)]
async fn test_background_reaper_clears_abandoned_entries() -> Result<()> {
    let registry = Arc::new(CorrelationRegistry::new());
    let reaper = registry.spawn_reaper(Duration::from_millis(10));

    // Handles dropped without waiting, as a crashed caller would leave them.
    for i in 0..5 {
        drop(registry.register(format!("abandoned-{}", i), Instant::now() + Duration::from_millis(100))?);
    }
    assert_eq!(registry.pending_count(), 5);

    sleep(Duration::from_millis(150)).await;
    assert_eq!(registry.pending_count(), 0);

    drop(registry);
    tokio::time::timeout(Duration::from_secs(1), reaper).await??;

    Ok(())
}

/// Test: A reply racing the timeout is delivered at most once and never lost silently
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resolve_racing_timeout_delivers_at_most_once() -> Result<()> {
    let registry = Arc::new(CorrelationRegistry::new());
    let timeout = Duration::from_millis(5);
    let mut races = Vec::new();

    for i in 0..200u64 {
        let id = format!("race-{}", i);
        let handle = registry.register(id.clone(), Instant::now() + timeout)?;

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait(handle, timeout).await })
        };

        let resolver = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move {
                sleep(Duration::from_micros(i * 50)).await;
                registry.resolve(&id, DeliveryResult::success(id.clone()))
            })
        };

        races.push((waiter, resolver));
    }

    for (waiter, resolver) in races {
        let result = waiter.await?;
        let delivered = resolver.await?;

        assert_eq!(
            delivered,
            result.is_success(),
            "Resolver and waiter disagree on {}",
            result.correlation_id
        );
        assert_eq!(result.is_timeout(), !delivered);
    }

    assert_eq!(registry.pending_count(), 0);

    Ok(())
}
