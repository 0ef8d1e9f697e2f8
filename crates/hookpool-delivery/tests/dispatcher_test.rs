//! Integration tests for the dispatcher and its worker pool.
//!
//! Uses in-process fakes for the hook source and the HTTP primitive so that
//! ordering, concurrency and backpressure can be observed directly.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use hookpool_core::{DeliveryEvent, HookSource};
use hookpool_delivery::{
    ClientConfig, DispatchError, Dispatcher, DispatcherConfig, HttpPoster,
};
use hookpool_testing::{CountingHookSource, RecordingEventHandler, RecordingPoster, Reply};
use serde::{Serialize, Serializer};
use serde_json::json;
use tokio::time::timeout;

const EVT_X: i32 = 3;
const GUARD: Duration = Duration::from_secs(5);

fn config(worker_count: usize, buffer_size: usize) -> DispatcherConfig {
    DispatcherConfig {
        worker_count,
        buffer_size,
        client_config: ClientConfig { timeout: Duration::from_millis(50), ..Default::default() },
        shutdown_timeout: Duration::from_secs(1),
    }
}

fn start(
    config: DispatcherConfig,
    source: &Arc<CountingHookSource>,
    poster: &Arc<RecordingPoster>,
) -> Dispatcher {
    Dispatcher::with_poster(
        config,
        source.clone() as Arc<dyn HookSource>,
        poster.clone() as Arc<dyn HttpPoster>,
    )
    .expect("dispatcher should start")
}

#[tokio::test]
async fn end_to_end_delivers_payload_to_each_hook_in_order() -> Result<()> {
    let source =
        Arc::new(CountingHookSource::new().with_hooks("game1", EVT_X, &["http://h1", "http://h2"]));
    let poster = Arc::new(RecordingPoster::new());
    let dispatcher = start(config(2, 4), &source, &poster);

    dispatcher.dispatch_hook("game1", EVT_X, &json!({ "a": 1 })).await?;
    timeout(GUARD, dispatcher.wait()).await?;

    let calls = poster.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].url, "http://h1");
    assert_eq!(calls[1].url, "http://h2");
    assert!(calls.iter().all(|call| call.body.as_ref() == br#"{"a":1}"#));
    assert_eq!(dispatcher.in_flight(), 0);

    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn every_submitted_job_is_resolved_exactly_once() -> Result<()> {
    let source = Arc::new(CountingHookSource::new().with_hooks("game1", EVT_X, &["http://h1"]));
    let poster = Arc::new(RecordingPoster::new());
    let dispatcher = start(config(4, 8), &source, &poster);

    let producers: Vec<_> = (0..8)
        .map(|producer| {
            let handle = dispatcher.handle();
            tokio::spawn(async move {
                for sequence in 0..25 {
                    handle
                        .dispatch_hook("game1", EVT_X, &json!({ "producer": producer, "seq": sequence }))
                        .await
                        .expect("dispatch should succeed");
                }
            })
        })
        .collect();

    // Sampled while producers and workers race: a job is never reported
    // completed before it is reported submitted.
    while producers.iter().any(|producer| !producer.is_finished()) {
        let stats = dispatcher.stats().await;
        assert!(stats.jobs_completed <= stats.jobs_submitted, "{stats:?}");
        tokio::task::yield_now().await;
    }

    for producer in producers {
        producer.await?;
    }
    timeout(GUARD, dispatcher.wait()).await?;

    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(source.lookups(), 200);
    assert_eq!(poster.calls().len(), 200);

    let stats = dispatcher.stats().await;
    assert_eq!(stats.jobs_submitted, 200);
    assert_eq!(stats.jobs_completed, 200);
    assert_eq!(stats.hook_lookups, 200);
    assert_eq!(stats.successful_deliveries, 200);

    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn job_without_hooks_completes_without_delivery() -> Result<()> {
    let source = Arc::new(CountingHookSource::new().with_hooks("game1", EVT_X, &["http://h1"]));
    let poster = Arc::new(RecordingPoster::new());
    let dispatcher = start(config(2, 4), &source, &poster);

    dispatcher.dispatch_hook("unknown-tenant", EVT_X, &json!({})).await?;
    dispatcher.dispatch_hook("game1", EVT_X + 1, &json!({})).await?;
    timeout(GUARD, dispatcher.wait()).await?;

    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(source.lookups(), 2);
    assert!(poster.calls().is_empty());

    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn failing_hook_does_not_abort_its_siblings() -> Result<()> {
    let source = Arc::new(CountingHookSource::new().with_hooks(
        "game1",
        EVT_X,
        &["http://h1", "http://h2", "http://h3"],
    ));
    let poster = Arc::new(RecordingPoster::new().reply("http://h2", Reply::Timeout));
    let events = RecordingEventHandler::new();
    let dispatcher = Dispatcher::with_event_handler(
        config(1, 4),
        source.clone(),
        poster.clone(),
        Arc::new(events.clone()),
    )?;

    dispatcher.dispatch_hook("game1", EVT_X, &json!({ "a": 1 })).await?;
    timeout(GUARD, dispatcher.wait()).await?;

    assert_eq!(poster.urls(), ["http://h1", "http://h2", "http://h3"]);

    let stats = dispatcher.stats().await;
    assert_eq!(stats.jobs_completed, 1);
    assert_eq!(stats.successful_deliveries, 2);
    assert_eq!(stats.failed_deliveries, 1);

    let failures = events.failures();
    assert_eq!(failures.len(), 1);
    let DeliveryEvent::Failed(failure) = &failures[0] else {
        panic!("expected a failure event");
    };
    assert_eq!(failure.url, "http://h2");
    assert_eq!(failure.hook_index, 1);
    assert_eq!(failure.status_code, None);
    assert_eq!(events.events().len(), 3);

    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn rejected_and_unreachable_hooks_are_counted_as_failures() -> Result<()> {
    let source = Arc::new(CountingHookSource::new().with_hooks(
        "game1",
        EVT_X,
        &["http://rejects", "http://down", "http://ok"],
    ));
    let poster = Arc::new(
        RecordingPoster::new()
            .reply("http://rejects", Reply::Status(500))
            .reply("http://down", Reply::Unreachable)
            .reply("http://ok", Reply::Status(399)),
    );
    let events = RecordingEventHandler::new();
    let dispatcher = Dispatcher::with_event_handler(
        config(1, 4),
        source.clone(),
        poster.clone(),
        Arc::new(events.clone()),
    )?;

    dispatcher.dispatch_hook("game1", EVT_X, &json!({})).await?;
    timeout(GUARD, dispatcher.wait()).await?;

    let failed_statuses: Vec<_> = events
        .failures()
        .into_iter()
        .map(|event| match event {
            DeliveryEvent::Failed(failure) => failure.status_code,
            DeliveryEvent::Succeeded(_) => unreachable!("filtered to failures"),
        })
        .collect();
    assert_eq!(failed_statuses, [Some(500), None]);
    assert_eq!(dispatcher.stats().await.successful_deliveries, 1);

    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn full_queue_suspends_producer_without_dropping() -> Result<()> {
    let source = Arc::new(CountingHookSource::new().with_hooks("game1", EVT_X, &["http://h1"]));
    let poster = Arc::new(RecordingPoster::gated());
    let dispatcher = start(config(1, 1), &source, &poster);
    let handle = dispatcher.handle();

    // First job occupies the only worker, second fills the queue.
    handle.dispatch_hook("game1", EVT_X, &json!({ "n": 1 })).await?;
    timeout(GUARD, poster.wait_for_in_progress(1)).await?;
    timeout(GUARD, handle.dispatch_hook("game1", EVT_X, &json!({ "n": 2 }))).await??;

    let blocked = tokio::spawn({
        let handle = handle.clone();
        async move { handle.dispatch_hook("game1", EVT_X, &json!({ "n": 3 })).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished(), "third submission should wait for a free slot");
    assert_eq!(handle.in_flight(), 2, "a waiting submission is not yet accepted");

    poster.release(1);
    timeout(GUARD, blocked).await???;

    poster.release(2);
    timeout(GUARD, dispatcher.wait()).await?;

    assert_eq!(source.lookups(), 3);
    assert_eq!(poster.calls().len(), 3);
    let bodies: Vec<_> = poster.calls().into_iter().map(|call| call.body).collect();
    assert_eq!(bodies, [&br#"{"n":1}"#[..], &br#"{"n":2}"#[..], &br#"{"n":3}"#[..]]);

    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn idle_workers_process_jobs_in_parallel() -> Result<()> {
    let source = Arc::new(CountingHookSource::new().with_hooks("game1", EVT_X, &["http://slow"]));
    let poster = Arc::new(RecordingPoster::gated());
    let dispatcher = start(config(2, 4), &source, &poster);

    dispatcher.dispatch_hook("game1", EVT_X, &json!({ "n": 1 })).await?;
    dispatcher.dispatch_hook("game1", EVT_X, &json!({ "n": 2 })).await?;

    // Both deliveries are held open at once, so each job has its own worker.
    timeout(GUARD, poster.wait_for_in_progress(2)).await?;

    poster.release(2);
    timeout(GUARD, dispatcher.wait()).await?;

    assert_eq!(poster.max_in_progress(), 2);
    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn hooks_within_a_job_are_delivered_sequentially() -> Result<()> {
    let source =
        Arc::new(CountingHookSource::new().with_hooks("game1", EVT_X, &["http://a", "http://b"]));
    let poster = Arc::new(
        RecordingPoster::new()
            .reply("http://a", Reply::Delayed(200, Duration::from_millis(30)))
            .reply("http://b", Reply::Delayed(500, Duration::from_millis(5))),
    );
    let dispatcher = start(config(4, 4), &source, &poster);

    dispatcher.dispatch_hook("game1", EVT_X, &json!({})).await?;
    timeout(GUARD, dispatcher.wait()).await?;

    let calls = poster.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].url, "http://a");
    assert_eq!(calls[1].url, "http://b");
    assert!(calls[0].finished_at <= calls[1].started_at, "b must start after a resolved");
    assert_eq!(poster.max_in_progress(), 1);

    dispatcher.shutdown().await?;
    Ok(())
}

struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("payload cannot be encoded"))
    }
}

#[tokio::test]
async fn serialization_failure_is_reported_and_nothing_is_enqueued() -> Result<()> {
    let source = Arc::new(CountingHookSource::new().with_hooks("game1", EVT_X, &["http://h1"]));
    let poster = Arc::new(RecordingPoster::new());
    let dispatcher = start(config(1, 1), &source, &poster);

    let result = dispatcher.dispatch_hook("game1", EVT_X, &Unserializable).await;

    assert!(matches!(result, Err(DispatchError::Serialization { .. })));
    assert_eq!(dispatcher.in_flight(), 0);
    timeout(GUARD, dispatcher.wait()).await?;
    assert_eq!(source.lookups(), 0);
    assert!(poster.calls().is_empty());

    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_finishes_current_job_and_discards_queued_ones() -> Result<()> {
    let source = Arc::new(CountingHookSource::new().with_hooks("game1", EVT_X, &["http://h1"]));
    let poster = Arc::new(RecordingPoster::gated());
    let dispatcher = start(config(1, 4), &source, &poster);
    let handle = dispatcher.handle();

    for n in 0..3 {
        handle.dispatch_hook("game1", EVT_X, &json!({ "n": n })).await?;
    }
    timeout(GUARD, poster.wait_for_in_progress(1)).await?;

    let shutdown = tokio::spawn(dispatcher.shutdown());
    tokio::time::sleep(Duration::from_millis(50)).await;
    poster.release(1);

    timeout(GUARD, shutdown).await???;

    assert_eq!(poster.calls().len(), 1);
    assert_eq!(handle.in_flight(), 0);
    timeout(GUARD, handle.wait()).await?;
    assert!(matches!(
        handle.dispatch_hook("game1", EVT_X, &json!({})).await,
        Err(DispatchError::ShutDown)
    ));
    Ok(())
}

#[tokio::test]
async fn abandoned_submission_does_not_count_as_in_flight() -> Result<()> {
    let source = Arc::new(CountingHookSource::new().with_hooks("game1", EVT_X, &["http://h1"]));
    let poster = Arc::new(RecordingPoster::gated());
    let dispatcher = start(config(1, 1), &source, &poster);

    dispatcher.dispatch_hook("game1", EVT_X, &json!({ "n": 1 })).await?;
    timeout(GUARD, poster.wait_for_in_progress(1)).await?;
    dispatcher.dispatch_hook("game1", EVT_X, &json!({ "n": 2 })).await?;

    // The queue is full, so this submission gives up while waiting for a slot.
    let abandoned = timeout(
        Duration::from_millis(50),
        dispatcher.dispatch_hook("game1", EVT_X, &json!({ "n": 3 })),
    )
    .await;
    assert!(abandoned.is_err(), "submission should still be waiting for a slot");
    assert_eq!(dispatcher.in_flight(), 2);

    poster.release(2);
    timeout(GUARD, dispatcher.wait()).await?;

    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(source.lookups(), 2);
    let stats = dispatcher.stats().await;
    assert_eq!(stats.jobs_submitted, 2);
    assert_eq!(stats.jobs_completed, 2);

    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn dropping_the_dispatcher_releases_queued_jobs() -> Result<()> {
    let source = Arc::new(CountingHookSource::new().with_hooks("game1", EVT_X, &["http://h1"]));
    let poster = Arc::new(RecordingPoster::gated());
    let dispatcher = start(config(1, 4), &source, &poster);
    let handle = dispatcher.handle();

    handle.dispatch_hook("game1", EVT_X, &json!({ "n": 1 })).await?;
    timeout(GUARD, poster.wait_for_in_progress(1)).await?;
    handle.dispatch_hook("game1", EVT_X, &json!({ "n": 2 })).await?;
    assert_eq!(handle.in_flight(), 2);

    drop(dispatcher);
    poster.release(1);

    timeout(GUARD, handle.wait()).await?;
    assert_eq!(handle.in_flight(), 0);
    assert_eq!(poster.calls().len(), 1);
    assert!(matches!(
        handle.dispatch_hook("game1", EVT_X, &json!({})).await,
        Err(DispatchError::ShutDown)
    ));
    Ok(())
}
