//! End-to-end tests of the engine through the task service.

mod common;

use std::time::Duration;

use serde_json::Value;

use common::{service, status_update, FakeProvider};
use task_relay::fanout::Frame;
use task_relay::reconcile::{spawn_poller, Applied};
use task_relay::task::{OutcomeKind, TaskStatus, Verdict};

fn decode(frame: &Frame) -> Value {
    serde_json::from_str(&frame.payload).unwrap()
}

async fn next_event(frames: &mut tokio::sync::mpsc::Receiver<Frame>) -> Option<Value> {
    loop {
        let frame = frames.recv().await?;
        if !frame.is_heartbeat() {
            return Some(decode(&frame));
        }
    }
}

#[tokio::test]
async fn test_submit_registers_and_stores_task() {
    let provider = FakeProvider::new();
    let (service, sink) = service(provider.clone());

    let record = service.submit("Audit https://example.com").await.unwrap();
    assert_eq!(record.id, "bu-1");
    assert_eq!(record.status, TaskStatus::Pending);
    assert!(service.registry().contains("bu-1"));

    let stored = sink_load(&sink, "bu-1").await;
    assert_eq!(stored.prompt, "Audit https://example.com");
    assert_eq!(
        provider.callback_urls.lock()[0].as_deref(),
        Some("https://relay.example.com/api/webhooks/browser-use")
    );

    assert!(service.submit("  ").await.is_err());
}

async fn sink_load(
    sink: &task_relay::store::MemoryTaskStore,
    id: &str,
) -> task_relay::store::DurableTask {
    use task_relay::store::TaskSink;
    sink.load(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_subscriber_sees_one_ordered_lifecycle() {
    let provider = FakeProvider::new();
    let (service, sink) = service(provider.clone());
    let task_id = service.submit("Check pricing").await.unwrap().id;

    let mut sub = service.subscribe(&task_id).unwrap();
    let reconciler = service.reconciler();

    reconciler
        .on_webhook_signal(&status_update(&task_id, "started"))
        .await
        .unwrap();

    provider.set_status("running");
    provider.push_log("opened landing page");
    provider.push_log("clicked pricing");
    assert_eq!(service.registry().get(&task_id).unwrap().provider_log_count, 0);

    // Let the real poll loop pick up the new entries.
    let poller = spawn_poller(
        reconciler.clone(),
        provider.clone(),
        Duration::from_millis(10),
    );
    for _ in 0..100 {
        if service.registry().get(&task_id).unwrap().log_entries.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    poller.abort();

    provider.set_status("finished");
    provider.push_log(concat!(
        "Claim: Does X\nPricing visible: no\nAI Retrieval: success\n",
        "Latency: ~3.2s\nFinal Verdict: WORKS"
    ));
    reconciler
        .on_webhook_signal(&status_update(&task_id, "finished"))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    let mut done = None;
    while let Some(event) = next_event(&mut sub.frames).await {
        let kind = event["type"].as_str().unwrap().to_string();
        if kind == "done" {
            done = Some(event["data"].clone());
            kinds.push(kind);
            break;
        }
        kinds.push(kind);
    }

    assert_eq!(kinds.first().map(String::as_str), Some("init"));
    assert_eq!(kinds.last().map(String::as_str), Some("done"));
    let log_events = kinds.iter().filter(|k| *k == "log").count();
    assert_eq!(log_events, 3);

    let result = done.unwrap();
    assert_eq!(result["claim"], "Does X");
    assert_eq!(result["pricingVisible"], false);
    assert_eq!(result["aiRetrieval"]["success"], true);
    assert_eq!(result["aiRetrieval"]["latencySeconds"], 3.2);
    assert_eq!(result["finalVerdict"], "WORKS");

    let record = service.registry().get(&task_id).unwrap();
    assert_eq!(record.status, TaskStatus::Done);
    let outcome = record.result.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Structured);
    assert_eq!(outcome.final_verdict, Some(Verdict::Works));
    assert_eq!(sink_load(&sink, &task_id).await.status, TaskStatus::Done);
}

#[tokio::test]
async fn test_late_subscriber_gets_history_then_live_entries() {
    let provider = FakeProvider::new();
    let (service, _sink) = service(provider.clone());
    let task_id = service.submit("Check docs").await.unwrap().id;

    let entries: Vec<_> = (0..4)
        .map(|i| {
            task_relay::task::LogEntry::from_provider(
                serde_json::json!({ "content": format!("step {i}") }),
            )
        })
        .collect();
    service.registry().append_log(&task_id, entries).unwrap();

    let mut sub = service.subscribe(&task_id).unwrap();
    service
        .registry()
        .append_log(
            &task_id,
            vec![task_relay::task::LogEntry::system("system", "step 4")],
        )
        .unwrap();

    let init = next_event(&mut sub.frames).await.unwrap();
    assert_eq!(init["type"], "init");
    assert_eq!(init["data"]["logCount"], 4);

    let batch = next_event(&mut sub.frames).await.unwrap();
    assert_eq!(batch["type"], "logs");
    let messages: Vec<&str> = batch["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["step 0", "step 1", "step 2", "step 3"]);

    let live = next_event(&mut sub.frames).await.unwrap();
    assert_eq!(live["type"], "log");
    assert_eq!(live["data"]["message"], "step 4");
}

#[tokio::test]
async fn test_evicted_task_is_hydrated_from_storage() {
    let provider = FakeProvider::new();
    let (service, sink) = service(provider.clone());

    // Task the registry never saw, only the sink.
    {
        use task_relay::store::{DurableSnapshot, TaskSink};
        let mut record = task_relay::task::TaskRecord::new("bu-old");
        record.status = TaskStatus::Done;
        record.result = Some(task_relay::task::TaskOutcome::recognized("archived answer"));
        sink.save("bu-old", &DurableSnapshot::from_record(&record))
            .await
            .unwrap();
    }

    assert!(!service.registry().contains("bu-old"));
    assert!(service.ensure_live("bu-old").await.unwrap());
    assert!(!service.ensure_live("bu-never").await.unwrap());

    let mut sub = service.subscribe("bu-old").unwrap();
    assert_eq!(next_event(&mut sub.frames).await.unwrap()["type"], "init");
    let done = next_event(&mut sub.frames).await.unwrap();
    assert_eq!(done["type"], "done");
    assert_eq!(done["data"]["output"], "archived answer");
    assert!(next_event(&mut sub.frames).await.is_none());
}

#[tokio::test]
async fn test_dropped_stream_deregisters_without_cancelling_finalization() {
    let provider = FakeProvider::new();
    let (service, _sink) = service(provider.clone());
    let task_id = service.submit("Check login").await.unwrap().id;

    let sub = service.subscribe(&task_id).unwrap();
    assert_eq!(service.registry().subscriber_count(&task_id), 1);
    service.unsubscribe(&task_id, sub.observer);
    drop(sub);
    assert_eq!(service.registry().subscriber_count(&task_id), 0);

    provider.set_status("finished");
    provider.set_output("It works");
    service
        .reconciler()
        .on_webhook_signal(&status_update(&task_id, "finished"))
        .await
        .unwrap();
    assert_eq!(
        service.registry().get(&task_id).unwrap().status,
        TaskStatus::Done
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_webhooks_after_eviction_keep_final_state() {
    let provider = FakeProvider::new();
    let (service, sink) = service(provider.clone());
    let task_id = service.submit("Check the status page").await.unwrap().id;
    let reconciler = service.reconciler();

    provider.set_status("finished");
    provider.set_output("Status page is live");
    reconciler
        .on_webhook_signal(&status_update(&task_id, "finished"))
        .await
        .unwrap();
    assert_eq!(service.registry().get(&task_id).unwrap().status, TaskStatus::Done);

    // Close delay, then the eviction grace period.
    tokio::time::sleep(Duration::from_secs(6 + 301)).await;
    assert!(!service.registry().contains(&task_id));

    let late = reconciler
        .on_webhook_signal(&status_update(&task_id, "started"))
        .await
        .unwrap();
    assert_eq!(late, Applied::Ignored);
    let again = reconciler
        .on_webhook_signal(&status_update(&task_id, "finished"))
        .await
        .unwrap();
    assert_eq!(again, Applied::Ignored);
    assert_eq!(provider.fetches(), 1);

    let stored = sink_load(&sink, &task_id).await;
    assert_eq!(stored.status, TaskStatus::Done);
    assert!(stored.result.is_some());
    assert_eq!(service.registry().get(&task_id).unwrap().status, TaskStatus::Done);
}
