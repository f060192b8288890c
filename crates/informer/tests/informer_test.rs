//! Cache, view and controller behaviour against the in-memory API mock.

use apiserver_client::{LiveWatch, MockApi};
use async_trait::async_trait;
use informer::{
    key_from_label, CachedApi, Controller, ControllerConfig, ErrorPolicy, InformerError, QueueConfig,
    Reconciler, RemoveReconciler, ResourceCache,
};
use resources::{ConfigMap, EventType, LabelSelector, ListOptions, ObjectMeta, Resource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config_map(namespace: &str, name: &str, version: &str) -> ConfigMap {
    ConfigMap::new(ObjectMeta::namespaced(namespace, name).with_resource_version(version))
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}

async fn live_cache(api: &MockApi<ConfigMap>) -> (Arc<ResourceCache<ConfigMap>>, LiveWatch) {
    let live = api.push_live_watch();
    let cache = ResourceCache::new(Arc::new(api.clone()), None, ListOptions::default())
        .await
        .expect("cache should build");
    (Arc::new(cache), live)
}

fn fast_retries() -> QueueConfig {
    QueueConfig::default().with_retry_delays(Duration::from_millis(5), Duration::from_millis(20))
}

#[tokio::test]
async fn test_list_then_watch_leaves_folded_state() {
    let api = MockApi::new();
    api.add_object(config_map("default", "a", "10"));
    api.add_object(config_map("default", "b", "11"));
    api.set_list_resource_version("100");
    let (cache, live) = live_cache(&api).await;

    live.send(EventType::Modified, &config_map("default", "a", "101").with_data("v", "2"));
    live.send(EventType::Deleted, &config_map("default", "b", "102"));
    live.send(EventType::Added, &config_map("default", "c", "103"));

    eventually(|| cache.get("default/c").is_some()).await;
    let mut keys = cache.keys();
    keys.sort();
    assert_eq!(keys, vec!["default/a", "default/c"]);
    assert_eq!(cache.get("default/a").unwrap().data.get("v").map(String::as_str), Some("2"));
    assert_eq!(api.watch_requests()[0].resource_version.as_deref(), Some("100"));
}

#[tokio::test]
async fn test_watch_resumes_from_last_event_after_server_timeout() {
    let api = MockApi::new();
    api.set_list_resource_version("1");
    let (cache, live) = live_cache(&api).await;
    let second = api.push_live_watch();

    live.send(EventType::Added, &config_map("default", "x", "5"));
    eventually(|| cache.get("default/x").is_some()).await;
    drop(live);

    eventually(|| api.watch_requests().len() == 2).await;
    assert_eq!(api.watch_requests()[1].resource_version.as_deref(), Some("5"));

    second.send(EventType::Added, &config_map("default", "y", "6"));
    eventually(|| cache.get("default/y").is_some()).await;
    assert!(cache.is_ready());
}

#[tokio::test]
async fn test_filtered_view_only_emits_its_namespace_in_order() {
    let api = MockApi::new();
    api.add_object(config_map("ns1", "existing", "1"));
    api.add_object(config_map("ns2", "other", "2"));
    let (cache, live) = live_cache(&api).await;

    let mut view = cache.watch(Some("ns1"), vec![]);
    let first = view.next().await.unwrap();
    assert_eq!((first.event_type, first.object.key()), (EventType::Added, "ns1/existing".to_string()));

    live.send(EventType::Added, &config_map("ns2", "b", "3"));
    live.send(EventType::Added, &config_map("ns1", "a", "4"));
    live.send(EventType::Modified, &config_map("ns2", "b", "5"));
    live.send(EventType::Modified, &config_map("ns1", "a", "6"));
    live.send(EventType::Deleted, &config_map("ns1", "existing", "7"));

    let mut received = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(1), view.next())
            .await
            .unwrap()
            .unwrap();
        received.push((event.event_type, event.object.key(), event.object.resource_version().to_string()));
    }
    assert_eq!(
        received,
        vec![
            (EventType::Added, "ns1/a".to_string(), "4".to_string()),
            (EventType::Modified, "ns1/a".to_string(), "6".to_string()),
            (EventType::Deleted, "ns1/existing".to_string(), "7".to_string()),
        ]
    );

    view.stop();
    assert!(view.next().await.is_none());
}

#[tokio::test]
async fn test_filtered_view_ends_when_cache_fails() {
    let api = MockApi::new();
    let (cache, live) = live_cache(&api).await;
    let mut view = cache.watch(None, vec![]);

    live.send(EventType::Added, &config_map("default", "a", "2"));
    assert!(view.next().await.is_some());

    live.send_raw(bytes::Bytes::from_static(b"{\"type\":\"SYNC\",\"object\":{}}\n"));
    let end = tokio::time::timeout(Duration::from_secs(1), view.next()).await.unwrap();
    assert!(end.is_none());
    assert!(!cache.is_ready());
    assert!(cache.last_error().is_some());
}

#[tokio::test]
async fn test_cached_api_reads_locally_and_writes_through() {
    let api = MockApi::new();
    let foo = ConfigMap::new(
        ObjectMeta::namespaced("default", "foo")
            .with_label("app", "foo")
            .with_label("tier", "web"),
    );
    let bar = ConfigMap::new(ObjectMeta::namespaced("default", "bar").with_label("app", "bar"));
    let plain = ConfigMap::new(ObjectMeta::namespaced("default", "plain"));
    for object in [&foo, &bar, &plain] {
        api.add_object(object.clone());
    }
    let _live = api.push_live_watch();

    let cached = CachedApi::new(Arc::new(api.clone()), None, ListOptions::default())
        .await
        .unwrap();
    let list_calls = api.list_calls();

    let selected = cached.list(None, &ListOptions::default().with_selector(LabelSelector::equals("app", "foo")));
    assert_eq!(selected.iter().map(Resource::key).collect::<Vec<_>>(), vec!["default/foo"]);
    assert_eq!(cached.list(Some("other"), &ListOptions::default()).len(), 0);
    assert_eq!(cached.get(Some("default"), "bar").unwrap().name(), "bar");
    assert!(matches!(cached.get(Some("default"), "missing"), Err(InformerError::NotFound(_))));
    assert_eq!(api.list_calls(), list_calls);

    let (_, outcome) = cached
        .apply(Some("default"), "new", "informer-test", false, &config_map("default", "new", ""))
        .await
        .unwrap();
    assert_eq!(outcome, EventType::Added);
    assert!(api.object("default/new").is_some());
    // Not cached until the watch reports it.
    assert!(cached.get(Some("default"), "new").is_err());
}

#[derive(Default)]
struct Recording {
    reconciled: Mutex<Vec<String>>,
    removed: Mutex<Vec<(Option<String>, String)>>,
    in_flight: Mutex<HashMap<String, usize>>,
    overlap: AtomicBool,
    failures_left: AtomicUsize,
    delay: Option<Duration>,
}

impl Recording {
    fn reconciled(&self) -> Vec<String> {
        self.reconciled.lock().unwrap().clone()
    }

    fn count(&self, key: &str) -> usize {
        self.reconciled().iter().filter(|k| *k == key).count()
    }
}

#[async_trait]
impl Reconciler<ConfigMap> for Recording {
    async fn reconcile(&self, object: ConfigMap) -> anyhow::Result<()> {
        let key = object.key();
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.entry(key.clone()).or_default();
            *count += 1;
            if *count > 1 {
                self.overlap.store(true, Ordering::SeqCst);
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        *self.in_flight.lock().unwrap().get_mut(&key).unwrap() -= 1;
        self.reconciled.lock().unwrap().push(key.clone());

        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("transient failure for {key}");
        }
        Ok(())
    }

    fn as_remover(&self) -> Option<&dyn RemoveReconciler> {
        Some(self)
    }
}

#[async_trait]
impl RemoveReconciler for Recording {
    async fn remove(&self, namespace: Option<&str>, name: &str) -> anyhow::Result<()> {
        self.removed
            .lock()
            .unwrap()
            .push((namespace.map(str::to_string), name.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn test_controller_reconciles_cached_state_and_removals() {
    let api = MockApi::new();
    api.add_object(config_map("default", "a", "1"));
    let (cache, live) = live_cache(&api).await;
    let reconciler = Arc::new(Recording::default());

    let controller = Controller::new(Arc::clone(&cache), reconciler.clone(), ControllerConfig::default().workers(2)).await;
    let shutdown = controller.shutdown_handle();
    let running = tokio::spawn(controller.run());

    eventually(|| reconciler.count("default/a") == 1).await;

    live.send(EventType::Deleted, &config_map("default", "a", "2"));
    eventually(|| !reconciler.removed.lock().unwrap().is_empty()).await;
    assert_eq!(
        reconciler.removed.lock().unwrap()[0],
        (Some("default".to_string()), "a".to_string())
    );

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), running).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_controller_never_overlaps_a_key_and_reruns_after_in_flight_change() {
    let api = MockApi::new();
    let (cache, live) = live_cache(&api).await;
    let reconciler = Arc::new(Recording {
        delay: Some(Duration::from_millis(50)),
        ..Recording::default()
    });

    let controller = Controller::new(Arc::clone(&cache), reconciler.clone(), ControllerConfig::default().workers(4)).await;
    let shutdown = controller.shutdown_handle();
    let running = tokio::spawn(controller.run());

    live.send(EventType::Added, &config_map("default", "a", "2"));
    eventually(|| !reconciler.in_flight.lock().unwrap().is_empty()).await;
    live.send(EventType::Modified, &config_map("default", "a", "3"));
    live.send(EventType::Modified, &config_map("default", "a", "4"));

    eventually(|| reconciler.count("default/a") == 2).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(reconciler.count("default/a"), 2);
    assert!(!reconciler.overlap.load(Ordering::SeqCst));

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_requeue_policy_retries_until_success() {
    let api = MockApi::new();
    api.add_object(config_map("default", "flaky", "1"));
    let (cache, _live) = live_cache(&api).await;
    let reconciler = Arc::new(Recording::default());
    reconciler.failures_left.store(2, Ordering::SeqCst);

    let config = ControllerConfig::default().error_policy(ErrorPolicy::Requeue).queue(fast_retries());
    let controller = Controller::new(Arc::clone(&cache), reconciler.clone(), config).await;
    let queue = Arc::clone(controller.queue());
    let shutdown = controller.shutdown_handle();
    let running = tokio::spawn(controller.run());

    eventually(|| reconciler.count("default/flaky") == 3).await;
    eventually(|| queue.num_requeues("default/flaky") == 0).await;

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_report_policy_does_not_retry() {
    let api = MockApi::new();
    api.add_object(config_map("default", "broken", "1"));
    let (cache, _live) = live_cache(&api).await;
    let reconciler = Arc::new(Recording::default());
    reconciler.failures_left.store(5, Ordering::SeqCst);

    let config = ControllerConfig::default().error_policy(ErrorPolicy::Report).queue(fast_retries());
    let controller = Controller::new(Arc::clone(&cache), reconciler.clone(), config).await;
    let queue = Arc::clone(controller.queue());
    let shutdown = controller.shutdown_handle();
    let running = tokio::spawn(controller.run());

    eventually(|| reconciler.count("default/broken") == 1).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(reconciler.count("default/broken"), 1);
    assert_eq!(queue.num_requeues("default/broken"), 0);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_secondary_source_triggers_owner_by_label() {
    let api = MockApi::new();
    api.add_object(config_map("default", "web", "1"));
    let (cache, _live) = live_cache(&api).await;

    let pods = MockApi::new();
    let (pod_cache, pod_live) = live_cache(&pods).await;

    let reconciler = Arc::new(Recording::default());
    let controller = Controller::new(Arc::clone(&cache), reconciler.clone(), ControllerConfig::default()).await;
    controller.watches(&pod_cache, key_from_label("app")).await;
    let shutdown = controller.shutdown_handle();
    let running = tokio::spawn(controller.run());

    eventually(|| reconciler.count("default/web") == 1).await;

    let pod = ConfigMap::new(ObjectMeta::namespaced("default", "web-1").with_label("app", "web"));
    pod_live.send(EventType::Added, &pod);
    eventually(|| reconciler.count("default/web") == 2).await;

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_controller_exits_with_error_when_cache_fails() {
    let api = MockApi::new();
    let (cache, live) = live_cache(&api).await;
    let reconciler = Arc::new(Recording::default());

    let controller = Controller::new(Arc::clone(&cache), reconciler, ControllerConfig::default()).await;
    let running = tokio::spawn(controller.run());

    live.fail("stream reset");
    let result = tokio::time::timeout(Duration::from_secs(1), running).await.unwrap().unwrap();
    match result {
        Err(InformerError::CacheStopped(reason)) => assert!(reason.contains("stream reset")),
        other => panic!("expected cache stopped error, got {other:?}"),
    }
    assert_eq!(api.watch_requests().len(), 1);
}
