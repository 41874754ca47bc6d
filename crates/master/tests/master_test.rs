use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use osm_core::{CoordinationStore, Task, TaskResult, TaskStatus, WorkerInfo, WorkflowKind};
use osm_errors::DistributedError;
use osm_infrastructure::InMemoryStore;
use osm_master::{Master, MasterServiceConfig, MasterState, TaskStatusView};
use tokio_util::sync::CancellationToken;

fn config(id: &str) -> MasterServiceConfig {
    MasterServiceConfig::default()
        .with_master_id(id)
        .with_lock_ttl(Duration::from_secs(10), Duration::from_secs(2))
        .with_heartbeat_timeout(Duration::from_secs(90))
        .with_worker_check_interval(Duration::from_secs(1))
        .with_close_store_on_shutdown(false)
}

async fn wait_for_leader(master: &Master) {
    while !master.is_leader().await {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_second_master_refused_while_first_holds_lock() {
    let store = Arc::new(InMemoryStore::new());
    let first = Master::new(config("m1"), store.clone());
    let second = Master::new(config("m2"), store.clone());

    first.start().await.unwrap();
    assert_eq!(first.state().await, MasterState::Leader);

    let err = second.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, DistributedError::MasterAlreadyRunning));
    assert!(!second.is_leader().await);
    assert_eq!(store.master_lock_holder().await.as_deref(), Some("m1"));

    first.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_start_elects_exactly_one_leader() {
    let store = Arc::new(InMemoryStore::new());
    let masters = [
        Arc::new(Master::new(config("m1"), store.clone())),
        Arc::new(Master::new(config("m2"), store.clone())),
    ];

    let handles: Vec<_> = masters
        .iter()
        .map(|master| {
            let master = Arc::clone(master);
            tokio::spawn(async move { master.start().await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    let winners: Vec<usize> = (0..2).filter(|&i| outcomes[i].is_ok()).collect();
    assert_eq!(winners.len(), 1);
    let loser = 1 - winners[0];
    assert!(matches!(
        outcomes[loser],
        Err(DistributedError::MasterAlreadyRunning)
    ));

    let leader = &masters[winners[0]];
    assert!(leader.is_leader().await);
    assert!(!masters[loser].is_leader().await);
    let expected = if winners[0] == 0 { "m1" } else { "m2" };
    assert_eq!(store.master_lock_holder().await.as_deref(), Some(expected));

    leader.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_releases_lock_for_next_master() {
    let store = Arc::new(InMemoryStore::new());
    let first = Master::new(config("m1"), store.clone());
    first.start().await.unwrap();
    first.shutdown().await.unwrap();

    assert_eq!(first.state().await, MasterState::Stopped);
    assert!(store.master_lock_holder().await.is_none());

    let second = Master::new(config("m2"), store.clone());
    second.start().await.unwrap();
    assert!(second.is_leader().await);
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_run_stops_on_cancel_and_closes_store() {
    let store = Arc::new(InMemoryStore::new());
    let master = Arc::new(Master::new(
        config("m1").with_close_store_on_shutdown(true),
        store.clone(),
    ));
    let cancel = CancellationToken::new();

    let runner = {
        let master = Arc::clone(&master);
        let cancel = cancel.clone();
        tokio::spawn(async move { master.run(cancel).await })
    };
    wait_for_leader(&master).await;

    cancel.cancel();
    runner.await.unwrap().unwrap();
    assert_eq!(master.state().await, MasterState::Stopped);
    assert!(store.ping().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_run_returns_leadership_lost_after_takeover() {
    let store = Arc::new(InMemoryStore::new());
    let master = Arc::new(Master::new(config("m1"), store.clone()));

    let runner = {
        let master = Arc::clone(&master);
        tokio::spawn(async move { master.run(CancellationToken::new()).await })
    };
    wait_for_leader(&master).await;

    // 锁过期后被其他实例接管
    assert!(store.release_master_lock("m1").await.unwrap());
    assert!(store
        .acquire_master_lock("m2", Duration::from_secs(60))
        .await
        .unwrap());

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(err, DistributedError::LeadershipLost));
    assert!(!master.is_leader().await);
    assert_eq!(store.master_lock_holder().await.as_deref(), Some("m2"));
}

#[tokio::test(start_paused = true)]
async fn test_dead_worker_tasks_requeued_and_worker_evicted() {
    let store = Arc::new(InMemoryStore::new());

    store
        .register_worker(&WorkerInfo::new("dead", "host-a"))
        .await
        .unwrap();
    store
        .set_worker_heartbeat_at("dead", Utc::now() - chrono::Duration::seconds(600))
        .await
        .unwrap();
    store
        .register_worker(&WorkerInfo::new("alive", "host-b"))
        .await
        .unwrap();
    store.update_worker_heartbeat("alive").await.unwrap();

    let mut orphan = Task::new("scan-x", WorkflowKind::Module, "example.com");
    orphan.mark_running("dead");
    store.set_task_running(&orphan).await.unwrap();
    let mut healthy = Task::new("scan-x", WorkflowKind::Module, "example.org");
    healthy.mark_running("alive");
    store.set_task_running(&healthy).await.unwrap();

    let master = Master::new(config("m1"), store.clone());
    master.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(store.get_worker("dead").await.unwrap().is_none());
    assert!(store.get_worker("alive").await.unwrap().is_some());
    assert!(store.get_running_task(&orphan.id).await.unwrap().is_none());
    assert!(store.get_running_task(&healthy.id).await.unwrap().is_some());

    let requeued = store
        .pop_task(Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(requeued.id, orphan.id);
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert!(requeued.worker_id.is_empty());

    master.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_submit_and_track_task() {
    let store = Arc::new(InMemoryStore::new());
    let master = Master::new(config("m1"), store.clone());
    master.start().await.unwrap();

    let submitted = master
        .submit_task(Task::new("scan-x", WorkflowKind::Module, "example.com"))
        .await
        .unwrap();
    assert_eq!(master.queue_stats().await.unwrap().pending, 1);

    // pending任务还查不到状态
    let err = master.get_task_status(&submitted.id).await.unwrap_err();
    assert!(err.is_not_found());

    let mut task = store
        .pop_task(Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    task.mark_running("w1");
    store.set_task_running(&task).await.unwrap();

    let running = master.get_task_status(&submitted.id).await.unwrap();
    assert_eq!(running.status(), TaskStatus::Running);
    assert_eq!(master.list_tasks().await.unwrap().len(), 1);

    let mut exports = HashMap::new();
    exports.insert("count".to_string(), "3".to_string());
    let result = TaskResult::completed(&task.id, "3 subdomains", exports);
    store.set_task_result(&result).await.unwrap();
    store.remove_task_running(&task.id).await.unwrap();

    match master.get_task_status(&submitted.id).await.unwrap() {
        TaskStatusView::Finished(found) => {
            assert_eq!(found.exports.get("count").map(String::as_str), Some("3"));
        }
        other => panic!("unexpected status: {other:?}"),
    }
    assert!(master.list_tasks().await.unwrap().is_empty());

    master.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_list_and_get_workers() {
    let store = Arc::new(InMemoryStore::new());
    let master = Master::new(config("m1"), store.clone());

    store
        .register_worker(&WorkerInfo::new("w1", "host-a"))
        .await
        .unwrap();
    store.update_worker_heartbeat("w1").await.unwrap();

    let workers = master.list_workers().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(master.get_worker("w1").await.unwrap().hostname, "host-a");
    assert!(master.get_worker("w2").await.unwrap_err().is_not_found());
}
