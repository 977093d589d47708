use super::*;

#[test]
fn test_default_config() {
    let config = QueueConfig::default();
    assert_eq!(config.capacity, 1024);
    assert_eq!(config.poll_interval_ms, 250);
}

#[tokio::test]
async fn test_fifo_order() {
    let queue = TaskQueue::new(QueueConfig::default());
    let first = AgentTask::new("review", "first");
    let second = AgentTask::new("review", "second");
    let (first_id, second_id) = (first.id, second.id);

    queue.submit(first).unwrap();
    queue.submit(second).unwrap();
    assert_eq!(queue.len(), 2);

    let polled = queue.poll(Duration::from_millis(10)).await.unwrap();
    assert_eq!(polled.id, first_id);
    assert_eq!(polled.status, TaskStatus::Queued);
    assert_eq!(queue.poll(Duration::from_millis(10)).await.unwrap().id, second_id);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_full_queue_rejects() {
    let queue = TaskQueue::new(QueueConfig {
        capacity: 1,
        ..Default::default()
    });

    queue.submit(AgentTask::new("t", "fits")).unwrap();
    let err = queue.submit(AgentTask::new("t", "overflow")).unwrap_err();
    assert!(matches!(err, Error::QueueFull { capacity: 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_poll_is_bounded() {
    let queue = TaskQueue::new(QueueConfig::default());
    let started = tokio::time::Instant::now();

    assert!(queue.poll(queue.poll_interval()).await.is_none());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_millis(300));
}
