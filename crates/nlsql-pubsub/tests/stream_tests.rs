//! Integration tests for the stream adapters over the in-process broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use nlsql_core::config::{PubSubConfig, RepoConfig};
use nlsql_core::{
    GetNonSqlAnswersRequest, NonSqlAnswer, NonSqlAnswerRepo, NotifyFlow, NotifyReport,
    QueryFlowListener,
};
use nlsql_pubsub::{
    KafkaAsRepo, MemoryBroker, MemoryConsumer, NonSqlNotifyTriggerConsumer, Publisher,
    QueryFlowEventProducer,
};

fn answer(i: usize) -> NonSqlAnswer {
    NonSqlAnswer {
        session_id: format!("session-{}", i),
        db_id: "nb".to_string(),
        question: format!("What about item {}?", i),
        answer: format!("Item {} is not in the database.", i),
    }
}

fn repo_on(broker: &MemoryBroker, group: &str, timeout_ms: u64) -> KafkaAsRepo<MemoryConsumer> {
    let pubsub = PubSubConfig::default();
    let config = RepoConfig {
        consumer_name: group.to_string(),
        answer_timeout_ms: timeout_ms,
        ..RepoConfig::default()
    };
    let consumer = broker
        .consumer(&config.consumer_name, &[pubsub.non_sql_topic.as_str()])
        .unwrap();
    KafkaAsRepo::new(consumer, &config)
}

#[tokio::test]
async fn test_producer_to_repo_round_trip_preserves_answers() {
    let broker = MemoryBroker::new();
    let repo = repo_on(&broker, "repo", 50);
    let producer = QueryFlowEventProducer::new(broker.clone(), &PubSubConfig::default());

    for i in 0..4 {
        producer.on_no_sql(&answer(i)).await;
    }

    let page = repo
        .get_non_sql_answers(GetNonSqlAnswersRequest { page_size: 10 })
        .await
        .unwrap();
    assert_eq!(page.answers, (0..4).map(answer).collect::<Vec<_>>());
    assert_eq!(page.skipped, 0);
}

#[tokio::test]
async fn test_pages_resume_where_previous_page_stopped() {
    let broker = MemoryBroker::new();
    let repo = repo_on(&broker, "repo", 50);
    let producer = QueryFlowEventProducer::new(broker.clone(), &PubSubConfig::default());
    for i in 0..5 {
        producer.on_no_sql(&answer(i)).await;
    }

    let request = GetNonSqlAnswersRequest { page_size: 3 };
    let first = repo.get_non_sql_answers(request).await.unwrap();
    let second = repo.get_non_sql_answers(request).await.unwrap();
    let third = repo.get_non_sql_answers(request).await.unwrap();

    assert_eq!(first.answers, (0..3).map(answer).collect::<Vec<_>>());
    assert_eq!(second.answers, (3..5).map(answer).collect::<Vec<_>>());
    assert!(third.answers.is_empty());
}

#[tokio::test]
async fn test_empty_stream_returns_within_page_budget() {
    let broker = MemoryBroker::new();
    let repo = repo_on(&broker, "repo", 40);

    let started = Instant::now();
    let page = repo
        .get_non_sql_answers(GetNonSqlAnswersRequest { page_size: 5 })
        .await
        .unwrap();
    assert!(page.answers.is_empty());
    assert!(started.elapsed() < Duration::from_millis(5 * 40 + 500));
}

#[tokio::test]
async fn test_groups_read_independently() {
    let broker = MemoryBroker::new();
    let a = repo_on(&broker, "group-a", 50);
    let b = repo_on(&broker, "group-b", 50);
    let producer = QueryFlowEventProducer::new(broker.clone(), &PubSubConfig::default());
    producer.on_no_sql(&answer(1)).await;

    let request = GetNonSqlAnswersRequest { page_size: 5 };
    assert_eq!(a.get_non_sql_answers(request).await.unwrap().answers.len(), 1);
    assert_eq!(b.get_non_sql_answers(request).await.unwrap().answers.len(), 1);
}

#[tokio::test]
async fn test_undecodable_stream_messages_are_skipped() {
    let broker = MemoryBroker::new();
    let pubsub = PubSubConfig::default();
    let repo = repo_on(&broker, "repo", 50);

    broker.publish(&pubsub.non_sql_topic, "garbage").await.unwrap();
    QueryFlowEventProducer::new(broker.clone(), &pubsub)
        .on_no_sql(&answer(9))
        .await;

    let page = repo
        .get_non_sql_answers(GetNonSqlAnswersRequest { page_size: 5 })
        .await
        .unwrap();
    assert_eq!(page.answers, vec![answer(9)]);
    assert_eq!(page.skipped, 1);
    assert!(!page.partial);
}

#[derive(Default)]
struct CountingFlow {
    cycles: AtomicUsize,
}

#[async_trait]
impl NotifyFlow for CountingFlow {
    async fn fetch_and_notify(&self) -> NotifyReport {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        NotifyReport::default()
    }
}

#[tokio::test]
async fn test_path_like_trigger_topic_reaches_consumer() {
    let broker = MemoryBroker::new();
    let flow = Arc::new(CountingFlow::default());
    let consumer = broker
        .consumer("non-sql-notify-trigger-consumer", &["api.v1.non-sql-notify"])
        .unwrap();
    let trigger = NonSqlNotifyTriggerConsumer::new(
        consumer,
        Arc::clone(&flow) as Arc<dyn NotifyFlow>,
        Duration::from_millis(20),
    );

    broker.publish("/api/v1/non-sql-notify", "go").await.unwrap();
    assert!(trigger.consume(Duration::from_millis(50)).await.is_some());
    assert_eq!(flow.cycles.load(Ordering::SeqCst), 1);
}
