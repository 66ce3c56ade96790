mod common;

use std::sync::Arc;

use common::init_logging;
use seqmq::{Broker, Config, DeadLetterPolicy, SeqError, SubscriptionOptions};

fn broker() -> Broker {
    init_logging();
    Broker::new(Config::default())
}

#[test]
fn duplicate_create_reports_already_exists_and_get_recovers() {
    let broker = broker();
    broker.create_topic("ordered-topic").unwrap();

    let created = broker
        .create_subscription(
            "ordered-sub",
            "ordered-topic",
            SubscriptionOptions::ordered().with_ack_deadline(30),
        )
        .unwrap();
    assert_eq!(created.ack_deadline_seconds, 30);

    let err = broker
        .create_subscription("ordered-sub", "ordered-topic", SubscriptionOptions::ordered())
        .unwrap_err();
    assert!(err.is_already_exists());

    let fetched = broker.get_subscription("ordered-sub").unwrap();
    assert_eq!(fetched, created);
}

#[test]
fn missing_resources_are_not_found() {
    let broker = broker();
    let err = broker
        .create_subscription("s", "nope", SubscriptionOptions::default())
        .unwrap_err();
    assert!(matches!(err, SeqError::NotFound { .. }));
    assert!(broker.get_subscription("s").unwrap_err().is_not_found());
    assert!(broker.subscription_stats("s").unwrap_err().is_not_found());
    assert!(broker.delete_subscription("s").unwrap_err().is_not_found());
}

#[test]
fn racing_get_or_create_all_see_one_subscription() {
    let broker = Arc::new(broker());
    broker.create_topic("t").unwrap();

    let workers: Vec<_> = (0..16)
        .map(|i| {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || {
                let deadline = 10 + i;
                broker.get_or_create_subscription(
                    "shared",
                    "t",
                    SubscriptionOptions::ordered().with_ack_deadline(deadline),
                )
            })
        })
        .collect();
    let results: Vec<_> = workers
        .into_iter()
        .map(|w| w.join().unwrap().unwrap())
        .collect();

    let first = &results[0];
    assert!(results.iter().all(|m| m == first));
    assert_eq!(broker.list_subscriptions(), vec![first.clone()]);
}

#[test]
fn topics_are_listed_and_removed() {
    let broker = broker();
    broker.create_topic("b").unwrap();
    broker.create_topic("a").unwrap();
    assert!(broker.create_topic("a").unwrap_err().is_already_exists());
    assert_eq!(broker.list_topics(), vec!["a".to_string(), "b".to_string()]);

    broker.delete_topic("a").unwrap();
    assert!(!broker.topic_exists("a"));
    assert_eq!(broker.list_topics(), vec!["b".to_string()]);
}

#[test]
fn dead_letter_policy_is_reported_in_metadata() {
    let broker = broker();
    broker.create_topic("t").unwrap();
    let policy = DeadLetterPolicy::new(5).with_topic("t-dlq");
    let meta = broker
        .create_subscription(
            "s",
            "t",
            SubscriptionOptions::ordered().with_dead_letter_policy(policy.clone()),
        )
        .unwrap();
    assert_eq!(meta.dead_letter_policy, Some(policy));
    assert!(meta.enable_message_ordering);
}

#[test]
fn publish_validation_errors() {
    let broker = broker();
    broker.create_topic("t").unwrap();
    assert!(matches!(
        broker.publish("t", "", None).unwrap_err(),
        SeqError::InvalidArgument(_)
    ));
    assert!(matches!(
        broker.publish("t", "x", Some("")).unwrap_err(),
        SeqError::InvalidArgument(_)
    ));
    let long_key = "k".repeat(1025);
    assert!(broker.publish("t", "x", Some(&long_key)).is_err());
}
