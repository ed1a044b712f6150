mod common;

use chrono::{NaiveTime, Utc};

use common::{Harness, item};
use tagwatch::application::SubscriberStore;
use tagwatch::application::usecases::{POPULAR_QUERY, PopularDigestUseCase};
use tagwatch::domain::SubscriberId;

fn digest(h: &Harness) -> PopularDigestUseCase {
    PopularDigestUseCase {
        source: h.deps.source.clone(),
        limiter: h.deps.limiter.clone(),
        subscribers: h.deps.subscribers.clone(),
        notifier: h.deps.notifier.clone(),
        renderer: h.deps.renderer.clone(),
        limit: 30,
        at: NaiveTime::from_hms_opt(23, 30, 0).unwrap(),
    }
}

#[tokio::test]
async fn nobody_opted_in_means_no_fetch() {
    let h = Harness::new();
    let report = digest(&h).run_once().await.unwrap();

    assert_eq!(report.subscribers, 0);
    assert_eq!(h.source.fetch_count(), 0);
}

#[tokio::test]
async fn digest_goes_to_opted_in_subscribers_minus_their_blacklist() {
    let h = Harness::new();
    let (a, b, c) = (SubscriberId(1), SubscriberId(2), SubscriberId(3));
    h.store.set_popular_opt_in(a, true).await.unwrap();
    h.store.set_popular_opt_in(b, true).await.unwrap();
    h.store.set_prefix(c, "rating:s").await.unwrap();
    h.store.add_blacklist(b, &["gore".to_string()]).await.unwrap();

    let now = Utc::now();
    h.source.set_items(vec![
        item(1, now, &["fox"]),
        item(2, now, &["gore"]),
        item(3, now, &["wolf"]),
    ]);

    let report = digest(&h).run_once().await.unwrap();

    assert_eq!(report.items, 3);
    assert_eq!(report.subscribers, 2);
    assert_eq!(report.sent, 5);
    assert_eq!(report.failed, 0);

    let requests = h.source.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].query, POPULAR_QUERY);
    assert_eq!(requests[0].limit, Some(30));

    let to_b: Vec<String> = h
        .notifier
        .deliveries()
        .into_iter()
        .filter(|(s, _)| *s == b)
        .map(|(_, m)| m.title)
        .collect();
    assert_eq!(to_b, vec!["#1", "#3"]);
    assert!(h.notifier.deliveries().iter().all(|(s, _)| *s != c));
}

#[tokio::test]
async fn failed_delivery_is_counted_and_others_continue() {
    let h = Harness::new();
    h.store.set_popular_opt_in(SubscriberId(1), true).await.unwrap();
    h.notifier.fail_for_item(1);
    let now = Utc::now();
    h.source
        .set_items(vec![item(1, now, &["fox"]), item(2, now, &["fox"])]);

    let report = digest(&h).run_once().await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn upstream_failure_skips_the_digest() {
    let h = Harness::new();
    h.store.set_popular_opt_in(SubscriberId(1), true).await.unwrap();
    h.source.push_failure(Some(500), "boom");

    assert!(digest(&h).run_once().await.is_err());
    assert_eq!(h.notifier.count(), 0);
}
