//! End-to-end linking runs against the in-memory store and a mock backend.

mod common;

use std::sync::Arc;

use chrono::Duration;

use common::{proposal, proposals, World};
use evidentia_core::{content_hash, defaults, LinkSource, SystematicStep};
use evidentia_inference::mock::MockGenerationBackend;
use evidentia_inference::LinkClassifier;
use evidentia_jobs::{LinkingConfig, LinkingEngine, NarrativeQueue};

const RELEVANT: &str = "Benchmarked adaptive eviction with cache warming enabled";

fn engine(world: &World, backend: &MockGenerationBackend) -> LinkingEngine {
    let repos = world.store.repositories();
    let queue = NarrativeQueue::new(repos.narrative_jobs.clone());
    LinkingEngine::new(repos, LinkClassifier::new(Arc::new(backend.clone())))
        .with_change_sink(Arc::new(queue))
}

#[tokio::test]
async fn test_accepted_link_is_persisted_and_enqueues_narrative() {
    let world = World::new().await;
    let activity = world.cache_activity().await;
    let item = world.evidence(RELEVANT, 2).await;

    let backend = MockGenerationBackend::new()
        .with_fixed_response(proposals(&[proposal(item.id, "Cache eviction", "high")]));
    let summary = engine(&world, &backend).run_at(world.now).await.unwrap();

    assert_eq!(summary.linked, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(backend.call_count(), 1);

    let stored = world.reload(&item).await;
    assert_eq!(stored.linked_activity_id, Some(activity.id));
    assert_eq!(stored.link_source, Some(LinkSource::Auto));
    assert_eq!(stored.link_reason.as_deref(), Some("eviction benchmark"));
    assert_eq!(stored.link_updated_at, Some(world.now));
    assert_eq!(stored.link_attempted_at, Some(world.now));
    assert_eq!(stored.content_hash, Some(content_hash(RELEVANT)));

    let jobs = world.store.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].activity_id, activity.id);
    assert_eq!(jobs[0].priority, defaults::LINK_CHANGE_PRIORITY);
}

#[tokio::test]
async fn test_manual_evidence_is_never_mutated() {
    let world = World::new().await;
    let cache = world.cache_activity().await;
    let other = world
        .activity("Eviction telemetry", "Whether eviction telemetry explains cache misses")
        .await;

    let mut manual = world.evidence(RELEVANT, 1).await;
    manual.linked_activity_id = Some(other.id);
    manual.link_source = Some(LinkSource::Manual);
    manual.link_reason = Some("linked by the project lead".to_string());
    world.store.put_evidence(manual.clone()).await;
    let fresh = world.evidence(RELEVANT, 2).await;

    let backend = MockGenerationBackend::new().with_fixed_response(proposals(&[
        proposal(manual.id, "Cache eviction", "high"),
        proposal(fresh.id, "Cache eviction", "high"),
    ]));
    let summary = engine(&world, &backend).run_at(world.now).await.unwrap();
    assert_eq!(summary.linked, 1);
    assert_eq!(summary.reasons.get("manual_lock"), Some(&1));

    let stored = world.reload(&manual).await;
    assert_eq!(stored.linked_activity_id, Some(other.id));
    assert_eq!(stored.link_source, Some(LinkSource::Manual));
    assert_eq!(stored.link_reason, manual.link_reason);
    assert_eq!(stored.link_updated_at, None);
    assert_eq!(stored.link_attempted_at, None);
    assert_eq!(stored.content_hash, None);

    // The manual item was not even shown to the classifier.
    let prompt = &backend.calls()[0].prompt;
    assert!(!prompt.contains(&manual.id.to_string()));
    assert!(prompt.contains(&fresh.id.to_string()));
    assert_eq!(world.reload(&fresh).await.linked_activity_id, Some(cache.id));
}

#[tokio::test]
async fn test_short_and_unrelated_evidence_never_reach_the_classifier() {
    let world = World::new().await;
    world.cache_activity().await;
    let short = world.evidence("cache latency tests", 1).await;
    let unrelated = world.evidence("lunch menu tomorrow!", 1).await;

    let backend = MockGenerationBackend::new().with_fixed_response("[]");
    let summary = engine(&world, &backend).run_at(world.now).await.unwrap();

    assert_eq!(backend.call_count(), 0);
    assert_eq!(summary.reasons.get("too_short"), Some(&1));
    assert_eq!(summary.reasons.get("no_signal"), Some(&1));
    assert_eq!(world.reload(&short).await.link_attempted_at, None);
    assert_eq!(world.reload(&unrelated).await.link_attempted_at, None);
}

/// Seed `n` evidence items attempted within the last day.
async fn seed_attempts(world: &World, n: usize) {
    for _ in 0..n {
        let mut item = world.evidence("x", 3).await;
        item.link_attempted_at = Some(world.now - Duration::hours(2));
        item.content_hash = Some(content_hash("x"));
        world.store.put_evidence(item).await;
    }
}

#[tokio::test]
async fn test_budget_at_cap_processes_nothing() {
    let world = World::new().await;
    world.cache_activity().await;
    seed_attempts(&world, 100).await;
    let candidate = world.evidence(RELEVANT, 1).await;

    let backend = MockGenerationBackend::new().with_fixed_response("[]");
    let summary = engine(&world, &backend).run_at(world.now).await.unwrap();

    assert_eq!(backend.call_count(), 0);
    assert_eq!(summary.linked, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.reasons.get("budget_exceeded"), Some(&1));
    assert!(summary.errors.is_empty());
    assert_eq!(world.reload(&candidate).await.link_attempted_at, None);
}

#[tokio::test]
async fn test_budget_one_below_cap_attempts_exactly_one() {
    let world = World::new().await;
    world.cache_activity().await;
    seed_attempts(&world, 99).await;
    let mut fresh = Vec::new();
    for hours_ago in 1..=5 {
        fresh.push(world.evidence(RELEVANT, hours_ago).await);
    }

    let backend = MockGenerationBackend::new().with_fixed_response("[]");
    let summary = engine(&world, &backend).run_at(world.now).await.unwrap();

    assert_eq!(backend.call_count(), 1);
    let mut attempted = Vec::new();
    for item in &fresh {
        if world.reload(item).await.link_attempted_at.is_some() {
            attempted.push(item.id);
        }
    }
    // Newest first: the item created an hour ago.
    assert_eq!(attempted, vec![fresh[0].id]);
    assert_eq!(summary.skipped, 4);

    let used = world
        .store
        .repositories()
        .evidence
        .count_attempted_since(world.project.id, world.now - Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(used, 100);
}

#[tokio::test]
async fn test_low_confidence_proposal_is_recorded_as_attempt() {
    let world = World::new().await;
    world.cache_activity().await;
    let item = world.evidence(RELEVANT, 1).await;

    let backend = MockGenerationBackend::new()
        .with_fixed_response(proposals(&[proposal(item.id, "Cache eviction", "low")]));
    let summary = engine(&world, &backend).run_at(world.now).await.unwrap();

    assert_eq!(summary.linked, 0);
    assert_eq!(summary.reasons.get("rejected_by_confidence"), Some(&1));
    let stored = world.reload(&item).await;
    assert_eq!(stored.linked_activity_id, None);
    assert_eq!(stored.link_attempted_at, Some(world.now));
    assert_eq!(stored.content_hash, Some(content_hash(RELEVANT)));
    assert!(world.store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_conflicting_proposals_leave_item_unlinked() {
    let world = World::new().await;
    world.cache_activity().await;
    world
        .activity("Cache warming", "Whether cache warming hides eviction cost")
        .await;
    let item = world.evidence(RELEVANT, 1).await;

    let backend = MockGenerationBackend::new().with_fixed_response(proposals(&[
        proposal(item.id, "Cache eviction", "high"),
        proposal(item.id, "Cache warming", "high"),
    ]));
    let summary = engine(&world, &backend).run_at(world.now).await.unwrap();

    assert_eq!(summary.conflicts, 1);
    assert_eq!(summary.linked, 0);
    let stored = world.reload(&item).await;
    assert_eq!(stored.linked_activity_id, None);
    assert_eq!(stored.link_attempted_at, Some(world.now));
}

#[tokio::test]
async fn test_classifier_failure_waits_for_retry_cooldown() {
    let world = World::new().await;
    world.cache_activity().await;
    let first = world.evidence(RELEVANT, 1).await;
    let second = world.evidence(RELEVANT, 2).await;

    let backend = MockGenerationBackend::new().with_failure("model offline");
    let summary = engine(&world, &backend).run_at(world.now).await.unwrap();

    assert_eq!(summary.failed, 2);
    assert_eq!(summary.linked, 0);
    assert_eq!(summary.errors.len(), 1);
    for item in [&first, &second] {
        let stored = world.reload(item).await;
        assert_eq!(stored.link_attempted_at, Some(world.now));
        assert_eq!(stored.linked_activity_id, None);
    }

    // Scheduled runs inside the retry cooldown leave the model alone.
    for minutes in [5, 10, 15, 20, 25, 30] {
        let held = engine(&world, &backend)
            .run_at(world.now + Duration::minutes(minutes))
            .await
            .unwrap();
        assert_eq!(held.reasons.get("cooldown"), Some(&2));
    }
    assert_eq!(backend.call_count(), 1);

    let retried = engine(&world, &backend)
        .run_at(world.now + Duration::minutes(61))
        .await
        .unwrap();
    assert_eq!(backend.call_count(), 2);
    assert_eq!(retried.failed, 2);
}

#[tokio::test]
async fn test_failed_reexamination_of_linked_item_retries_within_the_hour() {
    let world = World::new().await;
    let activity = world.cache_activity().await;
    let item = world
        .linked_evidence(&activity, RELEVANT, SystematicStep::Experiment, 30)
        .await;

    let backend = MockGenerationBackend::new().with_failure("model offline");
    engine(&world, &backend).run_at(world.now).await.unwrap();
    assert_eq!(backend.call_count(), 1);
    let stored = world.reload(&item).await;
    assert_eq!(stored.linked_activity_id, Some(activity.id));
    assert_eq!(stored.link_attempted_at, Some(world.now));

    engine(&world, &backend)
        .run_at(world.now + Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(backend.call_count(), 1);

    engine(&world, &backend)
        .run_at(world.now + Duration::minutes(61))
        .await
        .unwrap();
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn test_malformed_classifier_output_fails_the_batch() {
    let world = World::new().await;
    world.cache_activity().await;
    let item = world.evidence(RELEVANT, 1).await;

    let backend = MockGenerationBackend::new()
        .with_fixed_response("Evidence 1 belongs to the cache activity.");
    let summary = engine(&world, &backend).run_at(world.now).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(world.reload(&item).await.linked_activity_id, None);
}

#[tokio::test]
async fn test_cooldown_holds_back_recent_attempts() {
    let world = World::new().await;
    world.cache_activity().await;
    let item = world.evidence(RELEVANT, 1).await;

    let backend = MockGenerationBackend::new().with_fixed_response("[]");
    let engine = engine(&world, &backend);
    engine.run_at(world.now).await.unwrap();
    assert_eq!(world.reload(&item).await.link_attempted_at, Some(world.now));

    let summary = engine
        .run_at(world.now + Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(backend.call_count(), 1);
    assert_eq!(summary.reasons.get("cooldown"), Some(&1));

    engine
        .run_at(world.now + Duration::minutes(61))
        .await
        .unwrap();
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn test_batch_limit_caps_candidates() {
    let world = World::new().await;
    world.cache_activity().await;
    for hours_ago in 1..=4 {
        world.evidence(RELEVANT, hours_ago).await;
    }

    let backend = MockGenerationBackend::new().with_fixed_response("[]");
    let repos = world.store.repositories();
    let engine = LinkingEngine::with_config(
        repos,
        LinkClassifier::new(Arc::new(backend.clone())),
        LinkingConfig::default().with_batch_limit(3),
    );
    let summary = engine.run_at(world.now).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.reasons.get("batch_limit"), Some(&1));
}
