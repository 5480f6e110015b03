//! End-to-end pipeline scenarios over an in-memory store and a temp-dir
//! blob store, with scripted scanner and extractor doubles.

use std::sync::Arc;

use shelfscan_blob::BlobStore;
use shelfscan_model::{paths, DetectionSource, ImageStatus, JobType};
use shelfscan_test_utils::{ai_response, FailingScanner, FakeExtractor, FakeScanner, TestEnv};
use shelfscan_worker::{
    apply_review_decision, Dispatcher, FallbackDecodeWorker, PassthroughPreprocessor,
    PreprocessWorker, PrimaryDecodeWorker, RetryWorker, ReviewAction, ReviewDecision,
};

const EAN: &str = "4006381333931";
const EAN_2: &str = "5901234123457";

async fn dispatch(env: &TestEnv) {
    Dispatcher::new(env.context(), 50).run_cycle().await.unwrap();
}

async fn run_preprocess(env: &TestEnv) -> usize {
    PreprocessWorker::new(env.context(), Arc::new(PassthroughPreprocessor))
        .run_batch(10)
        .await
        .unwrap()
}

async fn run_primary(env: &TestEnv, scanner: FakeScanner) -> usize {
    PrimaryDecodeWorker::new(env.context(), Arc::new(scanner))
        .run_batch(10)
        .await
        .unwrap()
}

async fn run_fallback(env: &TestEnv, extractor: Arc<FakeExtractor>) -> usize {
    FallbackDecodeWorker::new(env.context(), extractor)
        .run_batch(10)
        .await
        .unwrap()
}

/// Drive a seeded image to `preprocessed` with the fallback flag raised.
async fn to_needs_fallback(env: &TestEnv) -> String {
    let image = env.seed_image("batch-1", "photo", b"jpeg-bytes").await;
    dispatch(env).await;
    assert_eq!(run_preprocess(env).await, 1);
    dispatch(env).await;
    assert_eq!(run_primary(env, FakeScanner::empty()).await, 1);
    image.image_id
}

#[tokio::test]
async fn s1_happy_primary() {
    let env = TestEnv::new().await;
    let image = env.seed_image("batch-1", "photo", b"jpeg-bytes").await;

    dispatch(&env).await;
    assert_eq!(run_preprocess(&env).await, 1);

    // Original archived, normalised artifact in place.
    let norm_path = paths::preprocessed("batch-1", &image.image_id, "jpg");
    assert!(env.blobs.exists(&norm_path).await.unwrap());
    assert!(!env.blobs.exists(&image.source_path).await.unwrap());

    dispatch(&env).await;
    assert_eq!(run_primary(&env, FakeScanner::reading(EAN)).await, 1);

    let loaded = env.store.images().get(&image.image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::DecodedPrimary);
    assert_eq!(loaded.detection_count, 1);
    let final_path = loaded.final_blob_path.unwrap();
    assert_eq!(paths::folder_of(&final_path), paths::PROCESSED);
    assert!(env.blobs.exists(&final_path).await.unwrap());
    assert!(!env.blobs.exists(&norm_path).await.unwrap());

    let detections = env
        .store
        .detections()
        .find_by_image(&image.image_id)
        .await
        .unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].code, EAN);
    assert_eq!(detections[0].source, DetectionSource::PrimaryLocal);
    assert!(detections[0].is_valid());
    assert_eq!(detections[0].normalized_code.as_deref(), Some(EAN));
    assert_eq!(loaded.processing.primary_attempts.len(), 1);
    assert!(loaded.processing.primary_attempts[0].success);
}

#[tokio::test]
async fn multiple_local_readings_stay_authoritative() {
    let env = TestEnv::new().await;
    let image = env.seed_image("batch-1", "photo", b"jpeg-bytes").await;
    dispatch(&env).await;
    run_preprocess(&env).await;
    dispatch(&env).await;
    run_primary(&env, FakeScanner::readings(&[EAN, EAN_2])).await;

    // Two valid local readings do NOT route to review.
    let loaded = env.store.images().get(&image.image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::DecodedPrimary);
    assert_eq!(loaded.detection_count, 2);
    let detections = env
        .store
        .detections()
        .find_by_image(&image.image_id)
        .await
        .unwrap();
    assert_eq!(detections.len(), 2);
    assert!(detections.iter().all(|d| !d.ambiguous));
}

#[tokio::test]
async fn invalid_readings_are_filtered_before_counting() {
    let env = TestEnv::new().await;
    let image = env.seed_image("batch-1", "photo", b"jpeg-bytes").await;
    dispatch(&env).await;
    run_preprocess(&env).await;
    dispatch(&env).await;
    // Bad checksum, bad length, non-numeric: all rejected, image escalates.
    run_primary(
        &env,
        FakeScanner::readings(&["4006381333932", "12345", "40063813339xy"]),
    )
    .await;

    let loaded = env.store.images().get(&image.image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::Preprocessed);
    assert!(loaded.processing.needs_fallback);
    assert!(env
        .store
        .detections()
        .find_by_image(&image.image_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn s2_primary_fails_ai_succeeds() {
    let env = TestEnv::new().await;
    let image_id = to_needs_fallback(&env).await;

    // The blob was not moved on primary failure.
    let norm_path = paths::preprocessed("batch-1", &image_id, "jpg");
    assert!(env.blobs.exists(&norm_path).await.unwrap());

    dispatch(&env).await;
    let extractor = Arc::new(FakeExtractor::replying(vec![ai_response(
        &[(EAN_2, 0.9)],
        Some(222),
    )]));
    assert_eq!(run_fallback(&env, extractor).await, 1);

    let loaded = env.store.images().get(&image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::DecodedFallback);
    assert_eq!(loaded.detection_count, 1);
    assert_eq!(
        paths::folder_of(loaded.final_blob_path.as_deref().unwrap()),
        paths::PROCESSED
    );
    assert_eq!(loaded.processing.ai_tokens_used, Some(222));

    let detections = env.store.detections().find_by_image(&image_id).await.unwrap();
    assert_eq!(detections.len(), 1);
    let d = &detections[0];
    assert_eq!(d.code, EAN_2);
    assert_eq!(d.source, DetectionSource::FallbackAi);
    assert_eq!(d.ai_confidence, Some(0.9));
    assert_eq!(d.ai_symbology_guess.as_deref(), Some("EAN-13"));
    assert!(!d.ambiguous);
}

#[tokio::test]
async fn s3_ai_ambiguity_routes_to_review() {
    let env = TestEnv::new().await;
    let image_id = to_needs_fallback(&env).await;
    dispatch(&env).await;

    let extractor = Arc::new(FakeExtractor::replying(vec![ai_response(
        &[(EAN, 0.8), (EAN_2, 0.7)],
        Some(100),
    )]));
    run_fallback(&env, extractor).await;

    let loaded = env.store.images().get(&image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::ManualReview);
    assert_eq!(loaded.detection_count, 2);
    let final_path = loaded.final_blob_path.unwrap();
    assert_eq!(paths::folder_of(&final_path), paths::MANUAL_REVIEW);
    assert!(env.blobs.exists(&final_path).await.unwrap());

    let detections = env.store.detections().find_by_image(&image_id).await.unwrap();
    assert_eq!(detections.len(), 2);
    assert!(detections.iter().all(|d| d.ambiguous && !d.chosen && !d.rejected));
}

#[tokio::test]
async fn s4_review_choose() {
    let env = TestEnv::new().await;
    let image_id = to_needs_fallback(&env).await;
    dispatch(&env).await;
    let extractor = Arc::new(FakeExtractor::replying(vec![ai_response(
        &[(EAN, 0.8), (EAN_2, 0.7)],
        None,
    )]));
    run_fallback(&env, extractor).await;

    let detections = env.store.detections().find_by_image(&image_id).await.unwrap();
    let chosen_id = detections[0].id;

    let ctx = env.context();
    apply_review_decision(
        &ctx,
        &image_id,
        &ReviewDecision {
            action: ReviewAction::Choose {
                detection_id: chosen_id,
            },
            reviewer: Some("alice".to_string()),
        },
    )
    .await
    .unwrap();

    let loaded = env.store.images().get(&image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::DecodedManual);
    assert_eq!(loaded.detection_count, 1);
    assert_eq!(
        paths::folder_of(loaded.final_blob_path.as_deref().unwrap()),
        paths::PROCESSED
    );

    let after = env.store.detections().find_by_image(&image_id).await.unwrap();
    let d1 = after.iter().find(|d| d.id == chosen_id).unwrap();
    let d2 = after.iter().find(|d| d.id != chosen_id).unwrap();
    assert!(d1.chosen && !d1.ambiguous && !d1.rejected);
    assert!(d2.rejected && !d2.ambiguous && !d2.chosen);
    // Exactly one non-rejected detection remains.
    assert_eq!(
        env.store
            .detections()
            .count_non_rejected(&image_id)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn review_no_barcode_fails_the_image() {
    let env = TestEnv::new().await;
    let image_id = to_needs_fallback(&env).await;
    dispatch(&env).await;
    let extractor = Arc::new(FakeExtractor::replying(vec![ai_response(
        &[(EAN, 0.8), (EAN_2, 0.7)],
        None,
    )]));
    run_fallback(&env, extractor).await;

    let ctx = env.context();
    apply_review_decision(
        &ctx,
        &image_id,
        &ReviewDecision {
            action: ReviewAction::NoBarcode,
            reviewer: Some("bob".to_string()),
        },
    )
    .await
    .unwrap();

    let loaded = env.store.images().get(&image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::Failed);
    assert_eq!(loaded.detection_count, 0);
    assert_eq!(
        paths::folder_of(loaded.final_blob_path.as_deref().unwrap()),
        paths::FAILED
    );
    assert_eq!(
        env.store
            .detections()
            .count_non_rejected(&image_id)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn review_skip_changes_nothing() {
    let env = TestEnv::new().await;
    let image_id = to_needs_fallback(&env).await;
    dispatch(&env).await;
    let extractor = Arc::new(FakeExtractor::replying(vec![ai_response(
        &[(EAN, 0.8), (EAN_2, 0.7)],
        None,
    )]));
    run_fallback(&env, extractor).await;

    let ctx = env.context();
    apply_review_decision(
        &ctx,
        &image_id,
        &ReviewDecision {
            action: ReviewAction::Skip,
            reviewer: None,
        },
    )
    .await
    .unwrap();

    let loaded = env.store.images().get(&image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::ManualReview);
}

#[tokio::test]
async fn s5_total_failure_then_retry_success() {
    let env = TestEnv::new().await;
    let image_id = to_needs_fallback(&env).await;
    dispatch(&env).await;

    // First AI pass finds nothing.
    let extractor = Arc::new(FakeExtractor::replying(vec![ai_response(&[], Some(40))]));
    run_fallback(&env, extractor).await;

    let failed = env.store.images().get(&image_id).await.unwrap().unwrap();
    assert_eq!(failed.status, ImageStatus::Failed);
    let failed_path = failed.final_blob_path.clone().unwrap();
    assert_eq!(paths::folder_of(&failed_path), paths::FAILED);
    assert!(env.blobs.exists(&failed_path).await.unwrap());
    assert_eq!(failed.processing.fallback_attempts.len(), 1);

    // Retry: the non-deterministic decoder reads it this time.
    let retry_extractor = Arc::new(FakeExtractor::replying(vec![ai_response(
        &[(EAN, 0.95)],
        Some(60),
    )]));
    let retried = RetryWorker::new(env.context(), retry_extractor)
        .run_batch(10)
        .await
        .unwrap();
    assert_eq!(retried, 1);

    let loaded = env.store.images().get(&image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::DecodedFallback);
    assert_eq!(loaded.detection_count, 1);
    assert_eq!(
        paths::folder_of(loaded.final_blob_path.as_deref().unwrap()),
        paths::PROCESSED
    );
    assert_eq!(loaded.processing.fallback_attempts.len(), 2);
    assert_eq!(loaded.processing.fallback_attempts[1].attempt_number, 2);
    // Token counter is the sum of both calls.
    assert_eq!(loaded.processing.ai_tokens_used, Some(100));

    let detections = env.store.detections().find_by_image(&image_id).await.unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].code, EAN);
}

#[tokio::test]
async fn retry_cap_stops_at_three_attempts() {
    let env = TestEnv::new().await;
    let image_id = to_needs_fallback(&env).await;
    dispatch(&env).await;

    // Three empty AI passes: initial fallback plus two retries.
    run_fallback(
        &env,
        Arc::new(FakeExtractor::replying(vec![ai_response(&[], None)])),
    )
    .await;
    for _ in 0..2 {
        let extractor = Arc::new(FakeExtractor::replying(vec![ai_response(&[], None)]));
        let n = RetryWorker::new(env.context(), extractor.clone())
            .run_batch(10)
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(extractor.call_count(), 1);
    }

    let loaded = env.store.images().get(&image_id).await.unwrap().unwrap();
    assert_eq!(loaded.processing.fallback_attempts.len(), 3);
    assert_eq!(loaded.status, ImageStatus::Failed);

    // Attempt #4 never runs.
    let extractor = Arc::new(FakeExtractor::replying(vec![ai_response(&[(EAN, 0.9)], None)]));
    let n = RetryWorker::new(env.context(), extractor.clone())
        .run_batch(10)
        .await
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(extractor.call_count(), 0);
    let still = env.store.images().get(&image_id).await.unwrap().unwrap();
    assert_eq!(still.status, ImageStatus::Failed);
}

#[tokio::test]
async fn s6_lease_steal_preprocesses_exactly_once() {
    let env = TestEnv::new().await;
    let image = env.seed_image("batch-1", "photo", b"jpeg-bytes").await;
    dispatch(&env).await;

    // Worker A claims the preprocess job and disappears; its lease is
    // already expired when worker B polls.
    let stalled = env
        .store
        .jobs()
        .dequeue(Some(JobType::Preprocess), "worker-a", -1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stalled.attempt_count, 1);

    assert_eq!(run_preprocess(&env).await, 1);

    let job = env.store.jobs().get(&stalled.job_id).await.unwrap().unwrap();
    assert_eq!(job.attempt_count, 2, "worker B stole the expired lease");

    let loaded = env.store.images().get(&image.image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::Preprocessed);
    let norm = loaded.preprocessing.normalized_path.unwrap();
    assert!(env.blobs.exists(&norm).await.unwrap());

    // Re-running the worker finds no work and changes nothing.
    assert_eq!(run_preprocess(&env).await, 0);
}

#[tokio::test]
async fn workers_are_idempotent_on_duplicate_jobs() {
    let env = TestEnv::new().await;
    let image = env.seed_image("batch-1", "photo", b"jpeg-bytes").await;
    dispatch(&env).await;
    run_preprocess(&env).await;
    dispatch(&env).await;
    run_primary(&env, FakeScanner::reading(EAN)).await;

    // A duplicate job slipped past the dispatcher's dedup.
    env.store
        .jobs()
        .enqueue(JobType::DecodePrimary, &image.image_id, "batch-1", 0, None)
        .await
        .unwrap();
    let n = run_primary(&env, FakeScanner::reading(EAN)).await;
    assert_eq!(n, 0, "guard skips the already-decoded image");

    let detections = env
        .store
        .detections()
        .find_by_image(&image.image_id)
        .await
        .unwrap();
    assert_eq!(detections.len(), 1, "no duplicate detections");
}

#[tokio::test]
async fn scanner_error_escalates_to_fallback() {
    let env = TestEnv::new().await;
    let image = env.seed_image("batch-1", "photo", b"jpeg-bytes").await;
    dispatch(&env).await;
    run_preprocess(&env).await;
    dispatch(&env).await;

    PrimaryDecodeWorker::new(env.context(), Arc::new(FailingScanner))
        .run_batch(10)
        .await
        .unwrap();

    let loaded = env.store.images().get(&image.image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::Preprocessed);
    assert!(loaded.processing.needs_fallback);
    assert_eq!(loaded.processing.errors.len(), 1);
    assert_eq!(loaded.processing.errors[0].stage, "decode_primary");
}

#[tokio::test]
async fn extractor_error_fails_the_image() {
    let env = TestEnv::new().await;
    let image_id = to_needs_fallback(&env).await;
    dispatch(&env).await;

    run_fallback(&env, Arc::new(FakeExtractor::erroring("model unavailable"))).await;

    let loaded = env.store.images().get(&image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::Failed);
    assert_eq!(
        paths::folder_of(loaded.final_blob_path.as_deref().unwrap()),
        paths::FAILED
    );
    assert_eq!(loaded.processing.errors.len(), 1);
    assert_eq!(loaded.processing.errors[0].stage, "decode_fallback");
}

#[tokio::test]
async fn dispatcher_does_not_duplicate_jobs() {
    let env = TestEnv::new().await;
    env.seed_image("batch-1", "photo", b"jpeg-bytes").await;

    let dispatcher = Dispatcher::new(env.context(), 50);
    let first = dispatcher.run_cycle().await.unwrap();
    assert_eq!(first.preprocess, 1);
    let second = dispatcher.run_cycle().await.unwrap();
    assert_eq!(second.preprocess, 0, "live job suppresses re-enqueue");

    assert_eq!(
        env.store
            .jobs()
            .count_pending(Some(JobType::Preprocess))
            .await
            .unwrap(),
        1
    );
}
