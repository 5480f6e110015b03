//! Image, detection, and product repository behaviour.

use shelfscan_barcode::Symbology;
use shelfscan_model::{
    DetectionRecord, DetectionSource, ImageRecord, ImageStatus, ProductRecord,
};
use shelfscan_store::{Store, StoreError};

async fn store() -> Store {
    let store = Store::connect_memory().await.unwrap();
    store.init_schema().await.unwrap();
    store
}

fn pending_image(batch: &str, name: &str) -> ImageRecord {
    let mut image = ImageRecord::new(batch, format!("incoming/{batch}/{name}.jpg"));
    image.source_filename = Some(format!("{name}.jpg"));
    image
}

#[tokio::test]
async fn image_round_trips_with_nested_documents() {
    let store = store().await;
    let mut image = pending_image("b1", "shelf");
    image.add_decoder_attempt("local", false, false, 0, Some(40), None);
    image.add_error("decode_primary", "scanner crashed", None);
    store.images().create(&image).await.unwrap();

    let loaded = store.images().get(&image.image_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ImageStatus::Pending);
    assert_eq!(loaded.source_filename.as_deref(), Some("shelf.jpg"));
    assert_eq!(loaded.processing.primary_attempts.len(), 1);
    assert_eq!(loaded.processing.errors.len(), 1);
    assert_eq!(loaded.processing.errors[0].stage, "decode_primary");
}

#[tokio::test]
async fn duplicate_lookup_by_batch_and_filename() {
    let store = store().await;
    let image = pending_image("b1", "shelf");
    store.images().create(&image).await.unwrap();

    let found = store
        .images()
        .get_by_source_filename("b1", "shelf.jpg")
        .await
        .unwrap();
    assert!(found.is_some());
    assert!(store
        .images()
        .get_by_source_filename("b2", "shelf.jpg")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn status_updates_respect_the_state_machine() {
    let store = store().await;
    let image = pending_image("b1", "a");
    store.images().create(&image).await.unwrap();
    let images = store.images();

    images
        .update_status(&image.image_id, ImageStatus::Preprocessing)
        .await
        .unwrap();

    // Stage skipping is refused.
    let err = images
        .update_status(&image.image_id, ImageStatus::DecodedPrimary)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Transition(_)));

    // Re-marking the current status is an idempotent no-op.
    images
        .update_status(&image.image_id, ImageStatus::Preprocessing)
        .await
        .unwrap();
}

#[tokio::test]
async fn fallback_flag_routes_queries() {
    let store = store().await;
    let images = store.images();

    let image = pending_image("b1", "a");
    store.images().create(&image).await.unwrap();
    images
        .update_status(&image.image_id, ImageStatus::Preprocessing)
        .await
        .unwrap();
    images
        .set_preprocessed(&image.image_id, &Default::default())
        .await
        .unwrap();

    // Eligible for primary decoding.
    assert_eq!(images.find_preprocessed(10).await.unwrap().len(), 1);
    assert!(images.find_needing_fallback(10).await.unwrap().is_empty());

    // Primary gave up.
    images
        .update_status(&image.image_id, ImageStatus::DecodingPrimary)
        .await
        .unwrap();
    let mut loaded = images.get(&image.image_id).await.unwrap().unwrap();
    loaded.add_decoder_attempt("local", false, false, 0, Some(25), None);
    images
        .mark_needs_fallback(&image.image_id, &loaded.processing)
        .await
        .unwrap();

    assert!(images.find_preprocessed(10).await.unwrap().is_empty());
    let needing = images.find_needing_fallback(10).await.unwrap();
    assert_eq!(needing.len(), 1);
    assert_eq!(needing[0].status, ImageStatus::Preprocessed);
    assert!(needing[0].processing.needs_fallback);
}

#[tokio::test]
async fn retry_eligibility_counts_persisted_fallback_attempts() {
    let store = store().await;
    let images = store.images();

    let mut image = pending_image("b1", "a");
    image.status = ImageStatus::Failed;
    image.add_decoder_attempt("ai", false, true, 0, Some(900), None);
    store.images().create(&image).await.unwrap();

    // One attempt out of three: eligible.
    assert_eq!(images.find_failed_for_retry(10, 3).await.unwrap().len(), 1);

    let mut loaded = images.get(&image.image_id).await.unwrap().unwrap();
    loaded.add_decoder_attempt("ai", false, true, 0, Some(900), None);
    loaded.add_decoder_attempt("ai", false, true, 0, Some(900), None);
    images
        .update_processing(&image.image_id, &loaded.processing)
        .await
        .unwrap();

    // Cap reached: retry attempt #4 is never offered.
    assert!(images.find_failed_for_retry(10, 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn detection_idempotency_guard() {
    let store = store().await;
    let detections = store.detections();
    assert!(!detections.exists_for_image("img-1").await.unwrap());

    let d = DetectionRecord::new("img-1", "b1", "4006381333931", DetectionSource::PrimaryLocal);
    detections.create(&d).await.unwrap();
    assert!(detections.exists_for_image("img-1").await.unwrap());
    assert!(!detections.exists_for_image("img-2").await.unwrap());
}

#[tokio::test]
async fn review_marks_exactly_one_chosen() {
    let store = store().await;
    let detections = store.detections();

    let mut d1 = DetectionRecord::new("img-1", "b1", "4006381333931", DetectionSource::FallbackAi);
    d1.ambiguous = true;
    d1.symbology = Symbology::Ean13;
    let mut d2 = DetectionRecord::new("img-1", "b1", "5901234123457", DetectionSource::FallbackAi);
    d2.ambiguous = true;
    d2.symbology = Symbology::Ean13;
    let id1 = detections.create(&d1).await.unwrap();
    let _id2 = detections.create(&d2).await.unwrap();

    detections.mark_chosen(id1, Some("alice")).await.unwrap();
    detections
        .reject_other_detections("img-1", id1, Some("alice"))
        .await
        .unwrap();

    let all = detections.find_by_image("img-1").await.unwrap();
    let chosen: Vec<_> = all.iter().filter(|d| d.chosen && !d.rejected).collect();
    assert_eq!(chosen.len(), 1);
    assert_eq!(chosen[0].id, id1);
    assert!(all.iter().all(|d| !d.ambiguous));
    assert_eq!(detections.count_non_rejected("img-1").await.unwrap(), 1);
    assert_eq!(chosen[0].reviewed_by.as_deref(), Some("alice"));
}

#[tokio::test]
async fn product_lookup_by_any_code() {
    let store = store().await;
    let products = store.products();

    let mut p = ProductRecord::new("4006381333931", "Highlighter");
    p.upc = Some("012345678905".to_string());
    p.additional_codes.push("5901234123457".to_string());
    let id = products.create(&p).await.unwrap();
    assert!(id > 0);

    for code in ["4006381333931", "012345678905", "5901234123457"] {
        let hit = products.get_by_any_code(code).await.unwrap();
        assert_eq!(hit.unwrap().ean, "4006381333931", "lookup by {code}");
    }
    assert!(products.get_by_any_code("96385074").await.unwrap().is_none());
}

#[tokio::test]
async fn product_upsert_is_keyed_by_ean() {
    let store = store().await;
    let products = store.products();

    let p = ProductRecord::new("4006381333931", "Old name");
    let first_id = products.upsert(&p).await.unwrap();

    let mut updated = ProductRecord::new("4006381333931", "New name");
    updated.brand = Some("Stabilo".to_string());
    let second_id = products.upsert(&updated).await.unwrap();

    assert_eq!(first_id, second_id);
    assert_eq!(products.count().await.unwrap(), 1);
    let loaded = products.get_by_ean("4006381333931").await.unwrap().unwrap();
    assert_eq!(loaded.name, "New name");
    assert_eq!(loaded.brand.as_deref(), Some("Stabilo"));
}
