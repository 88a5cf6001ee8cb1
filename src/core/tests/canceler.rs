use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ridesync_core::booking::{
    Booking, BookingCanceler, CancelError, CancelOrigin, CancelSettings, DeletionOutcome,
    PaymentRelease,
};
use ridesync_core::storage::{FieldUpdate, MemoryStore, StoreOp, TripStore};
use ridesync_core::{PaymentBackend, StatusRegistry, SyncConfig};
use ridesync_protocol::{CanonicalStatus, Document, PaymentError, StatusChangeEvent};
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ── Helpers ──────────────────────────────────────────────────────────

const TRIPS: &str = "trips";
const RESERVATIONS: &str = "Reservations";

#[derive(Clone, Copy)]
enum Reply {
    Success,
    Refuse,
    Fail,
    Hang,
}

/// Payment backend that records every call and answers with a fixed reply.
struct StubPayments {
    reply: Reply,
    calls: Mutex<Vec<(String, String)>>,
}

impl StubPayments {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl PaymentBackend for StubPayments {
    fn cancel_payment(
        &self,
        payment_ref: &str,
        trip_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, PaymentError>> + Send>> {
        self.calls
            .lock()
            .unwrap()
            .push((payment_ref.to_string(), trip_id.to_string()));
        let reply = self.reply;
        Box::pin(async move {
            match reply {
                Reply::Success => Ok(true),
                Reply::Refuse => Ok(false),
                Reply::Fail => Err(PaymentError::Status(502)),
                Reply::Hang => std::future::pending::<Result<bool, PaymentError>>().await,
            }
        })
    }
}

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn canceler(store: &Arc<MemoryStore>, payments: &Arc<StubPayments>) -> BookingCanceler {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    BookingCanceler::new(
        store.clone(),
        payments.clone(),
        CancelSettings::from(&SyncConfig::default()),
    )
}

/// A scheduled booking with a driver already assigned and a shadow record.
fn seed_scheduled(store: &MemoryStore, trip_id: &str) {
    store
        .set(
            TRIPS,
            trip_id,
            doc(json!({
                "status": "scheduled",
                "scheduledPickupAt": "2026-10-20T08:30:00Z",
                "driverId": "d-7",
                "driverName": "Sam",
                "driverVehicle": "Blue Corolla",
                "pendingDriverId": "d-9",
            })),
        )
        .unwrap();
    store
        .set(RESERVATIONS, trip_id, doc(json!({ "tripId": trip_id })))
        .unwrap();
}

fn trip(store: &MemoryStore, trip_id: &str) -> Option<Document> {
    store.get(TRIPS, trip_id).unwrap()
}

// ── Cancellation ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn scheduled_booking_is_cancelled_then_deleted_after_grace() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");

    let booking = Booking {
        payment_intent_id: Some("pi_123".to_string()),
        status: Some("scheduled".to_string()),
        scheduled_pickup_at: Some("2026-10-20T08:30:00Z".parse().unwrap()),
        ..Booking::new("t1")
    };
    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&booking, CancelOrigin::UpcomingRides)
        .await
        .unwrap();

    assert_eq!(report.payment, PaymentRelease::Released);
    assert_eq!(report.payment_ref.as_deref(), Some("pi_123"));
    assert_eq!(report.booking_status, Some(CanonicalStatus::Requested));
    assert_eq!(report.scheduled_pickup_at, booking.scheduled_pickup_at);
    assert!(report.shadow_deleted);
    assert_eq!(report.grace, Duration::from_secs(5));
    assert_eq!(payments.calls(), vec![("pi_123".to_string(), "t1".to_string())]);

    let cancelled = trip(&store, "t1").unwrap();
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["state"], "cancelled");
    assert_eq!(cancelled["cancelledBy"], "passenger");
    assert_eq!(cancelled["cancellationReason"], "Cancelled by passenger");
    assert!(cancelled["cancelledAt"].as_str().unwrap().ends_with('Z'));
    for field in ["driverId", "driverName", "driverVehicle", "pendingDriverId"] {
        assert!(!cancelled.contains_key(field), "{field} should be removed");
    }
    assert_eq!(
        ridesync_protocol::normalize_document(&cancelled),
        CanonicalStatus::PassengerCancelled
    );
    assert!(store.get(RESERVATIONS, "t1").unwrap().is_none());

    assert_eq!(report.deletion.await.unwrap(), DeletionOutcome::Deleted);
    assert!(trip(&store, "t1").is_none());
}

#[tokio::test(start_paused = true)]
async fn trip_details_origin_waits_longer() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");

    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("t1"), CancelOrigin::TripDetails)
        .await
        .unwrap();
    assert_eq!(report.grace, Duration::from_secs(25));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(trip(&store, "t1").is_some());

    assert_eq!(report.deletion.await.unwrap(), DeletionOutcome::Deleted);
    assert!(trip(&store, "t1").is_none());
}

#[tokio::test(start_paused = true)]
async fn status_change_during_grace_keeps_record() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");

    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("t1"), CancelOrigin::UpcomingRides)
        .await
        .unwrap();

    store
        .update(
            TRIPS,
            "t1",
            &[
                ("status".to_string(), FieldUpdate::set("accepted")),
                ("state".to_string(), FieldUpdate::set("accepted")),
                ("cancelledBy".to_string(), FieldUpdate::Delete),
            ],
        )
        .unwrap();

    assert_eq!(
        report.deletion.await.unwrap(),
        DeletionOutcome::Skipped(CanonicalStatus::Accepted)
    );
    assert!(trip(&store, "t1").is_some());
}

#[tokio::test(start_paused = true)]
async fn record_removed_during_grace_is_reported_missing() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");

    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("t1"), CancelOrigin::UpcomingRides)
        .await
        .unwrap();
    store.delete(TRIPS, "t1").unwrap();

    assert_eq!(report.deletion.await.unwrap(), DeletionOutcome::Missing);
}

#[tokio::test(start_paused = true)]
async fn custom_reason_is_recorded() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");

    let booking = Booking {
        reason: Some("  Plans changed ".to_string()),
        ..Booking::new("t1")
    };
    assert!(
        canceler(&store, &payments)
            .cancel_booking(&booking, CancelOrigin::UpcomingRides)
            .await
    );
    assert_eq!(trip(&store, "t1").unwrap()["cancellationReason"], "Plans changed");
}

// ── Payment reference resolution ─────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn missing_payment_reference_still_cancels() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");

    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("t1"), CancelOrigin::UpcomingRides)
        .await
        .unwrap();

    assert_eq!(report.payment, PaymentRelease::NoReference);
    assert!(report.payment_ref.is_none());
    assert!(payments.calls().is_empty());
    assert!(report.shadow_deleted);
    assert_eq!(trip(&store, "t1").unwrap()["cancelledBy"], "passenger");
}

#[tokio::test(start_paused = true)]
async fn payment_reference_read_from_trip_record() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");
    store
        .update(
            TRIPS,
            "t1",
            &[("paymentIntentId".to_string(), FieldUpdate::set("pi_doc"))],
        )
        .unwrap();

    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("t1"), CancelOrigin::UpcomingRides)
        .await
        .unwrap();
    assert_eq!(report.payment_ref.as_deref(), Some("pi_doc"));
    assert_eq!(payments.calls(), vec![("pi_doc".to_string(), "t1".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn payment_reference_found_by_trip_id_field() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");
    store
        .set(
            TRIPS,
            "legacy-1",
            doc(json!({ "tripId": "t1", "payment_intent_id": "pi_legacy" })),
        )
        .unwrap();

    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("t1"), CancelOrigin::UpcomingRides)
        .await
        .unwrap();
    assert_eq!(report.payment_ref.as_deref(), Some("pi_legacy"));
    assert_eq!(report.payment, PaymentRelease::Released);
}

#[tokio::test(start_paused = true)]
async fn payment_reference_found_by_id_field() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");
    store
        .set(
            TRIPS,
            "legacy-2",
            doc(json!({ "id": "t1", "stripePaymentIntentId": "pi_stripe" })),
        )
        .unwrap();

    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("t1"), CancelOrigin::UpcomingRides)
        .await
        .unwrap();
    assert_eq!(report.payment_ref.as_deref(), Some("pi_stripe"));
}

#[tokio::test(start_paused = true)]
async fn failing_lookups_fall_through_to_no_reference() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");
    store.fail_operation(StoreOp::Query);

    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("t1"), CancelOrigin::UpcomingRides)
        .await
        .unwrap();
    assert_eq!(report.payment, PaymentRelease::NoReference);
}

// ── Best-effort side effects ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn payment_failure_does_not_block_cancellation() {
    for reply in [Reply::Refuse, Reply::Fail, Reply::Hang] {
        let store = Arc::new(MemoryStore::new());
        let payments = StubPayments::new(reply);
        seed_scheduled(&store, "t1");

        let booking = Booking {
            payment_intent_id: Some("pi_1".to_string()),
            ..Booking::new("t1")
        };
        let report = canceler(&store, &payments)
            .cancel_booking_detailed(&booking, CancelOrigin::UpcomingRides)
            .await
            .unwrap();

        match reply {
            Reply::Refuse => assert_eq!(report.payment, PaymentRelease::Refused),
            Reply::Fail => assert!(matches!(report.payment, PaymentRelease::Failed(_))),
            Reply::Hang => assert_eq!(
                report.payment,
                PaymentRelease::Failed("timed out".to_string())
            ),
            Reply::Success => unreachable!(),
        }
        assert_eq!(trip(&store, "t1").unwrap()["status"], "cancelled");
    }
}

#[tokio::test(start_paused = true)]
async fn missing_shadow_record_is_fine() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");
    store.delete(RESERVATIONS, "t1").unwrap();

    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("t1"), CancelOrigin::UpcomingRides)
        .await
        .unwrap();
    assert!(!report.shadow_deleted);
}

// ── Failures ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_mutation_returns_false() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");
    store.fail_operation(StoreOp::Update);

    let booking = Booking {
        payment_intent_id: Some("pi_1".to_string()),
        ..Booking::new("t1")
    };
    let cancel = canceler(&store, &payments);
    assert!(!cancel.cancel_booking(&booking, CancelOrigin::UpcomingRides).await);

    // The payment release was already attempted; the shadow record survives.
    assert_eq!(payments.calls().len(), 1);
    assert!(store.get(RESERVATIONS, "t1").unwrap().is_some());
    assert_eq!(trip(&store, "t1").unwrap()["status"], "scheduled");

    let err = cancel
        .cancel_booking_detailed(&booking, CancelOrigin::UpcomingRides)
        .await
        .unwrap_err();
    assert!(matches!(err, CancelError::Mutation { ref trip_id, .. } if trip_id == "t1"));
}

#[tokio::test(start_paused = true)]
async fn unknown_trip_returns_false() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);

    assert!(
        !canceler(&store, &payments)
            .cancel_booking(&Booking::new("nope"), CancelOrigin::TripDetails)
            .await
    );
}

#[tokio::test(start_paused = true)]
async fn blank_trip_id_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);

    let err = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("  "), CancelOrigin::UpcomingRides)
        .await
        .unwrap_err();
    assert!(matches!(err, CancelError::MissingTripId));
    assert!(payments.calls().is_empty());
}

// ── Observed through the registry ────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn subscribers_see_cancellation_then_removal() {
    let store = Arc::new(MemoryStore::new());
    let payments = StubPayments::new(Reply::Success);
    seed_scheduled(&store, "t1");

    let registry = StatusRegistry::new(store.clone(), TRIPS);
    let (tx, mut rx) = mpsc::unbounded_channel::<StatusChangeEvent>();
    let _sub = registry.subscribe("t1", move |event| {
        let _ = tx.send(event.clone());
    });

    let first = rx.recv().await.unwrap();
    assert_eq!(first.status, CanonicalStatus::Requested);

    let report = canceler(&store, &payments)
        .cancel_booking_detailed(&Booking::new("t1"), CancelOrigin::UpcomingRides)
        .await
        .unwrap();

    let cancelled = rx.recv().await.unwrap();
    assert_eq!(cancelled.previous, Some(CanonicalStatus::Requested));
    assert_eq!(cancelled.status, CanonicalStatus::PassengerCancelled);

    assert_eq!(report.deletion.await.unwrap(), DeletionOutcome::Deleted);
    let removed = rx.recv().await.unwrap();
    assert_eq!(removed.previous, Some(CanonicalStatus::PassengerCancelled));
    assert_eq!(removed.status, CanonicalStatus::Unknown);
    assert_eq!(registry.cached_status("t1"), None);
}
