//! Pending-decision queue lifecycle: uniqueness, one-shot transitions,
//! approval with modification, risk re-check at approval time, and the
//! expire sweep boundary.

mod common;

use aitrader::application::pending_queue::{ApprovalModifications, ApprovalOutcome};
use aitrader::domain::errors::QueueError;
use aitrader::domain::pending::PendingStatus;
use aitrader::domain::types::{
    AutomationLevel, IncidentType, Signal, TradingEnvironment,
};
use chrono::Utc;
use common::{decision, harness};
use rust_decimal_macros::dec;

#[tokio::test]
async fn duplicate_pending_is_rejected_with_incident() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Semi)
        .await;

    let d = decision(Signal::BuyToEnter, dec!(0.01), dec!(40000));
    h.queue.create(&model, "BTC", &d, None).await.unwrap();

    let err = h.queue.create(&model, "BTC", &d, None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueueError>(),
        Some(QueueError::DuplicatePending { .. })
    ));

    let incidents = h
        .store
        .incidents_of_type(IncidentType::TradeRejected, 10)
        .await
        .unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].details["reason"], "duplicate pending");

    // A different coin is fine.
    h.queue.create(&model, "ETH", &d, None).await.unwrap();
}

#[tokio::test]
async fn reject_stores_reason_verbatim_and_is_one_shot() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Semi)
        .await;

    let d = decision(Signal::BuyToEnter, dec!(0.01), dec!(40000));
    let pending = h.queue.create(&model, "BTC", &d, None).await.unwrap();

    let rejected = h
        .queue
        .reject(pending.id, "too volatile right now")
        .await
        .unwrap();
    assert_eq!(rejected.status, PendingStatus::Rejected);
    assert_eq!(
        rejected.resolution_note.as_deref(),
        Some("too volatile right now")
    );
    assert!(rejected.resolved_at.is_some());

    // Second reject fails with a well-defined error and no state change.
    let err = h.queue.reject(pending.id, "again").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueueError>(),
        Some(QueueError::InvalidState { action: "reject", .. })
    ));
    let stored = h.store.get_pending(pending.id).await.unwrap().unwrap();
    assert_eq!(
        stored.resolution_note.as_deref(),
        Some("too volatile right now")
    );
}

#[tokio::test]
async fn approval_is_one_shot() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Semi)
        .await;
    h.market.set_price("BTC", dec!(40000)).await;

    let d = decision(Signal::BuyToEnter, dec!(0.01), dec!(40000));
    let pending = h.queue.create(&model, "BTC", &d, None).await.unwrap();

    let outcome = h.queue.approve(pending.id, None).await.unwrap();
    assert!(matches!(outcome, ApprovalOutcome::Executed { .. }));

    let err = h.queue.approve(pending.id, None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueueError>(),
        Some(QueueError::InvalidState { action: "approve", .. })
    ));

    // Exactly one trade; the second approval changed nothing.
    assert_eq!(h.store.recent_trades(model.id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn approve_unknown_id_is_not_found() {
    let h = harness(&["BTC"]).await;
    let err = h.queue.approve(999, None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueueError>(),
        Some(QueueError::NotFound(999))
    ));
}

#[tokio::test]
async fn approval_modification_overrides_quantity_only() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Semi)
        .await;
    h.market.set_price("BTC", dec!(40000)).await;

    let d = decision(Signal::BuyToEnter, dec!(0.02), dec!(40000));
    let pending = h.queue.create(&model, "BTC", &d, None).await.unwrap();

    let outcome = h
        .queue
        .approve(
            pending.id,
            Some(ApprovalModifications {
                quantity: Some(dec!(0.01)),
                leverage: None,
            }),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ApprovalOutcome::Executed { .. }));

    let trades = h.store.recent_trades(model.id, 10).await.unwrap();
    assert_eq!(trades.len(), 1);
    // Modified quantity, original price basis.
    assert_eq!(trades[0].quantity, dec!(0.01));
    assert_eq!(trades[0].price, dec!(40000));

    let stored = h.store.get_pending(pending.id).await.unwrap().unwrap();
    assert_eq!(stored.resolved_quantity, Some(dec!(0.01)));
}

#[tokio::test]
async fn approval_recheck_rejects_when_risk_state_changed() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Semi)
        .await;
    h.market.set_price("BTC", dec!(40000)).await;

    let d = decision(Signal::BuyToEnter, dec!(0.02), dec!(40000));
    let pending = h.queue.create(&model, "BTC", &d, None).await.unwrap();

    // Risk posture tightened between queueing and approval.
    let mut settings = h.store.get_settings(model.id).await.unwrap();
    settings.max_position_size_pct = dec!(1);
    h.store.update_settings(&settings).await.unwrap();

    let outcome = h.queue.approve(pending.id, None).await.unwrap();
    assert!(matches!(outcome, ApprovalOutcome::RejectedByRisk { .. }));

    let stored = h.store.get_pending(pending.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PendingStatus::Rejected);
    assert!(
        stored
            .resolution_note
            .as_deref()
            .unwrap()
            .contains("risk re-check")
    );
    assert!(h.store.recent_trades(model.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn expire_sweep_honours_exact_deadline() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Semi)
        .await;

    let d = decision(Signal::BuyToEnter, dec!(0.01), dec!(40000));
    let pending = h.queue.create(&model, "BTC", &d, None).await.unwrap();

    // A sweep running exactly at expires_at leaves the row pending; the next
    // sweep expires it.
    assert_eq!(h.store.expire_pending(pending.expires_at).await.unwrap(), 0);
    assert_eq!(
        h.store.expire_pending(pending.expires_at + 60).await.unwrap(),
        1
    );

    let stored = h.store.get_pending(pending.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PendingStatus::Expired);

    // Expired rows cannot be approved.
    let err = h.queue.approve(pending.id, None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueueError>(),
        Some(QueueError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn list_orders_by_creation_ascending() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Semi)
        .await;

    let d = decision(Signal::BuyToEnter, dec!(0.01), dec!(40000));
    let first = h.queue.create(&model, "BTC", &d, None).await.unwrap();
    let second = h.queue.create(&model, "ETH", &d, None).await.unwrap();

    let listed = h.queue.list(Some(model.id)).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, first.id);
    assert_eq!(listed[1].id, second.id);
    assert!(listed[0].created_at <= Utc::now().timestamp());
}
