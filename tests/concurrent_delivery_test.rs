mod common;

use axum::http::StatusCode;
use common::{charge_webhook, TestApp};
use paygate_core::domain::TransactionStatus;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_success_webhooks_settle_once() {
    let mut app = TestApp::new().await;
    app.initialize("R1", Some("INV-1")).await;
    let app = Arc::new(app);

    let (webhook, signature) = charge_webhook("charge.success", "R1");
    let deliveries: Vec<_> = (0..16)
        .map(|_| {
            let app = app.clone();
            let webhook = webhook.clone();
            let signature = signature.clone();
            tokio::spawn(async move { app.post_webhook(&webhook, Some(&signature)).await })
        })
        .collect();

    for delivery in deliveries {
        let (status, body) = delivery.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
    }

    let tx = app.state.payments.get("R1").await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.status_history.len(), 2);
    assert_eq!(app.billing.calls(), vec!["settle:INV-1:R1".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_webhook_racing_verify_settles_once() {
    let mut app = TestApp::new().await;
    app.initialize("R1", Some("INV-1")).await;
    app.mock_verify("R1", "success").await;
    let app = Arc::new(app);

    let (webhook, signature) = charge_webhook("charge.success", "R1");
    let by_webhook = {
        let app = app.clone();
        tokio::spawn(async move { app.post_webhook(&webhook, Some(&signature)).await })
    };
    let by_verify = {
        let app = app.clone();
        tokio::spawn(async move { app.get("/payments/verify/R1").await })
    };

    assert_eq!(by_webhook.await.unwrap().0, StatusCode::OK);
    assert_eq!(by_verify.await.unwrap().0, StatusCode::OK);

    assert_eq!(app.billing.calls().len(), 1);
    let tx = app.state.payments.get("R1").await.unwrap();
    assert_eq!(tx.status_history.len(), 2);
}
