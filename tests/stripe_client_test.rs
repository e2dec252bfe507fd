//! Gateway client tests against a mocked Stripe API.

use rent_payment_service::config::StripeConfig;
use rent_payment_service::services::stripe::{
    ChargeRequest, GatewayError, IdempotencyStrategy, PaymentIntentStatus, StripeClient,
};
use secrecy::Secret;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> StripeClient {
    StripeClient::new(StripeConfig {
        secret_key: Secret::new("sk_test_123".to_string()),
        api_base_url: server.uri(),
    })
}

fn charge_request(idempotency_key: &str) -> ChargeRequest {
    ChargeRequest {
        amount: 200_000,
        currency: "usd".to_string(),
        customer: "cus_1".to_string(),
        payment_method: "pm_1".to_string(),
        application_fee_amount: 3_000,
        destination_account: "acct_1".to_string(),
        receipt_email: "renter@example.com".to_string(),
        metadata: vec![("type".to_string(), "monthly_rent".to_string())],
        idempotency_key: idempotency_key.to_string(),
    }
}

#[tokio::test]
async fn successful_intent_parses_status_and_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_123",
            "status": "succeeded",
            "amount": 200000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let intent = client
        .create_payment_intent(&charge_request("rent-payment-x-0"))
        .await
        .unwrap();

    assert_eq!(intent.id, "pi_123");
    assert_eq!(intent.status, PaymentIntentStatus::Succeeded);
    assert_eq!(intent.amount, 200_000);
}

#[tokio::test]
async fn request_carries_idempotency_key_and_fee_split() {
    let server = MockServer::start().await;
    let key = IdempotencyStrategy::Stable.key(
        "rent-payment",
        Uuid::nil(),
        0,
        "2025-06-01T08:00:00Z".parse().unwrap(),
    );
    assert_eq!(key, "rent-payment-00000000-0000-0000-0000-000000000000-0");

    // The mock only matches when the key header and fee split are present,
    // so a response here proves the request carried them.
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .and(header("Idempotency-Key", key.as_str()))
        .and(body_string_contains("application_fee_amount=3000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_1",
            "status": "succeeded",
            "amount": 200000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .create_payment_intent(&charge_request(&key))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let form = String::from_utf8(requests[0].body.clone()).unwrap();
    assert!(form.contains("amount=200000"));
    // Bracketed field names arrive percent-encoded.
    assert!(form.contains("transfer_data%5Bdestination%5D=acct_1"));
    assert!(form.contains("metadata%5Btype%5D=monthly_rent"));
    assert!(form.contains("receipt_email=renter%40example.com"));
}

#[tokio::test]
async fn card_error_maps_to_tagged_variant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "code": "card_declined",
                "decline_code": "insufficient_funds",
                "message": "Your card has insufficient funds."
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .create_payment_intent(&charge_request("k"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::InsufficientFunds));
    assert_eq!(err.failure_reason(), "Insufficient funds");
}

#[tokio::test]
async fn unstructured_error_body_falls_back_to_substring_classification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("gateway exploded: card_declined"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .create_payment_intent(&charge_request("k"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::CardDeclined));
}

#[tokio::test]
async fn unknown_rejection_keeps_gateway_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "type": "invalid_request_error",
                "message": "No such customer: cus_missing"
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .create_payment_intent(&charge_request("k"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Rejected { .. }));
    assert_eq!(err.failure_reason(), "No such customer: cus_missing");
}
