use crate::config::NodeConfig;
use agora_escrow::Task;
use agora_types::{AccountAddress, TxRef};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub const PROTOCOL_VERSION: &str = "x402/1.0";

pub const PROOF_HEADER: &str = "x-payment-proof";
const PROTOCOL_HEADER: &str = "x-payment-protocol";
const REQUIRED_HEADER: &str = "x-payment-required";
const AMOUNT_HEADER: &str = "x-payment-amount";
const ADDRESS_HEADER: &str = "x-payment-address";
const NETWORK_HEADER: &str = "x-payment-network";
const CURRENCY_HEADER: &str = "x-payment-currency";
const TASK_ID_HEADER: &str = "x-payment-task-id";

/// Middleware: every response advertises the payment protocol version.
pub async fn protocol_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        HeaderName::from_static(PROTOCOL_HEADER),
        HeaderValue::from_static(PROTOCOL_VERSION),
    );
    response
}

/// Extract the payment proof from inbound request headers.
pub fn proof_from_headers(headers: &HeaderMap) -> Option<TxRef> {
    headers
        .get(PROOF_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(TxRef::new)
}

/// Build the 402 Payment Required response for a task: machine-readable
/// headers, a structured challenge body and a human-readable instruction.
pub fn payment_required(task: &Task, config: &NodeConfig, message: Option<String>) -> Response {
    let amount = task.escrow_amount.to_native();
    let address = task.escrow_address.to_string();
    let message = message.unwrap_or_else(|| {
        format!(
            "Task #{} awaits funding. Send {} {} to {}, then POST /api/tasks/{}/pay \
             with {}: <transaction reference>",
            task.id, amount, config.ledger.currency, address, task.id, PROOF_HEADER
        )
    });

    let mut headers = HeaderMap::new();
    let pairs = [
        (REQUIRED_HEADER, "true".to_string()),
        (AMOUNT_HEADER, amount.to_string()),
        (ADDRESS_HEADER, address.clone()),
        (NETWORK_HEADER, config.ledger.network.clone()),
        (CURRENCY_HEADER, config.ledger.currency.clone()),
        (TASK_ID_HEADER, task.id.to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }

    let body = json!({
        "error": "Payment Required",
        "protocol": PROTOCOL_VERSION,
        "task_id": task.id,
        "payment": {
            "amount": amount,
            "currency": config.ledger.currency,
            "network": config.ledger.network,
            "address": address,
        },
        "message": message,
    });

    (StatusCode::PAYMENT_REQUIRED, headers, Json(body)).into_response()
}

/// Discovery document served at `/.well-known/x402`.
pub fn discovery_document(
    config: &NodeConfig,
    platform_address: AccountAddress,
) -> serde_json::Value {
    json!({
        "protocol": PROTOCOL_VERSION,
        "version": "1.0",
        "description": "agora — task marketplace with x402 HTTP payment protocol",
        "supported_currencies": [config.ledger.currency],
        "networks": [config.ledger.network],
        "payment_address": platform_address.to_string(),
        "endpoints": {
            "create_task": "POST /api/tasks",
            "pay_task": "POST /api/tasks/:id/pay",
            "complete_task": "POST /api/tasks/:id/complete",
            "discovery": "GET /.well-known/x402",
        },
        "flow": [
            "1. POST /api/tasks with { listing_id, description } → receive 402 with payment details",
            format!("2. Send {} to the task's escrow address", config.ledger.currency),
            "3. POST /api/tasks/:id/pay with X-Payment-Proof: <transaction reference> → 200 if verified",
            "4. Worker completes the task, or the listing owner POSTs /api/tasks/:id/complete",
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::{ListingId, NativeAmount, TaskId};

    fn sample_task() -> Task {
        Task::new(
            TaskId(7),
            ListingId(1),
            "research".to_string(),
            None,
            NativeAmount::from_native(0.05),
            AccountAddress::from_bytes([4; 32]),
        )
    }

    #[test]
    fn test_payment_required_carries_challenge_headers() {
        let response = payment_required(&sample_task(), &NodeConfig::default(), None);

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let headers = response.headers();
        assert_eq!(headers.get(REQUIRED_HEADER).unwrap(), "true");
        assert_eq!(headers.get(AMOUNT_HEADER).unwrap(), "0.05");
        assert_eq!(headers.get(TASK_ID_HEADER).unwrap(), "7");
        assert!(headers
            .get(ADDRESS_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("agora1"));
    }

    #[test]
    fn test_proof_extraction() {
        let mut headers = HeaderMap::new();
        assert!(proof_from_headers(&headers).is_none());

        headers.insert(
            HeaderName::from_static(PROOF_HEADER),
            HeaderValue::from_static("sig123"),
        );
        assert_eq!(proof_from_headers(&headers), Some(TxRef::new("sig123")));
    }

    #[test]
    fn test_discovery_document_shape() {
        let config = NodeConfig::default();
        let doc = discovery_document(&config, AccountAddress::from_bytes([1; 32]));

        assert_eq!(doc["protocol"], PROTOCOL_VERSION);
        assert_eq!(doc["supported_currencies"][0], "AGR");
        assert!(doc["flow"].as_array().unwrap().len() == 4);
    }
}
