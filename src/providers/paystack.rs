use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{
    from_minor_units, http_client, to_minor_units, InitializeRequest, InitializeResponse,
    PaymentProvider, ProviderError, ProviderSignal, ProviderUpdate,
};
use crate::config::ChannelConfig;
use crate::services::signature::{self, SignatureAlgorithm};

const DEFAULT_BASE_URL: &str = "https://api.paystack.co";
const DEFAULT_SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Paystack REST API client and webhook parser.
///
/// Amounts cross the wire in minor units (kobo, cents); webhooks are signed
/// with HMAC-SHA512 of the raw body keyed by the secret key.
#[derive(Clone)]
pub struct PaystackProvider {
    client: Client,
    base_url: String,
    secret_key: String,
    webhook_secret: String,
    signature_header: String,
    algorithm: SignatureAlgorithm,
}

/// Standard `{status, message, data}` envelope of every Paystack response.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChargeData {
    id: Option<Value>,
    status: Option<String>,
    reference: Option<String>,
    amount: Option<i64>,
    currency: Option<String>,
    channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    data: Option<ChargeData>,
}

impl PaystackProvider {
    pub fn new(channel: &ChannelConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let base_url = channel
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        url::Url::parse(&base_url).map_err(|e| {
            ProviderError::Misconfigured(format!("channel {} base_url: {}", channel.id, e))
        })?;

        Ok(Self {
            client: http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: channel.secret_key.clone(),
            webhook_secret: channel.webhook_secret().to_string(),
            signature_header: channel
                .signature_header
                .clone()
                .unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string()),
            algorithm: channel
                .signature_algorithm
                .unwrap_or(SignatureAlgorithm::HmacSha512),
        })
    }

    fn to_update(&self, event_type: String, data: ChargeData, raw: Value) -> ProviderUpdate {
        let signal = match event_type.as_str() {
            "charge.success" => ProviderSignal::Completed,
            "charge.failed" => ProviderSignal::Failed,
            "charge.pending" => ProviderSignal::Pending,
            // verify responses carry the outcome in data.status
            "verify" => self.map_status(data.status.as_deref().unwrap_or_default()),
            other => ProviderSignal::Unrecognized(other.to_string()),
        };

        ProviderUpdate {
            event_type,
            reference: data.reference.filter(|r| !r.is_empty()),
            signal,
            provider_reference: data.id.and_then(|id| match id {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) if !s.is_empty() => Some(s),
                _ => None,
            }),
            amount: data.amount.map(from_minor_units),
            currency: data.currency,
            payment_method: data.channel,
            raw,
        }
    }

    async fn read_envelope<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let body: Value = response.json().await.map_err(map_send_error)?;
        let envelope: ApiEnvelope<T> = serde_json::from_value(body)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if !status.is_success() || !envelope.status {
            return Err(ProviderError::Rejected(envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| ProviderError::InvalidResponse("response has no data".to_string()))
    }
}

fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::RequestError(e)
    }
}

#[async_trait]
impl PaymentProvider for PaystackProvider {
    fn name(&self) -> &'static str {
        "paystack"
    }

    fn signature_header(&self) -> &str {
        &self.signature_header
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        signature::verify(payload, signature, &self.webhook_secret, self.algorithm)
    }

    fn parse_event(&self, payload: &[u8]) -> Result<ProviderUpdate, ProviderError> {
        let raw: Value = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::MalformedEvent(e.to_string()))?;
        let event: WebhookEvent = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::MalformedEvent(e.to_string()))?;

        let update = self.to_update(event.event, event.data.unwrap_or_default(), raw);
        if update.reference.is_none() && !matches!(update.signal, ProviderSignal::Unrecognized(_)) {
            return Err(ProviderError::MalformedEvent(format!(
                "{} event without data.reference",
                update.event_type
            )));
        }
        Ok(update)
    }

    fn map_status(&self, raw_status: &str) -> ProviderSignal {
        match raw_status {
            "success" => ProviderSignal::Completed,
            "failed" | "reversed" | "cancelled" => ProviderSignal::Failed,
            // "abandoned" is what Paystack reports before the customer pays
            "abandoned" | "ongoing" | "pending" | "processing" | "queued" | "send_otp"
            | "send_birthday" | "send_pin" | "send_phone" | "send_address" => {
                ProviderSignal::Pending
            }
            other => ProviderSignal::Unrecognized(other.to_string()),
        }
    }

    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializeResponse, ProviderError> {
        let body = InitializeBody {
            email: &request.email,
            amount: to_minor_units(&request.amount)?,
            currency: &request.currency,
            reference: &request.reference,
            callback_url: request.callback_url.as_deref(),
            metadata: request.metadata.as_ref(),
        };

        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let data: InitializeData = Self::read_envelope(response).await?;
        Ok(InitializeResponse {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            provider_reference: None,
        })
    }

    async fn verify(&self, reference: &str) -> Result<ProviderUpdate, ProviderError> {
        let response = self
            .client
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(map_send_error)?;

        let data: Value = Self::read_envelope(response).await?;
        let charge: ChargeData = serde_json::from_value(data.clone())
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let mut update = self.to_update("verify".to_string(), charge, data);
        if update.reference.is_none() {
            update.reference = Some(reference.to_string());
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    fn channel(base_url: Option<String>) -> ChannelConfig {
        ChannelConfig {
            id: "paystack".to_string(),
            provider: ProviderKind::Paystack,
            enabled: true,
            secret_key: "sk_test_abc".to_string(),
            webhook_secret: None,
            base_url,
            signature_header: None,
            signature_algorithm: None,
            callback_url: None,
        }
    }

    fn provider(base_url: Option<String>) -> PaystackProvider {
        PaystackProvider::new(&channel(base_url), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_charge_success() {
        let body = json!({
            "event": "charge.success",
            "data": {
                "id": 302961,
                "status": "success",
                "reference": "R1",
                "amount": 10000,
                "currency": "KSH",
                "channel": "card"
            }
        })
        .to_string();

        let update = provider(None).parse_event(body.as_bytes()).unwrap();
        assert_eq!(update.signal, ProviderSignal::Completed);
        assert_eq!(update.reference.as_deref(), Some("R1"));
        assert_eq!(update.provider_reference.as_deref(), Some("302961"));
        assert_eq!(update.amount, Some(BigDecimal::from(100)));
        assert_eq!(update.payment_method.as_deref(), Some("card"));
    }

    #[test]
    fn test_unrecognized_event_needs_no_reference() {
        let body = br#"{"event":"subscription.create","data":{"subscription_code":"SUB_1"}}"#;
        let update = provider(None).parse_event(body).unwrap();
        assert_eq!(
            update.signal,
            ProviderSignal::Unrecognized("subscription.create".to_string())
        );
        assert!(update.reference.is_none());
    }

    #[test]
    fn test_charge_event_without_reference_is_malformed() {
        let body = br#"{"event":"charge.success","data":{"id":1}}"#;
        let err = provider(None).parse_event(body).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedEvent(_)));
    }

    #[test]
    fn test_non_json_payload_is_malformed() {
        let err = provider(None).parse_event(b"event=charge.success").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedEvent(_)));
    }

    #[test]
    fn test_map_status() {
        let p = provider(None);
        assert_eq!(p.map_status("success"), ProviderSignal::Completed);
        assert_eq!(p.map_status("failed"), ProviderSignal::Failed);
        assert_eq!(p.map_status("abandoned"), ProviderSignal::Pending);
        assert!(matches!(p.map_status("mystery"), ProviderSignal::Unrecognized(_)));
    }

    #[test]
    fn test_webhook_signature_uses_sha512_of_secret_key() {
        let p = provider(None);
        let body = br#"{"event":"charge.success"}"#;
        let sig = signature::sign(body, "sk_test_abc", SignatureAlgorithm::HmacSha512);
        assert!(p.verify_signature(body, &sig));
        assert!(!p.verify_signature(body, &signature::sign(body, "other", SignatureAlgorithm::HmacSha512)));
        assert_eq!(p.signature_header(), "x-paystack-signature");
    }

    #[test]
    fn test_invalid_base_url_is_misconfigured() {
        let result = PaystackProvider::new(&channel(Some("::nope".to_string())), Duration::from_secs(1));
        assert!(matches!(result, Err(ProviderError::Misconfigured(_))));
    }

    #[tokio::test]
    async fn test_initialize_sends_minor_units() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transaction/initialize")
            .match_header("authorization", "Bearer sk_test_abc")
            .match_body(mockito::Matcher::PartialJson(json!({
                "amount": 10000,
                "currency": "KSH",
                "reference": "R1"
            })))
            .with_status(200)
            .with_body(
                json!({
                    "status": true,
                    "message": "Authorization URL created",
                    "data": {
                        "authorization_url": "https://checkout.paystack.com/abc",
                        "access_code": "abc",
                        "reference": "R1"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = provider(Some(server.url()))
            .initialize(&InitializeRequest {
                reference: "R1".to_string(),
                amount: BigDecimal::from(100),
                currency: "KSH".to_string(),
                email: "payer@example.com".to_string(),
                callback_url: None,
                metadata: None,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.authorization_url, "https://checkout.paystack.com/abc");
        assert_eq!(response.access_code.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_verify_maps_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transaction/verify/R1")
            .with_status(200)
            .with_body(
                json!({
                    "status": true,
                    "message": "Verification successful",
                    "data": {
                        "id": 77,
                        "status": "success",
                        "reference": "R1",
                        "amount": 10000,
                        "currency": "KSH",
                        "channel": "mobile_money"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let update = provider(Some(server.url())).verify("R1").await.unwrap();
        assert_eq!(update.signal, ProviderSignal::Completed);
        assert_eq!(update.event_type, "verify");
        assert_eq!(update.payment_method.as_deref(), Some("mobile_money"));
    }

    #[tokio::test]
    async fn test_verify_rejection_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transaction/verify/R404")
            .with_status(400)
            .with_body(json!({"status": false, "message": "Transaction reference not found"}).to_string())
            .create_async()
            .await;

        let err = provider(Some(server.url())).verify("R404").await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(msg) if msg.contains("not found")));
    }
}
