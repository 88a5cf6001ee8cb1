use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use ridesync_protocol::PaymentError;
use serde::{Deserialize, Serialize};
use url::Url;

/// Object-safe client for the external payment backend.
pub trait PaymentBackend: Send + Sync + 'static {
    /// Release (cancel) the authorization behind `payment_ref`.
    ///
    /// `Ok(false)` means the backend answered but refused.
    fn cancel_payment(
        &self,
        payment_ref: &str,
        trip_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, PaymentError>> + Send>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    payment_intent_id: String,
    trip_id: String,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default)]
    success: bool,
}

/// Payment backend reached over HTTP.
///
/// Posts `{"paymentIntentId", "tripId"}` to `<base>/cancel-payment-intent`
/// and reads `{"success": bool}`.
#[derive(Debug, Clone)]
pub struct HttpPaymentBackend {
    client: reqwest::Client,
    cancel_url: Url,
}

impl HttpPaymentBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PaymentError> {
        let mut base = Url::parse(base_url).map_err(|e| PaymentError::Url(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let cancel_url = base
            .join("cancel-payment-intent")
            .map_err(|e| PaymentError::Url(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self { client, cancel_url })
    }

    pub fn cancel_url(&self) -> &Url {
        &self.cancel_url
    }
}

impl PaymentBackend for HttpPaymentBackend {
    fn cancel_payment(
        &self,
        payment_ref: &str,
        trip_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, PaymentError>> + Send>> {
        let client = self.client.clone();
        let url = self.cancel_url.clone();
        let body = CancelRequest {
            payment_intent_id: payment_ref.to_string(),
            trip_id: trip_id.to_string(),
        };
        Box::pin(async move {
            let resp = client
                .post(url)
                .json(&body)
                .send()
                .await
                .map_err(|e| PaymentError::Transport(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(PaymentError::Status(status.as_u16()));
            }
            let parsed: CancelResponse = resp
                .json()
                .await
                .map_err(|e| PaymentError::Decode(e.to_string()))?;
            Ok(parsed.success)
        })
    }
}

/// Backend used when no payment service is configured; refuses every release.
#[derive(Debug, Clone, Default)]
pub struct NoopPaymentBackend;

impl PaymentBackend for NoopPaymentBackend {
    fn cancel_payment(
        &self,
        _payment_ref: &str,
        _trip_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, PaymentError>> + Send>> {
        Box::pin(async { Ok(false) })
    }
}
