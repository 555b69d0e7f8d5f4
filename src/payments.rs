//! Subscription billing through the PayMongo gateway.
//!
//! Three flows: creating a payment intent for a plan, reacting to the gateway's webhook
//! events, and letting a user cancel or reactivate their subscription. Subscription records
//! live behind [`SubscriptionStore`]; each change is mirrored onto the user's profile.

use std::future::Future;
use std::pin::Pin;

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::backend::{BackendError, Subscription, SubscriptionStatus, SubscriptionStore};

/// Smallest chargeable amount, in centavos.
pub const MIN_AMOUNT: i64 = 100;
pub const CURRENCY: &str = "PHP";
pub const DEFAULT_PLAN: &str = "pro";
pub const SUBSCRIPTION_PERIOD_DAYS: i64 = 30;
const PAYMENT_METHODS: [&str; 4] = ["card", "gcash", "paymaya", "grab_pay"];

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Amount must be an integer of at least 100 centavos")]
    InvalidAmount,
    #[error("Unsupported currency {0}, only PHP is accepted")]
    UnsupportedCurrency(String),
    #[error("PayMongo secret key is not configured")]
    MissingSecretKey,
    #[error("Failed to create payment intent")]
    Gateway { status: Option<u16>, details: Value },
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("User ID is required")]
    MissingUserId,
    #[error("No active subscription found")]
    SubscriptionNotFound,
    #[error("Failed to update subscription: {0}")]
    Backend(#[from] BackendError),
}

/// Body of a payment intent request, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentRequest {
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub plan: Option<String>,
    pub user_id: Option<String>,
}

impl PaymentIntentRequest {
    /// Checks the amount and currency. `user_id` from the session wins over the body.
    pub fn validate(self, user_id: Option<String>) -> Result<PaymentIntent, PaymentError> {
        let amount = self
            .amount
            .as_i64()
            .filter(|a| *a >= MIN_AMOUNT)
            .ok_or(PaymentError::InvalidAmount)?;
        let currency = match self.currency {
            Some(c) if !c.eq_ignore_ascii_case(CURRENCY) => {
                return Err(PaymentError::UnsupportedCurrency(c));
            }
            _ => CURRENCY.to_string(),
        };
        let description = self.description.unwrap_or_else(|| {
            format!(
                "{} subscription",
                self.plan.as_deref().unwrap_or(DEFAULT_PLAN)
            )
        });
        Ok(PaymentIntent {
            amount,
            currency,
            description,
            plan: self.plan,
            user_id: user_id.or(self.user_id),
        })
    }
}

impl PaymentIntent {
    /// Request body in the gateway's JSON:API envelope.
    pub fn to_gateway_body(&self) -> Value {
        json!({
            "data": {
                "attributes": {
                    "amount": self.amount,
                    "currency": self.currency,
                    "payment_method_allowed": PAYMENT_METHODS,
                    "capture_type": "automatic",
                    "description": self.description,
                    "metadata": {
                        "plan": self.plan.as_deref().unwrap_or(DEFAULT_PLAN),
                        "user_id": self.user_id,
                    }
                }
            }
        })
    }
}

pub type GatewayFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, PaymentError>> + Send + 'a>>;

pub trait PaymentGateway: Send + Sync {
    /// Creates the intent upstream and returns the gateway's response unchanged.
    fn create_payment_intent<'a>(&'a self, intent: &'a PaymentIntent) -> GatewayFuture<'a>;
}

#[cfg(feature = "web")]
pub struct PayMongoGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: Option<String>,
}

#[cfg(feature = "web")]
impl PayMongoGateway {
    pub fn new(base_url: impl Into<String>, secret_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            secret_key: secret_key.filter(|k| !k.is_empty()),
        }
    }

    async fn send(&self, intent: &PaymentIntent) -> Result<Value, PaymentError> {
        let key = self
            .secret_key
            .as_deref()
            .ok_or(PaymentError::MissingSecretKey)?;
        let endpoint = format!("{}/payment_intents", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(endpoint)
            .basic_auth(key, None::<&str>)
            .json(&intent.to_gateway_body())
            .send()
            .await
            .map_err(|e| PaymentError::Gateway {
                status: None,
                details: Value::String(e.to_string()),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| PaymentError::Gateway {
            status: Some(status.as_u16()),
            details: Value::String(e.to_string()),
        })?;
        let details = serde_json::from_str(&body).unwrap_or(Value::String(body));
        if status.is_success() {
            log::info!("created payment intent of {} {}", intent.amount, intent.currency);
            Ok(details)
        } else {
            log::warn!("payment gateway returned {}", status);
            Err(PaymentError::Gateway {
                status: Some(status.as_u16()),
                details,
            })
        }
    }
}

#[cfg(feature = "web")]
impl PaymentGateway for PayMongoGateway {
    fn create_payment_intent<'a>(&'a self, intent: &'a PaymentIntent) -> GatewayFuture<'a> {
        Box::pin(self.send(intent))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookKind {
    Succeeded,
    PaymentFailed,
    Processing,
    Other(String),
}

impl WebhookKind {
    fn parse(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" => WebhookKind::Succeeded,
            "payment_intent.payment_failed" => WebhookKind::PaymentFailed,
            "payment_intent.processing" => WebhookKind::Processing,
            other => WebhookKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub kind: WebhookKind,
    pub payment_intent_id: Option<String>,
    pub amount: Option<i64>,
    pub user_id: Option<String>,
    pub plan: Option<String>,
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reads a webhook body. Both the flat `{type, data}` envelope and the gateway's nested
/// `{data: {attributes: {type, data}}}` form are accepted. Only malformed JSON is an error.
pub fn parse_webhook(body: &[u8]) -> Result<WebhookEvent, PaymentError> {
    let envelope: Value = serde_json::from_slice(body)?;
    let (event_type, data) = match envelope.get("type").and_then(Value::as_str) {
        Some(t) => (t.to_string(), envelope.get("data")),
        None => (
            str_at(&envelope, "/data/attributes/type").unwrap_or_default(),
            envelope.pointer("/data/attributes/data"),
        ),
    };
    let data = data.cloned().unwrap_or(Value::Null);

    Ok(WebhookEvent {
        kind: WebhookKind::parse(&event_type),
        payment_intent_id: str_at(&data, "/id"),
        amount: data.pointer("/attributes/amount").and_then(Value::as_i64),
        user_id: str_at(&data, "/attributes/metadata/user_id")
            .or_else(|| str_at(&data, "/attributes/metadata/userId")),
        plan: str_at(&data, "/attributes/metadata/plan"),
    })
}

/// Applies a webhook event to the subscription records.
///
/// A succeeded payment activates (or renews) the user's subscription for
/// [`SUBSCRIPTION_PERIOD_DAYS`]; a failed one marks it past due. Events without a user id,
/// processing events and unknown types are only logged.
pub async fn handle_webhook<S: SubscriptionStore>(
    store: &S,
    event: &WebhookEvent,
) -> Result<Option<Subscription>, PaymentError> {
    let user_id = match (&event.kind, &event.user_id) {
        (WebhookKind::Processing, _) => {
            log::info!("payment intent {:?} processing", event.payment_intent_id);
            return Ok(None);
        }
        (WebhookKind::Other(t), _) => {
            log::warn!("ignoring webhook event {:?}", t);
            return Ok(None);
        }
        (_, None) => {
            log::warn!(
                "webhook {:?} for intent {:?} carries no user id",
                event.kind,
                event.payment_intent_id
            );
            return Ok(None);
        }
        (_, Some(user_id)) => user_id.as_str(),
    };

    let existing = store.latest_subscription(user_id).await?;
    let now = Utc::now();
    let subscription = match event.kind {
        WebhookKind::Succeeded => {
            let plan = event
                .plan
                .clone()
                .or_else(|| existing.as_ref().map(|s| s.plan.clone()))
                .unwrap_or_else(|| DEFAULT_PLAN.to_string());
            Subscription {
                id: existing
                    .map(|s| s.id)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                user_id: user_id.to_string(),
                plan,
                status: SubscriptionStatus::Active,
                payment_intent_id: event.payment_intent_id.clone(),
                amount: event.amount.unwrap_or_default(),
                cancel_at_period_end: false,
                current_period_end: now + Duration::days(SUBSCRIPTION_PERIOD_DAYS),
                updated_at: now,
            }
        }
        _ => match existing {
            Some(existing) => Subscription {
                status: SubscriptionStatus::PastDue,
                updated_at: now,
                ..existing
            },
            None => {
                log::warn!("payment failed for {} without a subscription", user_id);
                store.set_profile_status(user_id, "past_due", None).await?;
                return Ok(None);
            }
        },
    };

    let subscription = store.upsert_subscription(subscription).await?;
    store
        .set_profile_status(
            user_id,
            subscription.status.as_str(),
            Some(subscription.plan.clone()),
        )
        .await?;
    log::info!(
        "subscription {} for {} is now {}",
        subscription.id,
        user_id,
        subscription.status.as_str()
    );
    Ok(Some(subscription))
}

fn required_user(user_id: Option<&str>) -> Result<&str, PaymentError> {
    user_id
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(PaymentError::MissingUserId)
}

/// Latest subscription that is still running: active, or cancelled with time left.
async fn live_subscription<S: SubscriptionStore>(
    store: &S,
    user_id: &str,
) -> Result<Subscription, PaymentError> {
    store
        .latest_subscription(user_id)
        .await?
        .filter(|s| {
            s.is_active() || (s.is_cancel_pending() && s.current_period_end > Utc::now())
        })
        .ok_or(PaymentError::SubscriptionNotFound)
}

/// Stops renewal at the end of the current period.
pub async fn cancel_subscription<S: SubscriptionStore>(
    store: &S,
    user_id: Option<&str>,
) -> Result<Subscription, PaymentError> {
    let user_id = required_user(user_id)?;
    let subscription = live_subscription(store, user_id).await?;
    if subscription.is_cancel_pending() {
        return Ok(subscription);
    }
    let subscription = store
        .upsert_subscription(Subscription {
            status: SubscriptionStatus::Cancelled,
            cancel_at_period_end: true,
            updated_at: Utc::now(),
            ..subscription
        })
        .await?;
    store.set_profile_status(user_id, "cancelled", None).await?;
    log::info!("subscription {} cancelled at period end", subscription.id);
    Ok(subscription)
}

/// Undoes a pending cancellation.
pub async fn reactivate_subscription<S: SubscriptionStore>(
    store: &S,
    user_id: Option<&str>,
) -> Result<Subscription, PaymentError> {
    let user_id = required_user(user_id)?;
    let subscription = live_subscription(store, user_id).await?;
    if subscription.is_active() {
        return Ok(subscription);
    }
    let subscription = store
        .upsert_subscription(Subscription {
            status: SubscriptionStatus::Active,
            cancel_at_period_end: false,
            updated_at: Utc::now(),
            ..subscription
        })
        .await?;
    store.set_profile_status(user_id, "active", None).await?;
    log::info!("subscription {} reactivated", subscription.id);
    Ok(subscription)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn amount_must_be_whole_centavos() {
        let request = |amount: Value| PaymentIntentRequest {
            amount,
            currency: None,
            description: None,
            plan: Some("pro".into()),
            user_id: None,
        };
        assert!(matches!(
            request(json!(99)).validate(None),
            Err(PaymentError::InvalidAmount)
        ));
        assert!(matches!(
            request(json!(150.5)).validate(None),
            Err(PaymentError::InvalidAmount)
        ));
        assert!(matches!(
            request(json!("500")).validate(None),
            Err(PaymentError::InvalidAmount)
        ));
        let intent = request(json!(29900)).validate(Some("u1".into())).unwrap();
        assert_eq!(intent.amount, 29900);
        assert_eq!(intent.currency, "PHP");
        assert_eq!(
            intent.to_gateway_body()["data"]["attributes"]["metadata"]["user_id"],
            "u1"
        );
    }

    #[test]
    fn both_webhook_envelopes_parse() {
        let flat = br#"{"type":"payment_intent.succeeded","data":{"id":"pi_1","attributes":{"amount":29900,"metadata":{"user_id":"u1","plan":"pro"}}}}"#;
        let nested = br#"{"data":{"attributes":{"type":"payment_intent.payment_failed","data":{"id":"pi_2","attributes":{"metadata":{"user_id":"u2"}}}}}}"#;

        let event = parse_webhook(flat).unwrap();
        assert_eq!(event.kind, WebhookKind::Succeeded);
        assert_eq!(event.amount, Some(29900));
        assert_eq!(event.user_id.as_deref(), Some("u1"));

        let event = parse_webhook(nested).unwrap();
        assert_eq!(event.kind, WebhookKind::PaymentFailed);
        assert_eq!(event.payment_intent_id.as_deref(), Some("pi_2"));

        assert!(parse_webhook(b"{not json").is_err());
    }

    #[tokio::test]
    async fn cancel_then_reactivate() {
        let store = MemoryBackend::new();
        let event = WebhookEvent {
            kind: WebhookKind::Succeeded,
            payment_intent_id: Some("pi_1".into()),
            amount: Some(29900),
            user_id: Some("u1".into()),
            plan: Some("pro".into()),
        };
        handle_webhook(&store, &event).await.unwrap();

        let cancelled = cancel_subscription(&store, Some("u1")).await.unwrap();
        assert!(cancelled.cancel_at_period_end);
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert_eq!(
            store.profile("u1").await.unwrap().unwrap().subscription_status,
            "cancelled"
        );

        let active = reactivate_subscription(&store, Some("u1")).await.unwrap();
        assert!(active.is_active());
        assert_eq!(active.id, cancelled.id);

        assert!(matches!(
            cancel_subscription(&store, None).await,
            Err(PaymentError::MissingUserId)
        ));
        assert!(matches!(
            cancel_subscription(&store, Some("nobody")).await,
            Err(PaymentError::SubscriptionNotFound)
        ));
    }
}
