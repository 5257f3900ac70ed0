use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CheckoutSessionPaymentStatus, Client,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionPaymentIntentData,
    CreateRefund, CreateTransfer, Currency, EventObject, EventType, PaymentIntent, PaymentIntentId,
    Refund, RequestStrategy, Transfer, Webhook, WebhookError,
};
use uuid::Uuid;

use super::{
    GatewayError, GatewayEvent, GatewayEventKind, Hold, HoldRequest, PaymentGateway, Payout,
    RefundRequest,
};

/// Escrow on Stripe Connect: checkout collects onto the platform account,
/// capture is a transfer to the scout's connected account and refunds go back
/// against the original payment intent.
pub struct StripeGateway {
    client: Client,
    webhook_secret: String,
}

impl StripeGateway {
    pub fn new(api_key: String, webhook_secret: String) -> Self {
        Self {
            client: Client::new(api_key),
            webhook_secret,
        }
    }

    fn idempotent(&self, key: &str) -> Client {
        self.client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(key.to_string()))
    }

    fn parse_payment_intent_id(reference: &str) -> Result<PaymentIntentId, GatewayError> {
        reference
            .parse::<PaymentIntentId>()
            .map_err(|e| GatewayError::Api(format!("Invalid payment reference {}: {}", reference, e)))
    }

    fn session_evaluation_id(session: &CheckoutSession) -> Option<Uuid> {
        session
            .client_reference_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    fn map_event(event: stripe::Event) -> GatewayEvent {
        let event_id = event.id.to_string();
        let event_type = event.type_;

        let kind = match (event_type, event.data.object) {
            (
                EventType::CheckoutSessionCompleted | EventType::CheckoutSessionAsyncPaymentSucceeded,
                EventObject::CheckoutSession(session),
            ) if session.payment_status == CheckoutSessionPaymentStatus::Paid => {
                match session.payment_intent.as_ref().map(|pi| pi.id().to_string()) {
                    Some(payment_reference) => GatewayEventKind::PaymentSucceeded {
                        evaluation_id: Self::session_evaluation_id(&session),
                        session_reference: Some(session.id.to_string()),
                        payment_reference,
                    },
                    None => GatewayEventKind::Ignored {
                        event_type: "checkout.session.completed".to_string(),
                    },
                }
            }
            (
                EventType::CheckoutSessionAsyncPaymentFailed | EventType::CheckoutSessionExpired,
                EventObject::CheckoutSession(session),
            ) => GatewayEventKind::PaymentFailed {
                evaluation_id: Self::session_evaluation_id(&session),
                session_reference: Some(session.id.to_string()),
                reason: Some(if event_type == EventType::CheckoutSessionExpired {
                    "Checkout session expired".to_string()
                } else {
                    "Payment was declined".to_string()
                }),
            },
            (EventType::ChargeRefunded, EventObject::Charge(charge)) if charge.refunded => {
                match charge.payment_intent.as_ref().map(|pi| pi.id().to_string()) {
                    Some(payment_reference) => GatewayEventKind::RefundSucceeded {
                        payment_reference,
                        refund_reference: None,
                    },
                    None => GatewayEventKind::Ignored {
                        event_type: "charge.refunded".to_string(),
                    },
                }
            }
            (other, _) => GatewayEventKind::Ignored {
                event_type: other.to_string(),
            },
        };

        GatewayEvent { event_id, kind }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &str {
        "stripe"
    }

    async fn create_hold(&self, request: HoldRequest) -> Result<Hold, GatewayError> {
        let evaluation_id = request.evaluation_id.to_string();

        let mut metadata = HashMap::new();
        metadata.insert("evaluation_id".to_string(), evaluation_id.clone());

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.customer_email = Some(&request.payer_email);
        params.client_reference_id = Some(&evaluation_id);
        params.metadata = Some(metadata.clone());
        params.payment_intent_data = Some(CreateCheckoutSessionPaymentIntentData {
            metadata: Some(metadata),
            ..Default::default()
        });
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price_data: Some(stripe::CreateCheckoutSessionLineItemsPriceData {
                currency: Currency::USD,
                unit_amount: Some(request.amount_cents),
                product_data: Some(stripe::CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: "Game film evaluation".to_string(),
                    description: Some(request.description.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = CheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| GatewayError::Api(format!("Stripe error: {}", e)))?;

        let checkout_url = session
            .url
            .ok_or_else(|| GatewayError::Api("No checkout URL returned".to_string()))?;

        Ok(Hold {
            session_reference: session.id.to_string(),
            checkout_url,
        })
    }

    async fn capture(&self, payment_reference: &str, payout: &Payout) -> Result<String, GatewayError> {
        let intent_id = Self::parse_payment_intent_id(payment_reference)?;
        let intent = PaymentIntent::retrieve(&self.client, &intent_id, &[])
            .await
            .map_err(|e| GatewayError::Api(format!("Stripe error: {}", e)))?;

        let charge = intent
            .latest_charge
            .as_ref()
            .map(|charge| charge.id())
            .ok_or_else(|| GatewayError::Api(format!("Payment {} has no charge", payment_reference)))?;

        let mut params = CreateTransfer::new(Currency::USD, payout.destination.clone());
        params.amount = Some(payout.amount_cents);
        params.source_transaction = Some(charge);

        let transfer = Transfer::create(&self.idempotent(&payout.idempotency_key), params)
            .await
            .map_err(|e| GatewayError::Api(format!("Stripe error: {}", e)))?;

        Ok(transfer.id.to_string())
    }

    async fn refund(&self, request: RefundRequest) -> Result<String, GatewayError> {
        let intent_id = Self::parse_payment_intent_id(&request.payment_reference)?;

        let mut params = CreateRefund::new();
        params.payment_intent = Some(intent_id);
        params.amount = request.amount_cents;
        if request.reverse_payout {
            params.reverse_transfer = Some(true);
        }

        let refund = Refund::create(&self.idempotent(&request.idempotency_key), params)
            .await
            .map_err(|e| GatewayError::Api(format!("Stripe error: {}", e)))?;

        Ok(refund.id.to_string())
    }

    fn verify_and_parse_webhook(&self, payload: &str, signature: &str) -> Result<GatewayEvent, GatewayError> {
        let event = Webhook::construct_event(payload, signature, &self.webhook_secret)
            .map_err(|e| match e {
                WebhookError::BadSignature => GatewayError::InvalidSignature("signature mismatch".to_string()),
                other => GatewayError::Malformed(other.to_string()),
            })?;

        Ok(Self::map_event(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsigned_payloads() {
        let gateway = StripeGateway::new("sk_test_123".to_string(), "whsec_test".to_string());
        let result = gateway.verify_and_parse_webhook(
            r#"{"id":"evt_1","type":"checkout.session.completed"}"#,
            "t=1,v1=deadbeef",
        );

        assert!(matches!(
            result,
            Err(GatewayError::InvalidSignature(_)) | Err(GatewayError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_garbage_payment_references() {
        assert!(StripeGateway::parse_payment_intent_id("not-a-payment").is_err());
        assert!(StripeGateway::parse_payment_intent_id("pi_123").is_ok());
    }
}
