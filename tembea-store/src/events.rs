use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use std::time::Duration;
use tembea_core::notify::{BookingSummary, InconsistencyAlert, Notifier, NotifyError};
use tembea_core::Requester;
use tembea_shared::models::events::{
    BookingConfirmedEvent, PaymentInconsistencyEvent, PaymentSucceededEvent,
    TOPIC_BOOKING_CONFIRMED, TOPIC_PAYMENT_INCONSISTENCY, TOPIC_PAYMENT_SUCCEEDED,
};
use tracing::{error, info};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, key: &str, event: &T) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event).map_err(|e| NotifyError::Delivery(e.to_string()))?;
        self.publish(topic, key, &payload)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}

/// Publishes confirmations and inconsistency alerts; email delivery consumes the topics.
pub struct KafkaNotifier {
    producer: EventProducer,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer) -> Self {
        Self { producer }
    }
}

pub fn booking_confirmed_event(recipient: &Requester, summary: &BookingSummary) -> Option<BookingConfirmedEvent> {
    let booking_id = summary.booking_id?;
    Some(BookingConfirmedEvent {
        booking_id,
        unit: summary.unit.clone().unwrap_or_default(),
        slot: summary.slot.clone().unwrap_or_default(),
        requester_id: recipient.user_id.clone(),
        requester_email: recipient.email.clone(),
        payment_reference: summary.payment_reference.clone(),
        amount: summary.amount,
        currency: summary.currency.clone(),
        timestamp: Utc::now().timestamp(),
    })
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn notify(&self, recipient: &Requester, summary: &BookingSummary) -> Result<(), NotifyError> {
        if let Some(event) = booking_confirmed_event(recipient, summary) {
            let key = event.booking_id.to_string();
            return self
                .producer
                .publish_json(TOPIC_BOOKING_CONFIRMED, &key, &event)
                .await;
        }

        // Payment without a booking
        let reference = summary.payment_reference.clone().unwrap_or_default();
        let event = PaymentSucceededEvent {
            reference: reference.clone(),
            requester_id: recipient.user_id.clone(),
            requester_email: recipient.email.clone(),
            amount: summary.amount,
            currency: summary.currency.clone(),
            method: summary.method.map(|m| m.to_string()).unwrap_or_default(),
            timestamp: Utc::now().timestamp(),
        };
        self.producer
            .publish_json(TOPIC_PAYMENT_SUCCEEDED, &reference, &event)
            .await
    }

    async fn alert(&self, alert: &InconsistencyAlert) -> Result<(), NotifyError> {
        let event = PaymentInconsistencyEvent {
            reference: alert.reference.clone(),
            kind: alert.kind.as_str().to_string(),
            stored_status: alert.stored_status.to_string(),
            incoming_status: alert.incoming_status.to_string(),
            source: alert.source.to_string(),
            detail: alert.detail.clone(),
            detected_at: alert.detected_at,
        };
        self.producer
            .publish_json(TOPIC_PAYMENT_INCONSISTENCY, &alert.reference, &event)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_confirmation_event_needs_a_booking() {
        let recipient = Requester::new("user-9", Some("a@b.co".to_string()));
        let mut summary = BookingSummary {
            booking_id: None,
            unit: Some("flight:FL100".into()),
            slot: Some("12A".into()),
            payment_reference: Some("pay-0123456789".into()),
            method: None,
            amount: 20_000,
            currency: "KES".into(),
        };
        assert!(booking_confirmed_event(&recipient, &summary).is_none());

        let id = Uuid::new_v4();
        summary.booking_id = Some(id);
        let event = booking_confirmed_event(&recipient, &summary).unwrap();
        assert_eq!(event.booking_id, id);
        assert_eq!(event.slot, "12A");

        // Email stays masked in logs, real in the payload
        assert!(!format!("{:?}", event).contains("a@b.co"));
        assert!(serde_json::to_string(&event).unwrap().contains("a@b.co"));
    }
}
