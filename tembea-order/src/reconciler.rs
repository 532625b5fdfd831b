use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tembea_core::notify::{BookingSummary, InconsistencyAlert, InconsistencyKind, Notifier};
use tembea_core::{
    BookingError, BookingEvent, BookingStatus, GatewayError, GatewayOutcome, InitiateRequest,
    OutcomeSource, Payment, PaymentMetadata, PaymentMethod, PaymentRepository, PaymentStatus,
    Requester, Settlement, StoreError,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::lifecycle::{booking_summary, deliver, BookingLifecycle};
use crate::metrics;
use crate::registry::GatewayRegistry;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("No gateway configured for {0}")]
    MethodNotConfigured(PaymentMethod),

    #[error("Invalid gateway payload: {0}")]
    InvalidPayload(String),

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Cannot resolve payment reference {0}")]
    UnresolvableReference(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Payment {0} is still open for this booking")]
    PaymentInProgress(String),

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GatewayError> for ReconcileError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(_) | GatewayError::Timeout => {
                ReconcileError::GatewayUnavailable(err.to_string())
            }
            GatewayError::Rejected(message) => ReconcileError::GatewayRejected(message),
            GatewayError::InvalidPayload(message) => ReconcileError::InvalidPayload(message),
            GatewayError::InvalidSignature => ReconcileError::InvalidSignature,
            GatewayError::NotConfigured(method) => ReconcileError::MethodNotConfigured(method),
        }
    }
}

/// One payment signal, whatever carried it.
#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub reference: String,
    pub status: PaymentStatus,
    /// Amount the provider says it collected, in minor units.
    pub amount: Option<i64>,
    pub metadata: PaymentMetadata,
    /// Method the signal arrived through, when known.
    pub method: Option<PaymentMethod>,
    pub source: OutcomeSource,
}

impl OutcomeReport {
    pub fn from_gateway(outcome: GatewayOutcome, method: PaymentMethod, source: OutcomeSource) -> Self {
        Self {
            reference: outcome.reference,
            status: outcome.status,
            amount: outcome.amount,
            metadata: outcome.metadata,
            method: Some(method),
            source,
        }
    }
}

/// What the requester needs to complete a payment with the provider.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub payment: Payment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Owns the reference → outcome mapping.
///
/// Initiation responses, webhooks and polls all end up in [`PaymentReconciler::record_outcome`].
/// The first terminal status stored for a reference wins; later signals either agree and are
/// dropped, or contradict it and are flagged. Booking confirmation and the notification hang off
/// the booking's own pending → confirmed transition, so concurrent signals confirm once.
pub struct PaymentReconciler {
    payments: Arc<dyn PaymentRepository>,
    lifecycle: Arc<BookingLifecycle>,
    gateways: Arc<GatewayRegistry>,
    notifier: Arc<dyn Notifier>,
    default_currency: String,
}

impl PaymentReconciler {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        lifecycle: Arc<BookingLifecycle>,
        gateways: Arc<GatewayRegistry>,
        notifier: Arc<dyn Notifier>,
        default_currency: &str,
    ) -> Self {
        Self {
            payments,
            lifecycle,
            gateways,
            notifier,
            default_currency: default_currency.to_string(),
        }
    }

    pub async fn get(&self, reference: &str) -> Result<Payment, ReconcileError> {
        self.payments
            .get_payment(reference)
            .await?
            .ok_or_else(|| ReconcileError::PaymentNotFound(reference.to_string()))
    }

    pub async fn payments_for_booking(&self, booking_id: Uuid) -> Result<Vec<Payment>, ReconcileError> {
        Ok(self.payments.list_for_booking(booking_id).await?)
    }

    /// Open a charge for a pending booking.
    ///
    /// Nothing is persisted unless the provider accepted the charge.
    pub async fn initiate(
        &self,
        booking_id: Uuid,
        method: PaymentMethod,
        phone: Option<String>,
    ) -> Result<PaymentSession, ReconcileError> {
        let booking = self.lifecycle.get(booking_id).await?;
        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Confirmed | BookingStatus::CheckedIn => {
                return Err(BookingError::AlreadyProcessed {
                    status: booking.status,
                }
                .into())
            }
            BookingStatus::Cancelled => {
                return Err(BookingError::InvalidTransition {
                    from: booking.status,
                    event: BookingEvent::Confirm,
                }
                .into())
            }
        }

        // One open charge per booking; refresh earlier ones so a lost failure does not block a retry
        for open in self
            .payments
            .list_for_booking(booking.id)
            .await?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Pending)
        {
            let current = self.verify(&open.reference, Some(open.method)).await?;
            match current.status {
                PaymentStatus::Pending => {
                    return Err(ReconcileError::PaymentInProgress(current.reference))
                }
                PaymentStatus::Success => {
                    return Err(BookingError::AlreadyProcessed {
                        status: BookingStatus::Confirmed,
                    }
                    .into())
                }
                PaymentStatus::Failed => {}
            }
        }

        let email = booking.requester.email.as_ref().map(|e| e.expose().clone());
        let request = InitiateRequest {
            reference: generate_reference(method),
            amount: booking.amount,
            currency: booking.currency.clone(),
            method,
            metadata: PaymentMetadata {
                booking_id: Some(booking.id),
                user_id: Some(booking.requester.user_id.clone()),
                email: email.clone(),
            },
            email,
            phone,
        };

        let initiated = match self.gateways.initiate(method, &request).await {
            Ok(initiated) => initiated,
            Err(e) => {
                error!("{} initiation for booking {} failed: {}", method, booking.id, e);
                return Err(e.into());
            }
        };

        let payment = Payment::pending(
            initiated.reference.clone(),
            booking.amount,
            &booking.currency,
            method,
            Some(booking.id),
            Some(booking.requester.clone()),
        );
        let mut payment = match self.payments.insert_payment(&payment).await {
            Ok(()) => {
                info!(
                    "Payment {} opened for booking {} ({} {} via {})",
                    payment.reference, booking.id, payment.amount, payment.currency, method
                );
                payment
            }
            // A webhook beat us to it and seeded the row
            Err(StoreError::Duplicate(_)) => {
                debug!("Payment {} already recorded", payment.reference);
                self.get(&payment.reference).await?
            }
            Err(e) => return Err(e.into()),
        };

        if initiated.status.is_terminal() {
            payment = self
                .record_outcome(OutcomeReport {
                    reference: initiated.reference.clone(),
                    status: initiated.status,
                    amount: None,
                    metadata: request.metadata.clone(),
                    method: Some(method),
                    source: OutcomeSource::Initiation,
                })
                .await?;
        }

        Ok(PaymentSession {
            payment,
            checkout_url: initiated.checkout_url,
            client_secret: initiated.client_secret,
        })
    }

    /// Merge one payment signal into the stored state.
    ///
    /// Idempotent and order-independent: replaying any signal any number of times, from any
    /// source, leaves the same payment and booking state and sends at most one confirmation.
    pub async fn record_outcome(&self, report: OutcomeReport) -> Result<Payment, ReconcileError> {
        let seed = match self.payments.get_payment(&report.reference).await? {
            Some(stored) => stored,
            None => self.seed_payment(&report).await?,
        };

        let (payment, settlement) = self
            .payments
            .settle(&seed, report.status, report.source)
            .await?;
        metrics::record_reconciliation(report.source.as_str(), settlement_label(&settlement));

        let applied = match settlement {
            Settlement::StillPending => {
                debug!("Payment {} still pending after {}", payment.reference, report.source);
                return Ok(payment);
            }
            Settlement::Conflict { stored, incoming } => {
                self.flag(
                    InconsistencyKind::ConflictingOutcome,
                    &payment,
                    incoming,
                    report.source,
                    format!(
                        "{} reported {} but {} was recorded first",
                        report.source, incoming, stored
                    ),
                )
                .await;
                return Ok(payment);
            }
            Settlement::Unchanged(status) => {
                debug!("Duplicate {} outcome for {} via {}", status, payment.reference, report.source);
                false
            }
            Settlement::Applied(status) => {
                info!("Payment {} settled {} via {}", payment.reference, status, report.source);
                true
            }
        };

        if applied {
            if let Some(amount) = report.amount.filter(|a| *a != payment.amount) {
                metrics::record_amount_mismatch();
                self.flag(
                    InconsistencyKind::AmountMismatch,
                    &payment,
                    report.status,
                    report.source,
                    format!("provider reported {} but {} was expected", amount, payment.amount),
                )
                .await;
            }
        }

        if payment.status == PaymentStatus::Success {
            self.on_success(&payment, applied, report.source).await?;
        }
        Ok(payment)
    }

    /// Current state of a payment, asking the provider when we have no terminal answer yet.
    ///
    /// A terminal payment is replayed through `record_outcome` without a gateway call, which
    /// finishes a confirmation an earlier signal could not complete.
    pub async fn verify(
        &self,
        reference: &str,
        hint: Option<PaymentMethod>,
    ) -> Result<Payment, ReconcileError> {
        let stored = self.payments.get_payment(reference).await?;
        if let Some(payment) = &stored {
            if payment.status.is_terminal() {
                return self
                    .record_outcome(OutcomeReport {
                        reference: payment.reference.clone(),
                        status: payment.status,
                        amount: None,
                        metadata: PaymentMetadata::default(),
                        method: Some(payment.method),
                        source: OutcomeSource::Poll,
                    })
                    .await;
            }
        }

        let method = stored
            .as_ref()
            .map(|p| p.method)
            .unwrap_or_else(|| infer_method(reference, hint));
        let outcome = match self.gateways.verify(method, reference).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{} verification of {} failed: {}", method, reference, e);
                return Err(e.into());
            }
        };

        let mut report = OutcomeReport::from_gateway(outcome, method, OutcomeSource::Poll);
        // Keyed by the reference we were asked about, whatever the provider echoes
        report.reference = reference.to_string();
        self.record_outcome(report).await
    }

    /// Authenticate and apply a provider webhook. `Ok(None)` for events that carry no outcome.
    pub async fn on_webhook(
        &self,
        method: PaymentMethod,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<Payment>, ReconcileError> {
        let outcome = match self.gateways.parse_webhook(method, signature, body) {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                debug!("{} webhook carried no payment outcome", method);
                return Ok(None);
            }
            Err(e) => {
                warn!("Rejected {} webhook: {}", method, e);
                return Err(e.into());
            }
        };

        let report = OutcomeReport::from_gateway(outcome, method, OutcomeSource::Webhook);
        self.record_outcome(report).await.map(Some)
    }

    /// Builds the row for a reference we have never seen, from what the signal tells us.
    async fn seed_payment(&self, report: &OutcomeReport) -> Result<Payment, ReconcileError> {
        let method = infer_method(&report.reference, report.method);

        if let Some(booking_id) = report.metadata.booking_id {
            match self.lifecycle.get(booking_id).await {
                Ok(booking) => {
                    return Ok(Payment::pending(
                        report.reference.clone(),
                        booking.amount,
                        &booking.currency,
                        method,
                        Some(booking.id),
                        Some(booking.requester),
                    ))
                }
                Err(BookingError::NotFound(_)) => {
                    warn!(
                        "Payment {} names unknown booking {}",
                        report.reference, booking_id
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(user_id) = &report.metadata.user_id {
            return Ok(Payment::pending(
                report.reference.clone(),
                report.amount.unwrap_or_default(),
                &self.default_currency,
                method,
                None,
                Some(Requester::new(user_id.clone(), report.metadata.email.clone())),
            ));
        }

        warn!(
            "Dropping {} outcome for unknown reference {} without usable metadata",
            report.source, report.reference
        );
        Err(ReconcileError::UnresolvableReference(report.reference.clone()))
    }

    async fn on_success(
        &self,
        payment: &Payment,
        applied: bool,
        source: OutcomeSource,
    ) -> Result<(), ReconcileError> {
        let Some(booking_id) = payment.booking_id else {
            // Nothing to confirm; the settlement itself is the event worth telling the payer about
            if applied {
                if let Some(requester) = &payment.requester {
                    let summary = BookingSummary {
                        booking_id: None,
                        unit: None,
                        slot: None,
                        payment_reference: Some(payment.reference.clone()),
                        method: Some(payment.method),
                        amount: payment.amount,
                        currency: payment.currency.clone(),
                    };
                    deliver(self.notifier.as_ref(), requester, &summary).await;
                }
            }
            return Ok(());
        };

        match self.lifecycle.confirm(booking_id).await {
            Ok((booking, transition)) => {
                if !transition.is_noop() {
                    deliver(
                        self.notifier.as_ref(),
                        &booking.requester,
                        &booking_summary(&booking, Some(payment)),
                    )
                    .await;
                }
                Ok(())
            }
            Err(BookingError::AlreadyProcessed { status }) => {
                if applied && self.settled_elsewhere(booking_id, &payment.reference).await? {
                    self.flag(
                        InconsistencyKind::DuplicatePayment,
                        payment,
                        PaymentStatus::Success,
                        source,
                        format!("booking {} was already paid by another charge; refund required", booking_id),
                    )
                    .await;
                } else {
                    debug!("Booking {} already {}; {} is a no-op", booking_id, status, payment.reference);
                }
                Ok(())
            }
            Err(BookingError::InvalidTransition {
                from: BookingStatus::Cancelled,
                ..
            }) => {
                if applied {
                    self.flag(
                        InconsistencyKind::PaidCancelledBooking,
                        payment,
                        PaymentStatus::Success,
                        source,
                        format!("booking {} was cancelled before payment; refund required", booking_id),
                    )
                    .await;
                }
                Ok(())
            }
            Err(e) => {
                error!("Confirming booking {} for {} failed: {}", booking_id, payment.reference, e);
                Err(e.into())
            }
        }
    }

    /// Whether another successful payment exists for the booking.
    async fn settled_elsewhere(&self, booking_id: Uuid, reference: &str) -> Result<bool, ReconcileError> {
        Ok(self
            .payments
            .list_for_booking(booking_id)
            .await?
            .iter()
            .any(|p| p.status == PaymentStatus::Success && p.reference != reference))
    }

    async fn flag(
        &self,
        kind: InconsistencyKind,
        payment: &Payment,
        incoming: PaymentStatus,
        source: OutcomeSource,
        detail: String,
    ) {
        warn!(
            reference = %payment.reference,
            kind = kind.as_str(),
            "Payment inconsistency: {}",
            detail
        );
        metrics::record_inconsistency(kind.as_str());

        let alert = InconsistencyAlert {
            kind,
            reference: payment.reference.clone(),
            stored_status: payment.status,
            incoming_status: incoming,
            source,
            detail,
            detected_at: Utc::now(),
        };
        if let Err(e) = self.notifier.alert(&alert).await {
            error!("Failed to raise alert for {}: {}", payment.reference, e);
        }
    }
}

/// `pay-` or `mpesa-` followed by ten hex digits.
pub fn generate_reference(method: PaymentMethod) -> String {
    let suffix: u64 = rand::thread_rng().gen::<u64>() & 0xff_ffff_ffff;
    format!("{}-{:010x}", method.reference_prefix(), suffix)
}

/// Provider a reference belongs to. The prefix wins over the channel it arrived on, since
/// M-Pesa charges settle through Paystack's webhook.
pub fn infer_method(reference: &str, hint: Option<PaymentMethod>) -> PaymentMethod {
    if reference.starts_with("mpesa-") {
        PaymentMethod::Mpesa
    } else if reference.starts_with("pi_") {
        PaymentMethod::Stripe
    } else {
        hint.unwrap_or(PaymentMethod::Paystack)
    }
}

fn settlement_label(settlement: &Settlement) -> &'static str {
    match settlement {
        Settlement::Applied(_) => "applied",
        Settlement::Unchanged(_) => "unchanged",
        Settlement::Conflict { .. } => "conflict",
        Settlement::StillPending => "pending",
    }
}
