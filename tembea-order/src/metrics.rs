//! Prometheus counters for reservations, transitions and payment reconciliation.
//!
//! Registered on the default registry; the API exposes them through `prometheus::gather()`.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

static RESERVATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tembea_reservations_total",
        "Reservation attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to register tembea_reservations_total metric")
});

static TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tembea_booking_transitions_total",
        "Applied booking status transitions",
        &["event", "to"]
    )
    .expect("Failed to register tembea_booking_transitions_total metric")
});

static RECONCILIATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tembea_payment_reconciliations_total",
        "Payment outcomes offered to the reconciler, by signal and result",
        &["source", "result"]
    )
    .expect("Failed to register tembea_payment_reconciliations_total metric")
});

static INCONSISTENCIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tembea_payment_inconsistencies_total",
        "Contradicting or unexpected payment signals",
        &["kind"]
    )
    .expect("Failed to register tembea_payment_inconsistencies_total metric")
});

static AMOUNT_MISMATCHES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tembea_payment_amount_mismatches_total",
        "Provider-reported amounts that differ from the stored amount"
    )
    .expect("Failed to register tembea_payment_amount_mismatches_total metric")
});

static HOLDS_EXPIRED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tembea_holds_expired_total",
        "Unpaid bookings cancelled by the hold sweeper"
    )
    .expect("Failed to register tembea_holds_expired_total metric")
});

pub fn record_reservation(outcome: &str) {
    RESERVATIONS.with_label_values(&[outcome]).inc();
}

pub fn record_transition(event: &str, to: &str) {
    TRANSITIONS.with_label_values(&[event, to]).inc();
}

pub fn record_reconciliation(source: &str, result: &str) {
    RECONCILIATIONS.with_label_values(&[source, result]).inc();
}

pub fn record_inconsistency(kind: &str) {
    INCONSISTENCIES.with_label_values(&[kind]).inc();
}

pub fn inconsistency_count(kind: &str) -> u64 {
    INCONSISTENCIES.with_label_values(&[kind]).get()
}

pub fn record_amount_mismatch() {
    AMOUNT_MISMATCHES.inc();
}

pub fn amount_mismatch_count() -> u64 {
    AMOUNT_MISMATCHES.get()
}

pub fn record_hold_expired() {
    HOLDS_EXPIRED.inc();
}
