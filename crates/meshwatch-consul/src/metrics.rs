// Metrics for the watch scheduler
// Recorded through the `metrics` facade; a no-op until the host installs a recorder

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

pub const POLLS_TOTAL: &str = "meshwatch_polls_total";
pub const POLL_DURATION_SECONDS: &str = "meshwatch_poll_duration_seconds";
pub const EVENTS_PUBLISHED_TOTAL: &str = "meshwatch_events_published_total";
pub const EVENTS_DROPPED_TOTAL: &str = "meshwatch_events_dropped_total";
pub const ACTIVE_WATCHES: &str = "meshwatch_active_watches";
pub const DISPATCH_IN_FLIGHT: &str = "meshwatch_dispatch_in_flight";

/// Register metric descriptions
/// Should be called once at application startup
pub fn describe_metrics() {
    describe_counter!(POLLS_TOTAL, "Total number of completed long-polls by outcome");
    describe_histogram!(
        POLL_DURATION_SECONDS,
        "Long-poll duration in seconds, from issue to response"
    );
    describe_counter!(
        EVENTS_PUBLISHED_TOTAL,
        "Total number of registry events handed to the update sink"
    );
    describe_counter!(
        EVENTS_DROPPED_TOTAL,
        "Total number of registry events dropped because the sink fell behind"
    );
    describe_gauge!(ACTIVE_WATCHES, "Number of active service watches");
    describe_gauge!(
        DISPATCH_IN_FLIGHT,
        "Number of long-poll requests currently holding a dispatch slot"
    );
}

/// Record a completed poll
pub fn record_poll(outcome: &'static str, duration: Duration) {
    counter!(POLLS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(POLL_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_event_published() {
    counter!(EVENTS_PUBLISHED_TOTAL).increment(1);
}

pub fn record_event_dropped() {
    counter!(EVENTS_DROPPED_TOTAL).increment(1);
}

pub fn set_active_watches(count: usize) {
    gauge!(ACTIVE_WATCHES).set(count as f64);
}

pub fn set_dispatch_in_flight(count: usize) {
    gauge!(DISPATCH_IN_FLIGHT).set(count as f64);
}
