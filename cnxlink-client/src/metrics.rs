//! Client metrics definitions
//!
//! OpenTelemetry instruments for the client. They are created when the
//! builder enables observability and exported through the globally installed
//! meter provider.
//!
//! # Metrics Collected
//!
//! - **link_state**: 0 never connected, 1 connected, 2 disconnected (gauge)
//! - **requests_total**: Remote calls completed, by service, action and status (counter)
//! - **request_duration**: Remote call latency (histogram)
//! - **errors_total**: Errors by kind (counter)
//! - **gate_failures**: Calls refused because the link stayed down (counter)
//! - **transfers_total**: Identity transfers emitted (counter)
//! - **events_received**: Pushed events, by kind (counter)
//! - **responses_dropped**: Responses with no waiting call (counter)
//!
//! # Examples
//!
//! ```rust,no_run
//! use cnxlink_client::ClientMetrics;
//!
//! let metrics = ClientMetrics::new("my-client");
//! metrics.record_request("User", "create", "success", 0.012);
//! ```

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Client metrics for monitoring
pub struct ClientMetrics {
    /// Link state (0=never connected, 1=connected, 2=disconnected)
    pub link_state: Gauge<i64>,
    /// Remote calls completed
    pub requests_total: Counter<u64>,
    /// Remote call duration in seconds
    pub request_duration: Histogram<f64>,
    /// Errors by kind
    pub errors_total: Counter<u64>,
    /// Calls refused by the reconnection gate
    pub gate_failures: Counter<u64>,
    /// Identity transfers emitted
    pub transfers_total: Counter<u64>,
    /// Pushed events received
    pub events_received: Counter<u64>,
    /// Responses that matched no pending call
    pub responses_dropped: Counter<u64>,
}

impl ClientMetrics {
    /// Instruments on the global meter named `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    /// Instruments on a custom meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            link_state: meter
                .i64_gauge("cnxlink.client.link.state")
                .with_description("Link state (0=never connected, 1=connected, 2=disconnected)")
                .build(),
            requests_total: meter
                .u64_counter("cnxlink.client.requests.total")
                .with_description("Total number of remote calls completed")
                .build(),
            request_duration: meter
                .f64_histogram("cnxlink.client.request.duration")
                .with_description("Remote call duration in seconds")
                .build(),
            errors_total: meter
                .u64_counter("cnxlink.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
            gate_failures: meter
                .u64_counter("cnxlink.client.gate.failures")
                .with_description("Calls refused because the link did not come back in time")
                .build(),
            transfers_total: meter
                .u64_counter("cnxlink.client.transfers.total")
                .with_description("Total number of identity transfers emitted")
                .build(),
            events_received: meter
                .u64_counter("cnxlink.client.events.received")
                .with_description("Total number of pushed events received")
                .build(),
            responses_dropped: meter
                .u64_counter("cnxlink.client.responses.dropped")
                .with_description("Responses that matched no pending call")
                .build(),
        }
    }

    /// Update link state
    pub fn update_link_state(&self, state: i64) {
        self.link_state.record(state, &[]);
    }

    /// Record a completed remote call
    pub fn record_request(&self, service: &str, action: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("service", service.to_string()),
            KeyValue::new("action", action.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    /// Record an error
    pub fn record_error(&self, error_type: &str) {
        let attributes = &[KeyValue::new("error_type", error_type.to_string())];
        self.errors_total.add(1, attributes);
    }

    /// Record a call refused by the gate
    pub fn record_gate_failure(&self) {
        self.gate_failures.add(1, &[]);
    }

    /// Record an emitted transfer
    pub fn record_transfer(&self) {
        self.transfers_total.add(1, &[]);
    }

    /// Record a pushed event
    pub fn record_event(&self, kind: &str, key: &str) {
        let attributes = &[
            KeyValue::new("kind", kind.to_string()),
            KeyValue::new("key", key.to_string()),
        ];
        self.events_received.add(1, attributes);
    }

    /// Record a response nobody was waiting for
    pub fn record_dropped_response(&self) {
        self.responses_dropped.add(1, &[]);
    }
}
