use std::sync::atomic::{AtomicUsize, Ordering};

pub static DEBUG: DebugMetrics = DebugMetrics::new();

pub struct DebugMetrics {
    connect_count: AtomicUsize,
    connect_errors: AtomicUsize,
    subscribe_errors: AtomicUsize,
    message_count: AtomicUsize,
    skipped_messages: AtomicUsize,
    decode_errors: AtomicUsize,
    label_errors: AtomicUsize,
    write_count: AtomicUsize,
    write_errors: AtomicUsize,
    write_recoveries: AtomicUsize,
}

impl DebugMetrics {
    pub const fn new() -> Self {
        DebugMetrics {
            connect_count: AtomicUsize::new(0),
            connect_errors: AtomicUsize::new(0),
            subscribe_errors: AtomicUsize::new(0),
            message_count: AtomicUsize::new(0),
            skipped_messages: AtomicUsize::new(0),
            decode_errors: AtomicUsize::new(0),
            label_errors: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
            write_errors: AtomicUsize::new(0),
            write_recoveries: AtomicUsize::new(0),
        }
    }

    pub fn connect_succeeded(&self) {
        self.connect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_failed(&self) {
        self.connect_count.fetch_add(1, Ordering::Relaxed);
        self.connect_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribe_failed(&self) {
        self.subscribe_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_skipped(&self) {
        self.skipped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn label_failed(&self) {
        self.label_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_succeeded(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_recovered(&self) {
        self.write_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    // Log the current metrics and reset the counters
    pub fn publish(&self) {
        let connect_count = self.connect_count.swap(0, Ordering::Relaxed);
        let connect_errors = self.connect_errors.swap(0, Ordering::Relaxed);
        let subscribe_errors = self.subscribe_errors.swap(0, Ordering::Relaxed);
        let message_count = self.message_count.swap(0, Ordering::Relaxed);
        let skipped_messages = self.skipped_messages.swap(0, Ordering::Relaxed);
        let decode_errors = self.decode_errors.swap(0, Ordering::Relaxed);
        let label_errors = self.label_errors.swap(0, Ordering::Relaxed);
        let write_count = self.write_count.swap(0, Ordering::Relaxed);
        let write_errors = self.write_errors.swap(0, Ordering::Relaxed);
        let write_recoveries = self.write_recoveries.swap(0, Ordering::Relaxed);
        println!(
            "Debug: connects {} (errors {}, subscribe errors {}) | messages {} (skipped {}, decode errors {}, label errors {}) | writes {} (errors {}, recoveries {})",
            connect_count,
            connect_errors,
            subscribe_errors,
            message_count,
            skipped_messages,
            decode_errors,
            label_errors,
            write_count,
            write_errors,
            write_recoveries,
        );
    }
}
