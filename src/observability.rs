use biometrics::{Collector, Counter, Moments};

pub(crate) static STREAM_CONNECTS: Counter = Counter::new("ideagen.stream.connects");
pub(crate) static STREAM_OPENS: Counter = Counter::new("ideagen.stream.opens");
pub(crate) static STREAM_CLOSES: Counter = Counter::new("ideagen.stream.closes");
pub(crate) static STREAM_FATAL: Counter = Counter::new("ideagen.stream.fatal");
pub(crate) static STREAM_MISSING_TOKEN: Counter = Counter::new("ideagen.stream.missing_token");

pub(crate) static RECONNECT_FORBIDDEN: Counter = Counter::new("ideagen.reconnect.forbidden");
pub(crate) static RECONNECT_NETWORK: Counter = Counter::new("ideagen.reconnect.network");
pub(crate) static RECONNECT_TRANSPORT: Counter = Counter::new("ideagen.reconnect.transport");
pub(crate) static RECONNECT_EXHAUSTED: Counter = Counter::new("ideagen.reconnect.exhausted");

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("ideagen.stream.chunks");
pub(crate) static STREAM_BYTES: Counter = Counter::new("ideagen.stream.bytes");
pub(crate) static STREAM_IGNORED_EVENTS: Counter = Counter::new("ideagen.stream.ignored_events");
pub(crate) static STREAM_TTFB: Moments = Moments::new("ideagen.stream.first_chunk_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&STREAM_CONNECTS);
    collector.register_counter(&STREAM_OPENS);
    collector.register_counter(&STREAM_CLOSES);
    collector.register_counter(&STREAM_FATAL);
    collector.register_counter(&STREAM_MISSING_TOKEN);

    collector.register_counter(&RECONNECT_FORBIDDEN);
    collector.register_counter(&RECONNECT_NETWORK);
    collector.register_counter(&RECONNECT_TRANSPORT);
    collector.register_counter(&RECONNECT_EXHAUSTED);

    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_IGNORED_EVENTS);
    collector.register_moments(&STREAM_TTFB);
}
