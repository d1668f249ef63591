use chrono::{DateTime, Utc};

/// A fact recorded on an institution's stream: a posted entry, a decided
/// loan, a savings transaction. Never updated once appended; schema changes
/// bump `version`.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, `<module>.<aggregate>.<fact>` (e.g. `"loans.loan.disbursed"`).
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Wall-clock time of recording; business dates live in the payload.
    fn occurred_at(&self) -> DateTime<Utc>;
}
