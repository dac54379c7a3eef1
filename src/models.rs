use chrono::Utc;
use std::fmt::Debug;

/// Monotonic position of a record inside its logical stream.
pub type Offset = u64;

/// Event time of a record, used for watermarks.
pub type Timestamp = chrono::DateTime<Utc>;

/// A shorthand trait for the element type flowing through a reader.
/// It's used to enforce that records are Debug + Send + Sync + 'static
/// without having to write it out every time. Debug is needed to report
/// the raw form of a record that an extractor rejected.
pub trait Record: Debug + Send + Sync + 'static {}

// Implement the Record trait for all types that are Debug + Send + Sync + 'static.
impl<T> Record for T where T: Debug + Send + Sync + 'static {}

/// A record handed out by the reader together with the position and
/// event time derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredRecord<T> {
    pub value: T,
    pub offset: Offset,
    pub timestamp: Timestamp,
}
