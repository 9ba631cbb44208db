use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TimeError {
    #[error("Date '{0}' is not in YYYY-MM-DD form")]
    MalformedDate(String),

    #[error("Epoch timestamp {0} ms is out of range")]
    EpochOutOfRange(i64),
}
