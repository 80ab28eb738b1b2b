use thiserror::Error;

/// Failure of a single register read.
///
/// None of these are fatal to the poll loop; the metric is simply absent for
/// the current cycle and gets read again on the next tick.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("short response: expected 2 bytes, got {len}")]
    ShortResponse { len: usize },

    #[error("modbus transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("register read timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}
