use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("spi error: {0}")]
    Spi(String),
    #[error("board rejected command: {0}")]
    Board(String),
    #[error("{variable} reads back {got:?}, expected {expected:?}")]
    Readback {
        variable: &'static str,
        expected: String,
        got: String,
    },
    #[error("board read timeout")]
    Timeout,
    #[error("PI_OK data-ready timeout")]
    DataReadyTimeout,
    #[error("board signalled FAIL")]
    FailLine,
    #[error("simulated fault: {0}")]
    Simulated(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
