use cbrc20_chain_client::ChainClientError;
use cbrc20_inscription::InscriptionError;

/// `Recoverable` and `DetectReorg` are only ever raised by the reorg
/// guard; everything else can surface from any stage of the pipeline.
#[derive(Debug, Clone)]
pub enum CoreError {
    InvalidParams(String),
    NotFound,
    Transient(String),
    Recoverable { height: u64, depth: u64 },
    DetectReorg,
    Interrupted,
    Internal(String),
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidParams(e) => write!(f, "invalid params: {e}"),
            CoreError::NotFound => write!(f, "not found"),
            CoreError::Transient(e) => write!(f, "transient error: {e}"),
            CoreError::Recoverable { height, depth } => {
                write!(f, "recoverable reorg at height {height}, depth {depth}")
            }
            CoreError::DetectReorg => write!(f, "reorg deeper than retained anchors"),
            CoreError::Interrupted => write!(f, "interrupted"),
            CoreError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<ChainClientError> for CoreError {
    fn from(e: ChainClientError) -> Self {
        match e {
            ChainClientError::Interrupted => CoreError::Interrupted,
            ChainClientError::Transient(m) => CoreError::Transient(m),
            ChainClientError::Internal(m) => CoreError::Internal(m),
        }
    }
}

impl From<InscriptionError> for CoreError {
    fn from(e: InscriptionError) -> Self {
        match e {
            InscriptionError::InvalidParams(m) => CoreError::InvalidParams(m),
            InscriptionError::Internal(m) => CoreError::Internal(m),
        }
    }
}

impl From<String> for CoreError {
    fn from(e: String) -> Self {
        CoreError::Internal(e)
    }
}
