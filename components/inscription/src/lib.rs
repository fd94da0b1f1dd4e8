pub mod builder;
pub mod envelope;
pub mod payload;
pub mod signer;

pub use builder::{build_deploy_order, BuiltInscription, DeployOrderParams, POSTAGE_MAX, POSTAGE_MIN};
pub use envelope::CInsDescription;
pub use payload::CBrc20Deploy;
pub use signer::{reveal_txid, sign_reveal_tx};

#[derive(Debug, Clone)]
pub enum InscriptionError {
    InvalidParams(String),
    Internal(String),
}

impl std::fmt::Display for InscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InscriptionError::InvalidParams(e) => write!(f, "invalid params: {e}"),
            InscriptionError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}
