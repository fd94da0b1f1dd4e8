use bitcoin::absolute::LockTime;
use bitcoin::key::{Keypair, Secp256k1};
use bitcoin::secp256k1::{rand, SecretKey};
use bitcoin::taproot::{LeafVersion, TaprootBuilder};
use bitcoin::transaction::Version;
use bitcoin::{Address, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use std::str::FromStr;

use crate::envelope::{build_envelope_script, CInsDescription, CONTENT_TYPE_JSON};
use crate::payload::CBrc20Deploy;
use crate::InscriptionError;

pub const POSTAGE_MIN: u64 = 330;
pub const POSTAGE_MAX: u64 = 10_000;
/// Non-SegWit-v1 inputs carry a 64-byte placeholder in the signature slot
/// until `RevealSigner` overwrites it with the real Schnorr signature.
const PLACEHOLDER_SIGNATURE_LEN: usize = 64;
/// `nSequence` used by the source implementation for its single reveal
/// input (RBF-signaling, non-final).
const REVEAL_TX_SEQUENCE: u32 = 0xFFFFFFFD;

#[derive(Debug, Clone)]
pub struct DeployOrderParams {
    pub ticker: String,
    pub total_supply: String,
    pub limit_per_mint: String,
    pub l2_network: String,
    pub contract: String,
    pub receive_address: String,
    pub postage: u64,
    pub fee_rate: u64,
    pub network: Network,
}

#[derive(Debug, Clone)]
pub struct BuiltInscription {
    pub reveal_address: Address,
    pub reveal_tx_raw: Vec<u8>,
    pub reveal_tx_value: u64,
    pub ephemeral_sk: SecretKey,
}

/// Produces the inscription envelope, derives the Taproot reveal address
/// and control block, and assembles the unsigned reveal transaction
/// skeleton with its placeholder witness signature.
pub fn build_deploy_order(params: &DeployOrderParams) -> Result<BuiltInscription, InscriptionError> {
    if !(POSTAGE_MIN..=POSTAGE_MAX).contains(&params.postage) {
        return Err(InscriptionError::InvalidParams(format!(
            "postage {} out of range [{POSTAGE_MIN}, {POSTAGE_MAX}]",
            params.postage
        )));
    }
    if params.fee_rate == 0 {
        return Err(InscriptionError::InvalidParams("fee_rate must be > 0".into()));
    }
    let receive_script = Address::from_str(&params.receive_address)
        .map_err(|e| InscriptionError::InvalidParams(format!("invalid receive_address: {e}")))?
        .require_network(params.network)
        .map_err(|e| InscriptionError::InvalidParams(format!("receive_address: {e}")))?
        .script_pubkey();

    let secp = Secp256k1::new();
    let keypair = Keypair::new(&secp, &mut rand::thread_rng());
    let ephemeral_sk = keypair.secret_key();
    let (internal_pk, _parity) = keypair.x_only_public_key();

    let header = CInsDescription::blockchain(params.l2_network.clone(), params.contract.clone());
    let payload = CBrc20Deploy::new(
        params.ticker.clone(),
        params.total_supply.clone(),
        params.limit_per_mint.clone(),
    )
    .to_json_bytes();
    let reveal_script = build_envelope_script(&internal_pk, &header, CONTENT_TYPE_JSON, &payload)?;

    let taproot_spend_info = TaprootBuilder::new()
        .add_leaf(0, reveal_script.clone())
        .map_err(|e| InscriptionError::Internal(format!("taproot leaf rejected: {e}")))?
        .finalize(&secp, internal_pk)
        .map_err(|_| InscriptionError::Internal("taproot finalize failed".into()))?;
    let control_block = taproot_spend_info
        .control_block(&(reveal_script.clone(), LeafVersion::TapScript))
        .ok_or_else(|| InscriptionError::Internal("missing control block for reveal leaf".into()))?;
    let reveal_address = Address::p2tr(
        &secp,
        internal_pk,
        taproot_spend_info.merkle_root(),
        params.network,
    );

    let mut witness = Witness::new();
    witness.push(vec![0u8; PLACEHOLDER_SIGNATURE_LEN]);
    witness.push(reveal_script.as_bytes());
    witness.push(control_block.serialize());

    let reveal_tx_in = TxIn {
        previous_output: OutPoint::null(),
        script_sig: ScriptBuf::new(),
        sequence: Sequence(REVEAL_TX_SEQUENCE),
        witness,
    };
    let reveal_tx_out = TxOut {
        value: bitcoin::Amount::from_sat(params.postage),
        script_pubkey: receive_script,
    };
    let reveal_tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![reveal_tx_in],
        output: vec![reveal_tx_out],
    };

    let vbytes = reveal_tx.vsize() as u64;
    let fee = vbytes * params.fee_rate;
    let reveal_tx_value = params.postage + fee;

    Ok(BuiltInscription {
        reveal_address,
        reveal_tx_raw: bitcoin::consensus::serialize(&reveal_tx),
        reveal_tx_value,
        ephemeral_sk,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn params() -> DeployOrderParams {
        DeployOrderParams {
            ticker: "TEST".into(),
            total_supply: "1000000".into(),
            limit_per_mint: "1000".into(),
            l2_network: "ethereum".into(),
            contract: "0xabc".into(),
            receive_address: "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080".into(),
            postage: 546,
            fee_rate: 5,
            network: Network::Regtest,
        }
    }

    #[test]
    fn builds_a_deploy_order() {
        let built = build_deploy_order(&params()).unwrap();
        assert!(built.reveal_tx_value >= 546);
        assert_eq!(built.reveal_address.network(), &Network::Regtest);
        let decoded: Transaction = bitcoin::consensus::deserialize(&built.reveal_tx_raw).unwrap();
        assert_eq!(decoded.input.len(), 1);
        assert_eq!(decoded.output[0].value.to_sat(), 546);
        assert_eq!(decoded.input[0].witness.len(), 3);
    }

    #[test]
    fn rejects_postage_out_of_range() {
        let mut p = params();
        p.postage = 100;
        assert!(build_deploy_order(&p).is_err());
        p.postage = 20_000;
        assert!(build_deploy_order(&p).is_err());
    }

    #[test]
    fn fee_equals_vbytes_times_rate() {
        let built = build_deploy_order(&params()).unwrap();
        let decoded: Transaction = bitcoin::consensus::deserialize(&built.reveal_tx_raw).unwrap();
        let expected_fee = decoded.vsize() as u64 * params().fee_rate;
        assert_eq!(built.reveal_tx_value, 546 + expected_fee);
    }
}
