use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{LeafVersion, TapLeafHash};
use bitcoin::{OutPoint, Transaction, TxOut, Txid};

use crate::InscriptionError;

/// Completes a reveal transaction given the commit transaction that funds
/// it: sets the previous outpoint, computes the BIP-341 tapscript sighash
/// with `SIGHASH_DEFAULT`, Schnorr-signs with the order's ephemeral key,
/// and overwrites the placeholder witness signature.
pub fn sign_reveal_tx(
    reveal_tx_raw: &[u8],
    commit_tx: &Transaction,
    commit_out_idx: u32,
    ephemeral_sk: &SecretKey,
) -> Result<Transaction, InscriptionError> {
    let mut reveal_tx: Transaction = bitcoin::consensus::deserialize(reveal_tx_raw)
        .map_err(|e| InscriptionError::Internal(format!("reveal tx decode failed: {e}")))?;

    let commit_out = commit_tx
        .output
        .get(commit_out_idx as usize)
        .ok_or_else(|| InscriptionError::Internal("commit_out_idx out of range".into()))?
        .clone();

    reveal_tx.input[0].previous_output = OutPoint {
        txid: commit_tx.compute_txid(),
        vout: commit_out_idx,
    };

    if reveal_tx.input[0].witness.len() != 3 {
        return Err(InscriptionError::Internal(
            "reveal tx witness must carry {signature, script, control_block}".into(),
        ));
    }
    let reveal_script = bitcoin::ScriptBuf::from_bytes(reveal_tx.input[0].witness[1].to_vec());
    let leaf_hash = TapLeafHash::from_script(&reveal_script, LeafVersion::TapScript);

    let prevouts = vec![commit_out];
    let sighash = SighashCache::new(&reveal_tx)
        .taproot_script_spend_signature_hash(
            0,
            &Prevouts::All(&prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(|e| InscriptionError::Internal(format!("sighash computation failed: {e}")))?;

    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, ephemeral_sk);
    let message = Message::from_digest(sighash.to_byte_array());
    let signature = secp.sign_schnorr_no_aux_rand(&message, &keypair);

    let control_block = reveal_tx.input[0].witness[2].to_vec();
    reveal_tx.input[0].witness = {
        let mut witness = bitcoin::Witness::new();
        witness.push(signature.as_ref());
        witness.push(reveal_script.as_bytes());
        witness.push(control_block);
        witness
    };

    Ok(reveal_tx)
}

pub fn reveal_txid(tx: &Transaction) -> Txid {
    tx.compute_txid()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{build_deploy_order, DeployOrderParams};
    use bitcoin::{Amount, Network, ScriptBuf};

    fn commit_tx_for(built: &crate::builder::BuiltInscription) -> Transaction {
        Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(built.reveal_tx_value),
                script_pubkey: built.reveal_address.script_pubkey(),
            }],
        }
    }

    #[test]
    fn signs_and_serializes_deterministically() {
        let params = DeployOrderParams {
            ticker: "TEST".into(),
            total_supply: "1000000".into(),
            limit_per_mint: "1000".into(),
            l2_network: "ethereum".into(),
            contract: "0xabc".into(),
            receive_address: "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080".into(),
            postage: 546,
            fee_rate: 5,
            network: Network::Regtest,
        };
        let built = build_deploy_order(&params).unwrap();
        let commit_tx = commit_tx_for(&built);

        let signed =
            sign_reveal_tx(&built.reveal_tx_raw, &commit_tx, 0, &built.ephemeral_sk).unwrap();
        assert_ne!(signed.input[0].witness[0].to_vec(), vec![0u8; 64]);

        let reserialized = bitcoin::consensus::serialize(&signed);
        let reparsed: Transaction = bitcoin::consensus::deserialize(&reserialized).unwrap();
        assert_eq!(bitcoin::consensus::serialize(&reparsed), reserialized);
        let _ = ScriptBuf::new();
    }

    #[test]
    fn signature_verifies_against_the_tapscript_sighash() {
        let params = DeployOrderParams {
            ticker: "TEST".into(),
            total_supply: "1000000".into(),
            limit_per_mint: "1000".into(),
            l2_network: "ethereum".into(),
            contract: "0xabc".into(),
            receive_address: "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080".into(),
            postage: 546,
            fee_rate: 5,
            network: Network::Regtest,
        };
        let built = build_deploy_order(&params).unwrap();
        let commit_tx = commit_tx_for(&built);
        let signed = sign_reveal_tx(&built.reveal_tx_raw, &commit_tx, 0, &built.ephemeral_sk).unwrap();

        let reveal_script = bitcoin::ScriptBuf::from_bytes(signed.input[0].witness[1].to_vec());
        let leaf_hash = TapLeafHash::from_script(&reveal_script, LeafVersion::TapScript);
        let sighash = SighashCache::new(&signed)
            .taproot_script_spend_signature_hash(
                0,
                &Prevouts::All(&[commit_tx.output[0].clone()]),
                leaf_hash,
                TapSighashType::Default,
            )
            .unwrap();

        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &built.ephemeral_sk);
        let (internal_pk, _) = keypair.x_only_public_key();
        let signature = bitcoin::secp256k1::schnorr::Signature::from_slice(&signed.input[0].witness[0]).unwrap();
        let message = Message::from_digest(sighash.to_byte_array());
        secp.verify_schnorr(&signature, &message, &internal_pk)
            .expect("reveal witness signature must verify under the order's internal key");
    }
}
