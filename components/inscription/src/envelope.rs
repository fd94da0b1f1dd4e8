use bitcoin::opcodes::all::{OP_CHECKSIG, OP_ENDIF, OP_IF};
use bitcoin::opcodes::OP_FALSE;
use bitcoin::script::{PushBytesBuf, ScriptBuf};
use bitcoin::XOnlyPublicKey;
use serde::Serialize;

use crate::InscriptionError;

/// Maximum size of a single data push inside a Bitcoin script.
const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

pub const MAGIC: &[u8] = b"ord";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// `c-ins` header: describes the L2 chain/contract this inscription's
/// BRC-20-style payload is scoped to.
#[derive(Serialize, Debug, Clone)]
pub struct CInsDescription {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub chain: String,
    pub contract: String,
}

impl CInsDescription {
    pub fn blockchain(chain: String, contract: String) -> Self {
        CInsDescription {
            kind: "blockchain",
            chain,
            contract,
        }
    }
}

/// Builds the tapscript inscription envelope:
/// `push(internal_pk) OP_CHECKSIG OP_FALSE OP_IF "ord" push(header) OP_1
/// push(content_type) OP_0 push(payload_chunks...) OP_ENDIF`.
pub fn build_envelope_script(
    internal_pk: &XOnlyPublicKey,
    header: &CInsDescription,
    content_type: &str,
    payload: &[u8],
) -> Result<ScriptBuf, InscriptionError> {
    let header_bytes = serde_json::to_vec(header)
        .map_err(|e| InscriptionError::Internal(format!("header encode failed: {e}")))?;

    let mut builder = bitcoin::script::Builder::new()
        .push_x_only_key(internal_pk)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_FALSE)
        .push_opcode(OP_IF)
        .push_slice(push_bytes(MAGIC)?)
        .push_slice(push_bytes(&header_bytes)?)
        .push_int(1)
        .push_slice(push_bytes(content_type.as_bytes())?)
        .push_int(0);

    for chunk in payload.chunks(MAX_SCRIPT_ELEMENT_SIZE) {
        builder = builder.push_slice(push_bytes(chunk)?);
    }

    Ok(builder.push_opcode(OP_ENDIF).into_script())
}

fn push_bytes(data: &[u8]) -> Result<PushBytesBuf, InscriptionError> {
    PushBytesBuf::try_from(data.to_vec())
        .map_err(|_| InscriptionError::Internal("script push exceeds size limit".into()))
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::key::Keypair;
    use bitcoin::secp256k1::Secp256k1;

    #[test]
    fn builds_envelope_with_chunked_payload() {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut bitcoin::key::rand::thread_rng());
        let (internal_pk, _parity) = keypair.x_only_public_key();
        let header = CInsDescription::blockchain("ethereum".into(), "0xabc".into());
        let payload = vec![b'a'; MAX_SCRIPT_ELEMENT_SIZE + 10];
        let script =
            build_envelope_script(&internal_pk, &header, CONTENT_TYPE_JSON, &payload).unwrap();
        assert!(script.len() > payload.len());
        assert!(script.as_bytes().windows(MAGIC.len()).any(|w| w == MAGIC));
    }
}
