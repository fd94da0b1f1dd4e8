use serde::Serialize;

pub const PROTOCOL_CBRC20: &str = "c-brc-20";
pub const OPERATION_DEPLOY: &str = "deploy";
pub const DECIMALS_DEFAULT: u8 = 18;

/// JSON payload of a c-brc-20 deploy inscription: `{p, op, tick, max, lim,
/// dec}`.
#[derive(Serialize, Debug, Clone)]
pub struct CBrc20Deploy {
    pub p: &'static str,
    pub op: &'static str,
    pub tick: String,
    pub max: String,
    pub lim: String,
    pub dec: u8,
}

impl CBrc20Deploy {
    pub fn new(ticker: String, total_supply: String, limit_per_mint: String) -> Self {
        CBrc20Deploy {
            p: PROTOCOL_CBRC20,
            op: OPERATION_DEPLOY,
            tick: ticker,
            max: total_supply,
            lim: limit_per_mint,
            dec: DECIMALS_DEFAULT,
        }
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("CBrc20Deploy always serializes")
    }
}
