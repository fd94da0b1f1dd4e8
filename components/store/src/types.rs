use md5::{Digest, Md5};
use tokio_postgres::Row;

/// Order state machine. Numeric values match the `status` column's
/// existing encoding exactly so existing rows decode unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    FeeNotEnough,
    Fail,
    Default,
    RevealSent,
    Success,
}

impl OrderStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            OrderStatus::FeeNotEnough => -2,
            OrderStatus::Fail => -1,
            OrderStatus::Default => 0,
            OrderStatus::RevealSent => 1,
            OrderStatus::Success => 2,
        }
    }

    pub fn from_i16(v: i16) -> Result<OrderStatus, String> {
        match v {
            -2 => Ok(OrderStatus::FeeNotEnough),
            -1 => Ok(OrderStatus::Fail),
            0 => Ok(OrderStatus::Default),
            1 => Ok(OrderStatus::RevealSent),
            2 => Ok(OrderStatus::Success),
            other => Err(format!("unknown order status {other}")),
        }
    }

    /// `true` if transitioning `self -> next` is one of the edges the
    /// state machine allows.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Default, OrderStatus::FeeNotEnough)
                | (OrderStatus::Default, OrderStatus::RevealSent)
                | (OrderStatus::Default, OrderStatus::Fail)
                | (OrderStatus::RevealSent, OrderStatus::Success)
                | (OrderStatus::RevealSent, OrderStatus::Fail)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InscriptionId {
    pub tx_id: String,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct InscribeOrder {
    pub id: i64,
    pub order_id: String,
    pub inscription_id: Option<InscriptionId>,
    pub reveal_address: String,
    pub reveal_pri_key: String,
    pub reveal_tx_raw: String,
    pub reveal_tx_id: Option<String>,
    pub reveal_tx_value: i64,
    pub receive_address: String,
    pub commit_tx_id: Option<String>,
    pub status: OrderStatus,
    pub created_at_ms: i64,
}

impl InscribeOrder {
    /// `order_id` is a pure function of `(reveal_address, receive_address,
    /// created_ms)`: same inputs always produce the same id.
    pub fn compute_order_id(reveal_address: &str, receive_address: &str, created_at_ms: i64) -> String {
        let preimage = format!("{reveal_address}{receive_address}{created_at_ms}");
        let digest = Md5::digest(preimage.as_bytes());
        hex::encode(digest)
    }

    pub fn from_pg_row(row: &Row) -> Self {
        let tx_id: Option<String> = row.get("tx_id");
        let tx_offset: Option<i64> = row.get("tx_offset");
        InscribeOrder {
            id: row.get("id"),
            order_id: row.get("order_id"),
            inscription_id: tx_id.map(|tx_id| InscriptionId {
                tx_id,
                offset: tx_offset.unwrap_or(0),
            }),
            reveal_address: row.get("reveal_address"),
            reveal_pri_key: row.get("reveal_pri_key"),
            reveal_tx_raw: row.get("reveal_tx_raw"),
            reveal_tx_id: row.get("reveal_tx_id"),
            reveal_tx_value: row.get("reveal_tx_value"),
            receive_address: row.get("receive_address"),
            commit_tx_id: row.get("commit_tx_id"),
            status: OrderStatus::from_i16(row.get("status")).expect("invalid status in row"),
            created_at_ms: {
                let ts: std::time::SystemTime = row.get("created_at");
                ts.duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0)
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockAnchor {
    pub height: i64,
    pub block_hash: String,
    pub parent_hash: Option<String>,
}

impl BlockAnchor {
    pub fn from_pg_row(row: &Row) -> Self {
        BlockAnchor {
            height: row.get("height"),
            block_hash: row.get("block_hash"),
            parent_hash: row.get("parent_hash"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn order_id_is_a_pure_function_of_its_inputs() {
        let a = InscribeOrder::compute_order_id("bc1p-reveal", "bc1q-receive", 1_700_000_000_000);
        let b = InscribeOrder::compute_order_id("bc1p-reveal", "bc1q-receive", 1_700_000_000_000);
        assert_eq!(a, b);

        let different_address = InscribeOrder::compute_order_id("bc1p-other", "bc1q-receive", 1_700_000_000_000);
        assert_ne!(a, different_address);

        let different_timestamp = InscribeOrder::compute_order_id("bc1p-reveal", "bc1q-receive", 1_700_000_000_001);
        assert_ne!(a, different_timestamp);
    }

    #[test]
    fn status_round_trips_through_its_numeric_encoding() {
        for status in [
            OrderStatus::FeeNotEnough,
            OrderStatus::Fail,
            OrderStatus::Default,
            OrderStatus::RevealSent,
            OrderStatus::Success,
        ] {
            assert_eq!(OrderStatus::from_i16(status.as_i16()).unwrap(), status);
        }
        assert!(OrderStatus::from_i16(99).is_err());
    }

    #[test]
    fn only_the_spec_edges_are_allowed() {
        let allowed = [
            (OrderStatus::Default, OrderStatus::FeeNotEnough),
            (OrderStatus::Default, OrderStatus::RevealSent),
            (OrderStatus::Default, OrderStatus::Fail),
            (OrderStatus::RevealSent, OrderStatus::Success),
            (OrderStatus::RevealSent, OrderStatus::Fail),
        ];
        let all = [
            OrderStatus::FeeNotEnough,
            OrderStatus::Fail,
            OrderStatus::Default,
            OrderStatus::RevealSent,
            OrderStatus::Success,
        ];
        for from in all {
            for to in all {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "unexpected transition verdict for {from:?} -> {to:?}"
                );
            }
        }
        // Named explicitly: these two edges look superficially plausible
        // but are not allowed.
        assert!(!OrderStatus::Success.can_transition_to(OrderStatus::Default));
        assert!(!OrderStatus::FeeNotEnough.can_transition_to(OrderStatus::RevealSent));
    }
}
