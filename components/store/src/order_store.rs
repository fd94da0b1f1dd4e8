use tokio_postgres::GenericClient;

use crate::types::{BlockAnchor, InscribeOrder, OrderStatus};

fn sql_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn sql_opt_quote(s: &Option<String>) -> String {
    match s {
        Some(v) => sql_quote(v),
        None => "NULL".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub reveal_address: String,
    pub reveal_pri_key: String,
    pub reveal_tx_raw: String,
    pub reveal_tx_value: i64,
    pub receive_address: String,
    pub created_at_ms: i64,
}

/// Inserts a freshly-built order in `Default` status. Not undo-logged:
/// order creation precedes any block seeing it, so a reorg can never need
/// to unwind it.
pub async fn create_order<T: GenericClient>(
    new_order: &NewOrder,
    client: &T,
) -> Result<InscribeOrder, String> {
    let order_id = InscribeOrder::compute_order_id(
        &new_order.reveal_address,
        &new_order.receive_address,
        new_order.created_at_ms,
    );
    let row = client
        .query_one(
            "INSERT INTO inscribe_order
                (order_id, reveal_address, reveal_pri_key, reveal_tx_raw, reveal_tx_value, receive_address, status)
             VALUES ($1, $2, $3, $4, $5, $6, 0)
             RETURNING *",
            &[
                &order_id,
                &new_order.reveal_address,
                &new_order.reveal_pri_key,
                &new_order.reveal_tx_raw,
                &new_order.reveal_tx_value,
                &new_order.receive_address,
            ],
        )
        .await
        .map_err(|e| format!("create_order: {e}"))?;
    Ok(InscribeOrder::from_pg_row(&row))
}

pub async fn find_open_by_reveal_address<T: GenericClient>(
    reveal_address: &str,
    client: &T,
) -> Result<Option<InscribeOrder>, String> {
    let row = client
        .query_opt(
            "SELECT * FROM inscribe_order WHERE reveal_address = $1 AND status = 0",
            &[&reveal_address],
        )
        .await
        .map_err(|e| format!("find_open_by_reveal_address: {e}"))?;
    Ok(row.map(|r| InscribeOrder::from_pg_row(&r)))
}

pub async fn get_by_order_id<T: GenericClient>(
    order_id: &str,
    client: &T,
) -> Result<Option<InscribeOrder>, String> {
    let row = client
        .query_opt("SELECT * FROM inscribe_order WHERE order_id = $1", &[&order_id])
        .await
        .map_err(|e| format!("get_by_order_id: {e}"))?;
    Ok(row.map(|r| InscribeOrder::from_pg_row(&r)))
}

/// Newest-first paged listing by receive address. `page` is 1-based.
pub async fn find_orders_by_receive_address<T: GenericClient>(
    receive_address: &str,
    page: i64,
    limit: i64,
    client: &T,
) -> Result<(Vec<InscribeOrder>, i64), String> {
    let total_row = client
        .query_one(
            "SELECT count(*) AS total FROM inscribe_order WHERE receive_address = $1",
            &[&receive_address],
        )
        .await
        .map_err(|e| format!("find_orders_by_receive_address count: {e}"))?;
    let total: i64 = total_row.get("total");

    let offset = limit * (page - 1).max(0);
    let rows = client
        .query(
            "SELECT * FROM inscribe_order WHERE receive_address = $1
             ORDER BY id DESC OFFSET $2 LIMIT $3",
            &[&receive_address, &offset, &limit],
        )
        .await
        .map_err(|e| format!("find_orders_by_receive_address: {e}"))?;
    Ok((rows.iter().map(InscribeOrder::from_pg_row).collect(), total))
}

pub async fn list_reveal_sent<T: GenericClient>(client: &T) -> Result<Vec<InscribeOrder>, String> {
    let rows = client
        .query("SELECT * FROM inscribe_order WHERE status = 1", &[])
        .await
        .map_err(|e| format!("list_reveal_sent: {e}"))?;
    Ok(rows.iter().map(InscribeOrder::from_pg_row).collect())
}

/// Fields a block-processor transition may set. `None` leaves the column
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct OrderTransition {
    pub reveal_tx_id: Option<String>,
    pub reveal_tx_raw: Option<String>,
    pub commit_tx_id: Option<String>,
    pub tx_id: Option<String>,
    pub tx_offset: Option<i64>,
}

/// Atomically moves `order.status -> new_status`, rejecting any edge not
/// in the state machine, and records the pre-image as an undo-log entry
/// paired with the change.
pub async fn transition<T: GenericClient>(
    height: i64,
    order_row_id: i64,
    new_status: OrderStatus,
    fields: &OrderTransition,
    client: &T,
) -> Result<InscribeOrder, String> {
    let old_row = client
        .query_opt("SELECT * FROM inscribe_order WHERE id = $1", &[&order_row_id])
        .await
        .map_err(|e| format!("transition lookup: {e}"))?
        .ok_or_else(|| format!("order {order_row_id} not found"))?;
    let old = InscribeOrder::from_pg_row(&old_row);

    if !old.status.can_transition_to(new_status) {
        return Err(format!(
            "illegal order transition {:?} -> {:?} for order {}",
            old.status, new_status, old.order_id
        ));
    }

    let updated = client
        .query_opt(
            "UPDATE inscribe_order SET
                status = $2,
                reveal_tx_id = COALESCE($3, reveal_tx_id),
                reveal_tx_raw = COALESCE($4, reveal_tx_raw),
                commit_tx_id = COALESCE($5, commit_tx_id),
                tx_id = COALESCE($6, tx_id),
                tx_offset = COALESCE($7, tx_offset),
                updated_at = now()
             WHERE id = $1 AND status = $8
             RETURNING *",
            &[
                &order_row_id,
                &new_status.as_i16(),
                &fields.reveal_tx_id,
                &fields.reveal_tx_raw,
                &fields.commit_tx_id,
                &fields.tx_id,
                &fields.tx_offset,
                &old.status.as_i16(),
            ],
        )
        .await
        .map_err(|e| format!("transition update: {e}"))?
        .ok_or_else(|| format!("order {order_row_id} changed concurrently"))?;

    let inverse = format!(
        "UPDATE inscribe_order SET status = {}, reveal_tx_id = {}, reveal_tx_raw = {}, commit_tx_id = {}, tx_id = {}, tx_offset = {} WHERE id = {}",
        old.status.as_i16(),
        sql_opt_quote(&old.reveal_tx_id),
        sql_quote(&old.reveal_tx_raw),
        sql_opt_quote(&old.commit_tx_id),
        old.inscription_id.as_ref().map(|i| sql_quote(&i.tx_id)).unwrap_or_else(|| "NULL".into()),
        old.inscription_id.as_ref().map(|i| i.offset.to_string()).unwrap_or_else(|| "NULL".into()),
        order_row_id,
    );
    append_undo(height, "inscribe_order", &inverse, client).await?;

    Ok(InscribeOrder::from_pg_row(&updated))
}

pub async fn create_anchor<T: GenericClient>(
    anchor: &BlockAnchor,
    client: &T,
) -> Result<(), String> {
    client
        .execute(
            "INSERT INTO block_parser_info (height, block_hash, parent_hash) VALUES ($1, $2, $3)",
            &[&anchor.height, &anchor.block_hash, &anchor.parent_hash],
        )
        .await
        .map_err(|e| format!("create_anchor: {e}"))?;

    let inverse = format!("DELETE FROM block_parser_info WHERE height = {}", anchor.height);
    append_undo(anchor.height, "block_parser_info", &inverse, client).await?;
    Ok(())
}

/// Prunes anchors strictly older than `threshold_height`, recording their
/// reinsertion as the undo entry for `undo_height` (mirrors the source's
/// `DeleteBlockInfo`, which files the undo entry under the caller's
/// current cursor rather than each pruned row's own height — by the time
/// a reorg could reach that far back the anchors are already gone for
/// good, so this is in practice never replayed).
pub async fn delete_anchors_before<T: GenericClient>(
    threshold_height: i64,
    undo_height: i64,
    client: &T,
) -> Result<(), String> {
    let deleted = client
        .query(
            "DELETE FROM block_parser_info WHERE height < $1 RETURNING height, block_hash, parent_hash",
            &[&threshold_height],
        )
        .await
        .map_err(|e| format!("delete_anchors_before: {e}"))?;
    if deleted.is_empty() {
        return Ok(());
    }
    for row in &deleted {
        let anchor = BlockAnchor::from_pg_row(row);
        let inverse = format!(
            "INSERT INTO block_parser_info (height, block_hash, parent_hash) VALUES ({}, {}, {})",
            anchor.height,
            sql_quote(&anchor.block_hash),
            sql_opt_quote(&anchor.parent_hash),
        );
        append_undo(undo_height, "block_parser_info", &inverse, client).await?;
    }
    Ok(())
}

pub async fn last_anchor<T: GenericClient>(client: &T) -> Result<Option<BlockAnchor>, String> {
    let row = client
        .query_opt("SELECT * FROM block_parser_info ORDER BY height DESC LIMIT 1", &[])
        .await
        .map_err(|e| format!("last_anchor: {e}"))?;
    Ok(row.map(|r| BlockAnchor::from_pg_row(&r)))
}

pub async fn anchor_at<T: GenericClient>(
    height: i64,
    client: &T,
) -> Result<Option<BlockAnchor>, String> {
    let row = client
        .query_opt("SELECT * FROM block_parser_info WHERE height = $1", &[&height])
        .await
        .map_err(|e| format!("anchor_at: {e}"))?;
    Ok(row.map(|r| BlockAnchor::from_pg_row(&r)))
}

pub async fn append_undo<T: GenericClient>(
    height: i64,
    table_name: &str,
    statement: &str,
    client: &T,
) -> Result<(), String> {
    client
        .execute(
            "INSERT INTO undo_log (height, table_name, statement) VALUES ($1, $2, $3)",
            &[&height, &table_name, &statement],
        )
        .await
        .map_err(|e| format!("append_undo: {e}"))?;
    Ok(())
}

/// Replays undo entries for heights in `(tip_height - depth, tip_height]`
/// in descending id order, then deletes those entries and anchors.
/// Returns the height processing should resume from (`tip_height - depth`).
pub async fn handle_reorg<T: GenericClient>(
    tip_height: i64,
    depth: i64,
    client: &T,
) -> Result<i64, String> {
    let from = tip_height - depth;
    let rows = client
        .query(
            "SELECT statement FROM undo_log WHERE height > $1 AND height <= $2 ORDER BY id DESC",
            &[&from, &tip_height],
        )
        .await
        .map_err(|e| format!("handle_reorg select: {e}"))?;
    for row in &rows {
        let statement: String = row.get("statement");
        client
            .execute(statement.as_str(), &[])
            .await
            .map_err(|e| format!("handle_reorg replay ({statement}): {e}"))?;
    }
    client
        .execute(
            "DELETE FROM undo_log WHERE height > $1 AND height <= $2",
            &[&from, &tip_height],
        )
        .await
        .map_err(|e| format!("handle_reorg undo cleanup: {e}"))?;
    client
        .execute(
            "DELETE FROM block_parser_info WHERE height > $1 AND height <= $2",
            &[&from, &tip_height],
        )
        .await
        .map_err(|e| format!("handle_reorg anchor cleanup: {e}"))?;
    Ok(from)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::migrations;

    /// Connects to a local Postgres and rolls the schema forward on a
    /// throwaway database. Requires `POSTGRES_TEST_URL` (or
    /// `host=localhost user=postgres password=postgres dbname=postgres`)
    /// to point at a reachable instance.
    async fn test_client() -> tokio_postgres::Client {
        let conn_str = std::env::var("POSTGRES_TEST_URL")
            .unwrap_or_else(|_| "host=localhost user=postgres password=postgres dbname=postgres".to_string());
        let (mut client, connection) = tokio_postgres::connect(&conn_str, tokio_postgres::NoTls)
            .await
            .expect("connect to test postgres");
        tokio::spawn(async move {
            let _ = connection.await;
        });
        client
            .batch_execute(
                "DROP TABLE IF EXISTS inscribe_order, block_parser_info, undo_log, pgmigrations CASCADE;",
            )
            .await
            .expect("reset schema");
        migrations::run(&mut client).await.expect("run migrations");
        client
    }

    fn sample_order(reveal_address: &str, receive_address: &str) -> NewOrder {
        NewOrder {
            reveal_address: reveal_address.to_string(),
            reveal_pri_key: "aa".repeat(32),
            reveal_tx_raw: "deadbeef".to_string(),
            reveal_tx_value: 600,
            receive_address: receive_address.to_string(),
            created_at_ms: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn at_most_one_default_order_per_reveal_address() {
        let client = test_client().await;
        create_order(&sample_order("bc1p-addr", "bc1q-a"), &client)
            .await
            .expect("first order creates");
        let second = create_order(&sample_order("bc1p-addr", "bc1q-b"), &client).await;
        assert!(second.is_err(), "a second Default order for the same reveal address must be rejected");
    }

    #[tokio::test]
    async fn transition_rejects_edges_outside_the_state_machine() {
        let client = test_client().await;
        let order = create_order(&sample_order("bc1p-1", "bc1q-1"), &client).await.unwrap();

        // Default -> Success is not an allowed edge.
        let rejected = transition(1, order.id, OrderStatus::Success, &OrderTransition::default(), &client).await;
        assert!(rejected.is_err());

        // Default -> RevealSent is allowed and should stick.
        let moved = transition(
            1,
            order.id,
            OrderStatus::RevealSent,
            &OrderTransition {
                reveal_tx_id: Some("txid123".into()),
                ..Default::default()
            },
            &client,
        )
        .await
        .expect("Default -> RevealSent is legal");
        assert_eq!(moved.status, OrderStatus::RevealSent);
        assert_eq!(moved.reveal_tx_id.as_deref(), Some("txid123"));

        // RevealSent -> FeeNotEnough is not an allowed edge.
        let rejected2 = transition(2, order.id, OrderStatus::FeeNotEnough, &OrderTransition::default(), &client).await;
        assert!(rejected2.is_err());
    }

    #[tokio::test]
    async fn undo_log_replay_is_a_left_inverse_of_forward_application() {
        let client = test_client().await;
        let order = create_order(&sample_order("bc1p-2", "bc1q-2"), &client).await.unwrap();
        let before = get_by_order_id(&order.order_id, &client).await.unwrap().unwrap();

        create_anchor(
            &BlockAnchor {
                height: 100,
                block_hash: "hash100".into(),
                parent_hash: Some("hash99".into()),
            },
            &client,
        )
        .await
        .unwrap();

        transition(
            100,
            order.id,
            OrderStatus::RevealSent,
            &OrderTransition {
                reveal_tx_id: Some("txid-abc".into()),
                ..Default::default()
            },
            &client,
        )
        .await
        .unwrap();

        // Sanity: the forward application actually took effect.
        let mid = get_by_order_id(&order.order_id, &client).await.unwrap().unwrap();
        assert_eq!(mid.status, OrderStatus::RevealSent);
        assert!(anchor_at(100, &client).await.unwrap().is_some());

        // Replay the undo log for height 100 and confirm both tables are
        // restored to their pre-application state.
        let resume_from = handle_reorg(100, 1, &client).await.unwrap();
        assert_eq!(resume_from, 99);

        let after = get_by_order_id(&order.order_id, &client).await.unwrap().unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.reveal_tx_id, before.reveal_tx_id);
        assert!(anchor_at(100, &client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn anchor_pruning_keeps_only_the_retention_window() {
        let client = test_client().await;
        for h in 1..=5 {
            create_anchor(
                &BlockAnchor {
                    height: h,
                    block_hash: format!("hash{h}"),
                    parent_hash: Some(format!("hash{}", h - 1)),
                },
                &client,
            )
            .await
            .unwrap();
        }
        delete_anchors_before(3, 5, &client).await.unwrap();
        assert!(anchor_at(1, &client).await.unwrap().is_none());
        assert!(anchor_at(2, &client).await.unwrap().is_none());
        assert!(anchor_at(3, &client).await.unwrap().is_some());
        assert!(anchor_at(5, &client).await.unwrap().is_some());
    }
}
