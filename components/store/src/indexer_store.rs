use tokio_postgres::types::ToSql;
use tokio_postgres::{GenericClient, Row};

/// A row from the upstream indexer's `inscriptions` table, read-only from
/// this workspace's point of view.
#[derive(Debug, Clone)]
pub struct IndexedInscription {
    pub tx_id: String,
    pub offset: i64,
    pub inscription_number: i64,
}

impl IndexedInscription {
    fn from_pg_row(row: &Row) -> Self {
        IndexedInscription {
            tx_id: row.get("tx_id"),
            offset: row.get("offset"),
            inscription_number: row.get("inscription_number"),
        }
    }
}

/// A row as returned by the explorer search/listing surface. Joined with
/// `protocol` when the search narrows to a ticker.
#[derive(Debug, Clone)]
pub struct InscriptionSummary {
    pub inscription_number: i64,
    pub tx_id: String,
    pub offset: i64,
    pub content_type: String,
    pub content_length: i64,
    pub owner_address: String,
}

impl InscriptionSummary {
    fn from_pg_row(row: &Row) -> Self {
        InscriptionSummary {
            inscription_number: row.get("inscription_num"),
            tx_id: row.get("tx_id"),
            offset: row.get("offset"),
            content_type: row.get("content_type"),
            content_length: row.get("content_size"),
            owner_address: row.get("owner"),
        }
    }
}

/// Looks up an inscription by its outpoint (`tx_id`, `offset`) in the
/// upstream indexer's database. Absence is not an error: it just means
/// the indexer hasn't caught up yet.
pub async fn get_inscription_by_id<T: GenericClient>(
    tx_id: &str,
    offset: i64,
    client: &T,
) -> Result<Option<IndexedInscription>, String> {
    let row = client
        .query_opt(
            "SELECT tx_id, \"offset\", inscription_number FROM inscriptions WHERE tx_id = $1 AND \"offset\" = $2",
            &[&tx_id, &offset],
        )
        .await
        .map_err(|e| format!("get_inscription_by_id: {e}"))?;
    Ok(row.map(|r| IndexedInscription::from_pg_row(&r)))
}

pub async fn get_inscription_by_number<T: GenericClient>(
    inscription_number: i64,
    client: &T,
) -> Result<Option<IndexedInscription>, String> {
    let row = client
        .query_opt(
            "SELECT tx_id, \"offset\", inscription_number FROM inscriptions WHERE inscription_number = $1",
            &[&inscription_number],
        )
        .await
        .map_err(|e| format!("get_inscription_by_number: {e}"))?;
    Ok(row.map(|r| IndexedInscription::from_pg_row(&r)))
}

/// `/home/page/statistics`: total inscriptions indexed so far.
pub async fn inscriptions_count<T: GenericClient>(client: &T) -> Result<i64, String> {
    let row = client
        .query_one("SELECT count(*) AS total FROM inscriptions", &[])
        .await
        .map_err(|e| format!("inscriptions_count: {e}"))?;
    Ok(row.get("total"))
}

/// Sum of `content_size` across every indexed inscription.
pub async fn inscriptions_stored_data<T: GenericClient>(client: &T) -> Result<i64, String> {
    let row = client
        .query_one("SELECT coalesce(sum(content_size), 0) AS total FROM inscriptions", &[])
        .await
        .map_err(|e| format!("inscriptions_stored_data: {e}"))?;
    Ok(row.get("total"))
}

/// Sum of `fee` across every indexed inscription.
pub async fn inscriptions_total_fees<T: GenericClient>(client: &T) -> Result<i64, String> {
    let row = client
        .query_one("SELECT coalesce(sum(fee), 0) AS total FROM inscriptions", &[])
        .await
        .map_err(|e| format!("inscriptions_total_fees: {e}"))?;
    Ok(row.get("total"))
}

/// `/r/blockheight`: highest height the indexer has processed.
pub async fn block_height<T: GenericClient>(client: &T) -> Result<Option<i64>, String> {
    let row = client
        .query_opt("SELECT max(height) AS height FROM block_info", &[])
        .await
        .map_err(|e| format!("block_height: {e}"))?;
    Ok(row.and_then(|r| r.get("height")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOrder {
    Newest,
    Oldest,
}

#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub ticker: Option<String>,
    pub owner: Option<String>,
    pub content_types: Vec<String>,
    pub inscription_type: Option<String>,
    pub cursed_only: bool,
    pub page: i64,
    pub limit: i64,
    pub order: Option<SearchOrder>,
}

/// Paged, filterable listing backing `POST /inscriptions` once the
/// caller's search term has been classified as a ticker (or left empty).
/// Filter set: ticker (via a join against `protocol`), owner address,
/// content type, `cursed` charm (inscription_num < 0), inscription_type.
/// Every filter is bound as a fixed-position, nullable parameter (`$n IS
/// NULL OR col = $n`) so the query text never changes shape with the
/// filter combination in play.
pub async fn search_inscriptions<T: GenericClient>(
    params: &SearchParams,
    client: &T,
) -> Result<(Vec<InscriptionSummary>, i64), String> {
    let ticker: Option<&str> = params.ticker.as_deref();
    let owner: Option<&str> = params.owner.as_deref();
    let inscription_type: Option<&str> = params.inscription_type.as_deref();
    let content_types = &params.content_types;
    let where_clause = "
        FROM inscriptions
        LEFT JOIN protocol ON inscriptions.sequence_num = protocol.sequence_num
        WHERE ($1::text IS NULL OR (protocol.protocol = 'c-brc-20' AND protocol.ticker = $1))
          AND ($2::text IS NULL OR inscriptions.owner = $2)
          AND ($3::text IS NULL OR inscriptions.content_protocol = $3)
          AND ($4::text[] = '{}' OR inscriptions.content_type = ANY($4))
          AND ($5::bool = false OR inscriptions.inscription_num < 0)";

    let count_args: &[&(dyn ToSql + Sync)] =
        &[&ticker, &owner, &inscription_type, content_types, &params.cursed_only];
    let total_row = client
        .query_one(&format!("SELECT count(*) AS total {where_clause}"), count_args)
        .await
        .map_err(|e| format!("search_inscriptions count: {e}"))?;
    let total: i64 = total_row.get("total");

    let order_by = match params.order {
        Some(SearchOrder::Oldest) => "inscriptions.id ASC",
        _ => "inscriptions.id DESC",
    };
    let offset = params.limit * (params.page - 1).max(0);
    let query = format!(
        "SELECT inscriptions.inscription_num, inscriptions.tx_id, inscriptions.\"offset\",
                inscriptions.content_type, inscriptions.content_size, inscriptions.owner
         {where_clause} ORDER BY {order_by} OFFSET $6 LIMIT $7"
    );
    let query_args: &[&(dyn ToSql + Sync)] = &[
        &ticker,
        &owner,
        &inscription_type,
        content_types,
        &params.cursed_only,
        &offset,
        &params.limit,
    ];
    let rows = client
        .query(&query, query_args)
        .await
        .map_err(|e| format!("search_inscriptions: {e}"))?;
    Ok((rows.iter().map(InscriptionSummary::from_pg_row).collect(), total))
}
