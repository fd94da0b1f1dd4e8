use refinery::embed_migrations;

embed_migrations!("migrations");

/// Runs the order-store schema migrations (`inscribe_order`,
/// `block_parser_info`, `undo_log`). The indexer database is external and
/// read-only; it carries no migrations here.
pub async fn run(client: &mut tokio_postgres::Client) -> Result<(), String> {
    migrations::runner()
        .set_migration_table_name("pgmigrations")
        .run_async(client)
        .await
        .map(|_| ())
        .map_err(|e| format!("error running store migrations: {e}"))
}
