use auditrail_db::{create_pool, run_migrations, DbRuntimeSettings};

#[test]
fn db_initialization_works() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("auditrail.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
        .expect("failed to create pool");
    let mut conn = pool.get().expect("failed to get connection");
    let applied = run_migrations(&mut conn).expect("failed to run migrations");
    assert_eq!(applied, 3);

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .expect("failed to prepare table query");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("failed to execute table query")
        .map(|r| r.expect("failed to read table name"))
        .collect();

    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .expect("failed to read schema version");
    assert_eq!(version, 3);
    assert_eq!(
        tables,
        vec![
            "stream_entries",
            "stream_groups",
            "stream_parked",
            "stream_pending",
        ]
    );
}

#[test]
fn migrations_survive_reopen() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("auditrail.db");
    let path = path.to_str().unwrap();

    {
        let pool = create_pool(path, DbRuntimeSettings::default()).expect("pool");
        let mut conn = pool.get().expect("connection");
        assert_eq!(run_migrations(&mut conn).expect("first run"), 3);
    }

    let pool = create_pool(path, DbRuntimeSettings::default()).expect("pool");
    let mut conn = pool.get().expect("connection");
    assert_eq!(run_migrations(&mut conn).expect("second run"), 0);
}
