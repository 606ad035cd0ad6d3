//! Postgres store tests. Run with a reachable server:
//! `DATABASE_URL=postgres://... cargo test -- --ignored`

use sqlx::PgPool;

use fleet_tracker::{
    database::{Database, HistoryQuery, LocationStore, StationStore},
    models::LocationReading,
};

async fn insert_station(pool: &PgPool, name: &str, latitude: f64, longitude: f64) {
    sqlx::query("INSERT INTO bus_stations (name, latitude, longitude) VALUES ($1, $2, $3)")
        .bind(name)
        .bind(latitude)
        .bind(longitude)
        .execute(pool)
        .await
        .unwrap();
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_append_location(pool: PgPool) {
    let db = Database::new(pool.clone()).await.unwrap();
    let reading = LocationReading::new("B1234XYZ", -6.2088, 106.8456, 1_700_000_000);

    let stored = db
        .append_location(&reading)
        .await
        .expect("Failed to insert location")
        .expect("New reading should be stored");
    assert_eq!(stored.reading, reading);

    let row: (String, f64, f64, i64) = sqlx::query_as(
        "SELECT vehicle_id, latitude, longitude, captured_at FROM vehicle_locations WHERE id = $1",
    )
    .bind(stored.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row, ("B1234XYZ".to_string(), -6.2088, 106.8456, 1_700_000_000));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_duplicate_reading_is_stored_once(pool: PgPool) {
    let db = Database::new(pool.clone()).await.unwrap();
    let reading = LocationReading::new("B1234XYZ", -6.2088, 106.8456, 1_700_000_000);

    assert!(db.append_location(&reading).await.unwrap().is_some());
    assert!(db.append_location(&reading).await.unwrap().is_none());

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vehicle_locations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_latest_location(pool: PgPool) {
    let db = Database::new(pool).await.unwrap();

    assert!(db.latest_location("B1234XYZ").await.unwrap().is_none());

    // Inserted out of capture order
    for ts in [20, 30, 10] {
        let reading = LocationReading::new("B1234XYZ", -6.2, 106.8, ts);
        db.append_location(&reading).await.unwrap();
    }
    db.append_location(&LocationReading::new("OTHER", 0.0, 0.0, 99))
        .await
        .unwrap();

    let latest = db.latest_location("B1234XYZ").await.unwrap().unwrap();
    assert_eq!(latest.reading.captured_at, 30);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_location_history_window_and_paging(pool: PgPool) {
    let db = Database::new(pool).await.unwrap();
    for ts in 1..=15 {
        let reading = LocationReading::new("B1234XYZ", -6.2, 106.8, ts);
        db.append_location(&reading).await.unwrap();
    }

    let captured = |rows: Vec<fleet_tracker::models::StoredLocation>| {
        rows.iter().map(|r| r.reading.captured_at).collect::<Vec<_>>()
    };

    let first_page = db
        .location_history("B1234XYZ", &HistoryQuery::default())
        .await
        .unwrap();
    assert_eq!(captured(first_page), (1..=10).collect::<Vec<_>>());

    let window = HistoryQuery {
        start: Some(5),
        end: Some(12),
        limit: Some(3),
        offset: Some(2),
    };
    let rows = db.location_history("B1234XYZ", &window).await.unwrap();
    assert_eq!(captured(rows), vec![7, 8, 9]);

    let empty = db
        .location_history("UNKNOWN", &HistoryQuery::default())
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_list_stations(pool: PgPool) {
    let db = Database::new(pool.clone()).await.unwrap();
    assert!(db.list_stations().await.unwrap().is_empty());

    insert_station(&pool, "Harmoni", -6.2090, 106.8459).await;
    insert_station(&pool, "Monas", -6.1754, 106.8272).await;

    let stations = db.list_stations().await.unwrap();
    let names: Vec<&str> = stations.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Harmoni", "Monas"]);
    assert_eq!(stations[0].latitude, -6.2090);
    assert_eq!(stations[0].longitude, 106.8459);
}
