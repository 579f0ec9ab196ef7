use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::errors::AppError;
use crate::structs::{
    ActiveBooking, HistoryEntry, LotOverview, Occupant, ParkingLot, ReservedSpot, Role, SpotStatus,
    User,
};
use crate::utils;

/// Timestamps are stored as TEXT in this format so SQLite's date/strftime
/// helpers can read them back for the analytics queries.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const ADMIN_USERNAME: &str = "admin";

#[derive(Debug, Error)]
pub enum SignupError {
    #[error("username is already taken")]
    UsernameTaken,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum BookError {
    #[error("user already has an active booking")]
    AlreadyBooked,
    #[error("no spots available in this lot")]
    NoSpotFree,
    #[error("parking lot not found")]
    LotNotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum VacateError {
    #[error("active booking not found")]
    NotFound,
    #[error("stored parking timestamp is unparseable: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum LotError {
    #[error("a lot with this name already exists")]
    NameTaken,
    #[error("parking lot not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum DeleteLotError {
    #[error("lot has parked vehicles")]
    HasParkedVehicles,
    #[error("parking lot not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Insert the admin account on first boot. Idempotent: an existing row with
/// the admin username wins, whatever its password.
pub async fn seed_admin(pool: &SqlitePool, password: &str) -> Result<(), AppError> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
        .bind(ADMIN_USERNAME)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let pwd_hash = utils::hash_password(password)?;
    sqlx::query("INSERT INTO users (username, pwd_hash, role) VALUES (?, ?, ?)")
        .bind(ADMIN_USERNAME)
        .bind(pwd_hash)
        .bind(Role::Admin)
        .execute(pool)
        .await?;
    log::info!("Seeded admin account '{}'", ADMIN_USERNAME);
    Ok(())
}

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<User, SignupError> {
    let pwd_hash = utils::hash_password(password).map_err(|e| SignupError::Hash(e.to_string()))?;
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, pwd_hash, role) VALUES (?, ?, ?) RETURNING *",
    )
    .bind(username)
    .bind(pwd_hash)
    .bind(Role::User)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            SignupError::UsernameTaken
        } else {
            SignupError::Db(e)
        }
    })?;
    log::info!("User '{}' registered (id {})", user.username, user.id);
    Ok(user)
}

pub async fn find_user(pool: &SqlitePool, username: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
}

/// All customer accounts, for the admin user list.
pub async fn customers(pool: &SqlitePool) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE role = ? ORDER BY username")
        .bind(Role::User)
        .fetch_all(pool)
        .await
}

pub async fn lot_overviews(pool: &SqlitePool) -> Result<Vec<LotOverview>, sqlx::Error> {
    sqlx::query_as::<_, LotOverview>(
        r#"
        SELECT pl.id, pl.name, pl.price_per_hour, pl.address, pl.pincode, pl.capacity,
               (SELECT COUNT(*) FROM parking_spots ps
                 WHERE ps.lot_id = pl.id AND ps.status = 'occupied') AS occupied_spots
        FROM parking_lots pl
        ORDER BY pl.name
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn get_lot(pool: &SqlitePool, lot_id: i64) -> Result<Option<ParkingLot>, sqlx::Error> {
    sqlx::query_as::<_, ParkingLot>("SELECT * FROM parking_lots WHERE id = ?")
        .bind(lot_id)
        .fetch_optional(pool)
        .await
}

/// Insert the lot and its 1..=capacity spots in one transaction.
pub async fn create_lot(
    pool: &SqlitePool,
    name: &str,
    price_per_hour: f64,
    capacity: i64,
    address: &str,
    pincode: &str,
) -> Result<i64, LotError> {
    let mut tx = pool.begin().await?;

    let (lot_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO parking_lots (name, price_per_hour, address, pincode, capacity)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(price_per_hour)
    .bind(address)
    .bind(pincode)
    .bind(capacity)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            LotError::NameTaken
        } else {
            LotError::Db(e)
        }
    })?;

    for spot_number in 1..=capacity {
        sqlx::query("INSERT INTO parking_spots (lot_id, spot_number, status) VALUES (?, ?, ?)")
            .bind(lot_id)
            .bind(spot_number)
            .bind(SpotStatus::Available)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    log::info!("Lot '{}' created with {} spots (id {})", name, capacity, lot_id);
    Ok(lot_id)
}

/// Update the mutable lot fields. Open reservations keep the rate they
/// locked in at booking time.
pub async fn edit_lot(
    pool: &SqlitePool,
    lot_id: i64,
    name: &str,
    price_per_hour: f64,
    address: &str,
    pincode: &str,
) -> Result<(), LotError> {
    let result = sqlx::query(
        "UPDATE parking_lots SET name = ?, price_per_hour = ?, address = ?, pincode = ? WHERE id = ?",
    )
    .bind(name)
    .bind(price_per_hour)
    .bind(address)
    .bind(pincode)
    .bind(lot_id)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            LotError::NameTaken
        } else {
            LotError::Db(e)
        }
    })?;

    if result.rows_affected() == 0 {
        return Err(LotError::NotFound);
    }
    log::info!("Lot {} updated", lot_id);
    Ok(())
}

/// Delete a lot iff none of its spots is occupied. The spots go with the lot
/// (CASCADE); closed reservations survive with spot_id set to NULL.
pub async fn delete_lot(pool: &SqlitePool, lot_id: i64) -> Result<(), DeleteLotError> {
    let mut tx = pool.begin().await?;

    let (occupied,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM parking_spots WHERE lot_id = ? AND status = ?")
            .bind(lot_id)
            .bind(SpotStatus::Occupied)
            .fetch_one(&mut *tx)
            .await?;
    if occupied > 0 {
        return Err(DeleteLotError::HasParkedVehicles);
    }

    let result = sqlx::query("DELETE FROM parking_lots WHERE id = ?")
        .bind(lot_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DeleteLotError::NotFound);
    }

    tx.commit().await?;
    log::info!("Lot {} deleted", lot_id);
    Ok(())
}

pub async fn active_booking(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Option<ActiveBooking>, sqlx::Error> {
    sqlx::query_as::<_, ActiveBooking>(
        r#"
        SELECT rs.id, pl.name AS lot_name, ps.spot_number, rs.parking_timestamp, rs.cost_per_hour
        FROM reserved_spots rs
        JOIN parking_spots ps ON rs.spot_id = ps.id
        JOIN parking_lots pl ON ps.lot_id = pl.id
        WHERE rs.user_id = ? AND rs.leaving_timestamp IS NULL
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Allocate a spot in the lot for the user. The claim is a single
/// conditional UPDATE so two racing bookings can never take the same spot;
/// the partial unique index backstops the one-open-booking rule.
pub async fn book_spot(
    pool: &SqlitePool,
    lot_id: i64,
    user_id: i64,
    now: NaiveDateTime,
) -> Result<i64, BookError> {
    let mut tx = pool.begin().await?;

    let open: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM reserved_spots WHERE user_id = ? AND leaving_timestamp IS NULL",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    if open.is_some() {
        return Err(BookError::AlreadyBooked);
    }

    let price: Option<(f64,)> = sqlx::query_as("SELECT price_per_hour FROM parking_lots WHERE id = ?")
        .bind(lot_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some((price_per_hour,)) = price else {
        return Err(BookError::LotNotFound);
    };

    let claimed: Option<(i64, i64)> = sqlx::query_as(
        r#"
        UPDATE parking_spots SET status = ?
        WHERE id = (SELECT id FROM parking_spots
                     WHERE lot_id = ? AND status = ?
                     ORDER BY spot_number, id
                     LIMIT 1)
          AND status = ?
        RETURNING id, spot_number
        "#,
    )
    .bind(SpotStatus::Occupied)
    .bind(lot_id)
    .bind(SpotStatus::Available)
    .bind(SpotStatus::Available)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((spot_id, spot_number)) = claimed else {
        return Err(BookError::NoSpotFree);
    };

    sqlx::query(
        r#"
        INSERT INTO reserved_spots (spot_id, user_id, parking_timestamp, cost_per_hour)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(spot_id)
    .bind(user_id)
    .bind(now.format(TS_FORMAT).to_string())
    .bind(price_per_hour)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            BookError::AlreadyBooked
        } else {
            BookError::Db(e)
        }
    })?;

    tx.commit().await?;
    log::info!(
        "User {} booked spot {} in lot {} at {}/h",
        user_id,
        spot_number,
        lot_id,
        price_per_hour
    );
    Ok(spot_number)
}

/// Close the caller's open reservation and free its spot. Billing uses the
/// rate locked in at booking time, never the lot's current price.
pub async fn vacate_spot(
    pool: &SqlitePool,
    booking_id: i64,
    user_id: i64,
    now: NaiveDateTime,
) -> Result<f64, VacateError> {
    let mut tx = pool.begin().await?;

    let booking: Option<ReservedSpot> = sqlx::query_as(
        "SELECT * FROM reserved_spots WHERE id = ? AND user_id = ? AND leaving_timestamp IS NULL",
    )
    .bind(booking_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(booking) = booking else {
        return Err(VacateError::NotFound);
    };

    let parked_at = NaiveDateTime::parse_from_str(&booking.parking_timestamp, TS_FORMAT)?;
    let elapsed_hours = (now - parked_at).num_seconds() as f64 / 3600.0;
    let total_cost = elapsed_hours * booking.cost_per_hour;

    sqlx::query("UPDATE reserved_spots SET leaving_timestamp = ?, total_cost = ? WHERE id = ?")
        .bind(now.format(TS_FORMAT).to_string())
        .bind(total_cost)
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

    // spot_id is always present on an open reservation; the guard is only
    // against hand-edited data
    if let Some(spot_id) = booking.spot_id {
        sqlx::query("UPDATE parking_spots SET status = ? WHERE id = ?")
            .bind(SpotStatus::Available)
            .bind(spot_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    log::info!(
        "User {} vacated booking {} for a total of {:.2}",
        user_id,
        booking_id,
        total_cost
    );
    Ok(total_cost)
}

/// Closed reservations, newest first. Lot and spot come through LEFT JOINs
/// so history survives lot deletion.
pub async fn history(pool: &SqlitePool, user_id: i64) -> Result<Vec<HistoryEntry>, sqlx::Error> {
    sqlx::query_as::<_, HistoryEntry>(
        r#"
        SELECT pl.name AS lot_name, ps.spot_number,
               rs.parking_timestamp, rs.leaving_timestamp, rs.total_cost
        FROM reserved_spots rs
        LEFT JOIN parking_spots ps ON rs.spot_id = ps.id
        LEFT JOIN parking_lots pl ON ps.lot_id = pl.id
        WHERE rs.user_id = ? AND rs.leaving_timestamp IS NOT NULL
        ORDER BY rs.parking_timestamp DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn occupants(pool: &SqlitePool, lot_id: i64) -> Result<Vec<Occupant>, sqlx::Error> {
    sqlx::query_as::<_, Occupant>(
        r#"
        SELECT ps.spot_number, u.username, rs.parking_timestamp
        FROM reserved_spots rs
        JOIN parking_spots ps ON rs.spot_id = ps.id
        JOIN users u ON rs.user_id = u.id
        WHERE ps.lot_id = ? AND rs.leaving_timestamp IS NULL
        ORDER BY ps.spot_number
        "#,
    )
    .bind(lot_id)
    .fetch_all(pool)
    .await
}

/// Booking count per lot for one user, for the most-used-lot chart.
pub async fn most_used_lots(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT pl.name, COUNT(rs.id)
        FROM reserved_spots rs
        JOIN parking_spots ps ON rs.spot_id = ps.id
        JOIN parking_lots pl ON ps.lot_id = pl.id
        WHERE rs.user_id = ?
        GROUP BY pl.name
        ORDER BY pl.name
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Total billed cost per calendar month for one user.
pub async fn monthly_cost(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Vec<(String, f64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT strftime('%Y-%m', leaving_timestamp) AS month, SUM(total_cost)
        FROM reserved_spots
        WHERE user_id = ? AND leaving_timestamp IS NOT NULL
        GROUP BY month
        ORDER BY month
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Bookings started today (local time), grouped by hour of day. Hours with
/// no bookings are absent; the handler zero-fills the 24 slots.
pub async fn bookings_per_hour_today(pool: &SqlitePool) -> Result<Vec<(i64, i64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT CAST(strftime('%H', parking_timestamp) AS INTEGER) AS hour, COUNT(id)
        FROM reserved_spots
        WHERE date(parking_timestamp) = date('now', 'localtime')
        GROUP BY hour
        ORDER BY hour
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Occupied-spot count per lot, busiest first.
pub async fn lot_occupancy(pool: &SqlitePool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT pl.name, COUNT(ps.id) AS occupied_count
        FROM parking_lots pl
        LEFT JOIN parking_spots ps ON pl.id = ps.lot_id AND ps.status = 'occupied'
        GROUP BY pl.id
        ORDER BY occupied_count DESC
        "#,
    )
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::ParkingSpot;
    use chrono::Duration;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn test_pool() -> SqlitePool {
        // one connection so every query sees the same in-memory database
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        sqlx::migrate!().run(&pool).await.unwrap();
        pool
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TS_FORMAT).unwrap()
    }

    async fn signup(pool: &SqlitePool, username: &str) -> User {
        create_user(pool, username, "hunter2hunter2").await.unwrap()
    }

    async fn lot_spots(pool: &SqlitePool, lot_id: i64) -> Vec<ParkingSpot> {
        sqlx::query_as::<_, ParkingSpot>(
            "SELECT * FROM parking_spots WHERE lot_id = ? ORDER BY spot_number",
        )
        .bind(lot_id)
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_lot_provisions_numbered_spots() {
        let pool = test_pool().await;
        let lot_id = create_lot(&pool, "Center Garage", 12.5, 4, "Main St 1", "10115")
            .await
            .unwrap();

        let spots = lot_spots(&pool, lot_id).await;
        assert_eq!(spots.len(), 4);
        for (i, spot) in spots.iter().enumerate() {
            assert_eq!(spot.spot_number, i as i64 + 1);
            assert_eq!(spot.status, SpotStatus::Available);
        }
    }

    #[tokio::test]
    async fn duplicate_lot_name_is_a_distinct_conflict() {
        let pool = test_pool().await;
        create_lot(&pool, "Center Garage", 10.0, 2, "", "").await.unwrap();
        let err = create_lot(&pool, "Center Garage", 8.0, 3, "", "")
            .await
            .unwrap_err();
        assert!(matches!(err, LotError::NameTaken));
        // the failed attempt must not leave partial spot rows behind
        let (spots,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM parking_spots")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(spots, 2);
    }

    #[tokio::test]
    async fn booking_claims_lowest_numbered_spot_and_locks_rate() {
        let pool = test_pool().await;
        let user = signup(&pool, "alice").await;
        let lot_id = create_lot(&pool, "Center Garage", 10.0, 3, "", "").await.unwrap();

        let spot_number = book_spot(&pool, lot_id, user.id, ts("2026-08-07 08:00:00"))
            .await
            .unwrap();
        assert_eq!(spot_number, 1);

        let spots = lot_spots(&pool, lot_id).await;
        assert_eq!(spots[0].status, SpotStatus::Occupied);
        assert_eq!(spots[1].status, SpotStatus::Available);

        let booking = active_booking(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(booking.spot_number, 1);
        assert_eq!(booking.lot_name, "Center Garage");
        assert_eq!(booking.cost_per_hour, 10.0);
    }

    #[tokio::test]
    async fn second_booking_for_same_user_is_rejected() {
        let pool = test_pool().await;
        let user = signup(&pool, "alice").await;
        let lot_id = create_lot(&pool, "Center Garage", 10.0, 3, "", "").await.unwrap();

        book_spot(&pool, lot_id, user.id, ts("2026-08-07 08:00:00")).await.unwrap();
        let err = book_spot(&pool, lot_id, user.id, ts("2026-08-07 09:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookError::AlreadyBooked));

        // still exactly one open reservation
        let (open,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM reserved_spots WHERE user_id = ? AND leaving_timestamp IS NULL",
        )
        .bind(user.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(open, 1);
    }

    #[tokio::test]
    async fn open_booking_invariant_holds_at_the_store_level() {
        // even code that skips the application check cannot commit a second
        // open reservation; the partial unique index rejects it
        let pool = test_pool().await;
        let user = signup(&pool, "alice").await;
        let lot_id = create_lot(&pool, "Center Garage", 10.0, 3, "", "").await.unwrap();
        book_spot(&pool, lot_id, user.id, ts("2026-08-07 08:00:00")).await.unwrap();

        let err = sqlx::query(
            "INSERT INTO reserved_spots (spot_id, user_id, parking_timestamp, cost_per_hour)
             VALUES ((SELECT id FROM parking_spots WHERE lot_id = ? AND spot_number = 2), ?, ?, 10.0)",
        )
        .bind(lot_id)
        .bind(user.id)
        .bind("2026-08-07 09:00:00")
        .execute(&pool)
        .await
        .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn booking_a_full_lot_mutates_nothing() {
        let pool = test_pool().await;
        let alice = signup(&pool, "alice").await;
        let bob = signup(&pool, "bob").await;
        let lot_id = create_lot(&pool, "Tiny Lot", 5.0, 1, "", "").await.unwrap();

        book_spot(&pool, lot_id, alice.id, ts("2026-08-07 08:00:00")).await.unwrap();
        let err = book_spot(&pool, lot_id, bob.id, ts("2026-08-07 08:05:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookError::NoSpotFree));

        let (reservations,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reserved_spots")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(reservations, 1);
        assert!(active_booking(&pool, bob.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn booking_an_unknown_lot_mutates_nothing() {
        let pool = test_pool().await;
        let user = signup(&pool, "alice").await;
        let err = book_spot(&pool, 999, user.id, ts("2026-08-07 08:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookError::LotNotFound));
    }

    #[tokio::test]
    async fn billing_uses_the_rate_locked_at_booking_time() {
        let pool = test_pool().await;
        let user = signup(&pool, "alice").await;
        let lot_id = create_lot(&pool, "Center Garage", 10.0, 2, "", "").await.unwrap();

        book_spot(&pool, lot_id, user.id, ts("2026-08-07 08:00:00")).await.unwrap();
        let booking = active_booking(&pool, user.id).await.unwrap().unwrap();

        // a price hike after booking must not affect the open reservation
        edit_lot(&pool, lot_id, "Center Garage", 99.0, "", "").await.unwrap();

        let total = vacate_spot(&pool, booking.id, user.id, ts("2026-08-07 10:00:00"))
            .await
            .unwrap();
        assert!((total - 20.0).abs() < 1e-9);

        let spots = lot_spots(&pool, lot_id).await;
        assert_eq!(spots[0].status, SpotStatus::Available);

        let entries = history(&pool, user.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!((entries[0].total_cost - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sub_minute_stay_bills_near_zero_without_a_floor() {
        let pool = test_pool().await;
        let user = signup(&pool, "alice").await;
        let lot_id = create_lot(&pool, "Center Garage", 60.0, 1, "", "").await.unwrap();

        book_spot(&pool, lot_id, user.id, ts("2026-08-07 08:00:00")).await.unwrap();
        let booking = active_booking(&pool, user.id).await.unwrap().unwrap();
        let total = vacate_spot(&pool, booking.id, user.id, ts("2026-08-07 08:00:30"))
            .await
            .unwrap();
        assert!((total - 0.5).abs() < 1e-9); // 30s at 60/h
    }

    #[tokio::test]
    async fn vacating_a_foreign_or_closed_booking_is_not_found() {
        let pool = test_pool().await;
        let alice = signup(&pool, "alice").await;
        let bob = signup(&pool, "bob").await;
        let lot_id = create_lot(&pool, "Center Garage", 10.0, 2, "", "").await.unwrap();

        book_spot(&pool, lot_id, alice.id, ts("2026-08-07 08:00:00")).await.unwrap();
        let booking = active_booking(&pool, alice.id).await.unwrap().unwrap();

        let err = vacate_spot(&pool, booking.id, bob.id, ts("2026-08-07 09:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, VacateError::NotFound));

        vacate_spot(&pool, booking.id, alice.id, ts("2026-08-07 09:00:00")).await.unwrap();
        // closed is terminal; vacating again fails
        let err = vacate_spot(&pool, booking.id, alice.id, ts("2026-08-07 10:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, VacateError::NotFound));
    }

    #[tokio::test]
    async fn lot_with_parked_vehicles_cannot_be_deleted() {
        let pool = test_pool().await;
        let user = signup(&pool, "alice").await;
        let lot_id = create_lot(&pool, "Center Garage", 10.0, 2, "", "").await.unwrap();
        book_spot(&pool, lot_id, user.id, ts("2026-08-07 08:00:00")).await.unwrap();

        let err = delete_lot(&pool, lot_id).await.unwrap_err();
        assert!(matches!(err, DeleteLotError::HasParkedVehicles));
        assert!(get_lot(&pool, lot_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deleting_an_idle_lot_removes_spots_and_keeps_history() {
        let pool = test_pool().await;
        let user = signup(&pool, "alice").await;
        let lot_id = create_lot(&pool, "Center Garage", 10.0, 2, "", "").await.unwrap();

        book_spot(&pool, lot_id, user.id, ts("2026-08-07 08:00:00")).await.unwrap();
        let booking = active_booking(&pool, user.id).await.unwrap().unwrap();
        vacate_spot(&pool, booking.id, user.id, ts("2026-08-07 09:00:00")).await.unwrap();

        delete_lot(&pool, lot_id).await.unwrap();

        assert!(get_lot(&pool, lot_id).await.unwrap().is_none());
        let (spots,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM parking_spots WHERE lot_id = ?")
            .bind(lot_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(spots, 0);

        // the closed reservation survives with its spot reference nulled
        let entries = history(&pool, user.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].lot_name.is_none());
        assert!(entries[0].spot_number.is_none());
    }

    #[tokio::test]
    async fn two_spot_lot_scenario() {
        // create lot price=10 capacity=2; three users contend, first vacates
        // after 2h for a 20.0 bill and frees the spot for the third
        let pool = test_pool().await;
        let u1 = signup(&pool, "user1").await;
        let u2 = signup(&pool, "user2").await;
        let u3 = signup(&pool, "user3").await;
        let lot_id = create_lot(&pool, "A", 10.0, 2, "", "").await.unwrap();
        let t0 = ts("2026-08-07 08:00:00");

        book_spot(&pool, lot_id, u1.id, t0).await.unwrap();
        let lots = lot_overviews(&pool).await.unwrap();
        assert_eq!(lots[0].occupied_spots, 1);

        book_spot(&pool, lot_id, u2.id, t0).await.unwrap();
        let lots = lot_overviews(&pool).await.unwrap();
        assert_eq!(lots[0].occupied_spots, 2);

        let err = book_spot(&pool, lot_id, u3.id, t0).await.unwrap_err();
        assert!(matches!(err, BookError::NoSpotFree));

        let booking = active_booking(&pool, u1.id).await.unwrap().unwrap();
        let total = vacate_spot(&pool, booking.id, u1.id, t0 + Duration::hours(2))
            .await
            .unwrap();
        assert!((total - 20.0).abs() < 1e-9);

        let spot = book_spot(&pool, lot_id, u3.id, t0 + Duration::hours(2)).await.unwrap();
        assert_eq!(spot, 1); // user1's freed spot, lowest number first
    }

    #[tokio::test]
    async fn signup_rejects_taken_usernames() {
        let pool = test_pool().await;
        signup(&pool, "alice").await;
        let err = create_user(&pool, "alice", "another-pass").await.unwrap_err();
        assert!(matches!(err, SignupError::UsernameTaken));
    }

    #[tokio::test]
    async fn seeded_admin_is_idempotent_and_can_log_in() {
        let pool = test_pool().await;
        seed_admin(&pool, "first-password").await.unwrap();
        seed_admin(&pool, "second-password").await.unwrap();

        let admin = find_user(&pool, ADMIN_USERNAME).await.unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(utils::verify_password("first-password", &admin.pwd_hash));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(ADMIN_USERNAME)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn customers_lists_only_user_role_accounts() {
        let pool = test_pool().await;
        seed_admin(&pool, "pw").await.unwrap();
        signup(&pool, "bob").await;
        signup(&pool, "alice").await;

        let users = customers(&pool).await.unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn monthly_cost_groups_closed_bookings_by_month() {
        let pool = test_pool().await;
        let user = signup(&pool, "alice").await;
        let lot_id = create_lot(&pool, "A", 10.0, 1, "", "").await.unwrap();

        for (start, end) in [
            ("2026-06-01 08:00:00", "2026-06-01 10:00:00"),
            ("2026-06-10 08:00:00", "2026-06-10 09:00:00"),
            ("2026-07-01 08:00:00", "2026-07-01 12:00:00"),
        ] {
            book_spot(&pool, lot_id, user.id, ts(start)).await.unwrap();
            let booking = active_booking(&pool, user.id).await.unwrap().unwrap();
            vacate_spot(&pool, booking.id, user.id, ts(end)).await.unwrap();
        }

        let months = monthly_cost(&pool, user.id).await.unwrap();
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].0, "2026-06");
        assert!((months[0].1 - 30.0).abs() < 1e-9);
        assert_eq!(months[1].0, "2026-07");
        assert!((months[1].1 - 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn lot_occupancy_counts_only_occupied_spots() {
        let pool = test_pool().await;
        let alice = signup(&pool, "alice").await;
        let busy = create_lot(&pool, "Busy", 10.0, 2, "", "").await.unwrap();
        create_lot(&pool, "Empty", 10.0, 2, "", "").await.unwrap();
        book_spot(&pool, busy, alice.id, ts("2026-08-07 08:00:00")).await.unwrap();

        let occupancy = lot_occupancy(&pool).await.unwrap();
        assert_eq!(occupancy[0], ("Busy".to_owned(), 1));
        assert_eq!(occupancy[1], ("Empty".to_owned(), 0));
    }
}
