use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SpotStatus {
    Available,
    Occupied,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub pwd_hash: String,
    pub role: Role,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct ParkingLot {
    pub id: i64,
    pub name: String,
    pub price_per_hour: f64,
    pub address: String,
    pub pincode: String,
    pub capacity: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct ParkingSpot {
    pub id: i64,
    pub lot_id: i64,
    pub spot_number: i64,
    pub status: SpotStatus,
}

/// One reservation record. Timestamps are `%Y-%m-%d %H:%M:%S` TEXT.
/// `spot_id` goes NULL if the lot is deleted after the booking closed.
#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct ReservedSpot {
    pub id: i64,
    pub spot_id: Option<i64>,
    pub user_id: i64,
    pub parking_timestamp: String,
    pub leaving_timestamp: Option<String>,
    pub cost_per_hour: f64,
    pub total_cost: Option<f64>,
}

/// Lot row joined with its live occupied-spot count, for both dashboards.
#[derive(Serialize, Debug, Clone, FromRow)]
pub struct LotOverview {
    pub id: i64,
    pub name: String,
    pub price_per_hour: f64,
    pub address: String,
    pub pincode: String,
    pub capacity: i64,
    pub occupied_spots: i64,
}

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct ActiveBooking {
    pub id: i64,
    pub lot_name: String,
    pub spot_number: i64,
    pub parking_timestamp: String,
    pub cost_per_hour: f64,
}

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct HistoryEntry {
    pub lot_name: Option<String>,
    pub spot_number: Option<i64>,
    pub parking_timestamp: String,
    pub leaving_timestamp: String,
    pub total_cost: f64,
}

/// Who is parked where, shown per lot on the admin dashboard.
#[derive(Serialize, Debug, Clone, FromRow)]
pub struct Occupant {
    pub spot_number: i64,
    pub username: String,
    pub parking_timestamp: String,
}
