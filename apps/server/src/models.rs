use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

// ── Enums stored as TEXT ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Customer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Busy,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_active(self) -> bool {
        self != AppointmentStatus::Cancelled
    }
}

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub user_id: i64,
    pub role: Role,
    pub first_name: String,
    pub username: Option<String>,
    pub phone: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Salon {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub address: String,
    pub phone: String,
    pub slot_interval_minutes: i64,
    pub is_approved: bool,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub salon_id: i64,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub duration_min: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkingHours {
    pub salon_id: i64,
    /// 0 = Monday … 6 = Sunday.
    pub weekday: i64,
    pub is_open: bool,
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Slot {
    pub id: i64,
    pub salon_id: i64,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: SlotStatus,
    /// Active appointment occupying this slot, if any.
    pub appointment_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Appointment {
    pub id: i64,
    pub salon_id: i64,
    pub slot_id: Option<i64>,
    pub customer_id: i64,
    pub service_id: Option<i64>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub status: AppointmentStatus,
    pub notes: String,
    pub cancellation_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Appointment joined with salon, service and customer names for listings.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentDetail {
    pub id: i64,
    pub salon_id: i64,
    pub salon_name: String,
    pub slot_id: Option<i64>,
    pub customer_id: i64,
    pub customer_name: String,
    pub customer_username: Option<String>,
    pub service_name: Option<String>,
    pub service_duration_min: Option<i64>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub status: AppointmentStatus,
    pub notes: String,
    pub cancellation_reason: Option<String>,
    pub created_at: String,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub role: Role,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSalonRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub address: String,
    #[serde(default)]
    pub phone: String,
    pub slot_interval_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateIntervalRequest {
    pub slot_interval_minutes: i64,
}

#[derive(Debug, Deserialize)]
pub struct WorkingHoursEntry {
    pub weekday: i64,
    pub is_open: bool,
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkingHoursRequest {
    pub days: Vec<WorkingHoursEntry>,
}

#[derive(Debug, Serialize)]
pub struct WorkingHoursUpdated {
    pub hours: Vec<WorkingHours>,
    pub regenerated_weekdays: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: i64,
    pub duration_min: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub duration_min: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub salon_id: i64,
    pub service_id: Option<i64>,
    pub slot_id: Option<i64>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub status: Option<AppointmentStatus>,
    pub slot_id: Option<i64>,
    pub service_id: Option<i64>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct OptionalDateQuery {
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SalonOverview {
    pub salon: Salon,
    pub services: Vec<Service>,
    pub working_hours: Vec<WorkingHours>,
}

/// Bookable slot as shown to customers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableSlot {
    pub id: i64,
    pub start_label: String,
    pub end_label: String,
}

/// Slot merged with active appointment coverage, for the owner calendar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotOverlay {
    pub id: i64,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub status: SlotStatus,
    pub has_appointment: bool,
}

#[derive(Debug, Serialize)]
pub struct MyAppointments {
    pub future: Vec<AppointmentDetail>,
    pub past: Vec<AppointmentDetail>,
}

/// Result of a mutation that may also have tried to notify someone.
#[derive(Debug, Serialize)]
pub struct WithWarning<T: Serialize> {
    #[serde(flatten)]
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Telegram auth ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}
