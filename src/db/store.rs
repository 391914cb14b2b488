use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::queries;
use crate::models::{
    Appointment, CalendarConnection, ContactRecord, ContactStatus, NewMessage, StoredMessage,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conversation state for contact {0} changed during processing")]
    Conflict(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Everything one turn writes: the reply row and the contact update.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub contact_id: String,
    /// Version the state was loaded at.
    pub expected_version: i64,
    pub status: Option<ContactStatus>,
    pub conversation_context: String,
    pub last_message_at: DateTime<Utc>,
    pub message: Option<NewMessage>,
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn load_contact(&self, contact_id: &str) -> Result<Option<ContactRecord>, StoreError>;

    async fn find_contact_id_by_phone(&self, phone: &str) -> Result<Option<String>, StoreError>;

    async fn recent_messages(
        &self,
        contact_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    async fn insert_message(&self, message: &NewMessage) -> Result<String, StoreError>;

    /// Atomically persists a turn. Fails with `StoreError::Conflict` if the
    /// contact's state moved past `expected_version`.
    async fn record_turn(&self, turn: &TurnRecord) -> Result<i64, StoreError>;

    async fn calendar_connection(
        &self,
        client_id: &str,
    ) -> Result<Option<CalendarConnection>, StoreError>;

    async fn latest_confirmed_appointment(
        &self,
        contact_id: &str,
    ) -> Result<Option<Appointment>, StoreError>;

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn update_appointment(&self, appointment: &Appointment) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> anyhow::Result<T>,
    ) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
        Ok(f(&*conn)?)
    }
}

#[async_trait]
impl ContactStore for SqliteStore {
    async fn load_contact(&self, contact_id: &str) -> Result<Option<ContactRecord>, StoreError> {
        self.with_conn(|conn| queries::get_contact_record(conn, contact_id))
    }

    async fn find_contact_id_by_phone(&self, phone: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| queries::find_contact_id_by_phone(conn, phone))
    }

    async fn recent_messages(
        &self,
        contact_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        self.with_conn(|conn| queries::get_recent_messages(conn, contact_id, limit))
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<String, StoreError> {
        self.with_conn(|conn| queries::insert_message(conn, message))
    }

    async fn record_turn(&self, turn: &TurnRecord) -> Result<i64, StoreError> {
        self.with_conn(|conn| queries::record_turn(conn, turn))?
            .ok_or_else(|| StoreError::Conflict(turn.contact_id.clone()))
    }

    async fn calendar_connection(
        &self,
        client_id: &str,
    ) -> Result<Option<CalendarConnection>, StoreError> {
        self.with_conn(|conn| queries::get_calendar_connection(conn, client_id))
    }

    async fn latest_confirmed_appointment(
        &self,
        contact_id: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        self.with_conn(|conn| queries::get_latest_confirmed_appointment(conn, contact_id))
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        self.with_conn(|conn| queries::create_appointment(conn, appointment))
    }

    async fn update_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let updated = self.with_conn(|conn| queries::update_appointment(conn, appointment))?;
        if !updated {
            return Err(anyhow::anyhow!("appointment {} not found", appointment.id).into());
        }
        Ok(())
    }
}
