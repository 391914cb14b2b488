use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::TurnRecord;
use crate::models::{
    Appointment, AppointmentStatus, BrandResearch, CalendarConnection, Client, Contact,
    ContactRecord, ContactStatus, Criterion, Direction, NewMessage, StoredMessage, Workflow,
};

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|r| serde_json::from_str(&r).ok())
        .unwrap_or_default()
}

// ── Contacts ──

const CONTACT_RECORD_SELECT: &str = "SELECT
        c.id, c.client_id, c.workflow_id, c.name, c.phone, c.email, c.channel, c.status,
        c.conversation_context, c.state_version, c.last_message_at,
        w.id, w.name, w.is_active, w.criteria, w.goal, w.tone, w.dos, w.donts, w.custom_instructions,
        cl.id, cl.name, cl.timezone, cl.business_hours, cl.brand_research, cl.operator_phone
     FROM contacts c
     JOIN workflows w ON w.id = c.workflow_id
     JOIN clients cl ON cl.id = c.client_id";

fn contact_record_from_row(row: &Row) -> rusqlite::Result<ContactRecord> {
    let status: String = row.get(7)?;
    let last_message_at: Option<String> = row.get(10)?;
    let criteria: Option<String> = row.get(14)?;
    let brand_research: Option<String> = row.get(24)?;

    Ok(ContactRecord {
        contact: Contact {
            id: row.get(0)?,
            client_id: row.get(1)?,
            workflow_id: row.get(2)?,
            name: row.get(3)?,
            phone: row.get(4)?,
            email: row.get(5)?,
            channel: row.get(6)?,
            status: ContactStatus::parse(&status),
            conversation_context: row.get(8)?,
            state_version: row.get(9)?,
            last_message_at: last_message_at.as_deref().and_then(parse_ts),
        },
        workflow: Workflow {
            id: row.get(11)?,
            name: row.get(12)?,
            is_active: row.get(13)?,
            criteria: Criterion::list_from_json(criteria.as_deref()),
            goal: row.get(15)?,
            tone: row.get(16)?,
            dos: string_list(row.get(17)?),
            donts: string_list(row.get(18)?),
            custom_instructions: row.get(19)?,
        },
        client: Client {
            id: row.get(20)?,
            name: row.get(21)?,
            timezone: row.get(22)?,
            business_hours: row.get(23)?,
            brand_research: brand_research
                .and_then(|r| serde_json::from_str::<BrandResearch>(&r).ok()),
            operator_phone: row.get(25)?,
        },
    })
}

pub fn get_contact_record(conn: &Connection, id: &str) -> anyhow::Result<Option<ContactRecord>> {
    let sql = format!("{CONTACT_RECORD_SELECT} WHERE c.id = ?1");
    let record = conn
        .query_row(&sql, [id], contact_record_from_row)
        .optional()?;
    Ok(record)
}

/// Most recently active contact for a phone number.
pub fn find_contact_id_by_phone(conn: &Connection, phone: &str) -> anyhow::Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM contacts WHERE phone = ?1
             ORDER BY last_message_at DESC NULLS LAST, created_at DESC LIMIT 1",
            [phone],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn create_contact(conn: &Connection, contact: &Contact) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO contacts (id, client_id, workflow_id, name, phone, email, channel, status,
                               conversation_context, state_version, last_message_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            contact.id,
            contact.client_id,
            contact.workflow_id,
            contact.name,
            contact.phone,
            contact.email,
            contact.channel,
            contact.status.as_str(),
            contact.conversation_context,
            contact.state_version,
            contact.last_message_at.map(ts),
        ],
    )?;
    Ok(())
}

pub fn create_client(conn: &Connection, client: &Client) -> anyhow::Result<()> {
    let brand_research = client
        .brand_research
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO clients (id, name, timezone, business_hours, brand_research, operator_phone)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            client.id,
            client.name,
            client.timezone,
            client.business_hours,
            brand_research,
            client.operator_phone,
        ],
    )?;
    Ok(())
}

pub fn create_workflow(conn: &Connection, client_id: &str, workflow: &Workflow) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workflows (id, client_id, name, is_active, criteria, goal, tone, dos, donts,
                                custom_instructions)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            workflow.id,
            client_id,
            workflow.name,
            workflow.is_active,
            serde_json::to_string(&workflow.criteria)?,
            workflow.goal,
            workflow.tone,
            serde_json::to_string(&workflow.dos)?,
            serde_json::to_string(&workflow.donts)?,
            workflow.custom_instructions,
        ],
    )?;
    Ok(())
}

// ── Messages ──

/// The latest `limit` messages for a contact, oldest first.
pub fn get_recent_messages(
    conn: &Connection,
    contact_id: &str,
    limit: usize,
) -> anyhow::Result<Vec<StoredMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, contact_id, direction, content, created_at FROM messages
         WHERE contact_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
    )?;

    let mut messages = stmt
        .query_map(params![contact_id, limit as i64], |row| {
            let direction: String = row.get(2)?;
            let created_at: String = row.get(4)?;
            Ok(StoredMessage {
                id: row.get(0)?,
                contact_id: row.get(1)?,
                direction: Direction::parse(&direction),
                content: row.get(3)?,
                created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    messages.reverse();
    Ok(messages)
}

pub fn insert_message(conn: &Connection, message: &NewMessage) -> anyhow::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO messages (id, contact_id, direction, channel, content, status, ai_generated,
                               tokens_used, input_tokens, output_tokens, ai_model, ai_cost, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            id,
            message.contact_id,
            message.direction.as_str(),
            message.channel,
            message.content,
            message.status,
            message.ai_generated,
            message.tokens_used(),
            message.input_tokens,
            message.output_tokens,
            message.ai_model,
            message.ai_cost,
            ts(Utc::now()),
        ],
    )?;
    Ok(id)
}

/// Writes the reply and the contact update in one transaction. Returns the
/// new state version, or `None` when `expected_version` is stale.
pub fn record_turn(conn: &Connection, turn: &TurnRecord) -> anyhow::Result<Option<i64>> {
    let tx = conn.unchecked_transaction()?;

    let updated = tx.execute(
        "UPDATE contacts
         SET status = COALESCE(?1, status),
             conversation_context = ?2,
             last_message_at = ?3,
             state_version = state_version + 1
         WHERE id = ?4 AND state_version = ?5",
        params![
            turn.status.map(|s| s.as_str()),
            turn.conversation_context,
            ts(turn.last_message_at),
            turn.contact_id,
            turn.expected_version,
        ],
    )?;

    if updated == 0 {
        tx.rollback()?;
        return Ok(None);
    }

    if let Some(message) = &turn.message {
        insert_message(&tx, message)?;
    }

    tx.commit()?;
    Ok(Some(turn.expected_version + 1))
}

// ── Calendar ──

pub fn get_calendar_connection(
    conn: &Connection,
    client_id: &str,
) -> anyhow::Result<Option<CalendarConnection>> {
    let connection = conn
        .query_row(
            "SELECT client_id, calendar_id, access_token FROM calendar_connections WHERE client_id = ?1",
            [client_id],
            |row| {
                Ok(CalendarConnection {
                    client_id: row.get(0)?,
                    calendar_id: row.get(1)?,
                    access_token: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(connection)
}

pub fn save_calendar_connection(conn: &Connection, connection: &CalendarConnection) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO calendar_connections (client_id, calendar_id, access_token)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(client_id) DO UPDATE SET
            calendar_id = excluded.calendar_id,
            access_token = excluded.access_token,
            updated_at = datetime('now')",
        params![connection.client_id, connection.calendar_id, connection.access_token],
    )?;
    Ok(())
}

// ── Appointments ──

const APPOINTMENT_SELECT: &str = "SELECT id, contact_id, workflow_id, client_id, calendar_event_id,
        start_time, end_time, status, notes FROM appointments";

fn appointment_from_row(row: &Row) -> rusqlite::Result<Appointment> {
    let start: String = row.get(5)?;
    let end: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(Appointment {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        workflow_id: row.get(2)?,
        client_id: row.get(3)?,
        calendar_event_id: row.get(4)?,
        start_time: parse_ts(&start).unwrap_or_else(Utc::now),
        end_time: parse_ts(&end).unwrap_or_else(Utc::now),
        status: AppointmentStatus::parse(&status),
        notes: row.get(8)?,
    })
}

pub fn get_latest_confirmed_appointment(
    conn: &Connection,
    contact_id: &str,
) -> anyhow::Result<Option<Appointment>> {
    let sql = format!(
        "{APPOINTMENT_SELECT} WHERE contact_id = ?1 AND status = 'confirmed'
         ORDER BY start_time DESC LIMIT 1"
    );
    let appointment = conn
        .query_row(&sql, [contact_id], appointment_from_row)
        .optional()?;
    Ok(appointment)
}

pub fn get_appointments_for_contact(
    conn: &Connection,
    contact_id: &str,
) -> anyhow::Result<Vec<Appointment>> {
    let sql = format!("{APPOINTMENT_SELECT} WHERE contact_id = ?1 ORDER BY start_time");
    let mut stmt = conn.prepare(&sql)?;
    let appointments = stmt
        .query_map([contact_id], appointment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(appointments)
}

pub fn create_appointment(conn: &Connection, appointment: &Appointment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO appointments (id, contact_id, workflow_id, client_id, calendar_event_id,
                                   start_time, end_time, status, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            appointment.id,
            appointment.contact_id,
            appointment.workflow_id,
            appointment.client_id,
            appointment.calendar_event_id,
            ts(appointment.start_time),
            ts(appointment.end_time),
            appointment.status.as_str(),
            appointment.notes,
        ],
    )?;
    Ok(())
}

pub fn update_appointment(conn: &Connection, appointment: &Appointment) -> anyhow::Result<bool> {
    let updated = conn.execute(
        "UPDATE appointments
         SET calendar_event_id = ?1, start_time = ?2, end_time = ?3, status = ?4, notes = ?5,
             updated_at = datetime('now')
         WHERE id = ?6",
        params![
            appointment.calendar_event_id,
            ts(appointment.start_time),
            ts(appointment.end_time),
            appointment.status.as_str(),
            appointment.notes,
            appointment.id,
        ],
    )?;
    Ok(updated > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::TimeZone;

    fn seed(conn: &Connection) {
        create_client(
            conn,
            &Client {
                id: "cl1".into(),
                name: "Acme Solar".into(),
                timezone: "America/Chicago".into(),
                business_hours: None,
                brand_research: Some(BrandResearch {
                    company_overview: Some("Residential solar installs".into()),
                    ..Default::default()
                }),
                operator_phone: Some("+15550001111".into()),
            },
        )
        .unwrap();
        create_workflow(
            conn,
            "cl1",
            &Workflow {
                id: "wf1".into(),
                name: "Inbound leads".into(),
                is_active: true,
                criteria: vec![Criterion {
                    id: "owner".into(),
                    text: "Owns their home".into(),
                }],
                goal: None,
                tone: Some("friendly".into()),
                dos: vec!["Be brief".into()],
                donts: vec![],
                custom_instructions: None,
            },
        )
        .unwrap();
        create_contact(
            conn,
            &Contact {
                id: "ct1".into(),
                client_id: "cl1".into(),
                workflow_id: "wf1".into(),
                name: Some("Dana".into()),
                phone: "+15551234567".into(),
                email: None,
                channel: "sms".into(),
                status: ContactStatus::Contacted,
                conversation_context: None,
                state_version: 0,
                last_message_at: None,
            },
        )
        .unwrap();
    }

    fn turn(version: i64, context: &str) -> TurnRecord {
        TurnRecord {
            contact_id: "ct1".into(),
            expected_version: version,
            status: Some(ContactStatus::InConversation),
            conversation_context: context.into(),
            last_message_at: Utc.with_ymd_and_hms(2025, 6, 16, 15, 0, 0).unwrap(),
            message: Some(NewMessage::canned("ct1", "sms", "Hi Dana!")),
        }
    }

    #[test]
    fn test_contact_record_round_trip() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn);

        let record = get_contact_record(&conn, "ct1").unwrap().unwrap();
        assert_eq!(record.contact.status, ContactStatus::Contacted);
        assert_eq!(record.workflow.criteria[0].id, "owner");
        assert_eq!(record.workflow.dos, vec!["Be brief".to_string()]);
        assert_eq!(record.client.timezone, "America/Chicago");
        assert!(record.client.brand_research.is_some());

        assert!(get_contact_record(&conn, "missing").unwrap().is_none());
        assert_eq!(
            find_contact_id_by_phone(&conn, "+15551234567").unwrap().as_deref(),
            Some("ct1")
        );
    }

    #[test]
    fn test_record_turn_is_atomic_and_versioned() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn);

        assert_eq!(record_turn(&conn, &turn(0, "{\"version\":2}")).unwrap(), Some(1));

        // A second writer holding the old version loses.
        assert_eq!(record_turn(&conn, &turn(0, "{\"stale\":true}")).unwrap(), None);

        let record = get_contact_record(&conn, "ct1").unwrap().unwrap();
        assert_eq!(record.contact.state_version, 1);
        assert_eq!(record.contact.status, ContactStatus::InConversation);
        assert_eq!(record.contact.conversation_context.as_deref(), Some("{\"version\":2}"));

        let messages = get_recent_messages(&conn, "ct1", 10).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].direction, Direction::Outbound);
    }

    #[test]
    fn test_recent_messages_oldest_first() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn);
        for body in ["one", "two", "three"] {
            insert_message(&conn, &NewMessage::inbound("ct1", "sms", body)).unwrap();
        }
        let messages = get_recent_messages(&conn, "ct1", 2).unwrap();
        let bodies: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(bodies, vec!["two", "three"]);
    }

    #[test]
    fn test_appointments() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn);

        let mut appointment = Appointment {
            id: "ap1".into(),
            contact_id: "ct1".into(),
            workflow_id: "wf1".into(),
            client_id: "cl1".into(),
            calendar_event_id: None,
            start_time: Utc.with_ymd_and_hms(2025, 6, 16, 15, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2025, 6, 16, 15, 30, 0).unwrap(),
            status: AppointmentStatus::Confirmed,
            notes: None,
        };
        create_appointment(&conn, &appointment).unwrap();

        appointment.start_time = Utc.with_ymd_and_hms(2025, 6, 17, 15, 0, 0).unwrap();
        appointment.end_time = Utc.with_ymd_and_hms(2025, 6, 17, 15, 30, 0).unwrap();
        appointment.calendar_event_id = Some("evt1".into());
        assert!(update_appointment(&conn, &appointment).unwrap());

        let latest = get_latest_confirmed_appointment(&conn, "ct1").unwrap().unwrap();
        assert_eq!(latest.start_time, appointment.start_time);
        assert_eq!(latest.calendar_event_id.as_deref(), Some("evt1"));
        assert_eq!(get_appointments_for_contact(&conn, "ct1").unwrap().len(), 1);
    }

    #[test]
    fn test_calendar_connection_upsert() {
        let conn = db::init_db(":memory:").unwrap();
        seed(&conn);
        assert!(get_calendar_connection(&conn, "cl1").unwrap().is_none());

        for token in ["t1", "t2"] {
            save_calendar_connection(
                &conn,
                &CalendarConnection {
                    client_id: "cl1".into(),
                    calendar_id: "primary".into(),
                    access_token: token.into(),
                },
            )
            .unwrap();
        }
        let connection = get_calendar_connection(&conn, "cl1").unwrap().unwrap();
        assert_eq!(connection.access_token, "t2");
    }
}
