//! Slot negotiation: offers calendar availability, interprets the contact's
//! pick, and turns it into an appointment (or moves an existing one).

pub mod parse;
pub mod phrases;
pub mod slots;

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::db::{ContactStore, StoreError};
use crate::models::{
    Appointment, AppointmentStatus, BookingState, BusinessHours, CalendarConnection,
    ContactRecord, TimeSlot,
};
use crate::services::calendar::{CalendarEvent, CalendarProvider};
use parse::{DayRef, Ordinal, TimeMention};
use phrases::{render, PhrasePicker};

#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub lookahead_days: u32,
    pub slot_minutes: u32,
    pub max_offered: usize,
    /// Offers per booking flow before the contact is asked for a preference.
    pub max_offer_attempts: u32,
    pub min_notice_minutes: i64,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            lookahead_days: 7,
            slot_minutes: 30,
            max_offered: 4,
            max_offer_attempts: 2,
            min_notice_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingOutcome {
    pub message: Option<String>,
    pub state: BookingState,
    /// The free-form reply should answer this turn instead.
    pub continue_with_ai: bool,
    /// Slots are still on the table; the free-form reply must not claim a booking.
    pub booking_pending: bool,
    pub appointment: Option<Appointment>,
}

impl BookingOutcome {
    fn reply(message: String, state: BookingState) -> Self {
        Self {
            message: Some(message),
            state,
            continue_with_ai: false,
            booking_pending: false,
            appointment: None,
        }
    }

    fn defer(state: BookingState, booking_pending: bool) -> Self {
        Self {
            message: None,
            state,
            continue_with_ai: true,
            booking_pending,
            appointment: None,
        }
    }
}

/// What the contact referred to, however it was expressed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub ordinal: Option<Ordinal>,
    pub affirmative: bool,
    pub day: Option<DayRef>,
    pub time: Option<TimeMention>,
}

impl Selection {
    pub fn from_message(message: &str) -> Self {
        Self {
            ordinal: parse::parse_ordinal(message),
            affirmative: parse::is_affirmative(message),
            day: parse::parse_day(message),
            time: parse::parse_time(message),
        }
    }

    pub fn from_tool(
        slot_index: Option<usize>,
        day_preference: Option<&str>,
        time_24h: Option<&str>,
    ) -> Self {
        Self {
            ordinal: slot_index.map(Ordinal::Index),
            affirmative: false,
            day: day_preference
                .and_then(parse::canonical_day)
                .map(DayRef::Weekday),
            time: time_24h.and_then(TimeMention::from_24h),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Book(TimeSlot),
    /// Nothing matched exactly; `slot` is the closest offered one.
    Alternative { requested: String, slot: TimeSlot },
    DayChoices { day: String, slots: Vec<TimeSlot> },
    NoSlotsOnDay { day: String },
    WhichDay { time: String, slots: Vec<TimeSlot> },
    Clarify,
    Unrecognized,
}

fn day_label(day: DayRef) -> String {
    match day {
        DayRef::Weekday(w) => parse::weekday_name(w).to_string(),
        DayRef::Today => "today".to_string(),
        DayRef::Tomorrow => "tomorrow".to_string(),
    }
}

fn on_day(slot: &TimeSlot, day: DayRef, tz: Tz, today: NaiveDate) -> bool {
    let date = slots::local_date(slot, tz);
    match day {
        DayRef::Weekday(w) => date.weekday() == w,
        DayRef::Today => date == today,
        DayRef::Tomorrow => today.succ_opt() == Some(date),
    }
}

/// Distance in minutes from the slot's start to the nearest candidate time,
/// with the candidate that achieved it.
fn time_distance(slot: &TimeSlot, candidates: &[u32], tz: Tz) -> (u32, u32) {
    let minutes = slots::local_minutes(slot, tz);
    candidates
        .iter()
        .map(|c| (minutes.abs_diff(*c), *c))
        .min()
        .unwrap_or((u32::MAX, 0))
}

/// Maps a selection onto the offered slots. Only ever returns slots that
/// were offered.
pub fn resolve(state: &BookingState, selection: &Selection, tz: Tz, today: NaiveDate) -> Resolution {
    let offered = &state.offered_slots;
    if offered.is_empty() {
        return Resolution::Unrecognized;
    }

    if let Some(ordinal) = selection.ordinal {
        let index = match ordinal {
            Ordinal::Index(n) => n.checked_sub(1),
            Ordinal::Last => Some(offered.len() - 1),
        };
        return match index.and_then(|i| offered.get(i)) {
            Some(slot) => Resolution::Book(slot.clone()),
            None => Resolution::Clarify,
        };
    }

    match (selection.day, selection.time) {
        (Some(day), Some(time)) => {
            let candidates = time.candidates();
            let closest = offered
                .iter()
                .filter(|s| on_day(s, day, tz, today))
                .map(|s| (time_distance(s, &candidates, tz), s))
                .min_by_key(|((distance, _), _)| *distance);
            match closest {
                None => Resolution::NoSlotsOnDay { day: day_label(day) },
                Some(((0, _), slot)) => Resolution::Book(slot.clone()),
                Some(((_, wanted), slot)) => Resolution::Alternative {
                    requested: format!("{} at {}", day_label(day), slots::format_time(wanted)),
                    slot: slot.clone(),
                },
            }
        }
        (None, Some(time)) => {
            let candidates = time.candidates();
            let exact: Vec<TimeSlot> = offered
                .iter()
                .filter(|s| candidates.contains(&slots::local_minutes(s, tz)))
                .cloned()
                .collect();
            match exact.len() {
                1 => Resolution::Book(exact[0].clone()),
                0 => {
                    let Some(((_, wanted), slot)) = offered
                        .iter()
                        .map(|s| (time_distance(s, &candidates, tz), s))
                        .min_by_key(|((distance, _), _)| *distance)
                    else {
                        return Resolution::Clarify;
                    };
                    Resolution::Alternative {
                        requested: slots::format_time(wanted),
                        slot: slot.clone(),
                    }
                }
                _ => Resolution::WhichDay {
                    time: slots::format_time(slots::local_minutes(&exact[0], tz)),
                    slots: exact,
                },
            }
        }
        (Some(day), None) => {
            let matching: Vec<TimeSlot> = offered
                .iter()
                .filter(|s| on_day(s, day, tz, today))
                .cloned()
                .collect();
            if matching.is_empty() {
                Resolution::NoSlotsOnDay { day: day_label(day) }
            } else {
                Resolution::DayChoices {
                    day: day_label(day),
                    slots: matching,
                }
            }
        }
        (None, None) if selection.affirmative => {
            if let Some(slot) = &state.last_offered_slot {
                Resolution::Book(slot.clone())
            } else if offered.len() == 1 {
                Resolution::Book(offered[0].clone())
            } else {
                Resolution::Clarify
            }
        }
        (None, None) => Resolution::Unrecognized,
    }
}

fn bullet_list(slots: &[TimeSlot]) -> String {
    slots
        .iter()
        .map(|s| format!("- {}", s.formatted))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct BookingHandler {
    calendar: Arc<dyn CalendarProvider>,
    store: Arc<dyn ContactStore>,
    phrases: Arc<dyn PhrasePicker>,
    settings: BookingSettings,
}

impl BookingHandler {
    pub fn new(
        calendar: Arc<dyn CalendarProvider>,
        store: Arc<dyn ContactStore>,
        phrases: Arc<dyn PhrasePicker>,
        settings: BookingSettings,
    ) -> Self {
        Self {
            calendar,
            store,
            phrases,
            settings,
        }
    }

    pub async fn connection(&self, client_id: &str) -> Result<Option<CalendarConnection>, StoreError> {
        self.store.calendar_connection(client_id).await
    }

    async fn available_slots(
        &self,
        connection: &CalendarConnection,
        record: &ContactRecord,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<TimeSlot>> {
        let earliest = now + Duration::minutes(self.settings.min_notice_minutes);
        let until = earliest + Duration::days(i64::from(self.settings.lookahead_days) + 1);
        let busy = self
            .calendar
            .get_free_busy(connection, earliest, until)
            .await?;
        let hours = BusinessHours::from_config(record.client.business_hours.as_deref());
        Ok(slots::generate_slots(
            &hours,
            record.client.tz(),
            &busy,
            earliest,
            self.settings.lookahead_days,
            self.settings.slot_minutes,
        ))
    }

    fn no_availability(&self, state: &BookingState) -> BookingOutcome {
        BookingOutcome::reply(
            render(self.phrases.as_ref(), phrases::NO_AVAILABILITY, &[]),
            BookingState {
                offer_attempts: state.offer_attempts + 1,
                ..state.clone()
            },
        )
    }

    /// Starts a booking flow with a fresh set of slots.
    pub async fn offer_time_slots(
        &self,
        record: &ContactRecord,
        state: &BookingState,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, StoreError> {
        let contact_id = record.contact.id.as_str();
        let Some(connection) = self.connection(&record.client.id).await? else {
            return Ok(BookingOutcome::defer(state.clone(), false));
        };

        let available = match self.available_slots(&connection, record, now).await {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!(contact_id, error = %e, "availability lookup failed");
                return Ok(BookingOutcome::defer(state.clone(), false));
            }
        };

        if available.is_empty() {
            tracing::info!(contact_id, "no availability in lookahead window");
            let mut outcome = self.no_availability(state);
            outcome.state.is_active = false;
            return Ok(outcome);
        }

        let offered = slots::select_diverse(&available, self.settings.max_offered, record.client.tz());
        let message = render(
            self.phrases.as_ref(),
            phrases::OFFER,
            &[("slots", &slots::format_slot_list(&offered))],
        );
        tracing::info!(contact_id, offered = offered.len(), "offering time slots");

        Ok(BookingOutcome::reply(
            message,
            BookingState {
                is_active: true,
                offered_slots: offered,
                slots_offered_at: Some(now),
                selected_slot: None,
                offer_attempts: state.offer_attempts + 1,
                last_offered_slot: None,
                is_rescheduling: false,
                existing_appointment_id: None,
                existing_calendar_event_id: None,
            },
        ))
    }

    /// Re-offers availability excluding what was already offered, or asks
    /// for a preference once the offer cap is reached.
    pub async fn offer_different_times(
        &self,
        record: &ContactRecord,
        state: &BookingState,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, StoreError> {
        if state.offer_attempts >= self.settings.max_offer_attempts {
            return Ok(BookingOutcome::reply(
                render(self.phrases.as_ref(), phrases::ASK_PREFERENCE, &[]),
                state.clone(),
            ));
        }

        let Some(connection) = self.connection(&record.client.id).await? else {
            return Ok(BookingOutcome::defer(state.clone(), state.is_offering()));
        };

        let available = match self.available_slots(&connection, record, now).await {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!(contact_id = %record.contact.id, error = %e, "availability lookup failed");
                return Ok(BookingOutcome::defer(state.clone(), state.is_offering()));
            }
        };

        let fresh: Vec<TimeSlot> = available
            .into_iter()
            .filter(|s| !state.offered_slots.contains(s))
            .collect();
        if fresh.is_empty() {
            return Ok(self.no_availability(state));
        }

        let offered = slots::select_diverse(&fresh, self.settings.max_offered, record.client.tz());
        let templates = if state.is_rescheduling {
            phrases::RESCHEDULE_OFFER
        } else {
            phrases::OFFER
        };
        let message = render(
            self.phrases.as_ref(),
            templates,
            &[("slots", &slots::format_slot_list(&offered))],
        );

        Ok(BookingOutcome::reply(
            message,
            BookingState {
                is_active: true,
                offered_slots: offered,
                slots_offered_at: Some(now),
                offer_attempts: state.offer_attempts + 1,
                last_offered_slot: None,
                ..state.clone()
            },
        ))
    }

    /// Interprets a free-text reply while slots are on the table.
    pub async fn handle_time_selection(
        &self,
        record: &ContactRecord,
        message: &str,
        state: &BookingState,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, StoreError> {
        if !state.is_offering() {
            return Ok(BookingOutcome::defer(state.clone(), false));
        }
        let tz = record.client.tz();
        let today = now.with_timezone(&tz).date_naive();
        let resolution = resolve(state, &Selection::from_message(message), tz, today);
        self.apply(record, state, resolution, now).await
    }

    /// `select_time_slot` tool call.
    pub async fn select_time_slot(
        &self,
        record: &ContactRecord,
        state: &BookingState,
        selection: &Selection,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, StoreError> {
        let tz = record.client.tz();
        let today = now.with_timezone(&tz).date_naive();
        let resolution = match resolve(state, selection, tz, today) {
            Resolution::Unrecognized if state.is_offering() => Resolution::Clarify,
            other => other,
        };
        self.apply(record, state, resolution, now).await
    }

    /// `confirm_booking` tool call: books the most recently offered slot.
    pub async fn confirm_booking(
        &self,
        record: &ContactRecord,
        state: &BookingState,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, StoreError> {
        let selection = Selection {
            affirmative: true,
            ..Selection::default()
        };
        self.select_time_slot(record, state, &selection, now).await
    }

    async fn apply(
        &self,
        record: &ContactRecord,
        state: &BookingState,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, StoreError> {
        let picker = self.phrases.as_ref();
        let outcome = match resolution {
            Resolution::Book(slot) => return self.book(record, state, &slot, now).await,
            Resolution::Alternative { requested, slot } => BookingOutcome::reply(
                render(
                    picker,
                    phrases::ALTERNATIVE,
                    &[("requested", &requested), ("slot", &slot.formatted)],
                ),
                BookingState {
                    last_offered_slot: Some(slot),
                    ..state.clone()
                },
            ),
            Resolution::DayChoices { day, slots } if slots.len() == 1 => BookingOutcome::reply(
                render(
                    picker,
                    phrases::DAY_SINGLE,
                    &[("day", &day), ("slot", &slots[0].formatted)],
                ),
                BookingState {
                    last_offered_slot: Some(slots[0].clone()),
                    ..state.clone()
                },
            ),
            Resolution::DayChoices { day, slots } => BookingOutcome::reply(
                render(
                    picker,
                    phrases::DAY_CHOICES,
                    &[("day", &day), ("slots", &bullet_list(&slots))],
                ),
                BookingState {
                    last_offered_slot: None,
                    ..state.clone()
                },
            ),
            Resolution::NoSlotsOnDay { day } => BookingOutcome::reply(
                render(
                    picker,
                    phrases::NO_SLOTS_ON_DAY,
                    &[("day", &day), ("slots", &slots::format_slot_list(&state.offered_slots))],
                ),
                BookingState {
                    last_offered_slot: None,
                    ..state.clone()
                },
            ),
            Resolution::WhichDay { time, slots } => BookingOutcome::reply(
                render(
                    picker,
                    phrases::WHICH_DAY,
                    &[("time", &time), ("slots", &bullet_list(&slots))],
                ),
                BookingState {
                    last_offered_slot: None,
                    ..state.clone()
                },
            ),
            Resolution::Clarify => BookingOutcome::reply(
                render(
                    picker,
                    phrases::CLARIFY,
                    &[("slots", &slots::format_slot_list(&state.offered_slots))],
                ),
                state.clone(),
            ),
            Resolution::Unrecognized => BookingOutcome::defer(state.clone(), true),
        };
        Ok(outcome)
    }

    /// Writes the calendar event (best effort) and the appointment row.
    async fn book(
        &self,
        record: &ContactRecord,
        state: &BookingState,
        slot: &TimeSlot,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, StoreError> {
        let contact = &record.contact;
        let client = &record.client;
        let existing_id = state
            .existing_appointment_id
            .clone()
            .filter(|_| state.is_rescheduling);

        let event = CalendarEvent {
            summary: format!("{} <> {}", contact.display_name(), client.name),
            description: format!(
                "Booked over {} with {} ({}) on {}.",
                contact.channel,
                contact.display_name(),
                contact.phone,
                now.format("%Y-%m-%d")
            ),
            start: slot.start,
            end: slot.end,
            attendee_email: contact.email.clone(),
            attendee_name: contact.name.clone(),
            time_zone: Some(client.timezone.clone()),
        };

        let calendar_event_id = match self.connection(&client.id).await? {
            None => None,
            Some(connection) => {
                let result = match (&existing_id, state.existing_calendar_event_id.as_deref()) {
                    (Some(_), Some(event_id)) => {
                        self.calendar.update_event(&connection, event_id, &event).await
                    }
                    _ => self.calendar.create_event(&connection, &event).await,
                };
                match result {
                    Ok(created) => Some(created.id),
                    Err(e) => {
                        tracing::warn!(
                            contact_id = %contact.id,
                            error = %e,
                            "calendar write failed, saving appointment without event"
                        );
                        None
                    }
                }
            }
        };

        let rescheduled = existing_id.is_some();
        let appointment = Appointment {
            id: existing_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            contact_id: contact.id.clone(),
            workflow_id: record.workflow.id.clone(),
            client_id: client.id.clone(),
            calendar_event_id,
            start_time: slot.start,
            end_time: slot.end,
            status: AppointmentStatus::Confirmed,
            notes: Some(if rescheduled {
                format!("Rescheduled via {} conversation", contact.channel)
            } else {
                format!("Booked via {} conversation", contact.channel)
            }),
        };

        if rescheduled {
            self.store.update_appointment(&appointment).await?;
        } else {
            self.store.insert_appointment(&appointment).await?;
        }
        tracing::info!(
            contact_id = %contact.id,
            appointment_id = %appointment.id,
            rescheduled,
            "appointment booked"
        );

        let templates = if rescheduled {
            phrases::RESCHEDULED
        } else {
            phrases::CONFIRMED
        };
        Ok(BookingOutcome {
            message: Some(render(
                self.phrases.as_ref(),
                templates,
                &[("slot", &slot.formatted)],
            )),
            // Offer is closed; only the booked slot is kept.
            state: BookingState {
                selected_slot: Some(slot.clone()),
                ..BookingState::default()
            },
            continue_with_ai: false,
            booking_pending: false,
            appointment: Some(appointment),
        })
    }

    /// Offers new times for the contact's latest confirmed appointment,
    /// narrowed to a day named in `message` when one is.
    pub async fn start_reschedule(
        &self,
        record: &ContactRecord,
        message: &str,
        state: &BookingState,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, StoreError> {
        let contact_id = record.contact.id.as_str();
        let Some(existing) = self.store.latest_confirmed_appointment(contact_id).await? else {
            return Ok(BookingOutcome::reply(
                render(self.phrases.as_ref(), phrases::NO_APPOINTMENT, &[]),
                state.clone(),
            ));
        };
        let Some(connection) = self.connection(&record.client.id).await? else {
            return Ok(BookingOutcome::defer(state.clone(), false));
        };

        let available = match self.available_slots(&connection, record, now).await {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!(contact_id, error = %e, "availability lookup failed");
                return Ok(BookingOutcome::defer(state.clone(), false));
            }
        };
        let available: Vec<TimeSlot> = available
            .into_iter()
            .filter(|s| s.start != existing.start_time)
            .collect();

        let tz = record.client.tz();
        let today = now.with_timezone(&tz).date_naive();
        let pool = match parse::parse_day(message) {
            Some(day) => {
                let on_requested: Vec<TimeSlot> = available
                    .iter()
                    .filter(|s| on_day(s, day, tz, today))
                    .cloned()
                    .collect();
                if on_requested.is_empty() {
                    available
                } else {
                    on_requested
                }
            }
            None => available,
        };

        if pool.is_empty() {
            return Ok(self.no_availability(state));
        }

        let offered = slots::select_diverse(&pool, self.settings.max_offered, tz);
        let message = render(
            self.phrases.as_ref(),
            phrases::RESCHEDULE_OFFER,
            &[("slots", &slots::format_slot_list(&offered))],
        );
        tracing::info!(contact_id, appointment_id = %existing.id, "offering reschedule slots");

        Ok(BookingOutcome::reply(
            message,
            BookingState {
                is_active: true,
                offered_slots: offered,
                slots_offered_at: Some(now),
                selected_slot: None,
                offer_attempts: state.offer_attempts + 1,
                last_offered_slot: None,
                is_rescheduling: true,
                existing_appointment_id: Some(existing.id),
                existing_calendar_event_id: existing.calendar_event_id,
            },
        ))
    }
}
