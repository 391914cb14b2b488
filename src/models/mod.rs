pub mod availability;
pub mod booking;
pub mod contact;
pub mod context;
pub mod intent;
pub mod knowledge;
pub mod message;

pub use availability::BusinessHours;
pub use booking::{Appointment, AppointmentStatus, BookingState, TimeSlot};
pub use contact::{
    BrandResearch, CalendarConnection, Client, Contact, ContactRecord, ContactStatus, Criterion,
    Workflow,
};
pub use context::{
    ConversationContext, ConversationState, ExtractedInfo, Goal, Qualification,
    QualificationStatus,
};
pub use intent::{EscalationCheck, Intent, IntentEntities, IntentResult};
pub use knowledge::WorkflowKnowledge;
pub use message::{Direction, NewMessage, StoredMessage};
