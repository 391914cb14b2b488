//! Template tables for booking replies and the strategy that picks among them.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait PhrasePicker: Send + Sync {
    /// Index in `0..count`. `count` is never zero.
    fn pick(&self, count: usize) -> usize;
}

pub struct RandomPhrases {
    rng: Mutex<StdRng>,
}

impl RandomPhrases {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomPhrases {
    fn default() -> Self {
        Self::new()
    }
}

impl PhrasePicker for RandomPhrases {
    fn pick(&self, count: usize) -> usize {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..count.max(1)),
            Err(_) => 0,
        }
    }
}

/// Always the first template.
pub struct FirstPhrase;

impl PhrasePicker for FirstPhrase {
    fn pick(&self, _count: usize) -> usize {
        0
    }
}

pub const OFFER: &[&str] = &[
    "Great! Here are a few times that work:\n{slots}\nWhich one suits you best?",
    "I'd love to set up a quick call. I have these openings:\n{slots}\nDo any of these work for you?",
    "Let's get something on the calendar. Available times:\n{slots}\nJust reply with the one you prefer.",
];

pub const RESCHEDULE_OFFER: &[&str] = &[
    "No problem, let's find a new time. Here's what's open:\n{slots}\nWhich works better?",
    "Sure thing. These times are available:\n{slots}\nWhich would you like instead?",
];

pub const CONFIRMED: &[&str] = &[
    "You're all set for {slot}. You'll get a calendar invite shortly.",
    "Perfect, I've booked {slot} for you. Looking forward to it!",
    "Done! See you {slot}.",
];

pub const RESCHEDULED: &[&str] = &[
    "All set, your appointment has been moved to {slot}.",
    "Done! You're now booked for {slot} instead.",
];

pub const ALTERNATIVE: &[&str] = &[
    "I don't have {requested} open, but {slot} is available. Would that work?",
    "{requested} is taken. The closest I have is {slot}. Should I book that?",
];

pub const DAY_CHOICES: &[&str] = &[
    "On {day} I have:\n{slots}\nWhich time works best?",
    "Here's what's open on {day}:\n{slots}\nWhich would you like?",
];

pub const DAY_SINGLE: &[&str] = &[
    "On {day} I have {slot}. Shall I book it?",
    "{slot} is open on {day}. Want me to lock it in?",
];

pub const NO_SLOTS_ON_DAY: &[&str] = &[
    "I don't have anything open on {day}. I do have:\n{slots}\nWould one of those work?",
    "{day} is fully booked, unfortunately. How about one of these?\n{slots}",
];

pub const WHICH_DAY: &[&str] = &[
    "{time} is open on a few days:\n{slots}\nWhich day works best?",
    "I have {time} on more than one day:\n{slots}\nWhich one should I book?",
];

pub const CLARIFY: &[&str] = &[
    "Just to make sure I book the right time, which of these works for you?\n{slots}",
    "Happy to book it! Which one would you like?\n{slots}",
];

pub const NO_AVAILABILITY: &[&str] = &[
    "I'm sorry, I don't have any openings in the next few days. Someone from our team will reach out to find a time that works.",
    "Unfortunately the calendar is full for the next week. A member of our team will follow up with some options.",
];

pub const ASK_PREFERENCE: &[&str] = &[
    "Happy to find another time. What day and time would suit you best?",
    "No problem. Which day and time would work better for you?",
];

pub const NO_APPOINTMENT: &[&str] = &[
    "I couldn't find an upcoming appointment to reschedule. Would you like to book a new time?",
];

/// Picks a template and fills its `{name}` placeholders.
pub fn render(picker: &dyn PhrasePicker, templates: &[&str], vars: &[(&str, &str)]) -> String {
    let index = picker.pick(templates.len()).min(templates.len().saturating_sub(1));
    let mut text = templates.get(index).copied().unwrap_or_default().to_string();
    for (name, value) in vars {
        text = text.replace(&format!("{{{name}}}"), value);
    }
    text
}
