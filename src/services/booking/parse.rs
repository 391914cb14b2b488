//! Slot-selection language: weekdays, relative days, clock times, ordinals
//! and affirmatives.

use std::sync::OnceLock;

use chrono::Weekday;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayRef {
    Weekday(Weekday),
    Today,
    Tomorrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meridiem {
    Am,
    Pm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeMention {
    pub hour: u32,
    pub minute: u32,
    pub meridiem: Option<Meridiem>,
}

impl TimeMention {
    /// Minutes after midnight this mention could mean. Without am/pm a
    /// 1-11 hour could be morning or afternoon.
    pub fn candidates(&self) -> Vec<u32> {
        match self.meridiem {
            Some(m) => {
                let base = self.hour % 12;
                let hour = if m == Meridiem::Pm { base + 12 } else { base };
                vec![hour * 60 + self.minute]
            }
            None if (1..12).contains(&self.hour) => vec![
                self.hour * 60 + self.minute,
                (self.hour + 12) * 60 + self.minute,
            ],
            None => vec![self.hour * 60 + self.minute],
        }
    }

    pub fn from_24h(s: &str) -> Option<Self> {
        let (h, m) = s.trim().split_once(':')?;
        let hour: u32 = h.parse().ok()?;
        let minute: u32 = m.parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self {
            hour,
            minute,
            meridiem: Some(if hour >= 12 { Meridiem::Pm } else { Meridiem::Am }),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordinal {
    Index(usize),
    Last,
}

pub fn normalize(message: &str) -> String {
    message.trim().to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

fn day_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Longest forms first so "wednes" is not read as "wed" + "nes".
    RE.get_or_init(|| {
        Regex::new(
            r"\b(monday|mon|tuesday|tues|tue|wednesday|wednes|weds|wed|thursday|thurs|thur|thu|friday|fri|saturday|sat|sunday|sun)\b",
        )
        .unwrap()
    })
}

fn relative_day_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(today|tonight|tomorrow|tmrw|tmr)\b").unwrap())
}

fn meridiem_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})(?::([0-5]\d))?\s*(a\.?m\.?|p\.?m\.?)(?:\W|$)").unwrap())
}

fn at_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\bat|@)\s*(\d{1,2})(?::([0-5]\d))?\b").unwrap())
}

fn clock_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2}):([0-5]\d)\b").unwrap())
}

fn noon_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(noon|midday)\b").unwrap())
}

fn ordinal_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(first|1st|second|2nd|third|3rd|fourth|4th|last)\s+(one|option|slot|choice)\b")
            .unwrap()
    })
}

fn ordinal_alone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:the\s+)?(first|1st|second|2nd|third|3rd|fourth|4th|last)(?:\s+one)?\s*(?:please|pls)?[.!]*$")
            .unwrap()
    })
}

fn numbered_option_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\boption|\bnumber|\bno\.|#)\s*(\d)\b|^\s*(\d)\s*[.!)]?\s*$").unwrap())
}

fn affirmative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(yes|yeah|yea|yep|yup|ya|sure|ok|okay|k|sounds good|sounds great|sounds perfect|that works|works for me|that's fine|perfect|great|absolutely|definitely|let's do it|lets do it|book it|confirm|confirmed|do it)\b",
        )
        .unwrap()
    })
}

fn negation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(no|not|nope|nah|don't|dont|doesn't|doesnt|can't|cant|won't|wont|isn't|isnt)\b").unwrap()
    })
}

/// Canonical weekday for any accepted spelling or abbreviation.
pub fn canonical_day(token: &str) -> Option<Weekday> {
    match token.trim().to_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tues" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wednes" | "weds" | "wed" => Some(Weekday::Wed),
        "thursday" | "thurs" | "thur" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

pub fn parse_day(message: &str) -> Option<DayRef> {
    let text = normalize(message);
    if let Some(cap) = relative_day_re().captures(&text) {
        return Some(match &cap[1] {
            "today" | "tonight" => DayRef::Today,
            _ => DayRef::Tomorrow,
        });
    }
    let cap = day_re().captures(&text)?;
    canonical_day(&cap[1]).map(DayRef::Weekday)
}

pub fn parse_time(message: &str) -> Option<TimeMention> {
    let text = normalize(message);

    if let Some(cap) = meridiem_time_re().captures(&text) {
        let hour: u32 = cap[1].parse().ok()?;
        let minute: u32 = cap.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        if (1..=12).contains(&hour) {
            let meridiem = if cap[3].starts_with('p') { Meridiem::Pm } else { Meridiem::Am };
            return Some(TimeMention {
                hour,
                minute,
                meridiem: Some(meridiem),
            });
        }
    }

    if noon_re().is_match(&text) {
        return Some(TimeMention {
            hour: 12,
            minute: 0,
            meridiem: Some(Meridiem::Pm),
        });
    }

    for re in [at_time_re(), clock_time_re()] {
        if let Some(cap) = re.captures(&text) {
            let hour: u32 = cap[1].parse().ok()?;
            let minute: u32 = cap.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
            if hour <= 23 {
                return Some(TimeMention {
                    hour,
                    minute,
                    meridiem: None,
                });
            }
        }
    }

    None
}

fn ordinal_word(word: &str) -> Option<Ordinal> {
    match word {
        "first" | "1st" => Some(Ordinal::Index(1)),
        "second" | "2nd" => Some(Ordinal::Index(2)),
        "third" | "3rd" => Some(Ordinal::Index(3)),
        "fourth" | "4th" => Some(Ordinal::Index(4)),
        "last" => Some(Ordinal::Last),
        _ => None,
    }
}

pub fn parse_ordinal(message: &str) -> Option<Ordinal> {
    let text = normalize(message);
    if let Some(cap) = ordinal_phrase_re()
        .captures(&text)
        .or_else(|| ordinal_alone_re().captures(&text))
    {
        return ordinal_word(&cap[1]);
    }
    let cap = numbered_option_re().captures(&text)?;
    let digits = cap.get(1).or_else(|| cap.get(2))?;
    digits
        .as_str()
        .parse::<usize>()
        .ok()
        .filter(|n| *n >= 1)
        .map(Ordinal::Index)
}

pub fn is_affirmative(message: &str) -> bool {
    let text = normalize(message);
    affirmative_re().is_match(&text) && !negation_re().is_match(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_abbreviation_maps_to_one_day() {
        let table: [(Weekday, &[&str]); 7] = [
            (Weekday::Mon, &["mon", "monday"]),
            (Weekday::Tue, &["tue", "tues", "tuesday"]),
            (Weekday::Wed, &["wed", "weds", "wednes", "wednesday"]),
            (Weekday::Thu, &["thu", "thur", "thurs", "thursday"]),
            (Weekday::Fri, &["fri", "friday"]),
            (Weekday::Sat, &["sat", "saturday"]),
            (Weekday::Sun, &["sun", "sunday"]),
        ];
        for (day, spellings) in &table {
            for spelling in spellings.iter() {
                assert_eq!(canonical_day(spelling), Some(*day), "{spelling}");
                assert_eq!(parse_day(&format!("how about {spelling}?")), Some(DayRef::Weekday(*day)));
                let matching: Vec<Weekday> = table
                    .iter()
                    .filter(|(_, s)| s.contains(spelling))
                    .map(|(d, _)| *d)
                    .collect();
                assert_eq!(matching, vec![*day], "{spelling} is ambiguous");
            }
        }
    }

    #[test]
    fn test_day_inside_other_words_is_ignored() {
        assert_eq!(parse_day("we're planning a wedding"), None);
        assert_eq!(parse_day("it's sunny out"), None);
        assert_eq!(parse_day("Monsoon season"), None);
    }

    #[test]
    fn test_relative_days() {
        assert_eq!(parse_day("Tomorrow works"), Some(DayRef::Tomorrow));
        assert_eq!(parse_day("can we do today"), Some(DayRef::Today));
        assert_eq!(parse_day("tmrw at 3"), Some(DayRef::Tomorrow));
    }

    #[test]
    fn test_parse_time_with_meridiem() {
        let t = parse_time("3pm works").unwrap();
        assert_eq!((t.hour, t.minute, t.meridiem), (3, 0, Some(Meridiem::Pm)));
        assert_eq!(t.candidates(), vec![15 * 60]);

        let t = parse_time("How about 10:30 a.m.?").unwrap();
        assert_eq!(t.candidates(), vec![10 * 60 + 30]);

        let t = parse_time("12pm").unwrap();
        assert_eq!(t.candidates(), vec![12 * 60]);

        let t = parse_time("12am").unwrap();
        assert_eq!(t.candidates(), vec![0]);
    }

    #[test]
    fn test_parse_time_without_meridiem_is_ambiguous() {
        let t = parse_time("tuesday at 2").unwrap();
        assert_eq!(t.meridiem, None);
        assert_eq!(t.candidates(), vec![2 * 60, 14 * 60]);

        let t = parse_time("at 14:15").unwrap();
        assert_eq!(t.candidates(), vec![14 * 60 + 15]);

        let t = parse_time("meet @3").unwrap();
        assert_eq!(t.candidates(), vec![3 * 60, 15 * 60]);
        assert_eq!(parse_time("what 3 options"), None);
    }

    #[test]
    fn test_parse_time_noon_and_none() {
        assert_eq!(parse_time("noon is good").unwrap().candidates(), vec![12 * 60]);
        assert_eq!(parse_time("sometime next week"), None);
        assert_eq!(parse_time("I have 2 kids"), None);
    }

    #[test]
    fn test_from_24h() {
        assert_eq!(TimeMention::from_24h("14:30").unwrap().candidates(), vec![14 * 60 + 30]);
        assert_eq!(TimeMention::from_24h("09:00").unwrap().candidates(), vec![9 * 60]);
        assert!(TimeMention::from_24h("25:00").is_none());
        assert!(TimeMention::from_24h("noon").is_none());
    }

    #[test]
    fn test_ordinals() {
        assert_eq!(parse_ordinal("the first one"), Some(Ordinal::Index(1)));
        assert_eq!(parse_ordinal("Second option please"), Some(Ordinal::Index(2)));
        assert_eq!(parse_ordinal("3rd"), Some(Ordinal::Index(3)));
        assert_eq!(parse_ordinal("the last one"), Some(Ordinal::Last));
        assert_eq!(parse_ordinal("option 2"), Some(Ordinal::Index(2)));
        assert_eq!(parse_ordinal("#4"), Some(Ordinal::Index(4)));
        assert_eq!(parse_ordinal("1"), Some(Ordinal::Index(1)));
        assert_eq!(parse_ordinal("first thing in the morning"), None);
        assert_eq!(parse_ordinal("at 2"), None);
        assert_eq!(parse_ordinal("first time doing this"), None);
    }

    #[test]
    fn test_affirmatives() {
        assert!(is_affirmative("yeah that works"));
        assert!(is_affirmative("Sounds good!"));
        assert!(is_affirmative("ok"));
        assert!(!is_affirmative("that doesn't work"));
        assert!(!is_affirmative("no, not great"));
        assert!(!is_affirmative("what do you offer"));
    }
}
