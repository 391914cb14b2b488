use serde::Deserialize;
use serde_json::json;

use super::{ToolCall, ToolDefinition};

pub const SELECT_TIME_SLOT: &str = "select_time_slot";
pub const CONFIRM_BOOKING: &str = "confirm_booking";
pub const REQUEST_DIFFERENT_TIMES: &str = "request_different_times";
pub const REQUEST_HUMAN_HELP: &str = "request_human_help";

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Tools offered to the model while slots are on the table.
pub fn booking_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: SELECT_TIME_SLOT.to_string(),
            description: "The lead picked one of the offered times. Use slot_index when they refer to an option by position, otherwise day_preference and/or time_24h.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "slot_index": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "1-based position of the offered slot"
                    },
                    "day_preference": {
                        "type": "string",
                        "enum": WEEKDAYS,
                    },
                    "time_24h": {
                        "type": "string",
                        "pattern": "^([01][0-9]|2[0-3]):[0-5][0-9]$",
                        "description": "Requested time as HH:mm"
                    }
                }
            }),
        },
        ToolDefinition {
            name: CONFIRM_BOOKING.to_string(),
            description: "The lead agreed to the single most recently offered time.".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: REQUEST_DIFFERENT_TIMES.to_string(),
            description: "None of the offered times work for the lead.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "reason": { "type": "string" } }
            }),
        },
        ToolDefinition {
            name: REQUEST_HUMAN_HELP.to_string(),
            description: "The lead wants a person, or the request is beyond scheduling.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "reason": { "type": "string" } }
            }),
        },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookingTool {
    SelectTimeSlot {
        slot_index: Option<usize>,
        day_preference: Option<String>,
        time_24h: Option<String>,
    },
    ConfirmBooking,
    RequestDifferentTimes {
        reason: Option<String>,
    },
    RequestHumanHelp {
        reason: Option<String>,
    },
}

#[derive(Deserialize, Default)]
struct SelectArgs {
    slot_index: Option<serde_json::Value>,
    day_preference: Option<String>,
    time_24h: Option<String>,
}

#[derive(Deserialize, Default)]
struct ReasonArgs {
    reason: Option<String>,
}

impl BookingTool {
    pub fn from_call(call: &ToolCall) -> Option<Self> {
        match call.name.as_str() {
            SELECT_TIME_SLOT => {
                let args: SelectArgs = serde_json::from_value(call.arguments.clone()).unwrap_or_default();
                // Models sometimes send the index as a string.
                let slot_index = args.slot_index.and_then(|v| match v {
                    serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
                    serde_json::Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                });
                Some(BookingTool::SelectTimeSlot {
                    slot_index: slot_index.filter(|i| *i >= 1),
                    day_preference: args
                        .day_preference
                        .map(|d| d.to_lowercase())
                        .filter(|d| WEEKDAYS.contains(&d.as_str())),
                    time_24h: args.time_24h,
                })
            }
            CONFIRM_BOOKING => Some(BookingTool::ConfirmBooking),
            REQUEST_DIFFERENT_TIMES => {
                let args: ReasonArgs = serde_json::from_value(call.arguments.clone()).unwrap_or_default();
                Some(BookingTool::RequestDifferentTimes { reason: args.reason })
            }
            REQUEST_HUMAN_HELP => {
                let args: ReasonArgs = serde_json::from_value(call.arguments.clone()).unwrap_or_default();
                Some(BookingTool::RequestHumanHelp { reason: args.reason })
            }
            other => {
                tracing::warn!(tool = other, "model called an unknown tool");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_schema_lists_four_tools() {
        let names: Vec<String> = booking_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![SELECT_TIME_SLOT, CONFIRM_BOOKING, REQUEST_DIFFERENT_TIMES, REQUEST_HUMAN_HELP]
        );
    }

    #[test]
    fn test_select_with_index() {
        let tool = BookingTool::from_call(&call(SELECT_TIME_SLOT, json!({"slot_index": 2}))).unwrap();
        assert_eq!(
            tool,
            BookingTool::SelectTimeSlot {
                slot_index: Some(2),
                day_preference: None,
                time_24h: None
            }
        );
    }

    #[test]
    fn test_select_with_string_index_and_day() {
        let tool = BookingTool::from_call(&call(
            SELECT_TIME_SLOT,
            json!({"slot_index": "1", "day_preference": "Tuesday", "time_24h": "14:00"}),
        ))
        .unwrap();
        assert_eq!(
            tool,
            BookingTool::SelectTimeSlot {
                slot_index: Some(1),
                day_preference: Some("tuesday".into()),
                time_24h: Some("14:00".into())
            }
        );
    }

    #[test]
    fn test_invalid_day_and_zero_index_dropped() {
        let tool = BookingTool::from_call(&call(
            SELECT_TIME_SLOT,
            json!({"slot_index": 0, "day_preference": "someday"}),
        ))
        .unwrap();
        assert_eq!(
            tool,
            BookingTool::SelectTimeSlot {
                slot_index: None,
                day_preference: None,
                time_24h: None
            }
        );
    }

    #[test]
    fn test_reason_tools_and_unknown() {
        assert_eq!(
            BookingTool::from_call(&call(REQUEST_HUMAN_HELP, json!({"reason": "pricing"}))),
            Some(BookingTool::RequestHumanHelp {
                reason: Some("pricing".into())
            })
        );
        assert_eq!(
            BookingTool::from_call(&call(REQUEST_DIFFERENT_TIMES, json!(null))),
            Some(BookingTool::RequestDifferentTimes { reason: None })
        );
        assert_eq!(BookingTool::from_call(&call("send_email", json!({}))), None);
    }
}
