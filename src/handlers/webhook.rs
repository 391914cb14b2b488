use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::NewMessage;
use crate::services::messaging::twilio;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct TwilioWebhookForm {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Body")]
    pub body: String,
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
}

/// Inbound SMS and WhatsApp messages. Always answers with empty TwiML;
/// replies go out through the messaging provider.
pub async fn sms_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TwilioWebhookForm>,
) -> Result<Response, AppError> {
    let body = form.body.trim();

    // Empty auth token means dev mode: no signature check.
    if !state.config.twilio_auth_token.is_empty() {
        let signature = headers
            .get("x-twilio-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if signature.is_empty() {
            tracing::warn!("missing X-Twilio-Signature header");
            return Err(AppError::Forbidden("missing signature"));
        }

        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("https");
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get("host"))
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let url = format!("{proto}://{host}/webhook/sms");

        let params = [
            ("From", form.from.as_str()),
            ("To", form.to.as_str()),
            ("Body", form.body.as_str()),
            ("MessageSid", form.message_sid.as_deref().unwrap_or("")),
        ];
        if !twilio::validate_signature(&state.config.twilio_auth_token, signature, &url, &params) {
            tracing::warn!("invalid Twilio signature");
            return Err(AppError::Forbidden("invalid signature"));
        }
    }

    let (channel, phone) = twilio::split_address(form.from.trim());
    tracing::info!(from = %phone, channel, "inbound message");

    // Store failures answer 500 and the provider redelivers.
    let Some(contact_id) = state.store.find_contact_id_by_phone(phone).await? else {
        tracing::info!(from = %phone, "no contact for sender, ignoring");
        return Ok(twiml_response());
    };

    state
        .store
        .insert_message(&NewMessage::inbound(&contact_id, channel, body))
        .await?;

    match state.orchestrator.process_message(&contact_id, body).await {
        Ok(result) => {
            if let Err(e) = state.messaging.send_message(channel, phone, &result.reply).await {
                tracing::error!(contact_id = %contact_id, error = %e, "failed to send reply");
            }
        }
        Err(e) => {
            tracing::info!(contact_id = %contact_id, kind = e.kind().as_str(), "no reply sent");
        }
    }

    Ok(twiml_response())
}

fn twiml_response() -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        "<Response></Response>",
    )
        .into_response()
}
