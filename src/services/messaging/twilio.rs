use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use super::MessagingProvider;

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";

pub struct TwilioProvider {
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct MessageResponse {
    sid: String,
}

impl TwilioProvider {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        Self {
            account_sid,
            auth_token,
            from_number,
            base_url: TWILIO_API.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

/// Twilio addresses WhatsApp numbers as `whatsapp:+1555...`.
pub fn address(channel: &str, number: &str) -> String {
    if channel == "whatsapp" && !number.starts_with("whatsapp:") {
        format!("whatsapp:{number}")
    } else {
        number.to_string()
    }
}

/// Strips the channel prefix from an inbound `From` value.
pub fn split_address(from: &str) -> (&'static str, &str) {
    match from.strip_prefix("whatsapp:") {
        Some(number) => ("whatsapp", number),
        None => ("sms", from),
    }
}

/// `X-Twilio-Signature`: base64 HMAC-SHA1 over the URL followed by the
/// form parameters sorted by name.
pub fn validate_signature(auth_token: &str, signature: &str, url: &str, params: &[(&str, &str)]) -> bool {
    let mut data = url.to_string();
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in &sorted {
        data.push_str(key);
        data.push_str(value);
    }

    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(data.as_bytes());
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    expected == signature
}

#[async_trait]
impl MessagingProvider for TwilioProvider {
    async fn send_message(&self, channel: &str, to: &str, body: &str) -> anyhow::Result<String> {
        let url = format!("{}/Accounts/{}/Messages.json", self.base_url, self.account_sid);
        let to = address(channel, to);
        let from = address(channel, &self.from_number);

        let sent: MessageResponse = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to.as_str()), ("From", from.as_str()), ("Body", body)])
            .send()
            .await
            .context("failed to send Twilio message")?
            .error_for_status()
            .context("Twilio API returned error")?
            .json()
            .await
            .context("failed to parse Twilio response")?;

        tracing::debug!(sid = %sent.sid, channel, "message sent");
        Ok(sent.sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whatsapp_addressing() {
        assert_eq!(address("whatsapp", "+15551234567"), "whatsapp:+15551234567");
        assert_eq!(address("whatsapp", "whatsapp:+15551234567"), "whatsapp:+15551234567");
        assert_eq!(address("sms", "+15551234567"), "+15551234567");
        assert_eq!(split_address("whatsapp:+15551234567"), ("whatsapp", "+15551234567"));
        assert_eq!(split_address("+15551234567"), ("sms", "+15551234567"));
    }

    #[test]
    fn test_signature_round_trip() {
        let params = [("From", "+15551234567"), ("Body", "hi")];
        let url = "https://example.com/webhook/sms";

        let mut mac = Hmac::<Sha1>::new_from_slice(b"secret").unwrap();
        mac.update(b"https://example.com/webhook/smsBodyhiFrom+15551234567");
        let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        assert!(validate_signature("secret", &signature, url, &params));
        assert!(!validate_signature("other", &signature, url, &params));
    }
}
