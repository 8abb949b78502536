//! Message decoding
//!
//! Turns a raw RFC 5322 payload into the normalized fields the rest of the
//! pipeline works with:
//! - sender and subject, header-decoded and cleaned
//! - the first plain-text and first HTML body
//! - structural tokens for recognised attachments
//! - the classification body and the classifier input text
//!
//! Only an unparseable envelope is an error. Broken parts below it degrade
//! to lossy or empty text.

mod mime;
mod text;

pub use mime::{NO_SUBJECT, StructuralToken};
pub use text::{clean_text, first_chars, strip_html_tags};

use thiserror::Error;

use crate::dedup::Fingerprint;

/// Errors that stop a message from being decoded at all
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to parse message envelope: {0}")]
    Envelope(#[from] mailparse::MailParseError),
}

/// A message reduced to the fields used for classification and display
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Normalized sender
    pub sender: String,
    /// Normalized subject
    pub subject: String,
    /// First text/plain body, as decoded
    pub body_text: Option<String>,
    /// First text/html body, kept for display only
    pub body_html: Option<String>,
    pub tokens: Vec<StructuralToken>,
    /// Normalized text used for classification and dedup
    pub body: String,
}

impl DecodedMessage {
    /// Assemble a decoded message from its already-extracted parts
    ///
    /// Sender and subject are normalized here. The classification body is
    /// the plain body when present, otherwise the tag-stripped HTML body.
    pub fn from_parts(
        sender: &str,
        subject: &str,
        body_text: Option<String>,
        body_html: Option<String>,
        tokens: Vec<StructuralToken>,
    ) -> Self {
        let body = match (&body_text, &body_html) {
            (Some(text), _) if !text.trim().is_empty() => clean_text(text),
            (_, Some(html)) => clean_text(&strip_html_tags(html)),
            _ => String::new(),
        };

        Self {
            sender: clean_text(sender),
            subject: clean_text(subject),
            body_text,
            body_html,
            tokens,
            body,
        }
    }

    /// Text handed to the classifier
    ///
    /// The sender appears three times, followed by the tokens, the subject
    /// and the body. Models are trained on exactly this shape.
    pub fn classifier_input(&self) -> String {
        let sender = &self.sender;
        format!(
            "{sender} {sender} {sender} {} {} {}",
            self.token_strings().join(" "),
            self.subject,
            self.body
        )
    }

    /// Dedup fingerprint for this message
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.sender, &self.subject, &self.body)
    }

    pub fn token_strings(&self) -> Vec<String> {
        self.tokens.iter().map(|t| t.as_str().to_string()).collect()
    }
}

/// Decode a raw message payload
pub fn decode(raw: &[u8]) -> Result<DecodedMessage, DecodeError> {
    let mail = mailparse::parse_mail(raw)?;

    let subject = mime::decode_subject(&mail.headers);
    let sender = mime::decode_sender(&mail.headers);
    let parts = mime::collect_parts(&mail);

    Ok(DecodedMessage::from_parts(
        &sender,
        &subject,
        parts.text,
        parts.html,
        parts.tokens,
    ))
}
