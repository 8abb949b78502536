//! MIME part walking
//!
//! Pulls the first plain-text and first HTML body out of a parsed message
//! and maps named attachments to structural tokens. Nothing in here fails:
//! a part that cannot be decoded contributes lossy text or nothing.

use log::debug;
use mailparse::{MailHeader, MailHeaderMap, ParsedMail};
use serde::{Deserialize, Serialize};

/// Subject used when the header is missing or blank
pub const NO_SUBJECT: &str = "No Subject";

/// Attachment marker fed to the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructuralToken {
    Pdf,
    Image,
    Calendar,
}

impl StructuralToken {
    /// Token text as it appears in model input
    pub fn as_str(self) -> &'static str {
        match self {
            StructuralToken::Pdf => "PDF",
            StructuralToken::Image => "IMG",
            StructuralToken::Calendar => "CALENDAR",
        }
    }

    /// Classify a lowercase attachment filename
    pub fn from_filename(name: &str) -> Option<Self> {
        if name.contains(".pdf") {
            Some(StructuralToken::Pdf)
        } else if name.contains(".jpg") || name.contains(".jpeg") || name.contains(".png") {
            Some(StructuralToken::Image)
        } else if name.contains("invite") || name.ends_with(".ics") {
            Some(StructuralToken::Calendar)
        } else {
            None
        }
    }
}

/// Bodies and tokens collected from a message's parts
#[derive(Debug, Default)]
pub(crate) struct BodyParts {
    pub text: Option<String>,
    pub html: Option<String>,
    pub tokens: Vec<StructuralToken>,
}

/// Collect bodies and tokens from a parsed message
pub(crate) fn collect_parts(mail: &ParsedMail) -> BodyParts {
    let mut out = BodyParts::default();

    if mail.subparts.is_empty() {
        // Single-part message: the payload is the body
        let body = non_empty(part_text(mail));
        if mail.ctype.mimetype == "text/html" {
            out.html = body;
        } else {
            out.text = body;
        }
        push_token(mail, &mut out);
    } else {
        walk_parts(&mail.subparts, &mut out);
    }

    out
}

/// Depth-first walk over leaf parts
fn walk_parts(parts: &[ParsedMail], out: &mut BodyParts) {
    for part in parts {
        if !part.subparts.is_empty() {
            walk_parts(&part.subparts, out);
            continue;
        }

        push_token(part, out);

        // Disposition does not matter: an attached text part still counts
        match part.ctype.mimetype.as_str() {
            "text/plain" if out.text.is_none() => out.text = non_empty(part_text(part)),
            "text/html" if out.html.is_none() => out.html = non_empty(part_text(part)),
            _ => {}
        }
    }
}

fn push_token(part: &ParsedMail, out: &mut BodyParts) {
    if let Some(name) = filename(part)
        && let Some(token) = StructuralToken::from_filename(&name.to_lowercase())
    {
        out.tokens.push(token);
    }
}

/// Filename from Content-Disposition, falling back to the Content-Type name
fn filename(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned()
}

/// Decode a part body, replacing undecodable bytes instead of failing
fn part_text(part: &ParsedMail) -> String {
    match part.get_body() {
        Ok(body) => body,
        Err(e) => {
            debug!("Falling back to lossy body decode: {}", e);
            part.get_body_raw()
                .map(|raw| String::from_utf8_lossy(&raw).into_owned())
                .unwrap_or_default()
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

/// Decode the Subject header
///
/// Encoded words are decoded by mailparse; if that produces nothing the raw
/// bytes are rendered lossily so a garbled subject still shows up.
pub(crate) fn decode_subject(headers: &[MailHeader]) -> String {
    let Some(header) = headers.get_first_header("Subject") else {
        return NO_SUBJECT.to_string();
    };

    let decoded = header.get_value();
    if !decoded.trim().is_empty() {
        return decoded;
    }

    let raw = String::from_utf8_lossy(header.get_value_raw());
    let raw = raw.trim();
    if raw.is_empty() {
        NO_SUBJECT.to_string()
    } else {
        raw.to_string()
    }
}

/// Decode the From header with angle brackets removed
pub(crate) fn decode_sender(headers: &[MailHeader]) -> String {
    headers
        .get_first_header("From")
        .map(|h| {
            let value = h.get_value();
            if value.trim().is_empty() {
                String::from_utf8_lossy(h.get_value_raw()).into_owned()
            } else {
                value
            }
        })
        .unwrap_or_default()
        .replace(['<', '>'], "")
}
