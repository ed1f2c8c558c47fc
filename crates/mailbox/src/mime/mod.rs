//! Minimal RFC 5322 message assembly for providers that take raw messages.

use crate::provider::DraftRequest;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;

pub fn build_reply_message(request: &DraftRequest, boundary: &str) -> String {
    let mut headers = Vec::new();
    headers.push(format!("To: {}", request.to.join(", ")));
    if !request.cc.is_empty() {
        headers.push(format!("Cc: {}", request.cc.join(", ")));
    }
    headers.push(format!("Subject: {}", encode_header(&request.subject)));
    if let Some(parent) = &request.in_reply_to {
        let parent = angle_bracketed(parent);
        headers.push(format!("In-Reply-To: {}", parent));
        headers.push(format!("References: {}", parent));
    }
    headers.push("MIME-Version: 1.0".to_string());

    let mut message = headers.join("\r\n");
    match &request.body_html {
        Some(html) => {
            message.push_str(&format!(
                "\r\nContent-Type: multipart/alternative; boundary=\"{}\"\r\n\r\n",
                boundary
            ));
            message.push_str(&part(boundary, "text/plain", &request.body_text));
            message.push_str(&part(boundary, "text/html", html));
            message.push_str(&format!("--{}--\r\n", boundary));
        }
        None => {
            message.push_str("\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n");
            message.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
            message.push_str(&wrapped_base64(&request.body_text));
        }
    }
    message
}

/// Base64url encoding expected by Gmail's `raw` field.
pub fn encode_raw(message: &str) -> String {
    URL_SAFE.encode(message.as_bytes())
}

fn part(boundary: &str, content_type: &str, content: &str) -> String {
    format!(
        "--{}\r\nContent-Type: {}; charset=\"UTF-8\"\r\nContent-Transfer-Encoding: base64\r\n\r\n{}",
        boundary,
        content_type,
        wrapped_base64(content)
    )
}

fn wrapped_base64(content: &str) -> String {
    let encoded = STANDARD.encode(content.as_bytes());
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 38);
    for chunk in encoded.as_bytes().chunks(76) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn angle_bracketed(id: &str) -> String {
    let id = id.trim();
    if id.starts_with('<') && id.ends_with('>') {
        id.to_string()
    } else {
        format!("<{}>", id)
    }
}
