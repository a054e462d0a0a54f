// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashMap;
use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::base64_encode;

/// Decoded form of one raw RFC 5322 message. Produced by a pure function:
/// no I/O, no stored state, deterministic for a given input.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedMessage {
    /// First text/plain part found depth-first
    pub text_body: Option<String>,
    /// First text/html part found depth-first, with `cid:` references
    /// rewritten to `data:` URIs
    pub html_body: Option<String>,
    pub attachments: Vec<DecodedAttachment>,
    /// Content-ID → data URI for inline parts
    pub cid_map: AHashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAttachment {
    pub filename: Option<String>,
    pub content_type: String,
    pub content_id: Option<String>,
    pub is_inline: bool,
    /// Transfer-decoded payload bytes
    pub data: Vec<u8>,
}

const SNIPPET_LENGTH: usize = 160;

/// Decodes raw message bytes into bodies, attachments and an inline-CID map.
///
/// Transfer encodings (7bit/8bit/binary, quoted-printable, base64 with
/// embedded whitespace) and header/body charsets are handled by the parser;
/// undecodable bytes pass through lossily rather than failing the message.
/// Parsing nested multiparts is iterative over the parsed part list, so
/// adversarial nesting depth is bounded by the parser's own limits.
pub fn decode_message(raw: &[u8]) -> DecodedMessage {
    let Some(message) = MessageParser::default().parse(raw) else {
        return DecodedMessage::default();
    };

    let text_body = message.body_text(0).map(|cow| cow.into_owned());
    let mut html_body = message.body_html(0).map(|cow| cow.into_owned());

    let mut attachments = Vec::new();
    let mut cid_map = AHashMap::new();

    for part in message.attachments() {
        let filename = part.attachment_name().map(String::from);
        let content_type = part
            .content_type()
            .map(|ct| match &ct.c_subtype {
                Some(subtype) => format!("{}/{}", ct.c_type, subtype).to_lowercase(),
                None => ct.c_type.to_lowercase(),
            })
            .unwrap_or_else(|| match filename.as_deref() {
                Some(name) => mime_guess::from_path(name)
                    .first_or_octet_stream()
                    .to_string(),
                None => "application/octet-stream".to_string(),
            });
        let content_id = part.content_id().map(String::from);
        let data: Vec<u8> = match &part.body {
            PartType::Text(text) | PartType::Html(text) => text.as_bytes().to_vec(),
            PartType::Binary(bytes) | PartType::InlineBinary(bytes) => bytes.to_vec(),
            PartType::Message(nested) => nested.raw_message.to_vec(),
            PartType::Multipart(_) => continue,
        };
        let is_inline = content_id.is_some();

        if let Some(cid) = &content_id {
            let data_uri = format!("data:{};base64,{}", content_type, base64_encode!(&data));
            cid_map.insert(cid.clone(), data_uri);
        }

        attachments.push(DecodedAttachment {
            filename,
            content_type,
            content_id,
            is_inline,
            data,
        });
    }

    if let Some(html) = html_body.as_mut() {
        for (cid, data_uri) in &cid_map {
            *html = html.replace(&format!("cid:{}", cid), data_uri);
        }
    }

    DecodedMessage {
        text_body,
        html_body,
        attachments,
        cid_map,
    }
}

/// Decodes text bytes by charset label resolved through the HTML5 encoding
/// index; unresolvable labels fall back to lossy UTF-8 passthrough.
pub fn decode_charset(label: &str, bytes: &[u8]) -> String {
    match crate::get_encoding!(label) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Bounded plain-text preview of the first decoded body, for list rows and
/// bounce correlation.
pub fn make_snippet(decoded: &DecodedMessage) -> Option<String> {
    let source = decoded.text_body.as_deref()?;
    let collapsed: String = source.split_whitespace().collect::<Vec<_>>().join(" ");
    let snippet: String = collapsed.chars().take(SNIPPET_LENGTH).collect();
    if snippet.is_empty() {
        None
    } else {
        Some(snippet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> DecodedMessage {
        decode_message(raw.as_bytes())
    }

    #[test]
    fn plain_text_message() {
        let decoded = decode(
            "From: a@x.y\r\nTo: b@x.y\r\nSubject: hi\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\r\nhello there\r\n",
        );
        assert_eq!(decoded.text_body.as_deref().map(str::trim_end), Some("hello there"));
        assert_eq!(decoded.html_body, None);
        assert!(decoded.attachments.is_empty());
    }

    #[test]
    fn quoted_printable_latin1_body() {
        let decoded = decode(
            "From: a@x.y\r\nSubject: qp\r\n\
             Content-Type: text/plain; charset=iso-8859-1\r\n\
             Content-Transfer-Encoding: quoted-printable\r\n\r\n\
             caf=E9 au lait\r\n",
        );
        assert_eq!(decoded.text_body.as_deref().map(str::trim_end), Some("café au lait"));
    }

    #[test]
    fn first_text_and_html_parts_win() {
        let decoded = decode(
            "From: a@x.y\r\nSubject: alt\r\nMIME-Version: 1.0\r\n\
             Content-Type: multipart/alternative; boundary=\"b1\"\r\n\r\n\
             --b1\r\nContent-Type: text/plain\r\n\r\nfirst plain\r\n\
             --b1\r\nContent-Type: text/html\r\n\r\n<p>first html</p>\r\n\
             --b1\r\nContent-Type: text/plain\r\n\r\nsecond plain\r\n\
             --b1--\r\n",
        );
        assert_eq!(decoded.text_body.as_deref().map(str::trim_end), Some("first plain"));
        assert_eq!(decoded.html_body.as_deref().map(str::trim_end), Some("<p>first html</p>"));
    }

    #[test]
    fn base64_attachment_is_decoded() {
        let decoded = decode(
            "From: a@x.y\r\nSubject: att\r\nMIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"b2\"\r\n\r\n\
             --b2\r\nContent-Type: text/plain\r\n\r\nsee attachment\r\n\
             --b2\r\nContent-Type: application/pdf; name=\"doc.pdf\"\r\n\
             Content-Disposition: attachment; filename=\"doc.pdf\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n\
             aGVsbG8g\r\nd29ybGQ=\r\n\
             --b2--\r\n",
        );
        assert_eq!(decoded.attachments.len(), 1);
        let attachment = &decoded.attachments[0];
        assert_eq!(attachment.filename.as_deref(), Some("doc.pdf"));
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(attachment.data, b"hello world");
        assert!(!attachment.is_inline);
    }

    #[test]
    fn inline_image_yields_cid_entry_and_html_rewrite() {
        let decoded = decode(
            "From: a@x.y\r\nSubject: inline\r\nMIME-Version: 1.0\r\n\
             Content-Type: multipart/related; boundary=\"b3\"\r\n\r\n\
             --b3\r\nContent-Type: text/html\r\n\r\n\
             <img src=\"cid:logo@x\">\r\n\
             --b3\r\nContent-Type: image/png\r\n\
             Content-ID: <logo@x>\r\n\
             Content-Disposition: inline; filename=\"logo.png\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n\
             iVBORw0KGgo=\r\n\
             --b3--\r\n",
        );
        assert_eq!(decoded.attachments.len(), 1);
        assert!(decoded.attachments[0].is_inline);
        let data_uri = decoded.cid_map.get("logo@x").expect("cid entry");
        assert!(data_uri.starts_with("data:image/png;base64,"));
        let html = decoded.html_body.unwrap();
        assert!(html.contains(data_uri.as_str()));
        assert!(!html.contains("cid:logo@x"));
    }

    #[test]
    fn missing_content_type_falls_back_to_filename_guess() {
        let decoded = decode(
            "From: a@x.y\r\nSubject: noct\r\nMIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"b4\"\r\n\r\n\
             --b4\r\nContent-Type: text/plain\r\n\r\nbody\r\n\
             --b4\r\nContent-Disposition: attachment; filename=\"photo.png\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n\
             iVBORw0KGgo=\r\n\
             --b4--\r\n",
        );
        assert_eq!(decoded.attachments.len(), 1);
        assert_eq!(decoded.attachments[0].content_type, "image/png");
    }

    #[test]
    fn garbage_input_degrades_to_empty() {
        let decoded = decode_message(&[0xff, 0xfe, 0x00, 0x01]);
        assert_eq!(decoded, DecodedMessage::default());
    }

    #[test]
    fn charset_labels_resolve_through_encoding_index() {
        assert_eq!(decode_charset("iso-8859-1", &[0x63, 0x61, 0x66, 0xE9]), "café");
        assert_eq!(decode_charset("windows-1252", &[0x93, 0x68, 0x69, 0x94]), "\u{201c}hi\u{201d}");
        // Unknown labels pass bytes through.
        assert_eq!(decode_charset("x-no-such-charset", b"plain"), "plain");
    }

    #[test]
    fn snippet_is_collapsed_and_bounded() {
        let mut decoded = DecodedMessage::default();
        decoded.text_body = Some("  line one\r\n\r\n line   two ".into());
        assert_eq!(make_snippet(&decoded).as_deref(), Some("line one line two"));

        decoded.text_body = Some("x".repeat(500));
        assert_eq!(make_snippet(&decoded).unwrap().chars().count(), 160);
    }
}
