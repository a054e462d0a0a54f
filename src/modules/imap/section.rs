// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use imap_proto::{BodyContentCommon, BodyContentSinglePart, BodyStructure, ContentEncoding};
use mail_parser::decoders::{
    base64::base64_decode_stream, quoted_printable::quoted_printable_decode,
};

use crate::modules::imap::AttachmentMeta;

/// Walks a BODYSTRUCTURE response and lifts out attachment-part metadata.
/// Part numbers follow the IMAP section convention: children of a multipart
/// are numbered 1..n, nested parts join with dots ("1.2").
pub struct SectionExtractor<'a> {
    structure: &'a BodyStructure<'a>,
}

impl<'a> SectionExtractor<'a> {
    pub fn new(structure: &'a BodyStructure<'a>) -> Self {
        Self { structure }
    }

    pub fn attachments(&self) -> Vec<AttachmentMeta> {
        let mut found = Vec::new();
        match self.structure {
            BodyStructure::Multipart { bodies, .. } => {
                for (index, body) in bodies.iter().enumerate() {
                    collect_attachments(body, &format!("{}", index + 1), &mut found);
                }
            }
            single => collect_attachments(single, "1", &mut found),
        }
        found
    }
}

fn collect_attachments(structure: &BodyStructure<'_>, path: &str, found: &mut Vec<AttachmentMeta>) {
    match structure {
        BodyStructure::Multipart { bodies, .. } => {
            for (index, body) in bodies.iter().enumerate() {
                collect_attachments(body, &format!("{}.{}", path, index + 1), found);
            }
        }
        BodyStructure::Basic { common, other, .. } => {
            if let Some(meta) = extract_part(common, other, path) {
                found.push(meta);
            }
        }
        BodyStructure::Message { common, other, .. } => {
            if let Some(meta) = extract_part(common, other, path) {
                found.push(meta);
            }
        }
        BodyStructure::Text { common, other, .. } => {
            if let Some(meta) = extract_part(common, other, path) {
                found.push(meta);
            }
        }
    }
}

fn extract_part(
    common: &BodyContentCommon<'_>,
    single: &BodyContentSinglePart<'_>,
    path: &str,
) -> Option<AttachmentMeta> {
    let disposition_type = common
        .disposition
        .as_ref()
        .map(|d| d.ty.to_ascii_lowercase());
    let is_attachment = matches!(disposition_type.as_deref(), Some("attachment"));
    let content_id = single
        .id
        .as_ref()
        .map(|id| id.trim_matches(['<', '>']).to_string());
    let is_inline =
        matches!(disposition_type.as_deref(), Some("inline")) && content_id.is_some();

    if !is_attachment && !is_inline {
        return None;
    }

    let filename = common
        .disposition
        .as_ref()
        .and_then(|d| d.params.as_ref())
        .and_then(|params| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("filename"))
                .map(|(_, v)| v.to_string())
        })
        .or_else(|| {
            common.ty.params.as_ref().and_then(|params| {
                params
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("name"))
                    .map(|(_, v)| v.to_string())
            })
        });

    Some(AttachmentMeta {
        part_number: path.to_string(),
        filename,
        content_type: format!(
            "{}/{}",
            common.ty.ty.to_ascii_lowercase(),
            common.ty.subtype.to_ascii_lowercase()
        ),
        content_id,
        transfer_encoding: encoding_label(&single.transfer_encoding).to_string(),
        size: single.octets,
        is_inline,
    })
}

fn encoding_label(encoding: &ContentEncoding<'_>) -> &'static str {
    match encoding {
        ContentEncoding::SevenBit => "7bit",
        ContentEncoding::EightBit => "8bit",
        ContentEncoding::Binary => "binary",
        ContentEncoding::Base64 => "base64",
        ContentEncoding::QuotedPrintable => "quoted-printable",
        ContentEncoding::Other(_) => "7bit",
    }
}

/// Decodes raw part bytes by their transfer-encoding label. Base64 input is
/// tolerated with embedded whitespace; unknown labels pass bytes through.
pub fn decode_transfer(data: &[u8], transfer_encoding: &str) -> Vec<u8> {
    match transfer_encoding.to_ascii_lowercase().as_str() {
        "base64" => {
            base64_decode_stream(data.iter(), data.len(), u8::MAX).unwrap_or_else(|| data.to_vec())
        }
        "quoted-printable" => quoted_printable_decode(data).unwrap_or_else(|| data.to_vec()),
        _ => data.to_vec(),
    }
}
