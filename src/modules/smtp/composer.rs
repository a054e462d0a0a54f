// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use mail_send::mail_builder::{
    headers::{address::Address, raw::Raw},
    MessageBuilder,
};

use crate::modules::smtp::{generate_message_id, SendRequest};

/// Renders a canonical request into an RFC 5322 message. Returns the builder
/// plus the Message-ID the message will carry; In-Reply-To and References
/// pass through verbatim.
pub fn build_message(request: &SendRequest) -> (MessageBuilder<'static>, String) {
    let message_id = request
        .message_id
        .clone()
        .unwrap_or_else(generate_message_id);

    let mut builder = MessageBuilder::new()
        .from(Address::from(request.from.clone()))
        .to(address_list(&request.to))
        .message_id(trim_angle_brackets(&message_id).to_string());

    if !request.cc.is_empty() {
        builder = builder.cc(address_list(&request.cc));
    }
    if !request.bcc.is_empty() {
        builder = builder.bcc(address_list(&request.bcc));
    }
    if let Some(subject) = &request.subject {
        builder = builder.subject(subject.clone());
    }
    if let Some(in_reply_to) = &request.in_reply_to {
        builder = builder.in_reply_to(trim_angle_brackets(in_reply_to).to_string());
    }
    if !request.references.is_empty() {
        let references: Vec<String> = request
            .references
            .iter()
            .map(|r| trim_angle_brackets(r).to_string())
            .collect();
        builder = builder.references(references);
    }
    if let Some(classification) = &request.classification {
        builder = builder.header("X-Postroom-Class", Raw::from(classification.clone()));
    }
    if let Some(text) = &request.text {
        builder = builder.text_body(text.clone());
    }
    if let Some(html) = &request.html {
        builder = builder.html_body(html.clone());
    }

    (builder, message_id)
}

fn address_list(addrs: &[crate::modules::common::Addr]) -> Address<'static> {
    Address::new_list(addrs.iter().cloned().map(Address::from).collect())
}

fn trim_angle_brackets(message_id: &str) -> &str {
    message_id
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(message_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::common::Addr;

    fn sample_request() -> SendRequest {
        SendRequest {
            from: Addr::new(Some("Me"), "me@example.com"),
            to: vec![Addr::new(Some("You"), "you@example.com")],
            subject: Some("Re: planning".into()),
            text: Some("sounds good".into()),
            in_reply_to: Some("<orig-123@example.com>".into()),
            references: vec!["<root@example.com>".into(), "<orig-123@example.com>".into()],
            ..Default::default()
        }
    }

    #[test]
    fn reply_headers_pass_through_verbatim() {
        let (builder, message_id) = build_message(&sample_request());
        let rendered = builder.write_to_vec().unwrap();
        let rendered = String::from_utf8(rendered).unwrap();

        assert!(rendered.contains("orig-123@example.com"));
        assert!(rendered.contains("root@example.com"));
        assert!(rendered.contains("Subject: Re: planning"));
        assert!(message_id.starts_with('<'));
    }

    #[test]
    fn provided_message_id_is_kept() {
        let mut request = sample_request();
        request.message_id = Some("<fixed@postroom>".into());
        let (builder, message_id) = build_message(&request);
        assert_eq!(message_id, "<fixed@postroom>");
        let rendered = String::from_utf8(builder.write_to_vec().unwrap()).unwrap();
        assert!(rendered.contains("fixed@postroom"));
    }
}
