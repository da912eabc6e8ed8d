//! Gmail batch endpoint encoding
//!
//! A batch request is a `multipart/mixed` body where every part is an
//! embedded HTTP request; the response mirrors it with one embedded HTTP
//! response per part, tagged `Content-ID: <response-{id}>`.

use std::collections::HashMap;

use super::api::GmailMessage;
use super::client::error_for_status;
use crate::models::MessageId;
use crate::remote::{BatchResults, RemoteError};

/// Relative path of a metadata request for one message
pub(super) fn metadata_path(id: &MessageId) -> String {
    format!(
        "/gmail/v1/users/me/messages/{}?format=metadata&metadataHeaders=From",
        urlencoding::encode(id.as_str())
    )
}

/// Build the multipart body for a batch of metadata requests
pub(super) fn encode_request(boundary: &str, ids: &[MessageId]) -> String {
    let mut body = String::new();
    for id in ids {
        body.push_str(&format!("--{boundary}\r\n"));
        body.push_str("Content-Type: application/http\r\n");
        body.push_str(&format!("Content-ID: <{id}>\r\n"));
        body.push_str("\r\n");
        body.push_str(&format!("GET {}\r\n", metadata_path(id)));
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{boundary}--\r\n"));
    body
}

/// Extract the boundary parameter from a multipart content type
pub(super) fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        param
            .trim()
            .strip_prefix("boundary=")
            .map(|value| value.trim_matches('"').to_string())
    })
}

struct ParsedPart {
    content_id: Option<String>,
    outcome: Result<GmailMessage, RemoteError>,
}

/// Split a batch response into per-ID outcomes, in the order of `ids`
///
/// Parts are matched by Content-ID, falling back to position. IDs without
/// a usable part are reported as a transient transport failure so the
/// caller retries them.
pub(super) fn parse_response(body: &str, boundary: &str, ids: &[MessageId]) -> BatchResults {
    let normalized = body.replace("\r\n", "\n");
    let delimiter = format!("--{boundary}");

    let mut outcomes: HashMap<String, Result<GmailMessage, RemoteError>> = HashMap::new();
    let mut position = 0usize;

    for part in normalized.split(delimiter.as_str()) {
        let part = part.trim();
        if part.is_empty() || part.starts_with("--") {
            continue;
        }

        let fallback = ids.get(position);
        position += 1;

        let Some(parsed) = parse_part(part) else {
            continue;
        };

        let id = parsed
            .content_id
            .filter(|cid| ids.iter().any(|id| id.as_str() == cid))
            .or_else(|| fallback.map(|id| id.as_str().to_string()));

        if let Some(id) = id {
            outcomes.insert(id, parsed.outcome);
        }
    }

    ids.iter()
        .map(|id| {
            let outcome = outcomes.remove(id.as_str()).unwrap_or_else(|| {
                Err(RemoteError::Transport(format!(
                    "message {id} missing from batch response"
                )))
            });
            (id.clone(), outcome)
        })
        .collect()
}

fn parse_part(part: &str) -> Option<ParsedPart> {
    let (outer_headers, inner) = part.split_once("\n\n")?;

    let content_id = outer_headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("content-id") {
            return None;
        }
        let value = value.trim().trim_start_matches('<').trim_end_matches('>');
        Some(value.strip_prefix("response-").unwrap_or(value).to_string())
    });

    let inner = inner.trim_start();
    let (status_line, rest) = inner.split_once('\n').unwrap_or((inner, ""));
    let status: u16 = status_line.split_whitespace().nth(1)?.parse().ok()?;

    // Embedded responses without headers go straight to the blank line
    let json = if rest.starts_with('\n') {
        rest
    } else {
        rest.split_once("\n\n").map_or("", |(_, body)| body)
    }
    .trim();

    let outcome = if (200..300).contains(&status) {
        serde_json::from_str::<GmailMessage>(json).map_err(|e| RemoteError::Decode(e.to_string()))
    } else {
        Err(error_for_status(status, json))
    };

    Some(ParsedPart {
        content_id,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<MessageId> {
        raw.iter().map(|id| MessageId::new(*id)).collect()
    }

    fn ok_part(boundary: &str, id: &str) -> String {
        format!(
            "--{boundary}\r\nContent-Type: application/http\r\nContent-ID: <response-{id}>\r\n\r\n\
             HTTP/1.1 200 OK\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n\
             {{\"id\":\"{id}\",\"threadId\":\"t-{id}\",\"sizeEstimate\":10}}\r\n"
        )
    }

    fn error_part(boundary: &str, id: &str, status: u16, reason: &str) -> String {
        format!(
            "--{boundary}\r\nContent-Type: application/http\r\nContent-ID: <response-{id}>\r\n\r\n\
             HTTP/1.1 {status} Error\r\nContent-Type: application/json\r\n\r\n\
             {{\"error\":{{\"code\":{status},\"message\":\"{reason}\",\"errors\":[{{\"reason\":\"{reason}\"}}]}}}}\r\n"
        )
    }

    #[test]
    fn test_encode_request() {
        let body = encode_request("b123", &ids(&["m1", "m2"]));
        assert_eq!(body.matches("--b123\r\n").count(), 2);
        assert!(body.ends_with("--b123--\r\n"));
        assert!(body.contains("Content-ID: <m1>"));
        assert!(body.contains(
            "GET /gmail/v1/users/me/messages/m2?format=metadata&metadataHeaders=From"
        ));
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/mixed; boundary=batch_abc"),
            Some("batch_abc".to_string())
        );
        assert_eq!(
            boundary_from_content_type("multipart/mixed; boundary=\"quoted\""),
            Some("quoted".to_string())
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
    }

    #[test]
    fn test_parse_mixed_outcomes() {
        let b = "batch_x";
        let body = format!(
            "{}{}{}--{b}--\r\n",
            ok_part(b, "m1"),
            error_part(b, "m2", 404, "notFound"),
            error_part(b, "m3", 429, "rateLimitExceeded"),
        );

        let results = parse_response(&body, b, &ids(&["m1", "m2", "m3"]));
        assert_eq!(results.len(), 3);

        let (id, first) = &results[0];
        assert_eq!(id.as_str(), "m1");
        let msg = first.as_ref().unwrap();
        assert_eq!(msg.thread_id, "t-m1");
        assert_eq!(msg.size_estimate, Some(10));

        assert_eq!(results[1].1, Err(RemoteError::NotFound));
        assert_eq!(results[2].1, Err(RemoteError::TooManyRequests));
    }

    #[test]
    fn test_parse_out_of_order_parts_match_by_content_id() {
        let b = "batch_y";
        let body = format!("{}{}--{b}--\r\n", ok_part(b, "m2"), ok_part(b, "m1"));

        let results = parse_response(&body, b, &ids(&["m1", "m2"]));
        assert_eq!(results[0].1.as_ref().unwrap().id, "m1");
        assert_eq!(results[1].1.as_ref().unwrap().id, "m2");
    }

    #[test]
    fn test_missing_part_is_transient() {
        let b = "batch_z";
        let body = format!("{}--{b}--\r\n", ok_part(b, "m1"));

        let results = parse_response(&body, b, &ids(&["m1", "m2"]));
        assert!(results[0].1.is_ok());
        let err = results[1].1.as_ref().unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_part_without_content_id_uses_position() {
        let b = "batch_p";
        let body = format!(
            "--{b}\nContent-Type: application/http\n\nHTTP/1.1 200 OK\n\n{{\"id\":\"m1\",\"threadId\":\"t1\"}}\n--{b}--\n"
        );

        let results = parse_response(&body, b, &ids(&["m1"]));
        assert_eq!(results[0].1.as_ref().unwrap().thread_id, "t1");
    }

    #[test]
    fn test_undecodable_success_body() {
        let b = "batch_d";
        let body = format!(
            "--{b}\r\nContent-ID: <response-m1>\r\n\r\nHTTP/1.1 200 OK\r\n\r\nnot json\r\n--{b}--\r\n"
        );

        let results = parse_response(&body, b, &ids(&["m1"]));
        assert!(matches!(results[0].1, Err(RemoteError::Decode(_))));
    }
}
