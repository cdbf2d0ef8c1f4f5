//! Netscape cookie file parsing.
//!
//! Each cookie line holds seven tab-separated fields: domain, include-subdomains
//! flag, path, secure flag, expiry (unix seconds, 0 for session), name, value.

use chrono::DateTime;
use tracing::debug;

use super::Cookie;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

pub fn parse_netscape(content: &str) -> Vec<Cookie> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let cookie = parse_line(line);
            if cookie.is_none() && !is_ignorable(line) {
                debug!("Skipping malformed cookie line {}", idx + 1);
            }
            cookie
        })
        .collect()
}

fn is_ignorable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || (trimmed.starts_with('#') && !trimmed.starts_with(HTTP_ONLY_PREFIX))
}

fn parse_line(line: &str) -> Option<Cookie> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
        Some(rest) => (rest, true),
        None if line.starts_with('#') || line.trim().is_empty() => return None,
        None => (line, false),
    };

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return None;
    }

    let expiry: i64 = fields[4].trim().parse().ok()?;
    let expires = if expiry <= 0 {
        None
    } else {
        Some(DateTime::from_timestamp(expiry, 0)?)
    };

    Some(Cookie {
        domain: fields[0].to_string(),
        include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
        path: fields[2].to_string(),
        secure: fields[3].eq_ignore_ascii_case("TRUE"),
        http_only,
        expires,
        name: fields[5].to_string(),
        value: fields[6].to_string(),
    })
}
