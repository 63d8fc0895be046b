//! Strict RFC 3986 splitter for absolute URIs.
//!
//! Components are returned as borrowed slices of the input exactly as
//! written; nothing is normalized or decoded here.

use std::borrow::Cow;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    #[error("missing scheme")]
    MissingScheme,
    #[error("invalid character {ch:?} in {component} at byte {pos}")]
    InvalidCharacter {
        component: &'static str,
        ch: char,
        pos: usize,
    },
    #[error("malformed percent-encoding at byte {0}")]
    BadPercentEncoding(usize),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authority<'a> {
    pub userinfo: Option<&'a str>,
    /// Registered name or bracketed IP literal; may be empty.
    pub host: &'a str,
    pub port: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UriParts<'a> {
    pub scheme: &'a str,
    pub authority: Option<Authority<'a>>,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub fragment: Option<&'a str>,
}

impl<'a> UriParts<'a> {
    pub fn host(&self) -> &'a str {
        self.authority.map_or("", |a| a.host)
    }

    /// Path segments after the leading `/`. `""` and `"/"` have none.
    pub fn segments(&self) -> impl Iterator<Item = &'a str> {
        let trimmed = self.path.strip_prefix('/').unwrap_or(self.path);
        let segments = if trimmed.is_empty() && self.path.len() <= 1 {
            None
        } else {
            Some(trimmed.split('/'))
        };
        segments.into_iter().flatten()
    }
}

/// Split `input` into its RFC 3986 components.
pub fn parse_uri(input: &str) -> Result<UriParts<'_>, UriError> {
    let colon = input.find(':').ok_or(UriError::MissingScheme)?;
    let scheme = &input[..colon];
    check_scheme(scheme)?;
    let rest_start = colon + 1;
    let rest = &input[rest_start..];

    let (before_fragment, fragment) = match rest.find('#') {
        Some(i) => (&rest[..i], Some(&rest[i + 1..])),
        None => (rest, None),
    };
    let (hier, query) = match before_fragment.find('?') {
        Some(i) => (&before_fragment[..i], Some(&before_fragment[i + 1..])),
        None => (before_fragment, None),
    };

    let (authority, path, path_start) = match hier.strip_prefix("//") {
        Some(after) => {
            let end = after.find('/').unwrap_or(after.len());
            let authority = parse_authority(&after[..end], rest_start + 2)?;
            (Some(authority), &after[end..], rest_start + 2 + end)
        }
        None => (None, hier, rest_start),
    };

    check_component(path, "path", path_start, is_path_char)?;
    if let Some(q) = query {
        let start = rest_start + hier.len() + 1;
        check_component(q, "query", start, is_query_char)?;
    }
    if let Some(f) = fragment {
        let start = rest_start + before_fragment.len() + 1;
        check_component(f, "fragment", start, is_query_char)?;
    }

    Ok(UriParts {
        scheme,
        authority,
        path,
        query,
        fragment,
    })
}

fn check_scheme(scheme: &str) -> Result<(), UriError> {
    let mut chars = scheme.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() => {}
        _ => return Err(UriError::MissingScheme),
    }
    for (pos, ch) in chars {
        if !(ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.')) {
            return Err(UriError::InvalidCharacter {
                component: "scheme",
                ch,
                pos,
            });
        }
    }
    Ok(())
}

fn parse_authority(raw: &str, offset: usize) -> Result<Authority<'_>, UriError> {
    let (userinfo, hostport, host_offset) = match raw.find('@') {
        Some(i) => (Some(&raw[..i]), &raw[i + 1..], offset + i + 1),
        None => (None, raw, offset),
    };
    if let Some(u) = userinfo {
        check_component(u, "userinfo", offset, |c| is_reg_name_char(c) || c == ':')?;
    }

    let (host, port) = if hostport.starts_with('[') {
        let close = hostport.find(']').ok_or(UriError::InvalidCharacter {
            component: "host",
            ch: '[',
            pos: host_offset,
        })?;
        let literal = &hostport[1..close];
        check_component(literal, "host", host_offset + 1, |c| {
            c.is_ascii_hexdigit() || matches!(c, ':' | '.' | 'v' | 'V') || is_reg_name_char(c)
        })?;
        let tail = &hostport[close + 1..];
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(p),
            None if tail.is_empty() => None,
            None => {
                return Err(UriError::InvalidCharacter {
                    component: "host",
                    ch: tail.chars().next().unwrap_or(']'),
                    pos: host_offset + close + 1,
                })
            }
        };
        (&hostport[..=close], port)
    } else {
        match hostport.rfind(':') {
            Some(i) => (&hostport[..i], Some(&hostport[i + 1..])),
            None => (hostport, None),
        }
    };
    if !host.starts_with('[') {
        check_component(host, "host", host_offset, is_reg_name_char)?;
    }
    if let Some(p) = port {
        if !p.bytes().all(|b| b.is_ascii_digit()) {
            return Err(UriError::InvalidPort(p.to_string()));
        }
    }
    Ok(Authority {
        userinfo,
        host,
        port,
    })
}

fn check_component(
    s: &str,
    component: &'static str,
    offset: usize,
    allowed: impl Fn(char) -> bool,
) -> Result<(), UriError> {
    let bytes = s.as_bytes();
    for (pos, ch) in s.char_indices() {
        if ch == '%' {
            let ok = bytes.len() > pos + 2
                && bytes[pos + 1].is_ascii_hexdigit()
                && bytes[pos + 2].is_ascii_hexdigit();
            if !ok {
                return Err(UriError::BadPercentEncoding(offset + pos));
            }
        } else if !allowed(ch) {
            return Err(UriError::InvalidCharacter {
                component,
                ch,
                pos: offset + pos,
            });
        }
    }
    Ok(())
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn is_sub_delim(c: char) -> bool {
    matches!(
        c,
        '!' | '$' | '&' | '\'' | '(' | ')' | '*' | '+' | ',' | ';' | '='
    )
}

fn is_reg_name_char(c: char) -> bool {
    is_unreserved(c) || is_sub_delim(c)
}

fn is_path_char(c: char) -> bool {
    is_reg_name_char(c) || matches!(c, ':' | '@' | '/')
}

fn is_query_char(c: char) -> bool {
    is_path_char(c) || c == '?'
}

/// Decode `%XX` escapes. Input is assumed to be validated by [`parse_uri`].
pub fn percent_decode(s: &str) -> Cow<'_, [u8]> {
    if !s.contains('%') {
        return Cow::Borrowed(s.as_bytes());
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(h), Some(l)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(h << 4 | l);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    Cow::Owned(out)
}

/// Percent-decode and replace invalid UTF-8 with U+FFFD.
pub fn percent_decode_lossy(s: &str) -> Cow<'_, str> {
    match percent_decode(s) {
        Cow::Borrowed(b) => String::from_utf8_lossy(b),
        Cow::Owned(v) => Cow::Owned(String::from_utf8_lossy(&v).into_owned()),
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_full_uri() {
        let u = parse_uri("HTTPS://user:pw@Example.com:8080/a/b%20c/?x=1&y=2#frag")
            .expect("parse");
        assert_eq!(u.scheme, "HTTPS");
        let auth = u.authority.expect("authority");
        assert_eq!(auth.userinfo, Some("user:pw"));
        assert_eq!(auth.host, "Example.com");
        assert_eq!(auth.port, Some("8080"));
        assert_eq!(u.path, "/a/b%20c/");
        assert_eq!(u.query, Some("x=1&y=2"));
        assert_eq!(u.fragment, Some("frag"));
        assert_eq!(u.segments().collect::<Vec<_>>(), vec!["a", "b%20c", ""]);
    }

    #[test]
    fn host_only_uri_has_empty_path() {
        let u = parse_uri("http://www.test.de").expect("parse");
        assert_eq!(u.host(), "www.test.de");
        assert_eq!(u.path, "");
        assert_eq!(u.query, None);
        assert_eq!(u.fragment, None);
        assert_eq!(u.segments().count(), 0);
    }

    #[test]
    fn empty_query_and_fragment_are_present() {
        let u = parse_uri("http://h/?#").expect("parse");
        assert_eq!(u.path, "/");
        assert_eq!(u.query, Some(""));
        assert_eq!(u.fragment, Some(""));
        assert_eq!(u.segments().count(), 0);
    }

    #[test]
    fn rootless_and_ip_literal() {
        let u = parse_uri("mailto:someone@example.com").expect("parse");
        assert!(u.authority.is_none());
        assert_eq!(u.path, "someone@example.com");

        let u = parse_uri("http://[::1]:80/x").expect("parse");
        assert_eq!(u.host(), "[::1]");
        assert_eq!(u.authority.and_then(|a| a.port), Some("80"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_uri("not a url"), Err(UriError::MissingScheme));
        assert_eq!(parse_uri("/relative/path"), Err(UriError::MissingScheme));
        assert_eq!(parse_uri("1http://x"), Err(UriError::MissingScheme));
        assert!(matches!(
            parse_uri("http://exa mple.com/"),
            Err(UriError::InvalidCharacter { component: "host", .. })
        ));
        assert!(matches!(
            parse_uri("http://h/a%zz"),
            Err(UriError::BadPercentEncoding(_))
        ));
        assert!(matches!(
            parse_uri("http://h:80x/"),
            Err(UriError::InvalidPort(_))
        ));
        assert!(matches!(
            parse_uri("http://h/a b"),
            Err(UriError::InvalidCharacter { component: "path", .. })
        ));
    }

    #[test]
    fn decodes_percent_escapes() {
        assert_eq!(percent_decode_lossy("b%20c"), "b c");
        assert_eq!(percent_decode_lossy("plain"), "plain");
        assert_eq!(percent_decode_lossy("%C3%A4"), "ä");
        assert_eq!(percent_decode_lossy("%FF"), "\u{FFFD}");
    }
}
