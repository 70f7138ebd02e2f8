use crate::error::{OrchestratorError, Result};
use crate::model::Credentials;

pub const STREAM_SCHEME_PREFIX: &str = "rtsp://";

/// Resolves a candidate address into the address handed to activation.
///
/// Addresses whose authority already carries userinfo are returned as-is, so
/// applying this to its own output is a no-op.
#[must_use]
pub fn build_stream_address(candidate: &str, credentials: &Credentials) -> String {
    if has_embedded_credentials(candidate) {
        return candidate.to_owned();
    }

    let user = credentials.user.trim();
    let secret = credentials.secret.trim();
    if user.is_empty() || secret.is_empty() {
        return candidate.to_owned();
    }

    let Some(remainder) = strip_stream_scheme(candidate) else {
        return candidate.to_owned();
    };

    format!(
        "{STREAM_SCHEME_PREFIX}{}:{}@{remainder}",
        percent_encode_userinfo(user),
        percent_encode_userinfo(secret)
    )
}

#[must_use]
pub fn has_embedded_credentials(address: &str) -> bool {
    split_authority(address).is_some_and(|(_, authority, _)| authority.contains('@'))
}

#[must_use]
pub fn is_well_formed(address: &str) -> bool {
    strip_stream_scheme(address).is_some()
}

/// Checks an address before it is sent anywhere and returns it trimmed.
pub fn validate_stream_address(address: &str) -> Result<&str> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(OrchestratorError::validation("address required"));
    }
    if !is_well_formed(trimmed) {
        return Err(OrchestratorError::validation(format!(
            "must start with {STREAM_SCHEME_PREFIX}"
        )));
    }
    Ok(trimmed)
}

/// Address with any userinfo removed, for display next to other candidates.
pub fn strip_credentials(address: &str) -> Result<String> {
    let mut parsed = url::Url::parse(address.trim())
        .map_err(|err| OrchestratorError::validation(format!("invalid stream address: {err}")))?;

    parsed
        .set_username("")
        .map_err(|()| OrchestratorError::validation("failed clearing username"))?;
    parsed
        .set_password(None)
        .map_err(|()| OrchestratorError::validation("failed clearing password"))?;

    Ok(parsed.to_string())
}

/// Masks the secret part of the userinfo. Used before an address reaches a log line.
///
/// When the userinfo cannot be told apart from the path, everything between
/// the scheme and the last `@` is masked.
#[must_use]
pub fn redact(address: &str) -> String {
    let Some((scheme, authority, tail)) = split_authority(address) else {
        return address.to_owned();
    };
    let Some((userinfo, host)) = authority.rsplit_once('@') else {
        return match tail.rsplit_once('@') {
            Some((_, after)) if tail.contains(':') || authority.contains(':') => {
                format!("{scheme}://***@{after}")
            }
            _ => address.to_owned(),
        };
    };

    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}{tail}"),
        None => format!("{scheme}://{userinfo}@{host}{tail}"),
    }
}

pub(crate) fn host_label(address: &str) -> Option<String> {
    let parsed = url::Url::parse(address.trim()).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default().unwrap_or(554);
    Some(format!("{host}:{port}"))
}

fn strip_stream_scheme(address: &str) -> Option<&str> {
    let prefix = address.get(..STREAM_SCHEME_PREFIX.len())?;
    if prefix.eq_ignore_ascii_case(STREAM_SCHEME_PREFIX) {
        Some(&address[STREAM_SCHEME_PREFIX.len()..])
    } else {
        None
    }
}

fn split_authority(address: &str) -> Option<(&str, &str, &str)> {
    let (scheme, rest) = address.split_once("://")?;
    let host_start = userinfo_end(rest).map_or(0, |at| at + 1);
    let end = rest[host_start..]
        .find(['/', '?', '#'])
        .map_or(rest.len(), |offset| host_start + offset);
    let (authority, tail) = rest.split_at(end);
    Some((scheme, authority, tail))
}

/// Offset of the `@` that closes the userinfo in `rest` (the text after `://`).
///
/// Typed secrets are often left unencoded, so `user:pa/ss@host` still counts
/// as userinfo: a `user:` prefix ahead of the first delimiter followed by a
/// later `@`. A prefix whose text after `:` is all digits is a port instead.
fn userinfo_end(rest: &str) -> Option<usize> {
    let plain_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    if let Some(at) = rest[..plain_end].rfind('@') {
        return Some(at);
    }

    let colon = rest[..plain_end].find(':')?;
    let after_colon = &rest[colon + 1..plain_end];
    if after_colon.is_empty() || after_colon.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let at = rest.rfind('@')?;
    (at > plain_end).then_some(at)
}

fn percent_encode_userinfo(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for b in value.bytes() {
        let is_unreserved = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~');
        if is_unreserved {
            encoded.push(char::from(b));
        } else {
            let _ = std::fmt::Write::write_fmt(&mut encoded, format_args!("%{b:02X}"));
        }
    }
    encoded
}
