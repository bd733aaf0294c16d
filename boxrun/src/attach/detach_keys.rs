//! Detach key sequence parsing.
//!
//! A sequence is a comma-separated list of keys: single characters or
//! `ctrl-<c>` where `<c>` is `a`-`z`, `@`, `[`, `\`, `]`, `^` or `_`.

use boxrun_shared::errors::{BoxrunError, BoxrunResult};

/// Parse a detach sequence into the bytes the daemon will match on.
pub fn parse(keys: &str) -> BoxrunResult<Vec<u8>> {
    let mut codes = Vec::new();
    for key in keys.split(',') {
        let code = match key.strip_prefix("ctrl-") {
            Some(rest) => ctrl_code(rest).ok_or_else(|| unknown(key))?,
            None if key.len() == 1 => key.as_bytes()[0],
            None => return Err(unknown(key)),
        };
        codes.push(code);
    }
    Ok(codes)
}

fn ctrl_code(rest: &str) -> Option<u8> {
    let mut chars = rest.chars();
    let c = chars.next()?.to_ascii_lowercase();
    if chars.next().is_some() {
        return None;
    }
    match c {
        'a'..='z' => Some(c as u8 - b'a' + 1),
        '@' => Some(0),
        '[' => Some(27),
        '\\' => Some(28),
        ']' => Some(29),
        '^' => Some(30),
        '_' => Some(31),
        _ => None,
    }
}

fn unknown(key: &str) -> BoxrunError {
    BoxrunError::InvalidArgument(format!("Unknown character: '{}'", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence() {
        assert_eq!(parse("ctrl-p,ctrl-q").unwrap(), vec![16, 17]);
    }

    #[test]
    fn mixed_sequence() {
        assert_eq!(parse("a,ctrl-@,ctrl-\\,ctrl-_").unwrap(), vec![b'a', 0, 28, 31]);
        assert_eq!(parse("ctrl-A").unwrap(), vec![1]);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse("ctrl-").is_err());
        assert!(parse("ctrl-ab").is_err());
        assert!(parse("ctrl-1").is_err());
        assert!(parse("ab").is_err());
        assert!(parse("a,,b").is_err());
    }
}
