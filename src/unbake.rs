//! Detect and decode the `eval(unescape(escape`…`.replace(/u(..)/g,"$1%")))`
//! packing used to share code as two ASCII characters per UTF-16 unit.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static WRAPPER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"^eval\(unescape\(escape(?:`|\('|\("|\(`)(.*?)(?:`|'\)|"\)|`\))\.replace\(/u\(\.\.\)/g,["'`]\$1%["'`]\)\)\)$"#,
    )
    .ok()
});

/// Return the decoded payload when `code` is a packed wrapper, otherwise
/// `code` unchanged.
pub fn unwrap(code: &str) -> Cow<'_, str> {
    let Some(re) = WRAPPER.as_ref() else {
        return Cow::Borrowed(code);
    };
    match re.captures(code).and_then(|c| c.get(1)) {
        Some(payload) => {
            log::debug!("unpacking {} packed characters", payload.as_str().chars().count());
            Cow::Owned(unescape(&swap_unicode_escapes(&escape(payload.as_str()))))
        }
        None => Cow::Borrowed(code),
    }
}

fn is_unreserved(unit: u16) -> bool {
    matches!(unit as u8, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'@' | b'*' | b'_' | b'+' | b'-' | b'.' | b'/')
        && unit < 0x80
}

/// JS `escape`: percent-encode per UTF-16 unit.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for unit in s.encode_utf16() {
        if is_unreserved(unit) {
            out.push(unit as u8 as char);
        } else if unit < 0x100 {
            out.push_str(&format!("%{unit:02X}"));
        } else {
            out.push_str(&format!("%u{unit:04X}"));
        }
    }
    out
}

/// `.replace(/u(..)/g, "$1%")`
fn swap_unicode_escapes(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == 'u' && i + 2 < chars.len() {
            out.push(chars[i + 1]);
            out.push(chars[i + 2]);
            out.push('%');
            i += 3;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// JS `unescape`: `%uXXXX` and `%XX` become UTF-16 units.
fn unescape(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let hex = |slice: &[char]| -> Option<u16> {
        // from_str_radix would also take a leading sign.
        if !slice.iter().all(char::is_ascii_hexdigit) {
            return None;
        }
        let text: String = slice.iter().collect();
        u16::from_str_radix(&text, 16).ok()
    };
    let mut units = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '%' {
            if chars.get(i + 1) == Some(&'u') && i + 6 <= chars.len() {
                if let Some(unit) = hex(&chars[i + 2..i + 6]) {
                    units.push(unit);
                    i += 6;
                    continue;
                }
            }
            if i + 3 <= chars.len() {
                if let Some(unit) = hex(&chars[i + 1..i + 3]) {
                    units.push(unit);
                    i += 3;
                    continue;
                }
            }
        }
        let mut buf = [0u16; 2];
        units.extend_from_slice(chars[i].encode_utf16(&mut buf));
        i += 1;
    }
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pack ASCII text two characters per UTF-16 unit.
    fn pack(text: &str) -> String {
        let bytes = text.as_bytes();
        let units: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| ((pair[0] as u16) << 8) | pair.get(1).copied().unwrap_or(b' ') as u16)
            .collect();
        String::from_utf16(&units).unwrap()
    }

    #[test]
    fn test_unwraps_backtick_form() {
        let wrapped = format!(
            "eval(unescape(escape`{}`.replace(/u(..)/g,\"$1%\")))",
            pack("t*(t>>9)&42")
        );
        assert_eq!(unwrap(&wrapped), "t*(t>>9)&42 ");
    }

    #[test]
    fn test_unwraps_quoted_form() {
        let wrapped = format!(
            "eval(unescape(escape('{}').replace(/u(..)/g,'$1%')))",
            pack("t&42")
        );
        assert_eq!(unwrap(&wrapped), "t&42");
    }

    #[test]
    fn test_plain_code_passes_through() {
        let code = "t*(t>>5|t>>8)";
        assert!(matches!(unwrap(code), Cow::Borrowed(_)));
        assert_eq!(unwrap("eval(t)"), "eval(t)");
    }

    #[test]
    fn test_escape_matches_js() {
        assert_eq!(escape("a b/é"), "a%20b/%E9");
        assert_eq!(escape("\u{7426}"), "%u7426");
        assert_eq!(unescape("%74%26%u0034"), "t&4");
    }

    #[test]
    fn test_unescape_requires_hex_digits() {
        assert_eq!(unescape("%+1"), "%+1");
        assert_eq!(unescape("%u+0ff"), "%u+0ff");
        assert_eq!(unescape("%-1%4"), "%-1%4");
        assert_eq!(unescape("%2b1"), "+1");
    }
}
