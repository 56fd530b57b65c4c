//! Character reference decoding.
//!
//! Works on a slice of characters so callers can map the decoded character
//! back to the position of its `&`.

/// Names the tokenizer recognizes even without a trailing semicolon.
const LEGACY_NAMES: &[&str] = &[
    "amp", "AMP", "lt", "LT", "gt", "GT", "quot", "QUOT", "nbsp", "copy", "COPY", "reg", "REG",
    "laquo", "raquo", "not", "deg", "plusmn", "middot", "times", "divide", "frac12", "frac14",
    "frac34", "para", "sect", "cent", "pound", "yen", "shy", "uml", "acute", "cedil", "micro",
    "iexcl", "iquest", "ordf", "ordm", "sup1", "sup2", "sup3", "macr", "curren", "brvbar",
];

fn named(name: &str) -> Option<char> {
    let ch = match name {
        "amp" | "AMP" => '&',
        "lt" | "LT" => '<',
        "gt" | "GT" => '>',
        "quot" | "QUOT" => '"',
        "apos" => '\'',
        "nbsp" => '\u{00A0}',
        "copy" | "COPY" => '©',
        "reg" | "REG" => '®',
        "trade" => '™',
        "laquo" => '«',
        "raquo" => '»',
        "lsaquo" => '‹',
        "rsaquo" => '›',
        "ldquo" => '“',
        "rdquo" => '”',
        "lsquo" => '‘',
        "rsquo" => '’',
        "sbquo" => '‚',
        "bdquo" => '„',
        "hellip" => '…',
        "ndash" => '–',
        "mdash" => '—',
        "bull" => '•',
        "middot" => '·',
        "ensp" => '\u{2002}',
        "emsp" => '\u{2003}',
        "thinsp" => '\u{2009}',
        "zwnj" => '\u{200C}',
        "zwj" => '\u{200D}',
        "shy" => '\u{00AD}',
        "euro" => '€',
        "cent" => '¢',
        "pound" => '£',
        "yen" => '¥',
        "curren" => '¤',
        "sect" => '§',
        "para" => '¶',
        "deg" => '°',
        "plusmn" => '±',
        "times" => '×',
        "divide" => '÷',
        "not" => '¬',
        "micro" => 'µ',
        "uml" => '¨',
        "acute" => '´',
        "cedil" => '¸',
        "macr" => '¯',
        "brvbar" => '¦',
        "iexcl" => '¡',
        "iquest" => '¿',
        "ordf" => 'ª',
        "ordm" => 'º',
        "sup1" => '¹',
        "sup2" => '²',
        "sup3" => '³',
        "frac12" => '½',
        "frac14" => '¼',
        "frac34" => '¾',
        "larr" => '←',
        "rarr" => '→',
        "uarr" => '↑',
        "darr" => '↓',
        "hearts" => '♥',
        "check" => '✓',
        _ => return None,
    };
    Some(ch)
}

/// Decode the character reference starting at `chars[pos]` (an `&`).
///
/// Returns the decoded character and how many source characters the
/// reference spans, or `None` when the `&` is literal text. Inside attribute
/// values a reference without semicolon followed by `=` or an alphanumeric
/// character stays literal.
pub fn decode_reference(chars: &[char], pos: usize, in_attribute: bool) -> Option<(char, usize)> {
    if chars.get(pos) != Some(&'&') {
        return None;
    }
    match chars.get(pos + 1)? {
        '#' => decode_numeric(chars, pos),
        c if c.is_ascii_alphanumeric() => decode_named(chars, pos, in_attribute),
        _ => None,
    }
}

fn decode_numeric(chars: &[char], pos: usize) -> Option<(char, usize)> {
    let mut i = pos + 2;
    let radix = match chars.get(i) {
        Some('x') | Some('X') => {
            i += 1;
            16
        }
        _ => 10,
    };
    let digits_start = i;
    let mut code: u32 = 0;
    while let Some(digit) = chars.get(i).and_then(|c| c.to_digit(radix)) {
        code = code.saturating_mul(radix).saturating_add(digit);
        i += 1;
    }
    if i == digits_start {
        return None;
    }
    if chars.get(i) == Some(&';') {
        i += 1;
    }
    let ch = match code {
        0 => '\u{FFFD}',
        0x80..=0x9F => windows_1252(code),
        code => char::from_u32(code).unwrap_or('\u{FFFD}'),
    };
    Some((ch, i - pos))
}

/// C1 control references are read as the Windows-1252 characters at those
/// positions. The five undefined positions pass through unchanged.
fn windows_1252(code: u32) -> char {
    match code {
        0x80 => '\u{20AC}',
        0x82 => '\u{201A}',
        0x83 => '\u{0192}',
        0x84 => '\u{201E}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{02C6}',
        0x89 => '\u{2030}',
        0x8A => '\u{0160}',
        0x8B => '\u{2039}',
        0x8C => '\u{0152}',
        0x8E => '\u{017D}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{02DC}',
        0x99 => '\u{2122}',
        0x9A => '\u{0161}',
        0x9B => '\u{203A}',
        0x9C => '\u{0153}',
        0x9E => '\u{017E}',
        0x9F => '\u{0178}',
        other => char::from_u32(other).unwrap_or('\u{FFFD}'),
    }
}

fn decode_named(chars: &[char], pos: usize, in_attribute: bool) -> Option<(char, usize)> {
    let start = pos + 1;
    let mut end = start;
    while chars.get(end).is_some_and(|c| c.is_ascii_alphanumeric()) {
        end += 1;
    }
    let name: String = chars[start..end].iter().collect();

    if chars.get(end) == Some(&';') {
        if let Some(ch) = named(&name) {
            return Some((ch, end + 1 - pos));
        }
    }

    // Longest legacy name that prefixes the run.
    for len in (1..=name.len()).rev() {
        let prefix = &name[..len];
        if !LEGACY_NAMES.contains(&prefix) {
            continue;
        }
        let ch = named(prefix)?;
        let next = chars.get(start + len);
        if in_attribute && next.is_some_and(|c| *c == '=' || c.is_ascii_alphanumeric()) {
            return None;
        }
        return Some((ch, len + 1));
    }
    None
}
