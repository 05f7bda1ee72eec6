//! Fractional position keys
//!
//! Ordered windows (top-k) tag each visible row with a short string key
//! whose lexicographic order matches the row order. Inserting between two
//! rows only mints one new key; neighbors keep theirs, so a single position
//! change produces O(1) downstream events.
//!
//! Keys are base-62 digit strings over `0-9A-Za-z`. `key_between(a, b)`
//! returns a key strictly between its bounds, where `None` stands for the
//! open end. Generated keys never end in the zero digit, which keeps the
//! "append a digit" growth path available on both sides.

const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn digit_index(d: u8) -> usize {
    DIGITS
        .iter()
        .position(|&c| c == d)
        .expect("fractional keys only contain base-62 digits")
}

/// A key strictly between `a` and `b` (`None` = unbounded). Panics if
/// `a >= b`; callers control both bounds so this is an internal contract,
/// not an input error.
pub fn key_between(a: Option<&str>, b: Option<&str>) -> String {
    let a = a.unwrap_or("");
    if let Some(b) = b {
        assert!(a < b, "fractional bounds out of order: {:?} >= {:?}", a, b);
        midpoint(a, Some(b))
    } else {
        midpoint(a, None)
    }
}

/// Core midpoint on digit strings. `a` may be empty (negative infinity),
/// `b == None` is positive infinity. Requires `a < b`.
fn midpoint(a: &str, b: Option<&str>) -> String {
    if let Some(b) = b {
        // Strip the longest common prefix; the midpoint extends it.
        let a_bytes = a.as_bytes();
        let b_bytes = b.as_bytes();
        let mut n = 0;
        while n < b_bytes.len() && a_bytes.get(n).copied().unwrap_or(b'0') == b_bytes[n] {
            n += 1;
        }
        if n > 0 {
            return format!("{}{}", &b[..n], midpoint(a.get(n..).unwrap_or(""), Some(&b[n..])));
        }
    }

    // First digits differ (or b is unbounded).
    let digit_a = a.as_bytes().first().map_or(0, |&d| digit_index(d));
    let digit_b = b.map_or(DIGITS.len(), |b| digit_index(b.as_bytes()[0]));

    if digit_b - digit_a > 1 {
        let mid = (digit_a + digit_b + 1) / 2;
        return (DIGITS[mid] as char).to_string();
    }

    // Consecutive leading digits.
    match b {
        Some(b) if b.len() > 1 => (b.as_bytes()[0] as char).to_string(),
        _ => format!(
            "{}{}",
            DIGITS[digit_a] as char,
            midpoint(a.get(1..).unwrap_or(""), None)
        ),
    }
}
