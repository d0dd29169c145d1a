//! ISBN-10 / ISBN-13 conversions.

/// Convert an ISBN-10 to its ISBN-13 form by prepending `978` and recomputing
/// the check digit. Returns `None` if the input is not a valid ISBN-10 shape.
pub fn to13(isbn10: &str) -> Option<String> {
    if isbn10.len() != 10 || !isbn10.is_ascii() {
        return None;
    }

    let base = format!("978{}", &isbn10[..9]);
    let mut sum = 0u32;
    for (i, c) in base.chars().enumerate() {
        let digit = c.to_digit(10)?;
        sum += if i % 2 == 0 { digit } else { digit * 3 };
    }
    let check = (10 - sum % 10) % 10;

    Some(format!("{}{}", base, check))
}

/// Convert a `978`-prefixed ISBN-13 to its ISBN-10 form. Returns `None` if
/// the input is not a convertible ISBN-13.
pub fn to10(isbn13: &str) -> Option<String> {
    if isbn13.len() != 13 || !isbn13.is_ascii() || !isbn13.starts_with("978") {
        return None;
    }

    let base = &isbn13[3..12];
    let mut sum = 0u32;
    for (i, c) in base.chars().enumerate() {
        sum += c.to_digit(10)? * (10 - i as u32);
    }

    match (11 - sum % 11) % 11 {
        10 => Some(format!("{}X", base)),
        check => Some(format!("{}{}", base, check)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to13() {
        assert_eq!(to13("0306406152").as_deref(), Some("9780306406157"));
        assert_eq!(to13("0140449116").as_deref(), Some("9780140449112"));
        assert_eq!(to13("020161622X").as_deref(), Some("9780201616224"));
        assert_eq!(to13(""), None);
        assert_eq!(to13("123"), None);
        assert_eq!(to13("abcdefghij"), None);
    }

    #[test]
    fn test_to10() {
        assert_eq!(to10("9780306406157").as_deref(), Some("0306406152"));
        assert_eq!(to10("9780140449112").as_deref(), Some("0140449116"));
        assert_eq!(to10("9780201616224").as_deref(), Some("020161622X"));
        assert_eq!(to10(""), None);
        assert_eq!(to10("123"), None);
        assert_eq!(to10("9790000000000"), None);
        assert_eq!(to10("978abcdefghi"), None);
    }

    #[test]
    fn test_round_trip() {
        for isbn10 in ["0306406152", "0140449116", "020161622X"] {
            assert_eq!(to10(&to13(isbn10).unwrap()).as_deref(), Some(isbn10));
        }
    }
}
