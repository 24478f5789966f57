// src/matcher/sanitize.rs
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::offer::Offer;

/// Drop U+FFFD left behind by lossy decoding and non-whitespace control characters.
pub fn strip_malformed(s: &str) -> String {
    s.chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER && (c.is_whitespace() || !c.is_control()))
        .collect()
}

/// Full title cleanup: entity decode, malformed characters out, whitespace collapsed.
pub fn sanitize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let stripped = strip_malformed(&decoded);

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&stripped, " ").trim().to_string()
}

/// Clean every text field of an offer in place. The id is left untouched.
pub fn sanitize_offer(offer: &mut Offer) {
    offer.title = sanitize_text(&offer.title);
    offer.source = strip_malformed(&offer.source);
    offer.currency = strip_malformed(&offer.currency);
    offer.currency_symbol = strip_malformed(&offer.currency_symbol);
    if let Some(url) = offer.url.as_mut() {
        *url = strip_malformed(url).trim().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_entities_and_collapses_whitespace() {
        assert_eq!(
            sanitize_text("  Tata&nbsp;Salt   &amp;\tSpices\n1kg "),
            "Tata Salt & Spices 1kg"
        );
    }

    #[test]
    fn invalid_bytes_do_not_survive() {
        let raw = b"Amul \xF0\x28\x8C\x28 Butter\x07 100g";
        let out = sanitize_text(&String::from_utf8_lossy(raw));
        assert!(!out.contains(char::REPLACEMENT_CHARACTER));
        assert!(!out.chars().any(|c| c.is_control()));
        assert!(out.starts_with("Amul"));
        assert!(out.ends_with("Butter 100g"));
        assert!(serde_json::to_string(&out).is_ok());
    }

    #[test]
    fn offer_id_is_kept() {
        let mut o = Offer::new("zepto", "Milk\u{FFFD} 1L", 60.0);
        let id = o.id.clone();
        sanitize_offer(&mut o);
        assert_eq!(o.title, "Milk 1L");
        assert_eq!(o.id, id);
    }
}
