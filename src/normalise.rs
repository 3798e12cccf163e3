// normalise.rs
// ============================================================================
// Hinweis: Input cleanup before tokenisation: control characters dropped,
//          whitespace collapsed, lowercase, accents stripped (NFD, combining
//          marks removed), full-width ASCII folded.
// ============================================================================

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

const C_IDEOGRAPHIC_SPACE: char = '\u{3000}';
const C_MIDLINE_ELLIPSIS: char = '\u{22EF}';
const U_FULLWIDTH_FIRST: u32 = 0xFF01;
const U_FULLWIDTH_LAST: u32 = 0xFF5E;
const U_FULLWIDTH_OFFSET: u32 = 0xFEE0; // 65248

fn fold_char(ch: char) -> char {
    if ch == C_IDEOGRAPHIC_SPACE {
        return ' ';
    }
    let u = ch as u32;
    if (U_FULLWIDTH_FIRST..=U_FULLWIDTH_LAST).contains(&u) {
        return char::from_u32(u - U_FULLWIDTH_OFFSET).unwrap_or(ch);
    }
    ch
}

/// Normalises one line of source text. Script conversion (simplified to
/// traditional) is not performed.
pub fn normalise_text(s_in: &str) -> String {
    let mut out = String::with_capacity(s_in.len());
    let mut b_last_space = false;

    for ch in s_in.chars() {
        let ch = fold_char(ch);
        if ch.is_whitespace() {
            if !b_last_space {
                out.push(' ');
                b_last_space = true;
            }
            continue;
        }
        if ch.is_control() || ch == '\u{FFFD}' {
            continue;
        }
        b_last_space = false;
        if ch == C_MIDLINE_ELLIPSIS {
            out.push_str("...");
            continue;
        }
        out.extend(
            ch.to_lowercase()
                .nfd()
                .filter(|c| !is_combining_mark(*c)),
        );
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_full_width_forms() {
        assert_eq!(normalise_text("ＡＢＣ！１２３"), "abc!123");
        assert_eq!(normalise_text("你好，世界？"), "你好,世界?");
    }

    #[test]
    fn collapses_whitespace_and_drops_controls() {
        assert_eq!(normalise_text("  a\t\tb\u{3000}\u{3000}c \n"), "a b c");
        assert_eq!(normalise_text("x\u{0007}y"), "xy");
    }

    #[test]
    fn midline_ellipsis_becomes_dots() {
        assert_eq!(normalise_text("等等⋯⋯"), "等等......");
    }

    #[test]
    fn lowercases_latin() {
        assert_eq!(normalise_text("Hello WORLD"), "hello world");
    }

    #[test]
    fn strips_accents_after_lowercasing() {
        assert_eq!(normalise_text("Café CRÈME"), "cafe creme");
        // already decomposed input loses the mark as well
        assert_eq!(normalise_text("Nin\u{0303}o"), "nino");
        assert_eq!(normalise_text("粵語"), "粵語");
    }
}
