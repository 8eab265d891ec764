use lazy_static::lazy_static;
use regex::{Matches, Regex};

lazy_static! {
    // `\w` is Unicode-aware: letters, marks, digits and connector punctuation.
    static ref WORD: Regex = Regex::new(r"\w+").expect("valid regex");
}

/// Lazy sequence of lower-cased word tokens over a borrowed text.
pub struct Tokens<'t> {
    matches: Matches<'static, 't>,
}

impl<'t> Iterator for Tokens<'t> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.matches.next().map(|m| m.as_str().to_lowercase())
    }
}

/// Split text into lower-cased word tokens. Punctuation and whitespace are separators.
pub fn tokenize(text: &str) -> Tokens<'_> {
    let re: &'static Regex = &WORD;
    Tokens { matches: re.find_iter(text) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t: Vec<String> = tokenize("Hello, World! snake_case 42").collect();
        assert_eq!(t, vec!["hello", "world", "snake_case", "42"]);
    }

    #[test]
    fn empty_and_punctuation_only() {
        assert_eq!(tokenize("").count(), 0);
        assert_eq!(tokenize(" ,.;!? -- ").count(), 0);
    }
}
