//! Declarative grammar builder for delimited text frames.
//!
//! Tracker firmwares send fixed-order, delimiter-separated text. Each decoder
//! describes its frame layout once as a token list and compiles it into an
//! anchored regular expression. Capture groups are consumed in declaration
//! order through [`crate::parser::Parser`].
//!
//! Numeric fragments use a shorthand: `d` matches one decimal digit and `x`
//! one hex digit. Everything else passes through as regex syntax, so a `.`
//! inside a numeric fragment matches the decimal separator.

use once_cell::sync::Lazy;
use regex::Regex;

/// One element of a frame grammar.
#[derive(Debug, Clone)]
enum Token {
    /// Literal text, matched verbatim.
    Text(String),
    /// Numeric fragment with `d`/`x` shorthand expanded.
    Number(String),
    /// Raw regex fragment, used for free-form fields.
    Expression(String),
    GroupBegin,
    /// Closes a group; a non-required group matches zero or one times.
    GroupEnd { required: bool },
    Or,
    /// Trailing wildcard, swallows anything left in the frame.
    Any,
}

impl Token {
    fn emit(&self, out: &mut String) {
        match self {
            Token::Text(text) => out.push_str(&regex::escape(text)),
            Token::Number(fragment) => {
                for c in fragment.chars() {
                    match c {
                        'd' => out.push_str(r"\d"),
                        'x' => out.push_str("[0-9a-fA-F]"),
                        other => out.push(other),
                    }
                }
            }
            Token::Expression(fragment) => out.push_str(fragment),
            Token::GroupBegin => out.push_str("(?:"),
            Token::GroupEnd { required: true } => out.push(')'),
            Token::GroupEnd { required: false } => out.push_str(")?"),
            Token::Or => out.push('|'),
            Token::Any => out.push_str(".*"),
        }
    }
}

/// A compiled frame grammar. Immutable and shared across all connections;
/// decoders hold one per protocol in a [`Lazy`] static.
#[derive(Debug)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    pub fn builder() -> PatternBuilder {
        PatternBuilder { tokens: Vec::new() }
    }

    /// Match a full frame. Returns `None` when the grammar does not
    /// recognize the message, which is the normal "not for us" outcome for
    /// malformed or unsupported frames.
    pub fn parser<'t>(&self, message: &'t str) -> Option<crate::parser::Parser<'t>> {
        self.regex.captures(message).map(crate::parser::Parser::new)
    }

    pub fn matches(&self, message: &str) -> bool {
        self.regex.is_match(message)
    }
}

/// Accumulates grammar tokens and compiles them into a [`Pattern`].
///
/// Construction runs once per decoder type at first use and has no side
/// effects; a grammar that fails to compile is a programming error, so
/// `build` panics rather than returning a `Result`.
#[derive(Debug)]
pub struct PatternBuilder {
    tokens: Vec<Token>,
}

impl PatternBuilder {
    pub fn text(mut self, text: &str) -> Self {
        self.tokens.push(Token::Text(text.to_string()));
        self
    }

    pub fn number(mut self, fragment: &str) -> Self {
        self.tokens.push(Token::Number(fragment.to_string()));
        self
    }

    pub fn expression(mut self, fragment: &str) -> Self {
        self.tokens.push(Token::Expression(fragment.to_string()));
        self
    }

    pub fn group_begin(mut self) -> Self {
        self.tokens.push(Token::GroupBegin);
        self
    }

    pub fn group_end(mut self, required: bool) -> Self {
        self.tokens.push(Token::GroupEnd { required });
        self
    }

    pub fn or(mut self) -> Self {
        self.tokens.push(Token::Or);
        self
    }

    pub fn any(mut self) -> Self {
        self.tokens.push(Token::Any);
        self
    }

    pub fn build(self) -> Pattern {
        let mut source = String::from("^");
        for token in &self.tokens {
            token.emit(&mut source);
        }
        source.push('$');
        let regex = Regex::new(&source)
            .unwrap_or_else(|e| panic!("invalid frame grammar {source:?}: {e}"));
        Pattern { regex }
    }
}

/// Convenience for the per-decoder statics.
pub type StaticPattern = Lazy<Pattern>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_shorthand() {
        let pattern = Pattern::builder().number("(dd)(dd.d+)").build();
        let mut parser = pattern.parser("4735.0399").unwrap();
        assert_eq!(parser.next(), Some("47"));
        assert_eq!(parser.next(), Some("35.0399"));
    }

    #[test]
    fn hex_shorthand() {
        let pattern = Pattern::builder().text("L").number("(x+)").build();
        let mut parser = pattern.parser("L000003F9").unwrap();
        assert_eq!(parser.next(), Some("000003F9"));
        assert!(pattern.parser("L000003G9").is_none());
    }

    #[test]
    fn literal_text_is_escaped() {
        let pattern = Pattern::builder().text("(").number("(d+)").text(")").build();
        assert!(pattern.matches("(123456)"));
        assert!(!pattern.matches("x123456y"));
    }

    #[test]
    fn optional_group_with_alternation() {
        let pattern = Pattern::builder()
            .number("(d+),")
            .group_begin()
            .number("d+")
            .or()
            .text("X")
            .group_end(false)
            .text(",")
            .number("(d+)")
            .build();
        assert!(pattern.matches("12,X,34"));
        assert!(pattern.matches("12,99,34"));
        assert!(pattern.matches("12,,34"));
        assert!(!pattern.matches("12,ZZ,34"));
    }

    #[test]
    fn unmatched_optional_group_yields_none() {
        let pattern = Pattern::builder()
            .group_begin()
            .number("#(d+)#")
            .group_end(false)
            .number("(d+)")
            .build();
        let mut parser = pattern.parser("42").unwrap();
        assert!(!parser.has_next());
        assert_eq!(parser.next(), None);
        assert_eq!(parser.next(), Some("42"));
    }

    #[test]
    fn trailing_any_swallows_leftovers() {
        let pattern = Pattern::builder().number("(d+)").any().build();
        assert!(pattern.matches("123 trailing garbage"));
        assert!(!pattern.matches("nope"));
    }

    #[test]
    fn full_match_is_anchored() {
        let pattern = Pattern::builder().number("(d+)").build();
        assert!(!pattern.matches("abc123"));
        assert!(!pattern.matches("123abc"));
    }
}
