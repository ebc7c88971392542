//! Serial-number template grammar.
//!
//! A template is literal text interleaved with brace-delimited tokens:
//!
//! | token                     | output                                        |
//! |---------------------------|-----------------------------------------------|
//! | `{prefix}`                | the configured prefix (empty when none)       |
//! | `{year}` / `{year:2}`     | four-digit year / last two digits             |
//! | `{month}` `{day}`         | zero-padded to two digits, or `:N` digits     |
//! | `{hour}` `{minute}`       | zero-padded to two digits, or `:N` digits     |
//! | `{counter}` `{counter:N}` | the counter value, zero-padded to `N` digits  |
//!
//! Anything else inside braces, or an unbalanced brace, is rejected when the
//! template is parsed so that a bad configuration never reaches issuance.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::errors::ServiceError;

const MAX_DATE_WIDTH: usize = 4;
const MAX_COUNTER_WIDTH: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Prefix,
    Year { width: usize },
    Month { width: usize },
    Day { width: usize },
    Hour { width: usize },
    Minute { width: usize },
    Counter { width: usize },
}

/// A parsed, validated serial-number template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialTemplate {
    tokens: Vec<Token>,
}

impl SerialTemplate {
    pub fn parse(source: &str) -> Result<Self, ServiceError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices();

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(invalid(source, format!("nested '{{' at {}", pos)))
                            }
                            other => body.push(other),
                        }
                    }
                    if !closed {
                        return Err(invalid(source, format!("unclosed '{{' at {}", pos)));
                    }
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(parse_token(source, &body)?);
                }
                '}' => return Err(invalid(source, format!("unmatched '}}' at {}", pos))),
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self { tokens })
    }

    /// Basic format used when no template is configured:
    /// `YYYYMMDD-{marker}-{counter}` with the counter padded to `counter_width`.
    pub fn fallback(marker: &str, counter_width: usize) -> Self {
        Self {
            tokens: vec![
                Token::Year { width: 4 },
                Token::Month { width: 2 },
                Token::Day { width: 2 },
                Token::Literal(format!("-{}-", marker)),
                Token::Counter {
                    width: counter_width.min(MAX_COUNTER_WIDTH),
                },
            ],
        }
    }

    pub fn has_prefix_token(&self) -> bool {
        self.tokens.iter().any(|t| matches!(t, Token::Prefix))
    }

    pub fn has_counter_token(&self) -> bool {
        self.tokens.iter().any(|t| matches!(t, Token::Counter { .. }))
    }

    /// Renders one identifier. A non-empty prefix is prepended when the
    /// template has no `{prefix}` token of its own.
    pub fn render(&self, prefix: Option<&str>, at: DateTime<Utc>, counter: i64) -> String {
        let prefix = prefix.unwrap_or_default();
        let mut out = String::new();

        if !prefix.is_empty() && !self.has_prefix_token() {
            out.push_str(prefix);
        }

        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Prefix => out.push_str(prefix),
                Token::Year { width: 2 } => push_padded(&mut out, i64::from(at.year() % 100), 2),
                Token::Year { width } => push_padded(&mut out, i64::from(at.year()), *width),
                Token::Month { width } => push_padded(&mut out, i64::from(at.month()), *width),
                Token::Day { width } => push_padded(&mut out, i64::from(at.day()), *width),
                Token::Hour { width } => push_padded(&mut out, i64::from(at.hour()), *width),
                Token::Minute { width } => push_padded(&mut out, i64::from(at.minute()), *width),
                Token::Counter { width } => push_padded(&mut out, counter, *width),
            }
        }

        out
    }
}

impl std::str::FromStr for SerialTemplate {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_token(source: &str, body: &str) -> Result<Token, ServiceError> {
    let (name, width) = match body.split_once(':') {
        Some((name, width)) => {
            let width: usize = width
                .trim()
                .parse()
                .map_err(|_| invalid(source, format!("bad width in '{{{}}}'", body)))?;
            (name.trim(), Some(width))
        }
        None => (body.trim(), None),
    };

    let date_width = |default: usize| -> Result<usize, ServiceError> {
        match width {
            None => Ok(default),
            Some(w) if (1..=MAX_DATE_WIDTH).contains(&w) => Ok(w),
            Some(w) => Err(invalid(source, format!("width {} out of range for '{}'", w, name))),
        }
    };

    match name {
        "prefix" if width.is_none() => Ok(Token::Prefix),
        "prefix" => Err(invalid(source, "'{prefix}' takes no width".to_string())),
        "year" => match width {
            None | Some(4) => Ok(Token::Year { width: 4 }),
            Some(2) => Ok(Token::Year { width: 2 }),
            Some(w) => Err(invalid(source, format!("year width must be 2 or 4, got {}", w))),
        },
        "month" => Ok(Token::Month { width: date_width(2)? }),
        "day" => Ok(Token::Day { width: date_width(2)? }),
        "hour" => Ok(Token::Hour { width: date_width(2)? }),
        "minute" => Ok(Token::Minute { width: date_width(2)? }),
        "counter" => match width {
            None => Ok(Token::Counter { width: 0 }),
            Some(w) if (1..=MAX_COUNTER_WIDTH).contains(&w) => Ok(Token::Counter { width: w }),
            Some(w) => Err(invalid(source, format!("counter width {} out of range", w))),
        },
        other => Err(invalid(source, format!("unknown token '{{{}}}'", other))),
    }
}

fn push_padded(out: &mut String, value: i64, width: usize) {
    out.push_str(&format!("{:0width$}", value, width = width));
}

fn invalid(source: &str, reason: String) -> ServiceError {
    ServiceError::InvalidConfiguration(format!("serial template \"{}\": {}", source, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;

    fn march_fifth() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 9, 7, 0).unwrap()
    }

    #[test]
    fn renders_category_template() {
        let template = SerialTemplate::parse("{prefix}-{year}{month:2}{day:2}-{counter:4}").unwrap();
        let rendered: Vec<_> = (7..=9)
            .map(|n| template.render(Some("AX"), march_fifth(), n))
            .collect();
        assert_eq!(
            rendered,
            vec!["AX-20240305-0007", "AX-20240305-0008", "AX-20240305-0009"]
        );
    }

    #[rstest]
    #[case("{year:2}{month}{day}", "240305")]
    #[case("{hour}:{minute}", "09:07")]
    #[case("{hour:1}h", "9h")]
    #[case("SN{counter}", "SN42")]
    #[case("plain", "plain")]
    #[case("", "")]
    fn renders_tokens(#[case] source: &str, #[case] expected: &str) {
        let template = SerialTemplate::parse(source).unwrap();
        assert_eq!(template.render(None, march_fifth(), 42), expected);
    }

    #[test]
    fn prefix_is_prepended_when_template_lacks_token() {
        let template = SerialTemplate::parse("{counter:3}").unwrap();
        assert_eq!(template.render(Some("PX-"), march_fifth(), 5), "PX-005");
        assert_eq!(template.render(Some(""), march_fifth(), 5), "005");
    }

    #[test]
    fn prefix_token_without_prefix_renders_empty() {
        let template = SerialTemplate::parse("{prefix}{counter:2}").unwrap();
        assert_eq!(template.render(None, march_fifth(), 3), "03");
    }

    #[test]
    fn counter_wider_than_width_is_not_truncated() {
        let template = SerialTemplate::parse("{counter:2}").unwrap();
        assert_eq!(template.render(None, march_fifth(), 12345), "12345");
    }

    #[rstest]
    #[case("{serial}")]
    #[case("{year:3}")]
    #[case("{counter:x}")]
    #[case("{counter:0}")]
    #[case("{month:9}")]
    #[case("{prefix:2}")]
    #[case("{counter")]
    #[case("counter}")]
    #[case("{{counter}}")]
    fn rejects_malformed_templates(#[case] source: &str) {
        assert_matches!(
            SerialTemplate::parse(source),
            Err(ServiceError::InvalidConfiguration(_))
        );
    }

    #[test]
    fn fallback_combines_date_marker_and_counter() {
        let template = SerialTemplate::fallback("WIDGET", 4);
        assert_eq!(template.render(None, march_fifth(), 12), "20240305-WIDGET-0012");
        assert!(template.has_counter_token());
        assert!(!template.has_prefix_token());
    }

    #[test]
    fn date_only_template_has_no_counter() {
        let template = SerialTemplate::parse("{prefix}-{year}").unwrap();
        assert!(!template.has_counter_token());
        assert!(template.has_prefix_token());
    }

    proptest! {
        #[test]
        fn brace_free_text_renders_verbatim(text in "[A-Za-z0-9_./ -]{0,24}") {
            let template = SerialTemplate::parse(&text).unwrap();
            prop_assert_eq!(template.render(None, march_fifth(), 1), text);
        }

        #[test]
        fn distinct_counters_render_distinct_serials(a in 0i64..1_000_000, b in 0i64..1_000_000) {
            prop_assume!(a != b);
            let template = SerialTemplate::parse("{prefix}-{year}{month}{day}-{counter:6}").unwrap();
            prop_assert_ne!(
                template.render(Some("AX"), march_fifth(), a),
                template.render(Some("AX"), march_fifth(), b)
            );
        }

        #[test]
        fn padded_counter_has_at_least_width_digits(width in 1usize..=12, value in 0i64..1_000_000) {
            let template = SerialTemplate::parse(&format!("{{counter:{}}}", width)).unwrap();
            let rendered = template.render(None, march_fifth(), value);
            prop_assert!(rendered.len() >= width);
            prop_assert_eq!(rendered.parse::<i64>().unwrap(), value);
        }
    }
}
