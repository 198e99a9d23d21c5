//! Typed value codec: external strings to typed values and back.
//!
//! Numbers honor a DecimalFormat-style conversion pattern (`#`, `0`, `,`,
//! `.` plus literal prefix/suffix), dates a SimpleDateFormat-style one
//! translated to chrono's strftime syntax, binaries travel as base64 and
//! encrypted values are handed to an [`Encryptor`].

use std::fmt::Write as _;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::format::{parse as parse_fields, ParseResult, Parsed, StrftimeItems};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::schema::PlainSchema;
use crate::types::AttrSchemaType;

/// Date pattern used when a Date schema has no conversion pattern.
pub const DEFAULT_DATE_PATTERN: &str = "yyyy-MM-dd'T'HH:mm:ss.SSSZ";

/// A value coerced to the representation its schema type selects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<FixedOffset>),
    Binary(Vec<u8>),
}

/// Cipher settings of an Encrypted schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherConfig {
    pub algorithm: String,
    pub secret_key: String,
}

/// One-way encryption collaborator for Encrypted schemas.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, value: &str, algorithm: &str, secret_key: &str) -> Result<String, CoreError>;
}

/// Keyed blake3 digest, the one algorithm available without an injected
/// encryptor. Accepts the algorithm name `BLAKE3`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyedDigestEncryptor;

impl KeyedDigestEncryptor {
    pub const ALGORITHM: &'static str = "BLAKE3";
    const CONTEXT: &'static str = "anyattr encrypted attribute value v1";
}

impl Encryptor for KeyedDigestEncryptor {
    fn encrypt(&self, value: &str, algorithm: &str, secret_key: &str) -> Result<String, CoreError> {
        if !algorithm.eq_ignore_ascii_case(Self::ALGORITHM) {
            return Err(CoreError::Encryption {
                algorithm: algorithm.to_string(),
                reason: "unsupported algorithm".into(),
            });
        }
        if secret_key.is_empty() {
            return Err(CoreError::Encryption {
                algorithm: algorithm.to_string(),
                reason: "empty secret key".into(),
            });
        }
        let key = blake3::derive_key(Self::CONTEXT, secret_key.as_bytes());
        let digest = blake3::keyed_hash(&key, value.as_bytes());
        Ok(BASE64.encode(digest.as_bytes()))
    }
}

/// Converts raw strings to [`TypedValue`]s and formats them back.
#[derive(Clone)]
pub struct TypeCodec {
    encryptor: Arc<dyn Encryptor>,
}

impl Default for TypeCodec {
    fn default() -> Self {
        TypeCodec::new(Arc::new(KeyedDigestEncryptor))
    }
}

impl std::fmt::Debug for TypeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeCodec").finish_non_exhaustive()
    }
}

impl TypeCodec {
    pub fn new(encryptor: Arc<dyn Encryptor>) -> Self {
        TypeCodec { encryptor }
    }

    /// Parses `raw` according to the settings of `schema`.
    pub fn parse_for(&self, schema: &PlainSchema, raw: &str) -> Result<TypedValue, CoreError> {
        self.parse(
            &schema.key,
            schema.ty,
            raw,
            schema.conversion_pattern.as_deref(),
            schema.cipher_config().as_ref(),
        )
    }

    /// Coerces `raw` to `ty`. `schema` only labels errors.
    pub fn parse(
        &self,
        schema: &str,
        ty: AttrSchemaType,
        raw: &str,
        conversion_pattern: Option<&str>,
        cipher: Option<&CipherConfig>,
    ) -> Result<TypedValue, CoreError> {
        let fail = |cause: String| CoreError::Parsing {
            schema: schema.to_string(),
            value: raw.to_string(),
            cause,
        };

        match ty {
            AttrSchemaType::String | AttrSchemaType::Enum => Ok(TypedValue::String(raw.to_string())),
            AttrSchemaType::Boolean => Ok(TypedValue::Boolean(raw.eq_ignore_ascii_case("true"))),
            AttrSchemaType::Long => match conversion_pattern {
                Some(pattern) => {
                    let number = NumberPattern::compile(pattern)
                        .and_then(|p| p.parse(raw))
                        .map_err(fail)?;
                    number.to_long().map(TypedValue::Long).map_err(fail)
                }
                None => raw
                    .parse::<i64>()
                    .map(TypedValue::Long)
                    .map_err(|e| fail(e.to_string())),
            },
            AttrSchemaType::Double => match conversion_pattern {
                Some(pattern) => {
                    let number = NumberPattern::compile(pattern)
                        .and_then(|p| p.parse(raw))
                        .map_err(fail)?;
                    number.to_double().map(TypedValue::Double).map_err(fail)
                }
                None => raw
                    .parse::<f64>()
                    .map(TypedValue::Double)
                    .map_err(|e| fail(e.to_string())),
            },
            AttrSchemaType::Date => {
                let pattern = DatePattern::compile(conversion_pattern.unwrap_or(DEFAULT_DATE_PATTERN))
                    .map_err(fail)?;
                pattern.parse(raw).map(TypedValue::Date).map_err(fail)
            }
            AttrSchemaType::Binary => BASE64
                .decode(raw)
                .map(TypedValue::Binary)
                .map_err(|e| fail(e.to_string())),
            AttrSchemaType::Encrypted => {
                let cipher = cipher.ok_or_else(|| fail("missing cipher configuration".into()))?;
                let encrypted = self
                    .encryptor
                    .encrypt(raw, &cipher.algorithm, &cipher.secret_key)?;
                Ok(TypedValue::String(encrypted))
            }
        }
    }

    /// Formats a typed value as its wire string.
    ///
    /// Patterns that fail to compile fall back to the plain rendering so that
    /// reads never fail on a misconfigured schema.
    pub fn format(value: &TypedValue, conversion_pattern: Option<&str>) -> String {
        match value {
            TypedValue::String(s) => s.clone(),
            TypedValue::Boolean(b) => b.to_string(),
            TypedValue::Long(n) => match conversion_pattern.map(NumberPattern::compile) {
                Some(Ok(pattern)) => pattern.format_long(*n),
                _ => n.to_string(),
            },
            TypedValue::Double(d) => match conversion_pattern.map(NumberPattern::compile) {
                Some(Ok(pattern)) => pattern.format_double(*d),
                _ => d.to_string(),
            },
            TypedValue::Date(date) => {
                let pattern = DatePattern::compile(conversion_pattern.unwrap_or(DEFAULT_DATE_PATTERN))
                    .or_else(|_| DatePattern::compile(DEFAULT_DATE_PATTERN));
                match pattern {
                    Ok(pattern) => pattern.format(date),
                    Err(_) => date.to_rfc3339(),
                }
            }
            TypedValue::Binary(bytes) => BASE64.encode(bytes),
        }
    }
}

// ---------------------------------------------------------------------------
// Numeric patterns
// ---------------------------------------------------------------------------

/// A compiled DecimalFormat-style pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NumberPattern {
    prefix: String,
    suffix: String,
    min_int: usize,
    grouping: Option<usize>,
    min_frac: usize,
    max_frac: usize,
}

/// Digits recognized by [`NumberPattern::parse`], kept as text so longs
/// never round-trip through `f64`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedNumber {
    negative: bool,
    int_digits: String,
    frac_digits: String,
}

impl NumberPattern {
    fn compile(pattern: &str) -> Result<Self, String> {
        let is_body = |c: char| matches!(c, '#' | '0' | ',' | '.');
        let start = pattern
            .find(is_body)
            .ok_or_else(|| format!("invalid number pattern '{}'", pattern))?;
        let end = pattern
            .rfind(is_body)
            .map(|i| i + 1)
            .unwrap_or(pattern.len());
        let (prefix, body, suffix) = (&pattern[..start], &pattern[start..end], &pattern[end..]);

        for c in prefix.chars().chain(suffix.chars()) {
            if matches!(c, ';' | '%' | 'E' | '\u{2030}' | '\u{a4}') {
                return Err(format!("unsupported number pattern '{}'", pattern));
            }
        }

        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if frac_part.contains('.') || frac_part.contains(',') {
            return Err(format!("invalid number pattern '{}'", pattern));
        }
        if !int_part.chars().all(|c| matches!(c, '#' | '0' | ',')) {
            return Err(format!("invalid number pattern '{}'", pattern));
        }
        if !frac_part.chars().all(|c| matches!(c, '#' | '0')) {
            return Err(format!("invalid number pattern '{}'", pattern));
        }

        let grouping = int_part
            .rfind(',')
            .map(|i| int_part[i + 1..].len())
            .filter(|size| *size > 0);

        Ok(NumberPattern {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            min_int: int_part.chars().filter(|c| *c == '0').count(),
            grouping,
            min_frac: frac_part.chars().take_while(|c| *c == '0').count(),
            max_frac: frac_part.len(),
        })
    }

    fn parse(&self, raw: &str) -> Result<ParsedNumber, String> {
        let mut rest = raw.trim();
        let negative = rest.starts_with('-');
        if negative {
            rest = &rest[1..];
        }
        rest = rest.strip_prefix(self.prefix.as_str()).unwrap_or(rest);
        rest = rest.strip_suffix(self.suffix.as_str()).unwrap_or(rest);

        let cleaned: String = rest.chars().filter(|c| *c != ',').collect();
        let (int_digits, frac_digits) = match cleaned.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (cleaned.clone(), String::new()),
        };

        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if int_digits.is_empty() && frac_digits.is_empty() {
            return Err(format!("'{}' is not a number", raw));
        }
        if !all_digits(&int_digits) || !all_digits(&frac_digits) {
            return Err(format!("'{}' is not a number", raw));
        }

        Ok(ParsedNumber {
            negative,
            int_digits,
            frac_digits,
        })
    }

    fn format_long(&self, n: i64) -> String {
        let digits = n.unsigned_abs().to_string();
        let frac = "0".repeat(self.min_frac);
        self.assemble(n < 0, &digits, &frac)
    }

    fn format_double(&self, d: f64) -> String {
        if !d.is_finite() {
            return d.to_string();
        }
        let rendered = format!("{:.*}", self.max_frac, d.abs());
        let (int_digits, frac_digits) = match rendered.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (rendered, String::new()),
        };
        let mut frac = frac_digits;
        while frac.len() > self.min_frac && frac.ends_with('0') {
            frac.pop();
        }
        let negative = d < 0.0 && (int_digits.chars().any(|c| c != '0') || !frac.is_empty());
        self.assemble(negative, &int_digits, &frac)
    }

    fn assemble(&self, negative: bool, int_digits: &str, frac: &str) -> String {
        let trimmed = int_digits.trim_start_matches('0');
        let mut int_part = if trimmed.len() < self.min_int {
            format!("{}{}", "0".repeat(self.min_int - trimmed.len()), trimmed)
        } else {
            trimmed.to_string()
        };
        if int_part.is_empty() && frac.is_empty() {
            int_part.push('0');
        }

        if let Some(size) = self.grouping {
            let chars: Vec<char> = int_part.chars().collect();
            let mut grouped = String::with_capacity(chars.len() + chars.len() / size);
            for (i, c) in chars.iter().enumerate() {
                if i > 0 && (chars.len() - i) % size == 0 {
                    grouped.push(',');
                }
                grouped.push(*c);
            }
            int_part = grouped;
        }

        let mut out = String::new();
        if negative {
            out.push('-');
        }
        out.push_str(&self.prefix);
        out.push_str(&int_part);
        if !frac.is_empty() {
            out.push('.');
            out.push_str(frac);
        }
        out.push_str(&self.suffix);
        out
    }
}

impl ParsedNumber {
    /// Fractional digits are truncated toward zero.
    fn to_long(&self) -> Result<i64, String> {
        let digits = if self.int_digits.is_empty() {
            "0"
        } else {
            self.int_digits.as_str()
        };
        let signed = if self.negative {
            format!("-{}", digits)
        } else {
            digits.to_string()
        };
        signed.parse::<i64>().map_err(|e| e.to_string())
    }

    fn to_double(&self) -> Result<f64, String> {
        let text = format!(
            "{}{}.{}",
            if self.negative { "-" } else { "" },
            if self.int_digits.is_empty() { "0" } else { &self.int_digits },
            if self.frac_digits.is_empty() { "0" } else { &self.frac_digits },
        );
        text.parse::<f64>().map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Date patterns
// ---------------------------------------------------------------------------

/// A SimpleDateFormat-style pattern translated to strftime.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DatePattern {
    strftime: String,
    has_zone: bool,
}

impl DatePattern {
    fn compile(pattern: &str) -> Result<Self, String> {
        let chars: Vec<char> = pattern.chars().collect();
        let mut out = String::new();
        let mut has_zone = false;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '\'' {
                // '' is a literal quote, otherwise text up to the closing quote
                if chars.get(i + 1) == Some(&'\'') {
                    out.push('\'');
                    i += 2;
                    continue;
                }
                i += 1;
                while i < chars.len() {
                    if chars[i] == '\'' {
                        if chars.get(i + 1) == Some(&'\'') {
                            out.push('\'');
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    push_literal(&mut out, chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(format!("unterminated quote in date pattern '{}'", pattern));
                }
                i += 1;
                continue;
            }

            if !c.is_ascii_alphabetic() {
                push_literal(&mut out, c);
                i += 1;
                continue;
            }

            let mut run = 1;
            while chars.get(i + run) == Some(&c) {
                run += 1;
            }
            let spec = match (c, run) {
                ('y', 2) => "%y",
                ('y', _) => "%Y",
                ('M', 1) => "%-m",
                ('M', 2) => "%m",
                ('M', 3) => "%b",
                ('M', _) => "%B",
                ('d', 1) => "%-d",
                ('d', _) => "%d",
                ('E', 1..=3) => "%a",
                ('E', _) => "%A",
                ('a', _) => "%p",
                ('H', 1) => "%-H",
                ('H', _) => "%H",
                ('h', 1) => "%-I",
                ('h', _) => "%I",
                ('m', _) => "%M",
                ('s', _) => "%S",
                ('S', 6) => "%6f",
                ('S', 9) => "%9f",
                ('S', _) => "%3f",
                ('Z', _) => "%z",
                ('X', 3) => "%:z",
                ('X', _) => "%z",
                ('z', _) => "%Z",
                _ => {
                    return Err(format!(
                        "unsupported letter '{}' in date pattern '{}'",
                        c, pattern
                    ))
                }
            };
            if matches!(c, 'Z' | 'X' | 'z') {
                has_zone = true;
            }
            out.push_str(spec);
            i += run;
        }

        Ok(DatePattern {
            strftime: out,
            has_zone,
        })
    }

    /// Fields the pattern leaves out default to 1970-01-01 00:00 UTC; a
    /// 12-hour clock without an AM/PM marker reads as AM.
    fn parse(&self, raw: &str) -> Result<DateTime<FixedOffset>, String> {
        let mut parsed = Parsed::new();
        parse_fields(&mut parsed, raw, StrftimeItems::new(&self.strftime)).map_err(|e| e.to_string())?;
        fill_missing_fields(&mut parsed).map_err(|e| e.to_string())?;
        parsed.to_datetime().map_err(|e| e.to_string())
    }

    fn format(&self, date: &DateTime<FixedOffset>) -> String {
        let mut out = String::new();
        let written = if self.has_zone {
            write!(out, "{}", date.format(&self.strftime))
        } else {
            write!(out, "{}", date.with_timezone(&Utc).format(&self.strftime))
        };
        match written {
            Ok(()) => out,
            Err(_) => date.to_rfc3339(),
        }
    }
}

fn fill_missing_fields(parsed: &mut Parsed) -> ParseResult<()> {
    if parsed.year().is_none() && parsed.year_div_100().is_none() && parsed.year_mod_100().is_none() {
        parsed.set_year(1970)?;
    }
    if parsed.month().is_none() {
        parsed.set_month(1)?;
    }
    if parsed.day().is_none() {
        parsed.set_day(1)?;
    }
    match (parsed.hour_div_12(), parsed.hour_mod_12()) {
        (None, None) => parsed.set_hour(0)?,
        (None, Some(_)) => parsed.set_ampm(false)?,
        (Some(_), None) => parsed.set_hour12(12)?,
        (Some(_), Some(_)) => {}
    }
    if parsed.minute().is_none() {
        parsed.set_minute(0)?;
    }
    if parsed.offset().is_none() {
        parsed.set_offset(0)?;
    }
    Ok(())
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}
