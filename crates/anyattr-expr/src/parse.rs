//! Lexer and recursive-descent parser.
//!
//! Precedence, loosest first: ternary, `||`, `&&`, equality, relational,
//! additive, multiplicative, unary, postfix (method call, index).
//!
//! The parser tracks how deep the tree under construction is and stops
//! with [`EvalError::DepthExceeded`] at the configured limit, so hostile
//! input fails cleanly instead of exhausting the stack.

use crate::error::EvalError;
use crate::eval::EvalConfig;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Long(i64),
    Double(f64),
    Str(String),
    Ident(String),
    Sym(&'static str),
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Long(n) => n.to_string(),
            Tok::Double(d) => d.to_string(),
            Tok::Str(s) => format!("'{}'", s),
            Tok::Ident(name) => name.clone(),
            Tok::Sym(s) => format!("'{}'", s),
        }
    }
}

const SYMBOLS: [&str; 23] = [
    "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!", "?", ":", "(", ")",
    ",", ".", "[", "]", "=",
];

fn lex(src: &str) -> Result<Vec<(Tok, usize)>, EvalError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c == '\'' || c == '"' {
            let start = i;
            let mut text = String::new();
            i += 1;
            let mut chars = src[i..].char_indices();
            let mut closed = false;
            while let Some((off, ch)) = chars.next() {
                if ch == '\\' {
                    if let Some((_, esc)) = chars.next() {
                        text.push(match esc {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                } else if ch == c {
                    i += off + 1;
                    closed = true;
                    break;
                } else {
                    text.push(ch);
                }
            }
            if !closed {
                return Err(EvalError::UnterminatedString { pos: start });
            }
            out.push((Tok::Str(text), start));
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                // a dot followed by a non-digit is a method call on the number
                if bytes[i] == b'.' && !bytes.get(i + 1).map_or(false, u8::is_ascii_digit) {
                    break;
                }
                i += 1;
            }
            let text = &src[start..i];
            let tok = if text.contains('.') {
                text.parse::<f64>().map(Tok::Double).ok()
            } else {
                text.parse::<i64>().map(Tok::Long).ok()
            };
            match tok {
                Some(tok) => out.push((tok, start)),
                None => {
                    return Err(EvalError::InvalidNumber {
                        pos: start,
                        text: text.to_string(),
                    })
                }
            }
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$') {
                i += 1;
            }
            let word = &src[start..i];
            let tok = match word {
                "and" => Tok::Sym("&&"),
                "or" => Tok::Sym("||"),
                "not" => Tok::Sym("!"),
                "eq" => Tok::Sym("=="),
                "ne" => Tok::Sym("!="),
                "lt" => Tok::Sym("<"),
                "le" => Tok::Sym("<="),
                "gt" => Tok::Sym(">"),
                "ge" => Tok::Sym(">="),
                _ => Tok::Ident(word.to_string()),
            };
            out.push((tok, start));
            continue;
        }

        let sym = SYMBOLS.iter().find(|s| src[i..].starts_with(**s));
        match sym {
            Some(&"=") => return Err(EvalError::UnexpectedChar { pos: i, ch: '=' }),
            Some(s) => {
                out.push((Tok::Sym(s), i));
                i += s.len();
            }
            None => {
                let ch = src[i..].chars().next().unwrap_or(c);
                return Err(EvalError::UnexpectedChar { pos: i, ch });
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Method {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
}

/// Parses a complete expression with the default nesting limit.
pub fn parse(src: &str) -> Result<Expr, EvalError> {
    parse_with_limit(src, EvalConfig::default().max_depth)
}

/// Parses a complete expression whose tree may nest at most `max_depth`
/// levels.
pub fn parse_with_limit(src: &str, max_depth: usize) -> Result<Expr, EvalError> {
    let tokens = lex(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let expr = parser.ternary()?;
    match parser.peek() {
        None => Ok(expr),
        Some((tok, pos)) => Err(EvalError::UnexpectedToken {
            pos: *pos,
            expected: "end of expression".into(),
            found: tok.describe(),
        }),
    }
}

struct Parser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    /// Height of the subtree currently being built.
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<(), EvalError> {
        if self.depth >= self.max_depth {
            return Err(EvalError::DepthExceeded { limit: self.max_depth });
        }
        self.depth += 1;
        Ok(())
    }

    /// Runs `rule` one level deeper.
    fn nested(&mut self, rule: fn(&mut Parser) -> Result<Expr, EvalError>) -> Result<Expr, EvalError> {
        self.descend()?;
        let out = rule(self);
        self.depth -= 1;
        out
    }

    fn peek(&self) -> Option<&(Tok, usize)> {
        self.tokens.get(self.pos)
    }

    fn peek_sym(&self) -> Option<&'static str> {
        match self.peek() {
            Some((Tok::Sym(s), _)) => Some(s),
            _ => None,
        }
    }

    fn eat(&mut self, sym: &str) -> bool {
        if self.peek_sym() == Some(sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, sym: &'static str) -> Result<(), EvalError> {
        if self.eat(sym) {
            return Ok(());
        }
        match self.peek() {
            Some((tok, pos)) => Err(EvalError::UnexpectedToken {
                pos: *pos,
                expected: format!("'{}'", sym),
                found: tok.describe(),
            }),
            None => Err(EvalError::UnexpectedEnd {
                expected: format!("'{}'", sym),
            }),
        }
    }

    fn ternary(&mut self) -> Result<Expr, EvalError> {
        self.nested(Parser::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, EvalError> {
        let cond = self.or()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.ternary()?;
        self.expect(":")?;
        let otherwise = self.ternary()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut left = self.and()?;
        while self.eat("||") {
            self.descend()?;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut left = self.binary_level(0)?;
        while self.eat("&&") {
            self.descend()?;
            let right = self.binary_level(0)?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    /// Levels: equality, relational, additive, multiplicative.
    fn binary_level(&mut self, level: usize) -> Result<Expr, EvalError> {
        const LEVELS: [&[(&str, BinaryOp)]; 4] = [
            &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
        ];

        let next = |p: &mut Parser| {
            if level + 1 < LEVELS.len() {
                p.binary_level(level + 1)
            } else {
                p.unary()
            }
        };

        let base = self.depth;
        let mut left = next(self)?;
        loop {
            let op = self
                .peek_sym()
                .and_then(|s| LEVELS[level].iter().find(|(sym, _)| *sym == s))
                .map(|(_, op)| *op);
            let Some(op) = op else {
                self.depth = base;
                return Ok(left);
            };
            self.pos += 1;
            self.descend()?;
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat("!") {
            return Ok(Expr::Not(Box::new(self.nested(Parser::unary)?)));
        }
        if self.eat("-") {
            return Ok(Expr::Neg(Box::new(self.nested(Parser::unary)?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut expr = self.primary()?;
        loop {
            if matches!(self.peek_sym(), Some(".") | Some("[")) {
                self.descend()?;
            }
            if self.eat(".") {
                let name = self.ident("method name")?;
                self.expect("(")?;
                let args = self.args(")")?;
                expr = Expr::Method {
                    target: Box::new(expr),
                    name,
                    args,
                };
            } else if self.eat("[") {
                let index = self.ternary()?;
                self.expect("]")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                self.depth = base;
                return Ok(expr);
            }
        }
    }

    fn ident(&mut self, expected: &str) -> Result<String, EvalError> {
        match self.tokens.get(self.pos).cloned() {
            Some((Tok::Ident(name), _)) => {
                self.pos += 1;
                Ok(name)
            }
            Some((tok, pos)) => Err(EvalError::UnexpectedToken {
                pos,
                expected: expected.to_string(),
                found: tok.describe(),
            }),
            None => Err(EvalError::UnexpectedEnd {
                expected: expected.to_string(),
            }),
        }
    }

    /// Comma-separated expressions up to `close`, which is consumed.
    fn args(&mut self, close: &'static str) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.ternary()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(",")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let Some((tok, pos)) = self.tokens.get(self.pos).cloned() else {
            return Err(EvalError::UnexpectedEnd {
                expected: "an operand".into(),
            });
        };
        self.pos += 1;
        match tok {
            Tok::Long(n) => Ok(Expr::Literal(Value::Long(n))),
            Tok::Double(d) => Ok(Expr::Literal(Value::Double(d))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.eat("(") => {
                    let args = self.args(")")?;
                    Ok(Expr::Call { name, args })
                }
                _ => Ok(Expr::Ident(name)),
            },
            Tok::Sym("(") => {
                let inner = self.ternary()?;
                self.expect(")")?;
                Ok(inner)
            }
            Tok::Sym("[") => Ok(Expr::List(self.args("]")?)),
            other => Err(EvalError::UnexpectedToken {
                pos,
                expected: "an operand".into(),
                found: other.describe(),
            }),
        }
    }
}
