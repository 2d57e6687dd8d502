//! Safe arithmetic evaluator.
//!
//! Parses the expression into a tree and evaluates it. Permitted nodes:
//! numeric literals, the operators `+ - * / // % **`, unary sign,
//! parentheses, and a fixed whitelist of pure functions. Anything else —
//! identifiers, attribute access, strings, subscripts — fails the parse and
//! is reported as a rejected expression. Nothing is ever executed.

use async_trait::async_trait;

use fin_domain::tool::ToolDefinition;
use fin_domain::{Error, Result};

use crate::Tool;

const FUNCTIONS: &[&str] = &[
    "abs", "round", "min", "max", "sum", "sqrt", "log", "log10",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tokenizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Func(&'static str),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::DoubleStar);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    tokens.push(Token::DoubleSlash);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '+' || chars[i] == '-')
                            && matches!(chars.get(i.wrapping_sub(1)), Some('e') | Some('E'))))
                {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let value = raw.parse::<f64>().map_err(|_| {
                    Error::ToolInputRejected(format!("malformed number {raw:?}"))
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                match FUNCTIONS.iter().find(|f| **f == name) {
                    Some(f) => tokens.push(Token::Func(f)),
                    None => {
                        return Err(Error::ToolInputRejected(format!(
                            "identifier {name:?} is not a permitted function"
                        )));
                    }
                }
            }
            other => {
                return Err(Error::ToolInputRejected(format!(
                    "character {other:?} is not permitted"
                )));
            }
        }
    }

    Ok(tokens)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Expression tree
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
enum Expr {
    Number(f64),
    Unary(char, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(&'static str, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            other => Err(Error::ToolInputRejected(format!(
                "expected {want:?}, found {other:?}"
            ))),
        }
    }

    /// expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek() {
            let op = match op {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    /// term := factor (('*' | '/' | '//' | '%') factor)*
    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.factor()?;
        while let Some(op) = self.peek() {
            let op = match op {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::DoubleSlash => BinOp::FloorDiv,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    /// factor := ('+' | '-') factor | power
    fn factor(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                Ok(Expr::Unary('+', Box::new(self.factor()?)))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary('-', Box::new(self.factor()?)))
            }
            _ => self.power(),
        }
    }

    /// power := atom ('**' factor)?   — right-associative, exponent may
    /// carry its own sign.
    fn power(&mut self) -> Result<Expr> {
        let base = self.atom()?;
        if matches!(self.peek(), Some(Token::DoubleStar)) {
            self.pos += 1;
            let exponent = self.factor()?;
            return Ok(Expr::Binary(
                BinOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    /// atom := NUMBER | '(' expr ')' | FUNC '(' expr (',' expr)* ')'
    fn atom(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Func(name)) => {
                self.expect(Token::LParen)?;
                let mut args = vec![self.expr()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.pos += 1;
                    args.push(self.expr()?);
                }
                self.expect(Token::RParen)?;
                Ok(Expr::Call(name, args))
            }
            other => Err(Error::ToolInputRejected(format!(
                "unexpected token {other:?}"
            ))),
        }
    }
}

fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(Error::ToolInputRejected("empty expression".into()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::ToolInputRejected(format!(
            "trailing input at token {}",
            parser.pos
        )));
    }
    Ok(expr)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn eval(expr: &Expr) -> Result<f64> {
    let fail = |msg: String| Error::ToolFailed {
        tool: "calculate".into(),
        message: msg,
    };

    Ok(match expr {
        Expr::Number(n) => *n,
        Expr::Unary('-', inner) => -eval(inner)?,
        Expr::Unary(_, inner) => eval(inner)?,
        Expr::Binary(op, lhs, rhs) => {
            let a = eval(lhs)?;
            let b = eval(rhs)?;
            match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if b == 0.0 {
                        return Err(fail("division by zero".into()));
                    }
                    a / b
                }
                BinOp::FloorDiv => {
                    if b == 0.0 {
                        return Err(fail("division by zero".into()));
                    }
                    (a / b).floor()
                }
                BinOp::Mod => {
                    if b == 0.0 {
                        return Err(fail("modulo by zero".into()));
                    }
                    a.rem_euclid(b)
                }
                BinOp::Pow => a.powf(b),
            }
        }
        Expr::Call(name, args) => {
            let values: Vec<f64> = args.iter().map(eval).collect::<Result<_>>()?;
            let arity = |n: usize| {
                if values.len() != n {
                    Err(fail(format!("{name} expects {n} argument(s), got {}", values.len())))
                } else {
                    Ok(())
                }
            };
            match *name {
                "abs" => {
                    arity(1)?;
                    values[0].abs()
                }
                "sqrt" => {
                    arity(1)?;
                    if values[0] < 0.0 {
                        return Err(fail("sqrt of a negative number".into()));
                    }
                    values[0].sqrt()
                }
                "log10" => {
                    arity(1)?;
                    if values[0] <= 0.0 {
                        return Err(fail("log of a non-positive number".into()));
                    }
                    values[0].log10()
                }
                "log" => match values.as_slice() {
                    [x] if *x > 0.0 => x.ln(),
                    [x, base] if *x > 0.0 && *base > 0.0 => x.log(*base),
                    [_] | [_, _] => return Err(fail("log of a non-positive number".into())),
                    _ => return Err(fail("log expects 1 or 2 arguments".into())),
                },
                "round" => match values.as_slice() {
                    [x] => x.round(),
                    [x, digits] => {
                        let factor = 10f64.powi(*digits as i32);
                        (x * factor).round() / factor
                    }
                    _ => return Err(fail("round expects 1 or 2 arguments".into())),
                },
                "min" => {
                    if values.is_empty() {
                        return Err(fail("min expects at least 1 argument".into()));
                    }
                    values.iter().cloned().fold(f64::INFINITY, f64::min)
                }
                "max" => {
                    if values.is_empty() {
                        return Err(fail("max expects at least 1 argument".into()));
                    }
                    values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                }
                "sum" => values.iter().sum(),
                _ => unreachable!("tokenizer admits whitelisted functions only"),
            }
        }
    })
}

/// Evaluate an expression string, returning the formatted result.
pub fn evaluate(expression: &str) -> Result<String> {
    let expr = parse(expression)?;
    let value = eval(&expr)?;
    if !value.is_finite() {
        return Err(Error::ToolFailed {
            tool: "calculate".into(),
            message: "result is not finite".into(),
        });
    }
    // Integral results print without a trailing ".0".
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Ok(format!("{}", value as i64))
    } else {
        Ok(format!("{value}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool wrapper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "calculate".into(),
            description: "Evaluate an arithmetic expression. Supports + - * / // % **, \
                          parentheses, and abs/round/min/max/sum/sqrt/log/log10."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "expression": { "type": "string", "description": "Expression to evaluate" }
                },
                "required": ["expression"]
            }),
        }
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String> {
        let expression = crate::require_str_arg(&args, "expression")?;
        evaluate(expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_arithmetic() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), "14");
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), "20");
        assert_eq!(evaluate("10 / 4").unwrap(), "2.5");
        assert_eq!(evaluate("10 // 4").unwrap(), "2");
        assert_eq!(evaluate("10 % 3").unwrap(), "1");
    }

    #[test]
    fn power_is_right_associative_and_binds_over_unary() {
        assert_eq!(evaluate("2 ** 3 ** 2").unwrap(), "512");
        assert_eq!(evaluate("-2 ** 2").unwrap(), "-4");
        assert_eq!(evaluate("2 ** -1").unwrap(), "0.5");
    }

    #[test]
    fn whitelisted_functions() {
        assert_eq!(evaluate("abs(-5)").unwrap(), "5");
        assert_eq!(evaluate("round(2.567, 2)").unwrap(), "2.57");
        assert_eq!(evaluate("min(3, 1, 2)").unwrap(), "1");
        assert_eq!(evaluate("max(3, 1, 2)").unwrap(), "3");
        assert_eq!(evaluate("sum(1, 2, 3, 4)").unwrap(), "10");
        assert_eq!(evaluate("sqrt(16)").unwrap(), "4");
    }

    #[test]
    fn logarithms_within_float_tolerance() {
        let log10 = evaluate("log10(1000)").unwrap().parse::<f64>().unwrap();
        assert!((log10 - 3.0).abs() < 1e-9);
        let log2 = evaluate("log(8, 2)").unwrap().parse::<f64>().unwrap();
        assert!((log2 - 3.0).abs() < 1e-9);
        let ln = evaluate("log(2.718281828459045)").unwrap().parse::<f64>().unwrap();
        assert!((ln - 1.0).abs() < 1e-9);
    }

    #[test]
    fn scientific_notation() {
        assert_eq!(evaluate("1.5e3 + 500").unwrap(), "2000");
    }

    #[test]
    fn rejects_injection_attempts() {
        // The canonical escape attempt: parsed, never executed, rejected at
        // the first non-whitelisted identifier.
        let err = evaluate("__import__('os').system('ls')").unwrap_err();
        assert!(matches!(err, Error::ToolInputRejected(_)), "got {err:?}");
    }

    #[test]
    fn rejects_unknown_identifiers_and_characters() {
        assert!(matches!(
            evaluate("exec(1)").unwrap_err(),
            Error::ToolInputRejected(_)
        ));
        assert!(matches!(
            evaluate("x + 1").unwrap_err(),
            Error::ToolInputRejected(_)
        ));
        assert!(matches!(
            evaluate("1; 2").unwrap_err(),
            Error::ToolInputRejected(_)
        ));
        assert!(matches!(
            evaluate("\"abc\"").unwrap_err(),
            Error::ToolInputRejected(_)
        ));
        assert!(matches!(
            evaluate("[1, 2]").unwrap_err(),
            Error::ToolInputRejected(_)
        ));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(matches!(
            evaluate("1 2").unwrap_err(),
            Error::ToolInputRejected(_)
        ));
    }

    #[test]
    fn runtime_errors_are_tool_failures_not_rejections() {
        assert!(matches!(
            evaluate("1 / 0").unwrap_err(),
            Error::ToolFailed { .. }
        ));
        assert!(matches!(
            evaluate("sqrt(-1)").unwrap_err(),
            Error::ToolFailed { .. }
        ));
    }

    #[tokio::test]
    async fn tool_invocation_round_trip() {
        let tool = CalculateTool;
        let out = tool
            .invoke(serde_json::json!({"expression": "94.9 * 1.08"}))
            .await
            .unwrap();
        assert!(out.starts_with("102.49"));
    }
}
