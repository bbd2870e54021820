//! Directive-expression evaluator
//!
//! Evaluates the boolean/arithmetic expressions behind `!if` and `!elseif`
//! against the combined macro/PCD scope. Tokenization uses a vanilla logos
//! lexer; evaluation is precedence-climbing recursive descent with C-like
//! operator precedence.
//!
//! Operands are decimal or `0x` hex integers, quoted strings, `TRUE`/`FALSE`
//! (case-insensitive), `$(MACRO)` references, and bare identifiers (macro or
//! `Space.Name` PCD references). Referencing an undefined name is an error
//! that the preprocessor reports as a fatal `DirectiveError`.

use logos::Logos;

use crate::scope::MacroScope;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t]+")]
pub enum ExprToken {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    #[token("||")]
    OrOr,
    #[token("&&")]
    AndAnd,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("&")]
    Amp,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,

    #[regex(r"0[xX][0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok())]
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""[^"]*""#, |lex| lex.slice().trim_matches('"').to_string())]
    Str(String),

    #[regex(r"\$\([A-Za-z_][A-Za-z0-9_]*\)", |lex| {
        let s = lex.slice();
        s[2..s.len() - 1].to_string()
    })]
    Macro(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_\.]*", |lex| lex.slice().to_string())]
    Ident(String),
}

/// An evaluated operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Str(s) => {
                if s.eq_ignore_ascii_case("TRUE") {
                    true
                } else if s.eq_ignore_ascii_case("FALSE") {
                    false
                } else {
                    !s.is_empty()
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A macro or PCD name with no binding in scope.
    Undefined(String),
    /// Anything else: bad token, missing operand, type mismatch.
    Parse(String),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Undefined(name) => write!(f, "undefined macro '{}'", name),
            EvalError::Parse(reason) => write!(f, "{}", reason),
        }
    }
}

/// Evaluate `text` to a [`Value`].
pub fn evaluate(text: &str, scope: &MacroScope) -> Result<Value, EvalError> {
    let mut tokens = Vec::new();
    for item in ExprToken::lexer(text) {
        match item {
            Ok(tok) => tokens.push(tok),
            Err(()) => return Err(EvalError::Parse(format!("bad token in '{}'", text))),
        }
    }
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        scope,
    };
    let value = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(EvalError::Parse(format!(
            "trailing tokens after expression in '{}'",
            text
        )));
    }
    Ok(value)
}

/// Evaluate `text` and coerce to boolean.
pub fn evaluate_bool(text: &str, scope: &MacroScope) -> Result<bool, EvalError> {
    evaluate(text, scope).map(|v| v.truthy())
}

/// Parse a standalone decimal or `0x` hex literal.
pub fn parse_integer(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse::<u64>().ok()
    }
}

struct ExprParser<'a> {
    tokens: Vec<ExprToken>,
    pos: usize,
    scope: &'a MacroScope,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&ExprToken> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<ExprToken> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &ExprToken) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&ExprToken::OrOr) {
            let rhs = self.and_expr()?;
            lhs = Value::Int((lhs.truthy() || rhs.truthy()) as i64);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.bitor_expr()?;
        while self.eat(&ExprToken::AndAnd) {
            let rhs = self.bitor_expr()?;
            lhs = Value::Int((lhs.truthy() && rhs.truthy()) as i64);
        }
        Ok(lhs)
    }

    fn bitor_expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.bitxor_expr()?;
        while self.eat(&ExprToken::Pipe) {
            let rhs = self.bitxor_expr()?;
            lhs = Value::Int(int_of(&lhs)? | int_of(&rhs)?);
        }
        Ok(lhs)
    }

    fn bitxor_expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.bitand_expr()?;
        while self.eat(&ExprToken::Caret) {
            let rhs = self.bitand_expr()?;
            lhs = Value::Int(int_of(&lhs)? ^ int_of(&rhs)?);
        }
        Ok(lhs)
    }

    fn bitand_expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.equality_expr()?;
        while self.eat(&ExprToken::Amp) {
            let rhs = self.equality_expr()?;
            lhs = Value::Int(int_of(&lhs)? & int_of(&rhs)?);
        }
        Ok(lhs)
    }

    fn equality_expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.relational_expr()?;
        loop {
            if self.eat(&ExprToken::EqEq) {
                let rhs = self.relational_expr()?;
                lhs = Value::Int(values_equal(&lhs, &rhs) as i64);
            } else if self.eat(&ExprToken::NotEq) {
                let rhs = self.relational_expr()?;
                lhs = Value::Int(!values_equal(&lhs, &rhs) as i64);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn relational_expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.shift_expr()?;
        loop {
            let op = match self.peek() {
                Some(ExprToken::Less) => "<",
                Some(ExprToken::Greater) => ">",
                Some(ExprToken::LessEq) => "<=",
                Some(ExprToken::GreaterEq) => ">=",
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.shift_expr()?;
            let (a, b) = (int_of(&lhs)?, int_of(&rhs)?);
            let result = match op {
                "<" => a < b,
                ">" => a > b,
                "<=" => a <= b,
                _ => a >= b,
            };
            lhs = Value::Int(result as i64);
        }
    }

    fn shift_expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.additive_expr()?;
        loop {
            if self.eat(&ExprToken::Shl) {
                let rhs = self.additive_expr()?;
                lhs = Value::Int(int_of(&lhs)? << int_of(&rhs)?);
            } else if self.eat(&ExprToken::Shr) {
                let rhs = self.additive_expr()?;
                lhs = Value::Int(int_of(&lhs)? >> int_of(&rhs)?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn additive_expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.multiplicative_expr()?;
        loop {
            if self.eat(&ExprToken::Plus) {
                let rhs = self.multiplicative_expr()?;
                lhs = Value::Int(int_of(&lhs)?.wrapping_add(int_of(&rhs)?));
            } else if self.eat(&ExprToken::Minus) {
                let rhs = self.multiplicative_expr()?;
                lhs = Value::Int(int_of(&lhs)?.wrapping_sub(int_of(&rhs)?));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn multiplicative_expr(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.unary_expr()?;
        loop {
            if self.eat(&ExprToken::Star) {
                let rhs = self.unary_expr()?;
                lhs = Value::Int(int_of(&lhs)?.wrapping_mul(int_of(&rhs)?));
            } else if self.eat(&ExprToken::Slash) {
                let rhs = self.unary_expr()?;
                let d = int_of(&rhs)?;
                if d == 0 {
                    return Err(EvalError::Parse("division by zero".into()));
                }
                lhs = Value::Int(int_of(&lhs)? / d);
            } else if self.eat(&ExprToken::Percent) {
                let rhs = self.unary_expr()?;
                let d = int_of(&rhs)?;
                if d == 0 {
                    return Err(EvalError::Parse("division by zero".into()));
                }
                lhs = Value::Int(int_of(&lhs)? % d);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary_expr(&mut self) -> Result<Value, EvalError> {
        if self.eat(&ExprToken::Bang) {
            let v = self.unary_expr()?;
            return Ok(Value::Int(!v.truthy() as i64));
        }
        if self.eat(&ExprToken::Tilde) {
            let v = self.unary_expr()?;
            return Ok(Value::Int(!int_of(&v)?));
        }
        if self.eat(&ExprToken::Minus) {
            let v = self.unary_expr()?;
            return Ok(Value::Int(-int_of(&v)?));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, EvalError> {
        match self.bump() {
            Some(ExprToken::Int(n)) => Ok(Value::Int(n)),
            Some(ExprToken::Str(s)) => Ok(Value::Str(s)),
            Some(ExprToken::Macro(name)) => self.resolve(&name),
            Some(ExprToken::Ident(name)) => {
                if name.eq_ignore_ascii_case("TRUE") {
                    Ok(Value::Int(1))
                } else if name.eq_ignore_ascii_case("FALSE") {
                    Ok(Value::Int(0))
                } else {
                    self.resolve(&name)
                }
            }
            Some(ExprToken::LParen) => {
                let v = self.or_expr()?;
                if !self.eat(&ExprToken::RParen) {
                    return Err(EvalError::Parse("missing ')'".into()));
                }
                Ok(v)
            }
            Some(tok) => Err(EvalError::Parse(format!("unexpected token {:?}", tok))),
            None => Err(EvalError::Parse("missing operand".into())),
        }
    }

    /// Resolve a macro or PCD reference to a value. Numeric-looking bindings
    /// become integers so they compose with arithmetic.
    fn resolve(&self, name: &str) -> Result<Value, EvalError> {
        let raw = self
            .scope
            .lookup(name)
            .or_else(|| self.scope.pcd(name))
            .ok_or_else(|| EvalError::Undefined(name.to_string()))?;
        if let Some(n) = parse_integer(raw) {
            return Ok(Value::Int(n as i64));
        }
        // TRUE/FALSE bindings behave like the keywords they spell.
        if raw.eq_ignore_ascii_case("TRUE") {
            return Ok(Value::Int(1));
        }
        if raw.eq_ignore_ascii_case("FALSE") {
            return Ok(Value::Int(0));
        }
        Ok(Value::Str(raw.trim_matches('"').to_string()))
    }
}

fn int_of(value: &Value) -> Result<i64, EvalError> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Str(s) => parse_integer(s)
            .map(|n| n as i64)
            .ok_or_else(|| EvalError::Parse(format!("'{}' is not a number", s))),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x.eq_ignore_ascii_case(y),
        (Value::Int(x), Value::Str(s)) | (Value::Str(s), Value::Int(x)) => {
            parse_integer(s).map(|n| n as i64) == Some(*x)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> MacroScope {
        MacroScope::new()
    }

    #[test]
    fn integer_literals_and_arithmetic() {
        let scope = empty();
        assert_eq!(evaluate("0x10 + 2 * 3", &scope), Ok(Value::Int(22)));
        assert_eq!(evaluate("(1 + 2) * 3", &scope), Ok(Value::Int(9)));
        assert_eq!(evaluate("1 << 4", &scope), Ok(Value::Int(16)));
    }

    #[test]
    fn boolean_operators() {
        let scope = empty();
        assert_eq!(evaluate_bool("1 && 0", &scope), Ok(false));
        assert_eq!(evaluate_bool("1 || 0", &scope), Ok(true));
        assert_eq!(evaluate_bool("!0", &scope), Ok(true));
        assert_eq!(evaluate_bool("TRUE && true", &scope), Ok(true));
    }

    #[test]
    fn comparisons() {
        let scope = empty();
        assert_eq!(evaluate_bool("0x100 >= 256", &scope), Ok(true));
        assert_eq!(evaluate_bool("\"abc\" == \"ABC\"", &scope), Ok(true));
        assert_eq!(evaluate_bool("\"abc\" != \"xyz\"", &scope), Ok(true));
    }

    #[test]
    fn macro_resolution() {
        let mut scope = MacroScope::new();
        scope.define_cli("SIZE", "0x1000");
        assert_eq!(evaluate("$(SIZE) / 2", &scope), Ok(Value::Int(0x800)));
        assert_eq!(
            evaluate("$(MISSING)", &scope),
            Err(EvalError::Undefined("MISSING".into()))
        );
    }

    #[test]
    fn pcd_resolution() {
        let mut scope = MacroScope::new();
        scope.set_pcd("gSpace.PcdBase", "0xFF00");
        assert_eq!(
            evaluate_bool("gSpace.PcdBase == 0xFF00", &scope),
            Ok(true)
        );
    }

    #[test]
    fn boolean_bindings_compare_with_the_keywords() {
        let mut scope = MacroScope::new();
        scope.define_cli("SECURE_BOOT", "TRUE");
        assert_eq!(evaluate_bool("$(SECURE_BOOT) == TRUE", &scope), Ok(true));
        assert_eq!(evaluate_bool("$(SECURE_BOOT) == FALSE", &scope), Ok(false));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let scope = empty();
        assert!(matches!(evaluate("1 / 0", &scope), Err(EvalError::Parse(_))));
    }

    #[test]
    fn parse_integer_accepts_both_radices() {
        assert_eq!(parse_integer("0x10"), Some(16));
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("zz"), None);
    }
}
