//! Dependency-expression sub-compiler.
//!
//! Grammar (whitespace-separated tokens, case-sensitive keywords):
//!
//! ```text
//! depex    := [SOR] expr | BEFORE <symbol> | AFTER <symbol>
//! expr     := term (OR term)*
//! term     := factor (AND factor)*
//! factor   := NOT factor | TRUE | FALSE | ( expr ) | <symbol>
//! ```
//!
//! Symbols resolve to GUIDs once per run through the toolchain, with the
//! result memoized in [`crate::GenContext`]; an unknown symbol is fatal.
//! The opcode stream uses the PI encoding and is always terminated by END.

use fdf_parser::error::{Result, SemanticError, SyntaxError};
use fdf_parser::Location;

use crate::guid;

/// PI Depex opcodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepexOp {
    Before([u8; 16]),
    After([u8; 16]),
    Push([u8; 16]),
    And,
    Or,
    Not,
    True,
    False,
    End,
    Sor,
}

impl DepexOp {
    pub fn opcode(&self) -> u8 {
        match self {
            DepexOp::Before(_) => 0x00,
            DepexOp::After(_) => 0x01,
            DepexOp::Push(_) => 0x02,
            DepexOp::And => 0x03,
            DepexOp::Or => 0x04,
            DepexOp::Not => 0x05,
            DepexOp::True => 0x06,
            DepexOp::False => 0x07,
            DepexOp::End => 0x08,
            DepexOp::Sor => 0x09,
        }
    }
}

/// Serialize an opcode stream to bytes.
pub fn encode(ops: &[DepexOp]) -> Vec<u8> {
    let mut out = Vec::new();
    for op in ops {
        out.push(op.opcode());
        match op {
            DepexOp::Before(g) | DepexOp::After(g) | DepexOp::Push(g) => {
                out.extend_from_slice(g);
            }
            _ => {}
        }
    }
    out
}

/// Compile an expression to a postfix opcode stream. `resolve` maps a
/// symbol name to its GUID text; `module` names the owner for diagnostics.
pub fn compile(
    expression: &str,
    module: &str,
    mut resolve: impl FnMut(&str) -> Option<String>,
) -> Result<Vec<DepexOp>> {
    // Parentheses may arrive glued to symbols; detach them here.
    let mut tokens: Vec<&str> = Vec::new();
    for word in expression.split_whitespace() {
        let mut rest = word;
        while let Some(stripped) = rest.strip_prefix('(') {
            tokens.push("(");
            rest = stripped;
        }
        let mut closers = 0;
        while let Some(stripped) = rest.strip_suffix(')') {
            closers += 1;
            rest = stripped;
        }
        if !rest.is_empty() {
            tokens.push(rest);
        }
        for _ in 0..closers {
            tokens.push(")");
        }
    }
    let mut c = Compiler {
        tokens,
        pos: 0,
        module,
        resolve: &mut resolve,
        ops: Vec::new(),
    };
    c.depex()?;
    c.ops.push(DepexOp::End);
    if c.pos != c.tokens.len() {
        return Err(SyntaxError::Expected {
            location: Location::new(module, 0),
            expected: "end of Depex expression".into(),
            found: c.tokens[c.pos].to_string(),
        }
        .into());
    }
    Ok(c.ops)
}

struct Compiler<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
    module: &'a str,
    resolve: &'a mut dyn FnMut(&str) -> Option<String>,
    ops: Vec<DepexOp>,
}

impl Compiler<'_> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<&str> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, keyword: &str) -> bool {
        if self.peek() == Some(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn symbol_guid(&mut self, symbol: &str) -> Result<[u8; 16]> {
        let text = (self.resolve)(symbol).ok_or_else(|| SemanticError::UnresolvedDepexSymbol {
            symbol: symbol.to_string(),
            module: self.module.to_string(),
        })?;
        guid::parse(&text)
    }

    fn depex(&mut self) -> Result<()> {
        // BEFORE/AFTER are whole-expression forms.
        if self.eat("BEFORE") {
            let sym = self.require("a symbol after BEFORE")?;
            let g = self.symbol_guid(&sym)?;
            self.ops.push(DepexOp::Before(g));
            return Ok(());
        }
        if self.eat("AFTER") {
            let sym = self.require("a symbol after AFTER")?;
            let g = self.symbol_guid(&sym)?;
            self.ops.push(DepexOp::After(g));
            return Ok(());
        }
        if self.eat("SOR") {
            self.ops.push(DepexOp::Sor);
        }
        self.expr()
    }

    fn expr(&mut self) -> Result<()> {
        self.term()?;
        while self.eat("OR") {
            self.term()?;
            self.ops.push(DepexOp::Or);
        }
        Ok(())
    }

    fn term(&mut self) -> Result<()> {
        self.factor()?;
        while self.eat("AND") {
            self.factor()?;
            self.ops.push(DepexOp::And);
        }
        Ok(())
    }

    fn factor(&mut self) -> Result<()> {
        if self.eat("NOT") {
            self.factor()?;
            self.ops.push(DepexOp::Not);
            return Ok(());
        }
        if self.eat("TRUE") {
            self.ops.push(DepexOp::True);
            return Ok(());
        }
        if self.eat("FALSE") {
            self.ops.push(DepexOp::False);
            return Ok(());
        }
        if self.eat("(") {
            self.expr()?;
            if !self.eat(")") {
                return Err(self.expected("')'"));
            }
            return Ok(());
        }
        let sym = self.require("a Depex symbol")?;
        if matches!(sym.as_str(), "AND" | "OR" | "NOT" | "END" | "SOR") {
            return Err(SyntaxError::Expected {
                location: Location::new(self.module, 0),
                expected: "a Depex symbol".into(),
                found: sym,
            }
            .into());
        }
        let g = self.symbol_guid(&sym)?;
        self.ops.push(DepexOp::Push(g));
        Ok(())
    }

    fn require(&mut self, context: &str) -> Result<String> {
        match self.bump() {
            Some(tok) => Ok(tok.to_string()),
            None => Err(SyntaxError::UnexpectedEof {
                location: Location::new(self.module, 0),
                context: context.to_string(),
            }
            .into()),
        }
    }

    fn expected(&self, what: &str) -> fdf_parser::FdfError {
        SyntaxError::Expected {
            location: Location::new(self.module, 0),
            expected: what.into(),
            found: self.peek().unwrap_or("end of expression").to_string(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdf_parser::error::{FdfError, SemanticError};

    const G1: &str = "8C8CE578-8A3D-4F1C-9935-896185C32DD3";
    const G2: &str = "EE4E5898-3914-4259-9D6E-DC7BD79403CF";

    fn resolve(sym: &str) -> Option<String> {
        match sym {
            "gA" => Some(G1.to_string()),
            "gB" => Some(G2.to_string()),
            _ => None,
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let ops = compile("gA OR gB AND gA", "M", resolve).unwrap();
        assert_eq!(
            ops.iter().map(DepexOp::opcode).collect::<Vec<_>>(),
            // gA (gB gA AND) OR END
            vec![0x02, 0x02, 0x02, 0x03, 0x04, 0x08]
        );
    }

    #[test]
    fn glued_parentheses_group_correctly() {
        let ops = compile("NOT (gA OR gB)", "M", resolve).unwrap();
        assert_eq!(
            ops.iter().map(DepexOp::opcode).collect::<Vec<_>>(),
            vec![0x02, 0x02, 0x04, 0x05, 0x08]
        );
    }

    #[test]
    fn sor_prefixes_the_stream() {
        let ops = compile("SOR gA", "M", resolve).unwrap();
        assert_eq!(ops[0], DepexOp::Sor);
        assert!(matches!(ops[1], DepexOp::Push(_)));
        assert_eq!(ops.last(), Some(&DepexOp::End));
    }

    #[test]
    fn before_takes_one_symbol() {
        let ops = compile("BEFORE gB", "M", resolve).unwrap();
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], DepexOp::Before(_)));
    }

    #[test]
    fn unresolved_symbol_names_the_module() {
        let err = compile("gMissing", "Drivers/X.inf", resolve).unwrap_err();
        match err {
            FdfError::Semantic(SemanticError::UnresolvedDepexSymbol { symbol, module }) => {
                assert_eq!(symbol, "gMissing");
                assert_eq!(module, "Drivers/X.inf");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn encode_interleaves_guids_after_push() {
        let ops = compile("gA", "M", resolve).unwrap();
        let bytes = encode(&ops);
        assert_eq!(bytes.len(), 1 + 16 + 1);
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes[17], 0x08);
    }
}
