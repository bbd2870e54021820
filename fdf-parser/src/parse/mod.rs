//! Document model builder
//!
//! Mutually-recursive "try to consume a construct, else leave the position
//! unchanged" functions over a [`Reader`]. A construct parser returns
//! `Ok(None)`-shaped no-match signals (or uses `try_*` reader helpers and
//! rewinds) when the construct simply is not present; it returns a fatal
//! error only once a partial match cannot be completed.
//!
//! Section headers must appear in the relative order `[Defines]`, `[FD.*]`,
//! `[FV.*]`, `[Capsule.*]`, `[Rule.*]`, `[OptionRom.*]`, `[FmpPayload.*]`;
//! anything else is fatal.

mod capsule;
mod fd;
mod fmp;
mod fv;
mod optionrom;
mod rule;
mod section;

use log::debug;

use crate::document::{Alignment, Document};
use crate::error::{Location, Result, SemanticError, SyntaxError};
use crate::reader::{Reader, Token};
use crate::scope::{ScopeKey, SectionKind, COMMON_ARCH};
use crate::session::CompileSession;
use crate::source::SourceBuffer;

/// Parse a preprocessed buffer into a [`Document`].
pub fn parse(buf: &SourceBuffer, session: &mut CompileSession) -> Result<Document> {
    let mut parser = Parser {
        reader: Reader::new(buf),
        session,
        document: Document::default(),
        last_rank: 0,
    };
    parser.run()?;
    let mut document = parser.document;
    document.pcds = parser.session.scope.pcds().clone();
    Ok(document)
}

pub(crate) struct Parser<'a> {
    pub(crate) reader: Reader<'a>,
    pub(crate) session: &'a mut CompileSession,
    pub(crate) document: Document,
    last_rank: u8,
}

impl Parser<'_> {
    fn run(&mut self) -> Result<()> {
        while !self.reader.at_eof() {
            let (header, location) = self.read_section_header()?;
            self.dispatch_section(&header, location)?;
        }
        Ok(())
    }

    fn read_section_header(&mut self) -> Result<(String, Location)> {
        let open = self.reader.require_token("a section header")?;
        if !open.is_separator('[') {
            return Err(SyntaxError::Expected {
                location: open.location,
                expected: "a section header".into(),
                found: open.text,
            }
            .into());
        }
        let name = self.reader.require_token("a section name")?;
        self.reader.expect("]")?;
        Ok((name.text, name.location))
    }

    fn dispatch_section(&mut self, header: &str, location: Location) -> Result<()> {
        let mut parts = header.split('.');
        let head = parts.next().unwrap_or_default().to_ascii_uppercase();
        let kind = match head.as_str() {
            "DEFINES" => SectionKind::Defines,
            "FD" => SectionKind::Fd,
            "FV" => SectionKind::Fv,
            "CAPSULE" => SectionKind::Capsule,
            "RULE" => SectionKind::Rule,
            "OPTIONROM" => SectionKind::OptionRom,
            "FMPPAYLOAD" => SectionKind::FmpPayload,
            _ => {
                return Err(SyntaxError::BadSectionHeader {
                    location,
                    header: header.to_string(),
                }
                .into());
            }
        };
        if kind.rank() < self.last_rank {
            return Err(SyntaxError::BadSectionHeader {
                location,
                header: header.to_string(),
            }
            .into());
        }
        self.last_rank = kind.rank();
        let rest: Vec<&str> = parts.collect();
        debug!("parsing section [{}]", header);
        match kind {
            SectionKind::Defines => {
                self.session
                    .scope
                    .enter(ScopeKey::new(kind, "", COMMON_ARCH));
                self.parse_defines_body()
            }
            SectionKind::Fd => {
                let name = require_section_name(&rest, header, &location)?;
                self.session
                    .scope
                    .enter(ScopeKey::new(kind, &name, COMMON_ARCH));
                fd::parse_fd(self, &name, location)
            }
            SectionKind::Fv => {
                let name = require_section_name(&rest, header, &location)?;
                self.session
                    .scope
                    .enter(ScopeKey::new(kind, &name, COMMON_ARCH));
                fv::parse_fv(self, &name, location)
            }
            SectionKind::Capsule => {
                let name = require_section_name(&rest, header, &location)?;
                self.session
                    .scope
                    .enter(ScopeKey::new(kind, &name, COMMON_ARCH));
                capsule::parse_capsule(self, &name, location)
            }
            SectionKind::Rule => {
                // [Rule.<arch>.<module-type>[.<template>]]
                let arch = rest.first().copied().unwrap_or(COMMON_ARCH);
                let module_type = rest.get(1).copied().ok_or_else(|| {
                    SyntaxError::BadSectionHeader {
                        location: location.clone(),
                        header: header.to_string(),
                    }
                })?;
                let template = rest.get(2).copied();
                self.session
                    .scope
                    .enter(ScopeKey::new(kind, module_type, arch));
                rule::parse_rule(self, arch, module_type, template, location)
            }
            SectionKind::OptionRom => {
                let name = require_section_name(&rest, header, &location)?;
                self.session
                    .scope
                    .enter(ScopeKey::new(kind, &name, COMMON_ARCH));
                optionrom::parse_option_rom(self, &name, location)
            }
            SectionKind::FmpPayload => {
                let name = require_section_name(&rest, header, &location)?;
                self.session
                    .scope
                    .enter(ScopeKey::new(kind, &name, COMMON_ARCH));
                fmp::parse_fmp_payload(self, &name, location)
            }
        }
    }

    /// `[Defines]` bodies contain only DEFINE/SET statements, which the
    /// preprocessor already captured and blanked. Anything left is noise.
    fn parse_defines_body(&mut self) -> Result<()> {
        while let Some(tok) = self.reader.peek_token()? {
            if tok.is_separator('[') {
                break;
            }
            return Err(SyntaxError::Expected {
                location: tok.location,
                expected: "a DEFINE/SET statement or a section header".into(),
                found: tok.text,
            }
            .into());
        }
        Ok(())
    }

    /// True when the cursor sits at the next section header or EOF.
    pub(crate) fn at_section_end(&mut self) -> Result<bool> {
        match self.reader.peek_token()? {
            None => Ok(true),
            Some(tok) => Ok(tok.is_separator('[')),
        }
    }

    /// Next token with `$(MACRO)` references substituted from scope.
    pub(crate) fn value_token(&mut self, context: &str) -> Result<Token> {
        let mut tok = self.reader.require_token(context)?;
        if !tok.quoted && tok.text.contains("$(") {
            tok.text = self.session.scope.substitute(&tok.text).map_err(|name| {
                crate::error::DirectiveError::UndefinedMacro {
                    location: tok.location.clone(),
                    name,
                }
            })?;
        }
        Ok(tok)
    }

    /// Parse an integer-valued token: a literal, or a PCD/macro name bound
    /// to one.
    pub(crate) fn integer_value(&mut self, field: &'static str) -> Result<(u64, Token)> {
        let tok = self.value_token(field)?;
        let value = self.resolve_integer(&tok).ok_or_else(|| {
            SemanticError::IllegalValue {
                location: tok.location.clone(),
                field,
                value: tok.text.clone(),
            }
        })?;
        Ok((value, tok))
    }

    pub(crate) fn resolve_integer(&self, tok: &Token) -> Option<u64> {
        if let Some(n) = tok.as_integer() {
            return Some(n);
        }
        let bound = self
            .session
            .scope
            .pcd(&tok.text)
            .or_else(|| self.session.scope.lookup(&tok.text))?;
        crate::expr::parse_integer(bound)
    }

    /// Resolve a GUID-valued token: a registry-format literal, or a symbol
    /// looked up through the macro/GUID scope.
    pub(crate) fn guid_value(&mut self, context: &str) -> Result<String> {
        let tok = self.value_token(context)?;
        self.resolve_guid(&tok)
    }

    pub(crate) fn resolve_guid(&self, tok: &Token) -> Result<String> {
        if tok.is_guid_literal() {
            return Ok(tok.text.to_ascii_uppercase());
        }
        match self.session.scope.lookup(&tok.text) {
            Some(value) if crate::reader::is_guid_text(value) => {
                Ok(value.to_ascii_uppercase())
            }
            _ => Err(SemanticError::UnresolvedGuid {
                location: tok.location.clone(),
                symbol: tok.text.clone(),
            }
            .into()),
        }
    }

    pub(crate) fn alignment_value(&mut self) -> Result<Alignment> {
        let tok = self.value_token("an alignment")?;
        Alignment::parse(&tok.text).ok_or_else(|| {
            SemanticError::IllegalAlignment {
                location: tok.location,
                value: tok.text,
            }
            .into()
        })
    }

    pub(crate) fn bool_value(&mut self, field: &'static str) -> Result<bool> {
        let tok = self.value_token(field)?;
        parse_bool(&tok.text).ok_or_else(|| {
            SemanticError::IllegalValue {
                location: tok.location,
                field,
                value: tok.text,
            }
            .into()
        })
    }

    /// `{ 0x00, 0xFF, ... }` inline byte list.
    pub(crate) fn data_block(&mut self) -> Result<Vec<u8>> {
        self.reader.expect("{")?;
        let mut bytes = Vec::new();
        loop {
            let tok = self.reader.require_token("an inline data byte or '}'")?;
            if tok.is_separator('}') {
                return Ok(bytes);
            }
            if tok.is_separator(',') {
                continue;
            }
            match tok.as_integer() {
                Some(n) if n <= 0xFF => bytes.push(n as u8),
                _ => {
                    return Err(SemanticError::IllegalValue {
                        location: tok.location,
                        field: "inline data byte",
                        value: tok.text,
                    }
                    .into());
                }
            }
        }
    }
}

fn require_section_name(rest: &[&str], header: &str, location: &Location) -> Result<String> {
    if rest.is_empty() {
        return Err(SyntaxError::BadSectionHeader {
            location: location.clone(),
            header: header.to_string(),
        }
        .into());
    }
    Ok(rest.join("."))
}

pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("TRUE") || text == "1" {
        Some(true)
    } else if text.eq_ignore_ascii_case("FALSE") || text == "0" {
        Some(false)
    } else {
        None
    }
}
