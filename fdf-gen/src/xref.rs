//! Cross-reference checks run before any composition starts.
//!
//! Two properties are enforced over the containment graph (FD regions,
//! FV-image sections, capsule payloads):
//!
//! 1. No containment cycles. Generation recurses through `fv_bytes` and
//!    `capsule_bytes`, so a cycle would never terminate.
//! 2. A firmware volume is placed either directly in an FD region or as a
//!    capsule payload, never both: the two placements imply different
//!    base-address handling and a volume cannot satisfy both.

use std::collections::HashSet;

use fdf_parser::document::{
    CapsulePayload, Document, FvFile, LeafKind, RegionContent, SectionSpec,
};
use fdf_parser::error::{CycleError, Result, SemanticError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    Fd(String),
    Fv(String),
    Capsule(String),
}

impl Node {
    fn fd(name: &str) -> Self {
        Node::Fd(name.to_ascii_uppercase())
    }
    fn fv(name: &str) -> Self {
        Node::Fv(name.to_ascii_uppercase())
    }
    fn capsule(name: &str) -> Self {
        Node::Capsule(name.to_ascii_uppercase())
    }

    fn describe(&self) -> (&'static str, &str) {
        match self {
            Node::Fd(n) => ("FD", n),
            Node::Fv(n) => ("FV", n),
            Node::Capsule(n) => ("capsule", n),
        }
    }
}

pub fn check(document: &Document) -> Result<()> {
    check_exclusivity(document)?;
    check_cycles(document)
}

/// A volume may appear in FD regions or capsule payloads, not both.
fn check_exclusivity(document: &Document) -> Result<()> {
    let mut in_fd: HashSet<String> = HashSet::new();
    for fd in &document.fds {
        for region in &fd.regions {
            if let RegionContent::Fv(names) = &region.content {
                in_fd.extend(names.iter().map(|n| n.to_ascii_uppercase()));
            }
        }
    }
    for capsule in &document.capsules {
        for payload in &capsule.payloads {
            if let CapsulePayload::Fv(name) = payload {
                if in_fd.contains(&name.to_ascii_uppercase()) {
                    return Err(SemanticError::VolumeInFdAndCapsule {
                        name: name.clone(),
                    }
                    .into());
                }
            }
        }
    }
    Ok(())
}

fn check_cycles(document: &Document) -> Result<()> {
    let roots: Vec<Node> = document
        .fds
        .iter()
        .map(|f| Node::fd(&f.name))
        .chain(document.fvs.iter().map(|f| Node::fv(&f.name)))
        .chain(document.capsules.iter().map(|c| Node::capsule(&c.name)))
        .collect();
    let mut done: HashSet<Node> = HashSet::new();
    for root in roots {
        if done.contains(&root) {
            continue;
        }
        let mut on_path: Vec<Node> = Vec::new();
        visit(document, &root, &mut on_path, &mut done)?;
    }
    Ok(())
}

fn visit(
    document: &Document,
    node: &Node,
    on_path: &mut Vec<Node>,
    done: &mut HashSet<Node>,
) -> Result<()> {
    if on_path.contains(node) {
        let (kind, name) = node.describe();
        return Err(CycleError::Containment {
            kind,
            name: name.to_string(),
        }
        .into());
    }
    if done.contains(node) {
        return Ok(());
    }
    on_path.push(node.clone());
    for next in edges(document, node) {
        visit(document, &next, on_path, done)?;
    }
    on_path.pop();
    done.insert(node.clone());
    Ok(())
}

/// Direct containment edges of one node. References to names that do not
/// exist in the document are skipped here; generation reports them with
/// full referrer context.
fn edges(document: &Document, node: &Node) -> Vec<Node> {
    let mut out = Vec::new();
    match node {
        Node::Fd(name) => {
            if let Some(fd) = document.fd(name) {
                for region in &fd.regions {
                    match &region.content {
                        RegionContent::Fv(names) => {
                            out.extend(names.iter().map(|n| Node::fv(n)));
                        }
                        RegionContent::Capsule(names) => {
                            out.extend(names.iter().map(|n| Node::capsule(n)));
                        }
                        _ => {}
                    }
                }
            }
        }
        Node::Fv(name) => {
            if let Some(fv) = document.fv(name) {
                for file in &fv.files {
                    if let FvFile::File(stmt) = file {
                        collect_fv_images(&stmt.sections, &mut out);
                    }
                }
            }
        }
        Node::Capsule(name) => {
            if let Some(capsule) = document.capsule(name) {
                for payload in &capsule.payloads {
                    match payload {
                        CapsulePayload::Fv(n) => out.push(Node::fv(n)),
                        CapsulePayload::Fd(n) => out.push(Node::fd(n)),
                        _ => {}
                    }
                }
            }
        }
    }
    out
}

fn collect_fv_images(sections: &[SectionSpec], out: &mut Vec<Node>) {
    for spec in sections {
        match spec {
            SectionSpec::Leaf {
                kind: LeafKind::FvImage(name),
                ..
            } => out.push(Node::fv(name)),
            SectionSpec::Leaf { .. } => {}
            SectionSpec::Compress { children, .. }
            | SectionSpec::GuidDefined { children, .. } => {
                collect_fv_images(children, out);
            }
        }
    }
}
