//! Placement constraint DSL.
//!
//! Constraints are S-expressions evaluated against an `(offer, slot)` pair:
//!
//! ```text
//! (and (like hostname "web-.*") (not (unique hostname)))
//! (contains rack "r1")
//! (unique hostname)
//! ```
//!
//! Predicates:
//! - `unique <subject>` — only `hostname` is supported: admissible iff no
//!   live task of the same application already occupies the offer's host
//! - `like <subject> <regex>` — unanchored regex match
//! - `contains <subject> <needle>` — substring match
//!
//! `like`/`contains` subjects are `hostname`, `agentid`, or the name of a
//! text-valued offer attribute. Composition is `and`, `or`, `not`;
//! evaluation is left-to-right with short-circuit.
//!
//! Grammar and regex problems surface from [`parse`]; the restriction table
//! surfaces from [`Constraint::validate`]. Evaluation never fails — missing
//! attributes evaluate to false.

mod parser;

use std::collections::HashSet;

use regex::Regex;
use thiserror::Error;

use crate::offer::Offer;

pub use parser::{parse, ParseError};

/// What a predicate inspects on the offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Hostname,
    AgentId,
    /// A user-defined text attribute, by name.
    Attribute(String),
}

impl Subject {
    pub fn parse(word: &str) -> Self {
        match word {
            "hostname" => Subject::Hostname,
            "agentid" => Subject::AgentId,
            other => Subject::Attribute(other.to_string()),
        }
    }

    /// Resolves the subject against an offer. `None` when the attribute is
    /// absent or not text-valued.
    fn resolve<'a>(&self, offer: &'a Offer) -> Option<&'a str> {
        match self {
            Subject::Hostname => Some(offer.hostname.as_str()),
            Subject::AgentId => Some(offer.agent_id.as_str()),
            Subject::Attribute(name) => offer.text_attr(name),
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Hostname => f.write_str("hostname"),
            Subject::AgentId => f.write_str("agentid"),
            Subject::Attribute(name) => f.write_str(name),
        }
    }
}

/// A parsed constraint expression.
#[derive(Debug, Clone)]
pub enum Constraint {
    And(Box<Constraint>, Box<Constraint>),
    Or(Box<Constraint>, Box<Constraint>),
    Not(Box<Constraint>),
    Unique(Subject),
    Like(Subject, Regex),
    Contains(Subject, String),
}

/// Context for one evaluation: the offer under consideration plus the
/// hostnames already occupied by live tasks of the slot's application.
#[derive(Debug)]
pub struct EvalContext<'a> {
    pub offer: &'a Offer,
    pub hostnames_in_use: &'a HashSet<String>,
}

/// Errors from the predicate/subject restriction table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'unique' supports only 'hostname', got '{subject}'")]
    UniqueSubject { subject: String },
}

impl Constraint {
    /// Checks the restriction table: `unique` is limited to `hostname`;
    /// `like` and `contains` accept hostname, agentid, or any attribute.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Constraint::And(lhs, rhs) | Constraint::Or(lhs, rhs) => {
                lhs.validate()?;
                rhs.validate()
            }
            Constraint::Not(inner) => inner.validate(),
            Constraint::Unique(subject) => {
                if *subject == Subject::Hostname {
                    Ok(())
                } else {
                    Err(ValidationError::UniqueSubject {
                        subject: subject.to_string(),
                    })
                }
            }
            Constraint::Like(_, _) | Constraint::Contains(_, _) => Ok(()),
        }
    }

    /// Evaluates the constraint. Infallible: anything unresolvable is false.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            Constraint::And(lhs, rhs) => lhs.eval(ctx) && rhs.eval(ctx),
            Constraint::Or(lhs, rhs) => lhs.eval(ctx) || rhs.eval(ctx),
            Constraint::Not(inner) => !inner.eval(ctx),
            Constraint::Unique(subject) => match subject {
                Subject::Hostname => !ctx.hostnames_in_use.contains(&ctx.offer.hostname),
                _ => false,
            },
            Constraint::Like(subject, regex) => subject
                .resolve(ctx.offer)
                .is_some_and(|value| regex.is_match(value)),
            Constraint::Contains(subject, needle) => subject
                .resolve(ctx.offer)
                .is_some_and(|value| value.contains(needle.as_str())),
        }
    }
}

/// Parses and validates in one step.
pub fn compile(text: &str) -> Result<Constraint, crate::error::ManagerError> {
    let ast = parse(text)?;
    ast.validate()?;
    Ok(ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::{Attribute, AttributeValue, Offer, Resources};
    use osprey_id::{AgentId, OfferId};

    fn offer(hostname: &str) -> Offer {
        Offer {
            id: OfferId::new("o1"),
            agent_id: AgentId::new("agent-7"),
            hostname: hostname.to_string(),
            resources: Resources::default(),
            port_ranges: vec![],
            attributes: vec![Attribute {
                name: "rack".to_string(),
                value: AttributeValue::Text("r1-b2".to_string()),
            }],
        }
    }

    fn eval(text: &str, offer: &Offer, in_use: &[&str]) -> bool {
        let hostnames: HashSet<String> = in_use.iter().map(|s| s.to_string()).collect();
        compile(text).unwrap().eval(&EvalContext {
            offer,
            hostnames_in_use: &hostnames,
        })
    }

    #[test]
    fn like_matches_hostname() {
        let o = offer("web-3.dc1");
        assert!(eval(r#"(like hostname "web-.*")"#, &o, &[]));
        assert!(!eval(r#"(like hostname "db-.*")"#, &o, &[]));
    }

    #[test]
    fn like_matches_agentid_and_attributes() {
        let o = offer("h1");
        assert!(eval(r#"(like agentid "agent-[0-9]+")"#, &o, &[]));
        assert!(eval(r#"(contains rack "b2")"#, &o, &[]));
        // Missing attribute resolves to false, never an error.
        assert!(!eval(r#"(contains zone "b2")"#, &o, &[]));
    }

    #[test]
    fn unique_hostname_consults_live_hosts() {
        let o = offer("h1");
        assert!(eval("(unique hostname)", &o, &[]));
        assert!(eval("(unique hostname)", &o, &["h2"]));
        assert!(!eval("(unique hostname)", &o, &["h1", "h2"]));
    }

    #[test]
    fn composition_and_negation() {
        let o = offer("web-1");
        assert!(eval(
            r#"(and (like hostname "web-.*") (unique hostname))"#,
            &o,
            &[]
        ));
        assert!(!eval(
            r#"(and (like hostname "web-.*") (unique hostname))"#,
            &o,
            &["web-1"]
        ));
        assert!(eval(
            r#"(or (like hostname "db-.*") (contains rack "r1"))"#,
            &o,
            &[]
        ));
        assert!(eval(r#"(not (like hostname "db-.*"))"#, &o, &[]));
    }

    #[test]
    fn validate_rejects_unique_on_other_subjects() {
        let ast = parse("(unique agentid)").unwrap();
        assert!(matches!(
            ast.validate(),
            Err(ValidationError::UniqueSubject { .. })
        ));
        let nested = parse(r#"(and (unique rack) (like hostname "x"))"#).unwrap();
        assert!(nested.validate().is_err());
    }
}
