//! Resource offers from the cluster manager.
//!
//! Offers are ephemeral: they arrive from the master, are matched against
//! pending slots (possibly several per offer), and whatever is not consumed
//! is declined. The scheduler never stores an offer.

use osprey_id::{AgentId, OfferId};
use serde::{Deserialize, Serialize};

/// A typed offer attribute advertised by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

/// Attribute values; the constraint DSL only consults text attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    Scalar(f64),
}

/// A scalar resource request or advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    pub gpus: f64,
}

impl Resources {
    /// True when `need` fits entirely within `self`.
    pub fn covers(&self, need: &Resources) -> bool {
        self.cpus >= need.cpus && self.mem >= need.mem && self.disk >= need.disk && self.gpus >= need.gpus
    }

    /// Subtracts `used` from this advertisement.
    pub fn deduct(&mut self, used: &Resources) {
        self.cpus -= used.cpus;
        self.mem -= used.mem;
        self.disk -= used.disk;
        self.gpus -= used.gpus;
    }
}

/// An inclusive port range advertised in an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub begin: u16,
    pub end: u16,
}

/// A resource offer from one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub agent_id: AgentId,
    pub hostname: String,
    pub resources: Resources,
    pub port_ranges: Vec<PortRange>,
    pub attributes: Vec<Attribute>,
}

impl Offer {
    /// Looks up the first text attribute with the given name.
    pub fn text_attr(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find_map(|attr| match &attr.value {
            AttributeValue::Text(text) if attr.name == name => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Mutable bookkeeping for one offer while it is matched against slots.
///
/// Matching may place several slots on one offer; the account tracks what
/// remains so later slots only see the leftovers.
#[derive(Debug)]
pub struct OfferAccount<'a> {
    pub offer: &'a Offer,
    remaining: Resources,
    free_ports: Vec<u16>,
}

impl<'a> OfferAccount<'a> {
    pub fn new(offer: &'a Offer) -> Self {
        let mut free_ports = Vec::new();
        for range in &offer.port_ranges {
            free_ports.extend(range.begin..=range.end);
        }
        Self {
            offer,
            remaining: offer.resources,
            free_ports,
        }
    }

    /// Whether the remaining resources cover `need` plus `nports` ports.
    pub fn can_fit(&self, need: &Resources, nports: usize) -> bool {
        self.remaining.covers(need) && self.free_ports.len() >= nports
    }

    /// Consumes `need` plus `nports` ports, returning the assigned ports.
    pub fn take(&mut self, need: &Resources, nports: usize) -> Option<Vec<u16>> {
        if !self.can_fit(need, nports) {
            return None;
        }
        self.remaining.deduct(need);
        Some(self.free_ports.drain(..nports).collect())
    }

    /// Remaining resources not yet consumed by matched slots.
    pub fn remaining(&self) -> &Resources {
        &self.remaining
    }

    /// True when no slot consumed anything from this offer.
    pub fn untouched(&self) -> bool {
        self.remaining == self.offer.resources
            && self.free_ports.len()
                == self
                    .offer
                    .port_ranges
                    .iter()
                    .map(|r| (r.end - r.begin) as usize + 1)
                    .sum::<usize>()
    }
}
