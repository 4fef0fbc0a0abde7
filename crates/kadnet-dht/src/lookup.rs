//! Transport-agnostic iterative `FIND_NODE`/`FIND_VALUE` lookup.
//!
//! The algorithm is expressed against the [`LookupTransport`] trait rather
//! than a concrete socket, so it can be driven in tests by an in-memory
//! mock with no networking involved — the same shape the teacher uses for
//! its bootstrap routine (`ochra-dht::bootstrap::BootstrapTransport`).

use std::future::Future;

use tracing::debug;

use crate::identifier::Identifier;
use crate::routing_table::{dedup_by_id, sort_by_distance, Contact};
use crate::{DhtError, Result};

/// What a single probe of a contact during a lookup round can come back
/// with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeResponse {
    /// The peer returned the value directly (only possible when
    /// `find_value` was set).
    Value(Vec<u8>),
    /// The peer returned its closest known contacts to the target.
    Nodes(Vec<Contact>),
    /// The peer did not respond in time, or its response was malformed.
    NoResponse,
}

/// What an [`iterative_lookup`] call produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupOutcome {
    /// `find_value` was set and some peer held the value.
    Value(Vec<u8>),
    /// The up-to-k closest contacts discovered, sorted ascending by
    /// distance to the target.
    Nodes(Vec<Contact>),
}

/// The network operation the lookup engine needs: probe one contact for
/// either its closest nodes to `target`, or (if `find_value`) the value
/// itself.
pub trait LookupTransport {
    /// Probe `contact` for `target`. `find_value` selects `FIND_VALUE`
    /// semantics over plain `FIND_NODE`.
    fn probe(
        &self,
        contact: &Contact,
        target: &Identifier,
        find_value: bool,
    ) -> impl Future<Output = ProbeResponse> + Send;
}

/// Run the iterative lookup for `target`, seeding the shortlist from
/// `seed_contacts` (the caller's up-to-α locally-known closest contacts)
/// and using `transport` to issue probes. `alpha` bounds per-round
/// parallelism candidates and `k` bounds the final result size, so a
/// caller can drive both off its own configuration rather than the crate
/// defaults.
///
/// Takes a contact snapshot rather than a `&RoutingTable` so the caller
/// never needs to hold the table's lock for the lookup's duration — only
/// long enough to read `n_closest` once, before any network I/O starts.
///
/// Returns [`DhtError::EmptyRoutingTable`] if `seed_contacts` is empty.
pub async fn iterative_lookup<T: LookupTransport>(
    seed_contacts: &[Contact],
    transport: &T,
    target: &Identifier,
    find_value: bool,
    alpha: usize,
    k: usize,
) -> Result<LookupOutcome> {
    let mut shortlist = sort_by_distance(seed_contacts.to_vec(), target);
    shortlist.truncate(alpha);
    if shortlist.is_empty() {
        return Err(DhtError::EmptyRoutingTable);
    }

    let mut contacted: Vec<Identifier> = Vec::new();
    let mut closest_seen = shortlist[0].id.clone();

    let mut round = 0u32;
    loop {
        round += 1;
        debug!(round, shortlist_len = shortlist.len(), target = %target, "lookup round starting");
        let mut found_nodes: Vec<Contact> = Vec::new();
        let to_probe: Vec<Contact> = shortlist
            .iter()
            .filter(|c| !contacted.contains(&c.id))
            .cloned()
            .collect();

        for contact in &to_probe {
            contacted.push(contact.id.clone());
            match transport.probe(contact, target, find_value).await {
                ProbeResponse::Value(v) if find_value => return Ok(LookupOutcome::Value(v)),
                ProbeResponse::Value(_) => {
                    // Shouldn't happen (find_value was false), treat as no nodes learned.
                }
                ProbeResponse::Nodes(nodes) => found_nodes.extend(nodes),
                ProbeResponse::NoResponse => {}
            }
        }

        let merged = dedup_by_id(
            shortlist
                .iter()
                .cloned()
                .chain(found_nodes.into_iter())
                .collect(),
        );
        shortlist = sort_by_distance(merged, target);

        let new_closest = match shortlist.first() {
            Some(c) => c.id.clone(),
            None => break,
        };

        let old_distance = closest_seen.xor_distance(target);
        let new_distance = new_closest.xor_distance(target);
        let no_progress = match (&old_distance, &new_distance) {
            (Ok(old), Ok(new)) => old <= new,
            _ => true,
        };

        if no_progress {
            debug!(round, "lookup converged, no closer contact found");
            break;
        }
        closest_seen = new_closest;
    }

    shortlist.truncate(k);
    Ok(LookupOutcome::Nodes(shortlist))
}
