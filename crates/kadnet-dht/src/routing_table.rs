//! Kademlia routing table with XOR-distance metric.
//!
//! Maintains `id_width` k-buckets, one per possible bit-length of the XOR
//! distance between the local node and a remote node. Bucket `i` holds
//! contacts whose distance from the local id falls in `[2^i, 2^(i+1))`,
//! except bucket 0, which holds distance 1 and never the self id.
//!
//! ## No eviction
//!
//! When a bucket is full, newly-learned contacts are dropped. This is a
//! documented limitation, not a bug: the Python reference this crate is
//! modeled on punts on eviction with a `# TODO: eviction logic` comment, and
//! this specification preserves that as a non-goal.

use std::net::SocketAddr;
use std::time::Instant;

use crate::identifier::Identifier;

/// A ⟨address, port, node id⟩ tuple. Two contacts are equal iff their ids
/// are equal; address/port may be updated in place without affecting
/// equality.
#[derive(Clone, Debug)]
pub struct Contact {
    /// The node's network address.
    pub addr: SocketAddr,
    /// The node's 160-bit (or test-width) identifier.
    pub id: Identifier,
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Contact {}

/// A single entry in a k-bucket: a contact plus the time it was last seen.
#[derive(Clone, Debug)]
struct BucketEntry {
    contact: Contact,
    #[allow(dead_code)] // retained for parity with the spec's data model (§3); not yet read
    last_seen: Instant,
}

/// A k-bucket: an ordered sequence of at most `k` entries, appended on
/// first learning. Once full, new learnings are dropped (no eviction).
#[derive(Clone, Debug, Default)]
struct KBucket {
    entries: Vec<BucketEntry>,
}

impl KBucket {
    fn find_index(&self, id: &Identifier) -> Option<usize> {
        self.entries.iter().position(|e| &e.contact.id == id)
    }

    fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.entries.iter().map(|e| &e.contact)
    }
}

/// The Kademlia routing table.
pub struct RoutingTable {
    local_id: Identifier,
    id_width_bits: u32,
    k: usize,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// Create a new routing table for `local_id`, with `id_width_bits`
    /// buckets (one per possible distance bit-length) and capacity `k` per
    /// bucket.
    pub fn new(local_id: Identifier, k: usize) -> Self {
        let id_width_bits = local_id.width_bits();
        let buckets = (0..id_width_bits).map(|_| KBucket::default()).collect();
        Self {
            local_id,
            id_width_bits,
            k,
            buckets,
        }
    }

    /// The local node's identifier.
    pub fn local_id(&self) -> &Identifier {
        &self.local_id
    }

    /// The bucket index a remote id falls into, relative to the local id.
    /// `0` if `other == self`.
    pub fn bucket_index(&self, other: &Identifier) -> usize {
        match self.local_id.xor_distance(other) {
            Ok(distance) => distance.bucket_index(),
            Err(_) => 0,
        }
    }

    /// Add a contact to the routing table.
    ///
    /// - If `id == local_id`: no-op.
    /// - Else, in bucket `bucket_index(id)`: if already present (by id), no
    ///   change; if the bucket has room, append with a fresh timestamp;
    ///   if full, drop (no eviction — see module docs).
    pub fn add(&mut self, contact: Contact) {
        if contact.id == self.local_id {
            return;
        }
        let idx = self.bucket_index(&contact.id);
        let Some(bucket) = self.buckets.get_mut(idx) else {
            return;
        };
        if bucket.find_index(&contact.id).is_some() {
            return;
        }
        if bucket.entries.len() < self.k {
            bucket.entries.push(BucketEntry {
                contact,
                last_seen: Instant::now(),
            });
        }
    }

    /// Look up a contact by id.
    pub fn get_info(&self, id: &Identifier) -> Option<Contact> {
        let idx = self.bucket_index(id);
        self.buckets
            .get(idx)
            .and_then(|b| b.contacts().find(|c| &c.id == id))
            .cloned()
    }

    /// Generate the zig-zag offsets `0, -1, +1, -2, +2, ...` used to traverse
    /// buckets in expanding-distance-class order from a starting index.
    ///
    /// The count-th term is `(-1)^count * count`; `max` bounds how many
    /// terms are produced.
    fn zig_zag_offsets(max: usize) -> impl Iterator<Item = i64> {
        let mut offset: i64 = 0;
        (0..max).map(move |count| {
            let term = if count % 2 == 0 {
                count as i64
            } else {
                -(count as i64)
            };
            offset += term;
            offset
        })
    }

    /// Up to `n` contacts in approximate increasing XOR-distance order from
    /// `target`, obtained by zig-zag bucket traversal. Exact ordering is not
    /// guaranteed within the returned set; callers needing exact order must
    /// re-sort (see [`sort_by_distance`]).
    pub fn n_closest(&self, target: &Identifier, n: usize) -> Vec<Contact> {
        let start = self.bucket_index(target);
        let mut out = Vec::with_capacity(n.min(self.len()));

        for offset in Self::zig_zag_offsets(self.id_width_bits as usize * 2) {
            if out.len() >= n {
                break;
            }
            let idx = start as i64 + offset;
            if idx < 0 || idx as usize >= self.buckets.len() {
                continue;
            }
            for contact in self.buckets[idx as usize].contacts() {
                if out.len() >= n {
                    break;
                }
                out.push(contact.clone());
            }
        }
        out
    }

    /// `n_closest(target, k)`.
    pub fn k_closest(&self, target: &Identifier) -> Vec<Contact> {
        self.n_closest(target, self.k)
    }

    /// Total number of contacts across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    /// Whether the table holds no contacts.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sort a list of contacts by ascending XOR distance to `target`. Stable on
/// id for ties.
pub fn sort_by_distance(mut contacts: Vec<Contact>, target: &Identifier) -> Vec<Contact> {
    contacts.sort_by(|a, b| {
        let da = a.id.xor_distance(target).ok();
        let db = b.id.xor_distance(target).ok();
        da.cmp(&db)
    });
    contacts
}

/// Deduplicate a contact list by id, keeping the first occurrence.
pub fn dedup_by_id(contacts: Vec<Contact>) -> Vec<Contact> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(contacts.len());
    for c in contacts {
        if seen.insert(c.id.as_bytes().to_vec()) {
            out.push(c);
        }
    }
    out
}
