//! LinkStateDatabase implementation methods.

use super::{LinkStateDatabase, LinkStateRecord, LsaDisposition};
use crate::sequence::{Freshness, SequenceTracker};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use xroute_wire::{LinkStateAdvertisement, NeighborInfo, NodeId, ServiceAdvert};

impl LinkStateDatabase {
    /// Create a new link-state database
    pub fn new(local_node_id: NodeId, sequences: SequenceTracker, expire_after: Duration) -> Self {
        Self {
            local_node_id,
            records: HashMap::new(),
            sequences,
            expire_after,
            last_originated: None,
        }
    }

    /// Local router ID
    pub fn local_node_id(&self) -> &NodeId {
        &self.local_node_id
    }

    /// Offer a received advertisement
    pub fn accept(&mut self, lsa: &LinkStateAdvertisement, now: Instant) -> LsaDisposition {
        if lsa.originator == self.local_node_id {
            let counter_advanced = self.advance_local_past(lsa.sequence_number);
            return LsaDisposition::SelfOriginated { counter_advanced };
        }

        match self.sequences.accept(&lsa.originator, lsa.sequence_number, now) {
            Freshness::Stale => {
                debug!(
                    "Ignoring stale LSA from {} (seq: {} vs {:?})",
                    lsa.originator,
                    lsa.sequence_number,
                    self.sequences.last_accepted(&lsa.originator)
                );
                return LsaDisposition::Stale;
            }
            Freshness::Duplicate => {
                debug!("Ignoring duplicate LSA from {} (seq: {})", lsa.originator, lsa.sequence_number);
                return LsaDisposition::Duplicate;
            }
            Freshness::Fresh => {}
        }

        let neighbors = normalized_neighbors(&lsa.neighbors);
        let services = normalized_services(&lsa.services);

        let topology_changed = match self.records.get(&lsa.originator) {
            Some(prior) => prior.neighbors != neighbors || prior.services != services,
            None => true,
        };

        if topology_changed {
            info!(
                "Topology change from {} (seq: {}, {} neighbors, {} services)",
                lsa.originator,
                lsa.sequence_number,
                neighbors.len(),
                services.len()
            );
        }

        self.records.insert(
            lsa.originator.clone(),
            LinkStateRecord {
                originator: lsa.originator.clone(),
                sequence_number: lsa.sequence_number,
                neighbors,
                services,
                received_at: now,
            },
        );

        LsaDisposition::Accepted { topology_changed }
    }

    /// Remove records not refreshed within the expiry time
    pub fn age_out(&mut self, now: Instant) -> Vec<NodeId> {
        let expire_after = self.expire_after;
        let mut removed: Vec<NodeId> = self
            .records
            .values()
            .filter(|record| now.saturating_duration_since(record.received_at) > expire_after)
            .map(|record| record.originator.clone())
            .collect();
        removed.sort();

        if !removed.is_empty() {
            info!("Aging out {} link-state records", removed.len());
            for originator in &removed {
                self.records.remove(originator);
            }
        }

        self.sequences.prune(now);
        removed
    }

    /// Build the next local advertisement, consuming a sequence number
    pub fn originate(&mut self, neighbors: Vec<NeighborInfo>, services: Vec<ServiceAdvert>) -> LinkStateAdvertisement {
        let sequence = match self.last_originated {
            Some(last) => self.sequences.next_after(last),
            None => 0,
        };
        self.last_originated = Some(sequence);

        LinkStateAdvertisement::new(self.local_node_id.clone(), sequence, normalized_neighbors(&neighbors))
            .with_services(normalized_services(&services))
    }

    /// Move the local counter past an echoed advertisement of a previous incarnation
    pub fn advance_local_past(&mut self, seq: u32) -> bool {
        let ahead = match self.last_originated {
            Some(last) => self.sequences.is_ahead(seq, last),
            None => true,
        };
        if ahead {
            info!("Own LSA with seq {} seen; advancing local sequence", seq);
            self.last_originated = Some(seq);
        }
        ahead
    }

    /// Stored record of an originator
    pub fn record(&self, originator: &NodeId) -> Option<&LinkStateRecord> {
        self.records.get(originator)
    }

    /// All stored records
    pub fn records(&self) -> impl Iterator<Item = &LinkStateRecord> {
        self.records.values()
    }

    /// When the stored record of `originator` was accepted
    pub fn received_at(&self, originator: &NodeId) -> Option<Instant> {
        self.records.get(originator).map(|record| record.received_at)
    }

    /// Stored records as advertisements, sorted by originator (for synchronizing new neighbors)
    pub fn advertisements(&self) -> Vec<LinkStateAdvertisement> {
        let mut lsas: Vec<LinkStateAdvertisement> = self
            .records
            .values()
            .map(|record| {
                LinkStateAdvertisement::new(
                    record.originator.clone(),
                    record.sequence_number,
                    record.neighbors.clone(),
                )
                .with_services(record.services.clone())
            })
            .collect();
        lsas.sort_by(|a, b| a.originator.cmp(&b.originator));
        lsas
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the database is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get database statistics
    pub fn stats(&self) -> LsdbStats {
        LsdbStats {
            total_records: self.records.len(),
            tracked_sequences: self.sequences.len(),
            local_sequence: self.last_originated,
        }
    }
}

fn normalized_neighbors(neighbors: &[NeighborInfo]) -> Vec<NeighborInfo> {
    let mut neighbors = neighbors.to_vec();
    neighbors.sort();
    neighbors.dedup();
    neighbors
}

fn normalized_services(services: &[ServiceAdvert]) -> Vec<ServiceAdvert> {
    let mut services = services.to_vec();
    services.sort();
    services.dedup();
    services
}

/// Link-state database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsdbStats {
    /// Number of stored records
    pub total_records: usize,
    /// Number of originators with sequence state
    pub tracked_sequences: usize,
    /// Last locally originated sequence number
    pub local_sequence: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use xroute_wire::PathIndex;

    fn lsdb() -> LinkStateDatabase {
        LinkStateDatabase::new(
            NodeId::from("R"),
            SequenceTracker::new(1_000_000, 10_000, Duration::from_secs(60)),
            Duration::from_secs(60),
        )
    }

    fn lsa(originator: &str, seq: u32, neighbors: &[(&str, u32)]) -> LinkStateAdvertisement {
        LinkStateAdvertisement::new(
            originator,
            seq,
            neighbors.iter().map(|(id, cost)| NeighborInfo::new(*id, *cost)).collect(),
        )
    }

    #[test]
    fn test_first_lsa_accepted_as_change() {
        let mut db = lsdb();
        let now = Instant::now();

        let disposition = db.accept(&lsa("A", 1, &[("C", 1)]), now);
        assert_eq!(disposition, LsaDisposition::Accepted { topology_changed: true });
        assert_eq!(db.len(), 1);
        assert_eq!(db.record(&NodeId::from("A")).unwrap().sequence_number, 1);
    }

    #[test]
    fn test_refresh_without_change() {
        let mut db = lsdb();
        let t0 = Instant::now();

        db.accept(&lsa("A", 1, &[("C", 1), ("B", 2)]), t0);
        let t1 = t0 + Duration::from_secs(5);
        // Same adjacencies in a different order
        let disposition = db.accept(&lsa("A", 2, &[("B", 2), ("C", 1)]), t1);

        assert_eq!(disposition, LsaDisposition::Accepted { topology_changed: false });
        assert_eq!(db.received_at(&NodeId::from("A")), Some(t1));
    }

    #[test]
    fn test_duplicate_and_stale_change_nothing() {
        let mut db = lsdb();
        let now = Instant::now();

        db.accept(&lsa("A", 5, &[("C", 1)]), now);
        assert_eq!(db.accept(&lsa("A", 5, &[("D", 1)]), now), LsaDisposition::Duplicate);
        assert_eq!(db.accept(&lsa("A", 4, &[("D", 1)]), now), LsaDisposition::Stale);

        let record = db.record(&NodeId::from("A")).unwrap();
        assert_eq!(record.neighbors, vec![NeighborInfo::new("C", 1)]);
    }

    #[test]
    fn test_wrapped_vs_stale_sequence() {
        let mut db = lsdb();
        let now = Instant::now();

        db.accept(&lsa("X", 900_000, &[("C", 1)]), now);
        assert_eq!(db.accept(&lsa("X", 5, &[("C", 1)]), now), LsaDisposition::Stale);

        db.accept(&lsa("Y", 999_000, &[("C", 1)]), now);
        assert_eq!(
            db.accept(&lsa("Y", 5, &[("C", 1)]), now),
            LsaDisposition::Accepted { topology_changed: false }
        );
    }

    #[test]
    fn test_service_change_is_topology_change() {
        let mut db = lsdb();
        let now = Instant::now();

        db.accept(&lsa("A", 1, &[("H", 1)]), now);
        let with_service = lsa("A", 2, &[("H", 1)]).with_services(vec![ServiceAdvert {
            service_id: NodeId::from("SID:s"),
            weight: 3,
            path_index: PathIndex(1),
            cost: 1,
        }]);

        assert_eq!(
            db.accept(&with_service, now),
            LsaDisposition::Accepted { topology_changed: true }
        );
    }

    #[test]
    fn test_age_out_and_restart() {
        let mut db = lsdb();
        let t0 = Instant::now();

        db.accept(&lsa("A", 500, &[("C", 1)]), t0);
        db.accept(&lsa("B", 1, &[("C", 1)]), t0 + Duration::from_secs(30));

        let removed = db.age_out(t0 + Duration::from_secs(61));
        assert_eq!(removed, vec![NodeId::from("A")]);
        assert!(db.record(&NodeId::from("A")).is_none());

        // A restarted and counts from zero again
        let disposition = db.accept(&lsa("A", 0, &[("C", 1)]), t0 + Duration::from_secs(62));
        assert_eq!(disposition, LsaDisposition::Accepted { topology_changed: true });
    }

    #[test]
    fn test_self_originated_advances_counter() {
        let mut db = lsdb();
        let now = Instant::now();

        let first = db.originate(vec![NeighborInfo::new("A", 1)], vec![]);
        assert_eq!(first.sequence_number, 0);
        assert_eq!(db.originate(vec![], vec![]).sequence_number, 1);

        // Echo of our own current LSA
        assert_eq!(
            db.accept(&lsa("R", 1, &[]), now),
            LsaDisposition::SelfOriginated { counter_advanced: false }
        );
        // Leftover from a previous incarnation
        assert_eq!(
            db.accept(&lsa("R", 700, &[]), now),
            LsaDisposition::SelfOriginated { counter_advanced: true }
        );
        assert_eq!(db.originate(vec![], vec![]).sequence_number, 701);
        assert!(db.is_empty());
    }

    #[test]
    fn test_advertisements_for_sync() {
        let mut db = lsdb();
        let now = Instant::now();

        db.accept(&lsa("B", 3, &[("C", 1)]), now);
        db.accept(&lsa("A", 7, &[("C", 2)]), now);

        let lsas = db.advertisements();
        assert_eq!(lsas.len(), 2);
        assert_eq!(lsas[0].originator, NodeId::from("A"));
        assert_eq!(lsas[0].sequence_number, 7);
        assert_eq!(db.stats().total_records, 2);
    }
}
