//! Load-balancer core: per-node outstanding-load counters and the
//! load-bounded probe from the hash-indexed node.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use crate::cluster::MAX_NUM_NODES;
use crate::utils::PegasusError;
use crate::wire::NodeId;

/// Base UDP port: server node `i` listens on `PORT_ZERO + i`, so a reply's
/// source port identifies the responding node.
pub const PORT_ZERO: u16 = 12345;

/// Outstanding-load table and node selection state.
///
/// `iload` increases on every forwarded request and decreases on every
/// observed reply; reordering may briefly drive a counter negative, which is
/// tolerated by the selection math.
pub struct LoadBalancer {
    /// Active number of nodes per rack (changed only by controller reset).
    num_nodes: AtomicUsize,

    /// Probe threshold multiplier over the mean load.
    load_constant: f64,

    /// Outstanding-load counters, fixed at table capacity.
    iload: [AtomicI64; MAX_NUM_NODES],
}

impl LoadBalancer {
    pub fn new(
        num_nodes: usize,
        load_constant: f64,
    ) -> Result<Self, PegasusError> {
        if num_nodes == 0 || num_nodes > MAX_NUM_NODES {
            return logged_err!("invalid num_nodes {}", num_nodes);
        }
        Ok(LoadBalancer {
            num_nodes: AtomicUsize::new(num_nodes),
            load_constant,
            iload: std::array::from_fn(|_| AtomicI64::new(0)),
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes.load(Ordering::Relaxed)
    }

    /// Key → node selection: start at the hash-indexed node and walk past
    /// nodes whose load exceeds `load_constant ×` the mean. The walk is
    /// bounded at one full cycle; if no node qualifies (possible only for
    /// `load_constant < 1`), fall back to the hash-indexed node.
    pub fn pick_node(&self, hash: u64) -> NodeId {
        let n = self.num_nodes();
        let total: i64 = self.iload[..n]
            .iter()
            .map(|l| l.load(Ordering::Relaxed))
            .sum();
        let avg = total / n as i64;
        let threshold = self.load_constant * avg as f64;

        let start = (hash % n as u64) as usize;
        let mut candidate = start;
        for _ in 0..n {
            if self.iload[candidate].load(Ordering::Relaxed) as f64
                <= threshold
            {
                return candidate as NodeId;
            }
            candidate = (candidate + 1) % n;
        }
        start as NodeId
    }

    /// Accounts a request forwarded to `node`.
    pub fn note_forwarded(&self, node: NodeId) {
        if (node as usize) < MAX_NUM_NODES {
            self.iload[node as usize].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Accounts a reply observed from `node`.
    pub fn note_reply(&self, node: NodeId) {
        if (node as usize) < MAX_NUM_NODES {
            self.iload[node as usize].fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Maps a reply's UDP source port back to its node ID.
    pub fn port_to_node(&self, port: u16) -> Option<NodeId> {
        let node = port.checked_sub(PORT_ZERO)?;
        if (node as usize) < self.num_nodes() {
            Some(node as NodeId)
        } else {
            None
        }
    }

    /// Controller reset: adopt the new node count (bounded by the table
    /// capacity) and zero all load counters.
    pub fn reset(&self, num_nodes: u16) {
        let n = (num_nodes as usize).clamp(1, MAX_NUM_NODES);
        self.num_nodes.store(n, Ordering::Relaxed);
        for load in &self.iload {
            load.store(0, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub(crate) fn seed_loads(&self, loads: &[i64]) {
        for (i, &l) in loads.iter().enumerate() {
            self.iload[i].store(l, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub(crate) fn load_of(&self, node: NodeId) -> i64 {
        self.iload[node as usize].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod balancer_tests {
    use super::*;
    use crate::utils::djb2_hash;

    #[test]
    fn idle_selection_is_hash_stable() -> Result<(), PegasusError> {
        // with all loads zero, the chosen node equals djb2(key) mod n
        let lb = LoadBalancer::new(4, 1.0)?;
        for key in [&b"foo"[..], b"bar", b"pegasus", b"a", b""] {
            let hash = djb2_hash(key);
            assert_eq!(lb.pick_node(hash) as u64, hash % 4);
        }
        Ok(())
    }

    #[test]
    fn hotspot_sheds_to_next_node() -> Result<(), PegasusError> {
        let lb = LoadBalancer::new(4, 1.0)?;
        lb.seed_loads(&[10, 0, 0, 0]);
        // a key hashing to node 0 must skip it: 10 > 1.0 * avg(2)
        assert_eq!(lb.pick_node(0), 1);
        // keys hashing elsewhere stay put
        assert_eq!(lb.pick_node(2), 2);
        Ok(())
    }

    #[test]
    fn probe_terminates_under_tight_constant() -> Result<(), PegasusError> {
        // load_constant < 1 can disqualify every node; the probe must fall
        // back to the hash-indexed one instead of spinning
        let lb = LoadBalancer::new(4, 0.5)?;
        lb.seed_loads(&[5, 5, 5, 5]);
        assert_eq!(lb.pick_node(3), 3);
        Ok(())
    }

    #[test]
    fn accounting_and_port_mapping() -> Result<(), PegasusError> {
        let lb = LoadBalancer::new(2, 1.0)?;
        lb.note_forwarded(1);
        lb.note_forwarded(1);
        assert_eq!(lb.load_of(1), 2);

        assert_eq!(lb.port_to_node(PORT_ZERO), Some(0));
        assert_eq!(lb.port_to_node(PORT_ZERO + 1), Some(1));
        assert_eq!(lb.port_to_node(PORT_ZERO + 2), None); // beyond num_nodes
        assert_eq!(lb.port_to_node(PORT_ZERO - 1), None);

        lb.note_reply(1);
        lb.note_reply(1);
        lb.note_reply(1);
        // reordering may briefly drive a counter negative
        assert_eq!(lb.load_of(1), -1);
        Ok(())
    }

    #[test]
    fn reset_zeroes_loads_and_resizes() -> Result<(), PegasusError> {
        let lb = LoadBalancer::new(2, 1.0)?;
        lb.seed_loads(&[3, 4]);
        lb.reset(4);
        assert_eq!(lb.num_nodes(), 4);
        for node in 0..4 {
            assert_eq!(lb.load_of(node), 0);
        }
        // capacity-bounded
        lb.reset(200);
        assert_eq!(lb.num_nodes(), MAX_NUM_NODES);
        Ok(())
    }

    #[test]
    fn invalid_sizes_rejected() {
        assert!(LoadBalancer::new(0, 1.0).is_err());
        assert!(LoadBalancer::new(MAX_NUM_NODES + 1, 1.0).is_err());
    }
}
