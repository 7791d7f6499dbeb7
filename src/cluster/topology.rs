//! Rack topology loaded from the line-oriented cluster config file.
//!
//! ```text
//! rack
//! node   <mac>|<ip>|<port>|<dev_port>[|<blacklist>…]
//! node   …
//! rack
//! node   …
//! client <mac>|<ip>|<port>|<dev_port>[|…]
//! lb     <mac>|<ip>|<port>|<dev_port>[|…]
//! controller <mac>|<ip>|<port>|<dev_port>[|…]
//! ```
//!
//! Racks are introduced by a bare `rack` token; `node` lines append to the
//! current rack. `#` starts a comment. All racks must be the same size and
//! every rack needs exactly one `controller` entry (in file order).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;

use crate::wire::{NodeId, RackId};
use crate::utils::PegasusError;

/// Upper bound on nodes per rack, matching the router's load table size.
pub const MAX_NUM_NODES: usize = 16;

/// Address of one cluster endpoint. Immutable after config load.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NodeAddress {
    pub mac: [u8; 6],
    pub ipv4: Ipv4Addr,
    pub udp_port: u16,
    pub dev_port: u16,
    pub blacklist: Vec<String>,
}

impl NodeAddress {
    /// The UDP socket address of this endpoint.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ipv4, self.udp_port))
    }

    /// Parses a `<mac>|<ip>|<port>|<dev_port>[|<blacklist>…]` field list.
    fn parse(s: &str) -> Result<Self, PegasusError> {
        let fields: Vec<&str> = s.split('|').collect();
        if fields.len() < 4 {
            return Err(PegasusError(format!(
                "address '{}' has {} fields, expected at least 4",
                s,
                fields.len()
            )));
        }

        let mac_parts: Vec<&str> = fields[0].split(':').collect();
        if mac_parts.len() != 6 {
            return Err(PegasusError(format!(
                "malformed MAC address '{}'",
                fields[0]
            )));
        }
        let mut mac = [0u8; 6];
        for (i, part) in mac_parts.iter().enumerate() {
            mac[i] = u8::from_str_radix(part, 16).map_err(|e| {
                PegasusError(format!("malformed MAC octet '{}': {}", part, e))
            })?;
        }

        Ok(NodeAddress {
            mac,
            ipv4: fields[1].parse()?,
            udp_port: fields[2].parse()?,
            dev_port: fields[3].parse()?,
            blacklist: fields[4..].iter().map(|s| s.to_string()).collect(),
        })
    }
}

/// The full rack topology of the cluster.
#[derive(Debug, Clone)]
pub struct RackTopology {
    /// `racks[rack_id][node_id]` is a server address.
    racks: Vec<Vec<NodeAddress>>,

    /// Client addresses indexed by client ID.
    clients: Vec<NodeAddress>,

    /// Endhost load balancer address, if one is configured.
    lb: Option<NodeAddress>,

    /// One controller address per rack, in rack order.
    controllers: Vec<NodeAddress>,
}

impl RackTopology {
    /// Parses and validates a topology from config file text.
    pub fn from_str(text: &str) -> Result<Self, PegasusError> {
        let mut racks: Vec<Vec<NodeAddress>> = vec![];
        let mut clients = vec![];
        let mut lb = None;
        let mut controllers = vec![];

        for (lineno, line) in text.lines().enumerate() {
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            };
            let mut tokens = line.split_whitespace();
            let Some(token) = tokens.next() else {
                continue;
            };
            let arg = tokens.next();
            let at_line = |e: PegasusError| {
                PegasusError(format!("config line {}: {}", lineno + 1, e))
            };

            match token {
                "rack" => racks.push(vec![]),
                "node" => {
                    let addr = NodeAddress::parse(
                        arg.ok_or_else(|| {
                            at_line(PegasusError("missing address".into()))
                        })?,
                    )
                    .map_err(at_line)?;
                    match racks.last_mut() {
                        Some(rack) => rack.push(addr),
                        None => {
                            return Err(at_line(PegasusError(
                                "node before any rack".into(),
                            )));
                        }
                    }
                }
                "client" => clients.push(
                    NodeAddress::parse(arg.ok_or_else(|| {
                        at_line(PegasusError("missing address".into()))
                    })?)
                    .map_err(at_line)?,
                ),
                "lb" => {
                    lb = Some(
                        NodeAddress::parse(arg.ok_or_else(|| {
                            at_line(PegasusError("missing address".into()))
                        })?)
                        .map_err(at_line)?,
                    )
                }
                "controller" => controllers.push(
                    NodeAddress::parse(arg.ok_or_else(|| {
                        at_line(PegasusError("missing address".into()))
                    })?)
                    .map_err(at_line)?,
                ),
                _ => {
                    return Err(at_line(PegasusError(format!(
                        "unrecognized token '{}'",
                        token
                    ))));
                }
            }
        }

        let topology = RackTopology {
            racks,
            clients,
            lb,
            controllers,
        };
        topology.validate()?;
        Ok(topology)
    }

    /// Loads a topology from a config file path.
    pub async fn from_file(
        path: impl AsRef<Path>,
    ) -> Result<Self, PegasusError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_str(&text)
    }

    fn validate(&self) -> Result<(), PegasusError> {
        if self.racks.is_empty() {
            return Err(PegasusError("config defines no racks".into()));
        }
        let width = self.racks[0].len();
        if width == 0 {
            return Err(PegasusError("rack 0 has no nodes".into()));
        }
        if width > MAX_NUM_NODES {
            return Err(PegasusError(format!(
                "rack size {} exceeds max {}",
                width, MAX_NUM_NODES
            )));
        }
        for (i, rack) in self.racks.iter().enumerate() {
            if rack.len() != width {
                return Err(PegasusError(format!(
                    "rack {} has {} nodes, expected {}",
                    i,
                    rack.len(),
                    width
                )));
            }
        }
        if self.controllers.len() != self.racks.len() {
            return Err(PegasusError(format!(
                "{} controller entries for {} racks",
                self.controllers.len(),
                self.racks.len()
            )));
        }
        Ok(())
    }

    pub fn num_racks(&self) -> usize {
        self.racks.len()
    }

    pub fn num_nodes_per_rack(&self) -> usize {
        self.racks[0].len()
    }

    /// Is this the tail rack of the replication chain?
    pub fn is_tail_rack(&self, rack_id: RackId) -> bool {
        rack_id as usize == self.num_racks() - 1
    }

    pub fn node_addr(
        &self,
        rack_id: RackId,
        node_id: NodeId,
    ) -> Result<&NodeAddress, PegasusError> {
        self.racks
            .get(rack_id as usize)
            .and_then(|rack| rack.get(node_id as usize))
            .ok_or_else(|| {
                PegasusError(format!(
                    "no node ({}, {}) in topology",
                    rack_id, node_id
                ))
            })
    }

    pub fn client_addr(
        &self,
        client_id: u32,
    ) -> Result<&NodeAddress, PegasusError> {
        self.clients.get(client_id as usize).ok_or_else(|| {
            PegasusError(format!("no client {} in topology", client_id))
        })
    }

    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn lb_addr(&self) -> Result<&NodeAddress, PegasusError> {
        self.lb
            .as_ref()
            .ok_or_else(|| PegasusError("no lb entry in topology".into()))
    }

    pub fn has_lb(&self) -> bool {
        self.lb.is_some()
    }

    pub fn controller_addr(
        &self,
        rack_id: RackId,
    ) -> Result<&NodeAddress, PegasusError> {
        self.controllers.get(rack_id as usize).ok_or_else(|| {
            PegasusError(format!("no controller for rack {}", rack_id))
        })
    }

    /// Reverse-locates a server by its UDP socket address.
    pub fn locate(&self, addr: SocketAddr) -> Option<(RackId, NodeId)> {
        for (rack_id, rack) in self.racks.iter().enumerate() {
            for (node_id, node) in rack.iter().enumerate() {
                if node.socket_addr() == addr {
                    return Some((rack_id as RackId, node_id as NodeId));
                }
            }
        }
        None
    }
}
