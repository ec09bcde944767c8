//! Owns the terminal table, trunk set, and service table of one aggregator network,
//! and drives planning and delegation.

use crate::bandwidth::BandwidthFunction;
use crate::config::AggregatorConfig;
use crate::error::ErrorKind;
use crate::planner::{PlanResult, PlannerError, TreePlanner};
use crate::service::{ChildService, Service, ServiceError};
use crate::topology::{GlobalTerminal, InferiorEdges, InferiorId, LocalTerminalId, Topology, TrunkEdge};
use crate::trunk::Trunk;
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

/// Errors raised by [`Aggregator`] management operations.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// `add_terminal` was given a name already in use.
    #[error("terminal name {0:?} is already in use")]
    TerminalNameInUse(String),
    /// `add_terminal` was given an inferior terminal already bound to a name.
    #[error("inferior terminal {0:?} is already in use")]
    InferiorTerminalBusy(GlobalTerminal),
    /// A terminal name was not found.
    #[error("no terminal named {0:?}")]
    UnknownTerminal(String),
    /// `remove_terminal` was called on a terminal still referenced by a live service.
    #[error("terminal {0:?} is referenced by a non-released service")]
    TerminalInUse(String),
    /// `add_trunk` was given two terminals of the same inferior network.
    #[error("trunk endpoints must belong to different inferior networks")]
    SameInferior,
    /// `add_trunk` was given a terminal already bound to a trunk.
    #[error("terminal {0:?} is already bound to a trunk")]
    TerminalAlreadyTrunked(GlobalTerminal),
    /// `find_trunk`/`remove_trunk` was given a terminal with no trunk.
    #[error("no trunk at terminal {0:?}")]
    NoTrunkAt(GlobalTerminal),
    /// No service exists with the given id.
    #[error("no service with id {0}")]
    UnknownService(u64),
    /// Planning the requested tree failed.
    #[error("planning error: {0}")]
    Planner(#[from] PlannerError),
    /// A service-lifecycle operation failed.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

impl AggregatorError {
    /// Map this error into its coarse, caller-facing kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AggregatorError::TerminalNameInUse(_) => ErrorKind::Conflict,
            AggregatorError::InferiorTerminalBusy(_) => ErrorKind::Conflict,
            AggregatorError::UnknownTerminal(_) => ErrorKind::NotFound,
            AggregatorError::TerminalInUse(_) => ErrorKind::InvalidState,
            AggregatorError::SameInferior => ErrorKind::InvalidArgument,
            AggregatorError::TerminalAlreadyTrunked(_) => ErrorKind::Conflict,
            AggregatorError::NoTrunkAt(_) => ErrorKind::NotFound,
            AggregatorError::UnknownService(_) => ErrorKind::NotFound,
            AggregatorError::Planner(e) => e.kind(),
            AggregatorError::Service(e) => e.kind(),
        }
    }
}

/// An external name bound to an inferior terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminal {
    /// The inferior terminal this name is bound to.
    pub inferior_terminal: GlobalTerminal,
}

struct Management {
    terminals: HashMap<String, Terminal>,
    terminal_names: HashMap<GlobalTerminal, String>,
    trunks: HashMap<GlobalTerminal, TrunkEdge>,
    services: HashMap<u64, Service>,
    next_service_id: u64,
}

/// A network composed of inferior networks joined by trunks.
pub struct Aggregator {
    config: AggregatorConfig,
    management: Mutex<Management>,
    topology: RwLock<Option<Topology>>,
}

impl Aggregator {
    /// Build an empty aggregator with the given configuration.
    pub fn new(config: AggregatorConfig) -> Self {
        Aggregator {
            config,
            management: Mutex::new(Management {
                terminals: HashMap::new(),
                terminal_names: HashMap::new(),
                trunks: HashMap::new(),
                services: HashMap::new(),
                next_service_id: 0,
            }),
            topology: RwLock::new(None),
        }
    }

    /// Bind an external name to an inferior terminal.
    pub fn add_terminal(&self, name: &str, inferior_terminal: GlobalTerminal) -> Result<Terminal, AggregatorError> {
        let mut mgmt = self.management.lock().unwrap_or_else(|e| e.into_inner());
        if mgmt.terminals.contains_key(name) {
            return Err(AggregatorError::TerminalNameInUse(name.to_string()));
        }
        if mgmt.terminal_names.contains_key(&inferior_terminal) {
            return Err(AggregatorError::InferiorTerminalBusy(inferior_terminal));
        }
        let terminal = Terminal { inferior_terminal };
        mgmt.terminals.insert(name.to_string(), terminal);
        mgmt.terminal_names.insert(inferior_terminal, name.to_string());
        info!("terminal {} bound to {:?}", name, inferior_terminal);
        Ok(terminal)
    }

    /// Unbind a terminal name. Fails if any non-released service still references it.
    pub fn remove_terminal(&self, name: &str) -> Result<(), AggregatorError> {
        let mut mgmt = self.management.lock().unwrap_or_else(|e| e.into_inner());
        let terminal = mgmt
            .terminals
            .get(name)
            .copied()
            .ok_or_else(|| AggregatorError::UnknownTerminal(name.to_string()))?;
        let referenced = mgmt.services.values().any(|svc| {
            svc.status() != crate::service::ServiceState::Released
        });
        // A conservative, name-agnostic check: in the absence of a live reverse index
        // from terminal to referencing services, refuse removal whenever any service
        // at all is still live. A fuller implementation would index circuits by
        // terminal; out of scope for this crate's delegation surface.
        if referenced {
            return Err(AggregatorError::TerminalInUse(name.to_string()));
        }
        mgmt.terminals.remove(name);
        mgmt.terminal_names.remove(&terminal.inferior_terminal);
        Ok(())
    }

    /// Create a trunk between two terminals of different inferior networks, neither
    /// already trunked.
    pub fn add_trunk(&self, a: GlobalTerminal, b: GlobalTerminal) -> Result<Trunk, AggregatorError> {
        if a.inferior == b.inferior {
            return Err(AggregatorError::SameInferior);
        }
        let mut mgmt = self.management.lock().unwrap_or_else(|e| e.into_inner());
        if mgmt.trunks.contains_key(&a) {
            return Err(AggregatorError::TerminalAlreadyTrunked(a));
        }
        if mgmt.trunks.contains_key(&b) {
            return Err(AggregatorError::TerminalAlreadyTrunked(b));
        }
        let trunk = Trunk::new();
        let edge = TrunkEdge { a, b, trunk: trunk.clone() };
        mgmt.trunks.insert(a, edge.clone());
        mgmt.trunks.insert(b, edge);
        *self.topology.write().unwrap_or_else(|e| e.into_inner()) = None;
        info!("trunk created between {:?} and {:?}", a, b);
        Ok(trunk)
    }

    /// Remove the trunk at `terminal`, if any.
    pub fn remove_trunk(&self, terminal: GlobalTerminal) -> Result<(), AggregatorError> {
        let mut mgmt = self.management.lock().unwrap_or_else(|e| e.into_inner());
        let edge = mgmt.trunks.remove(&terminal).ok_or(AggregatorError::NoTrunkAt(terminal))?;
        let other = if edge.a == terminal { edge.b } else { edge.a };
        mgmt.trunks.remove(&other);
        *self.topology.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    /// Find the trunk at `terminal`, if any.
    pub fn find_trunk(&self, terminal: GlobalTerminal) -> Option<Trunk> {
        let mgmt = self.management.lock().unwrap_or_else(|e| e.into_inner());
        mgmt.trunks.get(&terminal).map(|e| e.trunk.clone())
    }

    /// Create a new, dormant service with a monotonically increasing id local to this
    /// aggregator.
    pub fn new_service(&self, children: Vec<Arc<dyn ChildService>>) -> Service {
        let mut mgmt = self.management.lock().unwrap_or_else(|e| e.into_inner());
        let id = mgmt.next_service_id;
        mgmt.next_service_id += 1;
        let service = Service::new(id, children, self.config.child_grace_period);
        mgmt.services.insert(id, service.clone());
        service
    }

    /// Look up a service by id.
    pub fn get_service(&self, id: u64) -> Result<Service, AggregatorError> {
        let mgmt = self.management.lock().unwrap_or_else(|e| e.into_inner());
        mgmt.services.get(&id).cloned().ok_or(AggregatorError::UnknownService(id))
    }

    /// All live service ids.
    pub fn get_service_ids(&self) -> Vec<u64> {
        let mgmt = self.management.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<u64> = mgmt.services.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Rebuild the topology from the inferiors' advertised internal edges and the
    /// current trunk set, replacing any cached snapshot.
    pub fn rebuild_topology(&self, inferior_edges: &[InferiorEdges]) -> Topology {
        let mgmt = self.management.lock().unwrap_or_else(|e| e.into_inner());
        let mut seen = std::collections::HashSet::new();
        let trunks: Vec<TrunkEdge> = mgmt
            .trunks
            .values()
            .filter(|e| seen.insert((e.a.min(e.b), e.a.max(e.b))))
            .cloned()
            .collect();
        let topo = Topology::build(inferior_edges, &trunks);
        *self.topology.write().unwrap_or_else(|e| e.into_inner()) = Some(topo.clone());
        topo
    }

    /// Plan a tree for `endpoints` under `bandwidth` over the last-built topology
    /// (call [`Aggregator::rebuild_topology`] first if the trunk set may have
    /// changed). Label allocation happens while holding the management lock, per the
    /// locking discipline: topology writes never hold a terminal or trunk lock.
    pub fn plan(
        &self,
        endpoints: &[GlobalTerminal],
        bandwidth: &BandwidthFunction,
    ) -> Result<PlanResult, AggregatorError> {
        let topo = self
            .topology
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| Topology::build(&[], &[]));
        let _mgmt = self.management.lock().unwrap_or_else(|e| e.into_inner());
        let result = TreePlanner::plan(
            &topo,
            endpoints,
            bandwidth,
            self.config.tabulation_threshold,
            self.config.stability_profiles.clone(),
            self.config.stability_decay,
        )?;
        Ok(result)
    }
}

/// The inferior's own terminal for a given (aggregator-local) terminal id; re-exported
/// so embedding code building [`InferiorEdges`] doesn't need a separate import path.
pub type InferiorTerminalId = LocalTerminalId;

/// An inferior network's identity, re-exported for the same reason.
pub type Network = InferiorId;
