//! A request's lifecycle state machine, composing child services of inferior
//! networks.

use crate::bandwidth::range::BandwidthRange;
use crate::error::ErrorKind;
use crate::topology::GlobalTerminal;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A service's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// No segment has been defined yet.
    Dormant,
    /// A segment is defined but the service isn't activated.
    Inactive,
    /// Activation is in progress; children have been asked to activate.
    Activating,
    /// Every child reported active.
    Active,
    /// Deactivation is in progress.
    Deactivating,
    /// A child reported failure, or an internal error occurred.
    Failed,
    /// Release is in progress.
    Releasing,
    /// Terminal state; all operations other than status queries fail.
    Released,
}

/// Errors raised by [`Service`] operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    /// `define` was called more than once.
    #[error("service already defined")]
    AlreadyDefined,
    /// The segment given to `define` is invalid (e.g. fewer than two circuits).
    #[error("invalid segment: {0}")]
    InvalidSegment(String),
    /// The operation isn't allowed from the service's current state.
    #[error("operation {op} not allowed in state {from:?}")]
    InvalidState {
        /// The state the service was in.
        from: ServiceState,
        /// The operation that was rejected.
        op: &'static str,
    },
    /// The service has already been released.
    #[error("service has been released")]
    Released,
}

impl ServiceError {
    /// Map this error into its coarse, caller-facing kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::AlreadyDefined => ErrorKind::Conflict,
            ServiceError::InvalidSegment(_) => ErrorKind::InvalidArgument,
            ServiceError::InvalidState { .. } => ErrorKind::InvalidState,
            ServiceError::Released => ErrorKind::InvalidState,
        }
    }
}

/// A terminal together with the label selecting one multiplex on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Circuit {
    /// The terminal this circuit runs over.
    pub terminal: GlobalTerminal,
    /// The label selecting this circuit's multiplex on that terminal.
    pub label: u32,
}

impl Circuit {
    /// Build a circuit.
    pub fn new(terminal: GlobalTerminal, label: u32) -> Self {
        Circuit { terminal, label }
    }
}

/// Ingress and egress traffic committed to one circuit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficFlow {
    /// Traffic flowing into the circuit.
    pub ingress: BandwidthRange,
    /// Traffic flowing out of the circuit.
    pub egress: BandwidthRange,
}

/// The circuits and committed traffic flows defining a service request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segment {
    flows: HashMap<Circuit, TrafficFlow>,
}

impl Segment {
    /// Build a segment from its circuit-to-flow mapping. Fails if fewer than two
    /// circuits are given: a segment connects at least two endpoints.
    pub fn new(flows: HashMap<Circuit, TrafficFlow>) -> Result<Self, ServiceError> {
        if flows.len() < 2 {
            return Err(ServiceError::InvalidSegment(format!(
                "segment needs at least two circuits, got {}",
                flows.len()
            )));
        }
        Ok(Segment { flows })
    }

    /// The circuits in this segment.
    pub fn circuits(&self) -> impl Iterator<Item = &Circuit> {
        self.flows.keys()
    }

    /// The committed flow for a circuit, if present.
    pub fn flow(&self, circuit: &Circuit) -> Option<&TrafficFlow> {
        self.flows.get(circuit)
    }
}

/// A handle to one child service an aggregator delegated to, local to one inferior
/// network. The inferior network's own back end is an out-of-scope external
/// collaborator; this trait is the seam a real adapter implements.
pub trait ChildService: Send + Sync {
    /// Ask the child to activate, blocking until it reports its resulting state. A
    /// back end that silently drops the activation event may simply never return.
    fn activate(&self) -> ServiceState;
    /// Ask the child to deactivate, blocking until it reports its resulting state.
    fn deactivate(&self) -> ServiceState;
    /// Ask the child to release, blocking until it reports `Released`.
    fn release(&self) -> ServiceState;
}

struct ServiceData {
    state: ServiceState,
    segment: Option<Segment>,
    errors: Vec<String>,
    listeners: Vec<Sender<ServiceState>>,
}

/// A stateful handle to one provisioning request, identified by an id unique within
/// its owning aggregator.
#[derive(Clone)]
pub struct Service {
    id: u64,
    inner: Arc<Mutex<ServiceData>>,
    children: Arc<Vec<Arc<dyn ChildService>>>,
    child_grace_period: Duration,
}

fn transition(inner: &Mutex<ServiceData>, to: ServiceState) {
    let mut data = inner.lock().unwrap_or_else(|e| e.into_inner());
    debug!("service transition {:?} -> {:?}", data.state, to);
    data.state = to;
    data.listeners.retain(|l| l.send(to).is_ok());
}

fn run_children(children: Arc<Vec<Arc<dyn ChildService>>>, call: fn(&dyn ChildService) -> ServiceState) -> Vec<ServiceState> {
    let handles: Vec<_> = children
        .iter()
        .cloned()
        .map(|c| thread::spawn(move || call(c.as_ref())))
        .collect();
    handles.into_iter().map(|h| h.join().unwrap_or(ServiceState::Failed)).collect()
}

impl Service {
    /// Build a new, dormant service with the given children (one per inferior network
    /// it will delegate to).
    pub fn new(id: u64, children: Vec<Arc<dyn ChildService>>, child_grace_period: Duration) -> Self {
        Service {
            id,
            inner: Arc::new(Mutex::new(ServiceData {
                state: ServiceState::Dormant,
                segment: None,
                errors: Vec::new(),
                listeners: Vec::new(),
            })),
            children: Arc::new(children),
            child_grace_period,
        }
    }

    /// This service's id, unique within its owning aggregator.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The current state.
    pub fn status(&self) -> ServiceState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Errors recorded against this service (e.g. child-service failures), oldest
    /// first.
    pub fn errors(&self) -> Vec<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).errors.clone()
    }

    fn record_error(inner: &Mutex<ServiceData>, message: String) {
        inner.lock().unwrap_or_else(|e| e.into_inner()).errors.push(message);
    }

    /// Subscribe to future state transitions. A late subscriber observes only
    /// transitions that happen after this call, never past ones.
    pub fn subscribe(&self) -> Receiver<ServiceState> {
        let (tx, rx) = mpsc::channel();
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).listeners.push(tx);
        rx
    }

    /// Define this service's segment. May only be called once, from `Dormant`.
    pub fn define(&self, segment: Segment) -> Result<(), ServiceError> {
        {
            let data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if data.state != ServiceState::Dormant {
                return Err(ServiceError::AlreadyDefined);
            }
        }
        {
            let mut data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            data.segment = Some(segment);
        }
        transition(&self.inner, ServiceState::Inactive);
        info!("service {} defined", self.id);
        Ok(())
    }

    /// Activate the service: every child is asked to activate in parallel. Idempotent
    /// while already `Activating` or `Active`.
    pub fn activate(&self) -> Result<(), ServiceError> {
        let state = self.status();
        match state {
            ServiceState::Activating | ServiceState::Active => return Ok(()),
            ServiceState::Inactive => {}
            ServiceState::Released => return Err(ServiceError::Released),
            _ => return Err(ServiceError::InvalidState { from: state, op: "activate" }),
        }
        transition(&self.inner, ServiceState::Activating);
        let inner = self.inner.clone();
        let children = self.children.clone();
        thread::spawn(move || {
            let results = run_children(children, <dyn ChildService>::activate);
            let all_active = results.iter().all(|s| *s == ServiceState::Active);
            let any_failed = results.iter().any(|s| *s == ServiceState::Failed);
            if any_failed {
                Self::record_error(&inner, "a child failed to activate".into());
                transition(&inner, ServiceState::Failed);
            } else if all_active {
                transition(&inner, ServiceState::Active);
            }
        });
        Ok(())
    }

    /// Deactivate the service: every child is asked to deactivate in parallel.
    /// Idempotent while already `Deactivating` or `Inactive`.
    pub fn deactivate(&self) -> Result<(), ServiceError> {
        let state = self.status();
        match state {
            ServiceState::Deactivating | ServiceState::Inactive => return Ok(()),
            ServiceState::Active => {}
            ServiceState::Released => return Err(ServiceError::Released),
            _ => return Err(ServiceError::InvalidState { from: state, op: "deactivate" }),
        }
        transition(&self.inner, ServiceState::Deactivating);
        let inner = self.inner.clone();
        let children = self.children.clone();
        thread::spawn(move || {
            let results = run_children(children, <dyn ChildService>::deactivate);
            let any_failed = results.iter().any(|s| *s == ServiceState::Failed);
            if any_failed {
                Self::record_error(&inner, "a child failed to deactivate".into());
                transition(&inner, ServiceState::Failed);
            } else {
                transition(&inner, ServiceState::Inactive);
            }
        });
        Ok(())
    }

    /// Release the service unconditionally, from any non-released state. Children are
    /// asked to release without waiting past the configured grace period; a child
    /// that never replies is considered lost and does not block release.
    pub fn release(&self) -> Result<(), ServiceError> {
        if self.status() == ServiceState::Released {
            return Ok(());
        }
        transition(&self.inner, ServiceState::Releasing);
        let inner = self.inner.clone();
        let children = self.children.clone();
        let grace = self.child_grace_period;
        let id = self.id;
        thread::spawn(move || {
            let mut receivers: Vec<Receiver<ServiceState>> = Vec::with_capacity(children.len());
            for child in children.iter().cloned() {
                let (tx, rx) = mpsc::channel();
                thread::spawn(move || {
                    let _ = tx.send(child.release());
                });
                receivers.push(rx);
            }
            let deadline = Instant::now() + grace;
            for rx in receivers {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok(_) => {}
                    Err(_) => warn!("service {} lost a child past its grace period", id),
                }
            }
            transition(&inner, ServiceState::Released);
        });
        Ok(())
    }

    /// Block up to `timeout` for the status to become one of `accepted`, or to become
    /// `Released`. Returns the latest observed status; never fails on timeout.
    pub fn await_status(&self, accepted: &[ServiceState], timeout: Duration) -> ServiceState {
        let current = self.status();
        if accepted.contains(&current) || current == ServiceState::Released {
            return current;
        }
        let rx = self.subscribe();
        let deadline = Instant::now() + timeout;
        let mut last = current;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return last;
            }
            match rx.recv_timeout(remaining) {
                Ok(state) => {
                    last = state;
                    if accepted.contains(&state) || state == ServiceState::Released {
                        return state;
                    }
                }
                Err(_) => return last,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ImmediateChild {
        result: ServiceState,
    }

    impl ChildService for ImmediateChild {
        fn activate(&self) -> ServiceState {
            self.result
        }
        fn deactivate(&self) -> ServiceState {
            ServiceState::Inactive
        }
        fn release(&self) -> ServiceState {
            ServiceState::Released
        }
    }

    struct SilentChild {
        parked: Arc<AtomicBool>,
    }

    impl ChildService for SilentChild {
        fn activate(&self) -> ServiceState {
            while !self.parked.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(10));
            }
            ServiceState::Active
        }
        fn deactivate(&self) -> ServiceState {
            ServiceState::Inactive
        }
        fn release(&self) -> ServiceState {
            thread::sleep(Duration::from_secs(3600));
            ServiceState::Released
        }
    }

    fn minimal_segment() -> Segment {
        let mut flows = HashMap::new();
        flows.insert(
            Circuit::new(GlobalTerminal::new(1, 0), 0),
            TrafficFlow { ingress: BandwidthRange::zero(), egress: BandwidthRange::zero() },
        );
        flows.insert(
            Circuit::new(GlobalTerminal::new(2, 0), 0),
            TrafficFlow { ingress: BandwidthRange::zero(), egress: BandwidthRange::zero() },
        );
        Segment::new(flows).unwrap()
    }

    #[test]
    fn define_then_activate_reaches_active() {
        let children: Vec<Arc<dyn ChildService>> =
            vec![Arc::new(ImmediateChild { result: ServiceState::Active })];
        let svc = Service::new(1, children, Duration::from_millis(100));
        svc.define(minimal_segment()).unwrap();
        assert_eq!(svc.status(), ServiceState::Inactive);
        svc.activate().unwrap();
        let status = svc.await_status(&[ServiceState::Active], Duration::from_secs(2));
        assert_eq!(status, ServiceState::Active);
    }

    #[test]
    fn failed_child_fails_the_service() {
        let children: Vec<Arc<dyn ChildService>> =
            vec![Arc::new(ImmediateChild { result: ServiceState::Failed })];
        let svc = Service::new(2, children, Duration::from_millis(100));
        svc.define(minimal_segment()).unwrap();
        svc.activate().unwrap();
        let status = svc.await_status(&[ServiceState::Failed], Duration::from_secs(2));
        assert_eq!(status, ServiceState::Failed);
    }

    #[test]
    fn silent_child_leaves_activating_until_timeout() {
        let children: Vec<Arc<dyn ChildService>> =
            vec![Arc::new(SilentChild { parked: Arc::new(AtomicBool::new(false)) })];
        let svc = Service::new(3, children, Duration::from_millis(50));
        svc.define(minimal_segment()).unwrap();
        svc.activate().unwrap();
        let status = svc.await_status(&[ServiceState::Active], Duration::from_millis(100));
        assert_eq!(status, ServiceState::Activating);
    }

    #[test]
    fn release_proceeds_despite_lost_child() {
        let children: Vec<Arc<dyn ChildService>> =
            vec![Arc::new(SilentChild { parked: Arc::new(AtomicBool::new(false)) })];
        let svc = Service::new(4, children, Duration::from_millis(20));
        svc.define(minimal_segment()).unwrap();
        let status = svc.await_status(&[ServiceState::Released], Duration::from_secs(0));
        assert_eq!(status, ServiceState::Inactive);
        svc.release().unwrap();
        let status = svc.await_status(&[ServiceState::Released], Duration::from_secs(2));
        assert_eq!(status, ServiceState::Released);
    }

    #[test]
    fn define_twice_fails() {
        let svc = Service::new(5, vec![], Duration::from_millis(10));
        svc.define(minimal_segment()).unwrap();
        assert_eq!(svc.define(minimal_segment()), Err(ServiceError::AlreadyDefined));
    }

    #[test]
    fn release_is_idempotent() {
        let svc = Service::new(6, vec![], Duration::from_millis(10));
        svc.define(minimal_segment()).unwrap();
        svc.release().unwrap();
        svc.await_status(&[ServiceState::Released], Duration::from_secs(1));
        assert!(svc.release().is_ok());
    }
}
