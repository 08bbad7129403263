//! Test utilities: an in-memory lifecycle API.
//!
//! `FakeApi` accepts the same single-hop transitions as the real service
//! and plays the resulting intermediate states back one per `get_node`
//! call, so reconcilers can be driven through realistic state sequences
//! without a server.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use flate2::read::GzDecoder;
use serde_json::Value;

use crate::clients::{ApiError, BareMetalApi, NodeRecord, ProvisionStateRequest};
use crate::properties::NodeProperties;
use crate::state::{PowerState, ProvisionState};

/// A request received by the fake, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Provision(ProvisionStateRequest),
    Power {
        target: PowerState,
        timeout: Option<u32>,
    },
    RaidConfig(Value),
    Delete,
}

/// How the fake reacts to a provisioning verb instead of succeeding.
#[derive(Debug, Clone)]
pub enum Reaction {
    /// Accept the request, then land in `state` with `last_error` set.
    /// Failure states keep the request's target, like the real service.
    Fail { state: ProvisionState, last_error: String },
    /// Accept the request and never act on it.
    Ignore,
    /// Accept the request and stay busy in `state` forever.
    Stall { state: ProvisionState },
    /// Refuse the request with a 4xx.
    Reject { status: u16, message: String },
}

/// One step played back by `get_node`.
#[derive(Debug, Clone)]
struct Step {
    state: ProvisionState,
    target: Option<ProvisionState>,
    last_error: Option<String>,
}

impl Step {
    fn busy(state: ProvisionState, target: ProvisionState) -> Self {
        Self {
            state,
            target: Some(target),
            last_error: None,
        }
    }

    fn done(state: ProvisionState) -> Self {
        Self {
            state,
            target: None,
            last_error: None,
        }
    }
}

struct PendingPower {
    polls_left: u32,
    lands_in: PowerState,
}

/// Node held by the fake.
pub struct FakeNode {
    record: NodeRecord,
    steps: VecDeque<Step>,
    power: Option<PendingPower>,
}

impl FakeNode {
    pub fn new(id: &str, state: ProvisionState) -> Self {
        Self {
            record: NodeRecord {
                uuid: id.to_string(),
                name: Some(id.to_string()),
                provision_state: state,
                target_provision_state: None,
                power_state: Some(PowerState::PowerOff),
                target_power_state: None,
                last_error: None,
                properties: NodeProperties::default(),
            },
            steps: VecDeque::new(),
            power: None,
        }
    }

    pub fn power(mut self, state: PowerState) -> Self {
        self.record.power_state = Some(state);
        self
    }

    /// Report an in-flight provisioning target.
    pub fn in_flight(mut self, target: ProvisionState) -> Self {
        self.record.target_provision_state = Some(target);
        self
    }

    pub fn last_error(mut self, message: &str) -> Self {
        self.record.last_error = Some(message.to_string());
        self
    }

    pub fn properties(mut self, properties: NodeProperties) -> Self {
        self.record.properties = properties;
        self
    }

    /// Stay in the current state for `polls` fetches with `settles_in` as
    /// the in-flight target, then land there.
    pub fn busy_for(mut self, polls: usize, settles_in: ProvisionState) -> Self {
        let current = self.record.provision_state.clone();
        self.record.target_provision_state = Some(settles_in.clone());
        for _ in 0..polls {
            self.steps.push_back(Step::busy(current.clone(), settles_in.clone()));
        }
        self.steps.push_back(Step::done(settles_in));
        self
    }
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, FakeNode>,
    calls: Vec<Call>,
    fetches: usize,
    reactions: HashMap<String, Reaction>,
    power_delay: u32,
    power_lands_in: Option<PowerState>,
    fetch_error: Option<String>,
}

/// In-memory [`BareMetalApi`].
pub struct FakeApi {
    inner: Mutex<Inner>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                power_delay: 1,
                ..Inner::default()
            }),
        }
    }

    pub fn insert(&self, node: FakeNode) {
        let mut inner = self.lock();
        inner.nodes.insert(node.record.uuid.clone(), node);
    }

    /// Override the reaction to a provisioning verb.
    pub fn react(&self, verb: &str, reaction: Reaction) {
        self.lock().reactions.insert(verb.to_string(), reaction);
    }

    /// Number of polls a power change stays in flight.
    pub fn set_power_delay(&self, polls: u32) {
        self.lock().power_delay = polls;
    }

    /// Force the power state a change settles in.
    pub fn set_power_lands_in(&self, state: PowerState) {
        self.lock().power_lands_in = Some(state);
    }

    /// Make every subsequent `get_node` fail with a transport error.
    pub fn fail_fetches(&self, message: &str) {
        self.lock().fetch_error = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Provisioning verbs issued so far, in order.
    pub fn provision_targets(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Provision(req) => Some(req.target.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    pub fn state_of(&self, id: &str) -> Option<ProvisionState> {
        self.lock()
            .nodes
            .get(id)
            .map(|n| n.record.provision_state.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }
}

/// Intermediate states the remote walks through for `verb` from `from`.
fn plan(from: &ProvisionState, verb: &str) -> Option<Vec<Step>> {
    use ProvisionState as S;

    let steps = match (verb, from) {
        ("manage", S::Enroll) => vec![
            Step::busy(S::Verifying, S::Manageable),
            Step::done(S::Manageable),
        ],
        ("manage", S::Available | S::CleanFailed | S::InspectFailed | S::AdoptFailed) => {
            vec![Step::done(S::Manageable)]
        }
        ("provide", S::Manageable) => vec![
            Step::busy(S::Cleaning, S::Available),
            Step::done(S::Available),
        ],
        ("active", S::Available) => vec![
            Step::busy(S::Deploying, S::Active),
            Step::busy(S::WaitCallBack, S::Active),
            Step::done(S::Active),
        ],
        ("deleted", S::Active | S::WaitCallBack | S::DeployFailed | S::Error) => vec![
            Step::busy(S::Deleting, S::Available),
            Step::busy(S::Cleaning, S::Available),
            Step::done(S::Available),
        ],
        ("inspect", S::Manageable) => vec![
            Step::busy(S::Inspecting, S::Manageable),
            Step::done(S::Manageable),
        ],
        ("clean", S::Manageable) => vec![
            Step::busy(S::Cleaning, S::Manageable),
            Step::busy(S::CleanWait, S::Manageable),
            Step::done(S::Manageable),
        ],
        _ => return None,
    };
    Some(steps)
}

#[async_trait]
impl BareMetalApi for FakeApi {
    async fn get_node(&self, id: &str) -> Result<NodeRecord, ApiError> {
        let mut inner = self.lock();
        inner.fetches += 1;
        if let Some(message) = &inner.fetch_error {
            return Err(ApiError::Transport(message.clone()));
        }

        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;

        if let Some(step) = node.steps.pop_front() {
            node.record.provision_state = step.state;
            node.record.target_provision_state = step.target;
            if step.last_error.is_some() {
                node.record.last_error = step.last_error;
            }
        }

        if let Some(pending) = node.power.as_mut() {
            if pending.polls_left == 0 {
                node.record.power_state = Some(pending.lands_in.clone());
                node.record.target_power_state = None;
                node.power = None;
            } else {
                pending.polls_left -= 1;
            }
        }

        Ok(node.record.clone())
    }

    async fn set_provision_state(
        &self,
        id: &str,
        request: &ProvisionStateRequest,
    ) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Provision(request.clone()));
        let reaction = inner.reactions.get(&request.target).cloned();

        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;

        let from = node.record.provision_state.clone();
        let steps = match reaction {
            Some(Reaction::Reject { status, message }) => {
                return Err(ApiError::Rejected { status, message })
            }
            Some(Reaction::Ignore) => Vec::new(),
            Some(Reaction::Fail { state, last_error }) => {
                let mut steps = plan(&from, &request.target).unwrap_or_default();
                let destination = steps.pop().map(|step| step.state);
                let target = if state.is_failure() { destination } else { None };
                steps.push(Step {
                    state,
                    target,
                    last_error: Some(last_error),
                });
                steps
            }
            Some(Reaction::Stall { state }) => vec![Step::busy(state.clone(), state)],
            None => plan(&from, &request.target).ok_or_else(|| ApiError::Rejected {
                status: 400,
                message: format!("cannot '{}' a node in '{}'", request.target, from),
            })?,
        };

        node.record.last_error = None;
        node.steps = steps.into();
        Ok(())
    }

    async fn set_power_state(
        &self,
        id: &str,
        target: &PowerState,
        timeout: Option<u32>,
    ) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Power {
            target: target.clone(),
            timeout,
        });
        let delay = inner.power_delay;
        let forced = inner.power_lands_in.clone();

        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;

        let Some(settled) = target.settled() else {
            return Err(ApiError::Rejected {
                status: 400,
                message: format!("invalid power target '{}'", target),
            });
        };

        node.record.target_power_state = Some(target.clone());
        node.power = Some(PendingPower {
            polls_left: delay,
            lands_in: forced.unwrap_or(settled),
        });
        Ok(())
    }

    async fn set_raid_config(&self, id: &str, raid_config: &Value) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.calls.push(Call::RaidConfig(raid_config.clone()));
        if !inner.nodes.contains_key(id) {
            return Err(ApiError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Delete);
        inner
            .nodes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }
}

/// Undo the base64 and gzip layers of an encoded config drive, returning
/// the raw ISO image.
pub fn unpack_config_drive(encoded: &str) -> Vec<u8> {
    let gzipped = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap();
    let mut image = Vec::new();
    GzDecoder::new(gzipped.as_slice())
        .read_to_end(&mut image)
        .unwrap();
    image
}
