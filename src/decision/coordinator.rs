// Decision coordinator
//
// Brokers tool-permission and structured-question requests between worker
// bridges and the window that owns each session. Every window (tenant) has
// its own slot in a sharded map: one active request, a FIFO queue behind it,
// and the presenters registered for that window. There is no default tenant
// and no fallback lookup; a request for an unregistered window waits for that
// window only and otherwise times out.

use super::presenter::{DecisionPresenter, OwnerKey, TenantRegistration};
use super::request::{DecisionKind, DecisionRequest, DecisionResponse};
use crate::error::Error;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

/// Observable state of one tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantState {
    /// No presenters registered for this key
    Unregistered,
    Idle,
    AwaitingDecision,
}

struct Pending {
    request: DecisionRequest,
    reply: oneshot::Sender<DecisionResponse>,
}

#[derive(Default)]
struct TenantSlot {
    registration: Option<Arc<TenantRegistration>>,
    active: Option<Pending>,
    queue: VecDeque<Pending>,
    /// Tools the user allowed with "remember"
    remembered: HashSet<String>,
}

impl TenantSlot {
    fn is_vacant(&self) -> bool {
        self.registration.is_none() && self.active.is_none() && self.queue.is_empty()
    }
}

/// Presenter call to make once the registry lock is released
type Presentation = (Arc<dyn DecisionPresenter>, DecisionRequest);

/// A submitted request, awaited with `DecisionCoordinator::wait`
#[derive(Debug)]
pub struct DecisionTicket {
    owner: OwnerKey,
    channel_id: String,
    state: TicketState,
}

impl DecisionTicket {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

#[derive(Debug)]
enum TicketState {
    Ready(DecisionResponse),
    Waiting(oneshot::Receiver<DecisionResponse>),
}

enum Admission {
    Remembered,
    Duplicate,
    Waiting(Option<Presentation>),
}

pub struct DecisionCoordinator {
    tenants: DashMap<OwnerKey, TenantSlot>,
    /// channel id → owning tenant, for every active, queued or parked request
    channels: DashMap<String, OwnerKey>,
    timeout: Duration,
    routing_gaps: AtomicU64,
}

impl DecisionCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tenants: DashMap::new(),
            channels: DashMap::new(),
            timeout,
            routing_gaps: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register (or replace) the presenters for one window.
    ///
    /// Other windows are untouched. An active request is re-presented on the
    /// new presenter; parked requests for this key are promoted.
    pub fn register(&self, registration: TenantRegistration) {
        let owner = registration.owner.clone();
        let registration = Arc::new(registration);

        let presentation = {
            let mut slot = self.tenants.entry(owner.clone()).or_default();
            let replaced = slot.registration.replace(Arc::clone(&registration)).is_some();
            info!(owner = %owner, replaced = replaced, "Registered decision presenters");

            let active = slot.active.as_ref().map(|active| active.request.clone());
            match active {
                Some(request) => Some((Arc::clone(registration.presenter_for(request.kind)), request)),
                None => self.promote(&mut slot),
            }
        };

        if let Some((presenter, request)) = presentation {
            presenter.present(&request);
        }
    }

    /// Drop a window's registration and fail everything it still owns.
    ///
    /// Returns how many requests were failed.
    pub fn unregister(&self, owner: &OwnerKey) -> usize {
        let Some((_, slot)) = self.tenants.remove(owner) else {
            debug!(owner = %owner, "Unregister for unknown window");
            return 0;
        };

        let TenantSlot {
            registration,
            active,
            queue,
            ..
        } = slot;

        if let (Some(registration), Some(active)) = (&registration, &active) {
            registration
                .presenter_for(active.request.kind)
                .withdraw(&active.request.channel_id);
        }

        let mut failed = 0;
        for pending in active.into_iter().chain(queue) {
            let channel_id = pending.request.channel_id;
            self.channels.remove(&channel_id);
            let _ = pending.reply.send(DecisionResponse::torn_down(channel_id));
            failed += 1;
        }

        if failed > 0 {
            info!(owner = %owner, failed = failed, "{}; pending requests failed", Error::TornDown(owner.to_string()));
        } else {
            info!(owner = %owner, "Unregistered window");
        }
        failed
    }

    /// Ask the window `owner` for a decision and wait for the answer.
    ///
    /// Never fails: timeouts, teardown and duplicates resolve as denials with
    /// a reject message.
    #[instrument(skip(self, owner, request), fields(owner = %owner, channel_id = %request.channel_id, kind = ?request.kind))]
    pub async fn request_decision(&self, owner: &OwnerKey, request: DecisionRequest) -> DecisionResponse {
        let ticket = self.submit(owner, request);
        self.wait(ticket).await
    }

    /// Admit a request right away and return a ticket to wait on.
    ///
    /// The request is queued (and presented, if it is next) before this
    /// returns, so a `cancel` issued afterwards always finds it.
    pub fn submit(&self, owner: &OwnerKey, request: DecisionRequest) -> DecisionTicket {
        let channel_id = request.channel_id.clone();
        let (reply, response_rx) = oneshot::channel();

        let state = match self.admit(owner, request, reply) {
            Admission::Remembered => {
                debug!(channel_id = %channel_id, "Tool previously allowed with remember; skipping prompt");
                TicketState::Ready(DecisionResponse::allow(channel_id.clone()).remembered())
            }
            Admission::Duplicate => {
                warn!(channel_id = %channel_id, "Duplicate channel id; refusing request");
                TicketState::Ready(DecisionResponse::deny(channel_id.clone(), "duplicate channel id"))
            }
            Admission::Waiting(presentation) => {
                if let Some((presenter, request)) = presentation {
                    presenter.present(&request);
                }
                TicketState::Waiting(response_rx)
            }
        };

        DecisionTicket {
            owner: owner.clone(),
            channel_id,
            state,
        }
    }

    /// Wait for the answer to a submitted request, bounded by the timeout
    pub async fn wait(&self, ticket: DecisionTicket) -> DecisionResponse {
        let DecisionTicket {
            owner,
            channel_id,
            state,
        } = ticket;
        let response_rx = match state {
            TicketState::Ready(response) => return response,
            TicketState::Waiting(rx) => rx,
        };

        match tokio::time::timeout(self.timeout, response_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                // Cancelled, or the window went away, without an answer.
                self.channels.remove(&channel_id);
                DecisionResponse::torn_down(channel_id)
            }
            Err(_) => {
                warn!(owner = %owner, channel_id = %channel_id, "{}", Error::DecisionTimeout(self.timeout));
                self.cancel(&owner, &channel_id);
                DecisionResponse::timed_out(channel_id)
            }
        }
    }

    /// Deliver the user's answer. Accepted only for the active channel of
    /// some window, and only once.
    pub fn resolve(&self, response: DecisionResponse) -> bool {
        let Some(owner) = self.channels.get(&response.channel_id).map(|e| e.value().clone()) else {
            warn!(channel_id = %response.channel_id, "Response for unknown or expired channel ignored");
            return false;
        };
        self.resolve_owned(&owner, response)
    }

    /// Like `resolve`, but also requires the channel to belong to `owner`.
    pub fn resolve_for(&self, owner: &OwnerKey, response: DecisionResponse) -> bool {
        match self.channels.get(&response.channel_id).map(|e| e.value().clone()) {
            Some(actual) if &actual == owner => self.resolve_owned(owner, response),
            Some(actual) => {
                error!(
                    channel_id = %response.channel_id,
                    from = %owner,
                    owner = %actual,
                    "Response from a window that does not own the channel ignored"
                );
                false
            }
            None => {
                warn!(channel_id = %response.channel_id, "Response for unknown or expired channel ignored");
                false
            }
        }
    }

    pub fn state(&self, owner: &OwnerKey) -> TenantState {
        match self.tenants.get(owner) {
            Some(slot) if slot.registration.is_none() => TenantState::Unregistered,
            Some(slot) if slot.active.is_some() => TenantState::AwaitingDecision,
            Some(_) => TenantState::Idle,
            None => TenantState::Unregistered,
        }
    }

    pub fn is_registered(&self, owner: &OwnerKey) -> bool {
        self.tenants
            .get(owner)
            .is_some_and(|slot| slot.registration.is_some())
    }

    /// Active plus queued requests for a window
    pub fn pending_count(&self, owner: &OwnerKey) -> usize {
        self.tenants
            .get(owner)
            .map(|slot| slot.queue.len() + usize::from(slot.active.is_some()))
            .unwrap_or(0)
    }

    pub fn active_channel(&self, owner: &OwnerKey) -> Option<String> {
        self.tenants
            .get(owner)
            .and_then(|slot| slot.active.as_ref().map(|p| p.request.channel_id.clone()))
    }

    /// Requests that arrived for a window with no registration
    pub fn routing_gaps(&self) -> u64 {
        self.routing_gaps.load(Ordering::Relaxed)
    }

    fn admit(
        &self,
        owner: &OwnerKey,
        request: DecisionRequest,
        reply: oneshot::Sender<DecisionResponse>,
    ) -> Admission {
        let mut slot = self.tenants.entry(owner.clone()).or_default();

        if request.kind == DecisionKind::ToolPermission {
            if let Some(tool) = &request.tool_name {
                if slot.remembered.contains(tool) {
                    return Admission::Remembered;
                }
            }
        }

        if self.channels.contains_key(&request.channel_id) {
            return Admission::Duplicate;
        }
        self.channels.insert(request.channel_id.clone(), owner.clone());

        if slot.registration.is_none() {
            self.routing_gaps.fetch_add(1, Ordering::Relaxed);
            error!(
                owner = %owner,
                channel_id = %request.channel_id,
                "{}; holding the request for that window until timeout",
                Error::RoutingGap(owner.to_string())
            );
        }

        slot.queue.push_back(Pending { request, reply });
        Admission::Waiting(self.promote(&mut slot))
    }

    /// Move the next live queued request into the active position if the
    /// tenant is registered and idle.
    fn promote(&self, slot: &mut TenantSlot) -> Option<Presentation> {
        if slot.active.is_some() {
            return None;
        }
        let registration = slot.registration.clone()?;

        while let Some(pending) = slot.queue.pop_front() {
            // The waiting side gave up (its task was cancelled).
            if pending.reply.is_closed() {
                self.channels.remove(&pending.request.channel_id);
                continue;
            }

            let presenter = Arc::clone(registration.presenter_for(pending.request.kind));
            let request = pending.request.clone();
            slot.active = Some(pending);
            debug!(channel_id = %request.channel_id, queued = slot.queue.len(), "Promoted decision request");
            return Some((presenter, request));
        }

        None
    }

    fn resolve_owned(&self, owner: &OwnerKey, response: DecisionResponse) -> bool {
        let (pending, presentation) = {
            let Some(mut slot) = self.tenants.get_mut(owner) else {
                warn!(owner = %owner, "Response for a window that is gone ignored");
                return false;
            };

            let is_active = slot
                .active
                .as_ref()
                .is_some_and(|p| p.request.channel_id == response.channel_id);
            if !is_active {
                warn!(channel_id = %response.channel_id, "Response for a request that is not active ignored");
                return false;
            }
            let Some(pending) = slot.active.take() else {
                return false;
            };

            if response.allow && response.remember && pending.request.kind == DecisionKind::ToolPermission {
                if let Some(tool) = &pending.request.tool_name {
                    slot.remembered.insert(tool.clone());
                }
            }

            let presentation = self.promote(&mut slot);
            (pending, presentation)
        };

        self.channels.remove(&response.channel_id);
        info!(channel_id = %response.channel_id, allow = response.allow, "Decision resolved");
        if pending.reply.send(response).is_err() {
            debug!("Requester stopped waiting before the response arrived");
        }

        if let Some((presenter, request)) = presentation {
            presenter.present(&request);
        }
        true
    }

    /// Drop a request that can no longer be answered (timed out, or its turn
    /// ended) wherever it sits, and promote the next one. The waiting caller,
    /// if any, resolves as torn down. Returns false if it was already gone.
    pub fn cancel(&self, owner: &OwnerKey, channel_id: &str) -> bool {
        if self.channels.remove(channel_id).is_none() {
            return false;
        }

        let (withdraw, presentation) = {
            let Some(mut slot) = self.tenants.get_mut(owner) else {
                return true;
            };

            let was_active = slot
                .active
                .as_ref()
                .is_some_and(|p| p.request.channel_id == channel_id);

            if was_active {
                let expired = slot.active.take();
                let withdraw = match (&slot.registration, expired) {
                    (Some(registration), Some(expired)) => {
                        Some(Arc::clone(registration.presenter_for(expired.request.kind)))
                    }
                    _ => None,
                };
                (withdraw, self.promote(&mut slot))
            } else {
                slot.queue.retain(|p| p.request.channel_id != channel_id);
                (None, None)
            }
        };

        self.tenants.remove_if(owner, |_, slot| slot.is_vacant());

        if let Some(presenter) = withdraw {
            presenter.withdraw(channel_id);
        }
        if let Some((presenter, request)) = presentation {
            presenter.present(&request);
        }
        true
    }
}
