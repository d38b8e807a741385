//! # Frontend session
//!
//! [`OverpassFrontend`] owns the object cache, the request queue and the
//! transport. Submitting a request never blocks; the work happens when the
//! caller drives the event loop with [`OverpassFrontend::step`] or
//! [`OverpassFrontend::run_until_idle`].
//!
//! ## Round state machine
//! `Idle -> RoundActive -> AwaitingNetwork -> Idle`. Only one round is ever
//! active; requests submitted meanwhile join the next one.

mod dispatch;
mod event_loop;
mod scheduler;

use crossbeam_channel::Receiver;

pub use event_loop::*;
pub use scheduler::*;

use crate::cache::{ObjectCache, QueryCache};
use crate::config::FrontendOptions;
use crate::error::{OverpassError, Result};
use crate::overpass::{OverpassClient, Transport};
use crate::query::{Context, SubRequest};
use crate::request::{
    BBoxOptions, BBoxRequest, Callbacks, FeatureResult, GetOptions, GetRequest, Request,
    RequestEvent, RequestId, channel_callbacks,
};
use crate::types::{BoundingBox, OsmId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    /// A round is compiled and waits out the pacing delay.
    RoundActive,
    /// The round was sent; the answer is queued for delivery.
    AwaitingNetwork,
}

type SubRequestHook = Box<dyn FnMut(&SubRequest)>;

pub struct OverpassFrontend<T: Transport> {
    options: FrontendOptions,
    transport: T,
    cache: ObjectCache,
    queries: QueryCache,
    /// Live requests in submission order.
    requests: Vec<Request>,
    next_request_id: u64,
    state: State,
    events: EventLoop,
    round_scheduled: bool,
    round: Option<Context>,
    error_count: u32,
    last_round: Option<RoundSummary>,
    rounds_sent: usize,
    on_subrequest_compiled: Option<SubRequestHook>,
}

impl OverpassFrontend<OverpassClient> {
    /// Session talking HTTP to `options.url`.
    pub fn with_http(options: FrontendOptions) -> Self {
        let client = OverpassClient::from_options(&options);
        Self::new(client, options)
    }
}

impl<T: Transport> OverpassFrontend<T> {
    pub fn new(transport: T, options: FrontendOptions) -> Self {
        Self {
            events: EventLoop::new(options.real_time),
            options,
            transport,
            cache: ObjectCache::new(),
            queries: QueryCache::new(),
            requests: Vec::new(),
            next_request_id: 1,
            state: State::Idle,
            round_scheduled: false,
            round: None,
            error_count: 0,
            last_round: None,
            rounds_sent: 0,
            on_subrequest_compiled: None,
        }
    }

    pub fn options(&self) -> &FrontendOptions {
        &self.options
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn query_cache(&self) -> &QueryCache {
        &self.queries
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Number of queries handed to the transport so far.
    pub fn rounds_sent(&self) -> usize {
        self.rounds_sent
    }

    pub fn last_round(&self) -> Option<&RoundSummary> {
        self.last_round.as_ref()
    }

    /// Observer called with every sub-request that makes it into a round.
    pub fn on_subrequest_compiled(&mut self, hook: impl FnMut(&SubRequest) + 'static) {
        self.on_subrequest_compiled = Some(Box::new(hook));
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    fn submit(&mut self, request: Request) -> RequestId {
        let id = request.id();
        tracing::debug!("Queued request {}", id);
        self.requests.push(request);
        self.schedule_round();
        id
    }

    /// Requests features by id (`n1`, `w2`, `r3`).
    ///
    /// `on_feature` fires once per id with its index in `ids`; `on_final`
    /// fires once after the last one, or with the error that ended the
    /// request.
    pub fn get<S: AsRef<str>>(
        &mut self,
        ids: &[S],
        options: GetOptions,
        on_feature: impl FnMut(FeatureResult<'_>, usize) + 'static,
        on_final: impl FnOnce(Result<()>) + 'static,
    ) -> RequestId {
        let id = self.next_id();
        let callbacks = Callbacks::new(Box::new(on_feature), Box::new(on_final));
        let request = GetRequest::new(id, ids, options, callbacks, &mut self.cache);
        self.submit(Request::Get(request))
    }

    /// Like [`get`](Self::get), but results arrive on a channel.
    pub fn get_channel<S: AsRef<str>>(
        &mut self,
        ids: &[S],
        options: GetOptions,
    ) -> (RequestId, Receiver<RequestEvent>) {
        let id = self.next_id();
        let (on_feature, on_final, rx) = channel_callbacks();
        let callbacks = Callbacks::new(on_feature, on_final);
        let request = GetRequest::new(id, ids, options, callbacks, &mut self.cache);
        (self.submit(Request::Get(request)), rx)
    }

    /// Requests every feature matching `filter` (e.g. `nwr[amenity=cafe]`)
    /// inside `bounds`.
    pub fn bbox_query(
        &mut self,
        filter: &str,
        bounds: BoundingBox,
        options: BBoxOptions,
        on_feature: impl FnMut(FeatureResult<'_>, usize) + 'static,
        on_final: impl FnOnce(Result<()>) + 'static,
    ) -> RequestId {
        let id = self.next_id();
        let callbacks = Callbacks::new(Box::new(on_feature), Box::new(on_final));
        let request = BBoxRequest::new(id, filter, bounds, options, callbacks);
        self.submit(Request::BBox(request))
    }

    pub fn bbox_query_channel(
        &mut self,
        filter: &str,
        bounds: BoundingBox,
        options: BBoxOptions,
    ) -> (RequestId, Receiver<RequestEvent>) {
        let id = self.next_id();
        let (on_feature, on_final, rx) = channel_callbacks();
        let callbacks = Callbacks::new(on_feature, on_final);
        let request = BBoxRequest::new(id, filter, bounds, options, callbacks);
        (self.submit(Request::BBox(request)), rx)
    }

    /// Removes a request and fires its final callback with
    /// [`OverpassError::Aborted`]. Results already in flight for it are
    /// still merged into the cache but not reported.
    pub fn abort(&mut self, id: RequestId) -> bool {
        self.finish_request(id, Err(OverpassError::Aborted))
    }

    pub fn abort_all_requests(&mut self) {
        let requests = std::mem::take(&mut self.requests);
        tracing::info!("Aborting {} requests", requests.len());
        for mut request in requests {
            request.finish(Err(OverpassError::Aborted));
        }
    }

    /// Drops cache entries so they are fetched again. Cached bbox queries
    /// that returned any of them are forgotten too.
    pub fn evict(&mut self, ids: &[OsmId]) -> usize {
        self.queries.evict(&ids.iter().copied().collect());
        self.cache.evict(ids)
    }

    /// [`evict`](Self::evict) by string id; malformed ids are ignored.
    pub fn remove_from_cache<S: AsRef<str>>(&mut self, ids: &[S]) -> usize {
        let ids: Vec<OsmId> = ids
            .iter()
            .filter_map(|id| id.as_ref().parse().ok())
            .collect();
        self.evict(&ids)
    }

    /// Forgets the covered regions and matches of one bbox filter.
    pub fn clear_cached_query(&mut self, filter: &str) -> bool {
        self.queries.clear(filter)
    }

    /// Removes the request and fires its final callback. False when the
    /// request is not live any more.
    fn finish_request(&mut self, id: RequestId, result: Result<()>) -> bool {
        let Some(pos) = self.requests.iter().position(|r| r.id() == id) else {
            return false;
        };
        let mut request = self.requests.remove(pos);
        match &result {
            Ok(()) => tracing::debug!("Request {} finished", id),
            Err(e) => tracing::debug!("Request {} ended: {}", id, e),
        }
        request.finish(result)
    }

    fn schedule_round(&mut self) {
        if !self.round_scheduled {
            self.round_scheduled = true;
            self.events.schedule(std::time::Duration::ZERO, Event::ScheduleRound);
        }
    }

    /// Handles the next event. `Ok(false)` when there was nothing to do.
    pub fn step(&mut self) -> Result<bool> {
        let Some(event) = self.events.pop() else {
            return Ok(false);
        };
        match event {
            Event::ScheduleRound => {
                self.round_scheduled = false;
                if self.state == State::Idle {
                    self.start_round();
                }
            }
            Event::Timeout => self.send_round(),
            Event::Deliver(result) => {
                let outcome = match self.round.take() {
                    Some(ctx) => self.handle_result(ctx, result),
                    None => Ok(()),
                };
                self.state = State::Idle;
                self.schedule_round();
                outcome?;
            }
        }
        Ok(true)
    }

    /// Drives the loop until no event is left, i.e. every request finished
    /// or failed.
    pub fn run_until_idle(&mut self) -> Result<()> {
        while self.step()? {}
        Ok(())
    }

    fn send_round(&mut self) {
        let Some(ctx) = &self.round else {
            self.state = State::Idle;
            return;
        };
        let query = ctx.envelope();
        tracing::debug!("Sending query:\n{}", query);
        self.rounds_sent += 1;
        let result = self.transport.send(&self.options.url, &query);
        match &result {
            Ok(response) => tracing::info!("Received {} elements", response.elements.len()),
            Err(e) => tracing::warn!("Query failed: {}", e),
        }
        self.state = State::AwaitingNetwork;
        self.events
            .schedule(std::time::Duration::ZERO, Event::Deliver(result));
    }
}
