use crate::overpass::Transport;
use crate::query::Context;
use crate::request::RequestId;

use super::{Event, OverpassFrontend, State};

/// What one round asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    /// Requests admitted, in compile order.
    pub requests: Vec<RequestId>,
    /// Requests that contributed a sub-request.
    pub sub_requests: usize,
    pub min_effort: u32,
    /// Effort actually spent by the compiled sub-requests.
    pub effort: u32,
    pub query: String,
}

impl<T: Transport> OverpassFrontend<T> {
    /// Answers what the cache can, reaps finished requests, then admits and
    /// compiles the rest into one query.
    pub(super) fn start_round(&mut self) {
        // stable: equal priorities keep submission order
        self.requests.sort_by_key(|r| r.priority());

        self.preprocess_requests();
        if self.requests.is_empty() {
            return;
        }

        let budget = self.options.effort_per_request;
        let mut ctx = Context::new(self.requests[0].priority());
        let mut admitted = Vec::new();

        for (index, request) in self.requests.iter().enumerate() {
            if request.priority() > ctx.min_priority
                && ctx.max_effort.is_none_or(|max| max > budget)
            {
                break;
            }
            let (min_effort, max_effort) = request.min_max_effort(&self.options);
            // only a request admitted alone may exceed the budget
            if !admitted.is_empty() && ctx.min_effort + min_effort > budget {
                continue;
            }
            ctx.admit(request.id(), min_effort, max_effort);
            admitted.push(index);
        }

        let mut effort_available = i64::from(budget);
        let mut effort_spent = 0;
        for (position, &index) in admitted.iter().enumerate() {
            let request = &self.requests[index];
            let same_priority = admitted[position..]
                .iter()
                .filter(|&&other| self.requests[other].priority() == request.priority())
                .count() as i64;
            ctx.effort_cap =
                (effort_available + same_priority - 1).div_euclid(same_priority) as u32;

            let sub_request = request.compile(&mut ctx, &self.cache, &self.options);
            effort_available -= i64::from(sub_request.effort);
            if !sub_request.is_empty() {
                effort_spent += sub_request.effort;
                if let Some(hook) = self.on_subrequest_compiled.as_mut() {
                    hook(&sub_request);
                }
                ctx.push(sub_request);
            }

            if effort_available <= 0 {
                break;
            }
        }

        if ctx.query.is_empty() {
            tracing::warn!(
                "{} requests pending but nothing to query",
                self.requests.len()
            );
            return;
        }

        tracing::info!(
            "Round: {} requests, {} sub-requests, effort {}",
            ctx.requests.len(),
            ctx.sub_requests.len(),
            effort_spent
        );
        self.last_round = Some(RoundSummary {
            requests: ctx.requests.clone(),
            sub_requests: ctx.sub_requests.len(),
            min_effort: ctx.min_effort,
            effort: effort_spent,
            query: ctx.envelope(),
        });
        self.round = Some(ctx);
        self.state = State::RoundActive;
        self.events.schedule(self.options.time_gap(), Event::Timeout);
    }

    fn preprocess_requests(&mut self) {
        let mut finished = Vec::new();
        for request in self.requests.iter_mut() {
            request.preprocess(&self.cache, &self.queries);
            if request.is_done() {
                finished.push(request.id());
            }
        }
        for id in finished {
            self.finish_request(id, Ok(()));
        }
    }
}
