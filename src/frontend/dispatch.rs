use std::collections::HashSet;

use crate::error::{OverpassError, Result};
use crate::overpass::Transport;
use crate::query::{Context, SubRequest};
use crate::types::{OsmId, OverpassResponse};

use super::OverpassFrontend;

impl<T: Transport> OverpassFrontend<T> {
    /// Applies the answer of a round. Transport errors and remarks are
    /// retried by the next round until `max_retries` consecutive failures,
    /// then every request of the round fails with the error.
    pub(super) fn handle_result(
        &mut self,
        ctx: Context,
        result: Result<OverpassResponse>,
    ) -> Result<()> {
        let response = result.and_then(|response| match &response.remark {
            Some(remark) => Err(OverpassError::ServiceRemark(remark.clone())),
            None => Ok(response),
        });

        match response {
            Ok(response) => {
                self.error_count = 0;
                self.dispatch(ctx, response)
            }
            Err(err) => {
                self.error_count += 1;
                if self.error_count <= self.options.max_retries {
                    tracing::warn!(
                        "Round failed ({}), retry {}/{}",
                        err,
                        self.error_count,
                        self.options.max_retries
                    );
                } else {
                    tracing::error!("Round failed {} times, giving up: {}", self.error_count, err);
                    self.fail_round(&ctx, err);
                    self.error_count = 0;
                }
                Ok(())
            }
        }
    }

    /// Walks the flat element stream. Every separator closes the current
    /// part; closing the last part of a sub-request moves on to the next.
    fn dispatch(&mut self, mut ctx: Context, response: OverpassResponse) -> Result<()> {
        if ctx.sub_requests.is_empty() {
            return Ok(());
        }
        let mut sub_index = 0;
        let mut part_index = 0;
        let mut received = HashSet::new();

        for el in &response.elements {
            if el.is_separator() {
                part_index += 1;
                if part_index >= ctx.sub_requests[sub_index].parts.len() {
                    let finished = std::mem::take(&mut received);
                    self.finish_sub_request(&ctx.sub_requests[sub_index], &finished);
                    sub_index += 1;
                    part_index = 0;
                    if sub_index >= ctx.sub_requests.len() {
                        let message = format!(
                            "more separators than the {} sub-requests",
                            ctx.sub_requests.len()
                        );
                        return self.misaligned(&ctx, message);
                    }
                }
                continue;
            }

            let options = ctx.sub_requests[sub_index].parts[part_index].upsert_options();
            let id = match self.cache.upsert(el, &options) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping element: {}", e);
                    continue;
                }
            };
            ctx.sub_requests[sub_index].parts[part_index].count += 1;
            received.insert(id);

            let sub_request = &ctx.sub_requests[sub_index];
            // aborted requests are drained without callbacks
            if let Some(request) = self
                .requests
                .iter_mut()
                .find(|r| r.id() == sub_request.request)
            {
                request.receive(id, sub_request, part_index, &self.cache, &mut self.queries);
            }
        }

        let parts = ctx.sub_requests[sub_index].parts.len();
        if sub_index + 1 != ctx.sub_requests.len() || part_index + 1 != parts {
            return self.misaligned(
                &ctx,
                format!(
                    "stream ended in part {} of {} of sub-request {} of {}",
                    part_index + 1,
                    parts,
                    sub_index + 1,
                    ctx.sub_requests.len()
                ),
            );
        }
        self.finish_sub_request(&ctx.sub_requests[sub_index], &received);
        Ok(())
    }

    /// Ids asked for but not returned do not exist, even when the cache
    /// holds a placeholder for them; then the request gets a chance to
    /// resolve the rest from the cache and finish.
    fn finish_sub_request(&mut self, sub_request: &SubRequest, received: &HashSet<OsmId>) {
        let absent: Vec<OsmId> = sub_request
            .ids
            .iter()
            .filter(|id| !received.contains(id))
            .copied()
            .collect();
        for id in &absent {
            self.cache.mark_missing(*id);
        }

        let Some(request) = self
            .requests
            .iter_mut()
            .find(|r| r.id() == sub_request.request)
        else {
            return;
        };
        request.finish_sub_request(sub_request, &absent, &self.cache, &mut self.queries);
        if request.is_done() {
            let id = request.id();
            self.finish_request(id, Ok(()));
        }
    }

    /// Ends every request that had a sub-request in the round.
    fn fail_round(&mut self, ctx: &Context, err: OverpassError) {
        for sub_request in &ctx.sub_requests {
            self.finish_request(sub_request.request, Err(err.clone()));
        }
    }

    /// The compiled round and the answer disagree about part boundaries.
    /// Nothing about the remaining stream can be trusted.
    fn misaligned(&mut self, ctx: &Context, message: String) -> Result<()> {
        tracing::error!("Part boundaries out of sync: {}", message);
        let err = OverpassError::PartMisalignment(message);
        self.fail_round(ctx, err.clone());
        Err(err)
    }
}
