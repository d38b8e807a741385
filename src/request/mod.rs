//! Caller-issued requests and their lifecycle.
//!
//! A request is `Pending` until it is admitted to a round, may be partly or
//! completely answered from the cache on every round, and ends either
//! finished or aborted. The final callback fires exactly once in both cases.

mod bbox;
mod get;

use std::fmt;

use crossbeam_channel::Receiver;

pub use bbox::*;
pub use get::*;

use crate::cache::{ObjectCache, QueryCache};
use crate::config::FrontendOptions;
use crate::error::Result;
use crate::query::{Context, SubRequest};
use crate::types::{Feature, OsmId};

/// Handle of a submitted request. Ids increase monotonically, so sorting by
/// `(priority, id)` keeps submission order within a priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-feature payload handed to callers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureResult<'a> {
    Found(&'a Feature),
    /// Confirmed absent, or the id was malformed.
    NotFound,
    /// Exists, but does not touch the request's bbox filter.
    OutsideBBox,
}

/// Called with each result and the index it belongs to: the position in the
/// id list for get requests, a running count for bbox queries.
pub type FeatureCallback = Box<dyn FnMut(FeatureResult<'_>, usize)>;
/// Called once when the request finished (`Ok`) or failed or was aborted.
pub type FinalCallback = Box<dyn FnOnce(Result<()>)>;

pub(crate) struct Callbacks {
    feature: FeatureCallback,
    finalize: Option<FinalCallback>,
}

impl Callbacks {
    pub fn new(feature: FeatureCallback, finalize: FinalCallback) -> Self {
        Self {
            feature,
            finalize: Some(finalize),
        }
    }

    fn feature(&mut self, result: FeatureResult<'_>, index: usize) {
        (self.feature)(result, index)
    }

    /// Fires the final callback unless it already fired.
    fn finish(&mut self, result: Result<()>) -> bool {
        match self.finalize.take() {
            Some(finalize) => {
                finalize(result);
                true
            }
            None => false,
        }
    }
}

pub enum Request {
    Get(GetRequest),
    BBox(BBoxRequest),
}

impl Request {
    pub fn id(&self) -> RequestId {
        match self {
            Request::Get(r) => r.id(),
            Request::BBox(r) => r.id(),
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            Request::Get(r) => r.priority(),
            Request::BBox(r) => r.priority(),
        }
    }

    /// Answers what the cache already can.
    pub(crate) fn preprocess(&mut self, cache: &ObjectCache, queries: &QueryCache) {
        match self {
            Request::Get(r) => r.preprocess(cache),
            Request::BBox(r) => r.preprocess(cache, queries),
        }
    }

    /// True once nothing is left to fetch.
    pub fn is_done(&self) -> bool {
        match self {
            Request::Get(r) => r.is_done(),
            Request::BBox(r) => r.is_done(),
        }
    }

    /// `(min, max)` effort of the next round; `None` means unbounded.
    pub(crate) fn min_max_effort(&self, options: &FrontendOptions) -> (u32, Option<u32>) {
        match self {
            Request::Get(r) => r.min_max_effort(options),
            Request::BBox(_) => (options.effort_bbox_query, None),
        }
    }

    pub(crate) fn compile(
        &self,
        ctx: &mut Context,
        cache: &ObjectCache,
        options: &FrontendOptions,
    ) -> SubRequest {
        match self {
            Request::Get(r) => r.compile(ctx, cache, options),
            Request::BBox(r) => r.compile(ctx),
        }
    }

    /// An element of `sub_request` arrived in `part_index` and is in the cache.
    pub(crate) fn receive(
        &mut self,
        id: OsmId,
        sub_request: &SubRequest,
        part_index: usize,
        cache: &ObjectCache,
        queries: &mut QueryCache,
    ) {
        match self {
            Request::Get(r) => r.receive(id, part_index, sub_request.parts.len(), cache),
            Request::BBox(r) => r.receive(id, cache, queries),
        }
    }

    /// All elements of `sub_request` were received; `absent` are the ids it
    /// asked for that the service did not return.
    pub(crate) fn finish_sub_request(
        &mut self,
        sub_request: &SubRequest,
        absent: &[OsmId],
        cache: &ObjectCache,
        queries: &mut QueryCache,
    ) {
        match self {
            Request::Get(r) => {
                r.resolve_absent(absent);
                r.preprocess(cache);
            }
            Request::BBox(r) => r.finish_sub_request(sub_request, queries),
        }
    }

    pub(crate) fn finish(&mut self, result: Result<()>) -> bool {
        match self {
            Request::Get(r) => r.callbacks.finish(result),
            Request::BBox(r) => r.callbacks.finish(result),
        }
    }
}

/// What the channel adapters send. Features are cloned out of the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEvent {
    Found { index: usize, feature: Box<Feature> },
    NotFound { index: usize },
    OutsideBBox { index: usize },
    Finished(Result<()>),
}

impl RequestEvent {
    fn from_result(result: FeatureResult<'_>, index: usize) -> Self {
        match result {
            FeatureResult::Found(feature) => RequestEvent::Found {
                index,
                feature: Box::new(feature.clone()),
            },
            FeatureResult::NotFound => RequestEvent::NotFound { index },
            FeatureResult::OutsideBBox => RequestEvent::OutsideBBox { index },
        }
    }
}

/// Callback pair that forwards everything into a channel, for callers that
/// would rather poll a receiver than pass closures.
pub fn channel_callbacks() -> (FeatureCallback, FinalCallback, Receiver<RequestEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let feature_tx = tx.clone();
    let on_feature: FeatureCallback = Box::new(move |result, index| {
        let _ = feature_tx.send(RequestEvent::from_result(result, index));
    });
    let on_final: FinalCallback = Box::new(move |result| {
        let _ = tx.send(RequestEvent::Finished(result));
    });
    (on_feature, on_final, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OverpassError;

    #[test]
    fn final_callback_fires_once() {
        let (on_feature, on_final, rx) = channel_callbacks();
        let mut callbacks = Callbacks::new(on_feature, on_final);
        assert!(callbacks.finish(Err(OverpassError::Aborted)));
        assert!(!callbacks.finish(Ok(())));
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![RequestEvent::Finished(Err(OverpassError::Aborted))]
        );
    }

    #[test]
    fn channel_clones_features() {
        let (mut on_feature, _on_final, rx) = channel_callbacks();
        let feature = Feature::placeholder(OsmId::node(1));
        on_feature(FeatureResult::Found(&feature), 0);
        on_feature(FeatureResult::OutsideBBox, 1);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                RequestEvent::Found {
                    index: 0,
                    feature: Box::new(feature)
                },
                RequestEvent::OutsideBBox { index: 1 }
            ]
        );
    }
}
