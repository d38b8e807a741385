use std::collections::HashSet;

use geo::{Area, BooleanOps, BoundingRect, MultiPolygon};

use crate::cache::{Intersection, ObjectCache, QueryCache};
use crate::query::{Context, SubRequest, compile_bbox};
use crate::types::{AREA_EPSILON, BoundingBox, OsmId, Properties, subtract_bbox};

use super::{Callbacks, FeatureResult, RequestId};

#[derive(Debug, Clone, PartialEq)]
pub struct BBoxOptions {
    pub priority: i32,
    pub properties: Properties,
}

impl Default for BBoxOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            properties: Properties::DEFAULT,
        }
    }
}

/// All features matching a filter inside a rectangle.
pub struct BBoxRequest {
    id: RequestId,
    filter: String,
    bounds: BoundingBox,
    /// Part of `bounds` neither fetched nor answered from an earlier query.
    remaining: MultiPolygon<f64>,
    done_features: HashSet<OsmId>,
    options: BBoxOptions,
    pub(super) callbacks: Callbacks,
}

impl BBoxRequest {
    pub(crate) fn new(
        id: RequestId,
        filter: &str,
        bounds: BoundingBox,
        options: BBoxOptions,
        callbacks: Callbacks,
    ) -> Self {
        Self {
            id,
            filter: filter.to_string(),
            bounds,
            remaining: bounds.to_multi_polygon(),
            done_features: HashSet::new(),
            options,
            callbacks,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn priority(&self) -> i32 {
        self.options.priority
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn remaining(&self) -> &MultiPolygon<f64> {
        &self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.remaining.unsigned_area() <= AREA_EPSILON
    }

    /// Emits the cached matches of earlier runs of the same filter and
    /// drops the area those runs already covered. When a match lacks some
    /// of the requested properties the covered area is kept, so the next
    /// round fetches it again in full detail.
    pub(crate) fn preprocess(&mut self, cache: &ObjectCache, queries: &QueryCache) {
        let Some(region) = queries.region(&self.filter) else {
            return;
        };
        let mut complete = true;
        for id in region.candidates(&self.bounds) {
            let loaded = cache
                .feature(&id)
                .is_some_and(|f| f.has(self.options.properties));
            if loaded {
                self.emit(id, cache);
            } else if cache.intersects(&id, &self.bounds) != Intersection::Outside {
                complete = false;
            }
        }
        if complete {
            self.remaining = self.remaining.difference(region.covered());
        }
    }

    /// Queries the bounding rectangle of what is still missing.
    pub(crate) fn compile(&self, ctx: &mut Context) -> SubRequest {
        let bbox = match self.remaining.bounding_rect() {
            Some(rect) if !self.is_done() => BoundingBox::from(rect),
            _ => {
                return SubRequest {
                    request: self.id,
                    query: String::new(),
                    effort: 0,
                    parts: vec![],
                    ids: vec![],
                };
            }
        };
        compile_bbox(self.id, &self.filter, &bbox, self.options.properties, ctx)
    }

    pub(crate) fn receive(&mut self, id: OsmId, cache: &ObjectCache, queries: &mut QueryCache) {
        let bounds = cache
            .feature(&id)
            .filter(|f| f.has(Properties::BBOX))
            .and_then(|f| f.bounds);
        queries.record_feature(&self.filter, id, bounds);
        self.emit(id, cache);
    }

    pub(crate) fn finish_sub_request(
        &mut self,
        sub_request: &SubRequest,
        queries: &mut QueryCache,
    ) {
        for bbox in sub_request.parts.iter().filter_map(|p| p.bbox) {
            queries.record_covered(&self.filter, &bbox);
            self.remaining = subtract_bbox(&self.remaining, &bbox);
        }
    }

    fn emit(&mut self, id: OsmId, cache: &ObjectCache) {
        if self.done_features.contains(&id) {
            return;
        }
        let Some(feature) = cache.feature(&id) else {
            return;
        };
        if cache.intersects(&id, &self.bounds) == Intersection::Outside {
            return;
        }
        self.done_features.insert(id);
        let index = self.done_features.len() - 1;
        self.callbacks.feature(FeatureResult::Found(feature), index);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::cache::UpsertOptions;
    use crate::types::Element;
    use serde_json::json;

    const FILTER: &str = "node[amenity=cafe]";

    fn request(bounds: BoundingBox) -> (BBoxRequest, Rc<RefCell<Vec<OsmId>>>) {
        let seen: Rc<RefCell<Vec<OsmId>>> = Rc::default();
        let sink = seen.clone();
        let callbacks = Callbacks::new(
            Box::new(move |result, _| {
                if let FeatureResult::Found(f) = result {
                    sink.borrow_mut().push(f.id);
                }
            }),
            Box::new(|_| {}),
        );
        (
            BBoxRequest::new(RequestId(1), FILTER, bounds, BBoxOptions::default(), callbacks),
            seen,
        )
    }

    fn node(cache: &mut ObjectCache, id: u64, lat: f64, lon: f64) {
        let el: Element = serde_json::from_value(json!({
            "type": "node", "id": id, "lat": lat, "lon": lon
        }))
        .unwrap();
        cache.upsert(&el, &UpsertOptions::new(Properties::DEFAULT)).unwrap();
    }

    #[test]
    fn results_are_deduplicated_and_area_shrinks() {
        let mut cache = ObjectCache::new();
        let mut queries = QueryCache::new();
        let (mut req, seen) = request(BoundingBox::new(0.0, 0.0, 1.0, 1.0));

        let mut ctx = Context::new(0);
        let sub = req.compile(&mut ctx);
        assert!(sub.query.starts_with("node[amenity=cafe](0,0,1,1);"));

        node(&mut cache, 1, 0.5, 0.5);
        req.receive(OsmId::node(1), &cache, &mut queries);
        req.receive(OsmId::node(1), &cache, &mut queries);
        assert_eq!(*seen.borrow(), vec![OsmId::node(1)]);

        assert!(!req.is_done());
        req.finish_sub_request(&sub, &mut queries);
        assert!(req.is_done());
        assert!(req.compile(&mut Context::new(0)).is_empty());
    }

    #[test]
    fn contained_query_is_answered_from_cache() {
        let mut cache = ObjectCache::new();
        let mut queries = QueryCache::new();
        node(&mut cache, 1, 0.5, 0.5);
        node(&mut cache, 2, 0.9, 0.9);
        queries.record_covered(FILTER, &BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        for id in [OsmId::node(1), OsmId::node(2)] {
            let bounds = cache.feature(&id).and_then(|f| f.bounds);
            queries.record_feature(FILTER, id, bounds);
        }

        let (mut req, seen) = request(BoundingBox::new(0.25, 0.25, 0.75, 0.75));
        req.preprocess(&cache, &queries);
        assert!(req.is_done());
        assert_eq!(*seen.borrow(), vec![OsmId::node(1)]);
    }

    #[test]
    fn cached_match_without_requested_properties_is_refetched() {
        let mut cache = ObjectCache::new();
        let mut queries = QueryCache::new();
        let way: Element = serde_json::from_value(json!({
            "type": "way", "id": 7, "nodes": [1, 2], "tags": {},
            "bounds": {"minlat": 0.4, "minlon": 0.4, "maxlat": 0.6, "maxlon": 0.6}
        }))
        .unwrap();
        cache.upsert(&way, &UpsertOptions::new(Properties::DEFAULT)).unwrap();
        queries.record_covered(FILTER, &BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        let bounds = cache.feature(&OsmId::way(7)).and_then(|f| f.bounds);
        queries.record_feature(FILTER, OsmId::way(7), bounds);

        let (mut req, seen) = request(BoundingBox::new(0.25, 0.25, 0.75, 0.75));
        req.options.properties = Properties::DEFAULT | Properties::GEOM;
        req.preprocess(&cache, &queries);
        assert!(seen.borrow().is_empty());
        assert!(!req.is_done());

        let sub = req.compile(&mut Context::new(0));
        assert!(sub.query.starts_with("node[amenity=cafe](0.25,0.25,0.75,0.75);"));
    }

    #[test]
    fn partial_coverage_narrows_next_query() {
        let cache = ObjectCache::new();
        let mut queries = QueryCache::new();
        queries.record_covered(FILTER, &BoundingBox::new(0.0, 0.0, 1.0, 1.0));

        let (mut req, _seen) = request(BoundingBox::new(0.0, 0.0, 1.0, 2.0));
        req.preprocess(&cache, &queries);
        assert!(!req.is_done());
        let sub = req.compile(&mut Context::new(0));
        assert!(sub.query.starts_with("node[amenity=cafe](0,1,1,2);"));
    }
}
