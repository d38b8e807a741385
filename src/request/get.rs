use crate::cache::{Intersection, Lookup, ObjectCache};
use crate::config::FrontendOptions;
use crate::query::{Context, SubRequest, compile_get};
use crate::types::{BoundingBox, Feature, OsmId, Properties};

use super::{Callbacks, FeatureResult, RequestId};

#[derive(Debug, Clone, PartialEq)]
pub struct GetOptions {
    /// Lower is sooner.
    pub priority: i32,
    /// Deliver results in the order the ids were given.
    pub sort: bool,
    /// Only report features touching this box; others resolve as `OutsideBBox`.
    pub bbox: Option<BoundingBox>,
    pub properties: Properties,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            sort: true,
            bbox: None,
            properties: Properties::DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Pending(OsmId),
    Malformed,
    Done,
}

/// A result that resolved before an earlier slot did.
enum Buffered {
    Found(Box<Feature>),
    NotFound,
    OutsideBBox,
}

impl Buffered {
    fn new(result: FeatureResult<'_>) -> Self {
        match result {
            FeatureResult::Found(feature) => Buffered::Found(Box::new(feature.clone())),
            FeatureResult::NotFound => Buffered::NotFound,
            FeatureResult::OutsideBBox => Buffered::OutsideBBox,
        }
    }

    fn as_result(&self) -> FeatureResult<'_> {
        match self {
            Buffered::Found(feature) => FeatureResult::Found(feature),
            Buffered::NotFound => FeatureResult::NotFound,
            Buffered::OutsideBBox => FeatureResult::OutsideBBox,
        }
    }
}

/// Get features by id.
pub struct GetRequest {
    id: RequestId,
    options: GetOptions,
    slots: Vec<Slot>,
    buffered: Vec<Option<Buffered>>,
    /// First index not yet delivered when sorting.
    next: usize,
    pub(super) callbacks: Callbacks,
}

impl GetRequest {
    /// Ids that are not `n123`/`w123`/`r123` resolve as not found on the
    /// first round. "Known missing" entries for the ids are dropped so they
    /// are asked for again.
    pub(crate) fn new<S: AsRef<str>>(
        id: RequestId,
        ids: &[S],
        options: GetOptions,
        callbacks: Callbacks,
        cache: &mut ObjectCache,
    ) -> Self {
        let slots: Vec<Slot> = ids
            .iter()
            .map(|raw| match raw.as_ref().parse::<OsmId>() {
                Ok(osm_id) => {
                    cache.forget_missing(&osm_id);
                    Slot::Pending(osm_id)
                }
                Err(e) => {
                    tracing::debug!("Request {}: {}", id, e);
                    Slot::Malformed
                }
            })
            .collect();

        Self {
            id,
            options,
            buffered: slots.iter().map(|_| None).collect(),
            slots,
            next: 0,
            callbacks,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn priority(&self) -> i32 {
        self.options.priority
    }

    pub fn options(&self) -> &GetOptions {
        &self.options
    }

    pub fn pending_ids(&self) -> Vec<OsmId> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Pending(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.slots.iter().all(|slot| *slot == Slot::Done)
    }

    /// Resolves every slot the cache can answer now.
    pub(crate) fn preprocess(&mut self, cache: &ObjectCache) {
        let bbox = self.options.bbox;
        for index in 0..self.slots.len() {
            let id = match self.slots[index] {
                Slot::Done => continue,
                Slot::Malformed => {
                    self.resolve(index, FeatureResult::NotFound);
                    continue;
                }
                Slot::Pending(id) => id,
            };

            match cache.get(&id) {
                Lookup::Unknown => {}
                Lookup::Missing => self.resolve(index, FeatureResult::NotFound),
                Lookup::Found(feature) => {
                    let outside = bbox
                        .is_some_and(|bbox| cache.intersects(&id, &bbox) == Intersection::Outside);
                    if outside {
                        self.resolve(index, FeatureResult::OutsideBBox);
                    } else if feature.has(self.options.properties) {
                        self.resolve(index, FeatureResult::Found(feature));
                    }
                }
            }
        }
    }

    /// The first pending id as minimum, since every compile takes it before
    /// checking the cap; all pending ids as maximum.
    pub(crate) fn min_max_effort(&self, options: &FrontendOptions) -> (u32, Option<u32>) {
        let costs: Vec<u32> = self
            .pending_ids()
            .iter()
            .map(|id| options.effort(id.kind))
            .collect();
        let min = costs.first().copied().unwrap_or(0);
        (min, Some(costs.iter().sum()))
    }

    /// Resolves pending slots the service was asked for but did not return.
    /// A placeholder in the cache (a way node, a relation member) is no
    /// evidence the element exists.
    pub(crate) fn resolve_absent(&mut self, absent: &[OsmId]) {
        for index in 0..self.slots.len() {
            if let Slot::Pending(id) = self.slots[index] {
                if absent.contains(&id) {
                    self.resolve(index, FeatureResult::NotFound);
                }
            }
        }
    }

    pub(crate) fn compile(
        &self,
        ctx: &mut Context,
        cache: &ObjectCache,
        options: &FrontendOptions,
    ) -> SubRequest {
        compile_get(
            self.id,
            &self.pending_ids(),
            self.options.properties,
            self.options.bbox.as_ref(),
            ctx,
            cache,
            options,
        )
    }

    /// `id` arrived in `part_index` of a sub-request with `part_count` parts.
    /// Everything before the last part was excluded by the bbox filter.
    pub(crate) fn receive(
        &mut self,
        id: OsmId,
        part_index: usize,
        part_count: usize,
        cache: &ObjectCache,
    ) {
        let indexes: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| **slot == Slot::Pending(id))
            .map(|(index, _)| index)
            .collect();

        for index in indexes {
            if part_index + 1 < part_count {
                self.resolve(index, FeatureResult::OutsideBBox);
                continue;
            }
            let outside = self
                .options
                .bbox
                .is_some_and(|bbox| cache.intersects(&id, &bbox) == Intersection::Outside);
            match cache.feature(&id) {
                _ if outside => self.resolve(index, FeatureResult::OutsideBBox),
                Some(feature) => self.resolve(index, FeatureResult::Found(feature)),
                None => self.resolve(index, FeatureResult::NotFound),
            }
        }
    }

    fn resolve(&mut self, index: usize, result: FeatureResult<'_>) {
        self.slots[index] = Slot::Done;

        if !self.options.sort {
            self.callbacks.feature(result, index);
            return;
        }
        if index != self.next {
            self.buffered[index] = Some(Buffered::new(result));
            return;
        }

        self.callbacks.feature(result, index);
        self.next += 1;
        while let Some(Some(buffered)) = self.buffered.get_mut(self.next).map(Option::take) {
            self.callbacks.feature(buffered.as_result(), self.next);
            self.next += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::cache::UpsertOptions;
    use crate::types::Element;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    type Log = Rc<RefCell<Vec<(usize, String)>>>;

    fn request(ids: &[&str], options: GetOptions, cache: &mut ObjectCache) -> (GetRequest, Log) {
        let log: Log = Rc::default();
        let sink = log.clone();
        let callbacks = Callbacks::new(
            Box::new(move |result, index| {
                let label = match result {
                    FeatureResult::Found(f) => f.id.to_string(),
                    FeatureResult::NotFound => "null".to_string(),
                    FeatureResult::OutsideBBox => "false".to_string(),
                };
                sink.borrow_mut().push((index, label));
            }),
            Box::new(|_| {}),
        );
        (GetRequest::new(RequestId(1), ids, options, callbacks, cache), log)
    }

    fn node(cache: &mut ObjectCache, id: u64, lat: f64) {
        let el: Element = serde_json::from_value(json!({
            "type": "node", "id": id, "lat": lat, "lon": lat, "tags": {}
        }))
        .unwrap();
        cache.upsert(&el, &UpsertOptions::new(Properties::DEFAULT)).unwrap();
    }

    #[test]
    fn malformed_and_cached_resolve_locally() {
        let mut cache = ObjectCache::new();
        node(&mut cache, 1, 0.0);
        cache.mark_missing(OsmId::node(9));
        let (mut req, log) = request(&["n1", "x7", "n2"], GetOptions::default(), &mut cache);

        req.preprocess(&cache);
        assert_eq!(*log.borrow(), vec![(0, "n1".to_string()), (1, "null".to_string())]);
        assert!(!req.is_done());
        assert_eq!(req.pending_ids(), vec![OsmId::node(2)]);
    }

    #[test]
    fn creating_a_request_forgets_missing() {
        let mut cache = ObjectCache::new();
        cache.mark_missing(OsmId::node(9));
        let (_req, _log) = request(&["n9"], GetOptions::default(), &mut cache);
        assert_eq!(cache.get(&OsmId::node(9)), Lookup::Unknown);
    }

    #[test]
    fn sorted_delivery_buffers_out_of_order_results() {
        let mut cache = ObjectCache::new();
        let (mut req, log) = request(&["n1", "n2", "n3"], GetOptions::default(), &mut cache);

        node(&mut cache, 3, 0.0);
        req.receive(OsmId::node(3), 0, 1, &cache);
        assert!(log.borrow().is_empty());

        node(&mut cache, 1, 0.0);
        req.receive(OsmId::node(1), 0, 1, &cache);
        assert_eq!(log.borrow().len(), 1);

        cache.mark_missing(OsmId::node(2));
        req.preprocess(&cache);
        assert_eq!(
            *log.borrow(),
            vec![
                (0, "n1".to_string()),
                (1, "null".to_string()),
                (2, "n3".to_string())
            ]
        );
        assert!(req.is_done());
    }

    #[test]
    fn unsorted_delivery_follows_arrival() {
        let mut cache = ObjectCache::new();
        let options = GetOptions {
            sort: false,
            ..Default::default()
        };
        let (mut req, log) = request(&["n1", "n2"], options, &mut cache);
        node(&mut cache, 2, 0.0);
        req.receive(OsmId::node(2), 0, 1, &cache);
        assert_eq!(*log.borrow(), vec![(1, "n2".to_string())]);
    }

    #[test]
    fn excluded_part_resolves_outside() {
        let mut cache = ObjectCache::new();
        let options = GetOptions {
            bbox: Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            ..Default::default()
        };
        let (mut req, log) = request(&["n5", "n5"], options, &mut cache);
        node(&mut cache, 5, 3.0);
        req.receive(OsmId::node(5), 0, 2, &cache);
        assert_eq!(
            *log.borrow(),
            vec![(0, "false".to_string()), (1, "false".to_string())]
        );
        assert!(req.is_done());
    }

    #[test]
    fn placeholder_not_returned_resolves_as_not_found() {
        let mut cache = ObjectCache::new();
        let way: Element = serde_json::from_value(json!({
            "type": "way", "id": 5, "nodes": [2, 3], "tags": {}
        }))
        .unwrap();
        cache.upsert(&way, &UpsertOptions::new(Properties::DEFAULT)).unwrap();
        let (mut req, log) = request(&["n3"], GetOptions::default(), &mut cache);

        req.preprocess(&cache);
        assert!(log.borrow().is_empty());

        req.resolve_absent(&[OsmId::node(3)]);
        assert_eq!(*log.borrow(), vec![(0, "null".to_string())]);
        assert!(req.is_done());
    }

    #[test]
    fn effort_range_follows_pending_ids() {
        let mut cache = ObjectCache::new();
        let (req, _log) = request(&["w1", "n2", "r3"], GetOptions::default(), &mut cache);
        assert_eq!(req.min_max_effort(&FrontendOptions::default()), (4, Some(69)));
    }
}
