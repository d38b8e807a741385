use std::collections::HashSet;

use crate::cache::UpsertOptions;
use crate::request::RequestId;
use crate::types::{BoundingBox, OsmId, Properties};

/// Separator between the sections of a combined query. The service answers
/// it with one `count` element, which is how the dispatcher finds part
/// boundaries in the flat element stream.
pub const SEPARATOR: &str = "out count;\n";

/// One section of a sub-request's result stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub properties: Properties,
    pub bbox: Option<BoundingBox>,
    /// Elements in this part matched the ids but not the bbox.
    pub bbox_no_match: bool,
    /// Elements received in this part so far.
    pub count: usize,
}

impl Part {
    pub fn new(properties: Properties) -> Self {
        Self {
            properties,
            bbox: None,
            bbox_no_match: false,
            count: 0,
        }
    }

    pub fn excluded(bbox: BoundingBox) -> Self {
        Self {
            properties: Properties::BBOX,
            bbox: Some(bbox),
            bbox_no_match: true,
            count: 0,
        }
    }

    pub fn upsert_options(&self) -> UpsertOptions {
        UpsertOptions {
            properties: self.properties,
            bbox: self.bbox,
            bbox_no_match: self.bbox_no_match,
        }
    }
}

/// The compiled, network-ready piece of one request for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct SubRequest {
    pub request: RequestId,
    pub query: String,
    pub effort: u32,
    pub parts: Vec<Part>,
    /// Ids asked for by id; those still unknown once the sub-request is
    /// exhausted do not exist.
    pub ids: Vec<OsmId>,
}

impl SubRequest {
    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }
}

/// Scratch state of one scheduling round.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub query: String,
    /// Union of the bboxes of all bbox queries in the round.
    pub bbox: Option<BoundingBox>,
    /// Ids already asked for this round, so two requests never fetch the same one.
    pub todo: HashSet<OsmId>,
    pub requests: Vec<RequestId>,
    pub sub_requests: Vec<SubRequest>,
    pub min_priority: i32,
    pub min_effort: u32,
    /// `None` once a request with unpredictable result size was admitted.
    pub max_effort: Option<u32>,
    /// Effort a single request may spend while compiling.
    pub effort_cap: u32,
}

impl Context {
    pub fn new(min_priority: i32) -> Self {
        Self {
            min_priority,
            max_effort: Some(0),
            ..Default::default()
        }
    }

    /// Adds a request's declared effort range to the running totals.
    pub fn admit(&mut self, request: RequestId, min_effort: u32, max_effort: Option<u32>) {
        self.min_effort += min_effort;
        self.max_effort = match (self.max_effort, max_effort) {
            (Some(total), Some(max)) => Some(total + max),
            _ => None,
        };
        self.requests.push(request);
    }

    pub fn extend_bbox(&mut self, bbox: &BoundingBox) {
        self.bbox = Some(match self.bbox {
            Some(current) => current.union(bbox),
            None => *bbox,
        });
    }

    /// Appends a compiled sub-request. Empty ones are dropped: they would
    /// produce a section without elements and shift every later boundary.
    pub fn push(&mut self, sub_request: SubRequest) -> bool {
        if sub_request.is_empty() {
            return false;
        }
        if !self.query.is_empty() {
            self.query.push('\n');
            self.query.push_str(SEPARATOR);
        }
        self.query.push_str(&sub_request.query);
        self.sub_requests.push(sub_request);
        true
    }

    /// The full query as sent: `[out:json]` header, the global bbox when a
    /// bbox query takes part, then the body.
    pub fn envelope(&self) -> String {
        let mut query = String::from("[out:json]");
        if let Some(bbox) = &self.bbox {
            query.push_str(&format!("[bbox:{}]", bbox.to_lat_lon_string()));
        }
        query.push_str(";\n");
        query.push_str(&self.query);
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(query: &str) -> SubRequest {
        SubRequest {
            request: RequestId(1),
            query: query.to_string(),
            effort: 1,
            parts: vec![Part::new(Properties::DEFAULT)],
            ids: vec![],
        }
    }

    #[test]
    fn admission_tracks_unbounded_effort() {
        let mut ctx = Context::new(0);
        ctx.admit(RequestId(1), 1, Some(5));
        assert_eq!(ctx.max_effort, Some(5));
        ctx.admit(RequestId(2), 256, None);
        assert_eq!(ctx.max_effort, None);
        ctx.admit(RequestId(3), 1, Some(1));
        assert_eq!(ctx.max_effort, None);
        assert_eq!(ctx.min_effort, 258);
    }

    #[test]
    fn sub_requests_are_separated() {
        let mut ctx = Context::new(0);
        assert!(ctx.push(sub("node(1);\nout;\n")));
        assert!(!ctx.push(sub("")));
        assert!(ctx.push(sub("way(2);\nout;\n")));
        assert_eq!(ctx.sub_requests.len(), 2);
        assert_eq!(
            ctx.envelope(),
            "[out:json];\nnode(1);\nout;\n\nout count;\nway(2);\nout;\n"
        );

        ctx.extend_bbox(&BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        ctx.extend_bbox(&BoundingBox::new(2.0, 2.0, 3.0, 3.0));
        assert!(ctx.envelope().starts_with("[out:json][bbox:0,0,3,3];\n"));
    }
}
