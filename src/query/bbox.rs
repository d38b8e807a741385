use crate::request::RequestId;
use crate::types::{BoundingBox, Properties, out_options};

use super::{Context, Part, SubRequest};

/// Compiles a bbox query: the filter restricted to `bbox`, printed with
/// bounds so the results can be indexed. A single part, so no separators.
pub fn compile_bbox(
    request: RequestId,
    filter: &str,
    bbox: &BoundingBox,
    properties: Properties,
    ctx: &mut Context,
) -> SubRequest {
    let properties = properties | Properties::BBOX;
    ctx.extend_bbox(bbox);

    let mut part = Part::new(properties);
    part.bbox = Some(*bbox);

    SubRequest {
        request,
        query: format!(
            "{}({});\nout {};",
            filter,
            bbox.to_lat_lon_string(),
            out_options(properties)
        ),
        effort: ctx.effort_cap,
        parts: vec![part],
        ids: vec![],
    }
}
