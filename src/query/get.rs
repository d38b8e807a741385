use crate::cache::{Intersection, ObjectCache};
use crate::config::FrontendOptions;
use crate::request::RequestId;
use crate::types::{BoundingBox, FeatureKind, OsmId, Properties, out_options};

use super::{Context, Part, SEPARATOR, SubRequest};

const KINDS: [FeatureKind; 3] = [FeatureKind::Point, FeatureKind::Line, FeatureKind::Area];

/// Compiles a get-by-id request.
///
/// Ids are grouped per kind into one union statement each. With a bbox
/// filter every set first loses the members inside the bbox and the rest is
/// printed as `out ids bb`, followed by a separator; that leading section is
/// the "excluded" part. The full detail section comes last.
///
/// Stops adding ids once `ctx.effort_cap` is exceeded; ids taken by another
/// request of the round or already known to be outside the bbox are skipped.
pub fn compile_get(
    request: RequestId,
    pending: &[OsmId],
    properties: Properties,
    bbox: Option<&BoundingBox>,
    ctx: &mut Context,
    cache: &ObjectCache,
    options: &FrontendOptions,
) -> SubRequest {
    let mut statements: [String; 3] = Default::default();
    let mut effort = 0;
    let mut ids = Vec::new();

    for id in pending {
        if effort > ctx.effort_cap {
            break;
        }
        if ctx.todo.contains(id) {
            continue;
        }
        if let Some(bbox) = bbox {
            let bbox_known = cache
                .feature(id)
                .is_some_and(|f| f.has(Properties::BBOX));
            if bbox_known && cache.intersects(id, bbox) == Intersection::Outside {
                continue;
            }
        }

        let slot = match id.kind {
            FeatureKind::Point => 0,
            FeatureKind::Line => 1,
            FeatureKind::Area => 2,
        };
        statements[slot].push_str(&format!("{}({});\n", id.kind.osm_type(), id.id));
        effort += options.effort(id.kind);
        ctx.todo.insert(*id);
        ids.push(*id);
    }

    let mut query = String::new();
    let mut parts = Vec::new();
    if ids.is_empty() {
        return SubRequest {
            request,
            query,
            effort,
            parts,
            ids,
        };
    }

    for (kind, body) in KINDS.iter().zip(&statements) {
        if body.is_empty() {
            continue;
        }
        // named sets `.n`, `.w`, `.r`
        let set = kind.prefix();
        query.push_str(&format!("(({});)->.{};\n", body, set));
        if let Some(bbox) = bbox {
            let osm_type = kind.osm_type();
            query.push_str(&format!(
                "({t}.{s}; - {t}.{s}({b})->.{s});\nout ids bb qt;\n",
                t = osm_type,
                s = set,
                b = bbox.to_lat_lon_string()
            ));
        }
    }

    if let Some(bbox) = bbox {
        query.push_str(SEPARATOR);
        parts.push(Part::excluded(*bbox));
    }

    let out = out_options(properties);
    for (kind, body) in KINDS.iter().zip(&statements) {
        if !body.is_empty() {
            query.push_str(&format!(".{} out {};\n", kind.prefix(), out));
        }
    }
    parts.push(Part::new(properties));

    SubRequest {
        request,
        query,
        effort,
        parts,
        ids,
    }
}
