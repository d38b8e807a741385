use bitflags::bitflags;

bitflags! {
    /// Which facts about a feature are known.
    ///
    /// A feature's set only ever grows; the cache ORs new bits in and never
    /// clears them short of evicting the entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Properties: u8 {
        const TAGS = 1;
        const META = 2;
        const MEMBERS = 4;
        const BBOX = 8;
        const GEOM = 16;
        const CENTER = 32;

        const DEFAULT = Self::TAGS.bits() | Self::MEMBERS.bits() | Self::BBOX.bits();
        const ALL = Self::TAGS.bits()
            | Self::META.bits()
            | Self::MEMBERS.bits()
            | Self::BBOX.bits()
            | Self::GEOM.bits()
            | Self::CENTER.bits();
    }
}

impl Properties {
    /// Nothing but the id is known.
    pub const ID_ONLY: Properties = Properties::empty();

    /// Bits that are derived from data actually present (bounds, geometry,
    /// centroid) rather than granted by having asked for them.
    pub const DERIVED: Properties = Properties::BBOX
        .union(Properties::GEOM)
        .union(Properties::CENTER);
}

impl Default for Properties {
    fn default() -> Self {
        Properties::DEFAULT
    }
}

/// Derive the Overpass `out` verbosity and geometry modifiers for a property set.
pub fn out_options(properties: Properties) -> String {
    let mut out = String::new();

    if properties.contains(Properties::META) {
        out.push_str("meta ");
    } else if properties.contains(Properties::TAGS) {
        if properties.contains(Properties::MEMBERS) {
            out.push_str("body ");
        } else {
            out.push_str("tags ");
        }
    } else if properties.contains(Properties::MEMBERS) {
        out.push_str("skel ");
    } else {
        out.push_str("ids ");
    }

    if properties.contains(Properties::GEOM) {
        out.push_str("geom ");
    } else if properties.contains(Properties::BBOX) {
        out.push_str("bb ");
    } else if properties.contains(Properties::CENTER) {
        out.push_str("center ");
    }

    out.push_str("qt");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_tags_members_bbox() {
        assert_eq!(Properties::DEFAULT.bits(), 13);
        assert_eq!(Properties::ALL.bits(), 63);
        assert!(Properties::ID_ONLY.is_empty());
    }

    #[test]
    fn out_options_follow_properties() {
        assert_eq!(out_options(Properties::DEFAULT), "body bb qt");
        assert_eq!(out_options(Properties::TAGS), "tags qt");
        assert_eq!(out_options(Properties::ALL), "meta geom qt");
        assert_eq!(out_options(Properties::MEMBERS | Properties::CENTER), "skel center qt");
        assert_eq!(out_options(Properties::ID_ONLY), "ids qt");
    }
}
