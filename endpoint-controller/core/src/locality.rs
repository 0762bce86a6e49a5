use std::fmt;

/// The topological placement of an endpoint.
///
/// Each component is optional. When rendered, missing components are omitted rather than left
/// blank, so a locality with only a region renders as `"us-east"` and never as `"us-east/"`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Locality {
    region: Option<String>,
    zone: Option<String>,
    subzone: Option<String>,
}

// === impl Locality ===

impl Locality {
    pub fn new(
        region: Option<impl Into<String>>,
        zone: Option<impl Into<String>>,
        subzone: Option<impl Into<String>>,
    ) -> Self {
        fn part(s: Option<impl Into<String>>) -> Option<String> {
            s.map(Into::into).filter(|s| !s.is_empty())
        }

        Self {
            region: part(region),
            zone: part(zone),
            subzone: part(subzone),
        }
    }

    /// Parses a `/`-separated `region/zone/subzone` string.
    ///
    /// Components are assigned in order; anything past the third separator is folded into the
    /// subzone.
    pub fn parse(s: &str) -> Self {
        let mut parts = s.trim().splitn(3, '/');
        Self::new(parts.next(), parts.next(), parts.next())
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    pub fn subzone(&self) -> Option<&str> {
        self.subzone.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_none() && self.zone.is_none() && self.subzone.is_none()
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for part in [&self.region, &self.zone, &self.subzone].into_iter().flatten() {
            write!(f, "{sep}{part}")?;
            sep = "/";
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_omits_missing_parts() {
        for (locality, expected) in [
            (Locality::default(), ""),
            (Locality::new(Some("r"), None::<&str>, None::<&str>), "r"),
            (Locality::new(Some("r"), Some("z"), None::<&str>), "r/z"),
            (Locality::new(Some("r"), Some("z"), Some("s")), "r/z/s"),
            (Locality::new(Some("r"), None::<&str>, Some("s")), "r/s"),
            (Locality::new(None::<&str>, Some("z"), None::<&str>), "z"),
            (Locality::new(Some(""), Some("z"), Some("")), "z"),
        ] {
            assert_eq!(locality.to_string(), expected, "{locality:?}");
        }
    }

    #[test]
    fn parse() {
        let l = Locality::parse("us-east/us-east-1a/rack-1");
        assert_eq!(l.region(), Some("us-east"));
        assert_eq!(l.zone(), Some("us-east-1a"));
        assert_eq!(l.subzone(), Some("rack-1"));

        let l = Locality::parse("us-east");
        assert_eq!(l.region(), Some("us-east"));
        assert_eq!(l.zone(), None);
        assert_eq!(l.to_string(), "us-east");

        assert!(Locality::parse("").is_empty());
    }
}
