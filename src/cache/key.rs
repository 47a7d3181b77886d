//! Response cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Name of the full-registry payload.
pub const ALL_APPS: &str = "ALL_APPS";

/// Name of the delta payload.
pub const ALL_APPS_DELTA: &str = "ALL_APPS_DELTA";

/// What a cached payload describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Application,
    Vip,
    Svip,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => write!(f, "Application"),
            Self::Vip => write!(f, "VIP"),
            Self::Svip => write!(f, "SVIP"),
        }
    }
}

/// Payload encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    Xml,
}

impl Encoding {
    pub const ALL: [Encoding; 2] = [Self::Json, Self::Xml];
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Xml => write!(f, "xml"),
        }
    }
}

/// Client API version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    pub const ALL: [ApiVersion; 2] = [Self::V1, Self::V2];
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "V1"),
            Self::V2 => write!(f, "V2"),
        }
    }
}

/// Identity of a cached payload.
///
/// Equality and hashing use the canonical string only.
#[derive(Debug, Clone)]
pub struct CacheKey {
    entity_type: EntityType,
    name: String,
    encoding: Encoding,
    api_version: ApiVersion,
    regions: Option<Vec<String>>,
    canonical: String,
}

impl CacheKey {
    pub fn new(
        entity_type: EntityType,
        name: impl Into<String>,
        encoding: Encoding,
        api_version: ApiVersion,
    ) -> Self {
        Self::build(entity_type, name.into(), encoding, api_version, None)
    }

    /// Key for one application.
    pub fn application(name: impl Into<String>, encoding: Encoding, api_version: ApiVersion) -> Self {
        Self::new(EntityType::Application, name, encoding, api_version)
    }

    /// Key for the full registry payload.
    pub fn all_apps(encoding: Encoding, api_version: ApiVersion) -> Self {
        Self::new(EntityType::Application, ALL_APPS, encoding, api_version)
    }

    /// Key for the delta payload.
    pub fn all_apps_delta(encoding: Encoding, api_version: ApiVersion) -> Self {
        Self::new(EntityType::Application, ALL_APPS_DELTA, encoding, api_version)
    }

    pub fn vip(name: impl Into<String>, encoding: Encoding, api_version: ApiVersion) -> Self {
        Self::new(EntityType::Vip, name, encoding, api_version)
    }

    pub fn svip(name: impl Into<String>, encoding: Encoding, api_version: ApiVersion) -> Self {
        Self::new(EntityType::Svip, name, encoding, api_version)
    }

    /// Region-qualified variant of this key. Regions are sorted and deduplicated;
    /// an empty list yields the region-less key.
    pub fn with_regions<I, S>(&self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut regions: Vec<String> = regions.into_iter().map(Into::into).collect();
        regions.sort();
        regions.dedup();
        let regions = if regions.is_empty() { None } else { Some(regions) };
        Self::build(
            self.entity_type,
            self.name.clone(),
            self.encoding,
            self.api_version,
            regions,
        )
    }

    /// The same key without regions.
    pub fn without_regions(&self) -> Self {
        Self::build(
            self.entity_type,
            self.name.clone(),
            self.encoding,
            self.api_version,
            None,
        )
    }

    fn build(
        entity_type: EntityType,
        name: String,
        encoding: Encoding,
        api_version: ApiVersion,
        regions: Option<Vec<String>>,
    ) -> Self {
        let mut canonical = format!("{entity_type}:{name}:{encoding}:{api_version}");
        if let Some(ref regions) = regions {
            canonical.push(':');
            canonical.push_str(&regions.join(","));
        }
        Self {
            entity_type,
            name,
            encoding,
            api_version,
            regions,
            canonical,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    pub fn regions(&self) -> Option<&[String]> {
        self.regions.as_deref()
    }

    pub fn has_regions(&self) -> bool {
        self.regions.is_some()
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_form() {
        let key = CacheKey::application("A", Encoding::Json, ApiVersion::V2);
        assert_eq!(key.canonical(), "Application:A:json:V2");
        let vip = CacheKey::vip("a.vip", Encoding::Xml, ApiVersion::V1);
        assert_eq!(vip.to_string(), "VIP:a.vip:xml:V1");
    }

    #[test]
    fn test_regions_are_normalized() {
        let base = CacheKey::all_apps(Encoding::Json, ApiVersion::V2);
        let a = base.with_regions(["us-west", "eu", "us-west"]);
        let b = base.with_regions(["eu", "us-west"]);
        assert_eq!(a, b);
        assert_eq!(a.canonical(), "Application:ALL_APPS:json:V2:eu,us-west");
        assert_ne!(a, base);
        assert_eq!(a.without_regions(), base);
        assert!(!base.with_regions(Vec::<String>::new()).has_regions());
    }
}
