//! Per-query configuration.
//!
//! A [`QueryGenerationContext`] bundles everything a translation consults: the member
//! name resolver, the method-call translator and converter registries, the type
//! serializer, the target cluster version and the query options. It is immutable for
//! the duration of a translation and cheap to clone.
//!
//! # Example
//!
//! ```ignore
//! let context = QueryGenerationContext::builder()
//!     .cluster_version(ClusterVersion::new(6, 5, 0))
//!     .naming(NamingStrategy::CamelCase)
//!     .include_metadata(true)
//!     .build();
//! ```

use serde::Deserialize;
use std::{fmt, str::FromStr, sync::Arc};

use crate::{
    convert::ConverterRegistry,
    error::N1qlError,
    naming::{
        AttributeNameResolver, DateTimeFormat, JsonTypeSerializer, MemberNameResolver,
        NamingStrategy, SerializerNameResolver, TypeSerializer,
    },
    translators::MethodCallTranslatorRegistry,
};

/// A semantic version of the target cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ClusterVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Returns true if this version is at least `feature`.
    pub fn supports(&self, feature: ClusterVersion) -> bool {
        *self >= feature
    }
}

impl Default for ClusterVersion {
    /// The oldest version with N1QL support.
    fn default() -> Self {
        Self::new(4, 0, 0)
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ClusterVersion {
    type Err = N1qlError;

    /// Parses `major.minor[.patch]`, ignoring any build suffix (`6.5.1-6299`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || N1qlError::InvalidShape(format!("invalid cluster version {s:?}"));
        let core = s.split(['-', ' ']).next().unwrap_or_default();
        let mut parts = core.split('.').map(|part| part.parse::<u32>().map_err(|_| invalid()));

        let major = parts.next().ok_or_else(invalid)??;
        let minor = parts.next().ok_or_else(invalid)??;
        let patch = parts.next().transpose()?.unwrap_or(0);

        Ok(Self::new(major, minor, patch))
    }
}

impl<'de> Deserialize<'de> for ClusterVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Cluster versions that gate query features.
pub struct FeatureVersions;

impl FeatureVersions {
    /// `JOIN ... ON KEY ... FOR ...`
    pub const INDEX_JOIN: ClusterVersion = ClusterVersion::new(4, 5, 0);
    /// `JOIN ... ON (predicate)`, ANSI nests and hash join hints.
    pub const ANSI_JOIN: ClusterVersion = ClusterVersion::new(5, 5, 0);
}

/// The consistency requested from the query service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanConsistency {
    #[default]
    NotBounded,
    RequestPlus,
    StatementPlus,
}

impl ScanConsistency {
    /// The value of the `scan_consistency` request parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanConsistency::NotBounded => "not_bounded",
            ScanConsistency::RequestPlus => "request_plus",
            ScanConsistency::StatementPlus => "statement_plus",
        }
    }
}

/// Bucket-level settings, loadable from configuration files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub bucket_name: String,
    /// Overrides the version reported by the backend.
    pub cluster_version: Option<ClusterVersion>,
    pub scan_consistency: ScanConsistency,
    pub include_metadata: bool,
    pub naming: NamingStrategy,
    pub date_format: DateTimeFormat,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            bucket_name: "default".to_string(),
            cluster_version: None,
            scan_consistency: ScanConsistency::default(),
            include_metadata: false,
            naming: NamingStrategy::default(),
            date_format: DateTimeFormat::default(),
        }
    }
}

/// Configuration for one query translation.
#[derive(Debug, Clone)]
pub struct QueryGenerationContext {
    pub name_resolver: Arc<dyn MemberNameResolver>,
    pub method_translators: Arc<MethodCallTranslatorRegistry>,
    pub converters: Arc<ConverterRegistry>,
    pub serializer: Arc<dyn TypeSerializer>,
    pub cluster_version: ClusterVersion,
    pub scan_consistency: ScanConsistency,
    /// Adds `META(extent) as __metadata` to whole-document projections.
    pub include_metadata: bool,
}

impl QueryGenerationContext {
    pub fn builder() -> QueryGenerationContextBuilder {
        QueryGenerationContextBuilder::default()
    }

    /// Builds a context from bucket configuration and the cluster version the
    /// backend reported; a configured version takes precedence.
    pub fn from_config(config: &BucketConfig, reported_version: ClusterVersion) -> Self {
        Self::builder()
            .cluster_version(config.cluster_version.unwrap_or(reported_version))
            .scan_consistency(config.scan_consistency)
            .include_metadata(config.include_metadata)
            .serializer(Arc::new(
                JsonTypeSerializer::new()
                    .with_naming(config.naming)
                    .with_date_format(config.date_format),
            ))
            .build()
    }

    /// Returns true if the target cluster supports the feature gated by `version`.
    pub fn supports(&self, version: ClusterVersion) -> bool {
        self.cluster_version.supports(version)
    }
}

impl Default for QueryGenerationContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`QueryGenerationContext`].
#[derive(Debug, Default)]
pub struct QueryGenerationContextBuilder {
    name_resolver: Option<Arc<dyn MemberNameResolver>>,
    method_translators: Option<Arc<MethodCallTranslatorRegistry>>,
    converters: Option<Arc<ConverterRegistry>>,
    serializer: Option<Arc<dyn TypeSerializer>>,
    naming: Option<NamingStrategy>,
    cluster_version: ClusterVersion,
    scan_consistency: ScanConsistency,
    include_metadata: bool,
}

impl QueryGenerationContextBuilder {
    /// Uses an explicit member name resolver instead of the serializer's.
    pub fn name_resolver(mut self, resolver: Arc<dyn MemberNameResolver>) -> Self {
        self.name_resolver = Some(resolver);
        self
    }

    /// Resolves names by attribute and naming strategy.
    pub fn naming(mut self, naming: NamingStrategy) -> Self {
        self.naming = Some(naming);
        self
    }

    pub fn method_translators(mut self, registry: Arc<MethodCallTranslatorRegistry>) -> Self {
        self.method_translators = Some(registry);
        self
    }

    pub fn converters(mut self, registry: Arc<ConverterRegistry>) -> Self {
        self.converters = Some(registry);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn TypeSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn cluster_version(mut self, version: ClusterVersion) -> Self {
        self.cluster_version = version;
        self
    }

    pub fn scan_consistency(mut self, consistency: ScanConsistency) -> Self {
        self.scan_consistency = consistency;
        self
    }

    pub fn include_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    pub fn build(self) -> QueryGenerationContext {
        let serializer = self
            .serializer
            .unwrap_or_else(|| Arc::new(JsonTypeSerializer::new()));

        let name_resolver: Arc<dyn MemberNameResolver> = match (self.name_resolver, self.naming) {
            (Some(resolver), _) => resolver,
            (None, Some(naming)) => Arc::new(AttributeNameResolver::new(naming)),
            (None, None) => Arc::new(SerializerNameResolver::new(serializer.clone())),
        };

        QueryGenerationContext {
            name_resolver,
            method_translators: self
                .method_translators
                .unwrap_or_else(MethodCallTranslatorRegistry::global),
            converters: self.converters.unwrap_or_else(ConverterRegistry::global),
            serializer,
            cluster_version: self.cluster_version,
            scan_consistency: self.scan_consistency,
            include_metadata: self.include_metadata,
        }
    }
}
