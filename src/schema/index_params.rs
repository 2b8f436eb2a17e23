//! Vector index declarations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::vector::hnsw::HnswConfig;

/// Index structure requested for the vector field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// Let the engine pick exact or graph search by collection size.
    #[serde(rename = "AUTOINDEX")]
    AutoIndex,
    /// Exact brute-force scan.
    #[serde(rename = "FLAT")]
    Flat,
    /// Hierarchical navigable small-world graph.
    #[serde(rename = "HNSW")]
    Hnsw,
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexType::AutoIndex => "AUTOINDEX",
            IndexType::Flat => "FLAT",
            IndexType::Hnsw => "HNSW",
        })
    }
}

impl FromStr for IndexType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AUTOINDEX" => Ok(IndexType::AutoIndex),
            "FLAT" => Ok(IndexType::Flat),
            "HNSW" => Ok(IndexType::Hnsw),
            other => Err(SchemaError::invalid_field(other, "unknown index type")),
        }
    }
}

/// Distance function used for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    /// `1 - cos(a, b)`; lower is closer.
    #[serde(rename = "COSINE")]
    Cosine,
    /// Euclidean distance; lower is closer.
    #[serde(rename = "L2")]
    L2,
    /// Inner product; higher is closer.
    #[serde(rename = "IP")]
    Ip,
}

impl MetricType {
    /// Whether a larger score ranks first.
    pub fn higher_is_better(&self) -> bool {
        matches!(self, MetricType::Ip)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricType::Cosine => "COSINE",
            MetricType::L2 => "L2",
            MetricType::Ip => "IP",
        })
    }
}

impl FromStr for MetricType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COSINE" => Ok(MetricType::Cosine),
            "L2" => Ok(MetricType::L2),
            "IP" => Ok(MetricType::Ip),
            other => Err(SchemaError::invalid_field(other, "unknown metric type")),
        }
    }
}

/// Optional graph tuning; unset values fall back to the engine configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBuildParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ef_construction: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ef_search: Option<usize>,
}

impl IndexBuildParams {
    /// Overlay these params on `base`.
    pub fn resolve(&self, base: &HnswConfig) -> HnswConfig {
        let mut config = base.clone();
        if let Some(m) = self.m {
            config = config.with_m(m);
        }
        if let Some(ef) = self.ef_construction {
            config.ef_construction = ef;
        }
        if let Some(ef) = self.ef_search {
            config.ef_search = ef;
        }
        config
    }
}

/// Index declaration for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    pub field_name: String,
    pub index_type: IndexType,
    pub metric_type: MetricType,
    #[serde(default)]
    pub params: IndexBuildParams,
}

/// Collects index declarations before a collection is created.
///
/// ```
/// use quiver::schema::{IndexParamsBuilder, IndexType, MetricType};
///
/// let mut index_params = IndexParamsBuilder::new();
/// index_params.add_index("content_dense", IndexType::AutoIndex, MetricType::Cosine);
/// assert_eq!(index_params.indexes().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParamsBuilder {
    indexes: Vec<IndexParams>,
}

impl IndexParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_index(
        &mut self,
        field_name: impl Into<String>,
        index_type: IndexType,
        metric_type: MetricType,
    ) -> &mut Self {
        self.add_index_with_params(field_name, index_type, metric_type, IndexBuildParams::default())
    }

    pub fn add_index_with_params(
        &mut self,
        field_name: impl Into<String>,
        index_type: IndexType,
        metric_type: MetricType,
        params: IndexBuildParams,
    ) -> &mut Self {
        self.indexes.push(IndexParams {
            field_name: field_name.into(),
            index_type,
            metric_type,
            params,
        });
        self
    }

    pub fn indexes(&self) -> &[IndexParams] {
        &self.indexes
    }
}

impl From<IndexParams> for IndexParamsBuilder {
    fn from(params: IndexParams) -> Self {
        IndexParamsBuilder {
            indexes: vec![params],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("autoindex".parse::<IndexType>().unwrap(), IndexType::AutoIndex);
        assert_eq!("Cosine".parse::<MetricType>().unwrap(), MetricType::Cosine);
        assert!("IVF_FLAT".parse::<IndexType>().is_err());
        assert_eq!(MetricType::Ip.to_string(), "IP");
    }

    #[test]
    fn test_build_params_overlay() {
        let base = HnswConfig::default();
        let params = IndexBuildParams {
            m: Some(8),
            ef_construction: None,
            ef_search: Some(99),
        };
        let resolved = params.resolve(&base);
        assert_eq!(resolved.m, 8);
        assert_eq!(resolved.m_max0, 16);
        assert_eq!(resolved.ef_construction, base.ef_construction);
        assert_eq!(resolved.ef_search, 99);
    }

    #[test]
    fn test_index_params_json() {
        let params: IndexParams = serde_json::from_str(
            r#"{"field_name": "v", "index_type": "HNSW", "metric_type": "L2"}"#,
        )
        .unwrap();
        assert_eq!(params.index_type, IndexType::Hnsw);
        assert_eq!(params.params, IndexBuildParams::default());
    }
}
