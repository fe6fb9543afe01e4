//! Parameter bundles for each analytic operation.
//!
//! Bundles are static configuration records. Enum values serialize to the
//! keyword spelling the engine expects, so a bundle can be forwarded to the
//! engine unmodified.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Linear unit of a distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearUnit {
    /// International feet.
    Feet,
    /// Yards.
    Yards,
    /// Statute miles.
    Miles,
    /// Meters.
    Meters,
    /// Kilometers.
    Kilometers,
}

impl LinearUnit {
    fn as_str(self) -> &'static str {
        match self {
            Self::Feet => "feet",
            Self::Yards => "yards",
            Self::Miles => "miles",
            Self::Meters => "meters",
            Self::Kilometers => "kilometers",
        }
    }
}

impl FromStr for LinearUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "feet" | "foot" | "ft" => Ok(Self::Feet),
            "yards" | "yard" | "yd" => Ok(Self::Yards),
            "miles" | "mile" | "mi" => Ok(Self::Miles),
            "meters" | "meter" | "m" => Ok(Self::Meters),
            "kilometers" | "kilometer" | "km" => Ok(Self::Kilometers),
            other => Err(format!("unknown linear unit '{other}'")),
        }
    }
}

/// A distance with its unit, written as `"30 feet"` in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LinearDistance {
    /// Magnitude; must be finite and non-negative.
    pub value: f64,
    /// Unit of `value`.
    pub unit: LinearUnit,
}

impl LinearDistance {
    /// Creates a distance.
    #[must_use]
    pub fn new(value: f64, unit: LinearUnit) -> Self {
        Self { value, unit }
    }

    /// Creates a distance in feet.
    #[must_use]
    pub fn feet(value: f64) -> Self {
        Self::new(value, LinearUnit::Feet)
    }
}

impl fmt::Display for LinearDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.as_str())
    }
}

impl FromStr for LinearDistance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(value), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("expected '<value> <unit>', got '{s}'"));
        };
        let value: f64 = value
            .parse()
            .map_err(|_| format!("invalid distance value '{value}'"))?;
        if !value.is_finite() || value < 0.0 {
            return Err(format!("distance must be finite and non-negative, got {value}"));
        }
        Ok(Self::new(value, unit.parse()?))
    }
}

impl TryFrom<String> for LinearDistance {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LinearDistance> for String {
    fn from(value: LinearDistance) -> Self {
        value.to_string()
    }
}

/// Conceptualization of spatial relationships between features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpatialRelation {
    /// Neighbors inside the threshold weigh 1, others 0.
    FixedDistanceBand,
    /// Influence decays with distance.
    InverseDistance,
    /// Influence decays with squared distance.
    InverseDistanceSquared,
    /// Fixed band, then inverse distance beyond it.
    ZoneOfIndifference,
    /// Polygons sharing an edge.
    ContiguityEdgesOnly,
    /// Polygons sharing an edge or a corner.
    ContiguityEdgesCorners,
}

/// How distances between features are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistanceMethod {
    /// Straight-line distance.
    EuclideanDistance,
    /// City-block distance.
    ManhattanDistance,
}

/// Spatial weight standardization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Standardization {
    /// Raw weights.
    None,
    /// Each feature's weights sum to one.
    Row,
}

/// Whether the autocorrelation test writes a graphical report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportMode {
    /// Statistics only.
    NoReport,
    /// Statistics plus a report file.
    GenerateReport,
}

/// Surface interpolation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterpolationMethod {
    /// Inverse distance weighted.
    #[serde(rename = "IDW")]
    InverseDistanceWeighted,
}

/// GWR kernel shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelType {
    /// Same bandwidth everywhere.
    Fixed,
    /// Bandwidth adapts to local feature density.
    Adaptive,
}

/// GWR bandwidth selection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandwidthMethod {
    /// Corrected Akaike information criterion.
    #[serde(rename = "AICc")]
    Aicc,
    /// Cross validation.
    #[serde(rename = "CV")]
    CrossValidation,
    /// User-supplied distance or neighbor count.
    #[serde(rename = "BANDWIDTH_PARAMETER")]
    BandwidthParameter,
}

/// Parameters of the spatial integration stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrateParams {
    /// Features closer than this are snapped together.
    pub tolerance: LinearDistance,
}

impl Default for IntegrateParams {
    fn default() -> Self {
        Self {
            tolerance: LinearDistance::feet(30.0),
        }
    }
}

/// Parameters of the event aggregation stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateParams {
    /// Count field the engine is expected to add.
    pub count_field: String,
}

impl Default for AggregateParams {
    fn default() -> Self {
        Self {
            count_field: "ICOUNT".to_string(),
        }
    }
}

/// Parameters of the hotspot classification stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotParams {
    /// Field holding the analysed value (the aggregated count).
    pub input_field: String,
    /// Neighborhood conceptualization.
    pub spatial_relation: SpatialRelation,
    /// Distance measure.
    pub distance_method: DistanceMethod,
    /// Weight standardization.
    pub standardization: Standardization,
    /// Neighborhood threshold, in dataset units.
    pub distance_threshold: f64,
}

impl Default for HotspotParams {
    fn default() -> Self {
        Self {
            input_field: "ICOUNT".to_string(),
            spatial_relation: SpatialRelation::FixedDistanceBand,
            distance_method: DistanceMethod::EuclideanDistance,
            standardization: Standardization::None,
            distance_threshold: 1400.0,
        }
    }
}

/// Parameters of the visualization interpolation stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolateParams {
    /// Field holding the value to interpolate.
    pub value_field: String,
    /// Interpolation method.
    pub method: InterpolationMethod,
}

impl Default for InterpolateParams {
    fn default() -> Self {
        Self {
            value_field: "GiZScore".to_string(),
            method: InterpolationMethod::InverseDistanceWeighted,
        }
    }
}

fn default_dependent_field() -> String {
    "Calls".to_string()
}

fn default_explanatory_fields() -> Vec<String> {
    ["Pop", "Jobs", "LowEduc", "Dst2UrbCen"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Parameters of the global regression stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OlsParams {
    /// Unique feature id field.
    pub unique_id_field: String,
    /// Dependent variable.
    pub dependent_field: String,
    /// Explanatory variables, in model order.
    pub explanatory_fields: Vec<String>,
}

impl Default for OlsParams {
    fn default() -> Self {
        Self {
            unique_id_field: "UniqID".to_string(),
            dependent_field: default_dependent_field(),
            explanatory_fields: default_explanatory_fields(),
        }
    }
}

/// Parameters of the residual autocorrelation test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutocorrelationParams {
    /// Field tested for clustering (standardized residuals).
    pub input_field: String,
    /// Report generation.
    pub report_mode: ReportMode,
    /// Neighbor weighting conceptualization.
    pub conceptualization: SpatialRelation,
    /// Distance measure.
    pub distance_method: DistanceMethod,
    /// Weight standardization.
    pub standardization: Standardization,
}

impl Default for AutocorrelationParams {
    fn default() -> Self {
        Self {
            input_field: "StdResid".to_string(),
            report_mode: ReportMode::GenerateReport,
            conceptualization: SpatialRelation::InverseDistance,
            distance_method: DistanceMethod::EuclideanDistance,
            standardization: Standardization::Row,
        }
    }
}

/// Parameters of the geographically weighted regression stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GwrParams {
    /// Dependent variable.
    pub dependent_field: String,
    /// Explanatory variables, in model order.
    pub explanatory_fields: Vec<String>,
    /// Kernel shape.
    pub kernel: KernelType,
    /// Bandwidth selection.
    pub bandwidth: BandwidthMethod,
}

impl Default for GwrParams {
    fn default() -> Self {
        Self {
            dependent_field: default_dependent_field(),
            explanatory_fields: default_explanatory_fields(),
            kernel: KernelType::Adaptive,
            bandwidth: BandwidthMethod::Aicc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_linear_distance_parse() {
        let d: LinearDistance = "30 feet".parse().unwrap();
        assert_eq!(d, LinearDistance::feet(30.0));
        assert_eq!(d.to_string(), "30 feet");

        let km: LinearDistance = "1.5 KM".parse().unwrap();
        assert_eq!(km.unit, LinearUnit::Kilometers);

        assert!("30".parse::<LinearDistance>().is_err());
        assert!("thirty feet".parse::<LinearDistance>().is_err());
        assert!("-1 feet".parse::<LinearDistance>().is_err());
        assert!("30 parsecs".parse::<LinearDistance>().is_err());
    }

    #[test]
    fn test_engine_keywords() {
        assert_eq!(
            serde_json::to_value(SpatialRelation::FixedDistanceBand).unwrap(),
            serde_json::json!("FIXED_DISTANCE_BAND")
        );
        assert_eq!(
            serde_json::to_value(DistanceMethod::EuclideanDistance).unwrap(),
            serde_json::json!("EUCLIDEAN_DISTANCE")
        );
        assert_eq!(serde_json::to_value(Standardization::Row).unwrap(), serde_json::json!("ROW"));
        assert_eq!(
            serde_json::to_value(InterpolationMethod::InverseDistanceWeighted).unwrap(),
            serde_json::json!("IDW")
        );
        assert_eq!(serde_json::to_value(BandwidthMethod::Aicc).unwrap(), serde_json::json!("AICc"));
        assert_eq!(serde_json::to_value(KernelType::Adaptive).unwrap(), serde_json::json!("ADAPTIVE"));
    }

    #[test]
    fn test_reference_defaults() {
        let hotspot = HotspotParams::default();
        assert_eq!(hotspot.input_field, "ICOUNT");
        assert_eq!(hotspot.distance_threshold, 1400.0);
        assert_eq!(hotspot.standardization, Standardization::None);

        let ols = OlsParams::default();
        assert_eq!(ols.explanatory_fields, ["Pop", "Jobs", "LowEduc", "Dst2UrbCen"]);
        assert_eq!(ols.explanatory_fields, GwrParams::default().explanatory_fields);
    }

    #[test]
    fn test_tolerance_serde_roundtrip_as_string() {
        let params = IntegrateParams::default();
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, serde_json::json!({"tolerance": "30 feet"}));
    }
}
