//! Request model
//!
//! Structured descriptions of the work clients submit. A [`QueryRequest`]
//! carries the semantic fields that define a query (and therefore its
//! fingerprint) next to a [`RequestContext`] describing where it came from
//! and where it should run. Only the semantic fields take part in
//! fingerprinting and compilation.
//!
//! Wire format is camelCase JSON. Enum fields travel as their numeric codes.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Compilation Target
// ============================================================================

/// Query language a request compiles to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CompilationTarget {
    /// Multidimensional expressions
    #[default]
    Mdx,
    /// Data analysis expressions (declared, not compiled)
    Dax,
}

impl CompilationTarget {
    /// Name used inside fingerprint canonical strings
    pub fn name(&self) -> &'static str {
        match self {
            CompilationTarget::Mdx => "MDX",
            CompilationTarget::Dax => "DAX",
        }
    }
}

impl fmt::Display for CompilationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<CompilationTarget> for u8 {
    fn from(target: CompilationTarget) -> Self {
        match target {
            CompilationTarget::Mdx => 0,
            CompilationTarget::Dax => 1,
        }
    }
}

impl TryFrom<u8> for CompilationTarget {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(CompilationTarget::Mdx),
            1 => Ok(CompilationTarget::Dax),
            _ => Err(format!("unknown compilation target: {}", code)),
        }
    }
}

impl std::str::FromStr for CompilationTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mdx" => Ok(CompilationTarget::Mdx),
            "dax" => Ok(CompilationTarget::Dax),
            _ => Err(format!("unknown compilation target: {}", s)),
        }
    }
}

// ============================================================================
// Output Format
// ============================================================================

/// Shape a materialized result is delivered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OutputFormat {
    /// Array of row objects, cells in native type
    #[default]
    Table,
    /// Column name to list of stringified values
    Dictionary,
    /// Key/value pairs from the first two columns
    KeyValueArray,
    /// Header row followed by stringified rows
    TwoDimensionalArray,
    /// Wide table rebuilt from (key, label, value) triples
    SimpleUnpivotedTable,
}

impl OutputFormat {
    /// All formats in wire-code order
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Table,
        OutputFormat::Dictionary,
        OutputFormat::KeyValueArray,
        OutputFormat::TwoDimensionalArray,
        OutputFormat::SimpleUnpivotedTable,
    ];

    /// Numeric wire code
    pub fn code(&self) -> u8 {
        (*self).into()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Dictionary => write!(f, "dictionary"),
            OutputFormat::KeyValueArray => write!(f, "key-value-array"),
            OutputFormat::TwoDimensionalArray => write!(f, "two-dimensional-array"),
            OutputFormat::SimpleUnpivotedTable => write!(f, "simple-unpivoted-table"),
        }
    }
}

impl From<OutputFormat> for u8 {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Table => 0,
            OutputFormat::Dictionary => 1,
            OutputFormat::KeyValueArray => 2,
            OutputFormat::TwoDimensionalArray => 3,
            OutputFormat::SimpleUnpivotedTable => 4,
        }
    }
}

impl TryFrom<u8> for OutputFormat {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        OutputFormat::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| format!("unknown output format: {}", code))
    }
}

// ============================================================================
// Request Context
// ============================================================================

/// Transport identity of a request
///
/// Describes the client connection and the target server. None of these
/// fields are semantic: two requests that differ only here share a
/// fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestContext {
    /// Client connection identifier issued by the push channel
    pub unique_client_identifier: Option<String>,
    /// Region of the target server
    pub region: Option<String>,
    /// Target database
    pub target_database: Option<String>,
    /// Target server
    pub target_server: Option<String>,
    /// Resource group of the target server
    pub resource_group: Option<String>,
    /// Hash identifying the executing host
    #[serde(rename = "jobExecutorSHA")]
    pub job_executor_sha: Option<String>,
    /// Opaque client data echoed back with the result
    pub request_metadata: Option<String>,
}

impl RequestContext {
    /// Fully qualified, lowercased `{region}.{resource_group}.{server}`
    ///
    /// `None` when no target server is set.
    pub fn server_qualified_name(&self) -> Option<String> {
        let server = self.target_server.as_deref()?;
        Some(
            format!(
                "{}.{}.{}",
                self.region.as_deref().unwrap_or_default(),
                self.resource_group.as_deref().unwrap_or_default(),
                server
            )
            .to_lowercase(),
        )
    }
}

// ============================================================================
// Query Request
// ============================================================================

/// A request to execute an analytical query against a model
///
/// Array fields are optional so that "absent" survives deserialization;
/// `values` being absent is an error for compilation and fingerprinting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    /// Subselect filters, one axis each
    #[serde(rename = "queryFilters")]
    pub filters: Option<Vec<String>>,
    /// Row-axis slices
    #[serde(rename = "querySlices")]
    pub slices: Option<Vec<String>>,
    /// Measures on the column axis
    #[serde(rename = "queryValues")]
    pub values: Option<Vec<String>>,
    /// Named sets defined in the `with` block
    pub custom_sets: Option<Vec<String>>,
    /// Calculated members defined in the `with` block
    pub custom_members: Option<Vec<String>>,
    /// Measure used to drop empty slice tuples
    pub default_measure: Option<String>,
    /// Target model (cube) name
    pub model_name: Option<String>,
    /// Query language
    pub compilation_target: CompilationTarget,
    /// Result shape
    pub output_format: OutputFormat,
    /// Transport identity
    #[serde(flatten)]
    pub context: RequestContext,
}

impl QueryRequest {
    /// Start a request for a model with the given measures
    pub fn new(model_name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            values: Some(values),
            model_name: Some(model_name.into()),
            ..Default::default()
        }
    }

    /// Set subselect filters
    pub fn with_filters(mut self, filters: Vec<String>) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Set row-axis slices
    pub fn with_slices(mut self, slices: Vec<String>) -> Self {
        self.slices = Some(slices);
        self
    }

    /// Set custom sets
    pub fn with_custom_sets(mut self, sets: Vec<String>) -> Self {
        self.custom_sets = Some(sets);
        self
    }

    /// Set custom members
    pub fn with_custom_members(mut self, members: Vec<String>) -> Self {
        self.custom_members = Some(members);
        self
    }

    /// Set the non-empty measure
    pub fn with_default_measure(mut self, measure: impl Into<String>) -> Self {
        self.default_measure = Some(measure.into());
        self
    }

    /// Set the compilation target
    pub fn with_target(mut self, target: CompilationTarget) -> Self {
        self.compilation_target = target;
        self
    }

    /// Set the output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Set the transport context
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

// ============================================================================
// Auxiliary Requests
// ============================================================================

/// A request to bring a model server online
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchRequest {
    /// Transport identity
    #[serde(flatten)]
    pub context: RequestContext,
}

/// A request for a model's dimension and measure metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataRequest {
    /// Transport identity
    #[serde(flatten)]
    pub context: RequestContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_codes() {
        assert_eq!(OutputFormat::Table.code(), 0);
        assert_eq!(OutputFormat::SimpleUnpivotedTable.code(), 4);
        assert_eq!(OutputFormat::try_from(3).unwrap(), OutputFormat::TwoDimensionalArray);
        assert!(OutputFormat::try_from(5).is_err());
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("mdx".parse::<CompilationTarget>().unwrap(), CompilationTarget::Mdx);
        assert_eq!("DAX".parse::<CompilationTarget>().unwrap(), CompilationTarget::Dax);
        assert!("sql".parse::<CompilationTarget>().is_err());
    }

    #[test]
    fn test_deserialize_wire_request() {
        let json = r#"{
            "queryFilters": ["[Product].[Product].&[Apple]"],
            "queryValues": ["[Measures].[Sales Amount]"],
            "modelName": "test-model",
            "compilationTarget": 0,
            "outputFormat": 2,
            "uniqueClientIdentifier": "test-id",
            "region": "West-Europe",
            "resourceGroup": "RG",
            "targetServer": "Srv"
        }"#;

        let request: QueryRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.filters.as_ref().unwrap().len(), 1);
        assert!(request.slices.is_none());
        assert_eq!(request.output_format, OutputFormat::KeyValueArray);
        assert_eq!(request.context.unique_client_identifier.as_deref(), Some("test-id"));
        assert_eq!(
            request.context.server_qualified_name().as_deref(),
            Some("west-europe.rg.srv")
        );
    }

    #[test]
    fn test_server_qualified_name_requires_server() {
        let context = RequestContext {
            region: Some("eu".to_string()),
            ..Default::default()
        };
        assert!(context.server_qualified_name().is_none());
    }

    #[test]
    fn test_builder() {
        let request = QueryRequest::new("cube", vec!["[Measures].[A]".to_string()])
            .with_slices(vec!["[Date].[Year].[All].children".to_string()])
            .with_default_measure("[Measures].[B]")
            .with_format(OutputFormat::Dictionary);

        assert_eq!(request.model_name.as_deref(), Some("cube"));
        assert_eq!(request.default_measure.as_deref(), Some("[Measures].[B]"));
        assert_eq!(request.output_format, OutputFormat::Dictionary);
    }
}
