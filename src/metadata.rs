//! Model metadata
//!
//! Dimension, attribute, member and measure descriptions of a tabular
//! model, with the MDX code names clients paste into query requests:
//!
//! | Object        | Code name                                    |
//! |---------------|----------------------------------------------|
//! | dimension     | `[Product]`                                  |
//! | attribute     | `[Product].[Color]`                          |
//! | all members   | `[Product].[Color].[All].children`           |
//! | unique member | `[Product].[Color].currentmember.uniquename` |
//! | measure       | `[Measures].[Sales Amount]`                  |
//!
//! The tree is built once and read-only afterwards, so it lives in flat
//! arenas. Children are referenced by id and every child keeps the id of its
//! parent. Serialized output lists children by id and omits parent ids.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Index of a dimension in [`ModelMetadata::dimensions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DimensionId(usize);

/// Index of an attribute in [`ModelMetadata::attributes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AttributeId(usize);

/// Index of a member in [`ModelMetadata::members`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MemberId(usize);

// ============================================================================
// Source Description
// ============================================================================

/// A column as reported by the model server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescription {
    /// Column name
    pub name: String,
    /// Hidden columns are not exposed
    #[serde(default)]
    pub is_hidden: bool,
}

/// A table as reported by the model server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescription {
    /// Table name
    pub name: String,
    /// Hidden tables contribute no dimension
    #[serde(default)]
    pub is_hidden: bool,
    /// Columns in model order
    #[serde(default)]
    pub columns: Vec<ColumnDescription>,
    /// Names of measures defined on the table
    #[serde(default)]
    pub measures: Vec<String>,
}

impl TableDescription {
    /// Visible table with visible columns
    pub fn new<S: Into<String>>(name: impl Into<String>, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            is_hidden: false,
            columns: columns
                .into_iter()
                .map(|c| ColumnDescription {
                    name: c.into(),
                    is_hidden: false,
                })
                .collect(),
            measures: Vec::new(),
        }
    }

    /// Mark the table hidden
    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }

    /// Add a hidden column
    pub fn with_hidden_column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(ColumnDescription {
            name: name.into(),
            is_hidden: true,
        });
        self
    }

    /// Add measures
    pub fn with_measures<S: Into<String>>(mut self, measures: impl IntoIterator<Item = S>) -> Self {
        self.measures.extend(measures.into_iter().map(Into::into));
        self
    }
}

// ============================================================================
// Arena Records
// ============================================================================

/// Model dimension, one per visible table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    /// Dimension name
    pub name: String,
    /// `[name]`
    pub code_name: String,
    /// Attributes in column order
    pub attributes: Vec<AttributeId>,
}

/// Dimension attribute, one per visible column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// `{dimension}.[name]`
    pub code_name: String,
    /// `{code_name}.[All].children`
    pub all_members_code_name: String,
    /// `{code_name}.currentmember.uniquename`
    pub unique_member_code_name: String,
    /// Known members
    pub members: Vec<MemberId>,
    /// Owning dimension
    #[serde(skip)]
    pub dimension: DimensionId,
}

/// Attribute member with a server-provided code name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Member caption
    pub name: String,
    /// Unique name as reported by the server
    pub code_name: String,
    /// Owning attribute
    #[serde(skip)]
    pub attribute: AttributeId,
}

/// Model measure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    /// Measure name
    pub name: String,
    /// `[Measures].[name]`
    pub code_name: String,
}

// ============================================================================
// Model Metadata
// ============================================================================

/// Read-only metadata tree of one model
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    /// Model name
    pub model_name: String,
    /// Import time
    pub last_updated: DateTime<Utc>,
    dimensions: Vec<Dimension>,
    attributes: Vec<Attribute>,
    members: Vec<Member>,
    measures: Vec<Measure>,
}

impl ModelMetadata {
    /// Import dimensions and measures from table descriptions
    ///
    /// Hidden tables and hidden columns are skipped for dimensions. Measures
    /// are collected from every table, hidden ones included.
    pub fn from_tables(model_name: impl Into<String>, tables: &[TableDescription]) -> Self {
        let mut metadata = Self {
            model_name: model_name.into(),
            last_updated: Utc::now(),
            dimensions: Vec::new(),
            attributes: Vec::new(),
            members: Vec::new(),
            measures: Vec::new(),
        };

        for table in tables.iter().filter(|t| !t.is_hidden) {
            let dimension_id = DimensionId(metadata.dimensions.len());
            let dimension_code = format!("[{}]", table.name);

            let mut attribute_ids = Vec::new();
            for column in table.columns.iter().filter(|c| !c.is_hidden) {
                let code_name = format!("{}.[{}]", dimension_code, column.name);
                attribute_ids.push(AttributeId(metadata.attributes.len()));
                metadata.attributes.push(Attribute {
                    name: column.name.clone(),
                    all_members_code_name: format!("{}.[All].children", code_name),
                    unique_member_code_name: format!("{}.currentmember.uniquename", code_name),
                    code_name,
                    members: Vec::new(),
                    dimension: dimension_id,
                });
            }

            metadata.dimensions.push(Dimension {
                name: table.name.clone(),
                code_name: dimension_code,
                attributes: attribute_ids,
            });
        }

        metadata.measures = tables
            .iter()
            .flat_map(|t| t.measures.iter())
            .map(|name| Measure {
                name: name.clone(),
                code_name: format!("[Measures].[{}]", name),
            })
            .collect();

        metadata
    }

    /// Register a member under an attribute
    pub fn add_member(
        &mut self,
        attribute: AttributeId,
        name: impl Into<String>,
        code_name: impl Into<String>,
    ) -> Result<MemberId> {
        let id = MemberId(self.members.len());
        let owner = self
            .attributes
            .get_mut(attribute.0)
            .ok_or_else(|| Error::Validation(format!("unknown attribute id {}", attribute.0)))?;

        owner.members.push(id);
        self.members.push(Member {
            name: name.into(),
            code_name: code_name.into(),
            attribute,
        });
        Ok(id)
    }

    /// Dimensions in import order
    pub fn dimensions(&self) -> impl Iterator<Item = (DimensionId, &Dimension)> {
        self.dimensions
            .iter()
            .enumerate()
            .map(|(i, d)| (DimensionId(i), d))
    }

    /// Measures in import order
    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    /// Look up a dimension
    pub fn dimension(&self, id: DimensionId) -> Option<&Dimension> {
        self.dimensions.get(id.0)
    }

    /// Look up an attribute
    pub fn attribute(&self, id: AttributeId) -> Option<&Attribute> {
        self.attributes.get(id.0)
    }

    /// Look up a member
    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.get(id.0)
    }

    /// Attributes of a dimension
    pub fn attributes_of(&self, id: DimensionId) -> impl Iterator<Item = &Attribute> {
        self.dimension(id)
            .into_iter()
            .flat_map(|d| d.attributes.iter())
            .filter_map(|a| self.attribute(*a))
    }

    /// Owning dimension of an attribute
    pub fn parent_dimension(&self, id: AttributeId) -> Option<&Dimension> {
        self.attribute(id).and_then(|a| self.dimension(a.dimension))
    }

    /// Owning attribute of a member
    pub fn parent_attribute(&self, id: MemberId) -> Option<&Attribute> {
        self.member(id).and_then(|m| self.attribute(m.attribute))
    }

    /// Find an attribute by dimension and attribute name
    pub fn find_attribute(&self, dimension: &str, attribute: &str) -> Option<AttributeId> {
        let dimension = self.dimensions.iter().find(|d| d.name == dimension)?;
        dimension
            .attributes
            .iter()
            .copied()
            .find(|id| self.attribute(*id).is_some_and(|a| a.name == attribute))
    }

    /// Serialize for the metadata channel
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModelMetadata {
        ModelMetadata::from_tables(
            "sales",
            &[
                TableDescription::new("Product", ["Product", "Color"])
                    .with_hidden_column("ProductKey"),
                TableDescription::new("Date", ["Year"]),
                TableDescription::new("Sales", Vec::<String>::new())
                    .hidden()
                    .with_measures(["Sales Amount", "Sales Count"]),
            ],
        )
    }

    #[test]
    fn test_hidden_objects_skipped() {
        let metadata = sample();
        let names: Vec<&str> = metadata.dimensions().map(|(_, d)| d.name.as_str()).collect();
        assert_eq!(names, vec!["Product", "Date"]);

        let (product, _) = metadata.dimensions().next().unwrap();
        let attributes: Vec<&str> = metadata
            .attributes_of(product)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(attributes, vec!["Product", "Color"]);
    }

    #[test]
    fn test_measures_from_hidden_tables() {
        let metadata = sample();
        let measures: Vec<&str> = metadata.measures().iter().map(|m| m.code_name.as_str()).collect();
        assert_eq!(
            measures,
            vec!["[Measures].[Sales Amount]", "[Measures].[Sales Count]"]
        );
    }

    #[test]
    fn test_code_names() {
        let metadata = sample();
        let color = metadata.find_attribute("Product", "Color").unwrap();
        let attribute = metadata.attribute(color).unwrap();

        assert_eq!(attribute.code_name, "[Product].[Color]");
        assert_eq!(attribute.all_members_code_name, "[Product].[Color].[All].children");
        assert_eq!(
            attribute.unique_member_code_name,
            "[Product].[Color].currentmember.uniquename"
        );
        assert_eq!(metadata.parent_dimension(color).unwrap().code_name, "[Product]");
    }

    #[test]
    fn test_members_keep_parent() {
        let mut metadata = sample();
        let color = metadata.find_attribute("Product", "Color").unwrap();
        let red = metadata
            .add_member(color, "Red", "[Product].[Color].&[Red]")
            .unwrap();

        assert_eq!(metadata.member(red).unwrap().code_name, "[Product].[Color].&[Red]");
        assert_eq!(metadata.parent_attribute(red).unwrap().name, "Color");
        assert_eq!(metadata.attribute(color).unwrap().members, vec![red]);

        assert!(metadata
            .add_member(AttributeId(99), "x", "y")
            .is_err());
    }

    #[test]
    fn test_serialization_omits_parents() {
        let metadata = sample();
        let json: serde_json::Value = serde_json::from_str(&metadata.to_json().unwrap()).unwrap();

        assert_eq!(json["modelName"], "sales");
        assert_eq!(json["dimensions"][0]["codeName"], "[Product]");
        assert_eq!(json["dimensions"][0]["attributes"], serde_json::json!([0, 1]));
        assert!(json["attributes"][0].get("dimension").is_none());
    }

    #[test]
    fn test_find_attribute_missing() {
        let metadata = sample();
        assert!(metadata.find_attribute("Product", "Size").is_none());
        assert!(metadata.find_attribute("Store", "Color").is_none());
    }
}
