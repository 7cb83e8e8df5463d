//! Declarative snapshot transforms.
//!
//! Each [`Transform`] rewrites a [`TableSnapshot`] in place and detects its
//! own post-condition, so applying a pipeline to data it already produced
//! changes nothing.
//!
//! Transforms are read from `<Table>` elements of a `table-migration` plugin:
//!
//! ```xml
//! <Table name="RXCOMMUNITY" orderBy="ID">
//!   <AddColumn name="ORDINAL" type="int4" nullable="false" fill="sequence" start="1"/>
//!   <Deduplicate column="NAME"/>
//!   <RenameValue column="STATUS" from="Inactive" to="Archived"/>
//! </Table>
//! ```

mod rules;

use serde::Serialize;

use crate::config::XmlElement;
use crate::core::identifier::{validate_identifier, validate_type_name};
use crate::core::schema::ColumnDef;
use crate::core::snapshot::TableSnapshot;
use crate::error::{Result, UpgradeError};

/// How a new column is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fill {
    /// Every row gets NULL.
    Null,
    /// Every row gets the same value, parsed for the column type.
    Constant(String),
    /// Contiguous numbers in snapshot order.
    Sequence { start: i64 },
    /// Copy of another column's value.
    Copy(String),
}

/// Value of one column in a row created by [`Transform::EnsureRow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Value(String),
    Null,
    /// One more than the largest value already in the column (1 when none).
    Next,
}

/// A declarative rewrite of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// Add a column unless it already exists.
    AddColumn { column: ColumnDef, fill: Fill },

    /// Replace every occurrence of a value in a column.
    RenameValue {
        column: String,
        from: String,
        to: String,
    },

    /// Renumber a column contiguously in snapshot order.
    Resequence { column: String, start: i64 },

    /// Make a text column's values unique by appending numeric suffixes.
    Deduplicate { column: String, ignore_case: bool },

    /// Insert a row unless one matching every `matching` pair exists.
    EnsureRow {
        matching: Vec<(String, String)>,
        values: Vec<(String, CellValue)>,
    },

    /// Delete rows whose column equals a value.
    RemoveRows { column: String, value: String },
}

/// A value rewritten by deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueRename {
    pub table: String,
    pub column: String,
    pub from: String,
    pub to: String,
}

/// What the transforms of one table did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformReport {
    /// Original to new value mappings produced by deduplication.
    pub renames: Vec<ValueRename>,

    /// One line per transform that changed something.
    pub notes: Vec<String>,
}

impl TransformReport {
    pub fn is_empty(&self) -> bool {
        self.renames.is_empty() && self.notes.is_empty()
    }
}

impl Transform {
    /// Read a transform from its XML element.
    pub fn from_element(el: &XmlElement) -> Result<Self> {
        match el.name.as_str() {
            "AddColumn" => {
                let name = el.required_attr("name")?;
                let data_type = el.required_attr("type")?;
                validate_identifier(name)?;
                validate_type_name(data_type)?;
                let mut column = ColumnDef::new(name, data_type);
                if let Some(length) = el.attr("length") {
                    column.max_length = parse_number(el, "length", length)?;
                }
                if el.bool_attr("nullable") == Some(false) {
                    column = column.not_null();
                }

                let fill = match el.attr("fill").map(|f| f.trim().to_lowercase()) {
                    None if el.attr("value").is_some() => {
                        Fill::Constant(el.attr("value").unwrap_or_default().to_string())
                    }
                    None => Fill::Null,
                    Some(f) if f == "null" => Fill::Null,
                    Some(f) if f == "constant" => {
                        Fill::Constant(el.attr("value").unwrap_or_default().to_string())
                    }
                    Some(f) if f == "sequence" => Fill::Sequence {
                        start: optional_number(el, "start")?.unwrap_or(1),
                    },
                    Some(f) if f == "copy" => Fill::Copy(el.required_attr("from")?.to_string()),
                    Some(other) => {
                        return Err(UpgradeError::PluginDocument(format!(
                            "unknown fill '{}' for column {}",
                            other, name
                        )))
                    }
                };

                Ok(Transform::AddColumn { column, fill })
            }
            "RenameValue" => Ok(Transform::RenameValue {
                column: el.required_attr("column")?.to_string(),
                from: el.attr("from").unwrap_or_default().to_string(),
                to: el.attr("to").unwrap_or_default().to_string(),
            }),
            "Resequence" => Ok(Transform::Resequence {
                column: el.required_attr("column")?.to_string(),
                start: optional_number(el, "start")?.unwrap_or(1),
            }),
            "Deduplicate" => Ok(Transform::Deduplicate {
                column: el.required_attr("column")?.to_string(),
                ignore_case: el.bool_attr("ignoreCase").unwrap_or(false),
            }),
            "EnsureRow" => {
                let matching: Vec<(String, String)> = el
                    .children_named("Match")
                    .map(|m| {
                        Ok((
                            m.required_attr("column")?.to_string(),
                            m.attr("value").unwrap_or_default().to_string(),
                        ))
                    })
                    .collect::<Result<_>>()?;
                if matching.is_empty() {
                    return Err(UpgradeError::PluginDocument(
                        "<EnsureRow> needs at least one <Match>".into(),
                    ));
                }

                let values = el
                    .children_named("Set")
                    .map(|s| {
                        let column = s.required_attr("column")?.to_string();
                        let value = match (s.attr("value"), s.bool_attr("next"), s.bool_attr("null")) {
                            (_, Some(true), _) => CellValue::Next,
                            (_, _, Some(true)) => CellValue::Null,
                            (Some(v), _, _) => CellValue::Value(v.to_string()),
                            (None, _, _) => CellValue::Null,
                        };
                        Ok((column, value))
                    })
                    .collect::<Result<_>>()?;

                Ok(Transform::EnsureRow { matching, values })
            }
            "RemoveRows" => Ok(Transform::RemoveRows {
                column: el.required_attr("column")?.to_string(),
                value: el.attr("value").unwrap_or_default().to_string(),
            }),
            other => Err(UpgradeError::PluginDocument(format!(
                "unknown transform <{}>",
                other
            ))),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Transform::AddColumn { .. } => "AddColumn",
            Transform::RenameValue { .. } => "RenameValue",
            Transform::Resequence { .. } => "Resequence",
            Transform::Deduplicate { .. } => "Deduplicate",
            Transform::EnsureRow { .. } => "EnsureRow",
            Transform::RemoveRows { .. } => "RemoveRows",
        }
    }

    /// Apply to a snapshot. Returns the number of cells or rows changed.
    pub fn apply(&self, snapshot: &mut TableSnapshot, report: &mut TransformReport) -> Result<usize> {
        let changed = match self {
            Transform::AddColumn { column, fill } => rules::add_column(snapshot, column, fill)?,
            Transform::RenameValue { column, from, to } => {
                rules::rename_value(snapshot, column, from, to)?
            }
            Transform::Resequence { column, start } => rules::resequence(snapshot, column, *start)?,
            Transform::Deduplicate {
                column,
                ignore_case,
            } => rules::deduplicate(snapshot, column, *ignore_case, &mut report.renames)?,
            Transform::EnsureRow { matching, values } => {
                rules::ensure_row(snapshot, matching, values)?
            }
            Transform::RemoveRows { column, value } => {
                rules::remove_rows(snapshot, column, value)?
            }
        };

        if changed > 0 {
            report
                .notes
                .push(format!("{} {}: {} changed", snapshot.table_name(), self.kind(), changed));
        }
        Ok(changed)
    }
}

/// Transforms applied in declared order.
#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    transforms: Vec<Transform>,
}

impl TransformPipeline {
    pub fn new(transforms: Vec<Transform>) -> Self {
        Self { transforms }
    }

    /// Read every child element of `table` as a transform.
    pub fn from_element(table: &XmlElement) -> Result<Self> {
        table
            .children
            .iter()
            .map(Transform::from_element)
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Apply every transform, then check the snapshot invariant.
    pub fn apply(&self, snapshot: &mut TableSnapshot) -> Result<TransformReport> {
        let mut report = TransformReport::default();
        for transform in &self.transforms {
            transform.apply(snapshot, &mut report)?;
        }
        snapshot.validate()?;
        Ok(report)
    }
}

fn parse_number<T: std::str::FromStr>(el: &XmlElement, attr: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        UpgradeError::PluginDocument(format!(
            "<{}> attribute '{}' must be a number, got '{}'",
            el.name, attr, value
        ))
    })
}

fn optional_number(el: &XmlElement, attr: &str) -> Result<Option<i64>> {
    el.attr(attr).map(|v| parse_number(el, attr, v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Result<Transform> {
        Transform::from_element(&XmlElement::parse(xml).unwrap())
    }

    #[test]
    fn test_parse_add_column() {
        let t = parse(
            r#"<AddColumn name="ORDINAL" type="int4" nullable="false" fill="sequence" start="10"/>"#,
        )
        .unwrap();
        match t {
            Transform::AddColumn { column, fill } => {
                assert_eq!(column.name, "ORDINAL");
                assert!(!column.is_nullable);
                assert_eq!(fill, Fill::Sequence { start: 10 });
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_add_column_value_implies_constant() {
        let t = parse(r#"<AddColumn name="KIND" type="varchar" length="16" value="page"/>"#).unwrap();
        match t {
            Transform::AddColumn { column, fill } => {
                assert_eq!(column.max_length, 16);
                assert!(column.is_nullable);
                assert_eq!(fill, Fill::Constant("page".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse(r#"<AddColumn name="A" type="int4" fill="random"/>"#).is_err());
        assert!(parse(r#"<AddColumn name="A" type="int4" length="long"/>"#).is_err());
        assert!(parse(r#"<AddColumn type="int4"/>"#).is_err());
        assert!(parse(r#"<AddColumn name="A" type="int; DROP TABLE T"/>"#).is_err());
        assert!(parse(r#"<Explode/>"#).is_err());
        assert!(parse(r#"<EnsureRow><Set column="A" value="1"/></EnsureRow>"#).is_err());
    }

    #[test]
    fn test_parse_ensure_row() {
        let t = parse(
            r#"<EnsureRow>
                 <Match column="TRANSITION_ID" value="4"/>
                 <Set column="ID" next="true"/>
                 <Set column="NOTIFY" value="1"/>
                 <Set column="TEMPLATE"/>
               </EnsureRow>"#,
        )
        .unwrap();
        assert_eq!(
            t,
            Transform::EnsureRow {
                matching: vec![("TRANSITION_ID".into(), "4".into())],
                values: vec![
                    ("ID".into(), CellValue::Next),
                    ("NOTIFY".into(), CellValue::Value("1".into())),
                    ("TEMPLATE".into(), CellValue::Null),
                ],
            }
        );
    }

    #[test]
    fn test_pipeline_from_table_element() {
        let table = XmlElement::parse(
            r#"<Table name="RXCOMMUNITY">
                 <Deduplicate column="NAME" ignoreCase="true"/>
                 <Resequence column="ORDINAL"/>
               </Table>"#,
        )
        .unwrap();
        let pipeline = TransformPipeline::from_element(&table).unwrap();
        assert_eq!(pipeline.transforms().len(), 2);
        assert_eq!(
            pipeline.transforms()[1],
            Transform::Resequence {
                column: "ORDINAL".into(),
                start: 1
            }
        );
    }
}
