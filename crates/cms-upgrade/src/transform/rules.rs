//! Transform implementations. Each returns how many cells, rows or columns it changed.

use std::collections::HashSet;

use super::{CellValue, Fill, ValueRename};
use crate::core::schema::ColumnDef;
use crate::core::snapshot::TableSnapshot;
use crate::core::value::{SqlNullType, SqlValue};
use crate::error::{Result, UpgradeError};

/// `start + offset`, or `None` when it does not fit an i64.
fn sequence_at(start: i64, offset: usize) -> Option<i64> {
    i64::try_from(offset).ok().and_then(|o| start.checked_add(o))
}

/// Parse configuration text for a snapshot column.
fn parse_for(snapshot: &TableSnapshot, column: usize, text: &str) -> Result<SqlValue> {
    let def = &snapshot.columns()[column];
    SqlValue::parse_as(text, def.value_type()).map_err(|e| {
        UpgradeError::transform(snapshot.table_name(), format!("column {}: {}", def.name, e))
    })
}

pub(super) fn add_column(snapshot: &mut TableSnapshot, column: &ColumnDef, fill: &Fill) -> Result<usize> {
    if snapshot.column_index(&column.name).is_some() {
        return Ok(0);
    }

    let ty = column.value_type();
    let rows = snapshot.len();
    let to_transform_err =
        |e: String| UpgradeError::transform(snapshot.table_name(), format!("column {}: {}", column.name, e));

    let values = match fill {
        Fill::Null => vec![SqlValue::Null(ty); rows],
        Fill::Constant(text) => {
            let value = SqlValue::parse_as(text, ty).map_err(to_transform_err)?;
            vec![value; rows]
        }
        Fill::Sequence { start } => (0..rows)
            .map(|i| {
                let value = sequence_at(*start, i).ok_or_else(|| {
                    to_transform_err(format!("sequence from {} overflows at row {}", start, i))
                })?;
                SqlValue::from_i64(value, ty).map_err(to_transform_err)
            })
            .collect::<Result<Vec<_>>>()?,
        Fill::Copy(from) => {
            let source = snapshot.require_column(from)?;
            (0..rows)
                .map(|i| snapshot.value(i, source).clone())
                .collect()
        }
    };

    snapshot.add_column(column.clone(), values)?;
    Ok(rows + 1)
}

pub(super) fn rename_value(
    snapshot: &mut TableSnapshot,
    column: &str,
    from: &str,
    to: &str,
) -> Result<usize> {
    let idx = snapshot.require_column(column)?;
    let from = parse_for(snapshot, idx, from)?;
    let to = parse_for(snapshot, idx, to)?;

    let mut changed = 0;
    for row in 0..snapshot.len() {
        if *snapshot.value(row, idx) == from && snapshot.set_value(row, idx, to.clone()) {
            changed += 1;
        }
    }
    Ok(changed)
}

pub(super) fn resequence(snapshot: &mut TableSnapshot, column: &str, start: i64) -> Result<usize> {
    let idx = snapshot.require_column(column)?;
    let ty = snapshot.columns()[idx].value_type();

    let mut changed = 0;
    for row in 0..snapshot.len() {
        let next = sequence_at(start, row).ok_or_else(|| {
            UpgradeError::transform(
                snapshot.table_name(),
                format!("column {}: sequence from {} overflows at row {}", column, start, row),
            )
        })?;
        let value = SqlValue::from_i64(next, ty).map_err(|e| {
            UpgradeError::transform(snapshot.table_name(), format!("column {}: {}", column, e))
        })?;
        if snapshot.set_value(row, idx, value) {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Keep the first occurrence of each value; later occurrences get the
/// smallest numeric suffix (from 1) that collides with nothing in the column.
pub(super) fn deduplicate(
    snapshot: &mut TableSnapshot,
    column: &str,
    ignore_case: bool,
    renames: &mut Vec<ValueRename>,
) -> Result<usize> {
    let idx = snapshot.require_column(column)?;
    let def = snapshot.columns()[idx].clone();
    if def.value_type() != SqlNullType::String {
        return Err(UpgradeError::transform(
            snapshot.table_name(),
            format!("column {} is not a text column", def.name),
        ));
    }

    let norm = |s: &str| {
        if ignore_case {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    };

    let mut taken: HashSet<String> = (0..snapshot.len())
        .filter_map(|row| snapshot.value(row, idx).as_text().map(norm))
        .collect();
    let mut seen = HashSet::new();

    let mut changed = 0;
    for row in 0..snapshot.len() {
        let Some(text) = snapshot.value(row, idx).as_text().map(str::to_string) else {
            continue;
        };
        if seen.insert(norm(&text)) {
            continue;
        }

        let mut suffix = 1u32;
        let candidate = loop {
            let candidate = format!("{}{}", text, suffix);
            if !taken.contains(&norm(&candidate)) {
                break candidate;
            }
            suffix += 1;
        };

        if def.max_length > 0 && candidate.chars().count() > def.max_length as usize {
            return Err(UpgradeError::transform(
                snapshot.table_name(),
                format!(
                    "deduplicated value '{}' exceeds the {} character limit of {}",
                    candidate, def.max_length, def.name
                ),
            ));
        }

        taken.insert(norm(&candidate));
        seen.insert(norm(&candidate));
        snapshot.set_value(row, idx, SqlValue::Text(candidate.clone()));
        renames.push(ValueRename {
            table: snapshot.table_name(),
            column: def.name.clone(),
            from: text,
            to: candidate,
        });
        changed += 1;
    }
    Ok(changed)
}

pub(super) fn ensure_row(
    snapshot: &mut TableSnapshot,
    matching: &[(String, String)],
    values: &[(String, CellValue)],
) -> Result<usize> {
    let matching = matching
        .iter()
        .map(|(column, text)| {
            let idx = snapshot.require_column(column)?;
            Ok((idx, parse_for(snapshot, idx, text)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let exists = snapshot
        .rows()
        .iter()
        .any(|row| matching.iter().all(|(idx, v)| row.values[*idx] == *v));
    if exists {
        return Ok(0);
    }

    let mut row: Vec<SqlValue> = snapshot
        .columns()
        .iter()
        .map(|c| SqlValue::Null(c.value_type()))
        .collect();

    for (column, cell) in values {
        let idx = snapshot.require_column(column)?;
        row[idx] = match cell {
            CellValue::Value(text) => parse_for(snapshot, idx, text)?,
            CellValue::Null => SqlValue::Null(snapshot.columns()[idx].value_type()),
            CellValue::Next => {
                let next = match (0..snapshot.len())
                    .filter_map(|r| snapshot.value(r, idx).as_i64())
                    .max()
                {
                    None => 1,
                    Some(max) => max.checked_add(1).ok_or_else(|| {
                        UpgradeError::transform(
                            snapshot.table_name(),
                            format!("column {}: no value follows {}", column, max),
                        )
                    })?,
                };
                SqlValue::from_i64(next, snapshot.columns()[idx].value_type()).map_err(|e| {
                    UpgradeError::transform(snapshot.table_name(), format!("column {}: {}", column, e))
                })?
            }
        };
    }

    for (idx, value) in matching {
        row[idx] = value;
    }

    snapshot.push_row(row)?;
    Ok(1)
}

pub(super) fn remove_rows(snapshot: &mut TableSnapshot, column: &str, value: &str) -> Result<usize> {
    let idx = snapshot.require_column(column)?;
    let value = parse_for(snapshot, idx, value)?;
    Ok(snapshot.remove_rows(|row| row.values[idx] == value))
}

#[cfg(test)]
mod tests {
    use super::super::{Transform, TransformPipeline, TransformReport};
    use super::*;
    use crate::core::schema::TableSchema;
    use crate::core::snapshot::SortKey;

    fn communities(names: &[&str]) -> TableSnapshot {
        let schema = TableSchema::new("public", "RXCOMMUNITY")
            .with_column(ColumnDef::new("ID", "int4").primary_key())
            .with_column(ColumnDef::new("NAME", "varchar").with_length(16));
        let rows = names
            .iter()
            .enumerate()
            .map(|(i, n)| vec![SqlValue::I32(i as i32 + 1), SqlValue::from(*n)])
            .collect();
        TableSnapshot::new(schema, rows, vec![SortKey::asc("ID")]).unwrap()
    }

    fn names(snapshot: &TableSnapshot) -> Vec<String> {
        snapshot
            .rows()
            .iter()
            .map(|r| r.values[1].as_text().unwrap_or("NULL").to_string())
            .collect()
    }

    fn dedup(column: &str, ignore_case: bool) -> Transform {
        Transform::Deduplicate {
            column: column.into(),
            ignore_case,
        }
    }

    #[test]
    fn test_deduplicate_appends_counting_suffix() {
        let mut snap = communities(&["Extranet", "Extranet", "Extranet"]);
        let mut report = TransformReport::default();
        let changed = dedup("NAME", false).apply(&mut snap, &mut report).unwrap();

        assert_eq!(changed, 2);
        assert_eq!(names(&snap), vec!["Extranet", "Extranet1", "Extranet2"]);
        assert_eq!(report.renames.len(), 2);
        assert_eq!(report.renames[0].from, "Extranet");
        assert_eq!(report.renames[0].to, "Extranet1");
        assert_eq!(report.renames[1].to, "Extranet2");
    }

    #[test]
    fn test_deduplicate_skips_existing_suffixes() {
        let mut snap = communities(&["Portal", "Portal", "Portal1"]);
        let mut report = TransformReport::default();
        dedup("NAME", false).apply(&mut snap, &mut report).unwrap();
        assert_eq!(names(&snap), vec!["Portal", "Portal2", "Portal1"]);
    }

    #[test]
    fn test_deduplicate_ignore_case() {
        let mut snap = communities(&["Intranet", "INTRANET"]);
        let mut report = TransformReport::default();
        dedup("NAME", false).apply(&mut snap, &mut report).unwrap();
        assert!(report.renames.is_empty());

        dedup("NAME", true).apply(&mut snap, &mut report).unwrap();
        assert_eq!(names(&snap), vec!["Intranet", "INTRANET1"]);
    }

    #[test]
    fn test_deduplicate_is_idempotent() {
        let mut snap = communities(&["Extranet", "Extranet"]);
        let mut report = TransformReport::default();
        dedup("NAME", false).apply(&mut snap, &mut report).unwrap();
        let again = dedup("NAME", false).apply(&mut snap, &mut report).unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn test_deduplicate_respects_length() {
        let mut snap = communities(&["ABCDEFGHIJKLMNOP", "ABCDEFGHIJKLMNOP"]);
        let mut report = TransformReport::default();
        assert!(dedup("NAME", false).apply(&mut snap, &mut report).is_err());
    }

    #[test]
    fn test_deduplicate_rejects_numeric_column() {
        let mut snap = communities(&["a"]);
        let mut report = TransformReport::default();
        assert!(dedup("ID", false).apply(&mut snap, &mut report).is_err());
    }

    #[test]
    fn test_add_column_sequence_and_idempotence() {
        let mut snap = communities(&["a", "b", "c"]);
        let add = Transform::AddColumn {
            column: ColumnDef::new("ORDINAL", "int4").not_null(),
            fill: Fill::Sequence { start: 1 },
        };
        let mut report = TransformReport::default();
        assert_eq!(add.apply(&mut snap, &mut report).unwrap(), 4);
        let ordinals: Vec<_> = (0..3).map(|r| snap.value(r, 2).clone()).collect();
        assert_eq!(
            ordinals,
            vec![SqlValue::I32(1), SqlValue::I32(2), SqlValue::I32(3)]
        );

        assert_eq!(add.apply(&mut snap, &mut report).unwrap(), 0);
        assert_eq!(snap.columns().len(), 3);
    }

    #[test]
    fn test_add_column_constant_and_copy() {
        let mut snap = communities(&["a", "b"]);
        let mut report = TransformReport::default();
        Transform::AddColumn {
            column: ColumnDef::new("ENABLED", "bool"),
            fill: Fill::Constant("true".into()),
        }
        .apply(&mut snap, &mut report)
        .unwrap();
        Transform::AddColumn {
            column: ColumnDef::new("LABEL", "varchar"),
            fill: Fill::Copy("NAME".into()),
        }
        .apply(&mut snap, &mut report)
        .unwrap();

        assert_eq!(snap.value(1, 2), &SqlValue::Bool(true));
        assert_eq!(snap.value(1, 3), &SqlValue::from("b"));
    }

    #[test]
    fn test_add_column_bad_constant() {
        let mut snap = communities(&["a"]);
        let mut report = TransformReport::default();
        let result = Transform::AddColumn {
            column: ColumnDef::new("N", "int4"),
            fill: Fill::Constant("many".into()),
        }
        .apply(&mut snap, &mut report);
        assert!(matches!(result, Err(UpgradeError::Transform { .. })));
    }

    #[test]
    fn test_resequence_contiguous_from_start() {
        let schema = TableSchema::new("public", "STATES")
            .with_column(ColumnDef::new("ID", "int4").primary_key())
            .with_column(ColumnDef::new("ORDINAL", "int2"));
        let rows = vec![
            vec![SqlValue::I32(1), SqlValue::I16(5)],
            vec![SqlValue::I32(2), SqlValue::I16(1)],
            vec![SqlValue::I32(3), SqlValue::I16(9)],
        ];
        let mut snap = TableSnapshot::new(schema, rows, Vec::new()).unwrap();
        let reseq = Transform::Resequence {
            column: "ORDINAL".into(),
            start: 1,
        };
        let mut report = TransformReport::default();
        assert_eq!(reseq.apply(&mut snap, &mut report).unwrap(), 3);
        assert_eq!(snap.value(0, 1), &SqlValue::I16(1));
        assert_eq!(snap.value(2, 1), &SqlValue::I16(3));
        assert_eq!(reseq.apply(&mut snap, &mut report).unwrap(), 0);
    }

    #[test]
    fn test_sequences_near_i64_max_fail_cleanly() {
        let schema = TableSchema::new("public", "EVENTS")
            .with_column(ColumnDef::new("ID", "int8").primary_key())
            .with_column(ColumnDef::new("SEQ", "int8"));
        let rows = vec![
            vec![SqlValue::I64(1), SqlValue::I64(0)],
            vec![SqlValue::I64(i64::MAX), SqlValue::I64(0)],
        ];
        let mut snap = TableSnapshot::new(schema, rows, Vec::new()).unwrap();
        let mut report = TransformReport::default();

        let reseq = Transform::Resequence {
            column: "SEQ".into(),
            start: i64::MAX,
        };
        let err = reseq.apply(&mut snap, &mut report).unwrap_err();
        assert!(err.to_string().contains("overflows"));

        let fill = Transform::AddColumn {
            column: ColumnDef::new("POS", "int8"),
            fill: Fill::Sequence { start: i64::MAX },
        };
        assert!(fill.apply(&mut snap, &mut report).is_err());

        let ensure = Transform::EnsureRow {
            matching: vec![("SEQ".into(), "7".into())],
            values: vec![("ID".into(), CellValue::Next)],
        };
        let err = ensure.apply(&mut snap, &mut report).unwrap_err();
        assert!(err.to_string().contains("no value follows"));
    }

    #[test]
    fn test_rename_value() {
        let mut snap = communities(&["Old", "Other", "Old"]);
        let rename = Transform::RenameValue {
            column: "NAME".into(),
            from: "Old".into(),
            to: "New".into(),
        };
        let mut report = TransformReport::default();
        assert_eq!(rename.apply(&mut snap, &mut report).unwrap(), 2);
        assert_eq!(names(&snap), vec!["New", "Other", "New"]);
        assert_eq!(rename.apply(&mut snap, &mut report).unwrap(), 0);
    }

    #[test]
    fn test_ensure_row_inserts_once() {
        let mut snap = communities(&["a", "b"]);
        let ensure = Transform::EnsureRow {
            matching: vec![("NAME".into(), "Default".into())],
            values: vec![("ID".into(), CellValue::Next)],
        };
        let mut report = TransformReport::default();
        assert_eq!(ensure.apply(&mut snap, &mut report).unwrap(), 1);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.value(2, 0), &SqlValue::I32(3));
        assert_eq!(snap.value(2, 1), &SqlValue::from("Default"));
        assert!(snap.rows()[2].origin.is_none());

        assert_eq!(ensure.apply(&mut snap, &mut report).unwrap(), 0);
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn test_ensure_row_next_starts_at_one() {
        let mut snap = communities(&[]);
        let ensure = Transform::EnsureRow {
            matching: vec![("NAME".into(), "First".into())],
            values: vec![("ID".into(), CellValue::Next)],
        };
        let mut report = TransformReport::default();
        ensure.apply(&mut snap, &mut report).unwrap();
        assert_eq!(snap.value(0, 0), &SqlValue::I32(1));
    }

    #[test]
    fn test_remove_rows() {
        let mut snap = communities(&["keep", "drop", "drop"]);
        let remove = Transform::RemoveRows {
            column: "NAME".into(),
            value: "drop".into(),
        };
        let mut report = TransformReport::default();
        assert_eq!(remove.apply(&mut snap, &mut report).unwrap(), 2);
        assert_eq!(snap.removed().len(), 2);
        assert_eq!(names(&snap), vec!["keep"]);
    }

    #[test]
    fn test_unknown_column() {
        let mut snap = communities(&["a"]);
        let mut report = TransformReport::default();
        let err = dedup("MISSING", false).apply(&mut snap, &mut report).unwrap_err();
        assert!(err.to_string().contains("column MISSING not found"));
    }

    #[test]
    fn test_pipeline_validates_not_null() {
        let mut snap = communities(&["a"]);
        let pipeline = TransformPipeline::new(vec![Transform::AddColumn {
            column: ColumnDef::new("ORDINAL", "int4").not_null(),
            fill: Fill::Null,
        }]);
        assert!(matches!(
            pipeline.apply(&mut snap),
            Err(UpgradeError::Snapshot { .. })
        ));
    }

    #[test]
    fn test_pipeline_fill_later() {
        let mut snap = communities(&["a", "b"]);
        let pipeline = TransformPipeline::new(vec![
            Transform::AddColumn {
                column: ColumnDef::new("ORDINAL", "int4").not_null(),
                fill: Fill::Null,
            },
            Transform::Resequence {
                column: "ORDINAL".into(),
                start: 1,
            },
        ]);
        let report = pipeline.apply(&mut snap).unwrap();
        assert_eq!(report.notes.len(), 2);
        assert_eq!(snap.value(1, 2), &SqlValue::I32(2));
    }
}
