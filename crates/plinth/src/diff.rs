//! Live-vs-desired column comparison.

use crate::introspect::{LiveColumn, LiveTableStructure};
use plinth_db_schema::{ColumnDefinition, TableDefinition};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Differences for a single table.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TableDiff {
    pub table: String,
    /// Columns only in the desired definition
    pub add_columns: Vec<(String, ColumnDefinition)>,
    /// Columns on both sides whose type or nullability differ
    pub modify_columns: Vec<ColumnChange>,
    /// Live column names absent from the desired definition
    pub drop_columns: Vec<String>,
    /// Columns present on both sides with no relevant difference
    pub unchanged: Vec<String>,
}

/// A column present on both sides that needs an `ALTER COLUMN`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnChange {
    /// Desired column name
    pub name: String,
    pub live: LiveColumn,
    pub desired: ColumnDefinition,
}

impl TableDiff {
    /// Check if the table needs any change.
    pub fn is_empty(&self) -> bool {
        self.add_columns.is_empty() && self.modify_columns.is_empty() && self.drop_columns.is_empty()
    }

    /// Count the total number of column changes.
    pub fn change_count(&self) -> usize {
        self.add_columns.len() + self.modify_columns.len() + self.drop_columns.len()
    }
}

impl fmt::Display for TableDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, col) in &self.add_columns {
            let null = if col.is_not_null() { "NOT NULL" } else { "NULL" };
            writeln!(f, "+ {name}: {} {null}", col.sql_type)?;
        }
        for change in &self.modify_columns {
            writeln!(
                f,
                "~ {}: {} {} -> {} {}",
                change.name,
                change.live.sql_type,
                if change.live.nullable { "NULL" } else { "NOT NULL" },
                change.desired.sql_type,
                if change.desired.is_not_null() {
                    "NOT NULL"
                } else {
                    "NULL"
                },
            )?;
        }
        for name in &self.drop_columns {
            writeln!(f, "- {name}")?;
        }
        Ok(())
    }
}

/// Compare a live table against its desired definition.
///
/// Column names are matched after snake_case normalization on both sides.
/// A column present on both sides is modified only when neither side is a
/// primary key and the canonical type or the nullability differs.
pub fn compare(live: &LiveTableStructure, desired: &TableDefinition) -> TableDiff {
    let mut diff = TableDiff {
        table: desired.name.clone(),
        ..Default::default()
    };

    let mut matched = HashSet::new();
    for (name, want) in &desired.columns {
        let Some(have) = live.column(name) else {
            diff.add_columns.push((name.clone(), want.clone()));
            continue;
        };
        matched.insert(have.name.as_str());

        if have.is_primary_key || want.primary_key {
            diff.unchanged.push(name.clone());
            continue;
        }

        if have.sql_type != want.sql_type || have.nullable != want.nullable {
            diff.modify_columns.push(ColumnChange {
                name: name.clone(),
                live: have.clone(),
                desired: want.clone(),
            });
        } else {
            diff.unchanged.push(name.clone());
        }
    }

    // Live columns no desired column claimed, including the losers of a
    // normalization collision.
    for col in live.columns.values() {
        if !matched.contains(col.name.as_str()) {
            diff.drop_columns.push(col.name.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use plinth_db_schema::{Length, SqlType};
    use proptest::prelude::*;

    fn live_col(name: &str, sql_type: SqlType, nullable: bool) -> LiveColumn {
        LiveColumn {
            name: name.to_string(),
            sql_type,
            nullable,
            default: None,
            is_primary_key: false,
            is_foreign_key: false,
            is_identity: false,
        }
    }

    fn make_column(sql_type: SqlType, nullable: bool) -> ColumnDefinition {
        ColumnDefinition {
            sql_type,
            nullable,
            ..Default::default()
        }
    }

    fn make_table(name: &str, columns: Vec<(&str, ColumnDefinition)>) -> TableDefinition {
        TableDefinition {
            name: name.to_string(),
            columns: columns
                .into_iter()
                .map(|(n, c)| (n.to_string(), c))
                .collect(),
            ..Default::default()
        }
    }

    fn make_live(name: &str, columns: Vec<LiveColumn>) -> LiveTableStructure {
        LiveTableStructure {
            table: name.to_string(),
            columns: columns.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    #[test]
    fn test_diff_add_column() {
        let live = make_live("brands", vec![live_col("name", SqlType::Int, true)]);
        let desired = make_table(
            "brands",
            vec![
                ("name", make_column(SqlType::Int, true)),
                ("code", make_column(SqlType::NVarChar(Length::Chars(20)), true)),
            ],
        );

        let diff = compare(&live, &desired);
        assert_eq!(diff.add_columns.len(), 1);
        assert_eq!(diff.add_columns[0].0, "code");
        assert!(diff.modify_columns.is_empty());
        assert!(diff.drop_columns.is_empty());
        assert_eq!(diff.change_count(), 1);
    }

    #[test]
    fn test_diff_drop_column_uses_live_name() {
        let live = make_live(
            "brands",
            vec![
                live_col("name", SqlType::Int, true),
                live_col("LegacyCode", SqlType::Int, true),
            ],
        );
        let desired = make_table("brands", vec![("name", make_column(SqlType::Int, true))]);

        let diff = compare(&live, &desired);
        assert_eq!(diff.drop_columns, ["LegacyCode"]);
    }

    #[test]
    fn test_diff_type_change_is_modify() {
        let live = make_live(
            "brands",
            vec![live_col(
                "name",
                SqlType::NVarChar(Length::Chars(50)),
                true,
            )],
        );
        let desired = make_table(
            "brands",
            vec![(
                "name",
                make_column(SqlType::NVarChar(Length::Chars(100)), true),
            )],
        );

        let diff = compare(&live, &desired);
        assert!(diff.add_columns.is_empty());
        assert!(diff.drop_columns.is_empty());
        assert_eq!(diff.modify_columns.len(), 1);
        assert_eq!(diff.modify_columns[0].name, "name");
    }

    #[test]
    fn test_diff_nullability_change_is_modify() {
        let live = make_live("brands", vec![live_col("name", SqlType::Int, true)]);
        let desired = make_table("brands", vec![("name", make_column(SqlType::Int, false))]);

        let diff = compare(&live, &desired);
        assert_eq!(diff.modify_columns.len(), 1);
    }

    #[test]
    fn test_diff_primary_key_is_exempt() {
        let mut live_pk = live_col("id", SqlType::Int, false);
        live_pk.is_primary_key = true;
        let live = make_live("brands", vec![live_pk]);
        let desired = make_table(
            "brands",
            vec![(
                "id",
                ColumnDefinition {
                    primary_key: true,
                    ..make_column(SqlType::BigInt, true)
                },
            )],
        );

        let diff = compare(&live, &desired);
        assert!(diff.is_empty());
        assert_eq!(diff.unchanged, ["id"]);
    }

    #[test]
    fn test_diff_matches_pascal_case_live_names() {
        let live = make_live(
            "brands",
            vec![live_col("CreatedAt", SqlType::DateTime2, true)],
        );
        let desired = make_table(
            "brands",
            vec![("created_at", make_column(SqlType::DateTime2, true))],
        );

        assert!(compare(&live, &desired).is_empty());
    }

    #[test]
    fn test_diff_drops_the_loser_of_a_name_collision() {
        let live = make_live(
            "brands",
            vec![
                live_col("id", SqlType::Int, false),
                live_col("created_at", SqlType::DateTime2, true),
                live_col("CreatedAt", SqlType::DateTime2, true),
            ],
        );
        let desired = make_table(
            "brands",
            vec![
                ("id", make_column(SqlType::Int, false)),
                ("created_at", make_column(SqlType::DateTime2, true)),
            ],
        );

        let diff = compare(&live, &desired);
        assert_eq!(diff.unchanged, ["id", "created_at"]);
        assert_eq!(diff.drop_columns, ["CreatedAt"]);
    }

    #[test]
    fn test_diff_display() {
        let live = make_live(
            "brands",
            vec![
                live_col("name", SqlType::NVarChar(Length::Chars(50)), true),
                live_col("old", SqlType::Int, true),
            ],
        );
        let desired = make_table(
            "brands",
            vec![
                ("name", make_column(SqlType::NVarChar(Length::Chars(100)), false)),
                ("code", make_column(SqlType::Int, true)),
            ],
        );

        insta::assert_snapshot!(compare(&live, &desired).to_string().trim_end(), @r"
        + code: INT NULL
        ~ name: NVARCHAR(50) NULL -> NVARCHAR(100) NOT NULL
        - old
        ");
    }

    fn sql_type_strategy() -> impl Strategy<Value = SqlType> {
        prop_oneof![
            Just(SqlType::Int),
            Just(SqlType::BigInt),
            Just(SqlType::Bit),
            Just(SqlType::DateTime2),
            (1u16..200).prop_map(|n| SqlType::NVarChar(Length::Chars(n))),
            Just(SqlType::NVarChar(Length::Max)),
        ]
    }

    fn column_strategy() -> impl Strategy<Value = (SqlType, bool, bool)> {
        (sql_type_strategy(), any::<bool>(), prop::bool::weighted(0.1))
    }

    fn columns_strategy() -> impl Strategy<Value = IndexMap<String, (SqlType, bool, bool)>> {
        prop::collection::vec(("[a-f]{1,2}", column_strategy()), 0..8)
            .prop_map(|cols| cols.into_iter().collect())
    }

    proptest! {
        #[test]
        fn compare_classifies_every_column_once(
            live_cols in columns_strategy(),
            desired_cols in columns_strategy(),
        ) {
            let live = make_live(
                "t",
                live_cols
                    .iter()
                    .map(|(name, (ty, nullable, pk))| LiveColumn {
                        is_primary_key: *pk,
                        ..live_col(name, ty.clone(), *nullable)
                    })
                    .collect(),
            );
            let desired = make_table(
                "t",
                desired_cols
                    .iter()
                    .map(|(name, (ty, nullable, pk))| {
                        (
                            name.as_str(),
                            ColumnDefinition {
                                primary_key: *pk,
                                ..make_column(ty.clone(), *nullable)
                            },
                        )
                    })
                    .collect(),
            );

            let diff = compare(&live, &desired);

            let mut seen: Vec<&str> = Vec::new();
            seen.extend(diff.add_columns.iter().map(|(n, _)| n.as_str()));
            seen.extend(diff.modify_columns.iter().map(|c| c.name.as_str()));
            seen.extend(diff.drop_columns.iter().map(String::as_str));
            seen.extend(diff.unchanged.iter().map(String::as_str));
            seen.sort_unstable();

            let mut expected: Vec<&str> = live_cols
                .keys()
                .chain(desired_cols.keys())
                .map(String::as_str)
                .collect();
            expected.sort_unstable();
            expected.dedup();

            prop_assert_eq!(seen, expected);
        }

        #[test]
        fn compare_desired_against_itself_is_empty(desired_cols in columns_strategy()) {
            let live = make_live(
                "t",
                desired_cols
                    .iter()
                    .map(|(name, (ty, nullable, pk))| LiveColumn {
                        is_primary_key: *pk,
                        ..live_col(name, ty.clone(), *nullable)
                    })
                    .collect(),
            );
            let desired = make_table(
                "t",
                desired_cols
                    .iter()
                    .map(|(name, (ty, nullable, pk))| {
                        (
                            name.as_str(),
                            ColumnDefinition {
                                primary_key: *pk,
                                ..make_column(ty.clone(), *nullable)
                            },
                        )
                    })
                    .collect(),
            );

            prop_assert!(compare(&live, &desired).is_empty());
        }
    }
}
