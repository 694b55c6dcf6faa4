//! The rendered pieces of a N1QL statement.
//!
//! The query generator fills a [`QueryParts`] clause by clause; [`QueryParts::to_n1ql`]
//! assembles them in the fixed N1QL clause order.

use crate::{
    error::{N1qlError, N1qlResult},
    query::{HashHint, IndexKind},
    render::escape_identifier,
};

/// The main extent of the FROM clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtentPart {
    /// Escaped keyspace name, or a rendered expression.
    pub source: String,
    pub alias: String,
    /// Rendered `USE KEYS` expression.
    pub use_keys: Option<String>,
    pub use_index: Option<(String, IndexKind)>,
}

impl ExtentPart {
    fn to_n1ql(&self) -> String {
        let mut text = format!("{} as {}", self.source, escape_identifier(&self.alias));
        if let Some(keys) = &self.use_keys {
            text.push_str(" USE KEYS ");
            text.push_str(keys);
        }
        if let Some((name, kind)) = &self.use_index {
            let using = match kind {
                IndexKind::Gsi => "GSI",
                IndexKind::View => "VIEW",
            };
            text.push_str(&format!(" USE INDEX ({} USING {using})", escape_identifier(name)));
        }
        text
    }
}

/// The join type keyword of a secondary extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    InnerJoin,
    LeftJoin,
    InnerNest,
    LeftOuterNest,
    InnerUnnest,
    LeftOuterUnnest,
}

impl JoinType {
    pub fn keyword(self) -> &'static str {
        match self {
            JoinType::InnerJoin => "INNER JOIN",
            JoinType::LeftJoin => "LEFT JOIN",
            JoinType::InnerNest => "INNER NEST",
            JoinType::LeftOuterNest => "LEFT OUTER NEST",
            JoinType::InnerUnnest => "INNER UNNEST",
            JoinType::LeftOuterUnnest => "LEFT OUTER UNNEST",
        }
    }
}

/// How a joined or nested extent is correlated with the outer extents.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinStrategy {
    /// `ON KEYS <keys>`
    OnKeys { keys: String },
    /// `ON KEY <key> FOR <outer alias>`
    IndexJoin { key: String, for_alias: String },
    /// `[USE HASH(...)] ON <condition>`
    Ansi { condition: String, hash_hint: Option<HashHint> },
}

/// A joined, nested or unnested extent.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPart {
    pub join_type: JoinType,
    /// Escaped keyspace, or the rendered collection for unnests.
    pub source: String,
    pub alias: String,
    /// Absent for unnests.
    pub strategy: Option<JoinStrategy>,
}

impl JoinPart {
    fn to_n1ql(&self) -> String {
        let mut text = format!(
            "{} {} as {}",
            self.join_type.keyword(),
            self.source,
            escape_identifier(&self.alias)
        );

        match &self.strategy {
            Some(JoinStrategy::OnKeys { keys }) => {
                text.push_str(" ON KEYS ");
                text.push_str(keys);
            }
            Some(JoinStrategy::IndexJoin { key, for_alias }) => {
                text.push_str(&format!(" ON KEY {key} FOR {}", escape_identifier(for_alias)));
            }
            Some(JoinStrategy::Ansi { condition, hash_hint }) => {
                match hash_hint {
                    Some(HashHint::Build) => text.push_str(" USE HASH(BUILD)"),
                    Some(HashHint::Probe) => text.push_str(" USE HASH(PROBE)"),
                    None => {}
                }
                text.push_str(" ON ");
                text.push_str(condition);
            }
            None => {}
        }
        text
    }
}

/// Rendered clauses of a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParts {
    pub explain: bool,
    pub distinct: bool,
    /// The projection, including a leading `RAW` when it produces bare values.
    pub select: String,
    pub extent: Option<ExtentPart>,
    pub joins: Vec<JoinPart>,
    pub where_parts: Vec<String>,
    pub group_by: Option<String>,
    pub having_parts: Vec<String>,
    pub order_by: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryParts {
    /// Assembles the statement.
    ///
    /// # Errors
    ///
    /// Returns [`N1qlError::InvalidShape`] if no extent or projection was set.
    pub fn to_n1ql(&self) -> N1qlResult<String> {
        let extent = self
            .extent
            .as_ref()
            .ok_or_else(|| N1qlError::InvalidShape("query has no FROM extent".to_string()))?;
        if self.select.is_empty() {
            return Err(N1qlError::InvalidShape("query has no projection".to_string()));
        }

        let mut statement = String::new();
        if self.explain {
            statement.push_str("EXPLAIN ");
        }
        statement.push_str("SELECT ");
        if self.distinct {
            statement.push_str("DISTINCT ");
        }
        statement.push_str(&self.select);
        statement.push_str(" FROM ");
        statement.push_str(&extent.to_n1ql());

        for join in &self.joins {
            statement.push(' ');
            statement.push_str(&join.to_n1ql());
        }
        if !self.where_parts.is_empty() {
            statement.push_str(" WHERE ");
            statement.push_str(&self.where_parts.join(" AND "));
        }
        if let Some(group_by) = &self.group_by {
            statement.push_str(" GROUP BY ");
            statement.push_str(group_by);
        }
        if !self.having_parts.is_empty() {
            statement.push_str(" HAVING ");
            statement.push_str(&self.having_parts.join(" AND "));
        }
        if !self.order_by.is_empty() {
            statement.push_str(" ORDER BY ");
            statement.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            statement.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            statement.push_str(&format!(" OFFSET {offset}"));
        }

        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn parts() -> QueryParts {
        QueryParts {
            select: "`Extent1`.*".to_string(),
            extent: Some(ExtentPart {
                source: "`beer-sample`".to_string(),
                alias: "Extent1".to_string(),
                use_keys: None,
                use_index: None,
            }),
            ..QueryParts::default()
        }
    }

    #[rstest]
    fn test_minimal_statement(parts: QueryParts) {
        assert_eq!(parts.to_n1ql().unwrap(), "SELECT `Extent1`.* FROM `beer-sample` as `Extent1`");
    }

    #[rstest]
    fn test_clause_order(mut parts: QueryParts) {
        parts.explain = true;
        parts.distinct = true;
        parts.where_parts = vec!["(a = 1)".into(), "(b = 2)".into()];
        parts.group_by = Some("`Extent1`.`style`".into());
        parts.having_parts = vec!["(COUNT(*) > 1)".into()];
        parts.order_by = vec!["`Extent1`.`style` ASC".into()];
        parts.limit = Some(5);
        parts.offset = Some(10);

        assert_eq!(
            parts.to_n1ql().unwrap(),
            "EXPLAIN SELECT DISTINCT `Extent1`.* FROM `beer-sample` as `Extent1` \
             WHERE (a = 1) AND (b = 2) GROUP BY `Extent1`.`style` HAVING (COUNT(*) > 1) \
             ORDER BY `Extent1`.`style` ASC LIMIT 5 OFFSET 10"
        );
    }

    #[rstest]
    #[case(JoinStrategy::OnKeys { keys: "`Extent1`.`brewery_id`".into() }, "INNER JOIN `b` as `Extent2` ON KEYS `Extent1`.`brewery_id`")]
    #[case(
        JoinStrategy::IndexJoin { key: "`Extent2`.`beer_id`".into(), for_alias: "Extent1".into() },
        "INNER JOIN `b` as `Extent2` ON KEY `Extent2`.`beer_id` FOR `Extent1`"
    )]
    #[case(
        JoinStrategy::Ansi { condition: "(x = y)".into(), hash_hint: Some(HashHint::Build) },
        "INNER JOIN `b` as `Extent2` USE HASH(BUILD) ON (x = y)"
    )]
    fn test_join_strategies(#[case] strategy: JoinStrategy, #[case] expected: &str) {
        let join = JoinPart {
            join_type: JoinType::InnerJoin,
            source: "`b`".into(),
            alias: "Extent2".into(),
            strategy: Some(strategy),
        };

        assert_eq!(join.to_n1ql(), expected);
    }

    #[rstest]
    fn test_use_keys_and_index(mut parts: QueryParts) {
        if let Some(extent) = parts.extent.as_mut() {
            extent.use_keys = Some("['a']".into());
            extent.use_index = Some(("by_name".into(), IndexKind::Gsi));
        }

        assert_eq!(
            parts.to_n1ql().unwrap(),
            "SELECT `Extent1`.* FROM `beer-sample` as `Extent1` USE KEYS ['a'] USE INDEX (`by_name` USING GSI)"
        );
    }

    #[rstest]
    fn test_missing_extent_is_invalid() {
        let parts = QueryParts { select: "RAW 1".into(), ..QueryParts::default() };

        assert!(matches!(parts.to_n1ql(), Err(N1qlError::InvalidShape(_))));
    }
}
