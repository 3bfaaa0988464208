//! Rule persistence and the query/aggregation surface over the catalog.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row};
use tracing::warn;

use pfrc_core::{ExtractionMethod, NewRule, Rule, RuleCategory, RuleKind, Severity};

use crate::documents::parse_label;
use crate::{Store, StoreError};

/// Aggregate rule counts, keyed by label for reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleStatistics {
    pub total_rules: i64,
    pub by_severity: BTreeMap<String, i64>,
    pub by_category: BTreeMap<String, i64>,
    pub by_program: BTreeMap<String, i64>,
    pub by_method: BTreeMap<String, i64>,
}

impl Store {
    /// Append a document's rule batch in one transaction.
    ///
    /// A row that fails to insert is logged and skipped; sibling rules in the
    /// batch still commit. Returns the number of rows actually inserted.
    pub async fn insert_rules_batch(
        &mut self,
        firm_id: i64,
        rules: &[NewRule],
        source_document_id: Option<i64>,
    ) -> Result<usize, StoreError> {
        if rules.is_empty() {
            return Ok(0);
        }
        let extracted_at = Utc::now();
        let mut inserted = 0usize;
        let mut tx = self.conn.begin().await?;
        for rule in rules {
            let result = sqlx::query(
                "INSERT INTO rule
                 (firm_id, source_document_id, rule_type, rule_category, program_id,
                  value, description, raw_context, severity, extraction_method,
                  confidence, extracted_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(firm_id)
            .bind(source_document_id)
            .bind(rule.kind.as_str())
            .bind(rule.category.as_str())
            .bind(&rule.program_id)
            .bind(&rule.value)
            .bind(&rule.description)
            .bind(&rule.raw_context)
            .bind(rule.severity.as_str())
            .bind(rule.method.as_str())
            .bind(rule.confidence)
            .bind(extracted_at)
            .execute(&mut *tx)
            .await;
            match result {
                Ok(_) => inserted += 1,
                Err(err) => warn!(kind = rule.kind.as_str(), %err, "skipping rule insert"),
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Delete every rule for a firm ahead of a full re-extraction.
    pub async fn clear_firm_rules(&mut self, firm_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM rule WHERE firm_id = ?")
            .bind(firm_id)
            .execute(&mut self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Rules for a firm, most severe first, optionally scoped to one program.
    pub async fn rules_for_firm(
        &mut self,
        firm_id: i64,
        program_id: Option<&str>,
    ) -> Result<Vec<Rule>, StoreError> {
        let mut sql = String::from("SELECT * FROM rule WHERE firm_id = ?");
        if program_id.is_some() {
            sql.push_str(" AND program_id = ?");
        }
        sql.push_str(
            " ORDER BY CASE severity
                 WHEN 'critical' THEN 0 WHEN 'important' THEN 1 ELSE 2 END,
               rule_type",
        );

        let mut query = sqlx::query(&sql).bind(firm_id);
        if let Some(program) = program_id {
            query = query.bind(program);
        }
        let rows = query.fetch_all(&mut self.conn).await?;
        rows.iter().map(rule_from_row).collect()
    }

    pub async fn rules_by_kind(
        &mut self,
        firm_id: i64,
        kind: RuleKind,
    ) -> Result<Vec<Rule>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM rule WHERE firm_id = ? AND rule_type = ?
             ORDER BY extracted_at DESC, id DESC",
        )
        .bind(firm_id)
        .bind(kind.as_str())
        .fetch_all(&mut self.conn)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }

    pub async fn critical_rules(&mut self, firm_id: i64) -> Result<Vec<Rule>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM rule WHERE firm_id = ? AND severity = 'critical' ORDER BY rule_type",
        )
        .bind(firm_id)
        .fetch_all(&mut self.conn)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }

    pub async fn rule_statistics(&mut self, firm_id: i64) -> Result<RuleStatistics, StoreError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM rule WHERE firm_id = ?")
            .bind(firm_id)
            .fetch_one(&mut self.conn)
            .await?
            .try_get("n")?;

        let mut stats = RuleStatistics {
            total_rules: total,
            ..Default::default()
        };
        for (column, slot) in [
            ("severity", &mut stats.by_severity),
            ("rule_category", &mut stats.by_category),
            ("program_id", &mut stats.by_program),
            ("extraction_method", &mut stats.by_method),
        ] {
            let sql = format!(
                "SELECT {column} AS label, COUNT(*) AS n FROM rule
                 WHERE firm_id = ? GROUP BY {column}"
            );
            let rows = sqlx::query(&sql)
                .bind(firm_id)
                .fetch_all(&mut self.conn)
                .await?;
            for row in rows {
                slot.insert(row.try_get("label")?, row.try_get("n")?);
            }
        }
        Ok(stats)
    }
}

fn rule_from_row(row: &SqliteRow) -> Result<Rule, StoreError> {
    let kind = parse_label(row, "rule_type", RuleKind::parse)?;
    let category = parse_label(row, "rule_category", RuleCategory::parse)?;
    let severity = parse_label(row, "severity", Severity::parse)?;
    let method = parse_label(row, "extraction_method", ExtractionMethod::parse)?;
    Ok(Rule {
        id: row.try_get("id")?,
        firm_id: row.try_get("firm_id")?,
        source_document_id: row.try_get("source_document_id")?,
        kind,
        category,
        program_id: row.try_get("program_id")?,
        value: row.try_get("value")?,
        description: row.try_get("description")?,
        raw_context: row.try_get("raw_context")?,
        severity,
        method,
        confidence: row.try_get("confidence")?,
        extracted_at: row.try_get("extracted_at")?,
    })
}
