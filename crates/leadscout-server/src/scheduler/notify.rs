//! Folds enriched results into `new_leads` notifications.
//!
//! Enrichment callbacks only stamp `enriched_at`. This sweep claims every
//! enriched, un-notified result and sends one notification per
//! (tenant, monitor), so a scan that yields fifty leads produces a single
//! POST per target instead of fifty.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use leadscout_db::ResultRow;
use leadscout_webhook::{DispatchOutcome, LeadSummary, Notification};

use crate::api::AppState;

pub(super) const NOTIFY_BATCH: i64 = 500;

#[derive(Debug)]
pub(super) struct LeadGroup {
    pub tenant_id: String,
    pub monitor_id: i64,
    pub leads: Vec<LeadSummary>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct NotifyReport {
    pub claimed: usize,
    pub notifications: usize,
}

fn lead_summary(row: &ResultRow) -> LeadSummary {
    LeadSummary {
        result_id: row.id,
        title: row.title.clone(),
        source_url: row.source_url.clone(),
        platform: row.platform.clone(),
        lead_score: row.lead_score,
        sentiment: row.sentiment.clone(),
        category: row.conversation_category.clone(),
        summary: row.ai_summary.clone(),
    }
}

/// Group claimed rows per (tenant, monitor), leads ordered by result id.
pub(super) fn group_by_monitor(mut rows: Vec<ResultRow>) -> Vec<LeadGroup> {
    rows.sort_by_key(|r| r.id);
    let mut groups: BTreeMap<(String, i64), Vec<LeadSummary>> = BTreeMap::new();
    for row in &rows {
        groups
            .entry((row.tenant_id.clone(), row.monitor_id))
            .or_default()
            .push(lead_summary(row));
    }
    groups
        .into_iter()
        .map(|((tenant_id, monitor_id), leads)| LeadGroup {
            tenant_id,
            monitor_id,
            leads,
        })
        .collect()
}

/// Claim one batch of enriched results and dispatch their notifications.
///
/// Claimed rows are marked notified before dispatch. A group whose monitor
/// has been deleted is dropped.
pub(super) async fn notify_enriched(
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<NotifyReport, leadscout_db::DbError> {
    let rows = leadscout_db::claim_unnotified_results(&state.pool, now, NOTIFY_BATCH).await?;
    let mut report = NotifyReport {
        claimed: rows.len(),
        ..NotifyReport::default()
    };
    if rows.is_empty() {
        return Ok(report);
    }

    for group in group_by_monitor(rows) {
        let monitor_name = match leadscout_db::get_monitor(&state.pool, group.monitor_id).await {
            Ok(Some(monitor)) => monitor.name,
            Ok(None) => {
                tracing::warn!(monitor_id = group.monitor_id, "webhook: monitor gone, skipping notification");
                continue;
            }
            Err(e) => {
                tracing::error!(monitor_id = group.monitor_id, error = %e, "webhook: monitor lookup failed");
                continue;
            }
        };
        let tier = match state.tier_for(&group.tenant_id).await {
            Ok(tier) => tier,
            Err(e) => {
                tracing::warn!(tenant_id = %group.tenant_id, error = %e, "webhook: tier lookup failed, skipping notification");
                continue;
            }
        };

        let leads = group.leads.len();
        let notification = Notification::new_leads(
            &group.tenant_id,
            group.monitor_id,
            &monitor_name,
            group.leads,
            now,
        );
        match state.webhooks.dispatch(tier, &notification, now).await {
            Ok(DispatchOutcome::Dispatched { deliveries, .. }) => {
                report.notifications += 1;
                tracing::info!(
                    tenant_id = %group.tenant_id,
                    monitor_id = group.monitor_id,
                    leads,
                    deliveries = deliveries.len(),
                    "webhook: new leads dispatched"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(tenant_id = %group.tenant_id, monitor_id = group.monitor_id, error = %e, "webhook: dispatch failed");
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn row(id: i64, tenant_id: &str, monitor_id: i64) -> ResultRow {
        let created_at = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        ResultRow {
            id,
            monitor_id,
            tenant_id: tenant_id.into(),
            platform: "reddit".into(),
            source_url: format!("https://reddit.com/r/sales/comments/{id}"),
            title: format!("lead {id}"),
            body: String::new(),
            author: None,
            posted_at: None,
            engagement_metric: None,
            platform_metadata: serde_json::json!({}),
            match_type: "keyword".into(),
            matched_terms: vec!["crm".into()],
            lead_score: 60,
            sentiment: Some("negative".into()),
            ai_summary: Some("wants a cheaper CRM".into()),
            conversation_category: Some("solution_seeking".into()),
            enriched_at: Some(created_at),
            created_at,
        }
    }

    #[test]
    fn one_scan_worth_of_leads_folds_into_one_group() {
        let rows = (1..=51).rev().map(|id| row(id, "t1", 7)).collect();
        let groups = group_by_monitor(rows);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].leads.len(), 51);
        let ids: Vec<i64> = groups[0].leads.iter().map(|l| l.result_id).collect();
        assert_eq!(ids, (1..=51).collect::<Vec<_>>());
    }

    #[test]
    fn groups_split_by_tenant_and_monitor() {
        let rows = vec![row(1, "t1", 7), row(2, "t2", 7), row(3, "t1", 8), row(4, "t1", 7)];
        let groups = group_by_monitor(rows);
        let keys: Vec<(&str, i64, usize)> = groups
            .iter()
            .map(|g| (g.tenant_id.as_str(), g.monitor_id, g.leads.len()))
            .collect();
        assert_eq!(keys, vec![("t1", 7, 2), ("t1", 8, 1), ("t2", 7, 1)]);
    }

    #[test]
    fn summaries_carry_enrichment_fields() {
        let groups = group_by_monitor(vec![row(5, "t1", 7)]);
        let lead = &groups[0].leads[0];
        assert_eq!(lead.category.as_deref(), Some("solution_seeking"));
        assert_eq!(lead.summary.as_deref(), Some("wants a cheaper CRM"));
        assert_eq!(lead.lead_score, 60);
    }

    #[test]
    fn nothing_claimed_gives_no_groups() {
        assert!(group_by_monitor(Vec::new()).is_empty());
    }
}
