//! Payload shapes per target.
//!
//! Slack and Discord incoming-webhook URLs get a rich chat message; every
//! other URL gets the generic JSON envelope, which is also what is stored on
//! the delivery row.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const EVENT_NEW_LEADS: &str = "new_leads";

/// Discord embed limit.
const MAX_EMBED_FIELDS: usize = 10;

/// Blurple.
const DISCORD_COLOR: u32 = 0x0058_65F2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Slack,
    Discord,
    Generic,
}

/// Classify a webhook URL by host and path.
#[must_use]
pub fn detect_target(url: &str) -> TargetKind {
    let Ok(parsed) = Url::parse(url) else {
        return TargetKind::Generic;
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let path = parsed.path();

    if host == "hooks.slack.com" && path.starts_with("/services/") {
        return TargetKind::Slack;
    }
    let discord_host = matches!(
        host.as_str(),
        "discord.com" | "discordapp.com" | "ptb.discord.com" | "canary.discord.com"
    );
    if discord_host && path.starts_with("/api/webhooks/") {
        return TargetKind::Discord;
    }
    TargetKind::Generic
}

/// One enriched lead in a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadSummary {
    pub result_id: i64,
    pub title: String,
    pub source_url: String,
    pub platform: String,
    pub lead_score: i32,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// The generic envelope: `{event, created_at, tenant_id, monitor, leads}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    pub created_at: DateTime<Utc>,
    pub tenant_id: String,
    pub monitor_id: i64,
    pub monitor_name: String,
    pub leads: Vec<LeadSummary>,
}

impl Notification {
    #[must_use]
    pub fn new_leads(
        tenant_id: &str,
        monitor_id: i64,
        monitor_name: &str,
        leads: Vec<LeadSummary>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event: EVENT_NEW_LEADS.to_string(),
            created_at,
            tenant_id: tenant_id.to_string(),
            monitor_id,
            monitor_name: monitor_name.to_string(),
            leads,
        }
    }

    fn headline(&self) -> String {
        match self.leads.len() {
            1 => format!("1 new lead for {}", self.monitor_name),
            n => format!("{n} new leads for {}", self.monitor_name),
        }
    }
}

/// Body to POST for a stored envelope. Envelopes that no longer decode as a
/// [`Notification`] are sent unchanged.
#[must_use]
pub fn render(kind: TargetKind, envelope: &Value) -> Value {
    if kind == TargetKind::Generic {
        return envelope.clone();
    }
    let Ok(notification) = serde_json::from_value::<Notification>(envelope.clone()) else {
        return envelope.clone();
    };
    match kind {
        TargetKind::Slack => slack(&notification),
        TargetKind::Discord => discord(&notification),
        TargetKind::Generic => envelope.clone(),
    }
}

fn lead_line(lead: &LeadSummary) -> String {
    let mut line = format!("[{}] score {}", lead.platform, lead.lead_score);
    if let Some(category) = &lead.category {
        line.push_str(&format!(" · {category}"));
    }
    if let Some(summary) = &lead.summary {
        line.push('\n');
        line.push_str(summary);
    }
    line
}

fn slack(n: &Notification) -> Value {
    let mut blocks = vec![json!({
        "type": "header",
        "text": {"type": "plain_text", "text": n.headline()}
    })];
    for lead in &n.leads {
        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("*<{}|{}>*\n{}", lead.source_url, lead.title, lead_line(lead))
            }
        }));
    }
    json!({ "text": n.headline(), "blocks": blocks })
}

fn discord(n: &Notification) -> Value {
    let fields: Vec<Value> = n
        .leads
        .iter()
        .take(MAX_EMBED_FIELDS)
        .map(|lead| {
            json!({
                "name": lead.title,
                "value": format!("{}\n{}", lead_line(lead), lead.source_url),
                "inline": false
            })
        })
        .collect();
    let mut description = format!("Monitor: {}", n.monitor_name);
    if n.leads.len() > MAX_EMBED_FIELDS {
        description.push_str(&format!(
            "\n+{} more not shown",
            n.leads.len() - MAX_EMBED_FIELDS
        ));
    }
    json!({
        "content": n.headline(),
        "embeds": [{
            "title": n.headline(),
            "description": description,
            "color": DISCORD_COLOR,
            "timestamp": n.created_at.to_rfc3339(),
            "fields": fields
        }]
    })
}
