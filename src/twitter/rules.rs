// Filtered-stream rule management.
//
// Rules are never diffed: on startup every existing rule is deleted and a
// single fresh rule is built from the subscription registry. That keeps the
// server-side filter reproducible no matter what a previous run left behind.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::client::{TwitterClient, RULES_PATH};
use crate::error::{MirrorError, Result};
use crate::subscriptions::Subscriptions;

/// Longest rule expression the platform accepts on the standard tier.
pub const MAX_RULE_LENGTH: usize = 512;

/// A rule as installed on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// A rule before the server has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRule {
    pub value: String,
    pub tag: String,
}

#[derive(Debug, Deserialize)]
struct RulesResponse {
    #[serde(default)]
    data: Vec<Rule>,
}

#[derive(Serialize)]
struct AddRules<'a> {
    add: &'a [NewRule],
}

#[derive(Serialize)]
struct DeleteRules<'a> {
    delete: DeleteIds<'a>,
}

#[derive(Serialize)]
struct DeleteIds<'a> {
    ids: &'a [String],
}

pub struct RuleManager {
    client: TwitterClient,
    subscriptions: Arc<Subscriptions>,
}

impl RuleManager {
    pub fn new(client: TwitterClient, subscriptions: Arc<Subscriptions>) -> Self {
        Self {
            client,
            subscriptions,
        }
    }

    /// Fetch every rule currently installed for this app.
    pub async fn fetch_rules(&self) -> Result<Vec<Rule>> {
        let response: RulesResponse = self
            .client
            .get_json("stream rules", RULES_PATH, &[])
            .await?;
        Ok(response.data)
    }

    /// Delete rules by id. An empty list makes no request.
    pub async fn delete_rules(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.client
            .post_json(
                "delete stream rules",
                RULES_PATH,
                &DeleteRules {
                    delete: DeleteIds { ids },
                },
                StatusCode::OK,
            )
            .await?;
        info!(count = ids.len(), "Deleted stream rules");
        Ok(())
    }

    /// Create rules, failing unless the server confirms every one of them.
    pub async fn create_rules(&self, rules: &[NewRule]) -> Result<Vec<Rule>> {
        let response = self
            .client
            .post_json(
                "add stream rules",
                RULES_PATH,
                &AddRules { add: rules },
                StatusCode::CREATED,
            )
            .await?;
        let status = response.status().as_u16();
        let created: RulesResponse = response.json().await?;

        if created.data.len() != rules.len() {
            return Err(MirrorError::Protocol {
                endpoint: "add stream rules".to_string(),
                status,
                body: format!(
                    "expected {} rules created, server acknowledged {}",
                    rules.len(),
                    created.data.len()
                ),
            });
        }
        Ok(created.data)
    }

    /// One rule matching posts from every subscribed handle.
    pub fn build_rule(&self, tag: &str) -> NewRule {
        build_rule(&self.subscriptions, tag)
    }

    /// Startup sequence: fetch, delete everything, create exactly one rule.
    pub async fn reset(&self, tag: &str) -> Result<Vec<Rule>> {
        let existing = self.fetch_rules().await?;
        let ids: Vec<String> = existing.into_iter().map(|r| r.id).collect();
        self.delete_rules(&ids).await?;

        let rules = self.create_rules(&[self.build_rule(tag)]).await?;
        for rule in &rules {
            info!(id = %rule.id, value = %rule.value, "Listening on rule");
        }
        Ok(rules)
    }
}

/// Build the OR-of-authors rule expression for a registry.
pub fn build_rule(subscriptions: &Subscriptions, tag: &str) -> NewRule {
    let value = subscriptions
        .handles()
        .map(|handle| format!("from:{handle}"))
        .collect::<Vec<_>>()
        .join(" OR ");

    if value.chars().count() > MAX_RULE_LENGTH {
        warn!(
            length = value.chars().count(),
            max = MAX_RULE_LENGTH,
            "Rule expression is longer than the platform usually accepts"
        );
    }

    NewRule {
        value,
        tag: tag.to_string(),
    }
}
