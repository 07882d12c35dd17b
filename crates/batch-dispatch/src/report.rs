//! Per-account dispatch outcomes

use std::collections::BTreeMap;

use serde::Serialize;

/// Why one account's task did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum AccountTaskFailure {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("timed out after {0}ms")]
    TimedOut(u64),

    /// The task panicked or was cancelled before producing an outcome
    #[error("task aborted: {0}")]
    Aborted(String),
}

/// Result of one account's task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountOutcome {
    Succeeded,
    Failed { failure: AccountTaskFailure },
}

impl AccountOutcome {
    /// Outcome label for metrics and logging.
    pub fn label(&self) -> &'static str {
        match self {
            AccountOutcome::Succeeded => "succeeded",
            AccountOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AccountOutcome::Succeeded)
    }
}

/// Outcome of every account in one dispatch, keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DispatchReport {
    outcomes: BTreeMap<String, AccountOutcome>,
}

impl DispatchReport {
    pub(crate) fn record(&mut self, identifier: &str, outcome: AccountOutcome) {
        self.outcomes.insert(identifier.to_string(), outcome);
    }

    pub fn get(&self, identifier: &str) -> Option<&AccountOutcome> {
        self.outcomes.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AccountOutcome)> {
        self.outcomes.iter().map(|(id, outcome)| (id.as_str(), outcome))
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.len() - self.succeeded_count()
    }

    /// Identifiers and reasons of every failed account.
    pub fn failures(&self) -> Vec<(&str, &AccountTaskFailure)> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                AccountOutcome::Failed { failure } => Some((id.as_str(), failure)),
                AccountOutcome::Succeeded => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_per_account_status() {
        let mut report = DispatchReport::default();
        report.record("a1", AccountOutcome::Succeeded);
        report.record(
            "a2",
            AccountOutcome::Failed {
                failure: AccountTaskFailure::Upload("exit status: 1".into()),
            },
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["a1"]["status"], "succeeded");
        assert_eq!(json["a2"]["status"], "failed");
        assert_eq!(json["a2"]["failure"]["kind"], "upload");
        assert_eq!(json["a2"]["failure"]["reason"], "exit status: 1");
    }

    #[test]
    fn counts_and_failures() {
        let mut report = DispatchReport::default();
        report.record("a1", AccountOutcome::Succeeded);
        report.record(
            "a2",
            AccountOutcome::Failed {
                failure: AccountTaskFailure::TimedOut(500),
            },
        );
        report.record("a3", AccountOutcome::Succeeded);

        assert_eq!(report.len(), 3);
        assert_eq!(report.succeeded_count(), 2);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(
            report.failures(),
            vec![("a2", &AccountTaskFailure::TimedOut(500))]
        );
    }
}
