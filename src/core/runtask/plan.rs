use serde_json::Value;

/// Headline numbers pulled from a JSON execution plan for logging.
///
/// The plan itself is never validated; missing or oddly shaped fields just
/// leave the corresponding counters at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub format_version: Option<String>,
    pub terraform_version: Option<String>,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub replace: usize,
    pub read: usize,
    pub no_op: usize,
}

impl PlanSummary {
    pub fn from_plan(plan: &Value) -> Self {
        let mut summary = PlanSummary {
            format_version: plan
                .get("format_version")
                .and_then(Value::as_str)
                .map(str::to_string),
            terraform_version: plan
                .get("terraform_version")
                .and_then(Value::as_str)
                .map(str::to_string),
            ..Default::default()
        };

        let changes = plan
            .get("resource_changes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for change in changes {
            let actions: Vec<&str> = change
                .pointer("/change/actions")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            match actions.as_slice() {
                ["create"] => summary.create += 1,
                ["update"] => summary.update += 1,
                ["delete"] => summary.delete += 1,
                ["read"] => summary.read += 1,
                ["no-op"] => summary.no_op += 1,
                ["delete", "create"] | ["create", "delete"] => summary.replace += 1,
                _ => {}
            }
        }

        summary
    }

    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.delete + self.replace
    }
}
