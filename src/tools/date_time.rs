//! Current date and time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{Tool, ToolSpec};

/// Human-readable GMT timestamp handed to the model.
pub fn current_date_and_time(now: DateTime<Utc>) -> String {
    format!(
        "Current date is {}, and time {} (GMT)",
        now.format("%A, %B %d, %Y"),
        now.format("%H:%M:%S")
    )
}

pub struct CurrentDateTime;

#[async_trait]
impl Tool for CurrentDateTime {
    fn name(&self) -> &str {
        "current_date_and_time"
    }

    fn description(&self) -> &str {
        "Returns the current date and time. The time is GMT; converting to another timezone is not supported."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<String> {
        Ok(current_date_and_time(Utc::now()))
    }
}

pub struct DateTimeToolSpec;

impl ToolSpec for DateTimeToolSpec {
    fn to_tool_list(&self) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(CurrentDateTime)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format() {
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 3).unwrap();
        assert_eq!(
            current_date_and_time(now),
            "Current date is Friday, March 07, 2025, and time 09:05:03 (GMT)"
        );
    }
}
