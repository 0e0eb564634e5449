use chrono::{DateTime, FixedOffset, Local, Utc};
use copilot_core::tool::{Error as ToolError, Tool, ToolContext, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};

/// Input of [`GetLocalTimeTool`].
#[derive(Deserialize, JsonSchema)]
pub struct GetLocalTimeParameters {
    #[schemars(description = "The place the user is asking about.")]
    location: String,
    #[schemars(
        description = "Offset from UTC in minutes if known, e.g. 540 for Tokyo. \
                       The server's own time zone is used when omitted."
    )]
    #[serde(default)]
    utc_offset_minutes: Option<i32>,
}

/// A tool that tells the current time for a location.
pub struct GetLocalTimeTool {
    parameter_schema: Value,
}

impl GetLocalTimeTool {
    /// Creates a new local time tool.
    #[inline]
    pub fn new() -> Self {
        Self {
            parameter_schema: schema_for!(GetLocalTimeParameters).to_value(),
        }
    }
}

impl Default for GetLocalTimeTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for GetLocalTimeTool {
    type Input = GetLocalTimeParameters;

    fn name(&self) -> &str {
        "get_local_time"
    }

    fn description(&self) -> &str {
        "Get the current local date and time for a location."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: GetLocalTimeParameters,
        _ctx: &ToolContext,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async move { local_time(input, Utc::now()) }
    }
}

fn local_time(input: GetLocalTimeParameters, now: DateTime<Utc>) -> ToolResult {
    let time = match input.utc_offset_minutes {
        Some(minutes) => {
            let offset = minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| {
                    ToolError::invalid_input().with_reason(format!(
                        "utc offset out of range: {minutes} minutes"
                    ))
                })?;
            now.with_timezone(&offset)
        }
        None => now.with_timezone(&Local).fixed_offset(),
    };
    Ok(json!({
        "location": input.location,
        "time": time.to_rfc3339(),
        "utc_offset": time.offset().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn input(offset: Option<i32>) -> GetLocalTimeParameters {
        GetLocalTimeParameters {
            location: "Tokyo".to_owned(),
            utc_offset_minutes: offset,
        }
    }

    #[test]
    fn test_fixed_offset() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        let result = local_time(input(Some(540)), now).unwrap();
        assert_eq!(result["location"], "Tokyo");
        assert_eq!(result["time"], "2026-03-02T08:30:00+09:00");
        assert_eq!(result["utc_offset"], "+09:00");
    }

    #[test]
    fn test_offset_out_of_range() {
        let err = local_time(input(Some(60 * 48)), Utc::now()).unwrap_err();
        assert!(err.reason().contains("out of range"));
    }

    #[tokio::test]
    async fn test_execute_without_offset() {
        let tool = GetLocalTimeTool::new();
        let ctx = ToolContext::detached("test");
        let result = tool.execute(input(None), &ctx).await.unwrap();
        assert!(result["time"].as_str().is_some());
    }
}
