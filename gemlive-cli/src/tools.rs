//! Tools the terminal client offers the model.

use chrono::{FixedOffset, Utc};
use gemlive::{RealtimeError, ToolDefinition, ToolRegistry};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct CurrentTimeArgs {
    #[serde(default)]
    utc_offset_minutes: i32,
}

pub fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDefinition::new("current_time")
            .with_description("Current date and time, optionally in a fixed UTC offset")
            .with_parameters(json!({
                "type": "object",
                "properties": {
                    "utc_offset_minutes": {
                        "type": "integer",
                        "description": "Offset from UTC in minutes, e.g. 60 for UTC+1"
                    }
                }
            })),
        |args: CurrentTimeArgs| async move {
            let offset = FixedOffset::east_opt(args.utc_offset_minutes.saturating_mul(60))
                .ok_or_else(|| {
                    let minutes = args.utc_offset_minutes;
                    RealtimeError::tool(format!("offset {minutes} is out of range"))
                })?;
            let now = Utc::now().with_timezone(&offset);
            Ok::<_, RealtimeError>(json!({ "time": now.to_rfc3339() }))
        },
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemlive::FunctionCall;

    fn call(args: serde_json::Value) -> FunctionCall {
        FunctionCall { id: "c1".into(), name: "current_time".into(), args }
    }

    #[tokio::test]
    async fn test_current_time_with_offset() {
        let response = registry().dispatch(&call(json!({ "utc_offset_minutes": 330 }))).await;
        let time = response.response["time"].as_str().unwrap();
        assert!(time.ends_with("+05:30"), "{time}");
    }

    #[tokio::test]
    async fn test_current_time_rejects_bad_offset() {
        let response = registry().dispatch(&call(json!({ "utc_offset_minutes": 100_000 }))).await;
        assert!(response.response["error"].as_str().unwrap().contains("out of range"));
    }

    #[test]
    fn test_declared() {
        let names: Vec<_> = registry().declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["current_time"]);
    }
}
