// Payload tools that need no I/O

use super::{non_empty, ParameterSpec, Tool, ToolContext, ToolOutput, ToolSchema};
use crate::error::ToolError;
use crate::types::{Parameters, RunState};

pub const PASS_THROUGH: &str = "pass_through";
pub const FORMAT_REPORT: &str = "format_report";

const REPORT_BANNER: &str = "Final Report:\n\n";

/// Identity on `primary`; a non-empty `query` parameter replaces the payload
pub struct PassThroughTool;

#[async_trait::async_trait]
impl Tool for PassThroughTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: PASS_THROUGH.to_string(),
            description: "Capture the user's input query.".to_string(),
            parameters: vec![ParameterSpec::text("query", "Input Query")],
        }
    }

    async fn invoke(
        &self,
        state: RunState,
        parameters: &Parameters,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let output = non_empty(parameters, "query")
            .unwrap_or(state.primary.as_str())
            .to_string();
        Ok(ToolOutput::new(state, output))
    }
}

/// Wraps the payload in a report banner
pub struct FormatReportTool;

#[async_trait::async_trait]
impl Tool for FormatReportTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: FORMAT_REPORT.to_string(),
            description: "Format the final output as a report.".to_string(),
            parameters: vec![ParameterSpec::textarea("data", "Data")],
        }
    }

    async fn invoke(
        &self,
        state: RunState,
        parameters: &Parameters,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let data = non_empty(parameters, "data").unwrap_or(state.primary.as_str());
        let output = format!("{}{}", REPORT_BANNER, data);
        Ok(ToolOutput::new(state, output))
    }
}
