pub mod basic;
pub mod filter;
pub mod http;
pub mod llm;
mod registry;

pub use basic::{FormatReportTool, PassThroughTool};
pub use filter::FilterByPathTool;
pub use http::HttpFetchTool;
pub use llm::{GenerateTextTool, OpenAiConfig, OpenAiGenerator, TextGenerator};
pub use registry::{
    ParameterKind, ParameterSpec, Tool, ToolContext, ToolOutput, ToolRegistry, ToolSchema,
};

use crate::types::Parameters;
use anyhow::Context;
use std::sync::Arc;

/// Names used by graphs saved from the original workflow editor
pub const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("input_query_tool", basic::PASS_THROUGH),
    ("output_report_tool", basic::FORMAT_REPORT),
    ("fetch_from_rest_api_tool", http::HTTP_FETCH),
    ("filter_context_tool", filter::FILTER_BY_PATH),
    ("llm_tool", llm::GENERATE_TEXT),
];

impl ToolRegistry {
    /// Registry holding every built-in tool plus the legacy aliases
    pub fn with_builtins(generator: Arc<dyn TextGenerator>) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(PassThroughTool));
        registry.register(Arc::new(FormatReportTool));
        registry.register(Arc::new(
            HttpFetchTool::new().context("Failed to create HTTP client")?,
        ));
        registry.register(Arc::new(FilterByPathTool));
        registry.register(Arc::new(GenerateTextTool::new(generator)));

        for (alias, target) in LEGACY_ALIASES {
            if let Err(e) = registry.register_alias(*alias, target) {
                tracing::warn!("Skipping tool alias {}: {}", alias, e);
            }
        }

        Ok(registry)
    }
}

/// A parameter's value, if present and not just whitespace
pub(crate) fn non_empty<'a>(parameters: &'a Parameters, name: &str) -> Option<&'a str> {
    parameters
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}
