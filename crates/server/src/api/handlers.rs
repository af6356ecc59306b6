use super::{ApiError, ApiResult};
use crate::config::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use toolgraph_core::{
    tools::ToolSchema,
    types::{NodeExecution, RunId},
    workflow::Graph,
};

const DEFAULT_WORKFLOW_ID: &str = "workflow1";

fn default_workflow_id() -> String {
    DEFAULT_WORKFLOW_ID.to_string()
}

/// List the tools nodes can reference
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolSchema>> {
    Json(state.engine.registry().list_schemas())
}

/// List saved workflow ids
pub async fn list_workflows(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ListWorkflowsResponse>> {
    let workflows = state.store.list_ids().await?;
    Ok(Json(ListWorkflowsResponse { workflows }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListWorkflowsResponse {
    pub workflows: Vec<String>,
}

/// Get a saved workflow description
pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let workflow = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workflow not found: {}", id)))?;

    Ok(Json(workflow))
}

/// Save a workflow description
pub async fn save_workflow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveWorkflowRequest>,
) -> ApiResult<Json<SaveWorkflowResponse>> {
    let description = serde_json::json!({
        "nodes": req.nodes,
        "edges": req.edges,
    });

    // Only the shape is checked here; editors save work in progress
    Graph::build(&description)?;

    state.store.save(&req.id, description).await?;

    Ok(Json(SaveWorkflowResponse {
        message: "Workflow saved".to_string(),
        id: req.id,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveWorkflowRequest {
    #[serde(default = "default_workflow_id")]
    pub id: String,
    pub nodes: Value,
    #[serde(default = "empty_edges")]
    pub edges: Value,
}

fn empty_edges() -> Value {
    Value::Array(Vec::new())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveWorkflowResponse {
    pub message: String,
    pub id: String,
}

/// Execute a saved or inline workflow
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteWorkflowRequest>,
) -> ApiResult<Json<ExecuteWorkflowResponse>> {
    let description = match req.workflow {
        Some(inline) => inline,
        None => {
            let id = req.workflow_id.unwrap_or_else(default_workflow_id);
            state
                .store
                .get(&id)
                .await?
                .ok_or_else(|| ApiError::not_found(format!("Workflow not found: {}", id)))?
        }
    };

    let result = state
        .engine
        .execute(&description, &req.input, state.sink.as_ref())
        .await?;

    Ok(Json(ExecuteWorkflowResponse {
        result: result.final_output,
        run_id: result.run_id,
        nodes: result.nodes,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteWorkflowRequest {
    #[serde(rename = "workflowId", default)]
    pub workflow_id: Option<String>,
    /// Description to run without saving it first; takes precedence over `workflowId`
    #[serde(default)]
    pub workflow: Option<Value>,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteWorkflowResponse {
    pub result: String,
    pub run_id: RunId,
    pub nodes: Vec<NodeExecution>,
}
