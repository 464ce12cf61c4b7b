//! Shape check for the contributor build-log payload.
//!
//! Only the top-level collections and the required task fields are checked.
//! Everything else is passed through untouched.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub github_url: String,
    pub category: Vec<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildLogData {
    pub cycles: Vec<Value>,
    pub tasks: Vec<Task>,
    pub hats: Vec<Value>,
    pub leaderboard: Vec<Value>,
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn array(map: &Map<String, Value>, key: &str) -> Option<Vec<Value>> {
    match map.get(key) {
        Some(Value::Array(items)) => Some(items.clone()),
        _ => {
            error!(field = key, "invalid build log: {key} must be an array");
            None
        }
    }
}

fn task(value: &Value) -> Option<Task> {
    let Some(obj) = value.as_object() else {
        error!(task = %value, "invalid build log task: not an object");
        return None;
    };
    let has_required = truthy(obj.get("id"))
        && truthy(obj.get("title"))
        && truthy(obj.get("githubUrl"))
        && matches!(obj.get("category"), Some(Value::Array(_)));
    if !has_required {
        error!(task = %value, "invalid build log task: missing required fields");
        return None;
    }

    let mut rest = obj.clone();
    let id = rest.remove("id").map(|v| text(&v))?;
    let title = rest.remove("title").map(|v| text(&v))?;
    let github_url = rest.remove("githubUrl").map(|v| text(&v))?;
    let category = match rest.remove("category") {
        Some(Value::Array(items)) => items,
        _ => return None,
    };
    Some(Task {
        id,
        title,
        github_url,
        category,
        rest,
    })
}

/// Accept the payload only if every collection and every task is well formed
pub fn validate(value: &Value) -> Option<BuildLogData> {
    let Some(map) = value.as_object() else {
        error!("invalid build log: not an object");
        return None;
    };
    let cycles = array(map, "cycles")?;
    let raw_tasks = array(map, "tasks")?;
    let hats = array(map, "hats")?;
    let leaderboard = array(map, "leaderboard")?;

    let tasks = raw_tasks.iter().map(task).collect::<Option<Vec<_>>>()?;
    Some(BuildLogData {
        cycles,
        tasks,
        hats,
        leaderboard,
    })
}
