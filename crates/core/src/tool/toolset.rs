use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use copilot_model::ModelTool;
use serde_json::Value;

use super::object::{ToolObject, ToolObjectImpl};
use super::{Error, Tool, ToolContext};

/// A registry of tools, keyed by name.
///
/// Registering a tool with a name that is already taken replaces the
/// previous one.
#[derive(Clone, Default)]
pub struct Toolset {
    tools: BTreeMap<String, Arc<dyn ToolObject>>,
}

impl Toolset {
    /// Creates an empty toolset.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    pub fn add<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_owned();
        self.tools.insert(name, Arc::new(ToolObjectImpl(tool)));
    }

    /// Registers a tool, builder style.
    #[inline]
    pub fn with<T: Tool>(mut self, tool: T) -> Self {
        self.add(tool);
        self
    }

    /// Returns `true` if the named tool is registered and needs a human
    /// decision before it runs.
    #[inline]
    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .is_some_and(|tool| tool.requires_confirmation())
    }

    /// Returns the names of all registered tools, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Returns the definitions sent to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools
            .values()
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect()
    }

    /// Starts a call on its own task and returns the value to record as
    /// its result.
    ///
    /// The call starts running immediately, even if the returned future is
    /// never polled. Failures, including a panicking tool, become an error
    /// payload.
    pub fn run(
        &self,
        name: &str,
        arguments: Value,
        ctx: &ToolContext,
    ) -> impl Future<Output = Value> + Send + use<> {
        let task = match self.tools.get(name) {
            Some(tool) => {
                trace!("spawning a tool ({name}) with args: {arguments:?}");
                Ok(tokio::spawn(tool.execute(arguments, ctx)))
            }
            None => {
                warn!("tool not found: {name}");
                Err(Error::not_found()
                    .with_reason(format!("tool not found: {name}")))
            }
        };
        async move {
            let result = match task {
                Ok(task) => task.await.unwrap_or_else(|err| {
                    error!("tool task failed: {err}");
                    Err(Error::execution_error()
                        .with_reason(format!("tool task failed: {err}")))
                }),
                Err(err) => Err(err),
            };
            match result {
                Ok(value) => value,
                Err(err) => {
                    debug!("tool call failed: {err}");
                    err.to_payload()
                }
            }
        }
    }
}

impl Debug for Toolset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tools.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::tool::ToolResult;

    static EMPTY_SCHEMA: Value = Value::Null;

    #[derive(Deserialize)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    struct AddTool;

    impl Tool for AddTool {
        type Input = AddInput;

        fn name(&self) -> &str {
            "add"
        }

        fn description(&self) -> &str {
            "Adds two numbers"
        }

        fn parameter_schema(&self) -> &Value {
            &EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
            _ctx: &ToolContext,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(json!(input.a + input.b)))
        }
    }

    struct PanicTool;

    impl Tool for PanicTool {
        type Input = Value;

        fn name(&self) -> &str {
            "panic"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn parameter_schema(&self) -> &Value {
            &EMPTY_SCHEMA
        }

        fn requires_confirmation(&self) -> bool {
            true
        }

        fn execute(
            &self,
            _input: Self::Input,
            _ctx: &ToolContext,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            async { explode() }
        }
    }

    fn explode() -> ToolResult {
        panic!("boom")
    }

    fn toolset() -> Toolset {
        Toolset::new().with(PanicTool).with(AddTool)
    }

    #[test]
    fn test_definitions() {
        let toolset = toolset();
        let names: Vec<_> =
            toolset.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["add", "panic"]);
        assert!(toolset.requires_confirmation("panic"));
        assert!(!toolset.requires_confirmation("add"));
        assert!(!toolset.requires_confirmation("missing"));
    }

    #[tokio::test]
    async fn test_run() {
        let toolset = toolset();
        let ctx = ToolContext::detached("test");

        let value = toolset.run("add", json!({ "a": 2, "b": 3 }), &ctx).await;
        assert_eq!(value, json!(5));

        let value = toolset.run("add", json!({ "a": "two" }), &ctx).await;
        let text = value.as_str().unwrap();
        assert!(text.starts_with("Error: invalid arguments: "), "{text}");

        let value = toolset.run("subtract", json!({}), &ctx).await;
        assert_eq!(value, json!("Error: tool not found: subtract"));

        let value = toolset.run("panic", json!({}), &ctx).await;
        let text = value.as_str().unwrap();
        assert!(text.starts_with("Error: tool task failed"), "{text}");
    }
}
