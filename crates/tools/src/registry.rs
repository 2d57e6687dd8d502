//! Declarative tool catalog: name → invoker, populated once at startup from
//! the in-process tools and externally discovered tool-server tools, then
//! immutable.

use std::collections::BTreeMap;
use std::sync::Arc;

use fin_domain::plan::ToolSelection;
use fin_domain::tool::ToolDefinition;

use crate::Tool;

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Later registrations win on name collision — a
    /// tool-server tool may shadow a built-in of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous entry replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tools matching the selection, in registry (name) order.
    pub fn list_by_selection(&self, selection: &ToolSelection) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|(name, _)| selection.permits(name))
            .map(|(_, tool)| tool.clone())
            .collect()
    }

    /// Definitions for the selection — what the agent runner hands the LLM.
    pub fn definitions_for(&self, selection: &ToolSelection) -> Vec<ToolDefinition> {
        self.list_by_selection(selection)
            .iter()
            .map(|t| t.definition())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fin_domain::Result;

    struct Stub(&'static str);

    #[async_trait]
    impl Tool for Stub {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.0.into(),
                description: String::new(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }
        }
        async fn invoke(&self, _args: serde_json::Value) -> Result<String> {
            Ok(format!("{} ran", self.0))
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        for name in ["get_stock_info", "get_stock_history", "calculate", "web_search"] {
            reg.register(Arc::new(Stub(name)));
        }
        reg
    }

    #[test]
    fn named_selection_filters() {
        let reg = registry();
        let selection = ToolSelection::named(["get_stock_info", "calculate"]);
        let names: Vec<String> = reg
            .list_by_selection(&selection)
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, vec!["calculate", "get_stock_info"]);
    }

    #[test]
    fn all_selection_lists_everything() {
        let reg = registry();
        assert_eq!(reg.list_by_selection(&ToolSelection::All).len(), 4);
    }

    #[test]
    fn empty_selection_lists_nothing() {
        let reg = registry();
        assert!(reg.list_by_selection(&ToolSelection::none()).is_empty());
    }

    #[test]
    fn unknown_names_in_selection_are_ignored() {
        let reg = registry();
        let selection = ToolSelection::named(["calculate", "no_such_tool"]);
        assert_eq!(reg.list_by_selection(&selection).len(), 1);
    }
}
