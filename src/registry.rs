use crate::error::{Error, Result};
use crate::tool::{Tool, ToolType};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Index of tools by name and by [`ToolType`].
///
/// Pure bookkeeping: nothing here executes a tool.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    by_type: BTreeMap<ToolType, BTreeSet<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>, tool_type: ToolType) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }
        self.by_type.entry(tool_type).or_default().insert(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    pub fn get_by_type(&self, tool_type: ToolType) -> Vec<Arc<dyn Tool>> {
        self.by_type
            .get(&tool_type)
            .into_iter()
            .flatten()
            .filter_map(|name| self.tools.get(name).cloned())
            .collect()
    }

    /// Resolve `names` in order, failing on the first unknown one.
    pub fn select(&self, names: &[&str]) -> Result<Vec<Arc<dyn Tool>>> {
        names.iter().map(|name| self.get(name)).collect()
    }

    pub fn unregister(&mut self, name: &str) {
        if self.tools.remove(name).is_none() {
            return;
        }
        self.by_type.retain(|_, names| {
            names.remove(name);
            !names.is_empty()
        });
    }

    /// Registered tool names, sorted.
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_types(&self) -> Vec<ToolType> {
        self.by_type.keys().copied().collect()
    }
}
