//! Enumerated agent tools that the worker intercepts.

use serde_json::Value;

/// File-touching tools whose path argument is scope-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopedTool {
    Read,
    Write,
    Edit,
    Glob,
    Grep,
}

impl ScopedTool {
    pub const ALL: [ScopedTool; 5] = [
        ScopedTool::Read,
        ScopedTool::Write,
        ScopedTool::Edit,
        ScopedTool::Glob,
        ScopedTool::Grep,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScopedTool::Read => "Read",
            ScopedTool::Write => "Write",
            ScopedTool::Edit => "Edit",
            ScopedTool::Glob => "Glob",
            ScopedTool::Grep => "Grep",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    /// Tools that modify file contents.
    pub fn is_write(self) -> bool {
        matches!(self, ScopedTool::Write | ScopedTool::Edit)
    }

    /// Extract the path argument from a tool request.
    ///
    /// Read/Write/Edit carry `file_path`; Glob/Grep carry an optional `path`.
    /// Either key is accepted for any tool.
    pub fn path_arg(input: &Value) -> Option<&str> {
        ["file_path", "path"]
            .into_iter()
            .filter_map(|key| input.get(key).and_then(Value::as_str))
            .find(|s| !s.is_empty())
    }
}

/// Agent tool that updates a task's status in the native task list.
pub const TASK_UPDATE_TOOL: &str = "TaskUpdate";

/// A set of tool names a hook matcher fires on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolMatcher {
    /// The scoped file tools.
    Scoped(Vec<ScopedTool>),
    /// A single named tool.
    Named(&'static str),
}

impl ToolMatcher {
    pub fn scoped_file_tools() -> Self {
        ToolMatcher::Scoped(ScopedTool::ALL.to_vec())
    }

    pub fn matches(&self, tool_name: &str) -> bool {
        match self {
            ToolMatcher::Scoped(tools) => tools.iter().any(|tool| tool.as_str() == tool_name),
            ToolMatcher::Named(name) => *name == tool_name,
        }
    }

    /// Render as the agent's `A|B|C` matcher pattern.
    pub fn pattern(&self) -> String {
        match self {
            ToolMatcher::Scoped(tools) => tools
                .iter()
                .map(|tool| tool.as_str())
                .collect::<Vec<_>>()
                .join("|"),
            ToolMatcher::Named(name) => (*name).to_string(),
        }
    }
}
