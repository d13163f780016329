//! 提示词：内置默认值，可被 `<prompts_dir>/{system,fragment_title,response}.md` 覆盖
//!
//! 代码代理的 system prompt 末尾自动追加工具调用格式与工具目录。

use std::path::Path;

use crate::tools::{tool_call_schema_json, tool_catalog_json};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a senior software engineer working in a sandboxed Next.js environment.

Environment:
- Writable file system via createOrUpdateFiles; read existing files via readFiles.
- Command execution via terminal (use \"npm install <package> --yes\" to add packages).
- All file paths are relative to the project root (for example \"app/page.tsx\"). Never use absolute paths.
- The development server is already running on port 3000 with hot reload. Do not run dev, build or start scripts.

Rules:
- Build complete, production-quality features; no placeholders or TODOs.
- Think step by step and use the tools to create or modify every file you need.
- Do not print code inline in your reply; write it to files with createOrUpdateFiles.

Final output (MANDATORY):
After ALL tool calls are complete and the task is fully finished, respond with exactly the following format and NOTHING else:

<task_summary>
A short, high-level summary of what was created or changed.
</task_summary>

Print this once, only at the very end, never during or between tool usage.";

pub const DEFAULT_FRAGMENT_TITLE_PROMPT: &str = "You are an assistant that generates a short, descriptive title for a code fragment based on its <task_summary>.
The title should be:
- Relevant to what was built or changed
- Max 3 words
- Written in title case (e.g., \"Landing Page\", \"Chat Widget\")
- No punctuation, quotes, or prefixes

Only return the raw title.";

pub const DEFAULT_RESPONSE_PROMPT: &str = "You are the final agent in a multi-agent system.
Your job is to generate a short, user-friendly message explaining what was just built, based on the <task_summary> provided by the other agents.
The application is a custom Next.js app tailored to the user's request.
Reply in a casual tone, as if you're wrapping up the process for the user. No need to mention the <task_summary> tag.
Your message should be 1 to 3 sentences, describing what the app does or what was changed, as if you're saying \"Here's what I built for you.\"
Do not add code, tags, or metadata. Only return the plain text response.";

/// 三个代理的提示词
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system: String,
    pub fragment_title: String,
    pub response: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            fragment_title: DEFAULT_FRAGMENT_TITLE_PROMPT.to_string(),
            response: DEFAULT_RESPONSE_PROMPT.to_string(),
        }
    }
}

impl Prompts {
    /// 从目录加载，缺失或为空的文件使用内置默认
    pub fn load(dir: &Path) -> Self {
        Self {
            system: load_or(dir, "system.md", DEFAULT_SYSTEM_PROMPT),
            fragment_title: load_or(dir, "fragment_title.md", DEFAULT_FRAGMENT_TITLE_PROMPT),
            response: load_or(dir, "response.md", DEFAULT_RESPONSE_PROMPT),
        }
    }

    /// 代码代理 system prompt（附工具说明）
    pub fn code_agent_system(&self, marker: &str) -> String {
        let mut out = self.system.clone();
        if !out.contains(marker) {
            out.push_str(&format!(
                "\n\nWhen the task is complete, reply with a message containing {marker} followed by a short summary."
            ));
        }
        out.push_str("\n\n## Tools\n\nTo call a tool, reply with a JSON object (or a JSON array of them) matching this schema:\n\n```json\n");
        out.push_str(&tool_call_schema_json());
        out.push_str("\n```\n\nAvailable tools:\n\n```json\n");
        out.push_str(&tool_catalog_json());
        out.push_str("\n```\n\nEach tool result is returned to you as an \"Observation from <tool>\" message.");
        out
    }
}

fn load_or(dir: &Path, file: &str, default: &str) -> String {
    let path = dir.join(file);
    match std::fs::read_to_string(&path) {
        Ok(s) if !s.trim().is_empty() => s,
        Ok(_) => default.to_string(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "prompt file not loaded, using built-in");
            default.to_string()
        }
    }
}
