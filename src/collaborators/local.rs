//! 进程内协作者
//!
//! CLI 与集成测试使用的本地实现：内存任务表（同时充当任务创建处理器与“已有任务”查询）、
//! 基于时间段的本地日程整理、离线外部工具、以及基于 LLM 的对话回复。

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveTime};
use serde_json::json;

use crate::collaborators::traits::{ActionContext, ActionHandler, TaskInventory};
use crate::config::ToolsSection;
use crate::dispatch::aggregator::truncate_chars;
use crate::dispatch::types::{ActionKind, ActionPayload, ActionResult, CreatedTask, ToolType};
use crate::llm::{LlmClient, Message};

const TASK_TITLE_MAX_CHARS: usize = 30;

/// 内存任务表
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<Vec<CreatedTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: CreatedTask) -> anyhow::Result<()> {
        self.tasks
            .lock()
            .map_err(|e| anyhow!("task store poisoned: {e}"))?
            .push(task);
        Ok(())
    }

    pub fn tasks_on(&self, date: NaiveDate) -> anyhow::Result<Vec<CreatedTask>> {
        let tasks = self
            .tasks
            .lock()
            .map_err(|e| anyhow!("task store poisoned: {e}"))?;
        Ok(tasks
            .iter()
            .filter(|t| t.date == Some(date))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskInventory for InMemoryTaskStore {
    async fn has_existing_tasks_today(&self, _text: &str) -> anyhow::Result<bool> {
        Ok(!self.tasks_on(Local::now().date_naive())?.is_empty())
    }
}

#[async_trait]
impl ActionHandler for InMemoryTaskStore {
    async fn execute(&self, ctx: ActionContext) -> anyhow::Result<ActionResult> {
        let ActionPayload::TaskCreation { time_info } = &ctx.action.payload else {
            bail!("unexpected payload for {}", ctx.kind());
        };

        let title = truncate_chars(ctx.text.trim(), TASK_TITLE_MAX_CHARS);
        if title.is_empty() {
            bail!("cannot create a task without a title");
        }
        let task = CreatedTask {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            title,
            date: time_info.date,
            time_block: time_info.time_block,
            specific_time: time_info.specific_time,
        };
        self.insert(task.clone())?;
        tracing::info!(task_id = %task.id, title = %task.title, "task created");
        Ok(ActionResult::TaskCreated { task })
    }
}

/// 按时间段整理目标日期的任务
pub struct LocalSchedulePlanner {
    store: Arc<InMemoryTaskStore>,
}

impl LocalSchedulePlanner {
    pub fn new(store: Arc<InMemoryTaskStore>) -> Self {
        Self { store }
    }
}

fn slot_label(task: &CreatedTask) -> String {
    match (task.specific_time, task.time_block) {
        (Some(t), _) => t.format("%H:%M").to_string(),
        (None, Some(block)) => {
            let (start, end) = block.window();
            format!("{start}-{end}")
        }
        (None, None) => "待定".to_string(),
    }
}

fn slot_start(task: &CreatedTask) -> Option<NaiveTime> {
    task.specific_time.or_else(|| {
        task.time_block
            .and_then(|b| NaiveTime::parse_from_str(b.window().0, "%H:%M").ok())
    })
}

#[async_trait]
impl ActionHandler for LocalSchedulePlanner {
    async fn execute(&self, ctx: ActionContext) -> anyhow::Result<ActionResult> {
        let ActionPayload::SchedulePlanning {
            target_date,
            emotional_state,
        } = &ctx.action.payload
        else {
            bail!("unexpected payload for {}", ctx.kind());
        };

        let mut tasks = self.store.tasks_on(*target_date)?;
        if tasks.is_empty() {
            return Ok(ActionResult::SchedulePlanned {
                adjusted: false,
                note: Some(format!("{target_date} 没有需要安排的任务")),
            });
        }
        // 未定时的任务排在最后
        tasks.sort_by_key(|t| (slot_start(t).is_none(), slot_start(t)));

        let mut note = tasks
            .iter()
            .map(|t| format!("{} {}", slot_label(t), t.title))
            .collect::<Vec<_>>()
            .join("；");
        if emotional_state.is_negative() {
            note.push_str("。任务之间留出休息时间");
        }
        Ok(ActionResult::SchedulePlanned {
            adjusted: true,
            note: Some(note),
        })
    }
}

/// 离线外部工具：时间查询本地完成，路线只给出起止点，天气需要外部服务
pub struct OfflineToolHandler {
    tools: ToolsSection,
}

impl OfflineToolHandler {
    pub fn new(tools: ToolsSection) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl ActionHandler for OfflineToolHandler {
    async fn execute(&self, ctx: ActionContext) -> anyhow::Result<ActionResult> {
        let ActionPayload::ExternalTool {
            tool, destination, ..
        } = &ctx.action.payload
        else {
            bail!("unexpected payload for {}", ctx.kind());
        };

        let data = match tool {
            ToolType::Time => {
                let now = Local::now();
                json!({
                    "now": now.to_rfc3339(),
                    "summary": now.format("现在是 %Y-%m-%d %H:%M").to_string(),
                })
            }
            ToolType::Route => {
                let destination = destination
                    .clone()
                    .unwrap_or_else(|| self.tools.default_destination.clone());
                json!({
                    "origin": self.tools.route_origin,
                    "destination": destination,
                    "summary": format!("从{}到{}（离线模式，无实时路况）", self.tools.route_origin, destination),
                })
            }
            ToolType::Weather => {
                bail!("weather provider not configured for {}", self.tools.default_city)
            }
            ToolType::Unknown => bail!("no tool matches this request"),
        };
        Ok(ActionResult::ToolInvoked { tool: *tool, data })
    }
}

/// 对话回复：结合情绪与前序动作结果生成简短回复
pub struct LlmConversationHandler {
    llm: Arc<dyn LlmClient>,
    assistant_name: String,
}

impl LlmConversationHandler {
    pub fn new(llm: Arc<dyn LlmClient>, assistant_name: impl Into<String>) -> Self {
        Self {
            llm,
            assistant_name: assistant_name.into(),
        }
    }
}

#[async_trait]
impl ActionHandler for LlmConversationHandler {
    async fn execute(&self, ctx: ActionContext) -> anyhow::Result<ActionResult> {
        let ActionPayload::Conversation { emotional_state } = &ctx.action.payload else {
            bail!("unexpected payload for {}", ctx.kind());
        };

        let done: Vec<String> = ctx
            .prior
            .values()
            .filter(|o| o.kind != ActionKind::Conversation)
            .map(|o| {
                let status = if o.is_success() { "已完成" } else { "未完成" };
                format!("{} {status}", o.kind)
            })
            .collect();

        let system = format!(
            "你是{}，一个温暖的个人助理。用一两句话回应用户，关注对方的感受，不要重复任务细节。",
            self.assistant_name
        );
        let user = format!(
            "用户说：\"{}\"\n用户情绪：{emotional_state}\n其他服务：{}",
            ctx.text,
            if done.is_empty() { "无".to_string() } else { done.join("，") }
        );

        let reply = self
            .llm
            .complete(&[Message::system(system), Message::user(user)])
            .await
            .map_err(|e| anyhow!(e))
            .context("conversation reply failed")?;
        let reply = reply.trim();
        if reply.is_empty() {
            bail!("conversation reply was empty");
        }
        Ok(ActionResult::Conversed {
            reply: reply.to_string(),
        })
    }
}
