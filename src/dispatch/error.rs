//! 调度错误分类
//!
//! - PlanError：计划结构非法（致命，执行前中止）
//! - ActionError：单个动作失败（在执行单元边界内恢复为 Failure 结果）
//! - DispatchError：返回给调用方的整体错误

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::types::ActionKind;

/// 计划结构错误；出现即说明路由策略或扩展代码有缺陷
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("action plan is empty")]
    Empty,

    #[error("duplicate action kind {0}")]
    DuplicateKind(ActionKind),

    #[error("{kind} action carries a {payload} payload")]
    PayloadMismatch {
        kind: ActionKind,
        payload: ActionKind,
    },

    #[error("{0} depends on itself")]
    SelfDependency(ActionKind),

    #[error("{kind} depends on {missing}, which is not in the plan")]
    MissingDependency {
        kind: ActionKind,
        missing: ActionKind,
    },

    #[error("cyclic dependency among {0:?}")]
    CyclicDependency(Vec<ActionKind>),

    #[error("{kind} (priority {priority}) depends on {dependency} (priority {dependency_priority}), which does not run in an earlier tier")]
    DependencyNotEarlier {
        kind: ActionKind,
        priority: u8,
        dependency: ActionKind,
        dependency_priority: u8,
    },
}

/// 单个动作的失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ActionError {
    #[error("{0}")]
    Handler(String),

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("no handler registered for {0}")]
    NoHandler(ActionKind),

    #[error("handler for {expected} returned a {actual} result")]
    MismatchedResult {
        expected: ActionKind,
        actual: ActionKind,
    },
}

/// 调度整体错误；PlanInvalid 应被上层视为 500 类内部错误
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid action plan: {0}")]
    PlanInvalid(#[from] PlanError),

    #[error("empty input")]
    EmptyInput,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_is_stable() {
        assert_eq!(ActionError::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_plan_error_converts_into_dispatch_error() {
        let err: DispatchError = PlanError::SelfDependency(ActionKind::Conversation).into();
        assert!(matches!(err, DispatchError::PlanInvalid(PlanError::SelfDependency(_))));
        assert!(err.to_string().contains("CONVERSATION depends on itself"));
    }
}
