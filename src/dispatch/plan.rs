//! 动作计划与结构校验
//!
//! 使用邻接表和入度表做拓扑排序检查环；计划一经构造即不可变，只暴露只读访问。

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::dispatch::error::PlanError;
use crate::dispatch::types::{ActionKind, DetectedAction};

/// 经过校验的动作计划：非空、类型唯一、依赖只引用计划内类型且无环，按优先级稳定排序
#[derive(Debug, Clone, Serialize)]
pub struct ActionPlan {
    actions: Vec<DetectedAction>,
}

/// 同一优先级的一组动作
#[derive(Debug)]
pub struct Tier<'a> {
    pub priority: u8,
    pub actions: Vec<&'a DetectedAction>,
}

impl ActionPlan {
    pub fn new(mut actions: Vec<DetectedAction>) -> Result<Self, PlanError> {
        validate(&actions)?;
        actions.sort_by_key(|a| a.priority);
        Ok(Self { actions })
    }

    pub fn actions(&self) -> &[DetectedAction] {
        &self.actions
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        self.actions.iter().map(|a| a.kind).collect()
    }

    pub fn get(&self, kind: ActionKind) -> Option<&DetectedAction> {
        self.actions.iter().find(|a| a.kind == kind)
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// 按优先级升序分层
    pub fn tiers(&self) -> Vec<Tier<'_>> {
        let mut grouped: BTreeMap<u8, Vec<&DetectedAction>> = BTreeMap::new();
        for action in &self.actions {
            grouped.entry(action.priority).or_default().push(action);
        }
        grouped
            .into_iter()
            .map(|(priority, actions)| Tier { priority, actions })
            .collect()
    }

    /// 每条依赖都必须指向更早的层；同层或更晚层的依赖无法在启动前完成
    pub fn check_tier_order(&self) -> Result<(), PlanError> {
        for action in &self.actions {
            for dep in &action.depends_on {
                let dep_priority = self
                    .get(*dep)
                    .map(|d| d.priority)
                    .ok_or(PlanError::MissingDependency {
                        kind: action.kind,
                        missing: *dep,
                    })?;
                if dep_priority >= action.priority {
                    return Err(PlanError::DependencyNotEarlier {
                        kind: action.kind,
                        priority: action.priority,
                        dependency: *dep,
                        dependency_priority: dep_priority,
                    });
                }
            }
        }
        Ok(())
    }
}

/// 校验计划结构
pub fn validate(actions: &[DetectedAction]) -> Result<(), PlanError> {
    if actions.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut seen = HashSet::new();
    for action in actions {
        if !seen.insert(action.kind) {
            return Err(PlanError::DuplicateKind(action.kind));
        }
        let payload_kind = action.payload.kind();
        if payload_kind != action.kind {
            return Err(PlanError::PayloadMismatch {
                kind: action.kind,
                payload: payload_kind,
            });
        }
    }

    for action in actions {
        for dep in &action.depends_on {
            if *dep == action.kind {
                return Err(PlanError::SelfDependency(action.kind));
            }
            if !seen.contains(dep) {
                return Err(PlanError::MissingDependency {
                    kind: action.kind,
                    missing: *dep,
                });
            }
        }
    }

    check_acyclic(actions)
}

fn check_acyclic(actions: &[DetectedAction]) -> Result<(), PlanError> {
    // 邻接表：类型 -> 依赖它的类型；入度表：类型 -> 未满足的依赖数
    let mut adjacency: HashMap<ActionKind, Vec<ActionKind>> = HashMap::new();
    let mut in_degree: HashMap<ActionKind, usize> = HashMap::new();

    for action in actions {
        in_degree.insert(action.kind, action.depends_on.len());
        for dep in &action.depends_on {
            adjacency.entry(*dep).or_default().push(action.kind);
        }
    }

    let mut ready: Vec<ActionKind> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(kind, _)| *kind)
        .collect();
    let mut visited = 0;

    while let Some(kind) = ready.pop() {
        visited += 1;
        for dependent in adjacency.get(&kind).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(*dependent);
                }
            }
        }
    }

    if visited == actions.len() {
        Ok(())
    } else {
        let mut cycle: Vec<ActionKind> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(kind, _)| kind)
            .collect();
        cycle.sort();
        Err(PlanError::CyclicDependency(cycle))
    }
}
