//! 步骤调度器
//!
//! 严格顺序执行：每步返回 next_step，调度器在运行前检查两条守卫：
//! - 本轮已访问过的步骤再次出现 -> CycleDetected
//! - 步数超过上限 -> IterationBudgetExceeded
//!
//! 两者都终止整轮且不重试。某步 success:false 时立即停止并返回已累积的 trace。

use async_trait::async_trait;
use std::collections::HashSet;

use crate::core::{AgentError, Step, StepResult};

/// 单步执行接口（由 Orchestrator 实现；测试中可替换）
#[async_trait]
pub trait StepRunner: Send {
    async fn run_step(&mut self, step: Step, iteration: usize) -> Result<StepResult, AgentError>;
}

/// 调度结果
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// 到达 finishing
    Finished(Vec<StepResult>),
    /// 某步返回 success:false
    StepFailed(Vec<StepResult>),
}

impl DispatchOutcome {
    pub fn trace(&self) -> &[StepResult] {
        match self {
            DispatchOutcome::Finished(t) | DispatchOutcome::StepFailed(t) => t,
        }
    }
}

/// 守卫触发时携带已累积的 trace
#[derive(Debug)]
pub struct GuardTrip {
    pub error: AgentError,
    pub trace: Vec<StepResult>,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    max_iterations: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

impl Dispatcher {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// 从 start 开始驱动，直到 finishing、某步失败或守卫触发
    ///
    /// StepRunner 返回的 Err 视为守卫级错误：runner 只应把守卫以外的错误转成 StepResult
    pub async fn drive<R: StepRunner + ?Sized>(
        &self,
        start: Step,
        runner: &mut R,
    ) -> Result<DispatchOutcome, GuardTrip> {
        let mut visited: HashSet<Step> = HashSet::new();
        let mut trace: Vec<StepResult> = Vec::new();
        let mut iteration = 0usize;
        let mut current = start;

        loop {
            iteration += 1;
            if iteration > self.max_iterations {
                tracing::warn!(limit = self.max_iterations, step = %current, "iteration budget exceeded");
                return Err(GuardTrip {
                    error: AgentError::IterationBudgetExceeded {
                        limit: self.max_iterations,
                    },
                    trace,
                });
            }
            if !visited.insert(current) {
                tracing::warn!(step = %current, "step revisited within one run");
                return Err(GuardTrip {
                    error: AgentError::CycleDetected(current),
                    trace,
                });
            }

            tracing::info!(step = %current, iteration, "step started");
            let result = match runner.run_step(current, iteration).await {
                Ok(r) => r,
                Err(error) => return Err(GuardTrip { error, trace }),
            };
            tracing::info!(step = %current, success = result.success, next = ?result.next_step, "step finished");

            let success = result.success;
            let next = result.next_step;
            trace.push(result);

            if !success {
                return Ok(DispatchOutcome::StepFailed(trace));
            }
            match next {
                Some(step) => current = step,
                None => return Ok(DispatchOutcome::Finished(trace)),
            }
        }
    }
}
